use crate::integrity::error::{IntegrityError, IntegrityResult};
use blake3::Hasher;
use std::path::Path;
use tokio::io::AsyncReadExt;

pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Calculate BLAKE3 checksum for byte slice
    pub fn calculate_checksum(data: &[u8]) -> [u8; 32] {
        let mut hasher = Hasher::new();
        hasher.update(data);
        *hasher.finalize().as_bytes()
    }

    /// Hex-encoded BLAKE3, the form used on the wire and in chunk records
    pub fn checksum_hex(data: &[u8]) -> String {
        hex::encode(Self::calculate_checksum(data))
    }

    /// Calculate BLAKE3 checksum for file (streaming)
    pub async fn calculate_file_checksum(path: &Path) -> IntegrityResult<[u8; 32]> {
        let mut file = tokio::fs::File::open(path).await.map_err(|e| {
            IntegrityError::FileNotFound(format!("{}: {}", path.display(), e))
        })?;

        let mut hasher = Hasher::new();
        let mut buffer = vec![0u8; 64 * 1024];

        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(*hasher.finalize().as_bytes())
    }

    /// Decode a hex checksum, rejecting anything that is not 32 bytes.
    pub fn parse_checksum(hex_str: &str) -> IntegrityResult<[u8; 32]> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| IntegrityError::InvalidChecksum(e.to_string()))?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| IntegrityError::InvalidChecksumLength(len))
    }

    /// Verify bytes against an expected hex checksum.
    pub fn verify_bytes(data: &[u8], expected_hex: &str) -> IntegrityResult<()> {
        let expected = Self::parse_checksum(expected_hex)?;
        let actual = Self::calculate_checksum(data);
        if actual != expected {
            return Err(IntegrityError::ChecksumMismatch {
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            });
        }
        Ok(())
    }

    /// Compare two hex checksums without caring about case.
    pub fn checksums_match(a: &str, b: &str) -> bool {
        a.trim().eq_ignore_ascii_case(b.trim())
    }
}
