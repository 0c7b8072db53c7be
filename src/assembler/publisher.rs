use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::chunk::{sanitize_file_name, validate_upload_id};

const STAGING_DIR: &str = "staging";
const PUBLISHED_DIR: &str = "published";

/// Everything outside the RFC 3986 unreserved set.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Owns the directory of published objects.
///
/// Objects are written under `staging/` and renamed to `published/<upload_id>/<file_name>`
/// on the same filesystem, so a published name only ever refers to a complete file.
#[derive(Debug, Clone)]
pub struct ObjectPublisher {
    objects_dir: PathBuf,
    public_base_url: String,
}

impl ObjectPublisher {
    pub async fn new(
        objects_dir: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> std::io::Result<Self> {
        let objects_dir = objects_dir.into();
        fs::create_dir_all(objects_dir.join(STAGING_DIR)).await?;
        fs::create_dir_all(objects_dir.join(PUBLISHED_DIR)).await?;
        Ok(Self {
            objects_dir,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Root served under `/files`.
    pub fn published_dir(&self) -> PathBuf {
        self.objects_dir.join(PUBLISHED_DIR)
    }

    /// Fresh staging path for one assembly attempt.
    pub fn staging_path(&self) -> PathBuf {
        self.objects_dir
            .join(STAGING_DIR)
            .join(format!("{}.partial", Uuid::new_v4()))
    }

    pub fn object_path(&self, upload_id: &str, file_name: &str) -> PathBuf {
        self.published_dir().join(upload_id).join(file_name)
    }

    pub fn url_for(&self, upload_id: &str, file_name: &str) -> String {
        format!(
            "{}/files/{}/{}",
            self.public_base_url,
            encode_path_segment(upload_id),
            encode_path_segment(file_name)
        )
    }

    /// Move a fully written staging file to its final name and return the public URL.
    pub async fn publish(
        &self,
        staged: &Path,
        upload_id: &str,
        file_name: &str,
    ) -> std::io::Result<String> {
        validate_upload_id(upload_id)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidInput, e.to_string()))?;
        let file_name = sanitize_file_name(file_name)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidInput, e.to_string()))?;

        let target = self.object_path(upload_id, &file_name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(staged, &target).await?;
        Ok(self.url_for(upload_id, &file_name))
    }

    pub async fn exists(&self, upload_id: &str, file_name: &str) -> bool {
        fs::try_exists(self.object_path(upload_id, file_name))
            .await
            .unwrap_or(false)
    }

    /// Remove every published object of `upload_id`.
    pub async fn remove(&self, upload_id: &str) -> std::io::Result<bool> {
        validate_upload_id(upload_id)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidInput, e.to_string()))?;
        match fs::remove_dir_all(self.published_dir().join(upload_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn encode_path_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}
