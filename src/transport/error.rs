use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Request rejected ({status}): {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Upload incomplete, missing chunks {missing:?}: {message}")]
    Incomplete { missing: Vec<u32>, message: String },

    #[error("Unknown upload session: {0}")]
    UnknownSession(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<TransportError>,
    },

    #[error("Cancelled")]
    Cancelled,
}

impl TransportError {
    /// Transient failures worth another attempt: network failures and server-side errors.
    pub fn is_retriable(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Server { .. })
    }

    /// HTTP statuses that behave like server-side trouble rather than a bad request.
    pub fn is_retriable_status(status: u16) -> bool {
        status >= 500 || status == 408 || status == 429
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Protocol(err.to_string())
        } else if let Some(status) = err.status() {
            let status = status.as_u16();
            if Self::is_retriable_status(status) {
                TransportError::Server {
                    status,
                    message: err.to_string(),
                }
            } else {
                TransportError::Rejected {
                    status,
                    code: None,
                    message: err.to_string(),
                }
            }
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
