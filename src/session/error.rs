use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Corrupt session row: {0}")]
    CorruptRow(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

impl From<sqlx::Error> for SessionError {
    fn from(err: sqlx::Error) -> Self {
        SessionError::DatabaseError(err.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
