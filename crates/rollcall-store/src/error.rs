use rollcall_core::{EncodingError, ErrorKind, SessionId, StudentId, MAX_ENCODINGS_PER_STUDENT};
use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("attendance session {0} is closed")]
    SessionClosed(SessionId),

    #[error("student {student} has no attendance record in session {session}")]
    NoSuchOutcome {
        session: SessionId,
        student: StudentId,
    },

    #[error("student {0} already has {MAX_ENCODINGS_PER_STUDENT} face encodings")]
    EncodingLimit(StudentId),

    #[error("invalid encoding: {0}")]
    InvalidEncoding(#[from] EncodingError),

    #[error("schema: {0}")]
    Schema(String),

    #[error("database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::SessionClosed(_) => ErrorKind::SessionClosed,
            StoreError::NoSuchOutcome { .. } => ErrorKind::NoSuchOutcome,
            StoreError::EncodingLimit(_) => ErrorKind::EncodingLimit,
            StoreError::InvalidEncoding(_) => ErrorKind::InvalidEncoding,
            StoreError::Schema(_) | StoreError::Io(_) | StoreError::Sqlite(_) => ErrorKind::Storage,
        }
    }
}
