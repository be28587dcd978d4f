use thiserror::Error;

/// Failures surfaced by the verification engine.
///
/// Everything except `StoreUnavailable` and `ExtractionFailure` describes a
/// condition of the caller's input and is reported back as-is. The type is
/// `Clone` so one in-flight session creation can hand its outcome to every
/// request waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("no enrolled baseline for user: {0}")]
    UserNotFound(String),
    #[error("session {session_id} belongs to user {owner}, not {requested}")]
    UserMismatch {
        session_id: String,
        owner: String,
        requested: String,
    },
    #[error("no face detected")]
    NoFaceDetected,
    #[error("expected exactly one face, found {0}")]
    MultipleFacesDetected(usize),
    #[error("no distances recorded")]
    EmptyAggregate,
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("embedding extraction failed: {0}")]
    ExtractionFailure(String),
    #[error("enrollment store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<crate::store::StoreError> for Error {
    fn from(e: crate::store::StoreError) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

impl From<crate::extract::ExtractError> for Error {
    fn from(e: crate::extract::ExtractError) -> Self {
        Error::ExtractionFailure(e.to_string())
    }
}
