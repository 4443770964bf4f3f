use thiserror::Error;

/// Failure modes of a single fetch attempt.
///
/// Only `Transient` is retried by the execution wrapper; the rest are
/// terminal for the attempt and recorded as-is in the execution log.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("parse: {0}")]
    Parse(String),

    #[error("blocked: {0}")]
    Blocked(String),

    #[error("auth: {0}")]
    Auth(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    /// Stable kind string for the execution log.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transient(_) => "transient",
            FetchError::NotFound(_) => "not_found",
            FetchError::Parse(_) => "parse",
            FetchError::Blocked(_) => "blocked",
            FetchError::Auth(_) => "auth",
        }
    }
}

/// Analyser-side failures. A failed analyser degrades to weight zero in
/// fusion rather than aborting the batch.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("calculation error: {0}")]
    CalculationError(String),

    #[error("external model error: {0}")]
    ModelError(String),

    #[error("database error: {0}")]
    DatabaseError(String),
}
