use thiserror::Error;

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Persistence failure taxonomy. `Integrity` failures drop the offending
/// row and let the batch continue; `Unavailable` is retryable upstream.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("integrity violation: {0}")]
    Integrity(String),
}

impl PersistenceError {
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let msg = db.message().to_string();
                if db.is_unique_violation() {
                    PersistenceError::Conflict(msg)
                } else if db.is_foreign_key_violation() || db.is_check_violation() {
                    PersistenceError::Integrity(msg)
                } else {
                    PersistenceError::Unavailable(msg)
                }
            }
            sqlx::Error::RowNotFound => PersistenceError::Integrity("row not found".into()),
            other => PersistenceError::Unavailable(other.to_string()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PersistenceError::Unavailable(_) => "unavailable",
            PersistenceError::Conflict(_) => "conflict",
            PersistenceError::Integrity(_) => "integrity",
        }
    }
}
