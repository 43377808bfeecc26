// Error type shared by storage, ledger and migrations

use thiserror::Error;

/// Failures surfaced by the library. Binaries wrap these in `anyhow`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage lock poisoned")]
    LockPoisoned,
}

impl Error {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Error::NotFound { entity, id }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = Error::not_found("product", 42);
        assert_eq!(err.to_string(), "product not found: 42");
    }

    #[test]
    fn test_sqlite_error_converts() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: Error = conn.execute("SELECT * FROM missing", []).unwrap_err().into();
        assert!(matches!(err, Error::Sqlite(_)));
    }
}
