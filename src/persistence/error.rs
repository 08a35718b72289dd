//! Error types for persistence operations.

use std::fmt;

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[derive(Debug)]
pub enum PersistenceError {
    NotFound,
    InvalidInterval(i64),
    ConnectionFailed(String),
    QueryFailed(String),
    MigrationFailed(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::NotFound => write!(f, "no matching row found"),
            PersistenceError::InvalidInterval(secs) => {
                write!(f, "{secs} is not an allowed probe interval")
            }
            PersistenceError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to persistence backend: {msg}")
            }
            PersistenceError::QueryFailed(msg) => write!(f, "persistence query failed: {msg}"),
            PersistenceError::MigrationFailed(msg) => {
                write!(f, "persistence migration failed: {msg}")
            }
        }
    }
}

impl std::error::Error for PersistenceError {}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PersistenceError::NotFound,
            other => PersistenceError::QueryFailed(other.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for PersistenceError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        PersistenceError::MigrationFailed(err.to_string())
    }
}
