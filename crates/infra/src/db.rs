//! Shared persistence error type and SQLx error mapping.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Constraint` |
//! | Database (foreign key violation) | `23503` | `Constraint` |
//! | Database (check constraint violation) | `23514` | `Constraint` |
//! | Database (other) | any other | `Storage` |
//! | PoolClosed | N/A | `ConnectionLost` |
//! | PoolTimedOut, Io | N/A | `Unavailable` |
//! | RowNotFound, decode errors, other | N/A | `Storage` |

use thiserror::Error;

/// Store operation error (the persistence error of every store boundary).
///
/// Only `ConnectionLost` is fatal: it ends the loop that observed it so that
/// process supervision can restart the worker. Everything else is logged and
/// the operation skipped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store connection lost: {0}")]
    ConnectionLost(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::ConnectionLost(_))
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        StoreError::Storage(format!("{what} lock poisoned"))
    }
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23503") | Some("23514") => StoreError::Constraint(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::ConnectionLost(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {}: {}", operation, e)),
        sqlx::Error::RowNotFound => {
            StoreError::Storage(format!("unexpected row not found in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
