use thiserror::Error;

/// Failure raised by a model backend.
///
/// The executor decides how a failure is classified (build vs. execution);
/// backends only describe what went wrong.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The historical data source could not be read.
    #[error("data source unavailable: {0}")]
    DataSource(String),
}
