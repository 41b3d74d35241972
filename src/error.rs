use thiserror::Error;

/// Main error type for rankeval
#[derive(Error, Debug)]
pub enum RankevalError {
    /// Misconfiguration: unknown metric, malformed parameters, missing ratings
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configured metric could not be built from its parameters
    #[error("Metric instantiation error: {0}")]
    Instantiation(String),

    /// The search platform failed to execute a query
    #[error("Execution error: {0}")]
    Execution(String),

    /// A query template could not be resolved
    #[error("Template error: {0}")]
    Template(String),

    /// A persistence handler failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A query was driven through an illegal lifecycle transition
    #[error("Invalid query state: {0}")]
    State(String),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl RankevalError {
    /// Errors that must abort the whole run rather than a single metric or query.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RankevalError::Config(_) | RankevalError::Template(_))
    }
}

/// Convenient Result type using RankevalError
pub type Result<T> = std::result::Result<T, RankevalError>;
