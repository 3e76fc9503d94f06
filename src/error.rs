use thiserror::Error;

#[derive(Error, Debug)]
pub enum SamarthError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Vocabulary error: {0}")]
    Vocabulary(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl SamarthError {
    /// Short machine-readable class, surfaced as `error` in responses and
    /// used as the key for failure metrics.
    pub fn class(&self) -> &'static str {
        match self {
            SamarthError::Input(_) => "input",
            SamarthError::Planning(_) => "planning",
            SamarthError::Execution(_) | SamarthError::Polars(_) => "execution",
            SamarthError::Cache(_) => "cache",
            SamarthError::Vocabulary(_) => "vocabulary",
            SamarthError::Ingestion(_) | SamarthError::Csv(_) => "ingestion",
            SamarthError::Config(_) => "config",
            SamarthError::Io(_) | SamarthError::Json(_) => "io",
        }
    }
}

impl From<polars::error::PolarsError> for SamarthError {
    fn from(err: polars::error::PolarsError) -> Self {
        SamarthError::Polars(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SamarthError>;
