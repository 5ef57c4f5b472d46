use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    /// Source table could not be loaded. Fatal for the session.
    #[error("Load error: {0}")]
    Load(String),

    /// The text-generation service call failed or timed out.
    #[error("Generation error: {0}")]
    Generation(String),

    /// The service answered, but not with a chart construction we accept.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The chart construction could not be bound to the current table.
    #[error("Render error: {0}")]
    Render(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Empty request: nothing to send")]
    EmptyRequest,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl DashboardError {
    /// Only load failures end the session; everything else is reported and the
    /// user can try again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DashboardError::Load(_))
    }
}

impl From<polars::error::PolarsError> for DashboardError {
    fn from(err: polars::error::PolarsError) -> Self {
        DashboardError::Polars(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
