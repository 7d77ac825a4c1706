use thiserror::Error;

pub type DashboardResult<T> = Result<T, DashboardError>;

/// Error taxonomy shared by every layer of the dashboard backend.
///
/// Payloads are plain strings so a single failure can be handed to every
/// caller waiting on the same in-flight refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DashboardError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to fetch from analytics service: {0}")]
    Upstream(String),

    #[error("Unreadable analytics service response: {0}")]
    Format(String),

    #[error("Metrics store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DashboardError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status the route layer answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::Upstream(_) => 502,
            Self::Format(_) => 502,
            Self::Store(_) => 500,
            Self::Config(_) => 500,
            Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for response bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Upstream(_) => "upstream_error",
            Self::Format(_) => "format_error",
            Self::Store(_) => "store_error",
            Self::Config(_) => "config_error",
            Self::Validation(_) => "validation_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<serde_json::Error> for DashboardError {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(e.to_string())
    }
}
