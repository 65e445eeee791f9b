use thiserror::Error;

/// Failure raised by a wrapped data-producing operation.
///
/// The variants fall into two classes that drive dispatch:
/// client-facing failures (`NotFound`, `BadInput`) propagate verbatim and are
/// never retried, everything else is transient and eligible for retry and
/// fallback. `Serialization` is raised by the cache encoder, never by an
/// upstream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperationError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad input: {0}")]
    BadInput(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse upstream response: {0}")]
    Parse(String),

    #[error("Value cannot be encoded for the cache: {0}")]
    Serialization(String),
}

impl OperationError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_input(msg: impl Into<String>) -> Self {
        Self::BadInput(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Client-facing failures are returned to the caller as-is.
    pub fn is_client_facing(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::BadInput(_))
    }

    /// Transient failures are retried and may trigger a fallback.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Network(_) | Self::Parse(_))
    }
}

impl From<serde_json::Error> for OperationError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OperationError>;
