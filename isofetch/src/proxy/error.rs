use axum::http::StatusCode;
use thiserror::Error;

/// Errors from the proxy gateway.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The requested resource could not be resolved.
    #[error("{0}")]
    NotFound(String),

    /// The encoded source URL is not valid.
    #[error("invalid source reference: {0}")]
    InvalidSource(String),

    /// The upstream request failed or returned a non-success status.
    #[error("Failed to fetch from source: {0}")]
    Upstream(String),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidSource(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
