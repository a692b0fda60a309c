use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::proxy::ProxyError;
use crate::service::ServiceError;

/// Error returned by HTTP handlers, rendered as `{"detail": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    Proxy(ProxyError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Service(err) => match err {
                ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
                ServiceError::InvalidState { .. }
                | ServiceError::NotActive { .. }
                | ServiceError::InvalidRequest(_)
                | ServiceError::UnsafeDestination(_) => StatusCode::BAD_REQUEST,
                ServiceError::AlreadyActive { .. } => StatusCode::CONFLICT,
                ServiceError::Store(_) | ServiceError::Spawn(_) | ServiceError::Join(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Proxy(err) => err.status(),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Service(err) => err.to_string(),
            Self::Proxy(err) => err.to_string(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        Self::Proxy(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.message();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %detail, "Request failed");
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::DownloadState;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(ServiceError::NotFound(1)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ServiceError::InvalidState {
                id: 1,
                state: DownloadState::Completed,
                operation: "pause",
            })
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ProxyError::Upstream("refused".into())).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
