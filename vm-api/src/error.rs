use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;
use vm_orchestrator::HandlerError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<HandlerError> for ApiError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::InvalidArgument(_) | HandlerError::UnknownMethod(_) => {
                ApiError::BadRequest(err.to_string())
            }
            HandlerError::Resolution { .. } | HandlerError::Lookup { .. } => {
                ApiError::NotFound(err.to_string())
            }
            _ => {
                error!("RPC failed: {}", err);
                ApiError::Internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vm_provider::ProviderError;

    fn status_of(err: HandlerError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_handler_errors_map_to_status_codes() {
        assert_eq!(
            status_of(HandlerError::InvalidArgument("[filePath] is missing".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(HandlerError::UnknownMethod("reboot".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(HandlerError::Lookup {
                name: "vm".into(),
                source: ProviderError::NotFound("vm".into()),
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(HandlerError::Provider(ProviderError::CommandFailed(
                "exit status 1".into()
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
