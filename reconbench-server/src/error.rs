use axum::{
    extract::rejection::{FormRejection, JsonRejection, QueryRejection},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use reconbench_core::{coordinator::CoordinatorError, legacy::LegacyError, store::StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Legacy(#[from] LegacyError),

    #[error("{0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(error: std::io::Error) -> Self {
        ApiError::Internal(error.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    invalid_tools: Option<Vec<String>>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Coordinator(e) => match e {
                CoordinatorError::UnsupportedTool(_)
                | CoordinatorError::NoTools
                | CoordinatorError::JobNotComplete { .. } => StatusCode::BAD_REQUEST,
                CoordinatorError::JobNotFound(_) => StatusCode::NOT_FOUND,
            },
            ApiError::Legacy(e) => match e {
                LegacyError::UnknownMethod(_)
                | LegacyError::DatasetNotFound(_)
                | LegacyError::UploadNotFound(_)
                | LegacyError::InvalidPath(_) => StatusCode::BAD_REQUEST,
                LegacyError::ResultsNotFound(_)
                | LegacyError::FileNotFound(_)
                | LegacyError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let invalid_tools = match &self {
            ApiError::Coordinator(CoordinatorError::UnsupportedTool(tools)) => Some(tools.clone()),
            _ => None,
        };
        let error_response = ErrorResponse {
            error: self.to_string(),
            invalid_tools,
        };

        let body = serde_json::to_string(&error_response)
            .unwrap_or_else(|_| format!("{{\"error\": \"{}\"}}", self));

        let mut response = Response::new(body.into());
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use uuid::Uuid;

    #[rstest]
    #[case(ApiError::AuthenticationFailed, StatusCode::UNAUTHORIZED)]
    #[case(ApiError::Coordinator(CoordinatorError::NoTools), StatusCode::BAD_REQUEST)]
    #[case(ApiError::Coordinator(CoordinatorError::JobNotFound(Uuid::nil())), StatusCode::NOT_FOUND)]
    #[case(ApiError::Legacy(LegacyError::UnknownMethod("x".into())), StatusCode::BAD_REQUEST)]
    #[case(ApiError::Legacy(LegacyError::Store(StoreError::NotFound("x".into()))), StatusCode::NOT_FOUND)]
    #[case(ApiError::Legacy(LegacyError::Store(StoreError::Unavailable("down".into()))), StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(ApiError::Legacy(LegacyError::ContainerUnavailable("colmap".into())), StatusCode::INTERNAL_SERVER_ERROR)]
    fn maps_status_codes(#[case] error: ApiError, #[case] expected: StatusCode) {
        assert_eq!(error.into_response().status(), expected);
    }
}
