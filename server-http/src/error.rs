use crate::api::ErrorResponse;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

/// Maps `shared::Error` onto HTTP status codes with a JSON `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError(pub shared::Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            shared::Error::NotFound(_) => StatusCode::NOT_FOUND,
            shared::Error::Validation(_) => StatusCode::BAD_REQUEST,
            shared::Error::StoreRead(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<shared::Error> for ApiError {
    fn from(err: shared::Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(shared::Error::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
