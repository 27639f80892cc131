use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dog_upload::UploadError;
use serde_json::json;
use tracing::{error, warn};

/// Response-side wrapper for [`UploadError`]
#[derive(Debug)]
pub struct UploadAxumError(pub UploadError);

impl From<UploadError> for UploadAxumError {
    fn from(e: UploadError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for UploadAxumError {
    fn from(rejection: JsonRejection) -> Self {
        Self(UploadError::bad_request(format!(
            "Failed to parse the request body as JSON: {}",
            rejection.body_text()
        )))
    }
}

impl From<PathRejection> for UploadAxumError {
    fn from(rejection: PathRejection) -> Self {
        Self(UploadError::bad_request(rejection.body_text()))
    }
}

impl From<QueryRejection> for UploadAxumError {
    fn from(rejection: QueryRejection) -> Self {
        Self(UploadError::bad_request(rejection.body_text()))
    }
}

impl IntoResponse for UploadAxumError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let code = kind.status_code();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Full source chain stays in the logs, the client only sees the safe message
        if status.is_server_error() {
            error!(error = %self.0, "upload request failed");
        } else if matches!(status, StatusCode::CONFLICT | StatusCode::FORBIDDEN) {
            warn!(error = %self.0, "upload request rejected");
        }

        let body = json!({
            "name": kind.name(),
            "message": self.0.client_message(),
            "code": code,
            "className": kind.class_name(),
        });
        (status, Json(body)).into_response()
    }
}
