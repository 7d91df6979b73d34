use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::error;

use crate::analysis::AnalysisError;
use crate::context::UploadError;
use crate::session::StoreError;

/// Error body returned by every handler: `{"error": ...}` plus extras.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Analysis {
        source: AnalysisError,
        filename: Option<String>,
    },
    InsufficientText {
        message: String,
        extracted_text: String,
    },
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    /// Upload failure, tagging analysis errors with the stored file name.
    pub fn from_upload(err: UploadError, filename: Option<String>) -> Self {
        match err {
            UploadError::UnsupportedType => ApiError::BadRequest(err.to_string()),
            UploadError::InsufficientText { extracted_text } => ApiError::InsufficientText {
                message: crate::context::INSUFFICIENT_EXTRACTION_MESSAGE.to_string(),
                extracted_text,
            },
            UploadError::Analysis(source) => ApiError::Analysis { source, filename },
            UploadError::Io(_) | UploadError::Task(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        ApiError::from_upload(err, None)
    }
}

impl From<AnalysisError> for ApiError {
    fn from(source: AnalysisError) -> Self {
        ApiError::Analysis {
            source,
            filename: None,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, json!({ "error": message })),
            ApiError::Analysis { source, filename } => {
                let mut body = serde_json::to_value(&source)
                    .unwrap_or_else(|_| json!({ "error": source.message }));
                if let (Some(name), Value::Object(map)) = (filename, &mut body) {
                    map.insert("filename".into(), Value::String(name));
                }
                (StatusCode::BAD_REQUEST, body)
            }
            ApiError::InsufficientText {
                message,
                extracted_text,
            } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "extracted_text": extracted_text }),
            ),
            ApiError::Internal(message) => {
                error!(error = %message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
            }
        };
        (status, Json(body)).into_response()
    }
}
