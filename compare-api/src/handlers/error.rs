use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use compare_common::diff::DiffError;
use compare_common::extraction::ExtractionError;

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request payload: {0}")]
    InvalidRequest(#[from] MultipartRejection),
    #[error("invalid multipart form: {0}")]
    InvalidForm(#[from] MultipartError),
    #[error("missing form field {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Diff(#[from] DiffError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidRequest(_)
            | ApiError::InvalidForm(_)
            | ApiError::MissingField(_)
            | ApiError::Extraction(ExtractionError::InvalidOperation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Extraction(_) => {
                error!("extraction failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Diff(_) => {
                error!("comparison failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
