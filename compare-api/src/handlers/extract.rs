use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;

use compare_common::extraction::{Extraction, Operation};

use super::{ApiError, ExtractorState};

/// Run a document operation (`parse`, `detect`, `language`, `meta`) over the request body.
pub async fn extract(
    State(extractor): State<ExtractorState>,
    Path(operation): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let operation: Operation = operation.parse()?;
    let extraction = extractor.extract(operation, body).await?;
    Ok(respond(extraction))
}

/// Query the extraction service itself (`version`, `parsers`, `mimetypes`, `detectors`).
pub async fn introspect(
    State(extractor): State<ExtractorState>,
    Path(operation): Path<String>,
) -> Result<Response, ApiError> {
    let operation: Operation = operation.parse()?;
    let extraction = extractor.introspect(operation).await?;
    Ok(respond(extraction))
}

fn respond(extraction: Extraction) -> Response {
    match extraction {
        Extraction::Text(text) => text.into_response(),
        Extraction::Structured(value) => Json(value).into_response(),
    }
}
