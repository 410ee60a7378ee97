use std::time::Instant;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use bytes::Bytes;
use tracing::debug;

use compare_common::diff::{compare, ComparisonResult};

use super::{ApiError, ExtractorState};

const LEFT_FILE: &str = "left_file";
const RIGHT_FILE: &str = "right_file";

struct Upload {
    name: String,
    body: Bytes,
}

/// Parse both uploaded renditions and score how much of the left one was altered.
pub async fn post(
    State(extractor): State<ExtractorState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ComparisonResult>, ApiError> {
    let mut multipart = multipart?;
    let mut left = None;
    let mut right = None;

    while let Some(field) = multipart.next_field().await? {
        let slot = match field.name() {
            Some(LEFT_FILE) => &mut left,
            Some(RIGHT_FILE) => &mut right,
            _ => continue,
        };
        let name = field.file_name().unwrap_or_default().to_owned();
        let body = field.bytes().await?;
        *slot = Some(Upload { name, body });
    }

    let left: Upload = left.ok_or(ApiError::MissingField(LEFT_FILE))?;
    let right: Upload = right.ok_or(ApiError::MissingField(RIGHT_FILE))?;
    debug!(
        left = %left.name,
        right = %right.name,
        left_bytes = left.body.len(),
        right_bytes = right.body.len(),
        "comparing uploaded files"
    );

    let start = Instant::now();
    let (original, altered) =
        tokio::try_join!(extractor.parse(left.body), extractor.parse(right.body))?;
    let (_, result) = compare(original, altered).await?;
    metrics::histogram!("visual_compare_duration_seconds").record(start.elapsed().as_secs_f64());

    Ok(Json(ComparisonResult {
        left: left.name,
        right: right.name,
        result,
    }))
}
