use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{routing, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use compare_common::extraction::Extractor;
use compare_common::metrics;

use super::{compare, extract};

/// The single extraction client shared by every request handler.
pub type ExtractorState = Arc<dyn Extractor>;

pub fn app(
    extractor: ExtractorState,
    metrics: Option<PrometheusHandle>,
    max_upload_bytes: usize,
) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route(
            "/metrics",
            routing::get(move || match metrics {
                Some(ref recorder_handle) => std::future::ready(recorder_handle.render()),
                None => std::future::ready("no metrics recorder installed".to_owned()),
            }),
        )
        .route("/visual_compare", routing::post(compare::post))
        .route(
            "/extract/:operation",
            routing::get(extract::introspect).post(extract::extract),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(metrics::track_metrics))
        .with_state(extractor)
}

pub async fn index() -> &'static str {
    "document comparison"
}
