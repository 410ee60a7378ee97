use std::sync::Arc;

use envconfig::Envconfig;
use eyre::Result;

use compare_api::config::Config;
use compare_api::handlers;
use compare_common::extraction::TikaClient;
use compare_common::metrics::{serve, setup_metrics_recorder};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env()?;

    let extractor = TikaClient::new(&config.extraction)?;
    let recorder_handle = setup_metrics_recorder()?;

    let app = handlers::app(
        Arc::new(extractor),
        Some(recorder_handle),
        config.max_upload_bytes,
    );

    tracing::info!(bind = %config.bind(), "starting comparison api");
    match serve(app, &config.bind()).await {
        Ok(_) => {}
        Err(e) => tracing::error!("failed to start compare-api http server, {}", e),
    }

    Ok(())
}
