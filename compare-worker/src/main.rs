//! Consume comparison requests from Kafka and serve the comparison endpoint.
use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use envconfig::Envconfig;
use eyre::Result;
use health::HealthRegistry;

use compare_common::extraction::{Extractor, TikaClient};
use compare_common::metrics::{serve, setup_metrics_recorder};
use compare_common::storage::S3ArtifactStore;
use compare_worker::config::Config;
use compare_worker::kafka::RequestConsumer;
use compare_worker::pipeline::ComparisonPipeline;
use compare_worker::publisher::KafkaPublisher;
use compare_worker::worker::ComparisonWorker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env()?;

    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness
        .register("worker".to_string(), time::Duration::seconds(120))
        .await;
    let producer_liveness = liveness
        .register("kafka_producer".to_string(), time::Duration::seconds(30))
        .await;

    let store = S3ArtifactStore::from_config(&config.storage).await;
    let extractor: Arc<dyn Extractor> = Arc::new(TikaClient::new(&config.extraction)?);
    let publisher = KafkaPublisher::new(&config.kafka, producer_liveness).await?;
    let consumer = RequestConsumer::new(&config.kafka, &config.consumer)?;

    let pipeline = ComparisonPipeline::new(
        Arc::new(store),
        extractor.clone(),
        Arc::new(publisher),
        config.storage.bucket.as_str(),
        config.clean_meta_header.as_str(),
    );
    let worker = ComparisonWorker::new(
        Arc::new(consumer),
        pipeline,
        config.poll_interval.0,
        config.max_concurrent_jobs,
        worker_liveness,
    );

    let recorder_handle = setup_metrics_recorder()?;
    let router = compare_api::handlers::app(
        extractor,
        Some(recorder_handle),
        config.max_upload_bytes,
    )
    .route("/_liveness", get(move || ready(liveness.get_status())));

    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            tracing::error!("failed to start compare-worker http server, {}", e);
        }
    });

    worker.run().await?;

    Ok(())
}
