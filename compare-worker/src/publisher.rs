use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use health::HealthHandle;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use thiserror::Error;
use tracing::{debug, error, info};

use compare_common::envelope::{WorkRequest, COMPARISON_ERROR, FILE_ID};

use crate::config::KafkaConfig;
use crate::kafka::{client_config, KafkaContext};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to produce to kafka: {error}")]
    ProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    ProduceCanceled,
}

/// Where finished and aborted envelopes go.
#[async_trait]
pub trait OutcomePublisher: Send + Sync {
    /// Republish an envelope that went through the whole pipeline.
    async fn publish_outcome(&self, request: &WorkRequest) -> Result<(), PublishError>;

    /// Park an aborted envelope, annotated with the reason it was aborted.
    async fn dead_letter(&self, request: &WorkRequest, reason: &str) -> Result<(), PublishError>;
}

pub struct KafkaPublisher {
    producer: FutureProducer<KafkaContext>,
    outcome_topic: String,
    dead_letter_topic: String,
}

impl KafkaPublisher {
    pub async fn new(config: &KafkaConfig, liveness: HealthHandle) -> Result<Self, KafkaError> {
        let mut client_config = client_config(config);
        client_config
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            );

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(liveness.into())?;

        // "Ping" the Kafka brokers by requesting metadata
        match producer
            .client()
            .fetch_metadata(None, std::time::Duration::from_secs(15))
        {
            Ok(metadata) => {
                info!(
                    "Successfully connected to Kafka brokers. Found {} topics.",
                    metadata.topics().len()
                );
            }
            Err(error) => {
                error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
                return Err(error);
            }
        }

        Ok(Self {
            producer,
            outcome_topic: config.kafka_outcome_topic.clone(),
            dead_letter_topic: config.kafka_dead_letter_topic.clone(),
        })
    }

    async fn send(&self, topic: &str, request: &WorkRequest) -> Result<(), PublishError> {
        let mut headers = OwnedHeaders::new_with_capacity(request.len());
        for (key, value) in request.headers() {
            headers = headers.insert(Header {
                key,
                value: value.as_bytes(),
            });
        }

        let record = FutureRecord {
            topic,
            key: request.get_str(FILE_ID).ok(),
            payload: request.body.as_deref(),
            timestamp: None,
            partition: None,
            headers: Some(headers),
        };

        let future_handle = self
            .producer
            .send_result(record)
            .map_err(|(error, _)| PublishError::ProduceError { error })?;

        match future_handle.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((error, _))) => Err(PublishError::ProduceError { error }),
            Err(_) => Err(PublishError::ProduceCanceled),
        }
    }
}

#[async_trait]
impl OutcomePublisher for KafkaPublisher {
    async fn publish_outcome(&self, request: &WorkRequest) -> Result<(), PublishError> {
        self.send(&self.outcome_topic, request).await
    }

    async fn dead_letter(&self, request: &WorkRequest, reason: &str) -> Result<(), PublishError> {
        let annotated = request.clone().with_header(COMPARISON_ERROR, reason);
        self.send(&self.dead_letter_topic, &annotated).await
    }
}

/// Publisher keeping everything in memory, for tests.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    outcomes: Arc<Mutex<Vec<WorkRequest>>>,
    dead_letters: Arc<Mutex<Vec<WorkRequest>>>,
    fail_outcomes: Arc<AtomicBool>,
    fail_dead_letters: Arc<AtomicBool>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_outcomes(self) -> Self {
        self.fail_outcomes.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_dead_letters(self) -> Self {
        self.fail_dead_letters.store(true, Ordering::SeqCst);
        self
    }

    pub fn outcomes(&self) -> Vec<WorkRequest> {
        self.outcomes
            .lock()
            .map(|outcomes| outcomes.clone())
            .unwrap_or_default()
    }

    pub fn dead_letters(&self) -> Vec<WorkRequest> {
        self.dead_letters
            .lock()
            .map(|dead_letters| dead_letters.clone())
            .unwrap_or_default()
    }
}

fn record(
    sink: &Mutex<Vec<WorkRequest>>,
    fail: &AtomicBool,
    request: WorkRequest,
) -> Result<(), PublishError> {
    if fail.load(Ordering::SeqCst) {
        return Err(PublishError::ProduceCanceled);
    }
    if let Ok(mut sink) = sink.lock() {
        sink.push(request);
    }
    Ok(())
}

#[async_trait]
impl OutcomePublisher for MemoryPublisher {
    async fn publish_outcome(&self, request: &WorkRequest) -> Result<(), PublishError> {
        record(&self.outcomes, &self.fail_outcomes, request.clone())
    }

    async fn dead_letter(&self, request: &WorkRequest, reason: &str) -> Result<(), PublishError> {
        let annotated = request.clone().with_header(COMPARISON_ERROR, reason);
        record(&self.dead_letters, &self.fail_dead_letters, annotated)
    }
}
