use rdkafka::error::KafkaError;
use thiserror::Error;

/// Enumeration of errors related to initialization and consumption of comparison requests.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to receive from kafka: {0}")]
    ConsumerError(#[from] KafkaError),
    #[error("the worker pool has been closed")]
    PoolClosed,
    #[error("stopped consuming: an aborted message could not be dead-lettered")]
    DeadLetterUnavailable,
    #[error("offset tracking is unavailable")]
    OffsetTracking,
}
