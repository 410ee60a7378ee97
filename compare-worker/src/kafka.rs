//! Kafka plumbing: client settings shared by the consumer and producer, and the
//! request consumer that turns messages into `WorkRequest`s.
use async_trait::async_trait;
use health::HealthHandle;
use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    message::{BorrowedMessage, Headers},
    ClientConfig, Message,
};

use compare_common::envelope::{HeaderValue, WorkRequest};

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::source::{Offset, OffsetError, RequestSource};

/// Connection and security settings common to every client we create.
pub fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000");

    let sasl = config
        .kafka_sasl_username
        .as_deref()
        .zip(config.kafka_sasl_password.as_deref());

    match (sasl, config.kafka_tls) {
        (Some((username, password)), tls) => {
            client_config
                .set(
                    "security.protocol",
                    if tls { "sasl_ssl" } else { "sasl_plaintext" },
                )
                .set("sasl.mechanism", &config.kafka_sasl_mechanism)
                .set("sasl.username", username)
                .set("sasl.password", password);
        }
        (None, true) => {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        (None, false) => {}
    };

    client_config
}

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl From<HealthHandle> for KafkaContext {
    fn from(value: HealthHandle) -> Self {
        KafkaContext { liveness: value }
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, _: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy_blocking();
    }
}

/// Consumer of the comparison request topic.
///
/// Offsets are never stored automatically: each `Offset` handed out by `recv`
/// must be stored once its message is fully handled.
pub struct RequestConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl RequestConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = client_config(common_config);
        client_config
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set("enable.auto.offset.store", "false");

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        Ok(Self {
            consumer,
            topic: consumer_config.kafka_consumer_topic.clone(),
        })
    }
}

#[async_trait]
impl RequestSource for RequestConsumer {
    async fn recv(&self) -> Result<(WorkRequest, Offset), KafkaError> {
        let message = self.consumer.recv().await?;

        let offset = Offset {
            partition: message.partition(),
            offset: message.offset(),
        };

        Ok((work_request(&message), offset))
    }

    fn store(&self, offset: Offset) -> Result<(), OffsetError> {
        self.consumer
            .store_offset(&self.topic, offset.partition, offset.offset)?;
        Ok(())
    }
}

/// Every header becomes an envelope entry; the payload is carried as is.
fn work_request(message: &BorrowedMessage<'_>) -> WorkRequest {
    let mut request: WorkRequest = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| (header.key, HeaderValue::from_raw(header.value)))
                .collect()
        })
        .unwrap_or_default();
    request.body = message.payload().map(|payload| payload.to_vec());
    request
}
