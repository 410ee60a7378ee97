use envconfig::Envconfig;

use compare_common::config::{EnvMsDuration, ExtractionConfig, NonEmptyString, StorageConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    /// Messages processed at once. 1 keeps processing strictly serial.
    #[envconfig(default = "1")]
    pub max_concurrent_jobs: usize,

    /// How long the consumer waits for a message before reporting liveness again.
    #[envconfig(default = "1000")]
    pub poll_interval: EnvMsDuration,

    /// Outbound header receiving the clean file's metadata URL.
    #[envconfig(default = "clean-presigned-url")]
    pub clean_meta_header: NonEmptyString,

    #[envconfig(default = "52428800")]
    pub max_upload_bytes: usize,

    #[envconfig(nested = true)]
    pub extraction: ExtractionConfig,

    #[envconfig(nested = true)]
    pub storage: StorageConfig,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    pub kafka_sasl_username: Option<String>,

    pub kafka_sasl_password: Option<String>,

    #[envconfig(default = "SCRAM-SHA-512")]
    pub kafka_sasl_mechanism: String,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "results-submission")]
    pub kafka_outcome_topic: String,

    #[envconfig(default = "comparison-request-dlq")]
    pub kafka_dead_letter_topic: String,
}

#[derive(Envconfig, Clone)]
pub struct ConsumerConfig {
    #[envconfig(default = "comparison-worker")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "comparison-request")]
    pub kafka_consumer_topic: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest
}
