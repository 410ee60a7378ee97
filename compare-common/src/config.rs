use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct ExtractionConfig {
    #[envconfig(from = "TIKA_ENDPOINT", default = "http://localhost:9998")]
    pub endpoint: String,

    /// Descend into container formats (archives, attachments) when extracting.
    #[envconfig(from = "EXTRACTION_RECURSIVE", default = "false")]
    pub recursive: bool,

    /// Return only this metadata field from `meta` instead of the whole map.
    #[envconfig(from = "EXTRACTION_META_FIELD")]
    pub meta_field: Option<NonEmptyString>,
}

#[derive(Envconfig, Clone)]
pub struct StorageConfig {
    #[envconfig(from = "MINIO_ENDPOINT")]
    pub endpoint: String,

    #[envconfig(from = "MINIO_ACCESS_KEY")]
    pub access_key: String,

    #[envconfig(from = "MINIO_SECRET_KEY")]
    pub secret_key: String,

    /// Bucket receiving the derived artifacts. Must already exist.
    #[envconfig(from = "MINIO_CLEAN_BUCKET")]
    pub bucket: NonEmptyString,

    #[envconfig(from = "MINIO_REGION", default = "us-east-1")]
    pub region: String,

    #[envconfig(from = "MINIO_FORCE_PATH_STYLE", default = "true")]
    pub force_path_style: bool,
}

impl StorageConfig {
    /// MinIO endpoints are often configured as a bare `host:port`.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            self.endpoint.clone()
        } else {
            format!("http://{}", self.endpoint)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
