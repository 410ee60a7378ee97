//! Client for the content-extraction service (Apache Tika server REST API).
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::ExtractionConfig;

/// Metadata key holding the extracted text of each part in recursive responses.
const TIKA_CONTENT_KEY: &str = "X-TIKA:content";

/// Enumeration of errors returned by the extraction client.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("{0} is not a valid extraction operation")]
    InvalidOperation(String),
    #[error("invalid extraction service endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("extraction request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("extraction service responded with {status}: {body}")]
    Service { status: u16, body: String },
    #[error("could not decode extraction response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Parse,
    Detect,
    Language,
    Meta,
    Version,
    Parsers,
    MimeTypes,
    Detectors,
}

impl Operation {
    /// Operations that read a document. The rest describe the service itself.
    pub fn requires_input(&self) -> bool {
        matches!(
            self,
            Operation::Parse | Operation::Detect | Operation::Language | Operation::Meta
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Parse => "parse",
            Operation::Detect => "detect",
            Operation::Language => "language",
            Operation::Meta => "meta",
            Operation::Version => "version",
            Operation::Parsers => "parsers",
            Operation::MimeTypes => "mimetypes",
            Operation::Detectors => "detectors",
        }
    }
}

impl FromStr for Operation {
    type Err = ExtractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parse" => Ok(Operation::Parse),
            "detect" => Ok(Operation::Detect),
            "language" => Ok(Operation::Language),
            "meta" => Ok(Operation::Meta),
            "version" => Ok(Operation::Version),
            "parsers" => Ok(Operation::Parsers),
            "mimetypes" => Ok(Operation::MimeTypes),
            "detectors" => Ok(Operation::Detectors),
            invalid => Err(ExtractionError::InvalidOperation(invalid.to_owned())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The output of one extraction operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Text(String),
    Structured(serde_json::Value),
}

impl Extraction {
    /// Plain text as returned, or pretty-printed JSON for structured output.
    pub fn into_text(self) -> String {
        match self {
            Extraction::Text(text) => text,
            Extraction::Structured(value) => {
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Run a document operation over `input`.
    async fn extract(&self, operation: Operation, input: Bytes)
        -> Result<Extraction, ExtractionError>;

    /// Run an operation that describes the service and takes no document.
    async fn introspect(&self, operation: Operation) -> Result<Extraction, ExtractionError>;

    async fn parse(&self, input: Bytes) -> Result<String, ExtractionError> {
        Ok(self.extract(Operation::Parse, input).await?.into_text())
    }
}

/// Extractor backed by a Tika server.
#[derive(Clone)]
pub struct TikaClient {
    client: reqwest::Client,
    base_url: Url,
    recursive: bool,
    meta_field: Option<String>,
}

impl TikaClient {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .user_agent("document-comparison")
            .build()?;

        Self::from_client(client, config)
    }

    pub fn from_client(
        client: reqwest::Client,
        config: &ExtractionConfig,
    ) -> Result<Self, ExtractionError> {
        Ok(Self {
            client,
            base_url: Url::parse(&config.endpoint)?,
            recursive: config.recursive,
            meta_field: config.meta_field.as_ref().map(|f| f.as_str().to_owned()),
        })
    }

    /// Service URL for `segments`, each percent-encoded as a single path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ExtractionError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn put(
        &self,
        segments: &[&str],
        accept: &'static str,
        input: Bytes,
    ) -> Result<reqwest::Response, ExtractionError> {
        let url = self.endpoint(segments)?;
        debug!(%url, "sending document to extraction service");

        let response = self
            .client
            .put(url)
            .header(header::ACCEPT, accept)
            .body(input)
            .send()
            .await?;

        check_status(response).await
    }

    async fn get(
        &self,
        segments: &[&str],
        accept: &'static str,
    ) -> Result<reqwest::Response, ExtractionError> {
        let url = self.endpoint(segments)?;
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, accept)
            .send()
            .await?;

        check_status(response).await
    }

    async fn parse_recursive(&self, input: Bytes) -> Result<Extraction, ExtractionError> {
        let parts: Vec<HashMap<String, serde_json::Value>> = self
            .put(&["rmeta", "text"], "application/json", input)
            .await?
            .json()
            .await?;

        let text = parts
            .iter()
            .filter_map(|part| part.get(TIKA_CONTENT_KEY))
            .filter_map(|content| content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Extraction::Text(text))
    }

    async fn meta(&self, input: Bytes) -> Result<Extraction, ExtractionError> {
        if let Some(field) = &self.meta_field {
            let text = self
                .put(&["meta", field.as_str()], "text/plain", input)
                .await?
                .text()
                .await?;
            return Ok(Extraction::Text(text));
        }

        let path = if self.recursive { "rmeta" } else { "meta" };
        let value = self.put(&[path], "application/json", input).await?.json().await?;
        Ok(Extraction::Structured(value))
    }
}

#[async_trait]
impl Extractor for TikaClient {
    async fn extract(
        &self,
        operation: Operation,
        input: Bytes,
    ) -> Result<Extraction, ExtractionError> {
        match operation {
            Operation::Parse if self.recursive => self.parse_recursive(input).await,
            Operation::Parse => {
                let text = self.put(&["tika"], "text/plain", input).await?.text().await?;
                Ok(Extraction::Text(text))
            }
            Operation::Detect => {
                let text = self.put(&["detect", "stream"], "text/plain", input).await?.text().await?;
                Ok(Extraction::Text(text.trim().to_owned()))
            }
            Operation::Language => {
                let text = self
                    .put(&["language", "stream"], "text/plain", input)
                    .await?
                    .text()
                    .await?;
                Ok(Extraction::Text(text.trim().to_owned()))
            }
            Operation::Meta => self.meta(input).await,
            _ => Err(ExtractionError::InvalidOperation(operation.to_string())),
        }
    }

    async fn introspect(&self, operation: Operation) -> Result<Extraction, ExtractionError> {
        let path = match operation {
            Operation::Version => {
                let text = self.get(&["version"], "text/plain").await?.text().await?;
                return Ok(Extraction::Text(text.trim().to_owned()));
            }
            Operation::Parsers => "parsers",
            Operation::MimeTypes => "mime-types",
            Operation::Detectors => "detectors",
            _ => return Err(ExtractionError::InvalidOperation(operation.to_string())),
        };

        let value = self.get(&[path], "application/json").await?.json().await?;
        Ok(Extraction::Structured(value))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ExtractionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ExtractionError::Service {
        status: status.as_u16(),
        body,
    })
}

/// In-memory extractor for tests: documents are UTF-8 text that "parses" to itself.
#[derive(Clone, Default)]
pub struct MockExtractor {
    failures: Arc<Mutex<HashMap<Operation, u16>>>,
    calls: Arc<AtomicUsize>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `operation` fail with a service error carrying `status`.
    pub fn fail_on(self, operation: Operation, status: u16) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(operation, status);
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self, operation: Operation) -> Result<(), ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .failures
            .lock()
            .ok()
            .and_then(|failures| failures.get(&operation).copied());

        match status {
            Some(status) => Err(ExtractionError::Service {
                status,
                body: format!("mock {operation} failure"),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(
        &self,
        operation: Operation,
        input: Bytes,
    ) -> Result<Extraction, ExtractionError> {
        self.check_failure(operation)?;
        let text = String::from_utf8_lossy(&input).into_owned();

        match operation {
            Operation::Parse => Ok(Extraction::Text(text)),
            Operation::Detect => Ok(Extraction::Text("text/plain".to_owned())),
            Operation::Language => Ok(Extraction::Text("en".to_owned())),
            Operation::Meta => Ok(Extraction::Structured(serde_json::json!({
                "Content-Type": "text/plain; charset=UTF-8",
                "Content-Length": input.len().to_string(),
            }))),
            _ => Err(ExtractionError::InvalidOperation(operation.to_string())),
        }
    }

    async fn introspect(&self, operation: Operation) -> Result<Extraction, ExtractionError> {
        self.check_failure(operation)?;
        match operation {
            Operation::Version => Ok(Extraction::Text("Apache Tika (mock)".to_owned())),
            Operation::Parsers | Operation::MimeTypes | Operation::Detectors => {
                Ok(Extraction::Structured(serde_json::json!({})))
            }
            _ => Err(ExtractionError::InvalidOperation(operation.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;
    use crate::config::NonEmptyString;

    fn client_for(server: &MockServer, recursive: bool, meta_field: Option<&str>) -> TikaClient {
        let config = ExtractionConfig {
            endpoint: server.base_url(),
            recursive,
            meta_field: meta_field.map(|f| NonEmptyString(f.to_owned())),
        };
        TikaClient::new(&config).expect("failed to build tika client")
    }

    #[test]
    fn operations_round_trip_names() {
        for name in [
            "parse",
            "detect",
            "language",
            "meta",
            "version",
            "parsers",
            "mimetypes",
            "detectors",
        ] {
            let operation: Operation = name.parse().unwrap();
            assert_eq!(operation.as_str(), name);
        }

        assert!(matches!(
            "summarize".parse::<Operation>(),
            Err(ExtractionError::InvalidOperation(op)) if op == "summarize"
        ));
    }

    #[tokio::test]
    async fn parse_puts_document_to_tika() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/tika")
                .header("accept", "text/plain")
                .body("raw document");
            then.status(200).body("hello world");
        });

        let client = client_for(&server, false, None);
        let text = client.parse(Bytes::from("raw document")).await.unwrap();

        mock.assert();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn recursive_parse_joins_parts() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT).path("/rmeta/text");
            then.status(200).json_body(serde_json::json!([
                {"Content-Type": "application/zip", "X-TIKA:content": "outer"},
                {"Content-Type": "text/plain"},
                {"Content-Type": "text/plain", "X-TIKA:content": "inner"},
            ]));
        });

        let client = client_for(&server, true, None);
        let text = client.parse(Bytes::from("zip")).await.unwrap();

        mock.assert();
        assert_eq!(text, "outer\ninner");
    }

    #[tokio::test]
    async fn meta_returns_structured_metadata() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/meta")
                .header("accept", "application/json");
            then.status(200)
                .json_body(serde_json::json!({"Content-Type": "application/pdf"}));
        });

        let client = client_for(&server, false, None);
        let extraction = client
            .extract(Operation::Meta, Bytes::from("pdf"))
            .await
            .unwrap();

        mock.assert();
        assert_eq!(
            extraction,
            Extraction::Structured(serde_json::json!({"Content-Type": "application/pdf"}))
        );
    }

    #[tokio::test]
    async fn meta_field_selects_single_value() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT).path("/meta/Content-Type");
            then.status(200).body("application/pdf");
        });

        let client = client_for(&server, false, Some("Content-Type"));
        let extraction = client
            .extract(Operation::Meta, Bytes::from("pdf"))
            .await
            .unwrap();

        mock.assert();
        assert_eq!(extraction.into_text(), "application/pdf");
    }

    #[test]
    fn meta_field_is_a_single_path_segment() {
        let config = ExtractionConfig {
            endpoint: "http://tika:9998/service".to_owned(),
            recursive: false,
            meta_field: None,
        };
        let client = TikaClient::new(&config).unwrap();

        assert_eq!(
            client.endpoint(&["meta", "pdf:docinfo/title x"]).unwrap().as_str(),
            "http://tika:9998/service/meta/pdf:docinfo%2Ftitle%20x"
        );
        assert_eq!(
            client.endpoint(&["rmeta", "text"]).unwrap().as_str(),
            "http://tika:9998/service/rmeta/text"
        );
    }

    #[tokio::test]
    async fn detect_and_language_are_trimmed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT).path("/detect/stream");
            then.status(200).body("application/pdf\n");
        });
        server.mock(|when, then| {
            when.method(PUT).path("/language/stream");
            then.status(200).body("en\n");
        });

        let client = client_for(&server, false, None);
        let mime = client
            .extract(Operation::Detect, Bytes::from("doc"))
            .await
            .unwrap();
        let language = client
            .extract(Operation::Language, Bytes::from("doc"))
            .await
            .unwrap();

        assert_eq!(mime, Extraction::Text("application/pdf".to_owned()));
        assert_eq!(language, Extraction::Text("en".to_owned()));
    }

    #[tokio::test]
    async fn introspection_queries_service() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/version");
            then.status(200).body("Apache Tika 2.9.1");
        });
        let mime_types = server.mock(|when, then| {
            when.method(GET).path("/mime-types");
            then.status(200)
                .json_body(serde_json::json!({"text/plain": {"alias": []}}));
        });

        let client = client_for(&server, false, None);
        let version = client.introspect(Operation::Version).await.unwrap();
        let types = client.introspect(Operation::MimeTypes).await.unwrap();

        mime_types.assert();
        assert_eq!(version, Extraction::Text("Apache Tika 2.9.1".to_owned()));
        assert!(matches!(types, Extraction::Structured(_)));
    }

    #[tokio::test]
    async fn operations_are_checked_against_input() {
        let server = MockServer::start();
        let client = client_for(&server, false, None);

        assert!(matches!(
            client.extract(Operation::Version, Bytes::new()).await,
            Err(ExtractionError::InvalidOperation(_))
        ));
        assert!(matches!(
            client.introspect(Operation::Parse).await,
            Err(ExtractionError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn service_errors_are_surfaced() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT).path("/tika");
            then.status(422).body("Unprocessable document");
        });

        let client = client_for(&server, false, None);
        let error = client.parse(Bytes::from("garbage")).await.unwrap_err();

        match error {
            ExtractionError::Service { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body, "Unprocessable document");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn mock_extractor_failure_injection() {
        let extractor = MockExtractor::new().fail_on(Operation::Meta, 503);

        assert_eq!(
            extractor.parse(Bytes::from("hello")).await.unwrap(),
            "hello"
        );
        assert!(matches!(
            extractor.extract(Operation::Meta, Bytes::from("hello")).await,
            Err(ExtractionError::Service { status: 503, .. })
        ));
        assert_eq!(extractor.calls(), 2);
    }
}
