//! The work envelope exchanged over the broker.
//!
//! A `WorkRequest` is an untyped table of header keys to values. The pipeline
//! only trusts the keys it reads after they pass `WorkRequest::target`, and it
//! annotates the same table with artifact URLs before republishing it.
use std::collections::BTreeMap;

use thiserror::Error;

pub const FILE_ID: &str = "file-id";
pub const SOURCE_PRESIGNED_URL: &str = "source-presigned-url";
pub const CLEAN_PRESIGNED_URL: &str = "clean-presigned-url";
pub const META_PRESIGNED_URL: &str = "meta-presigned-url";
pub const COMPARISON_URL: &str = "comparison-url";
pub const DIFFERENCE_PERCENTAGE: &str = "difference-percentage";
pub const COMPARISON_ERROR: &str = "comparison-error";

/// Enumeration of errors for envelopes that cannot be processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("malformed message: required key {0} is missing")]
    Missing(&'static str),
    #[error("malformed message: key {0} does not hold a string")]
    WrongType(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Text(String),
    Bytes(Vec<u8>),
    Null,
}

impl HeaderValue {
    /// Classify a raw transport value: UTF-8 bytes become text.
    pub fn from_raw(raw: Option<&[u8]>) -> Self {
        match raw {
            None => HeaderValue::Null,
            Some(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => HeaderValue::Text(text.to_owned()),
                Err(_) => HeaderValue::Bytes(bytes.to_vec()),
            },
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            HeaderValue::Text(text) => Some(text.as_bytes()),
            HeaderValue::Bytes(bytes) => Some(bytes),
            HeaderValue::Null => None,
        }
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_owned())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkRequest {
    headers: BTreeMap<String, HeaderValue>,
    /// Opaque message body, forwarded untouched.
    pub body: Option<Vec<u8>>,
}

/// The validated inputs of one comparison run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonTarget {
    pub file_id: String,
    pub source_url: String,
    pub clean_url: String,
}

impl WorkRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<HeaderValue>) {
        self.headers.insert(key.to_owned(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.headers.get(key)
    }

    pub fn get_str(&self, key: &'static str) -> Result<&str, EnvelopeError> {
        match self.headers.get(key) {
            None => Err(EnvelopeError::Missing(key)),
            Some(HeaderValue::Text(text)) => Ok(text),
            Some(_) => Err(EnvelopeError::WrongType(key)),
        }
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Check every required key up front so a malformed envelope never
    /// reaches storage or extraction.
    pub fn target(&self) -> Result<ComparisonTarget, EnvelopeError> {
        Ok(ComparisonTarget {
            file_id: self.get_str(FILE_ID)?.to_owned(),
            source_url: self.get_str(SOURCE_PRESIGNED_URL)?.to_owned(),
            clean_url: self.get_str(CLEAN_PRESIGNED_URL)?.to_owned(),
        })
    }
}

impl<K: Into<String>, V: Into<HeaderValue>> FromIterator<(K, V)> for WorkRequest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            headers: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            body: None,
        }
    }
}
