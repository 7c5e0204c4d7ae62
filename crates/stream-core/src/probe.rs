//! Stream liveness probing.
//!
//! A probe answers one question: does this URL currently serve something a
//! radio player can play?  Probes never fail as a Rust `Err`; every failure
//! mode becomes a `TestResult` with `is_valid == false`.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::error::RadioErrorKind;

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResult {
    pub fn valid(status_code: u16, response_time_ms: u64, content_type: Option<String>) -> Self {
        Self {
            is_valid: true,
            status_code: Some(status_code),
            response_time_ms: Some(response_time_ms),
            content_type,
            error: None,
        }
    }

    pub fn failed(error: &ProbeError, response_time_ms: Option<u64>) -> Self {
        Self {
            is_valid: false,
            status_code: error.status_code(),
            response_time_ms,
            content_type: None,
            error: Some(error.to_string()),
        }
    }
}

/// Why a probe did not validate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("connection timed out after {0} ms")]
    Timeout(u64),
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl ProbeError {
    pub fn kind(&self) -> RadioErrorKind {
        match self {
            ProbeError::Timeout(_) => RadioErrorKind::NetworkTimeout,
            ProbeError::ConnectionRefused(_) => RadioErrorKind::StreamConnectionRefused,
            ProbeError::Connect(_) => RadioErrorKind::NetworkConnectionFailed,
            ProbeError::Status(404) => RadioErrorKind::StreamNotFound,
            ProbeError::Status(code) if *code >= 500 => RadioErrorKind::StreamServerError,
            ProbeError::Status(_) => RadioErrorKind::StreamInvalidResponse,
            ProbeError::UnsupportedContentType(_) => RadioErrorKind::StreamUnsupportedContentType,
            ProbeError::InvalidUrl(_) => RadioErrorKind::InvalidUrl,
            ProbeError::Request(_) => RadioErrorKind::StreamInvalidResponse,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProbeError::Status(code) => Some(*code),
            _ => None,
        }
    }

    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return ProbeError::Timeout(timeout.as_millis() as u64);
        }
        if err.is_builder() {
            return ProbeError::InvalidUrl(err.to_string());
        }
        if err.is_connect() {
            let mut source = StdError::source(&err);
            while let Some(e) = source {
                if let Some(io) = e.downcast_ref::<std::io::Error>() {
                    if io.kind() == std::io::ErrorKind::ConnectionRefused {
                        return ProbeError::ConnectionRefused(err.to_string());
                    }
                }
                source = e.source();
            }
            return ProbeError::Connect(err.to_string());
        }
        ProbeError::Request(err.to_string())
    }
}

/// The "test this URL" primitive everything else is built on.
#[async_trait]
pub trait StreamProber: Send + Sync {
    async fn test_stream_connection(&self, url: &str, timeout: Duration) -> TestResult;
}

/// Content types a player can consume.  A missing header is accepted:
/// several Icecast/Shoutcast builds omit it on HEAD.
pub fn is_stream_content_type(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return true;
    };
    let mime = ct
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime.is_empty()
        || mime.starts_with("audio/")
        || matches!(
            mime.as_str(),
            "application/ogg"
                | "application/octet-stream"
                | "application/vnd.apple.mpegurl"
                | "application/x-mpegurl"
                | "video/mp2t"
        )
}

/// reqwest-backed prober.  HEAD first; servers that reject HEAD get a GET
/// whose body is dropped as soon as the headers arrive.
#[derive(Clone)]
pub struct HttpStreamProber {
    client: Client,
}

impl HttpStreamProber {
    pub fn new() -> Result<Self, ProbeError> {
        let mut headers = HeaderMap::new();
        // Many Icecast servers only answer properly when asked for metadata
        headers.insert("Icy-MetaData", HeaderValue::from_static("1"));

        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("radio-streamd/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        Ok(Self { client })
    }

    async fn probe(&self, url: &str, timeout: Duration) -> Result<(StatusCode, Option<String>), ProbeError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| ProbeError::InvalidUrl(e.to_string()))?;

        let mut response = self
            .client
            .head(parsed.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ProbeError::from_reqwest(e, timeout))?;

        if matches!(
            response.status(),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
        ) {
            debug!("probe: {} rejects HEAD, retrying with GET", url);
            response = self
                .client
                .get(parsed)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| ProbeError::from_reqwest(e, timeout))?;
        }

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        // Dropping the response closes the body without reading it
        drop(response);
        Ok((status, content_type))
    }
}

#[async_trait]
impl StreamProber for HttpStreamProber {
    async fn test_stream_connection(&self, url: &str, timeout: Duration) -> TestResult {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, self.probe(url, timeout)).await {
            Ok(r) => r,
            Err(_) => Err(ProbeError::Timeout(timeout.as_millis() as u64)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((status, content_type)) if !status.is_success() => {
                debug!("probe: {} -> HTTP {}", url, status);
                TestResult {
                    content_type,
                    ..TestResult::failed(&ProbeError::Status(status.as_u16()), Some(elapsed_ms))
                }
            }
            Ok((status, content_type)) if !is_stream_content_type(content_type.as_deref()) => {
                let ct = content_type.clone().unwrap_or_default();
                debug!("probe: {} -> unsupported content type {}", url, ct);
                TestResult {
                    status_code: Some(status.as_u16()),
                    content_type,
                    ..TestResult::failed(&ProbeError::UnsupportedContentType(ct), Some(elapsed_ms))
                }
            }
            Ok((status, content_type)) => {
                debug!("probe: {} ok in {} ms", url, elapsed_ms);
                TestResult::valid(status.as_u16(), elapsed_ms, content_type)
            }
            Err(e) => {
                debug!("probe: {} failed: {}", url, e);
                TestResult::failed(&e, Some(elapsed_ms))
            }
        }
    }
}
