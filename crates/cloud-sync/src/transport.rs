//! HTTP transport for the game API.
//!
//! A transport performs exactly one request/response cycle. It knows nothing
//! about sessions or envelopes and never retries; both are the pipeline's job.

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::time::Duration;

use crate::error::TransportError;
use crate::types::{HttpMethod, TransportRequest};

const MAX_LOG_BODY_CHARS: usize = 512;

fn body_preview(body: &str) -> String {
    let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        preview.push_str("...");
    }
    preview
}

/// One HTTP round-trip with a per-request timeout.
///
/// Non-2xx responses come back as [`TransportError::Status`] with the body
/// decoded when it is JSON, since the server embeds error codes there.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest)
        -> std::result::Result<serde_json::Value, TransportError>;
}

/// `reqwest`-backed transport rooted at the game API base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[CloudSave] API response status: {}", status);
            return;
        }

        debug!(
            "[CloudSave] API response error ({}): {}",
            status,
            body_preview(body)
        );
    }

    /// Create a transport for the API at `base_url` (e.g. "http://127.0.0.1:8080").
    pub fn new(base_url: &str) -> std::result::Result<Self, TransportError> {
        let client = reqwest::Client::builder().build().map_err(|e| {
            TransportError::InvalidRequest(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create headers for an API request.
    fn headers(request: &TransportRequest) -> std::result::Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                TransportError::InvalidRequest(format!("Invalid header name {}", name))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                TransportError::InvalidRequest(format!("Invalid value for header {}", name))
            })?;
            headers.insert(name, value);
        }

        Ok(headers)
    }

    fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else {
            TransportError::Connection(err.to_string())
        }
    }

    /// Parse a JSON response body, keeping decodable error bodies.
    async fn parse_response(
        response: reqwest::Response,
        timeout: Duration,
    ) -> std::result::Result<serde_json::Value, TransportError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Self::map_reqwest_error(e, timeout))?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: serde_json::from_str(&body).ok(),
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "[CloudSave] Failed to deserialize response. Body: {}, Error: {}",
                body_preview(&body),
                e
            );
            TransportError::InvalidBody(format!("Failed to parse response: {}", e))
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<serde_json::Value, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        debug!("[CloudSave] {} {}", request.method.as_str(), url);

        let mut builder = self
            .client
            .request(method, &url)
            .headers(Self::headers(&request)?)
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::map_reqwest_error(e, request.timeout))?;

        Self::parse_response(response, request.timeout).await
    }
}
