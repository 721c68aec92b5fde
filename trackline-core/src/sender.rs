//! Network sender for the collection endpoint
//!
//! A sender performs exactly one authenticated POST per call and reports the
//! result as a [`SendOutcome`]. It never retries and never returns an error:
//! transport failures and non-2xx responses are both `success = false`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::Error;

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// True for any 2xx response
    pub success: bool,
    /// HTTP status, absent when no response was received
    pub status_code: Option<u16>,
    /// Response body, or the transport error message
    pub response_body: String,
}

impl SendOutcome {
    /// Outcome for a received response
    pub fn from_response(status: u16, body: impl Into<String>) -> Self {
        Self {
            success: (200..300).contains(&status),
            status_code: Some(status),
            response_body: body.into(),
        }
    }

    /// Outcome for a request that never got a response
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: None,
            response_body: message.into(),
        }
    }

    /// Classify a failed outcome; `None` on success.
    pub fn failure(&self) -> Option<Error> {
        if self.success {
            return None;
        }
        Some(match self.status_code {
            Some(status) => Error::ServerRejection {
                status,
                body: self.response_body.clone(),
            },
            None => Error::Transport(self.response_body.clone()),
        })
    }
}

/// Capability to deliver one serialized event.
#[async_trait]
pub trait Sender: Send + Sync {
    /// POST `body` to `url` with the given `Authorization` header value.
    async fn send(&self, url: &str, body: Vec<u8>, authorization: &str) -> SendOutcome;
}

/// reqwest-backed sender
pub struct HttpSender {
    http_client: reqwest::Client,
}

impl HttpSender {
    /// Create a sender whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> crate::error::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn send(&self, url: &str, body: Vec<u8>, authorization: &str) -> SendOutcome {
        let auth_value = match HeaderValue::from_str(authorization) {
            Ok(value) => value,
            Err(e) => {
                return SendOutcome::transport_failure(format!(
                    "invalid authorization header: {}",
                    e
                ))
            }
        };

        let response = match self
            .http_client
            .post(url)
            .header(AUTHORIZATION, auth_value)
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "HTTP request failed");
                return SendOutcome::transport_failure(format!("HTTP request failed: {}", e));
            }
        };

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());

        tracing::trace!(url = %url, status, "Received response");
        SendOutcome::from_response(status, body)
    }
}
