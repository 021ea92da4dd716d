// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of a single encoded event to the collector.
//!
//! [`RetryingSender`] wraps the encoded event in a [`TransportPayload`] and POSTs it through a
//! [`Poster`], retrying failed attempts with capped exponential backoff:
//!
//! ```text
//!   attempt 0 ──fail──> sleep 1s ──> attempt 1 ──fail──> sleep 2s ──> attempt 2 ...
//!   (delay = min(base * 2^i, cap), no jitter, max_retries + 1 attempts in total)
//! ```
//!
//! Any 2xx status is a success. Non-2xx statuses, transport failures and payload encoding
//! failures all count as failed attempts. Only the per-request timeout bounds an attempt;
//! the retry sequence as a whole has no deadline.

use crate::config::ClientConfig;
use crate::error::{Result, TrackerError, TransportError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Client identifier sent as `User-Agent` unless a configured header replaces it.
pub const CLIENT_IDENTIFIER: &str = concat!("error-tracker-rust/", env!("CARGO_PKG_VERSION"));

const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Body of every POST to the collector.
#[derive(Debug, Clone, Serialize)]
pub struct TransportPayload<'a> {
    /// gzip + base64 encoded event JSON
    pub event: &'a str,
    pub license_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_name: Option<&'a str>,
    pub license_device: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostResponse {
    pub status: u16,
    pub body: String,
}

/// Performs one POST of an already serialized body.
#[async_trait]
pub trait Poster: Send + Sync {
    async fn post(&self, body: Vec<u8>, headers: &HeaderMap)
        -> Result<PostResponse, TransportError>;
}

/// [`Poster`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpPoster {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpPoster {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                TrackerError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl Poster for HttpPoster {
    async fn post(
        &self,
        body: Vec<u8>,
        headers: &HeaderMap,
    ) -> Result<PostResponse, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .headers(headers.clone())
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        // Body is only read on failure, success bodies are ignored
        let body = if response.status().is_success() {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };
        Ok(PostResponse { status, body })
    }
}

/// Backoff schedule between delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: BASE_DELAY,
            max_delay: MAX_DELAY,
        }
    }

    /// Delay after the failed attempt `attempt` (0-indexed): `min(base * 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Sends encoded events through a [`Poster`], retrying per [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryingSender {
    poster: Arc<dyn Poster>,
    headers: HeaderMap,
    license_id: String,
    license_name: Option<String>,
    license_device: String,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RetryingSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingSender")
            .field("headers", &self.headers)
            .field("license_id", &self.license_id)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryingSender {
    pub fn new(config: &ClientConfig, poster: Arc<dyn Poster>) -> Result<Self> {
        Ok(Self {
            poster,
            headers: build_headers(&config.headers)?,
            license_id: config.license_id.clone(),
            license_name: config.license_name.clone(),
            license_device: config.license_device.clone(),
            policy: RetryPolicy::new(config.max_retries),
        })
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Delivers one encoded event, returning the last error once retries are exhausted.
    pub async fn send(&self, encoded_event: &str) -> Result<(), TransportError> {
        let payload = TransportPayload {
            event: encoded_event,
            license_id: &self.license_id,
            license_name: self.license_name.as_deref(),
            license_device: &self.license_device,
        };

        let mut attempt = 0;
        loop {
            match self.attempt(&payload).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.policy.max_retries => {
                    error!(
                        "TRANSPORT | Failed to send event after {} attempts: {}",
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        "TRANSPORT | Attempt {} failed: {}, retrying in {} ms",
                        attempt + 1,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, payload: &TransportPayload<'_>) -> Result<(), TransportError> {
        let body =
            serde_json::to_vec(payload).map_err(|e| TransportError::Encode(e.to_string()))?;
        let response = self.poster.post(body, &self.headers).await?;
        if (200..300).contains(&response.status) {
            Ok(())
        } else {
            Err(TransportError::Status {
                status: response.status,
                body: response.body,
            })
        }
    }
}

/// Header precedence: `User-Agent` default, then configured headers (which may replace it),
/// then `Content-Type: application/json`, which configured headers cannot override.
pub fn build_headers(extra: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_IDENTIFIER));

    for (name, value) in extra {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            TrackerError::Configuration(format!("invalid header name: {name:?}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            TrackerError::Configuration(format!("invalid value for header {name}"))
        })?;
        headers.insert(name, value);
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}
