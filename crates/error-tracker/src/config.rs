// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client configuration: defaults, validation and environment loading.

use crate::error::{Result, TrackerError};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 50;

const MAX_RETRIES_LIMIT: u32 = 10;
const MIN_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_TIMEOUT: Duration = Duration::from_secs(60);
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

const ENV_WEBHOOK_URL: &str = "ERROR_TRACKER_WEBHOOK_URL";
const ENV_LICENSE_ID: &str = "ERROR_TRACKER_LICENSE_ID";
const ENV_LICENSE_NAME: &str = "ERROR_TRACKER_LICENSE_NAME";
const ENV_LICENSE_DEVICE: &str = "ERROR_TRACKER_LICENSE_DEVICE";
const ENV_APP: &str = "ERROR_TRACKER_APP";
const ENV_VERSION: &str = "ERROR_TRACKER_VERSION";
const ENV_PLATFORM: &str = "ERROR_TRACKER_PLATFORM";
const ENV_ENABLED: &str = "ERROR_TRACKER_ENABLED";
const ENV_MAX_RETRIES: &str = "ERROR_TRACKER_MAX_RETRIES";
const ENV_TIMEOUT_MS: &str = "ERROR_TRACKER_TIMEOUT_MS";
const ENV_FLUSH_INTERVAL_MS: &str = "ERROR_TRACKER_FLUSH_INTERVAL_MS";
const ENV_MAX_QUEUE_SIZE: &str = "ERROR_TRACKER_MAX_QUEUE_SIZE";
const ENV_HEADERS: &str = "ERROR_TRACKER_HEADERS";

/// Configuration for a tracker [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Collector endpoint receiving one POST per event
    pub webhook_url: String,
    pub license_id: String,
    pub license_name: Option<String>,
    pub license_device: String,
    pub app: Option<String>,
    pub version: Option<String>,
    /// Defaults to the runtime OS when absent
    pub platform: Option<String>,
    /// Whether new events are accepted right after construction
    pub enabled: bool,
    /// Retries after the first attempt, 0 to 10
    pub max_retries: u32,
    /// Per-request timeout, 1s to 60s
    pub timeout: Duration,
    /// Periodic flush interval, at least 100ms
    pub flush_interval: Duration,
    /// Batch size and size-triggered flush threshold
    pub max_queue_size: usize,
    /// Extra headers sent with every request
    pub headers: HashMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            license_id: String::new(),
            license_name: None,
            license_device: String::new(),
            app: None,
            version: None,
            platform: None,
            enabled: true,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            headers: HashMap::new(),
        }
    }
}

impl ClientConfig {
    /// Convenience constructor for the three required settings.
    pub fn new(
        webhook_url: impl Into<String>,
        license_id: impl Into<String>,
        license_device: impl Into<String>,
    ) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            license_id: license_id.into(),
            license_device: license_device.into(),
            ..Default::default()
        }
    }

    /// Builds a validated configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_env_iter(env::vars())
    }

    /// Builds a validated configuration from key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| map.get(key).and_then(|value| non_empty(value));

        let mut config = Self {
            webhook_url: get(ENV_WEBHOOK_URL).unwrap_or_default(),
            license_id: get(ENV_LICENSE_ID).unwrap_or_default(),
            license_name: get(ENV_LICENSE_NAME),
            license_device: get(ENV_LICENSE_DEVICE).unwrap_or_default(),
            app: get(ENV_APP),
            version: get(ENV_VERSION),
            platform: get(ENV_PLATFORM),
            ..Default::default()
        };

        if let Some(enabled) = get(ENV_ENABLED) {
            config.enabled = parse_bool(ENV_ENABLED, &enabled)?;
        }
        if let Some(retries) = get(ENV_MAX_RETRIES) {
            config.max_retries = parse_number(ENV_MAX_RETRIES, &retries)?;
        }
        if let Some(timeout) = get(ENV_TIMEOUT_MS) {
            config.timeout = Duration::from_millis(parse_number(ENV_TIMEOUT_MS, &timeout)?);
        }
        if let Some(interval) = get(ENV_FLUSH_INTERVAL_MS) {
            config.flush_interval =
                Duration::from_millis(parse_number(ENV_FLUSH_INTERVAL_MS, &interval)?);
        }
        if let Some(size) = get(ENV_MAX_QUEUE_SIZE) {
            config.max_queue_size = parse_number(ENV_MAX_QUEUE_SIZE, &size)?;
        }
        if let Some(headers) = get(ENV_HEADERS) {
            config.headers = parse_headers(&headers);
        }

        config.validate()?;
        Ok(config.sanitized())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.webhook_url.trim().is_empty() {
            return Err(invalid("webhook_url is required"));
        }

        let url = reqwest::Url::parse(self.webhook_url.trim())
            .map_err(|e| invalid(format!("webhook_url must be a valid URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("webhook_url must be a valid HTTP/HTTPS URL"));
        }

        if self.license_id.trim().is_empty() {
            return Err(invalid("license_id is required and cannot be empty"));
        }

        if self.license_device.trim().is_empty() {
            return Err(invalid("license_device is required and cannot be empty"));
        }

        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(invalid(format!(
                "max_retries must be between 0 and {MAX_RETRIES_LIMIT}"
            )));
        }

        if self.timeout < MIN_TIMEOUT || self.timeout > MAX_TIMEOUT {
            return Err(invalid("timeout must be between 1s and 60s"));
        }

        if self.flush_interval < MIN_FLUSH_INTERVAL {
            return Err(invalid("flush_interval must be at least 100ms"));
        }

        if self.max_queue_size < 1 {
            return Err(invalid("max_queue_size must be at least 1"));
        }

        Ok(())
    }

    /// Returns a copy with identifiers and labels trimmed; labels that end up empty are dropped.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        Self {
            webhook_url: self.webhook_url.trim().to_string(),
            license_id: self.license_id.trim().to_string(),
            license_name: self.license_name.as_deref().and_then(non_empty),
            license_device: self.license_device.trim().to_string(),
            app: self.app.as_deref().and_then(non_empty),
            version: self.version.as_deref().and_then(non_empty),
            platform: self.platform.as_deref().and_then(non_empty),
            ..self.clone()
        }
    }
}

fn invalid(message: impl Into<String>) -> TrackerError {
    TrackerError::Configuration(message.into())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(format!("{key} must be a boolean, got {value:?}"))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| invalid(format!("{key} must be a non-negative integer, got {value:?}")))
}

/// Parses `key:value` pairs separated by commas. Malformed entries are skipped.
fn parse_headers(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once(':')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}
