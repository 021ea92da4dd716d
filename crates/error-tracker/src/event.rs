// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event model and construction.
//!
//! An [`Event`] is the unit queued by the client and delivered to the collector. Its JSON
//! shape is the pre-compression wire format:
//!
//! ```text
//! { event_id, title, level,
//!   event:   { name, message, stack?, extra? },
//!   context: { culprit, extra?, platform?, app?, version?, device?, tags? },
//!   timestamp }
//! ```

use crate::error::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::str::FromStr;

/// Free-form key/value metadata attached to an event.
pub type Metadata = HashMap<String, String>;

const UNKNOWN_ERROR_NAME: &str = "UnknownError";
const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

/// Severity of an event. Ordering is by severity and only matters for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Debug => "DEBUG",
            EventLevel::Info => "INFO",
            EventLevel::Warning => "WARNING",
            EventLevel::Error => "ERROR",
            EventLevel::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(EventLevel::Debug),
            "INFO" => Ok(EventLevel::Info),
            "WARNING" | "WARN" => Ok(EventLevel::Warning),
            "ERROR" => Ok(EventLevel::Error),
            "FATAL" => Ok(EventLevel::Fatal),
            other => Err(format!("unknown event level: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub culprit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// One reported error or custom event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub title: String,
    pub level: EventLevel,
    pub event: SerializedError,
    pub context: EventContext,
    /// RFC3339, UTC
    pub timestamp: String,
}

/// Error details captured at the reporting site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub extra: Option<Metadata>,
}

impl ErrorInfo {
    /// Captures the type name, message, source chain and (when enabled through
    /// `RUST_BACKTRACE`) a backtrace of `err`.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut causes = Metadata::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.insert(format!("caused_by.{}", causes.len()), cause.to_string());
            source = cause.source();
        }

        Self {
            name: short_type_name(std::any::type_name::<E>()),
            message: err.to_string(),
            stack: capture_stack(),
            extra: (!causes.is_empty()).then_some(causes),
        }
    }

    /// Details for a plain message with no underlying error value.
    pub fn message(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            extra: None,
        }
    }
}

/// Builds [`Event`]s stamped with the client's static labels.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    app: Option<String>,
    version: Option<String>,
    platform: String,
    device: String,
}

impl EventBuilder {
    pub fn new(
        app: Option<String>,
        version: Option<String>,
        platform: Option<String>,
        device: Option<String>,
    ) -> Self {
        let platform = platform.unwrap_or_else(|| std::env::consts::OS.to_string());
        let device = device
            .filter(|d| !d.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            app,
            version,
            platform,
            device,
        }
    }

    /// Builds an event whose culprit is the caller's source location.
    #[track_caller]
    pub fn build(
        &self,
        title: impl Into<String>,
        error: Option<ErrorInfo>,
        level: EventLevel,
        extra: Option<Metadata>,
    ) -> Event {
        let culprit = culprit(Location::caller());
        self.build_with_culprit(culprit, title, error, level, extra)
    }

    pub fn build_with_culprit(
        &self,
        culprit: String,
        title: impl Into<String>,
        error: Option<ErrorInfo>,
        level: EventLevel,
        extra: Option<Metadata>,
    ) -> Event {
        let mut tags = Vec::new();
        let event = match error {
            Some(info) => {
                tags.push(format!("error:{}", info.name));
                SerializedError {
                    name: info.name,
                    message: info.message,
                    stack: info.stack,
                    extra: info.extra,
                }
            }
            None => SerializedError {
                name: UNKNOWN_ERROR_NAME.to_string(),
                message: UNKNOWN_ERROR_MESSAGE.to_string(),
                stack: None,
                extra: None,
            },
        };

        Event {
            event_id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            level,
            event,
            context: EventContext {
                culprit,
                extra: extra.filter(|e| !e.is_empty()),
                platform: Some(self.platform.clone()),
                app: self.app.clone(),
                version: self.version.clone(),
                device: Some(self.device.clone()),
                tags,
            },
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }

    /// Serializes an event to its JSON wire form.
    pub fn serialize(event: &Event) -> Result<String> {
        serde_json::to_string(event).map_err(|e| TrackerError::Serialization(e.to_string()))
    }
}

pub(crate) fn culprit(location: &Location<'_>) -> String {
    format!("{}:{}", location.file(), location.line())
}

pub(crate) fn capture_stack() -> Option<String> {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

/// `std::io::error::Error` -> `Error`, `my::Wrapper<my::Inner>` -> `Wrapper<my::Inner>`.
fn short_type_name(full: &str) -> String {
    let (path, generics) = match full.find('<') {
        Some(idx) => full.split_at(idx),
        None => (full, ""),
    };
    let base = path.rsplit("::").next().unwrap_or(path);
    format!("{base}{generics}")
}
