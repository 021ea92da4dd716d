// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by the tracker client, its registry and its delivery pipeline.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{}", not_found_message(.0))]
    NotFound(Option<String>),

    /// One or more events of a batch exhausted their retries.
    #[error("{failed} of {total} events failed to deliver: {first}")]
    Delivery {
        failed: usize,
        total: usize,
        first: Box<TrackerError>,
    },

    #[error("Dispatch task failed: {0}")]
    Task(String),

    #[error("Client already stopped")]
    AlreadyStopped,

    #[error("No tokio runtime available to start the client")]
    NoRuntime,
}

/// Failures of a single POST attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to encode payload: {0}")]
    Encode(String),
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

fn not_found_message(name: &Option<String>) -> String {
    match name {
        Some(name) => format!("Tracker instance {name:?} not found"),
        None => "No default tracker initialized".to_string(),
    }
}
