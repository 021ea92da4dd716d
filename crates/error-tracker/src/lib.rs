// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Error Tracker
//!
//! In-process error and event reporting. Events are queued in memory and delivered in batches
//! to an HTTP collector, one POST per event with exponential-backoff retries.
//!
//! ## Architecture
//!
//! - [`queue`]: FIFO buffer shared by the ingestion and flush paths
//! - [`dispatcher`]: concurrent per-event delivery of an extracted batch
//! - [`transport`]: payload framing, headers and the retry loop around a [`Poster`]
//! - [`client`]: ingestion API, periodic and size-triggered flushing, lifecycle
//! - [`registry`]: named instances plus one default, with coordinated shutdown
//!
//! ## Usage
//!
//! ```rust,no_run
//! use error_tracker::{ClientConfig, EventLevel, InstanceRegistry};
//!
//! # async fn run() -> error_tracker::Result<()> {
//! let registry = InstanceRegistry::new();
//! let config = ClientConfig::new("https://collector.example.com/events", "license", "device");
//! registry.create(config, None)?;
//!
//! registry.event("user signed up", EventLevel::Info, None)?;
//! registry.shutdown_all().await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(unused_extern_crates)]
#![deny(unused_assignments)]

pub mod client;
pub mod compression;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod logger;
pub mod queue;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Client, ClientState};
pub use config::ClientConfig;
pub use error::{Result, TrackerError, TransportError};
pub use event::{ErrorInfo, Event, EventLevel, Metadata};
pub use registry::InstanceRegistry;
pub use transport::{HttpPoster, Poster, RetryPolicy, RetryingSender};
