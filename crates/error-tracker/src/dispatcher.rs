// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::compression::compress_and_encode;
use crate::error::{Result, TrackerError};
use crate::event::{Event, EventBuilder};
use crate::transport::RetryingSender;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Delivers a batch of events, one concurrent task per event.
///
/// Failed events are not re-queued: once extracted from the queue an event gets exactly one
/// pass through the sender's retry schedule.
#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    sender: Arc<RetryingSender>,
}

impl BatchDispatcher {
    pub fn new(sender: Arc<RetryingSender>) -> Self {
        Self { sender }
    }

    /// Returns once every event has been delivered or has exhausted its retries.
    pub async fn dispatch(&self, batch: Vec<Event>) -> Result<()> {
        let total = batch.len();
        if total == 0 {
            return Ok(());
        }
        debug!("DISPATCHER | Dispatching batch of {total} events");

        let mut set = JoinSet::new();
        for event in batch {
            let sender = Arc::clone(&self.sender);
            set.spawn(async move { Self::dispatch_event(&sender, &event).await });
        }

        let mut failed = 0;
        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(TrackerError::Task(e.to_string())),
            };
            if let Err(e) = outcome {
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => {
                debug!("DISPATCHER | Successfully dispatched {total} events");
                Ok(())
            }
            Some(first) => {
                error!("DISPATCHER | {failed} of {total} events failed to deliver: {first}");
                Err(TrackerError::Delivery {
                    failed,
                    total,
                    first: Box::new(first),
                })
            }
        }
    }

    async fn dispatch_event(sender: &RetryingSender, event: &Event) -> Result<()> {
        let json = EventBuilder::serialize(event)?;
        let encoded = compress_and_encode(&json)?;
        sender.send(&encoded).await?;
        Ok(())
    }
}
