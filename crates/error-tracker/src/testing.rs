// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::TransportError;
use crate::transport::{PostResponse, Poster};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Answers every request with a fixed status, optionally holding requests until opened.
pub(crate) struct RecordingPoster {
    status: AtomicU16,
    calls: AtomicUsize,
    waiting: AtomicUsize,
    bodies: Mutex<Vec<Vec<u8>>>,
    gate: Option<watch::Sender<bool>>,
}

impl RecordingPoster {
    pub(crate) fn new(status: u16) -> Arc<Self> {
        Arc::new(Self::build(status, None))
    }

    /// Requests block until [`RecordingPoster::open_gate`] is called.
    pub(crate) fn gated(status: u16) -> Arc<Self> {
        let (gate, _) = watch::channel(false);
        Arc::new(Self::build(status, Some(gate)))
    }

    fn build(status: u16, gate: Option<watch::Sender<bool>>) -> Self {
        Self {
            status: AtomicU16::new(status),
            calls: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
            gate,
        }
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.send_replace(true);
        }
    }

    /// Completed requests.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests currently held at the gate.
    pub(crate) fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub(crate) fn bodies(&self) -> Vec<Vec<u8>> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Poster for RecordingPoster {
    async fn post(
        &self,
        body: Vec<u8>,
        _headers: &HeaderMap,
    ) -> Result<PostResponse, TransportError> {
        if let Some(gate) = &self.gate {
            let mut open = gate.subscribe();
            self.waiting.fetch_add(1, Ordering::SeqCst);
            let _ = open.wait_for(|open| *open).await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }

        self.bodies.lock().unwrap().push(body);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PostResponse {
            status: self.status.load(Ordering::SeqCst),
            body: String::new(),
        })
    }
}
