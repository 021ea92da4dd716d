// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The tracker client: ingestion, periodic and size-triggered flushing, lifecycle.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──start()──> Active ──shutdown()──> ShuttingDown ──> Stopped
//! ```
//!
//! `enabled` is orthogonal to the lifecycle until shutdown: [`Client::pause`] and
//! [`Client::resume`] only decide whether new events are accepted, and stop having any effect
//! once shutdown begins. Events already queued are always flushed.
//!
//! # Flushing
//!
//! A flush extracts up to `max_queue_size` events and hands them to the
//! [`BatchDispatcher`]. Three paths can trigger one:
//! - the background loop, every `flush_interval`
//! - [`Client::record`], when the queue reaches `max_queue_size` (spawned, never blocks)
//! - [`Client::force_flush`] / [`Client::shutdown`], which drain the queue
//!
//! The `draining` flag lets at most one flush run at a time; a trigger that finds a flush in
//! progress does nothing.

use crate::config::ClientConfig;
use crate::dispatcher::BatchDispatcher;
use crate::error::{Result, TrackerError};
use crate::event::{self, ErrorInfo, Event, EventBuilder, EventLevel, Metadata};
use crate::queue::EventQueue;
use crate::transport::{HttpPoster, Poster, RetryingSender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const EVENT_ERROR_NAME: &str = "Event";
const PANIC_ERROR_NAME: &str = "Panic";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Constructed, background loop not running.
    Idle,
    /// Background loop running.
    Active,
    /// Stop signalled, final drain in progress.
    ShuttingDown,
    /// Terminal.
    Stopped,
}

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushOutcome {
    /// Another flush was in flight; nothing was done.
    Busy,
    /// Nothing was queued.
    Empty,
    /// A batch of this many events was dispatched successfully.
    Flushed(usize),
}

/// Handle to a tracker client. Cloning is cheap and all clones share the same queue.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    builder: EventBuilder,
    queue: EventQueue,
    dispatcher: BatchDispatcher,
    enabled: AtomicBool,
    draining: AtomicBool,
    panic_hook: AtomicBool,
    flush_done: Notify,
    lifecycle: Mutex<Lifecycle>,
    runtime: OnceLock<Handle>,
}

struct Lifecycle {
    state: ClientState,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("enabled", &self.is_enabled())
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl Client {
    /// Validates `config` and builds an idle client delivering over HTTP.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let config = config.sanitized();
        let poster = HttpPoster::new(config.webhook_url.clone(), config.timeout)?;
        Self::with_poster(config, Arc::new(poster))
    }

    /// Validates `config` and builds an idle client delivering through `poster`.
    pub fn with_poster(config: ClientConfig, poster: Arc<dyn Poster>) -> Result<Self> {
        config.validate()?;
        let config = config.sanitized();
        let sender = RetryingSender::new(&config, poster)?;
        Self::from_parts(config, sender)
    }

    /// Builds an idle client around an already assembled sender.
    pub fn from_parts(config: ClientConfig, sender: RetryingSender) -> Result<Self> {
        config.validate()?;
        let config = config.sanitized();
        let builder = EventBuilder::new(
            config.app.clone(),
            config.version.clone(),
            config.platform.clone(),
            Some(config.license_device.clone()),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                builder,
                queue: EventQueue::with_capacity(config.max_queue_size),
                dispatcher: BatchDispatcher::new(Arc::new(sender)),
                enabled: AtomicBool::new(config.enabled),
                draining: AtomicBool::new(false),
                panic_hook: AtomicBool::new(false),
                flush_done: Notify::new(),
                lifecycle: Mutex::new(Lifecycle {
                    state: ClientState::Idle,
                    cancel: CancellationToken::new(),
                    task: None,
                }),
                runtime: OnceLock::new(),
                config,
            }),
        })
    }

    /// Launches the periodic flush loop on the current tokio runtime.
    ///
    /// No-op while already active. A client cannot be restarted once shut down.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle();
        match lifecycle.state {
            ClientState::Active => return Ok(()),
            ClientState::ShuttingDown | ClientState::Stopped => {
                return Err(TrackerError::AlreadyStopped)
            }
            ClientState::Idle => {}
        }

        let runtime = Handle::try_current().map_err(|_| TrackerError::NoRuntime)?;
        let _ = self.inner.runtime.set(runtime.clone());

        lifecycle.task = Some(runtime.spawn(run_flush_loop(
            Arc::downgrade(&self.inner),
            lifecycle.cancel.clone(),
            self.inner.config.flush_interval,
        )));
        lifecycle.state = ClientState::Active;
        debug!(
            "CLIENT | Client started, flushing every {} ms",
            self.inner.config.flush_interval.as_millis()
        );
        Ok(())
    }

    /// Queues an event. Dropped silently while the client is paused.
    ///
    /// Reaching `max_queue_size` schedules a flush in the background.
    #[track_caller]
    pub fn record(
        &self,
        title: impl Into<String>,
        error: Option<ErrorInfo>,
        level: EventLevel,
        metadata: Option<Metadata>,
    ) {
        if !self.is_enabled() {
            return;
        }

        let event = self.inner.builder.build(title, error, level, metadata);
        self.inner.enqueue(event);
    }

    /// Reports an error value. The title is the error's message.
    #[track_caller]
    pub fn error<E>(&self, err: &E, level: EventLevel, metadata: Option<Metadata>)
    where
        E: std::error::Error + ?Sized,
    {
        if !self.is_enabled() {
            return;
        }
        let info = ErrorInfo::from_error(err);
        let title = if info.message.is_empty() {
            "Unknown error".to_string()
        } else {
            info.message.clone()
        };
        self.record(title, Some(info), level, metadata);
    }

    /// Reports a custom event.
    #[track_caller]
    pub fn event(&self, title: impl Into<String>, level: EventLevel, metadata: Option<Metadata>) {
        let title = title.into();
        let info = ErrorInfo::message(EVENT_ERROR_NAME, title.clone());
        self.record(title, Some(info), level, metadata);
    }

    /// Flushes until the queue is observed empty, waiting out any flush already in flight.
    ///
    /// Keeps draining after a failed batch and returns the first error. Events recorded
    /// concurrently may or may not be included.
    pub async fn force_flush(&self) -> Result<()> {
        let mut first_error = None;
        loop {
            let notified = self.inner.flush_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.inner.flush_batch().await {
                Ok(FlushOutcome::Empty) => break,
                Ok(FlushOutcome::Busy) => notified.await,
                Ok(FlushOutcome::Flushed(_)) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stops accepting new events.
    pub fn pause(&self) {
        self.set_enabled(false);
    }

    /// Accepts new events again. Ignored once shutdown has begun.
    pub fn resume(&self) {
        self.set_enabled(true);
    }

    // `enabled` only changes under the lifecycle lock so a shutdown cannot be undone
    fn set_enabled(&self, enabled: bool) {
        let lifecycle = self.inner.lifecycle();
        if matches!(
            lifecycle.state,
            ClientState::ShuttingDown | ClientState::Stopped
        ) {
            debug!("CLIENT | Client stopped, ignoring enabled={enabled}");
            return;
        }
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Disables ingestion, stops the background loop, waits for it and drains the queue.
    ///
    /// Returns the result of the final drain. Concurrent calls need external serialization.
    pub async fn shutdown(&self) -> Result<()> {
        let task = {
            let mut lifecycle = self.inner.lifecycle();
            if lifecycle.state != ClientState::Stopped {
                lifecycle.state = ClientState::ShuttingDown;
            }
            self.inner.enabled.store(false, Ordering::Release);
            lifecycle.cancel.cancel();
            lifecycle.task.take()
        };

        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("CLIENT | Flush loop ended abnormally: {e}");
            }
        }

        let result = self.force_flush().await;
        self.inner.lifecycle().state = ClientState::Stopped;
        debug!("CLIENT | Client stopped");
        result
    }

    /// Records panics as `FATAL` events before handing over to the previously installed hook.
    ///
    /// The event is queued like any other, so reaching `max_queue_size` schedules a flush.
    /// Installing twice for the same client is a no-op.
    pub fn install_panic_hook(&self) {
        if self.inner.panic_hook.swap(true, Ordering::AcqRel) {
            debug!("CLIENT | Panic hook already installed");
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(inner) = weak.upgrade() {
                if inner.enabled.load(Ordering::Acquire) {
                    let payload = info.payload();
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "Box<dyn Any>".to_string());
                    let culprit = info
                        .location()
                        .map_or_else(|| "Unknown".to_string(), event::culprit);

                    let mut metadata = Metadata::new();
                    metadata.insert("source".to_string(), "panic".to_string());
                    metadata.insert(
                        "thread".to_string(),
                        std::thread::current()
                            .name()
                            .unwrap_or("<unnamed>")
                            .to_string(),
                    );

                    let error = ErrorInfo {
                        name: PANIC_ERROR_NAME.to_string(),
                        message: message.clone(),
                        stack: event::capture_stack(),
                        extra: None,
                    };
                    let event = inner.builder.build_with_culprit(
                        culprit,
                        message,
                        Some(error),
                        EventLevel::Fatal,
                        Some(metadata),
                    );
                    inner.enqueue(event);
                }
            }
            previous(info);
        }));
    }

    pub fn state(&self) -> ClientState {
        self.inner.lifecycle().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == ClientState::Active
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Whether both handles refer to the same client.
    pub fn same_instance(&self, other: &Client) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The runtime captured by [`Client::start`], else the caller's runtime, if any.
    pub(crate) fn runtime(&self) -> Option<Handle> {
        self.inner.runtime()
    }

    #[cfg(test)]
    pub(crate) async fn flush_batch(&self) -> Result<FlushOutcome> {
        self.inner.flush_batch().await
    }
}

impl Inner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn runtime(&self) -> Option<Handle> {
        self.runtime
            .get()
            .cloned()
            .or_else(|| Handle::try_current().ok())
    }

    fn enqueue(self: &Arc<Self>, event: Event) {
        let len = self.queue.push(event);
        if len >= self.config.max_queue_size {
            self.trigger_flush();
        }
    }

    fn trigger_flush(self: &Arc<Self>) {
        if self.draining.load(Ordering::Acquire) {
            return;
        }
        let Some(runtime) = self.runtime() else {
            debug!("CLIENT | No runtime available, size-triggered flush deferred");
            return;
        };

        let inner = Arc::clone(self);
        runtime.spawn(async move {
            if let Err(e) = inner.flush_batch().await {
                error!("CLIENT | Size-triggered flush failed: {e}");
            }
        });
    }

    async fn flush_batch(&self) -> Result<FlushOutcome> {
        if self.draining.load(Ordering::Acquire) {
            return Ok(FlushOutcome::Busy);
        }
        if self.queue.is_empty() {
            return Ok(FlushOutcome::Empty);
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(FlushOutcome::Busy);
        }
        let _draining = DrainingGuard(self);

        let batch = self.queue.take_batch(self.config.max_queue_size);
        if batch.is_empty() {
            return Ok(FlushOutcome::Empty);
        }
        let count = batch.len();
        self.dispatcher.dispatch(batch).await?;
        Ok(FlushOutcome::Flushed(count))
    }
}

/// Clears `draining` and wakes waiting drains, also when the flush future is dropped.
struct DrainingGuard<'a>(&'a Inner);

impl Drop for DrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.draining.store(false, Ordering::Release);
        self.0.flush_done.notify_waiters();
    }
}

async fn run_flush_loop(inner: Weak<Inner>, cancel: CancellationToken, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // discard first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if let Err(e) = inner.flush_batch().await {
                    error!("CLIENT | Background flush failed: {e}");
                }
            }
        }
    }
    debug!("CLIENT | Flush loop stopped");
}
