// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Name to client mapping with one unnamed default instance.
//!
//! The registry is a plain value: applications that want a process-wide one hold it in a
//! `static` (`LazyLock<InstanceRegistry>`) or pass it around themselves.

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::{Result, TrackerError};
use crate::event::{EventLevel, Metadata};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, warn};

#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: RwLock<Instances>,
}

#[derive(Debug, Default)]
struct Instances {
    default: Option<Client>,
    named: HashMap<String, Client>,
}

impl Instances {
    fn get(&self, name: Option<&str>) -> Option<&Client> {
        match name {
            Some(name) => self.named.get(name),
            None => self.default.as_ref(),
        }
    }

    fn len(&self) -> usize {
        self.named.len() + usize::from(self.default.is_some())
    }
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and starts an HTTP client, then registers it.
    pub fn create(&self, config: ClientConfig, name: Option<&str>) -> Result<Client> {
        let client = Client::new(config)?;
        self.register(client, name)
    }

    /// Starts `client` and stores it under `name`, or as the default when unnamed.
    ///
    /// An unnamed client never replaces an existing default; it is still started and returned.
    /// A named client replaces any other holder of that name, which is shut down in the
    /// background. Registering a client again under its own name changes nothing.
    pub fn register(&self, client: Client, name: Option<&str>) -> Result<Client> {
        client.start()?;

        let mut instances = self.write();
        match name {
            Some(name) => {
                if let Some(previous) = instances.named.insert(name.to_string(), client.clone()) {
                    if !previous.same_instance(&client) {
                        warn!("REGISTRY | Replacing tracker instance {name:?}");
                        retire(previous);
                    }
                }
            }
            None if instances
                .default
                .as_ref()
                .is_some_and(|default| default.same_instance(&client)) => {}
            None if instances.default.is_some() => {
                warn!("REGISTRY | Default tracker already initialized, keeping the existing one");
            }
            None => instances.default = Some(client.clone()),
        }
        Ok(client)
    }

    pub fn get(&self, name: Option<&str>) -> Result<Client> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(name.map(str::to_string)))
    }

    pub fn has(&self, name: Option<&str>) -> bool {
        self.read().get(name).is_some()
    }

    /// Shuts down every instance and empties the registry.
    ///
    /// All instances are attempted; the first error is returned.
    pub async fn shutdown_all(&self) -> Result<()> {
        let instances = std::mem::take(&mut *self.write());
        debug!("REGISTRY | Shutting down {} tracker instances", instances.len());

        let mut first_error = None;
        for (name, client) in instances
            .default
            .into_iter()
            .map(|c| (None, c))
            .chain(instances.named.into_iter().map(|(n, c)| (Some(n), c)))
        {
            if let Err(e) = client.shutdown().await {
                error!("REGISTRY | Failed to shut down tracker {name:?}: {e}");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reports an error through the default instance.
    #[track_caller]
    pub fn error<E>(&self, err: &E, level: EventLevel, metadata: Option<Metadata>) -> Result<()>
    where
        E: std::error::Error + ?Sized,
    {
        self.get(None)?.error(err, level, metadata);
        Ok(())
    }

    /// Reports a custom event through the default instance.
    #[track_caller]
    pub fn event(
        &self,
        title: impl Into<String>,
        level: EventLevel,
        metadata: Option<Metadata>,
    ) -> Result<()> {
        self.get(None)?.event(title, level, metadata);
        Ok(())
    }

    pub async fn flush(&self) -> Result<()> {
        self.get(None)?.force_flush().await
    }

    pub fn pause(&self) -> Result<()> {
        self.get(None)?.pause();
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.get(None)?.resume();
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, Instances> {
        self.instances.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Instances> {
        self.instances.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shuts a replaced client down on its own runtime, or the caller's if it never started one.
fn retire(client: Client) {
    let Some(runtime) = client.runtime() else {
        warn!("REGISTRY | No runtime available to shut down replaced instance");
        return;
    };
    runtime.spawn(async move {
        if let Err(e) = client.shutdown().await {
            error!("REGISTRY | Replaced instance failed to shut down: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientState;
    use crate::testing::RecordingPoster;
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn config() -> ClientConfig {
        ClientConfig {
            max_retries: 0,
            flush_interval: Duration::from_secs(60),
            ..ClientConfig::new("https://collector.example.com/events", "license", "device")
        }
    }

    fn client(poster: &Arc<RecordingPoster>) -> Client {
        Client::with_poster(config(), poster.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_create_shutdown_recreate() {
        let registry = InstanceRegistry::new();
        let poster = RecordingPoster::new(200);

        registry.register(client(&poster), None).unwrap();
        registry.register(client(&poster), Some("x")).unwrap();
        assert!(registry.has(None));
        assert!(registry.has(Some("x")));

        registry.shutdown_all().await.unwrap();
        assert!(!registry.has(None));
        assert!(!registry.has(Some("x")));

        registry.register(client(&poster), Some("y")).unwrap();
        assert!(registry.has(Some("y")));
        assert!(!registry.has(None));
        registry.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_builds_http_client() {
        let registry = InstanceRegistry::new();
        let client = registry.create(config(), Some("http")).unwrap();
        assert!(client.is_active());
        assert!(registry.get(Some("http")).unwrap().is_active());
        registry.shutdown_all().await.unwrap();
        assert_eq!(client.state(), ClientState::Stopped);
    }

    #[test]
    fn test_create_rejects_invalid_config() {
        let registry = InstanceRegistry::new();
        let config = ClientConfig {
            max_queue_size: 0,
            ..config()
        };
        assert!(matches!(
            registry.create(config, None),
            Err(TrackerError::Configuration(_))
        ));
        assert!(!registry.has(None));
    }

    #[test]
    fn test_register_outside_runtime_stores_nothing() {
        let registry = InstanceRegistry::new();
        let poster = RecordingPoster::new(200);
        assert!(matches!(
            registry.register(client(&poster), Some("x")),
            Err(TrackerError::NoRuntime)
        ));
        assert!(!registry.has(Some("x")));
    }

    #[test]
    fn test_get_missing() {
        let registry = InstanceRegistry::new();
        assert!(matches!(registry.get(None), Err(TrackerError::NotFound(None))));
        match registry.get(Some("billing")) {
            Err(TrackerError::NotFound(Some(name))) => assert_eq!(name, "billing"),
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_second_default_keeps_first() {
        let registry = InstanceRegistry::new();
        let first_poster = RecordingPoster::new(200);
        let second_poster = RecordingPoster::new(200);

        registry.register(client(&first_poster), None).unwrap();
        let second = registry.register(client(&second_poster), None).unwrap();
        assert!(second.is_active());
        assert!(logs_contain("Default tracker already initialized"));

        registry
            .event("goes to first", EventLevel::Info, None)
            .unwrap();
        registry.flush().await.unwrap();
        assert_eq!(first_poster.calls(), 1);
        assert_eq!(second_poster.calls(), 0);

        second.shutdown().await.unwrap();
        registry.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_default_helpers_without_default() {
        let registry = InstanceRegistry::new();
        assert!(matches!(
            registry.event("nowhere", EventLevel::Info, None),
            Err(TrackerError::NotFound(None))
        ));
        assert!(matches!(
            registry.error(&std::fmt::Error, EventLevel::Error, None),
            Err(TrackerError::NotFound(None))
        ));
        assert!(matches!(registry.flush().await, Err(TrackerError::NotFound(None))));
        assert!(matches!(registry.pause(), Err(TrackerError::NotFound(None))));
        assert!(matches!(registry.resume(), Err(TrackerError::NotFound(None))));
    }

    #[tokio::test]
    async fn test_default_helpers_reach_default() {
        let registry = InstanceRegistry::new();
        let poster = RecordingPoster::new(200);
        let default = registry.register(client(&poster), None).unwrap();

        registry.pause().unwrap();
        registry.event("dropped", EventLevel::Info, None).unwrap();
        assert_eq!(default.queue_len(), 0);

        registry.resume().unwrap();
        registry
            .error(&std::fmt::Error, EventLevel::Error, None)
            .unwrap();
        assert_eq!(default.queue_len(), 1);

        registry.flush().await.unwrap();
        assert_eq!(poster.calls(), 1);
        assert_eq!(poster.bodies().len(), 1);
        registry.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_all_attempts_every_instance() {
        let registry = InstanceRegistry::new();
        let failing = RecordingPoster::new(500);
        let healthy = RecordingPoster::new(200);

        let a = registry.register(client(&failing), Some("a")).unwrap();
        let b = registry.register(client(&healthy), Some("b")).unwrap();
        a.event("lost", EventLevel::Error, None);
        b.event("kept", EventLevel::Error, None);

        let result = registry.shutdown_all().await;
        assert!(matches!(result, Err(TrackerError::Delivery { .. })));
        assert_eq!(healthy.calls(), 1);
        assert_eq!(a.state(), ClientState::Stopped);
        assert_eq!(b.state(), ClientState::Stopped);
        assert!(!registry.has(Some("a")));
        assert!(!registry.has(Some("b")));
    }

    #[tokio::test]
    async fn test_reregister_same_client_keeps_it_running() {
        let registry = InstanceRegistry::new();
        let poster = RecordingPoster::new(200);
        let client = client(&poster);

        registry.register(client.clone(), Some("x")).unwrap();
        registry.register(client.clone(), Some("x")).unwrap();
        registry.register(client.clone(), None).unwrap();
        registry.register(client.clone(), None).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stored = registry.get(Some("x")).unwrap();
        assert!(stored.same_instance(&client));
        assert_eq!(stored.state(), ClientState::Active);
        assert!(stored.is_enabled());
        stored.event("still delivered", EventLevel::Info, None);
        assert_eq!(stored.queue_len(), 1);

        registry.shutdown_all().await.unwrap();
        assert_eq!(poster.calls(), 1);
    }

    #[test]
    fn test_replacement_outside_runtime_uses_client_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let registry = InstanceRegistry::new();
        let poster = RecordingPoster::new(200);
        let old = client(&poster);
        let new = client(&poster);
        runtime.block_on(async {
            registry.register(old.clone(), Some("x")).unwrap();
            new.start().unwrap();
        });

        // already active, so no runtime is needed on this thread
        registry.register(new.clone(), Some("x")).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while old.state() != ClientState::Stopped {
            assert!(std::time::Instant::now() < deadline, "replaced client never stopped");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(registry.get(Some("x")).unwrap().same_instance(&new));
        runtime.block_on(registry.shutdown_all()).unwrap();
    }

    #[tokio::test]
    async fn test_named_replacement_stops_previous() {
        let registry = InstanceRegistry::new();
        let poster = RecordingPoster::new(200);
        let old = registry.register(client(&poster), Some("x")).unwrap();
        let new = registry.register(client(&poster), Some("x")).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while old.state() != ClientState::Stopped {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(new.is_active());
        registry.shutdown_all().await.unwrap();
    }
}
