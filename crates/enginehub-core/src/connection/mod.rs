//! Connection lifecycle manager.
//!
//! [`EngineRegistry`] is the owner of record for every engine connection.
//! Each registered endpoint gets a background status poll; when the
//! endpoint reports `started` the registry opens an [`EngineHandle`] through
//! the [`EngineConnector`] and pipes its raw event feed into the event bus.
//! When the status drops, or the feed fails, the handle is released.
//!
//! Per-endpoint state machine:
//!
//! ```text
//! unregistered -> stopped -> started{connected} -> stopped -> ... -> unregistered
//!                               |        ^
//!                   feed error  v        | reconnect after delay
//!                          started{reconnecting}
//! ```
//!
//! The engine map sits behind a std mutex that is never held across an
//! `.await`. Work that suspends (the reconnect delay) re-validates the
//! registration and status after waking up before it acts.

mod poll;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthProvider, NoAuth};
use crate::config::RegistryConfig;
use crate::engine::{EngineConnector, EngineHandle};
use crate::error::{EngineError, Result};
use crate::events::{EventBus, RegistryNotification, TaggedEvent};
use crate::model::{
    ConnectionSummary, EndpointLifecycle, EndpointStatus, EngineEndpoint, EngineId, Registration,
};
use crate::streaming::StreamState;
use crate::telemetry::{NoopTelemetry, Telemetry, operation_properties};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The container engine registry. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EngineRegistry {
    pub(crate) inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    pub(crate) config: RegistryConfig,
    connector: Arc<dyn EngineConnector>,
    telemetry: Arc<dyn Telemetry>,
    pub(crate) auth: Arc<dyn AuthProvider>,
    pub(crate) bus: EventBus,
    engines: Mutex<HashMap<EngineId, EngineSlot>>,
    /// Source of registration and connection generations.
    generations: AtomicU64,
    pub(crate) streams: StreamState,
    /// Parent of every poll and feed token.
    shutdown: CancellationToken,
}

/// Registry-side state of one registered endpoint.
struct EngineSlot {
    endpoint: Arc<EngineEndpoint>,
    status: Arc<dyn EndpointStatus>,
    lifecycle: Option<Arc<dyn EndpointLifecycle>>,
    registration: u64,
    connection: Option<Connection>,
    /// Clients were released after a feed failure and a reconnect is pending.
    reconnecting: bool,
    poll_stop: CancellationToken,
    unmapped: Arc<AtomicU64>,
}

struct Connection {
    handle: EngineHandle,
    generation: u64,
    feed_cancel: CancellationToken,
}

/// Builds an [`EngineRegistry`].
pub struct RegistryBuilder {
    connector: Arc<dyn EngineConnector>,
    config: RegistryConfig,
    telemetry: Arc<dyn Telemetry>,
    auth: Arc<dyn AuthProvider>,
}

impl RegistryBuilder {
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = auth;
        self
    }

    pub fn build(self) -> EngineRegistry {
        let streams = StreamState::new(self.config.replay_buffer_chunks);
        EngineRegistry {
            inner: Arc::new(RegistryInner {
                config: self.config,
                connector: self.connector,
                telemetry: self.telemetry,
                auth: self.auth,
                bus: EventBus::new(),
                engines: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(1),
                streams,
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

impl EngineRegistry {
    pub fn builder(connector: Arc<dyn EngineConnector>) -> RegistryBuilder {
        RegistryBuilder {
            connector,
            config: RegistryConfig::default(),
            telemetry: Arc::new(NoopTelemetry),
            auth: Arc::new(NoAuth),
        }
    }

    /// Registry with default config, no telemetry and no credentials.
    pub fn new(connector: Arc<dyn EngineConnector>) -> Self {
        Self::builder(connector).build()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    // -- registration -------------------------------------------------------

    /// Add an endpoint and start watching its status.
    ///
    /// Clients are opened right away when the endpoint already reports
    /// `started`. Registering an identity that is already present replaces
    /// the old registration. Dropping (or disposing) the returned guard
    /// unregisters the endpoint. Must be called from within a tokio runtime.
    pub fn register(&self, registration: Registration) -> ConnectionGuard {
        let started = Instant::now();
        let Registration {
            endpoint,
            status,
            lifecycle,
        } = registration;
        let endpoint = Arc::new(endpoint);
        let engine_id = endpoint.id();
        let registration = self.inner.next_generation();
        let poll_stop = self.inner.shutdown.child_token();

        let slot = EngineSlot {
            endpoint: Arc::clone(&endpoint),
            status,
            lifecycle,
            registration,
            connection: None,
            reconnecting: false,
            poll_stop: poll_stop.clone(),
            unmapped: Arc::new(AtomicU64::new(0)),
        };

        let previous = self.inner.engines().insert(engine_id.clone(), slot);
        if let Some(previous) = previous {
            info!(engine_id = %engine_id, "replacing existing registration");
            self.inner.retire(&engine_id, previous);
        }

        info!(engine_id = %engine_id, address = %endpoint.address, kind = %endpoint.kind, "registered engine endpoint");
        self.inner.check_status(&engine_id, registration);
        poll::spawn_status_poll(
            Arc::downgrade(&self.inner),
            engine_id.clone(),
            registration,
            poll_stop,
            self.inner.config.status_poll_interval,
        );
        self.inner.track(
            "engine.register",
            started,
            None,
            json!({ "engine_id": engine_id, "kind": endpoint.kind }),
        );

        ConnectionGuard {
            registry: Arc::downgrade(&self.inner),
            engine_id,
            registration,
            disposed: false,
        }
    }

    /// Remove an endpoint by id regardless of which guard registered it.
    pub fn unregister(&self, engine_id: &EngineId) -> bool {
        let removed = self.inner.engines().remove(engine_id);
        match removed {
            Some(slot) => {
                info!(engine_id = %engine_id, "unregistered engine endpoint");
                self.inner.retire(engine_id, slot);
                true
            }
            None => false,
        }
    }

    /// Every registered endpoint with its reported status.
    pub fn connections(&self) -> Vec<ConnectionSummary> {
        let snapshot: Vec<_> = self
            .inner
            .engines()
            .iter()
            .map(|(id, slot)| {
                (
                    id.clone(),
                    Arc::clone(&slot.endpoint),
                    Arc::clone(&slot.status),
                    slot.connection.is_some(),
                )
            })
            .collect();

        let mut summaries: Vec<_> = snapshot
            .into_iter()
            .map(|(engine_id, endpoint, status, connected)| ConnectionSummary {
                engine_id,
                endpoint: (*endpoint).clone(),
                status: status.status(),
                connected,
            })
            .collect();
        summaries.sort_by(|a, b| a.engine_id.cmp(&b.engine_id));
        summaries
    }

    pub fn is_connected(&self, engine_id: &EngineId) -> bool {
        self.inner
            .engines()
            .get(engine_id)
            .is_some_and(|slot| slot.connection.is_some())
    }

    /// Raw events from `engine_id` that mapped to nothing, since registration.
    pub fn unmapped_events(&self, engine_id: &EngineId) -> Option<u64> {
        self.inner
            .engines()
            .get(engine_id)
            .map(|slot| slot.unmapped.load(Ordering::Relaxed))
    }

    // -- lifecycle forwarding -----------------------------------------------

    /// Ask the endpoint's owner to start it, then re-check its status.
    pub async fn start_connection(&self, engine_id: &EngineId) -> Result<()> {
        self.forward_lifecycle(engine_id, "connection.start", |l| async move { l.start().await })
            .await
    }

    /// Ask the endpoint's owner to stop it, then re-check its status.
    pub async fn stop_connection(&self, engine_id: &EngineId) -> Result<()> {
        self.forward_lifecycle(engine_id, "connection.stop", |l| async move { l.stop().await })
            .await
    }

    /// Ask the endpoint's owner to delete it. The registration stays until
    /// the owner unregisters it.
    pub async fn delete_connection(&self, engine_id: &EngineId) -> Result<()> {
        self.forward_lifecycle(engine_id, "connection.delete", |l| async move { l.delete().await })
            .await
    }

    async fn forward_lifecycle<F, Fut>(&self, engine_id: &EngineId, event: &str, call: F) -> Result<()>
    where
        F: FnOnce(Arc<dyn EndpointLifecycle>) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let started = Instant::now();
        let found = self
            .inner
            .engines()
            .get(engine_id)
            .map(|slot| (slot.lifecycle.clone(), slot.registration));
        let (lifecycle, registration) =
            found.ok_or_else(|| EngineError::NotFound(format!("connection {engine_id}")))?;
        let lifecycle = lifecycle.ok_or(EngineError::Unsupported("connection lifecycle"))?;

        let result = call(lifecycle).await;
        if result.is_ok() {
            self.inner.check_status(engine_id, registration);
        }
        self.inner.track(
            event,
            started,
            result.as_ref().err(),
            json!({ "engine_id": engine_id }),
        );
        result
    }

    // -- events -------------------------------------------------------------

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<TaggedEvent> {
        self.inner.bus.subscribe_events()
    }

    pub fn subscribe_notifications(&self) -> tokio::sync::broadcast::Receiver<RegistryNotification> {
        self.inner.bus.subscribe_notifications()
    }

    /// Stop every poll, feed and stream and forget all endpoints.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut drained: Vec<_> = self.inner.engines().drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        self.inner.streams.close_all();
        for (engine_id, slot) in drained {
            self.inner.retire(&engine_id, slot);
        }
        info!("engine registry shut down");
    }

    // -- crate-internal accessors --------------------------------------------

    /// The connected handle for `engine_id`.
    pub(crate) fn handle(&self, engine_id: &EngineId) -> Result<EngineHandle> {
        self.inner
            .engines()
            .get(engine_id)
            .and_then(|slot| slot.connection.as_ref())
            .map(|c| c.handle.clone())
            .ok_or_else(|| EngineError::no_engine(engine_id))
    }

    /// Handles to fan out over: the one requested, or every connected engine.
    pub(crate) fn handles(&self, engine: Option<&EngineId>) -> Result<Vec<EngineHandle>> {
        if let Some(engine_id) = engine {
            return self.handle(engine_id).map(|h| vec![h]);
        }
        let mut handles: Vec<_> = self
            .inner
            .engines()
            .values()
            .filter_map(|slot| slot.connection.as_ref().map(|c| c.handle.clone()))
            .collect();
        handles.sort_by_key(|h| h.id());
        Ok(handles)
    }

    pub(crate) fn track(&self, event: &str, started: Instant, error: Option<&EngineError>, extra: Value) {
        self.inner.track(event, started, error, extra);
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let engines: Vec<_> = self.inner.engines().keys().cloned().collect();
        f.debug_struct("EngineRegistry")
            .field("engines", &engines)
            .field("config", &self.inner.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Inner state transitions
// ---------------------------------------------------------------------------

impl RegistryInner {
    fn engines(&self) -> MutexGuard<'_, HashMap<EngineId, EngineSlot>> {
        self.engines.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn track(&self, event: &str, started: Instant, error: Option<&EngineError>, extra: Value) {
        let error = error.map(|e| e as &dyn std::fmt::Display);
        self.telemetry
            .track(event, operation_properties(started.elapsed(), error, extra));
    }

    /// Tear down a slot that has already been removed from the map.
    fn retire(&self, engine_id: &EngineId, slot: EngineSlot) {
        slot.poll_stop.cancel();
        if let Some(connection) = slot.connection {
            connection.feed_cancel.cancel();
            self.announce_disconnect(engine_id);
        }
    }

    fn announce_connect(&self, engine_id: &EngineId) {
        self.bus.notify(RegistryNotification::EngineConnected {
            engine_id: engine_id.clone(),
        });
        self.bus.notify(RegistryNotification::EnginesChanged);
    }

    fn announce_disconnect(&self, engine_id: &EngineId) {
        self.bus.notify(RegistryNotification::EngineDisconnected {
            engine_id: engine_id.clone(),
        });
        self.bus.notify(RegistryNotification::EnginesChanged);
    }

    /// Reconcile one endpoint's connection with its reported status.
    ///
    /// A no-op for endpoints that were removed or re-registered under a
    /// newer registration.
    pub(crate) fn check_status(self: &Arc<Self>, engine_id: &EngineId, registration: u64) {
        let Some(status_fn) = self.slot_status(engine_id, registration) else {
            return;
        };
        // Foreign code; never call it under the lock.
        let status = status_fn.status();

        let mut engines = self.engines();
        let Some(slot) = engines
            .get_mut(engine_id)
            .filter(|slot| slot.registration == registration)
        else {
            return;
        };

        if status.is_started() {
            if slot.connection.is_some() || slot.reconnecting {
                return;
            }
            let endpoint = Arc::clone(&slot.endpoint);
            drop(engines);
            if let Err(e) = self.open(engine_id, registration, endpoint, false) {
                warn!(engine_id = %engine_id, error = %e, "failed to open engine clients; will retry on next status check");
            }
        } else {
            slot.reconnecting = false;
            let Some(connection) = slot.connection.take() else {
                return;
            };
            drop(engines);
            connection.feed_cancel.cancel();
            info!(engine_id = %engine_id, status = %status, "engine no longer started; released clients");
            self.announce_disconnect(engine_id);
        }
    }

    fn slot_status(&self, engine_id: &EngineId, registration: u64) -> Option<Arc<dyn EndpointStatus>> {
        self.engines()
            .get(engine_id)
            .filter(|slot| slot.registration == registration)
            .map(|slot| Arc::clone(&slot.status))
    }

    /// Open clients for an endpoint and start its event feed.
    ///
    /// Connects with the engine map unlocked, then installs the handle only
    /// if the slot still belongs to `registration`, still has no connection
    /// and its reconnect flag still equals `reconnecting`. Otherwise the new
    /// clients are discarded.
    fn open(
        self: &Arc<Self>,
        engine_id: &EngineId,
        registration: u64,
        endpoint: Arc<EngineEndpoint>,
        reconnecting: bool,
    ) -> Result<()> {
        let started = Instant::now();
        // Foreign code; never call it under the lock.
        let handle = match self.connector.connect(endpoint) {
            Ok(handle) => handle,
            Err(e) => {
                self.track(
                    "engine.connect",
                    started,
                    Some(&e),
                    json!({ "engine_id": engine_id }),
                );
                return Err(e);
            }
        };

        let feed = handle.compat.events();
        let native = handle.native.is_some();
        let generation = self.next_generation();

        let (feed_cancel, unmapped) = {
            let mut engines = self.engines();
            let Some(slot) = engines.get_mut(engine_id).filter(|slot| {
                slot.registration == registration
                    && slot.connection.is_none()
                    && slot.reconnecting == reconnecting
            }) else {
                drop(engines);
                debug!(engine_id = %engine_id, "endpoint changed while connecting; discarding clients");
                return Ok(());
            };
            let feed_cancel = slot.poll_stop.child_token();
            slot.connection = Some(Connection {
                handle,
                generation,
                feed_cancel: feed_cancel.clone(),
            });
            slot.reconnecting = false;
            (feed_cancel, Arc::clone(&slot.unmapped))
        };

        let weak = Arc::downgrade(self);
        tokio::spawn(crate::events::run_feed(
            engine_id.clone(),
            feed,
            self.bus.clone(),
            unmapped,
            feed_cancel,
            move |failure| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_feed_failure(failure, registration, generation);
                }
            },
        ));

        info!(engine_id = %engine_id, native, "engine connected");
        self.track(
            "engine.connect",
            started,
            None,
            json!({ "engine_id": engine_id, "native": native }),
        );
        self.announce_connect(engine_id);
        Ok(())
    }

    /// Release the clients of a failed feed and schedule a reconnect.
    fn on_feed_failure(
        self: &Arc<Self>,
        failure: crate::events::FeedFailure,
        registration: u64,
        generation: u64,
    ) {
        let engine_id = failure.engine_id.clone();
        warn!(
            engine_id = %engine_id,
            error = %failure.error,
            elapsed_ms = failure.elapsed.as_millis() as u64,
            events_seen = failure.events_seen,
            "engine event feed failed; releasing clients"
        );
        self.telemetry.track(
            "engine.event-feed.failure",
            operation_properties(
                failure.elapsed,
                Some(&failure.error as &dyn std::fmt::Display),
                json!({ "engine_id": engine_id, "events_seen": failure.events_seen }),
            ),
        );

        let poll_stop = {
            let mut engines = self.engines();
            let Some(slot) = engines.get_mut(&engine_id).filter(|slot| {
                slot.registration == registration
                    && slot.connection.as_ref().is_some_and(|c| c.generation == generation)
            }) else {
                debug!(engine_id = %engine_id, "stale feed failure ignored");
                return;
            };
            slot.connection = None;
            slot.reconnecting = true;
            slot.poll_stop.clone()
        };

        self.announce_disconnect(&engine_id);
        poll::spawn_reconnect(
            Arc::downgrade(self),
            engine_id,
            registration,
            poll_stop,
            self.config.reconnect_delay,
        );
    }

    /// Reconnect after the delay, if the endpoint is still registered under
    /// the same registration and still started.
    ///
    /// Returns `true` when another attempt should be scheduled.
    fn try_reconnect(self: &Arc<Self>, engine_id: &EngineId, registration: u64) -> bool {
        let Some(status_fn) = self.slot_status(engine_id, registration) else {
            debug!(engine_id = %engine_id, "endpoint gone; abandoning reconnect");
            return false;
        };
        let status = status_fn.status();

        let mut engines = self.engines();
        let Some(slot) = engines
            .get_mut(engine_id)
            .filter(|slot| slot.registration == registration && slot.reconnecting)
        else {
            return false;
        };
        if !status.is_started() {
            debug!(engine_id = %engine_id, status = %status, "endpoint no longer started; abandoning reconnect");
            slot.reconnecting = false;
            return false;
        }

        let endpoint = Arc::clone(&slot.endpoint);
        drop(engines);

        info!(engine_id = %engine_id, "reconnecting engine");
        match self.open(engine_id, registration, endpoint, true) {
            Ok(()) => false,
            Err(e) => {
                warn!(engine_id = %engine_id, error = %e, "reconnect failed; retrying after delay");
                true
            }
        }
    }

    fn unregister_registration(&self, engine_id: &EngineId, registration: u64) {
        let removed = {
            let mut engines = self.engines();
            match engines.get(engine_id) {
                Some(slot) if slot.registration == registration => engines.remove(engine_id),
                _ => None,
            }
        };
        if let Some(slot) = removed {
            info!(engine_id = %engine_id, "unregistered engine endpoint");
            self.retire(engine_id, slot);
        }
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Keeps an endpoint registered. Dropping it unregisters the endpoint,
/// unless the identity has since been re-registered by someone else.
#[must_use = "dropping the guard unregisters the endpoint"]
pub struct ConnectionGuard {
    registry: Weak<RegistryInner>,
    engine_id: EngineId,
    registration: u64,
    disposed: bool,
}

impl ConnectionGuard {
    pub fn engine_id(&self) -> &EngineId {
        &self.engine_id
    }

    /// Unregister now.
    pub fn dispose(mut self) {
        self.release();
    }

    /// Keep the endpoint registered for the registry's lifetime.
    pub fn forget(mut self) {
        self.disposed = true;
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.disposed, true) {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            inner.unregister_registration(&self.engine_id, self.registration);
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("engine_id", &self.engine_id)
            .field("registration", &self.registration)
            .finish()
    }
}
