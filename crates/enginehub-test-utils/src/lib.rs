//! Shared test utilities for enginehub integration tests.
//!
//! Provides an in-memory engine that implements both API traits, a
//! connector that hands those engines out by address, a settable endpoint
//! status and a telemetry sink that records everything it is given.
//!
//! Every engine stream the fake returns is backed by a channel the test
//! holds the other end of, so tests decide exactly when data arrives, when
//! a stream fails and when it ends.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use enginehub_core::auth::AuthConfig;
use enginehub_core::engine::wire::{
    CompatContainer, CompatImage, CompatInfo, CompatNetwork, CompatVolume, DiskUsage,
    NativeContainer, NativeImage, NativePod, NativePodContainer,
};
use enginehub_core::engine::{
    AttachIo, BuildOptions, ByteStream, CompatApi, CreateContainerOptions, CreateNetworkOptions,
    CreatePodOptions, CreateVolumeOptions, EngineConnector, EngineHandle, ExecOptions, ExecSession,
    Filters, JsonStream, LogsOptions, ManifestOptions, NativeApi, PruneReport,
};
use enginehub_core::{
    ConnectionStatus, EndpointStatus, EngineEndpoint, EngineError, EngineKind, Registration,
    Result, Telemetry,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// The error every injected failure produces.
pub fn injected(op: &str) -> EngineError {
    EngineError::Api {
        status: 500,
        message: format!("injected failure: {op}"),
    }
}

// ===========================================================================
// Fake engine
// ===========================================================================

#[derive(Default)]
struct FakeState {
    info: CompatInfo,
    containers: Vec<CompatContainer>,
    native_containers: Vec<NativeContainer>,
    pods: Vec<NativePod>,
    images: Vec<CompatImage>,
    native_images: Vec<NativeImage>,
    volumes: Vec<CompatVolume>,
    disk_usage: DiskUsage,
    networks: Vec<CompatNetwork>,

    /// Operation names (or `op:id`) that fail when called.
    failing: HashSet<String>,
    calls: Vec<String>,

    feeds: Vec<mpsc::UnboundedSender<Result<Value>>>,
    feeds_opened: usize,
    attach_sources: HashMap<String, mpsc::UnboundedReceiver<Result<Vec<u8>>>>,
    attach_hangs: bool,
    stats_sources: HashMap<String, mpsc::UnboundedReceiver<Result<Vec<u8>>>>,

    exec_output: Vec<Vec<u8>>,
    exec_stream_stays_open: bool,
    exec_running: bool,
    resize_status: Option<u16>,

    logs: Vec<Vec<u8>>,
    build_progress: Vec<Value>,
    pull_progress: Vec<Value>,
    push_output: Vec<Vec<u8>>,
    transfer_stays_open: bool,
    last_auth: Option<AuthConfig>,
    created: usize,
}

/// An in-memory engine speaking both API dialects.
///
/// Whether the native half is exposed is decided by the endpoint kind the
/// engine is registered under (see [`FakeConnector`]).
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        lock(&self.state)
    }

    /// Record a call and fail it if `op` or `op:id` was marked failing.
    fn call(&self, op: &str, id: Option<&str>) -> Result<()> {
        let mut state = self.state();
        let key = match id {
            Some(id) => format!("{op}:{id}"),
            None => op.to_string(),
        };
        state.calls.push(key.clone());
        if state.failing.contains(op) || state.failing.contains(&key) {
            return Err(injected(&key));
        }
        Ok(())
    }

    // -- setup ----------------------------------------------------------------

    pub fn set_info(&self, info: CompatInfo) {
        self.state().info = info;
    }

    pub fn add_container(&self, container: CompatContainer) {
        self.state().containers.push(container);
    }

    pub fn add_native_container(&self, container: NativeContainer) {
        self.state().native_containers.push(container);
    }

    pub fn add_pod(&self, pod: NativePod) {
        self.state().pods.push(pod);
    }

    pub fn add_image(&self, image: CompatImage) {
        self.state().images.push(image);
    }

    pub fn add_native_image(&self, image: NativeImage) {
        self.state().native_images.push(image);
    }

    pub fn add_volume(&self, volume: CompatVolume) {
        self.state().volumes.push(volume);
    }

    pub fn set_disk_usage(&self, usage: DiskUsage) {
        self.state().disk_usage = usage;
    }

    pub fn add_network(&self, network: CompatNetwork) {
        self.state().networks.push(network);
    }

    /// Make `op` fail. `op` is a method name (`list_containers`,
    /// `native.list_pods`) or `method:id` to fail a single target.
    pub fn fail(&self, op: &str) {
        self.state().failing.insert(op.to_string());
    }

    pub fn heal(&self, op: &str) {
        self.state().failing.remove(op);
    }

    // -- inspection -----------------------------------------------------------

    /// Every call made so far, as `method` or `method:id`.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of calls whose record starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// State of the compat container `id`, if it exists.
    pub fn container_state(&self, id: &str) -> Option<String> {
        self.state()
            .containers
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.state.clone())
    }

    pub fn last_auth(&self) -> Option<AuthConfig> {
        self.state().last_auth.clone()
    }

    // -- event feed ----------------------------------------------------------

    /// Push a raw event to every open feed.
    pub fn emit(&self, event: Value) {
        self.state()
            .feeds
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    /// Fail every open feed with a transport error.
    pub fn fail_feeds(&self, message: &str) {
        let feeds = std::mem::take(&mut self.state().feeds);
        for tx in feeds {
            let _ = tx.send(Err(EngineError::Io(std::io::Error::other(message.to_string()))));
        }
    }

    /// End every open feed without an error.
    pub fn end_feeds(&self) {
        self.state().feeds.clear();
    }

    /// Number of times the event feed was opened.
    pub fn feeds_opened(&self) -> usize {
        self.state().feeds_opened
    }

    /// Number of feeds still open on the engine side.
    pub fn open_feeds(&self) -> usize {
        let mut state = self.state();
        state.feeds.retain(|tx| !tx.is_closed());
        state.feeds.len()
    }

    // -- streams ---------------------------------------------------------------

    /// Prepare the output of the next attach to `container_id`.
    pub fn attach_source(&self, container_id: &str) -> mpsc::UnboundedSender<Result<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().attach_sources.insert(container_id.to_string(), rx);
        tx
    }

    /// Prepare the output of the next stats stream for `container_id`.
    pub fn stats_source(&self, container_id: &str) -> mpsc::UnboundedSender<Result<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().stats_sources.insert(container_id.to_string(), rx);
        tx
    }

    /// Raw (multiplexed) output chunks every exec produces.
    pub fn set_exec_output(&self, chunks: Vec<Vec<u8>>) {
        self.state().exec_output = chunks;
    }

    /// Keep the exec stream open after its output; only the running-state
    /// check can then end the exec.
    pub fn set_exec_stream_stays_open(&self, open: bool) {
        self.state().exec_stream_stays_open = open;
    }

    pub fn set_exec_running(&self, running: bool) {
        self.state().exec_running = running;
    }

    /// Make resize answer with an API error carrying `status`.
    pub fn set_resize_status(&self, status: Option<u16>) {
        self.state().resize_status = status;
    }

    pub fn set_logs(&self, chunks: Vec<Vec<u8>>) {
        self.state().logs = chunks;
    }

    pub fn set_build_progress(&self, progress: Vec<Value>) {
        self.state().build_progress = progress;
    }

    pub fn set_pull_progress(&self, progress: Vec<Value>) {
        self.state().pull_progress = progress;
    }

    pub fn set_push_output(&self, chunks: Vec<Vec<u8>>) {
        self.state().push_output = chunks;
    }

    /// Keep build, pull and push streams open after their prepared output.
    pub fn set_transfer_stays_open(&self, open: bool) {
        self.state().transfer_stays_open = open;
    }

    /// Make attach (both dialects) never return.
    pub fn set_attach_hangs(&self, hangs: bool) {
        self.state().attach_hangs = hangs;
    }

    async fn open_attach(&self, op: &str, id: &str) -> Result<AttachIo> {
        self.call(op, Some(id))?;
        let hangs = self.state().attach_hangs;
        if hangs {
            futures::future::pending::<()>().await;
        }
        let output = Self::take_source(&mut self.state().attach_sources, id)?;
        Ok(AttachIo {
            output,
            input: Some(Box::pin(tokio::io::sink())),
        })
    }

    fn take_source(
        sources: &mut HashMap<String, mpsc::UnboundedReceiver<Result<Vec<u8>>>>,
        id: &str,
    ) -> Result<ByteStream> {
        let rx = sources
            .remove(id)
            .ok_or_else(|| EngineError::NotFound(format!("container {id}")))?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    fn set_container_state(&self, id: &str, state: &str) {
        if let Some(c) = self.state().containers.iter_mut().find(|c| c.id == id) {
            c.state = state.to_string();
        }
    }
}

fn byte_stream(chunks: Vec<Vec<u8>>) -> ByteStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

fn json_stream(values: Vec<Value>) -> JsonStream {
    Box::pin(futures::stream::iter(values.into_iter().map(Ok)))
}

fn open_tail<S>(stream: S, stays_open: bool) -> futures::stream::BoxStream<'static, S::Item>
where
    S: futures::Stream + Send + 'static,
    S::Item: Send,
{
    if stays_open {
        stream.chain(futures::stream::pending()).boxed()
    } else {
        stream.boxed()
    }
}

#[async_trait]
impl CompatApi for FakeEngine {
    async fn ping(&self) -> Result<()> {
        self.call("ping", None)
    }

    async fn info(&self) -> Result<CompatInfo> {
        self.call("info", None)?;
        Ok(self.state().info.clone())
    }

    async fn list_containers(&self, all: bool, filters: &Filters) -> Result<Vec<CompatContainer>> {
        self.call("list_containers", None)?;
        let labels = filters.get("label").cloned().unwrap_or_default();
        Ok(self
            .state()
            .containers
            .iter()
            .filter(|c| all || c.state == "running")
            .filter(|c| {
                labels.iter().all(|f| {
                    let have = c.labels.clone().unwrap_or_default();
                    match f.split_once('=') {
                        Some((k, v)) => have.get(k).is_some_and(|x| x == v),
                        None => have.contains_key(f),
                    }
                })
            })
            .cloned()
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<Value> {
        self.call("inspect_container", Some(id))?;
        let state = self.state();
        let container = state
            .containers
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("container {id}")))?;
        Ok(serde_json::to_value(container)?)
    }

    async fn create_container(&self, options: &CreateContainerOptions) -> Result<String> {
        self.call("create_container", Some(&options.image))?;
        let mut state = self.state();
        state.created += 1;
        let id = format!("created-{}", state.created);
        state.containers.push(CompatContainer {
            id: id.clone(),
            names: options.name.iter().map(|n| format!("/{n}")).collect(),
            image: options.image.clone(),
            state: "created".to_string(),
            labels: Some(options.labels.clone()),
            ..CompatContainer::default()
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.call("start_container", Some(id))?;
        self.set_container_state(id, "running");
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        self.call("stop_container", Some(id))?;
        self.set_container_state(id, "exited");
        Ok(())
    }

    async fn restart_container(&self, id: &str) -> Result<()> {
        self.call("restart_container", Some(id))?;
        self.set_container_state(id, "running");
        Ok(())
    }

    async fn kill_container(&self, id: &str, _signal: Option<&str>) -> Result<()> {
        self.call("kill_container", Some(id))?;
        self.set_container_state(id, "exited");
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<()> {
        self.call("remove_container", Some(id))?;
        self.state().containers.retain(|c| c.id != id);
        Ok(())
    }

    async fn prune_containers(&self) -> Result<PruneReport> {
        self.call("prune_containers", None)?;
        let mut state = self.state();
        let (stopped, kept): (Vec<_>, Vec<_>) = state
            .containers
            .drain(..)
            .partition(|c| c.state == "exited");
        state.containers = kept;
        Ok(PruneReport {
            deleted: stopped.into_iter().map(|c| c.id).collect(),
            space_reclaimed: 0,
        })
    }

    async fn list_images(&self, _all: bool, _filters: &Filters) -> Result<Vec<CompatImage>> {
        self.call("list_images", None)?;
        Ok(self.state().images.clone())
    }

    async fn remove_image(&self, id: &str, _force: bool) -> Result<()> {
        self.call("remove_image", Some(id))
    }

    async fn prune_images(&self, _all: bool) -> Result<PruneReport> {
        self.call("prune_images", None)?;
        Ok(PruneReport::default())
    }

    async fn list_volumes(&self) -> Result<Vec<CompatVolume>> {
        self.call("list_volumes", None)?;
        Ok(self.state().volumes.clone())
    }

    async fn disk_usage(&self) -> Result<DiskUsage> {
        self.call("disk_usage", None)?;
        Ok(self.state().disk_usage.clone())
    }

    async fn create_volume(&self, options: &CreateVolumeOptions) -> Result<String> {
        let name = options.name.clone().unwrap_or_else(|| "anonymous".to_string());
        self.call("create_volume", Some(&name))?;
        Ok(name)
    }

    async fn remove_volume(&self, name: &str, _force: bool) -> Result<()> {
        self.call("remove_volume", Some(name))
    }

    async fn prune_volumes(&self) -> Result<PruneReport> {
        self.call("prune_volumes", None)?;
        Ok(PruneReport::default())
    }

    async fn list_networks(&self) -> Result<Vec<CompatNetwork>> {
        self.call("list_networks", None)?;
        Ok(self.state().networks.clone())
    }

    async fn create_network(&self, options: &CreateNetworkOptions) -> Result<String> {
        self.call("create_network", Some(&options.name))?;
        Ok(format!("net-{}", options.name))
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.call("remove_network", Some(id))
    }

    fn events(&self) -> JsonStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        state.calls.push("events".to_string());
        state.feeds_opened += 1;
        if state.failing.contains("events") {
            let _ = tx.send(Err(injected("events")));
        } else {
            state.feeds.push(tx);
        }
        Box::pin(UnboundedReceiverStream::new(rx))
    }

    async fn attach(&self, id: &str) -> Result<AttachIo> {
        self.open_attach("attach", id).await
    }

    async fn logs(&self, id: &str, _options: &LogsOptions) -> Result<ByteStream> {
        self.call("logs", Some(id))?;
        Ok(byte_stream(self.state().logs.clone()))
    }

    async fn exec(&self, id: &str, _options: &ExecOptions) -> Result<ExecSession> {
        self.call("exec", Some(id))?;
        let state = self.state();
        let output = futures::stream::iter(state.exec_output.clone().into_iter().map(Ok));
        let output: ByteStream = if state.exec_stream_stays_open {
            Box::pin(output.chain(futures::stream::pending()))
        } else {
            Box::pin(output)
        };
        Ok(ExecSession {
            exec_id: format!("exec-{id}"),
            output,
            input: Some(Box::pin(tokio::io::sink())),
        })
    }

    async fn exec_running(&self, exec_id: &str) -> Result<bool> {
        self.call("exec_running", Some(exec_id))?;
        Ok(self.state().exec_running)
    }

    async fn resize_exec(&self, exec_id: &str, _width: u16, _height: u16) -> Result<()> {
        self.call("resize_exec", Some(exec_id))?;
        match self.state().resize_status {
            Some(status) => Err(EngineError::Api {
                status,
                message: "resized".to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn stats(&self, id: &str) -> Result<ByteStream> {
        self.call("stats", Some(id))?;
        Self::take_source(&mut self.state().stats_sources, id)
    }

    async fn build_image(&self, _options: &BuildOptions, auth: Option<AuthConfig>) -> Result<JsonStream> {
        self.call("build_image", None)?;
        let mut state = self.state();
        state.last_auth = auth;
        Ok(open_tail(json_stream(state.build_progress.clone()), state.transfer_stays_open))
    }

    async fn pull_image(&self, image: &str, auth: Option<AuthConfig>) -> Result<JsonStream> {
        self.call("pull_image", Some(image))?;
        let mut state = self.state();
        state.last_auth = auth;
        Ok(open_tail(json_stream(state.pull_progress.clone()), state.transfer_stays_open))
    }

    async fn push_image(&self, image: &str, auth: Option<AuthConfig>) -> Result<ByteStream> {
        self.call("push_image", Some(image))?;
        let mut state = self.state();
        state.last_auth = auth;
        Ok(open_tail(byte_stream(state.push_output.clone()), state.transfer_stays_open))
    }

    async fn save_images(&self, images: &[String], _target: &Path) -> Result<()> {
        self.call("save_images", Some(&images.join(",")))
    }

    async fn load_images(&self, _archive: &Path) -> Result<()> {
        self.call("load_images", None)
    }

    async fn export_container(&self, id: &str, _target: &Path) -> Result<()> {
        self.call("export_container", Some(id))
    }

    async fn import_container(&self, _archive: &Path, reference: Option<&str>) -> Result<String> {
        self.call("import_container", reference)?;
        Ok("sha256:imported".to_string())
    }
}

#[async_trait]
impl NativeApi for FakeEngine {
    async fn list_containers(&self, all: bool) -> Result<Vec<NativeContainer>> {
        self.call("native.list_containers", None)?;
        Ok(self
            .state()
            .native_containers
            .iter()
            .filter(|c| all || c.state == "running")
            .cloned()
            .collect())
    }

    async fn list_pods(&self) -> Result<Vec<NativePod>> {
        self.call("native.list_pods", None)?;
        Ok(self.state().pods.clone())
    }

    async fn list_images(&self, _all: bool) -> Result<Vec<NativeImage>> {
        self.call("native.list_images", None)?;
        Ok(self.state().native_images.clone())
    }

    async fn create_pod(&self, options: &CreatePodOptions) -> Result<String> {
        self.call("native.create_pod", Some(&options.name))?;
        Ok(format!("pod-{}", options.name))
    }

    async fn start_pod(&self, id: &str) -> Result<()> {
        self.call("native.start_pod", Some(id))
    }

    async fn stop_pod(&self, id: &str) -> Result<()> {
        self.call("native.stop_pod", Some(id))
    }

    async fn restart_pod(&self, id: &str) -> Result<()> {
        self.call("native.restart_pod", Some(id))
    }

    async fn remove_pod(&self, id: &str, _force: bool) -> Result<()> {
        self.call("native.remove_pod", Some(id))
    }

    async fn create_manifest(&self, options: &ManifestOptions) -> Result<String> {
        self.call("native.create_manifest", Some(&options.name))?;
        Ok(format!("manifest-{}", options.name))
    }

    async fn attach(&self, id: &str) -> Result<AttachIo> {
        self.open_attach("native.attach", id).await
    }
}

// ===========================================================================
// Connector
// ===========================================================================

/// Hands out [`FakeEngine`]s by endpoint address.
#[derive(Default)]
pub struct FakeConnector {
    engines: Mutex<HashMap<String, Arc<FakeEngine>>>,
    connects: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    total: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `engine` for endpoints at `address`.
    pub fn insert(&self, address: &str, engine: Arc<FakeEngine>) {
        lock(&self.engines).insert(address.to_string(), engine);
    }

    /// Refuse connections to `address`.
    pub fn fail(&self, address: &str) {
        lock(&self.failing).insert(address.to_string());
    }

    /// Connections opened to `address`.
    pub fn connects(&self, address: &str) -> usize {
        lock(&self.connects).get(address).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl EngineConnector for FakeConnector {
    fn connect(&self, endpoint: Arc<EngineEndpoint>) -> Result<EngineHandle> {
        let address = endpoint.address.clone();
        if lock(&self.failing).contains(&address) {
            return Err(injected("connect"));
        }
        let engine = lock(&self.engines)
            .get(&address)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("engine at {address}")))?;
        *lock(&self.connects).entry(address).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        let native: Option<Arc<dyn NativeApi>> = Some(engine.clone());
        Ok(EngineHandle::new(endpoint, engine, native))
    }
}

// ===========================================================================
// Status and telemetry
// ===========================================================================

/// An endpoint status the test flips by hand.
#[derive(Debug)]
pub struct SettableStatus {
    status: Mutex<ConnectionStatus>,
}

impl SettableStatus {
    pub fn new(status: ConnectionStatus) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
        })
    }

    pub fn set(&self, status: ConnectionStatus) {
        *lock(&self.status) = status;
    }
}

impl EndpointStatus for SettableStatus {
    fn status(&self) -> ConnectionStatus {
        *lock(&self.status)
    }
}

/// Telemetry sink that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        lock(&self.events).clone()
    }

    /// Properties of every event called `name`.
    pub fn named(&self, name: &str) -> Vec<Value> {
        lock(&self.events)
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, props)| props.clone())
            .collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn track(&self, event: &str, properties: Value) {
        lock(&self.events).push((event.to_string(), properties));
    }
}

// ===========================================================================
// Builders
// ===========================================================================

/// A registration whose status is controlled through the returned handle.
pub fn registration(
    provider: &str,
    name: &str,
    address: &str,
    kind: EngineKind,
    status: ConnectionStatus,
) -> (Registration, Arc<SettableStatus>) {
    let settable = SettableStatus::new(status);
    let registration = Registration::new(
        EngineEndpoint::new(provider, name, address, kind),
        settable.clone(),
    );
    (registration, settable)
}

pub fn compat_container(id: &str, name: &str, state: &str, labels: &[(&str, &str)]) -> CompatContainer {
    CompatContainer {
        id: id.to_string(),
        names: vec![format!("/{name}")],
        image: "docker.io/library/alpine:latest".to_string(),
        state: state.to_string(),
        status: state.to_string(),
        labels: Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..CompatContainer::default()
    }
}

pub fn native_container(id: &str, name: &str, state: &str) -> NativeContainer {
    NativeContainer {
        id: id.to_string(),
        names: vec![name.to_string()],
        image: "quay.io/podman/hello:latest".to_string(),
        state: state.to_string(),
        status: state.to_string(),
        ..NativeContainer::default()
    }
}

pub fn native_pod(id: &str, name: &str, members: &[&str]) -> NativePod {
    NativePod {
        id: id.to_string(),
        name: name.to_string(),
        status: "Running".to_string(),
        containers: members
            .iter()
            .map(|m| NativePodContainer {
                id: m.to_string(),
                names: format!("{name}-{m}"),
                status: "running".to_string(),
            })
            .collect(),
        ..NativePod::default()
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
