//! Engine client adapter interface.
//!
//! Each engine is reached through two capability traits: [`CompatApi`]
//! (the Docker-compatible surface every engine offers) and [`NativeApi`]
//! (the richer Podman-style surface, only on native-capable engines). An
//! [`EngineHandle`] bundles the two for one endpoint; the registry never
//! probes for methods, it branches on `handle.native.is_some()`.
//!
//! # Architecture
//!
//! ```text
//! EngineRegistry
//!     |
//!     v
//! EngineConnector --connect(endpoint)--> EngineHandle
//!                                          |  compat: Arc<dyn CompatApi>
//!                                          |  native: Option<Arc<dyn NativeApi>>
//!                                          v
//!                          list_* / start_* / events() / attach / exec / stats
//! ```

pub mod cli;
pub mod demux;
pub mod wire;

#[cfg(unix)]
mod pty;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio::io::AsyncWrite;

use crate::auth::AuthConfig;
use crate::error::Result;
use crate::model::{EngineEndpoint, EngineId, EngineTag};

pub use cli::{CliConnector, CliEngineClient};

/// Raw bytes flowing out of an engine stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Decoded JSON objects flowing out of an engine stream.
pub type JsonStream = Pin<Box<dyn Stream<Item = Result<serde_json::Value>> + Send>>;

/// Writable side of an interactive stream.
pub type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// Listing filters in the engine's `key -> [values]` form.
pub type Filters = HashMap<String, Vec<String>>;

// ---------------------------------------------------------------------------
// Session and option types
// ---------------------------------------------------------------------------

/// Both halves of an attached container stream.
pub struct AttachIo {
    pub output: ByteStream,
    pub input: Option<InputSink>,
}

/// Options for creating an exec instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOptions {
    pub cmd: Vec<String>,
    pub tty: bool,
    pub attach_stdin: bool,
    pub env: Vec<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
}

/// A started exec instance.
///
/// Without a TTY, `output` carries stdout and stderr interleaved in the
/// engine's multiplexed frame format (see [`demux`]). With a TTY it is raw.
pub struct ExecSession {
    pub exec_id: String,
    pub output: ByteStream,
    pub input: Option<InputSink>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogsOptions {
    pub follow: bool,
    pub tail: Option<usize>,
    pub timestamps: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateContainerOptions {
    pub name: Option<String>,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Start the container right after creating it.
    pub start: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateVolumeOptions {
    pub name: Option<String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateNetworkOptions {
    pub name: String,
    pub driver: Option<String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatePodOptions {
    pub name: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestOptions {
    pub name: String,
    pub images: Vec<String>,
    /// Add every platform of each listed image, not just the native one.
    pub all: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub context_dir: PathBuf,
    pub containerfile: Option<String>,
    pub tag: Option<String>,
    pub platform: Option<String>,
    pub build_args: HashMap<String, String>,
}

/// Outcome of a prune call.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub space_reclaimed: u64,
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// The Docker-compatible API surface.
///
/// Streams are cancelled by dropping them; adapters must release the
/// underlying socket or process when that happens.
#[async_trait]
pub trait CompatApi: Send + Sync {
    async fn ping(&self) -> Result<()>;
    async fn info(&self) -> Result<wire::CompatInfo>;

    async fn list_containers(&self, all: bool, filters: &Filters) -> Result<Vec<wire::CompatContainer>>;
    async fn inspect_container(&self, id: &str) -> Result<serde_json::Value>;
    async fn create_container(&self, options: &CreateContainerOptions) -> Result<String>;
    async fn start_container(&self, id: &str) -> Result<()>;
    async fn stop_container(&self, id: &str) -> Result<()>;
    async fn restart_container(&self, id: &str) -> Result<()>;
    async fn kill_container(&self, id: &str, signal: Option<&str>) -> Result<()>;
    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;
    async fn prune_containers(&self) -> Result<PruneReport>;

    async fn list_images(&self, all: bool, filters: &Filters) -> Result<Vec<wire::CompatImage>>;
    async fn remove_image(&self, id: &str, force: bool) -> Result<()>;
    async fn prune_images(&self, all: bool) -> Result<PruneReport>;

    async fn list_volumes(&self) -> Result<Vec<wire::CompatVolume>>;
    async fn disk_usage(&self) -> Result<wire::DiskUsage>;
    async fn create_volume(&self, options: &CreateVolumeOptions) -> Result<String>;
    async fn remove_volume(&self, name: &str, force: bool) -> Result<()>;
    async fn prune_volumes(&self) -> Result<PruneReport>;

    async fn list_networks(&self) -> Result<Vec<wire::CompatNetwork>>;
    async fn create_network(&self, options: &CreateNetworkOptions) -> Result<String>;
    async fn remove_network(&self, id: &str) -> Result<()>;

    /// Raw event feed. Runs until the engine goes away; a transport failure
    /// surfaces as an `Err` item.
    fn events(&self) -> JsonStream;

    async fn attach(&self, id: &str) -> Result<AttachIo>;
    async fn logs(&self, id: &str, options: &LogsOptions) -> Result<ByteStream>;
    async fn exec(&self, id: &str, options: &ExecOptions) -> Result<ExecSession>;
    async fn exec_running(&self, exec_id: &str) -> Result<bool>;
    async fn resize_exec(&self, exec_id: &str, width: u16, height: u16) -> Result<()>;

    /// Continuous stats as newline-delimited JSON.
    async fn stats(&self, id: &str) -> Result<ByteStream>;

    async fn build_image(&self, options: &BuildOptions, auth: Option<AuthConfig>) -> Result<JsonStream>;
    async fn pull_image(&self, image: &str, auth: Option<AuthConfig>) -> Result<JsonStream>;
    async fn push_image(&self, image: &str, auth: Option<AuthConfig>) -> Result<ByteStream>;

    async fn save_images(&self, images: &[String], target: &Path) -> Result<()>;
    async fn load_images(&self, archive: &Path) -> Result<()>;
    async fn export_container(&self, id: &str, target: &Path) -> Result<()>;
    async fn import_container(&self, archive: &Path, reference: Option<&str>) -> Result<String>;
}

/// The native (Podman-style) API surface.
#[async_trait]
pub trait NativeApi: Send + Sync {
    async fn list_containers(&self, all: bool) -> Result<Vec<wire::NativeContainer>>;
    async fn list_pods(&self) -> Result<Vec<wire::NativePod>>;
    async fn list_images(&self, all: bool) -> Result<Vec<wire::NativeImage>>;

    async fn create_pod(&self, options: &CreatePodOptions) -> Result<String>;
    async fn start_pod(&self, id: &str) -> Result<()>;
    async fn stop_pod(&self, id: &str) -> Result<()>;
    async fn restart_pod(&self, id: &str) -> Result<()>;
    async fn remove_pod(&self, id: &str, force: bool) -> Result<()>;

    async fn create_manifest(&self, options: &ManifestOptions) -> Result<String>;

    async fn attach(&self, id: &str) -> Result<AttachIo>;
}

// Compile-time assertion: both traits must stay object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn CompatApi, _: &dyn NativeApi) {}
};

// ---------------------------------------------------------------------------
// Handle and connector
// ---------------------------------------------------------------------------

/// Live clients for one started endpoint.
///
/// The native client is only ever present alongside the compat client and
/// only for endpoints that advertise native capability.
#[derive(Clone)]
pub struct EngineHandle {
    pub endpoint: Arc<EngineEndpoint>,
    pub compat: Arc<dyn CompatApi>,
    pub native: Option<Arc<dyn NativeApi>>,
}

impl EngineHandle {
    pub fn new(
        endpoint: Arc<EngineEndpoint>,
        compat: Arc<dyn CompatApi>,
        native: Option<Arc<dyn NativeApi>>,
    ) -> Self {
        let native = if endpoint.kind.has_native() {
            native
        } else {
            if native.is_some() {
                tracing::warn!(
                    engine_id = %endpoint.id(),
                    "dropping native client for compat-only endpoint"
                );
            }
            None
        };
        Self {
            endpoint,
            compat,
            native,
        }
    }

    pub fn id(&self) -> EngineId {
        self.endpoint.id()
    }

    pub fn tag(&self) -> EngineTag {
        EngineTag::for_endpoint(&self.endpoint)
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("endpoint", &self.endpoint)
            .field("native", &self.native.is_some())
            .finish()
    }
}

/// Opens clients for an endpoint.
///
/// Connecting must not block: it binds clients to the endpoint address and
/// returns. Actual I/O happens on first use.
pub trait EngineConnector: Send + Sync {
    fn connect(&self, endpoint: Arc<EngineEndpoint>) -> Result<EngineHandle>;
}
