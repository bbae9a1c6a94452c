//! Identities, endpoint descriptors and the engine-agnostic resource records.
//!
//! Records are plain data: the aggregation layer recomputes them on every
//! query from whichever engines are connected at that moment.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Stable identity of one registered engine: `<provider>.<connection>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(String);

impl EngineId {
    pub fn new(provider_id: &str, connection_name: &str) -> Self {
        Self(format!("{provider_id}.{connection_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Which API dialects an engine speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Docker-compatible API only.
    Compat,
    /// Docker-compatible API plus the richer native (Podman-style) API.
    Native,
}

impl EngineKind {
    pub fn has_native(self) -> bool {
        matches!(self, Self::Native)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compat => f.write_str("compat"),
            Self::Native => f.write_str("native"),
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "compat" | "docker" => Ok(Self::Compat),
            "native" | "podman" => Ok(Self::Native),
            other => Err(format!(
                "unknown engine kind {other:?} (expected \"compat\" or \"native\")"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Status reported by the external lifecycle collaborator for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Started,
    Starting,
    Stopped,
    Stopping,
    Unknown,
}

impl ConnectionStatus {
    pub fn is_started(self) -> bool {
        matches!(self, Self::Started)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Starting => "starting",
            Self::Stopped => "stopped",
            Self::Stopping => "stopping",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Status capability handed over at registration time.
pub trait EndpointStatus: Send + Sync {
    fn status(&self) -> ConnectionStatus;
}

impl<F> EndpointStatus for F
where
    F: Fn() -> ConnectionStatus + Send + Sync,
{
    fn status(&self) -> ConnectionStatus {
        self()
    }
}

/// Optional lifecycle hooks an endpoint's owner may expose.
#[async_trait]
pub trait EndpointLifecycle: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn delete(&self) -> Result<()>;
}

/// Immutable description of one engine endpoint.
///
/// Replaced, never mutated: re-registering the same identity installs a
/// fresh descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEndpoint {
    pub provider_id: String,
    pub connection_name: String,
    /// Socket/pipe path or URL (`unix:///run/podman/podman.sock`,
    /// `npipe:////./pipe/docker_engine`, `ssh://core@host/run/podman.sock`).
    pub address: String,
    pub kind: EngineKind,
}

impl EngineEndpoint {
    pub fn new(
        provider_id: impl Into<String>,
        connection_name: impl Into<String>,
        address: impl Into<String>,
        kind: EngineKind,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            connection_name: connection_name.into(),
            address: address.into(),
            kind,
        }
    }

    pub fn id(&self) -> EngineId {
        EngineId::new(&self.provider_id, &self.connection_name)
    }
}

/// Everything the lifecycle collaborator supplies when registering.
#[derive(Clone)]
pub struct Registration {
    pub endpoint: EngineEndpoint,
    pub status: Arc<dyn EndpointStatus>,
    pub lifecycle: Option<Arc<dyn EndpointLifecycle>>,
}

impl Registration {
    pub fn new(endpoint: EngineEndpoint, status: Arc<dyn EndpointStatus>) -> Self {
        Self {
            endpoint,
            status,
            lifecycle: None,
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn EndpointLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("endpoint", &self.endpoint)
            .field("status", &self.status.status())
            .field("lifecycle", &self.lifecycle.is_some())
            .finish()
    }
}

/// Public view of one registered connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSummary {
    pub engine_id: EngineId,
    pub endpoint: EngineEndpoint,
    pub status: ConnectionStatus,
    pub connected: bool,
}

// ---------------------------------------------------------------------------
// Resource records
// ---------------------------------------------------------------------------

/// Engine attribution carried by every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineTag {
    pub engine_id: EngineId,
    pub engine_name: String,
    pub engine_kind: EngineKind,
}

impl EngineTag {
    pub fn for_endpoint(endpoint: &EngineEndpoint) -> Self {
        Self {
            engine_id: endpoint.id(),
            engine_name: endpoint.connection_name.clone(),
            engine_kind: endpoint.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub private_port: u16,
    pub public_port: Option<u16>,
    pub protocol: String,
    pub host_ip: Option<String>,
}

/// Lightweight pod reference attached to containers that belong to one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodRef {
    pub id: String,
    pub name: String,
    pub status: String,
    pub engine_id: EngineId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub image_id: String,
    pub command: String,
    pub created: DateTime<Utc>,
    pub state: String,
    pub status: String,
    pub ports: Vec<PortInfo>,
    pub labels: HashMap<String, String>,
    pub pod: Option<PodRef>,
    #[serde(flatten)]
    pub engine: EngineTag,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }

    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).is_some_and(|v| v == value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimpleContainerInfo {
    pub id: String,
    pub names: Vec<String>,
    pub state: String,
    #[serde(flatten)]
    pub engine: EngineTag,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageInfo {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    pub created: DateTime<Utc>,
    pub size: i64,
    pub labels: HashMap<String, String>,
    pub is_manifest: bool,
    #[serde(flatten)]
    pub engine: EngineTag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodContainer {
    pub id: String,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodInfo {
    pub id: String,
    pub name: String,
    pub status: String,
    pub created: DateTime<Utc>,
    pub labels: HashMap<String, String>,
    pub containers: Vec<PodContainer>,
    #[serde(flatten)]
    pub engine: EngineTag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeUsage {
    pub size: i64,
    pub ref_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeInfo {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub created_at: Option<DateTime<Utc>>,
    pub labels: HashMap<String, String>,
    pub scope: String,
    pub usage: Option<VolumeUsage>,
    #[serde(flatten)]
    pub engine: EngineTag,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub scope: String,
    pub created: Option<DateTime<Utc>>,
    pub labels: HashMap<String, String>,
    #[serde(flatten)]
    pub engine: EngineTag,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineInfo {
    pub server_version: String,
    pub operating_system: String,
    pub architecture: String,
    pub cpus: i64,
    pub memory: i64,
    pub containers: i64,
    pub containers_running: i64,
    pub containers_paused: i64,
    pub containers_stopped: i64,
    pub images: i64,
    #[serde(flatten)]
    pub engine: EngineTag,
}

/// One decoded stats sample pushed to a stats consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsRecord {
    pub engine_id: EngineId,
    pub engine_name: String,
    pub stats: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Query options
// ---------------------------------------------------------------------------

/// Options shared by fan-out listings.
///
/// With `engine == None` every connected engine is queried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub engine: Option<EngineId>,
    pub all: bool,
    pub filters: HashMap<String, Vec<String>>,
    /// Query native engines through their compat API too.
    pub compat_only: bool,
}

impl ListOptions {
    pub fn for_engine(engine: EngineId) -> Self {
        Self {
            engine: Some(engine),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_id_joins_provider_and_connection() {
        let id = EngineId::new("podman", "podman-machine-default");
        assert_eq!(id.as_str(), "podman.podman-machine-default");
        assert_eq!(id.to_string(), "podman.podman-machine-default");
    }

    #[test]
    fn endpoint_id_matches_engine_id() {
        let ep = EngineEndpoint::new("docker", "default", "unix:///var/run/docker.sock", EngineKind::Compat);
        assert_eq!(ep.id(), EngineId::new("docker", "default"));
    }

    #[test]
    fn engine_kind_parses_aliases() {
        assert_eq!("podman".parse::<EngineKind>().unwrap(), EngineKind::Native);
        assert_eq!("compat".parse::<EngineKind>().unwrap(), EngineKind::Compat);
        assert!("lxc".parse::<EngineKind>().is_err());
    }

    #[test]
    fn closures_are_status_capabilities() {
        let status: Arc<dyn EndpointStatus> = Arc::new(|| ConnectionStatus::Started);
        assert!(status.status().is_started());
    }

    #[test]
    fn label_match_requires_exact_value() {
        let mut labels = HashMap::new();
        labels.insert("project".to_string(), "demo".to_string());
        let info = ContainerInfo {
            id: "c1".into(),
            names: vec!["/x".into()],
            image: "alpine".into(),
            image_id: "sha256:1".into(),
            command: "sh".into(),
            created: DateTime::<Utc>::UNIX_EPOCH,
            state: "Running".into(),
            status: "Up".into(),
            ports: vec![],
            labels,
            pod: None,
            engine: EngineTag {
                engine_id: EngineId::from("p.c"),
                engine_name: "c".into(),
                engine_kind: EngineKind::Compat,
            },
        };
        assert!(info.has_label("project", "demo"));
        assert!(!info.has_label("project", "other"));
        assert!(info.is_running());
    }
}
