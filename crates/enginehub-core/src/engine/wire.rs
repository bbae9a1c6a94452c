//! Wire shapes of the two engine API dialects.
//!
//! Compat types follow the Docker Engine API (PascalCase); native types
//! follow the Podman libpod API. Every field is defaulted so that older or
//! newer engines missing a field still decode.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A timestamp the engines send either as unix seconds or as RFC 3339 text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Unix(i64),
    Text(String),
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::Unix(0)
    }
}

impl Timestamp {
    /// Normalize to UTC. Unparsable text maps to the unix epoch.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            Self::Unix(secs) => DateTime::from_timestamp(*secs, 0).unwrap_or(DateTime::UNIX_EPOCH),
            Self::Text(text) => parse_time(text).unwrap_or(DateTime::UNIX_EPOCH),
        }
    }
}

/// Parse the timestamp formats engines emit: RFC 3339 and the Go default
/// `2006-01-02 15:04:05 -0700 MST` layout used by CLI output.
pub fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    // Drop the trailing zone abbreviation ("UTC", "CEST") if present.
    let without_abbrev = match text.rsplit_once(' ') {
        Some((head, tail)) if tail.chars().all(|c| c.is_ascii_alphabetic()) => head,
        _ => text,
    };
    DateTime::parse_from_str(without_abbrev, "%Y-%m-%d %H:%M:%S%.f %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Compat (Docker Engine API)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompatPort {
    #[serde(rename = "IP")]
    pub ip: Option<String>,
    pub private_port: u16,
    pub public_port: Option<u16>,
    #[serde(rename = "Type")]
    pub port_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompatContainer {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    #[serde(rename = "ImageID")]
    pub image_id: String,
    pub command: String,
    pub created: i64,
    pub state: String,
    pub status: String,
    pub ports: Vec<CompatPort>,
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompatImage {
    pub id: String,
    pub repo_tags: Option<Vec<String>>,
    pub repo_digests: Option<Vec<String>>,
    pub created: i64,
    pub size: i64,
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompatVolume {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub created_at: Option<String>,
    pub labels: Option<HashMap<String, String>>,
    pub scope: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UsageData {
    pub size: i64,
    pub ref_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeUsageEntry {
    pub name: String,
    pub usage_data: Option<UsageData>,
}

/// Subset of `GET /system/df` the registry needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiskUsage {
    pub volumes: Vec<VolumeUsageEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompatNetwork {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub scope: String,
    pub created: Option<String>,
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompatInfo {
    pub server_version: String,
    pub operating_system: String,
    pub architecture: String,
    #[serde(rename = "NCPU")]
    pub ncpu: i64,
    pub mem_total: i64,
    pub containers: i64,
    pub containers_running: i64,
    pub containers_paused: i64,
    pub containers_stopped: i64,
    pub images: i64,
}

// ---------------------------------------------------------------------------
// Native (libpod API)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativePort {
    pub host_ip: String,
    pub container_port: u16,
    pub host_port: u16,
    pub range: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NativeContainer {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    #[serde(rename = "ImageID")]
    pub image_id: String,
    pub command: Option<Vec<String>>,
    pub created: Timestamp,
    pub state: String,
    pub status: String,
    pub ports: Option<Vec<NativePort>>,
    pub labels: Option<HashMap<String, String>>,
    pub pod: String,
    pub pod_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NativePodContainer {
    pub id: String,
    pub names: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NativePod {
    pub id: String,
    pub name: String,
    pub status: String,
    pub created: Timestamp,
    pub labels: Option<HashMap<String, String>>,
    pub containers: Vec<NativePodContainer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NativeImage {
    pub id: String,
    pub repo_tags: Option<Vec<String>>,
    pub repo_digests: Option<Vec<String>>,
    pub created: Timestamp,
    pub size: i64,
    pub labels: Option<HashMap<String, String>>,
    pub is_manifest_list: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compat_container_decodes_api_shape() {
        let json = r#"{
            "Id": "c1", "Names": ["/web"], "Image": "nginx", "ImageID": "sha256:abc",
            "Command": "nginx -g 'daemon off;'", "Created": 1700000000,
            "State": "running", "Status": "Up 2 minutes",
            "Ports": [{"IP": "0.0.0.0", "PrivatePort": 80, "PublicPort": 8080, "Type": "tcp"}],
            "Labels": {"project": "demo"}
        }"#;
        let c: CompatContainer = serde_json::from_str(json).unwrap();
        assert_eq!(c.id, "c1");
        assert_eq!(c.image_id, "sha256:abc");
        assert_eq!(c.ports[0].public_port, Some(8080));
        assert_eq!(c.ports[0].port_type, "tcp");
        assert_eq!(c.labels.unwrap()["project"], "demo");
    }

    #[test]
    fn compat_container_tolerates_missing_fields() {
        let c: CompatContainer = serde_json::from_str(r#"{"Id":"c2","Labels":null}"#).unwrap();
        assert_eq!(c.id, "c2");
        assert!(c.names.is_empty());
        assert!(c.labels.is_none());
    }

    #[test]
    fn native_container_accepts_both_timestamp_forms() {
        let text: NativeContainer =
            serde_json::from_str(r#"{"Id":"a","Created":"2024-03-01T10:00:00Z"}"#).unwrap();
        let unix: NativeContainer = serde_json::from_str(r#"{"Id":"b","Created":1709287200}"#).unwrap();
        assert_eq!(text.created.to_utc(), unix.created.to_utc());
    }

    #[test]
    fn native_pod_decodes_members() {
        let json = r#"{"Id":"p1","Name":"demo","Status":"Running",
            "Containers":[{"Id":"c1","Names":"demo-infra","Status":"running"}]}"#;
        let pod: NativePod = serde_json::from_str(json).unwrap();
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(pod.containers[0].names, "demo-infra");
    }

    #[test]
    fn parse_time_handles_go_layout() {
        let dt = parse_time("2024-03-01 10:00:00 +0000 UTC").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        let dt = parse_time("2024-03-01 12:00:00.123 +0200 CEST").unwrap();
        assert_eq!(dt.timestamp(), 1709287200);
    }

    #[test]
    fn parse_time_rejects_garbage() {
        assert!(parse_time("").is_none());
        assert!(parse_time("yesterday").is_none());
        assert_eq!(Timestamp::Text("nope".into()).to_utc(), DateTime::<Utc>::UNIX_EPOCH);
    }
}
