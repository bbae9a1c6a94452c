//! Wire shape -> record translation.
//!
//! Every function here is pure. Timestamps become `DateTime<Utc>`, ports
//! become [`PortInfo`], labels are copied verbatim and a native command
//! array is reduced to its first element.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::engine::wire::{
    self, CompatContainer, CompatImage, CompatInfo, CompatNetwork, CompatPort, CompatVolume,
    NativeContainer, NativeImage, NativePod, NativePort,
};
use crate::model::{
    ContainerInfo, EngineInfo, EngineTag, ImageInfo, NetworkInfo, PodContainer, PodInfo, PodRef,
    PortInfo, SimpleContainerInfo, VolumeInfo, VolumeUsage,
};

fn unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

fn optional_time(text: Option<&str>) -> Option<DateTime<Utc>> {
    text.and_then(wire::parse_time)
}

fn compat_port(port: &CompatPort) -> PortInfo {
    PortInfo {
        private_port: port.private_port,
        public_port: port.public_port.filter(|p| *p != 0),
        protocol: port.port_type.clone(),
        host_ip: port.ip.clone().filter(|ip| !ip.is_empty()),
    }
}

fn native_port(port: &NativePort) -> PortInfo {
    PortInfo {
        private_port: port.container_port,
        public_port: (port.host_port != 0).then_some(port.host_port),
        protocol: if port.protocol.is_empty() {
            "tcp".to_string()
        } else {
            port.protocol.clone()
        },
        host_ip: (!port.host_ip.is_empty()).then(|| port.host_ip.clone()),
    }
}

pub fn container_from_compat(c: CompatContainer, engine: &EngineTag) -> ContainerInfo {
    ContainerInfo {
        ports: c.ports.iter().map(compat_port).collect(),
        created: unix(c.created),
        id: c.id,
        names: c.names,
        image: c.image,
        image_id: c.image_id,
        command: c.command,
        state: c.state,
        status: c.status,
        labels: c.labels.unwrap_or_default(),
        pod: None,
        engine: engine.clone(),
    }
}

/// Native containers name themselves without the leading slash the compat
/// API uses; it is added so both shapes present names the same way.
pub fn container_from_native(c: NativeContainer, engine: &EngineTag) -> ContainerInfo {
    ContainerInfo {
        ports: c.ports.as_deref().unwrap_or_default().iter().map(native_port).collect(),
        created: c.created.to_utc(),
        command: c
            .command
            .as_ref()
            .and_then(|cmd| cmd.first())
            .cloned()
            .unwrap_or_default(),
        names: c
            .names
            .into_iter()
            .map(|n| if n.starts_with('/') { n } else { format!("/{n}") })
            .collect(),
        id: c.id,
        image: c.image,
        image_id: c.image_id,
        state: c.state,
        status: c.status,
        labels: c.labels.unwrap_or_default(),
        pod: None,
        engine: engine.clone(),
    }
}

pub fn simple_container(c: &ContainerInfo) -> SimpleContainerInfo {
    SimpleContainerInfo {
        id: c.id.clone(),
        names: c.names.clone(),
        state: c.state.clone(),
        engine: c.engine.clone(),
    }
}

pub fn image_from_compat(i: CompatImage, engine: &EngineTag) -> ImageInfo {
    ImageInfo {
        created: unix(i.created),
        id: i.id,
        repo_tags: i.repo_tags.unwrap_or_default(),
        repo_digests: i.repo_digests.unwrap_or_default(),
        size: i.size,
        labels: i.labels.unwrap_or_default(),
        is_manifest: false,
        engine: engine.clone(),
    }
}

pub fn image_from_native(i: NativeImage, engine: &EngineTag) -> ImageInfo {
    ImageInfo {
        created: i.created.to_utc(),
        id: i.id,
        repo_tags: i.repo_tags.unwrap_or_default(),
        repo_digests: i.repo_digests.unwrap_or_default(),
        size: i.size,
        labels: i.labels.unwrap_or_default(),
        is_manifest: i.is_manifest_list.unwrap_or(false),
        engine: engine.clone(),
    }
}

pub fn pod_from_native(p: NativePod, engine: &EngineTag) -> PodInfo {
    PodInfo {
        created: p.created.to_utc(),
        containers: p
            .containers
            .into_iter()
            .map(|c| PodContainer {
                id: c.id,
                name: c.names,
                status: c.status,
            })
            .collect(),
        id: p.id,
        name: p.name,
        status: p.status,
        labels: p.labels.unwrap_or_default(),
        engine: engine.clone(),
    }
}

pub fn volume_from_compat(v: CompatVolume, engine: &EngineTag) -> VolumeInfo {
    VolumeInfo {
        created_at: optional_time(v.created_at.as_deref()),
        name: v.name,
        driver: v.driver,
        mountpoint: v.mountpoint,
        labels: v.labels.unwrap_or_default(),
        scope: v.scope,
        usage: None,
        engine: engine.clone(),
    }
}

pub fn network_from_compat(n: CompatNetwork, engine: &EngineTag) -> NetworkInfo {
    NetworkInfo {
        created: optional_time(n.created.as_deref()),
        id: n.id,
        name: n.name,
        driver: n.driver,
        scope: n.scope,
        labels: n.labels.unwrap_or_default(),
        engine: engine.clone(),
    }
}

pub fn info_from_compat(i: CompatInfo, engine: &EngineTag) -> EngineInfo {
    EngineInfo {
        server_version: i.server_version,
        operating_system: i.operating_system,
        architecture: i.architecture,
        cpus: i.ncpu,
        memory: i.mem_total,
        containers: i.containers,
        containers_running: i.containers_running,
        containers_paused: i.containers_paused,
        containers_stopped: i.containers_stopped,
        images: i.images,
        engine: engine.clone(),
    }
}

/// Attach pod references to containers that are members of a listed pod.
pub fn attach_pods(containers: &mut [ContainerInfo], pods: &[PodInfo]) {
    for container in containers.iter_mut() {
        let member_of = pods.iter().find(|pod| {
            pod.engine.engine_id == container.engine.engine_id
                && pod.containers.iter().any(|m| m.id == container.id)
        });
        if let Some(pod) = member_of {
            container.pod = Some(PodRef {
                id: pod.id.clone(),
                name: pod.name.clone(),
                status: pod.status.clone(),
                engine_id: pod.engine.engine_id.clone(),
            });
        }
    }
}

/// Attach disk usage to volumes by name.
pub fn attach_volume_usage(volumes: &mut [VolumeInfo], usage: &HashMap<String, VolumeUsage>) {
    for volume in volumes {
        volume.usage = usage.get(&volume.name).cloned();
    }
}
