//! Fan-out queries across every connected engine.
//!
//! Each listing runs the per-engine query for all connected handles
//! concurrently. A failing engine is logged, reported to telemetry and
//! contributes nothing; it never fails the aggregate call. Engines with a
//! native client are queried through it and translated into the common
//! record; compat-only engines use the compat listing.

pub mod ops;
pub mod translate;

use std::collections::HashMap;
use std::future::Future;

use futures::future::join_all;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connection::EngineRegistry;
use crate::engine::{EngineHandle, Filters};
use crate::error::{EngineError, Result};
use crate::model::{
    ContainerInfo, EngineId, EngineInfo, ImageInfo, ListOptions, NetworkInfo, PodInfo,
    SimpleContainerInfo, VolumeInfo, VolumeUsage,
};

use translate::*;

impl EngineRegistry {
    /// Run `query` against the selected handles and merge the results.
    async fn fan_out<T, F, Fut>(&self, operation: &'static str, engine: Option<&EngineId>, query: F) -> Result<Vec<T>>
    where
        F: Fn(EngineHandle) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let started = Instant::now();
        let handles = self.handles(engine)?;
        let engines = handles.len();

        let outcomes = join_all(handles.into_iter().map(|handle| {
            let engine_id = handle.id();
            let fut = query(handle);
            async move { (engine_id, fut.await) }
        }))
        .await;

        let mut merged = Vec::new();
        for (engine_id, outcome) in outcomes {
            match outcome {
                Ok(items) => merged.extend(items),
                Err(e) => {
                    if e.is_transient() {
                        debug!(engine_id = %engine_id, operation, error = %e, "engine dropped out of fan-out query");
                    } else {
                        warn!(engine_id = %engine_id, operation, error = %e, "engine failed fan-out query; skipping its results");
                    }
                    self.track(
                        "aggregate.engine-failure",
                        started,
                        Some(&e),
                        json!({ "operation": operation, "engine_id": engine_id }),
                    );
                }
            }
        }

        self.track(
            operation,
            started,
            None,
            json!({ "engines": engines, "count": merged.len() }),
        );
        Ok(merged)
    }

    /// Containers (running and stopped) on every connected engine.
    pub async fn list_containers(&self) -> Vec<ContainerInfo> {
        let options = ListOptions {
            all: true,
            ..ListOptions::default()
        };
        // Without an explicit engine the fan-out cannot fail.
        self.list_containers_with(&options).await.unwrap_or_default()
    }

    /// Containers matching `options`. Fails only when `options.engine`
    /// names an engine that is not connected.
    pub async fn list_containers_with(&self, options: &ListOptions) -> Result<Vec<ContainerInfo>> {
        self.fan_out("container.list", options.engine.as_ref(), |handle| async move {
            engine_containers(&handle, options.all, &options.filters, options.compat_only).await
        })
        .await
    }

    /// Id, names and state of every container, via the compat API only.
    pub async fn list_simple_containers(&self) -> Vec<SimpleContainerInfo> {
        self.fan_out("container.list-simple", None, |handle| async move {
            let tag = handle.tag();
            let listed = handle.compat.list_containers(true, &Filters::new()).await?;
            Ok(listed
                .into_iter()
                .map(|c| simple_container(&container_from_compat(c, &tag)))
                .collect())
        })
        .await
        .unwrap_or_default()
    }

    /// Images matching `options`. Native engines report manifest lists.
    pub async fn list_images(&self, options: &ListOptions) -> Result<Vec<ImageInfo>> {
        self.fan_out("image.list", options.engine.as_ref(), |handle| async move {
            let tag = handle.tag();
            match (&handle.native, options.compat_only) {
                (Some(native), false) => {
                    let images = native.list_images(options.all).await?;
                    Ok(images.into_iter().map(|i| image_from_native(i, &tag)).collect())
                }
                _ => {
                    let images = handle.compat.list_images(options.all, &options.filters).await?;
                    Ok(images.into_iter().map(|i| image_from_compat(i, &tag)).collect())
                }
            }
        })
        .await
    }

    /// Pods on every native engine, or on `engine` only.
    ///
    /// Compat-only engines have no pods and are skipped; naming one
    /// explicitly is a [`EngineError::CapabilityMissing`].
    pub async fn list_pods(&self, engine: Option<&EngineId>) -> Result<Vec<PodInfo>> {
        if let Some(engine_id) = engine {
            let handle = self.handle(engine_id)?;
            if handle.native.is_none() {
                return Err(EngineError::capability(engine_id, "pods"));
            }
        }
        self.fan_out("pod.list", engine, |handle| async move {
            let Some(native) = &handle.native else {
                return Ok(Vec::new());
            };
            let tag = handle.tag();
            let pods = native.list_pods().await?;
            Ok(pods.into_iter().map(|p| pod_from_native(p, &tag)).collect())
        })
        .await
    }

    /// Volumes on every connected engine, optionally with disk usage.
    ///
    /// A failed usage lookup leaves `usage` empty; the volumes are still
    /// returned.
    pub async fn list_volumes(&self, fetch_usage: bool) -> Vec<VolumeInfo> {
        self.fan_out("volume.list", None, |handle| async move {
            let tag = handle.tag();
            let mut volumes: Vec<_> = handle
                .compat
                .list_volumes()
                .await?
                .into_iter()
                .map(|v| volume_from_compat(v, &tag))
                .collect();

            if fetch_usage {
                match handle.compat.disk_usage().await {
                    Ok(df) => {
                        let usage: HashMap<_, _> = df
                            .volumes
                            .into_iter()
                            .filter_map(|entry| {
                                let data = entry.usage_data?;
                                Some((
                                    entry.name,
                                    VolumeUsage {
                                        size: data.size,
                                        ref_count: data.ref_count,
                                    },
                                ))
                            })
                            .collect();
                        attach_volume_usage(&mut volumes, &usage);
                    }
                    Err(e) => warn!(engine_id = %tag.engine_id, error = %e, "volume usage unavailable"),
                }
            }
            Ok(volumes)
        })
        .await
        .unwrap_or_default()
    }

    /// Networks on every connected engine.
    pub async fn list_networks(&self) -> Vec<NetworkInfo> {
        self.fan_out("network.list", None, |handle| async move {
            let tag = handle.tag();
            let networks = handle.compat.list_networks().await?;
            Ok(networks.into_iter().map(|n| network_from_compat(n, &tag)).collect())
        })
        .await
        .unwrap_or_default()
    }

    /// Engine information for one engine. Errors propagate.
    pub async fn info(&self, engine_id: &EngineId) -> Result<EngineInfo> {
        let started = Instant::now();
        let result = match self.handle(engine_id) {
            Ok(handle) => handle
                .compat
                .info()
                .await
                .map(|info| info_from_compat(info, &handle.tag())),
            Err(e) => Err(e),
        };
        self.track(
            "engine.info",
            started,
            result.as_ref().err(),
            json!({ "engine_id": engine_id }),
        );
        result
    }

    /// Engine information for every connected engine, or `options.engine`.
    pub async fn list_infos(&self, options: &ListOptions) -> Result<Vec<EngineInfo>> {
        self.fan_out("engine.list-info", options.engine.as_ref(), |handle| async move {
            let info = handle.compat.info().await?;
            Ok(vec![info_from_compat(info, &handle.tag())])
        })
        .await
    }
}

/// List one engine's containers, preferring the native API.
///
/// Pod membership is attached from the native pod listing; a failed pod
/// listing only loses the enrichment.
pub(crate) async fn engine_containers(
    handle: &EngineHandle,
    all: bool,
    filters: &Filters,
    compat_only: bool,
) -> Result<Vec<ContainerInfo>> {
    let tag = handle.tag();
    let native = match &handle.native {
        Some(native) if !compat_only => native,
        _ => {
            let listed = handle.compat.list_containers(all, filters).await?;
            return Ok(listed.into_iter().map(|c| container_from_compat(c, &tag)).collect());
        }
    };

    let mut containers: Vec<_> = native
        .list_containers(all)
        .await?
        .into_iter()
        .map(|c| container_from_native(c, &tag))
        .filter(|c| matches_filters(c, filters))
        .collect();

    match native.list_pods().await {
        Ok(pods) => {
            let pods: Vec<_> = pods.into_iter().map(|p| pod_from_native(p, &tag)).collect();
            attach_pods(&mut containers, &pods);
        }
        Err(e) => debug!(engine_id = %tag.engine_id, error = %e, "pod listing failed; containers returned without pod info"),
    }
    Ok(containers)
}

/// Client-side equivalent of the compat listing filters, for native
/// listings. Understands `label` (`key` or `key=value`), `id` (prefix),
/// `name` (substring) and `status`; other keys are ignored.
fn matches_filters(container: &ContainerInfo, filters: &Filters) -> bool {
    filters.iter().all(|(key, values)| {
        values.iter().all(|value| match key.as_str() {
            "label" => match value.split_once('=') {
                Some((k, v)) => container.has_label(k, v),
                None => container.labels.contains_key(value),
            },
            "id" => container.id.starts_with(value.as_str()),
            "name" => container
                .names
                .iter()
                .any(|n| n.trim_start_matches('/').contains(value.as_str())),
            "status" => container.state.eq_ignore_ascii_case(value),
            _ => true,
        })
    })
}
