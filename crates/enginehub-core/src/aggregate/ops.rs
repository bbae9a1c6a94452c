//! Single-target operations and label batches.
//!
//! Every operation resolves the engine first; an unknown or disconnected
//! engine fails with [`EngineError::NoRunningEngine`] before any engine
//! call is made. Pod and manifest operations additionally require the
//! native client.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::debug;

use super::engine_containers;
use crate::connection::EngineRegistry;
use crate::engine::{
    CompatApi, CreateContainerOptions, CreateNetworkOptions, CreatePodOptions, CreateVolumeOptions,
    EngineHandle, Filters, ManifestOptions, NativeApi, PruneReport,
};
use crate::error::{EngineError, Result};
use crate::model::{ContainerInfo, EngineId};

fn native(handle: &EngineHandle, capability: &'static str) -> Result<Arc<dyn NativeApi>> {
    handle
        .native
        .clone()
        .ok_or_else(|| EngineError::capability(&handle.id(), capability))
}

impl EngineRegistry {
    /// Resolve `engine_id`, run `op` against its handle and record the outcome.
    async fn on_engine<T, F, Fut>(&self, event: &'static str, engine_id: &EngineId, extra: Value, op: F) -> Result<T>
    where
        F: FnOnce(EngineHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = match self.handle(engine_id) {
            Ok(handle) => op(handle).await,
            Err(e) => Err(e),
        };
        let mut properties = json!({ "engine_id": engine_id });
        if let (Value::Object(props), Value::Object(more)) = (&mut properties, extra) {
            props.extend(more);
        }
        self.track(event, started, result.as_ref().err(), properties);
        result
    }

    pub async fn ping(&self, engine_id: &EngineId) -> Result<()> {
        self.on_engine("engine.ping", engine_id, Value::Null, |h| async move { h.compat.ping().await })
            .await
    }

    // -- containers -----------------------------------------------------------

    pub async fn start_container(&self, engine_id: &EngineId, id: &str) -> Result<()> {
        self.on_engine("container.start", engine_id, Value::Null, |h| async move {
            h.compat.start_container(id).await
        })
        .await
    }

    pub async fn stop_container(&self, engine_id: &EngineId, id: &str) -> Result<()> {
        self.on_engine("container.stop", engine_id, Value::Null, |h| async move {
            h.compat.stop_container(id).await
        })
        .await
    }

    pub async fn restart_container(&self, engine_id: &EngineId, id: &str) -> Result<()> {
        self.on_engine("container.restart", engine_id, Value::Null, |h| async move {
            h.compat.restart_container(id).await
        })
        .await
    }

    /// Remove a container, stopping it first if it is running.
    pub async fn delete_container(&self, engine_id: &EngineId, id: &str) -> Result<()> {
        self.on_engine("container.delete", engine_id, Value::Null, |h| async move {
            h.compat.remove_container(id, true).await
        })
        .await
    }

    /// Send `signal` (the engine default when `None`) to a container.
    pub async fn kill_container(&self, engine_id: &EngineId, id: &str, signal: Option<&str>) -> Result<()> {
        self.on_engine("container.kill", engine_id, json!({ "signal": signal }), |h| async move {
            h.compat.kill_container(id, signal).await
        })
        .await
    }

    /// Raw inspect document of a container.
    pub async fn inspect_container(&self, engine_id: &EngineId, id: &str) -> Result<Value> {
        self.on_engine("container.inspect", engine_id, Value::Null, |h| async move {
            h.compat.inspect_container(id).await
        })
        .await
    }

    /// Create a container and, when `options.start` is set, start it.
    /// Returns the new container id.
    pub async fn create_container(&self, engine_id: &EngineId, options: &CreateContainerOptions) -> Result<String> {
        let extra = json!({ "image": options.image, "start": options.start });
        self.on_engine("container.create", engine_id, extra, |h| async move {
            let id = h.compat.create_container(options).await?;
            if options.start {
                h.compat.start_container(&id).await?;
            }
            Ok(id)
        })
        .await
    }

    pub async fn prune_containers(&self, engine_id: &EngineId) -> Result<PruneReport> {
        self.on_engine("container.prune", engine_id, Value::Null, |h| async move {
            h.compat.prune_containers().await
        })
        .await
    }

    // -- images, volumes, networks --------------------------------------------

    pub async fn delete_image(&self, engine_id: &EngineId, id: &str, force: bool) -> Result<()> {
        self.on_engine("image.delete", engine_id, json!({ "force": force }), |h| async move {
            h.compat.remove_image(id, force).await
        })
        .await
    }

    /// Prune dangling images, or every unused image with `all`.
    pub async fn prune_images(&self, engine_id: &EngineId, all: bool) -> Result<PruneReport> {
        self.on_engine("image.prune", engine_id, json!({ "all": all }), |h| async move {
            h.compat.prune_images(all).await
        })
        .await
    }

    /// Create a volume. Returns its name.
    pub async fn create_volume(&self, engine_id: &EngineId, options: &CreateVolumeOptions) -> Result<String> {
        self.on_engine("volume.create", engine_id, Value::Null, |h| async move {
            h.compat.create_volume(options).await
        })
        .await
    }

    pub async fn delete_volume(&self, engine_id: &EngineId, name: &str) -> Result<()> {
        self.on_engine("volume.delete", engine_id, Value::Null, |h| async move {
            h.compat.remove_volume(name, false).await
        })
        .await
    }

    pub async fn prune_volumes(&self, engine_id: &EngineId) -> Result<PruneReport> {
        self.on_engine("volume.prune", engine_id, Value::Null, |h| async move {
            h.compat.prune_volumes().await
        })
        .await
    }

    /// Create a network. Returns its id.
    pub async fn create_network(&self, engine_id: &EngineId, options: &CreateNetworkOptions) -> Result<String> {
        self.on_engine("network.create", engine_id, Value::Null, |h| async move {
            h.compat.create_network(options).await
        })
        .await
    }

    pub async fn delete_network(&self, engine_id: &EngineId, id: &str) -> Result<()> {
        self.on_engine("network.delete", engine_id, Value::Null, |h| async move {
            h.compat.remove_network(id).await
        })
        .await
    }

    // -- pods and manifests (native only) ---------------------------------------

    /// Create a pod. Returns its id.
    pub async fn create_pod(&self, engine_id: &EngineId, options: &CreatePodOptions) -> Result<String> {
        self.on_engine("pod.create", engine_id, Value::Null, |h| async move {
            native(&h, "pods")?.create_pod(options).await
        })
        .await
    }

    pub async fn start_pod(&self, engine_id: &EngineId, id: &str) -> Result<()> {
        self.on_engine("pod.start", engine_id, Value::Null, |h| async move {
            native(&h, "pods")?.start_pod(id).await
        })
        .await
    }

    pub async fn stop_pod(&self, engine_id: &EngineId, id: &str) -> Result<()> {
        self.on_engine("pod.stop", engine_id, Value::Null, |h| async move {
            native(&h, "pods")?.stop_pod(id).await
        })
        .await
    }

    pub async fn restart_pod(&self, engine_id: &EngineId, id: &str) -> Result<()> {
        self.on_engine("pod.restart", engine_id, Value::Null, |h| async move {
            native(&h, "pods")?.restart_pod(id).await
        })
        .await
    }

    /// Remove a pod and its containers.
    pub async fn delete_pod(&self, engine_id: &EngineId, id: &str) -> Result<()> {
        self.on_engine("pod.delete", engine_id, Value::Null, |h| async move {
            native(&h, "pods")?.remove_pod(id, true).await
        })
        .await
    }

    /// Create a manifest list. Returns its id.
    pub async fn create_manifest(&self, engine_id: &EngineId, options: &ManifestOptions) -> Result<String> {
        let extra = json!({ "images": options.images.len() });
        self.on_engine("manifest.create", engine_id, extra, |h| async move {
            native(&h, "manifests")?.create_manifest(options).await
        })
        .await
    }

    // -- label batches ------------------------------------------------------------

    /// Start every stopped container on `engine_id` labelled `key=value`.
    pub async fn start_containers_by_label(&self, engine_id: &EngineId, key: &str, value: &str) -> Result<()> {
        self.containers_by_label("container.start-by-label", engine_id, key, value, |c| !c.is_running(), |compat, id| async move {
            compat.start_container(&id).await
        })
        .await
    }

    /// Stop every running container on `engine_id` labelled `key=value`.
    pub async fn stop_containers_by_label(&self, engine_id: &EngineId, key: &str, value: &str) -> Result<()> {
        self.containers_by_label("container.stop-by-label", engine_id, key, value, ContainerInfo::is_running, |compat, id| async move {
            compat.stop_container(&id).await
        })
        .await
    }

    /// Restart every container on `engine_id` labelled `key=value`.
    pub async fn restart_containers_by_label(&self, engine_id: &EngineId, key: &str, value: &str) -> Result<()> {
        self.containers_by_label("container.restart-by-label", engine_id, key, value, |_| true, |compat, id| async move {
            compat.restart_container(&id).await
        })
        .await
    }

    /// Remove every container on `engine_id` labelled `key=value`.
    pub async fn delete_containers_by_label(&self, engine_id: &EngineId, key: &str, value: &str) -> Result<()> {
        self.containers_by_label("container.delete-by-label", engine_id, key, value, |_| true, |compat, id| async move {
            compat.remove_container(&id, true).await
        })
        .await
    }

    /// Apply `action` concurrently to every matching container.
    ///
    /// Every action runs to completion even when some fail; the first
    /// failure (in listing order) is returned afterwards.
    async fn containers_by_label<P, F, Fut>(
        &self,
        event: &'static str,
        engine_id: &EngineId,
        key: &str,
        value: &str,
        wanted: P,
        action: F,
    ) -> Result<()>
    where
        P: Fn(&ContainerInfo) -> bool,
        F: Fn(Arc<dyn CompatApi>, String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let extra = json!({ "key": key, "value": value });
        self.on_engine(event, engine_id, extra, |handle| async move {
            let containers = engine_containers(&handle, true, &Filters::new(), false).await?;
            let targets: Vec<String> = containers
                .into_iter()
                .filter(|c| c.has_label(key, value) && wanted(c))
                .map(|c| c.id)
                .collect();
            debug!(engine_id = %engine_id, key, value, count = targets.len(), "applying label batch");

            let outcomes = join_all(
                targets
                    .into_iter()
                    .map(|id| action(Arc::clone(&handle.compat), id)),
            )
            .await;
            outcomes.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
        })
        .await
    }
}
