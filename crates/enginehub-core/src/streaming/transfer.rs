//! Logs, image build/pull/push and archive transfer.

use std::path::Path;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::cancellable;
use crate::connection::EngineRegistry;
use crate::engine::{BuildOptions, ByteStream, JsonStream, LogsOptions};
use crate::error::{EngineError, Result};
use crate::model::EngineId;

/// Progress of an image build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum BuildEvent {
    /// A line of build output.
    Stream(String),
    /// The build failed with this message.
    Error(String),
    /// The build finished successfully.
    Finish,
}

/// One structured progress event of an image pull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PullEvent {
    pub status: Option<String>,
    pub id: Option<String>,
    pub progress: Option<String>,
    pub progress_detail: Option<Value>,
    pub error: Option<String>,
}

/// Error text carried by an engine progress object, if any.
fn progress_error(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(Value::as_str)
        .or_else(|| {
            value
                .get("errorDetail")
                .and_then(|d| d.get("message"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
}

fn progress_failure(message: String) -> EngineError {
    EngineError::Api {
        status: 500,
        message,
    }
}

/// Forward raw chunks until the stream ends, fails or `cancel` fires.
async fn drain_bytes<F>(mut stream: ByteStream, cancel: &CancellationToken, mut on_data: F) -> Result<()>
where
    F: FnMut(&[u8]) + Send,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            item = stream.next() => match item {
                Some(Ok(chunk)) => on_data(&chunk),
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            },
        }
    }
}

/// Forward progress objects until the stream ends, fails or `cancel` fires.
/// A progress object carrying an error fails the operation.
async fn drain_progress<F>(mut stream: JsonStream, cancel: &CancellationToken, mut on_item: F) -> Result<()>
where
    F: FnMut(Value) -> Option<String> + Send,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            item = stream.next() => match item {
                Some(Ok(value)) => {
                    if let Some(message) = on_item(value) {
                        return Err(progress_failure(message));
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            },
        }
    }
}

impl EngineRegistry {
    /// Stream a container's logs into `on_data` until they end or `cancel`
    /// fires. With `follow`, the stream stays open for new output.
    pub async fn logs_container<F>(
        &self,
        engine_id: &EngineId,
        container_id: &str,
        options: &LogsOptions,
        on_data: F,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        F: FnMut(&[u8]) + Send,
    {
        let started = Instant::now();
        let result: Result<()> = async {
            let handle = self.handle(engine_id)?;
            let stream = cancellable(cancel, handle.compat.logs(container_id, options)).await?;
            drain_bytes(stream, cancel, on_data).await
        }
        .await;
        self.track(
            "container.logs",
            started,
            result.as_ref().err(),
            json!({ "engine_id": engine_id, "follow": options.follow }),
        );
        result
    }

    /// Build an image, reporting progress through `on_event`.
    ///
    /// `on_event` sees `Stream` lines, then exactly one of `Error` or
    /// `Finish` unless the build is cancelled.
    pub async fn build_image<F>(
        &self,
        engine_id: &EngineId,
        options: &BuildOptions,
        mut on_event: F,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        F: FnMut(BuildEvent) + Send,
    {
        let started = Instant::now();
        let auth = options
            .tag
            .as_deref()
            .and_then(|tag| self.inner.auth.auth_for_image(tag));

        let result: Result<()> = async {
            let handle = self.handle(engine_id)?;
            let stream = cancellable(cancel, handle.compat.build_image(options, auth)).await?;
            drain_progress(stream, cancel, |value| {
                if let Some(message) = progress_error(&value) {
                    return Some(message);
                }
                if let Some(line) = value.get("stream").and_then(Value::as_str) {
                    on_event(BuildEvent::Stream(line.to_string()));
                }
                None
            })
            .await
        }
        .await;

        match &result {
            Ok(()) => on_event(BuildEvent::Finish),
            Err(EngineError::Cancelled) => debug!(engine_id = %engine_id, "build cancelled"),
            Err(e) => on_event(BuildEvent::Error(e.to_string())),
        }
        self.track(
            "image.build",
            started,
            result.as_ref().err(),
            json!({ "engine_id": engine_id, "tag": options.tag }),
        );
        result
    }

    /// Pull an image, reporting structured progress through `on_event`.
    pub async fn pull_image<F>(
        &self,
        engine_id: &EngineId,
        image: &str,
        mut on_event: F,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        F: FnMut(PullEvent) + Send,
    {
        let started = Instant::now();
        let auth = self.inner.auth.auth_for_image(image);
        let result: Result<()> = async {
            let handle = self.handle(engine_id)?;
            let stream = cancellable(cancel, handle.compat.pull_image(image, auth)).await?;
            drain_progress(stream, cancel, |value| {
                let error = progress_error(&value);
                match serde_json::from_value::<PullEvent>(value) {
                    Ok(event) => on_event(event),
                    Err(e) => debug!(error = %e, "unrecognised pull progress object"),
                }
                error
            })
            .await
        }
        .await;
        self.track(
            "image.pull",
            started,
            result.as_ref().err(),
            json!({ "engine_id": engine_id, "image": image }),
        );
        result
    }

    /// Push an image, forwarding the engine's raw progress output.
    pub async fn push_image<F>(
        &self,
        engine_id: &EngineId,
        image: &str,
        on_data: F,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        F: FnMut(&[u8]) + Send,
    {
        let started = Instant::now();
        let auth = self.inner.auth.auth_for_image(image);
        let result: Result<()> = async {
            let handle = self.handle(engine_id)?;
            let stream = cancellable(cancel, handle.compat.push_image(image, auth)).await?;
            drain_bytes(stream, cancel, on_data).await
        }
        .await;
        self.track(
            "image.push",
            started,
            result.as_ref().err(),
            json!({ "engine_id": engine_id, "image": image }),
        );
        result
    }

    /// Save images to a tar archive on disk.
    pub async fn save_images(&self, engine_id: &EngineId, images: &[String], target: &Path) -> Result<()> {
        let started = Instant::now();
        let result = match self.handle(engine_id) {
            Ok(handle) => handle.compat.save_images(images, target).await,
            Err(e) => Err(e),
        };
        self.track(
            "image.save",
            started,
            result.as_ref().err(),
            json!({ "engine_id": engine_id, "count": images.len() }),
        );
        result
    }

    /// Load images from a tar archive.
    pub async fn load_images(&self, engine_id: &EngineId, archive: &Path) -> Result<()> {
        let started = Instant::now();
        let result = match self.handle(engine_id) {
            Ok(handle) => handle.compat.load_images(archive).await,
            Err(e) => Err(e),
        };
        self.track(
            "image.load",
            started,
            result.as_ref().err(),
            json!({ "engine_id": engine_id }),
        );
        result
    }

    /// Export a container's filesystem to a tar archive.
    pub async fn export_container(&self, engine_id: &EngineId, container_id: &str, target: &Path) -> Result<()> {
        let started = Instant::now();
        let result = match self.handle(engine_id) {
            Ok(handle) => handle.compat.export_container(container_id, target).await,
            Err(e) => Err(e),
        };
        self.track(
            "container.export",
            started,
            result.as_ref().err(),
            json!({ "engine_id": engine_id }),
        );
        result
    }

    /// Import a filesystem tarball as an image. Returns the new image id.
    pub async fn import_container(
        &self,
        engine_id: &EngineId,
        archive: &Path,
        reference: Option<&str>,
    ) -> Result<String> {
        let started = Instant::now();
        let result = match self.handle(engine_id) {
            Ok(handle) => handle.compat.import_container(archive, reference).await,
            Err(e) => Err(e),
        };
        self.track(
            "container.import",
            started,
            result.as_ref().err(),
            json!({ "engine_id": engine_id, "reference": reference }),
        );
        result
    }
}
