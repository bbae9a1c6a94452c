//! One-shot exec with demultiplexed output, and interactive shells.

use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use super::StreamEvent;
use crate::connection::EngineRegistry;
use crate::engine::demux::{FrameDecoder, StdStream};
use crate::engine::{CompatApi, ExecOptions, InputSink};
use crate::error::{EngineError, Result};
use crate::model::EngineId;

/// Status code some engines use to report a successful resize as an error.
const RESIZE_OK_STATUS: u16 = 201;

impl EngineRegistry {
    /// Run `cmd` in a container and wait for it to finish.
    ///
    /// Output is split into `on_stdout` and `on_stderr`. Completion is
    /// whichever comes first: the output stream ending, or a periodic check
    /// reporting the exec as no longer running.
    pub async fn exec_in_container<O, E>(
        &self,
        engine_id: &EngineId,
        container_id: &str,
        cmd: Vec<String>,
        mut on_stdout: O,
        mut on_stderr: E,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        O: FnMut(&[u8]) + Send,
        E: FnMut(&[u8]) + Send,
    {
        let started = Instant::now();
        let handle = self.handle(engine_id)?;
        let options = ExecOptions {
            cmd,
            ..ExecOptions::default()
        };

        let result: Result<()> = async {
            let session = super::cancellable(cancel, handle.compat.exec(container_id, &options)).await?;
            let exec_id = session.exec_id;
            let mut output = session.output;
            let mut decoder = FrameDecoder::new();
            let mut dispatch = |chunk: &[u8]| {
                for (which, payload) in decoder.push(chunk) {
                    match which {
                        StdStream::Stderr => on_stderr(&payload),
                        StdStream::Stdout | StdStream::Stdin => on_stdout(&payload),
                    }
                }
            };

            let mut poll = tokio::time::interval(self.inner.config.exec_poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            poll.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    item = output.next() => match item {
                        Some(Ok(chunk)) => dispatch(&chunk),
                        Some(Err(e)) => return Err(e),
                        None => break,
                    },
                    _ = poll.tick() => match handle.compat.exec_running(&exec_id).await {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!(exec_id = %exec_id, "exec reported finished before its stream ended");
                            // Hand over whatever output is already buffered.
                            while let Some(Some(Ok(chunk))) = output.next().now_or_never() {
                                dispatch(&chunk);
                            }
                            break;
                        }
                        Err(e) => debug!(exec_id = %exec_id, error = %e, "exec status check failed"),
                    },
                }
            }
            Ok(())
        }
        .await;

        self.track(
            "container.exec",
            started,
            result.as_ref().err(),
            json!({ "engine_id": engine_id }),
        );
        result
    }

    /// Open an interactive TTY shell in a container.
    pub async fn shell_in_container(&self, engine_id: &EngineId, container_id: &str) -> Result<ShellSession> {
        let started = Instant::now();
        let handle = self.handle(engine_id)?;
        let options = ExecOptions {
            cmd: vec![
                "sh".to_string(),
                "-c".to_string(),
                "if command -v bash >/dev/null 2>&1; then exec bash; else exec sh; fi".to_string(),
            ],
            tty: true,
            attach_stdin: true,
            ..ExecOptions::default()
        };

        let session = handle.compat.exec(container_id, &options).await;
        self.track(
            "container.shell",
            started,
            session.as_ref().err(),
            json!({ "engine_id": engine_id }),
        );
        let session = session?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();
        let mut output = session.output;
        let log_id = session.exec_id.clone();
        tokio::spawn(async move {
            let last = loop {
                tokio::select! {
                    biased;
                    _ = pump_cancel.cancelled() => break StreamEvent::End,
                    item = output.next() => match item {
                        Some(Ok(chunk)) => {
                            if tx.send(StreamEvent::Data(chunk)).is_err() {
                                break StreamEvent::End;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(exec_id = %log_id, error = %e, "shell stream failed");
                            break StreamEvent::Error(e.to_string());
                        }
                        None => break StreamEvent::End,
                    },
                }
            };
            let _ = tx.send(last);
        });

        Ok(ShellSession {
            exec_id: session.exec_id,
            events: rx,
            input: tokio::sync::Mutex::new(session.input),
            compat: handle.compat,
            cancel: cancel.clone(),
            _close_on_drop: cancel.drop_guard(),
        })
    }
}

/// An interactive shell. Dropping it closes the shell.
pub struct ShellSession {
    exec_id: String,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    input: tokio::sync::Mutex<Option<InputSink>>,
    compat: Arc<dyn CompatApi>,
    cancel: CancellationToken,
    _close_on_drop: DropGuard,
}

impl ShellSession {
    pub fn exec_id(&self) -> &str {
        &self.exec_id
    }

    /// Next output event. `None` once the terminal event has been read.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut input = self.input.lock().await;
        let sink = input
            .as_mut()
            .ok_or_else(|| EngineError::StreamClosed("shell has no stdin".to_string()))?;
        sink.write_all(data).await?;
        sink.flush().await?;
        Ok(())
    }

    /// Resize the shell's TTY.
    pub async fn resize(&self, width: u16, height: u16) -> Result<()> {
        resize_result(self.compat.resize_exec(&self.exec_id, width, height).await)
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSession")
            .field("exec_id", &self.exec_id)
            .finish_non_exhaustive()
    }
}

/// Engines answer a successful resize with a "201 Created" error.
fn resize_result(result: Result<()>) -> Result<()> {
    match result {
        Err(EngineError::Api { status, .. }) if status == RESIZE_OK_STATUS => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_treats_created_as_success() {
        let quirk = Err(EngineError::Api {
            status: 201,
            message: "created".into(),
        });
        assert!(resize_result(quirk).is_ok());
        assert!(resize_result(Ok(())).is_ok());
    }

    #[test]
    fn resize_propagates_real_errors() {
        let err = Err(EngineError::Api {
            status: 404,
            message: "no such exec".into(),
        });
        assert!(matches!(resize_result(err), Err(EngineError::Api { status: 404, .. })));
        assert!(matches!(
            resize_result(Err(EngineError::Unsupported("exec resize"))),
            Err(EngineError::Unsupported(_))
        ));
    }
}
