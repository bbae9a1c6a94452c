//! Streaming commands: `events`, `logs`, `stats`, `exec`, `pull`.
//!
//! Each runs until its stream ends or Ctrl-C cancels it.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use enginehub_core::engine::LogsOptions;
use enginehub_core::{EngineError, EngineId, PullEvent};

use crate::list_cmds::print_json;
use crate::session::Hub;

const STATS_CHECK: Duration = Duration::from_millis(500);

/// Treat a cancelled operation as a clean exit.
fn allow_cancel(result: enginehub_core::Result<()>) -> enginehub_core::Result<()> {
    match result {
        Err(EngineError::Cancelled) => Ok(()),
        other => other,
    }
}

fn write_out(mut out: impl Write, chunk: &[u8]) {
    if out.write_all(chunk).and_then(|()| out.flush()).is_err() {
        tracing::debug!("output closed");
    }
}

/// Serialized name of a unit enum variant.
fn variant_name<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

/// `enginehub events`: print normalized events from every engine.
pub async fn run_events(hub: &Hub, json: bool, cancel: &CancellationToken) -> Result<()> {
    let mut events = std::pin::pin!(hub.registry.events().event_stream());

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            next = events.next() => match next {
                Some(event) => event,
                None => break,
            },
        };
        if json {
            let line = serde_json::to_string(&event).context("failed to serialize event")?;
            println!("{line}");
        } else {
            println!(
                "{:<24} {:<10} {:<16} {}",
                event.engine_id.as_str(),
                variant_name(&event.event.kind),
                variant_name(&event.event.action),
                event.event.subject_id,
            );
        }
    }
    Ok(())
}

/// `enginehub logs`: stream a container's logs to stdout.
pub async fn run_logs(
    hub: &Hub,
    engine_id: &EngineId,
    container: &str,
    options: &LogsOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let result = hub
        .registry
        .logs_container(
            engine_id,
            container,
            options,
            |chunk| write_out(std::io::stdout(), chunk),
            cancel,
        )
        .await;
    allow_cancel(result).with_context(|| format!("logs for {container} failed"))
}

/// `enginehub stats`: print stats samples until the stream ends.
pub async fn run_stats(
    hub: &Hub,
    engine_id: &EngineId,
    container: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let consumer = hub
        .registry
        .container_stats(engine_id, container, |record| {
            println!("{}", record.stats);
        })
        .await
        .with_context(|| format!("stats for {container} failed"))?;

    let mut tick = tokio::time::interval(STATS_CHECK);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                hub.registry.stop_container_stats(consumer)?;
                break;
            }
            _ = tick.tick() => {
                if !hub.registry.active_stats().contains(&consumer) {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// `enginehub exec`: run a command in a container, forwarding its output.
pub async fn run_exec(
    hub: &Hub,
    engine_id: &EngineId,
    container: &str,
    cmd: Vec<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    let result = hub
        .registry
        .exec_in_container(
            engine_id,
            container,
            cmd,
            |chunk| write_out(std::io::stdout(), chunk),
            |chunk| write_out(std::io::stderr(), chunk),
            cancel,
        )
        .await;
    allow_cancel(result).with_context(|| format!("exec in {container} failed"))
}

/// `enginehub pull`: pull an image, printing progress lines.
pub async fn run_pull(
    hub: &Hub,
    engine_id: &EngineId,
    image: &str,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let result = hub
        .registry
        .pull_image(
            engine_id,
            image,
            |event: PullEvent| {
                if json {
                    if let Err(e) = print_json(&event) {
                        tracing::debug!(error = %e, "failed to print pull event");
                    }
                    return;
                }
                let line = [event.id.as_deref(), event.status.as_deref(), event.progress.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                if !line.is_empty() {
                    println!("{line}");
                }
            },
            cancel,
        )
        .await;

    allow_cancel(result).with_context(|| format!("pull of {image} failed"))?;
    if !cancel.is_cancelled() {
        println!("pulled {image}");
    }
    Ok(())
}
