//! Continuous container stats consumers.

use std::sync::atomic::Ordering;

use futures::StreamExt;
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{StatsMap, lock};
use crate::connection::EngineRegistry;
use crate::error::Result;
use crate::model::{EngineId, StatsRecord};

pub(crate) struct StatsEntry {
    pub(crate) cancel: CancellationToken,
    engine_id: EngineId,
    container_id: String,
}

/// Splits newline-delimited JSON arriving in arbitrary chunks.
#[derive(Debug, Default)]
pub struct JsonLineSplitter {
    buf: Vec<u8>,
}

impl JsonLineSplitter {
    /// Feed a chunk; returns every complete line's parse result. Text before
    /// the first `{` of a line (terminal escapes, blanks) is ignored, and
    /// blank lines produce nothing.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<std::result::Result<Value, serde_json::Error>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(parsed) = parse_line(&line) {
                out.push(parsed);
            }
        }
        out
    }

    /// Parse whatever is left once the stream ends.
    pub fn finish(&mut self) -> Option<std::result::Result<Value, serde_json::Error>> {
        let rest = std::mem::take(&mut self.buf);
        parse_line(&rest)
    }
}

fn parse_line(line: &[u8]) -> Option<std::result::Result<Value, serde_json::Error>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let start = text.find('{').unwrap_or(0);
    Some(serde_json::from_str(&text[start..]))
}

impl EngineRegistry {
    /// Start streaming stats for a container.
    ///
    /// Every decoded sample is passed to `callback` tagged with the engine.
    /// A malformed sample is logged and skipped; only a stream error, the
    /// stream ending or [`stop_container_stats`](Self::stop_container_stats)
    /// stops delivery. Returns the consumer id.
    pub async fn container_stats<F>(&self, engine_id: &EngineId, container_id: &str, mut callback: F) -> Result<u64>
    where
        F: FnMut(StatsRecord) + Send + 'static,
    {
        let started = Instant::now();
        let handle = self.handle(engine_id)?;
        let stream = handle.compat.stats(container_id).await;
        self.track(
            "container.stats",
            started,
            stream.as_ref().err(),
            json!({ "engine_id": engine_id }),
        );
        let mut stream = stream?;

        let streams = &self.inner.streams;
        let id = streams.next_stats_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        lock(&streams.stats).insert(
            id,
            StatsEntry {
                cancel: cancel.clone(),
                engine_id: engine_id.clone(),
                container_id: container_id.to_string(),
            },
        );

        let map = std::sync::Arc::clone(&streams.stats);
        let engine_id = engine_id.clone();
        let engine_name = handle.endpoint.connection_name.clone();
        let container_id = container_id.to_string();
        tokio::spawn(async move {
            let mut splitter = JsonLineSplitter::default();
            let mut deliver = |parsed: std::result::Result<Value, serde_json::Error>| match parsed {
                Ok(stats) => callback(StatsRecord {
                    engine_id: engine_id.clone(),
                    engine_name: engine_name.clone(),
                    stats,
                }),
                Err(e) => warn!(engine_id = %engine_id, container_id = %container_id, error = %e, "skipping malformed stats sample"),
            };

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    item = stream.next() => match item {
                        Some(Ok(chunk)) => splitter.push(&chunk).into_iter().for_each(&mut deliver),
                        Some(Err(e)) => {
                            warn!(engine_id = %engine_id, container_id = %container_id, error = %e, "stats stream failed");
                            break;
                        }
                        None => {
                            if let Some(last) = splitter.finish() {
                                deliver(last);
                            }
                            break;
                        }
                    },
                }
            }
            drop(stream);
            remove_consumer(&map, id);
            debug!(stats_id = id, "stats consumer closed");
        });

        Ok(id)
    }

    /// Stop one stats consumer. Stopping an unknown or already stopped
    /// consumer is a no-op.
    pub fn stop_container_stats(&self, id: u64) -> Result<()> {
        let started = Instant::now();
        let removed = lock(&self.inner.streams.stats).remove(&id);
        let extra = match &removed {
            Some(entry) => {
                entry.cancel.cancel();
                json!({ "engine_id": entry.engine_id, "container_id": entry.container_id })
            }
            None => {
                debug!(stats_id = id, "stats consumer already stopped");
                json!({ "stats_id": id, "already_stopped": true })
            }
        };
        self.track("container.stats.stop", started, None, extra);
        Ok(())
    }

    /// Ids of the stats consumers still running.
    pub fn active_stats(&self) -> Vec<u64> {
        let mut ids: Vec<_> = lock(&self.inner.streams.stats).keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

fn remove_consumer(map: &StatsMap, id: u64) {
    lock(map).remove(&id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_across_chunks() {
        let mut s = JsonLineSplitter::default();
        assert!(s.push(br#"{"cpu":"#).is_empty());
        let out = s.push(b"1}\n{\"cpu\":2}\n");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap()["cpu"], 1);
        assert_eq!(out[1].as_ref().unwrap()["cpu"], 2);
    }

    #[test]
    fn malformed_line_is_an_error_item_not_a_stop() {
        let mut s = JsonLineSplitter::default();
        let out = s.push(b"{broken\n\n{\"ok\":true}\n");
        assert_eq!(out.len(), 2);
        assert!(out[0].is_err());
        assert_eq!(out[1].as_ref().unwrap()["ok"], true);
    }

    #[test]
    fn escape_prefix_and_trailing_line() {
        let mut s = JsonLineSplitter::default();
        let out = s.push(b"\x1b[2J\x1b[H{\"a\":1}\n{\"b\":2}");
        assert_eq!(out.len(), 1);
        assert_eq!(s.finish().unwrap().unwrap()["b"], 2);
        assert!(s.finish().is_none());
    }
}
