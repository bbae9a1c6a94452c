//! Shared attach streams with replay for late subscribers.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AttachKey, AttachMap, ReplayBuffer, StreamEvent, lock};
use crate::connection::EngineRegistry;
use crate::engine::{AttachIo, ByteStream, EngineHandle, InputSink};
use crate::error::{EngineError, Result};
use crate::model::EngineId;

type SharedInput = Arc<tokio::sync::Mutex<Option<InputSink>>>;

/// One open engine attach stream and its consumers.
pub(crate) struct LiveStream {
    state: Mutex<LiveState>,
    input: SharedInput,
    cancel: CancellationToken,
}

struct LiveState {
    replay: ReplayBuffer,
    consumers: Vec<mpsc::UnboundedSender<StreamEvent>>,
    finished: bool,
}

impl LiveStream {
    fn new(replay_chunks: usize) -> Self {
        Self {
            state: Mutex::new(LiveState {
                replay: ReplayBuffer::new(replay_chunks),
                consumers: Vec::new(),
                finished: false,
            }),
            input: Arc::new(tokio::sync::Mutex::new(None)),
            cancel: CancellationToken::new(),
        }
    }

    /// Add a consumer. Buffered output is delivered first, as one chunk,
    /// before anything the pump pushes afterwards.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        if !state.replay.is_empty() {
            let _ = tx.send(StreamEvent::Data(state.replay.snapshot()));
        }
        if state.finished {
            let _ = tx.send(StreamEvent::End);
        } else {
            state.consumers.push(tx);
        }
        rx
    }

    fn push(&self, chunk: Vec<u8>) {
        let mut state = lock(&self.state);
        state.replay.push(chunk.clone());
        state
            .consumers
            .retain(|tx| tx.send(StreamEvent::Data(chunk.clone())).is_ok());
    }

    /// Deliver the terminal event to every consumer and drop them.
    fn finish(&self, last: StreamEvent) {
        let consumers = {
            let mut state = lock(&self.state);
            state.finished = true;
            std::mem::take(&mut state.consumers)
        };
        for tx in consumers {
            let _ = tx.send(last.clone());
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// A consumer of a shared attach stream.
pub struct AttachSubscription {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    input: SharedInput,
}

impl AttachSubscription {
    /// Next event. `None` after the terminal `Error`/`End` has been read.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Write to the container's stdin. Shared by every consumer.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut input = self.input.lock().await;
        let sink = input
            .as_mut()
            .ok_or_else(|| EngineError::StreamClosed("attach stream has no stdin".to_string()))?;
        sink.write_all(data).await?;
        sink.flush().await?;
        Ok(())
    }

    /// Turn the subscription into a stream of events.
    pub fn into_stream(self) -> impl futures::Stream<Item = StreamEvent> + Send + 'static {
        tokio_stream::wrappers::UnboundedReceiverStream::new(self.events)
    }
}

impl std::fmt::Debug for AttachSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachSubscription").finish_non_exhaustive()
    }
}

impl EngineRegistry {
    /// Attach to a container's output.
    ///
    /// The engine stream is opened at most once per `(engine, container)`:
    /// later callers join the existing stream and first receive its buffered
    /// tail. When the stream ends or fails every consumer is told and the
    /// entry is discarded, so the next attach opens a fresh stream.
    pub async fn attach_container(&self, engine_id: &EngineId, container_id: &str) -> Result<AttachSubscription> {
        let started = Instant::now();
        let handle = self.handle(engine_id)?;
        let key: AttachKey = (engine_id.clone(), container_id.to_string());
        let streams = &self.inner.streams;

        let (live, events, fresh) = {
            let mut map = lock(&streams.attach);
            match map.get(&key) {
                Some(live) => (Arc::clone(live), live.subscribe(), false),
                None => {
                    let live = Arc::new(LiveStream::new(streams.replay_chunks));
                    map.insert(key.clone(), Arc::clone(&live));
                    let events = live.subscribe();
                    (live, events, true)
                }
            }
        };
        let subscription = AttachSubscription {
            events,
            input: Arc::clone(&live.input),
        };
        if !fresh {
            debug!(engine_id = %engine_id, container_id, "joined existing attach stream");
            return Ok(subscription);
        }

        // Until the pump owns the entry, dropping this future releases it.
        let pending = PendingOpen {
            map: Arc::clone(&streams.attach),
            key,
            live,
            armed: true,
        };
        let opened = open_attach(&handle, container_id).await;
        self.track(
            "container.attach",
            started,
            opened.as_ref().err(),
            json!({ "engine_id": engine_id }),
        );
        match opened {
            Ok(AttachIo { output, input }) => {
                *pending.live.input.lock().await = input;
                let (map, key, live) = pending.disarm();
                tokio::spawn(pump(map, key, live, output));
                Ok(subscription)
            }
            Err(e) => {
                pending.release(StreamEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Cancel a shared attach stream. Consumers observe `End`.
    pub fn close_attach(&self, engine_id: &EngineId, container_id: &str) -> bool {
        let key: AttachKey = (engine_id.clone(), container_id.to_string());
        let removed = lock(&self.inner.streams.attach).remove(&key);
        match removed {
            Some(live) => {
                live.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of open attach streams.
    pub fn attach_stream_count(&self) -> usize {
        lock(&self.inner.streams.attach).len()
    }
}

/// Native attach first; compat when there is no native client or it fails.
async fn open_attach(handle: &EngineHandle, container_id: &str) -> Result<AttachIo> {
    if let Some(native) = &handle.native {
        match native.attach(container_id).await {
            Ok(io) => return Ok(io),
            Err(e) => {
                info!(
                    engine_id = %handle.id(),
                    container_id,
                    error = %e,
                    "native attach failed; falling back to compat attach"
                );
            }
        }
    }
    handle.compat.attach(container_id).await
}

async fn pump(map: AttachMap, key: AttachKey, live: Arc<LiveStream>, mut output: ByteStream) {
    let last = loop {
        tokio::select! {
            biased;
            _ = live.cancel.cancelled() => break StreamEvent::End,
            item = output.next() => match item {
                Some(Ok(chunk)) => live.push(chunk),
                Some(Err(e)) => {
                    warn!(engine_id = %key.0, container_id = %key.1, error = %e, "attach stream failed");
                    break StreamEvent::Error(e.to_string());
                }
                None => break StreamEvent::End,
            },
        }
    };
    drop(output);
    *live.input.lock().await = None;
    live.finish(last);
    remove_if_same(&map, &key, &live);
    debug!(engine_id = %key.0, container_id = %key.1, "attach stream closed");
}

/// A map entry whose engine stream has not been handed to a pump yet.
///
/// Dropped while armed, it ends the stream for anyone who joined and frees
/// the entry, so the next attach opens a fresh stream.
struct PendingOpen {
    map: AttachMap,
    key: AttachKey,
    live: Arc<LiveStream>,
    armed: bool,
}

impl PendingOpen {
    fn disarm(mut self) -> (AttachMap, AttachKey, Arc<LiveStream>) {
        self.armed = false;
        (Arc::clone(&self.map), self.key.clone(), Arc::clone(&self.live))
    }

    fn release(mut self, last: StreamEvent) {
        self.armed = false;
        self.live.finish(last);
        remove_if_same(&self.map, &self.key, &self.live);
    }
}

impl Drop for PendingOpen {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!(engine_id = %self.key.0, container_id = %self.key.1, "attach abandoned while opening");
        self.live.finish(StreamEvent::Error(EngineError::Cancelled.to_string()));
        remove_if_same(&self.map, &self.key, &self.live);
    }
}

/// Remove `key` only if it still maps to `live` (not a newer stream).
fn remove_if_same(map: &AttachMap, key: &AttachKey, live: &Arc<LiveStream>) {
    let mut map = lock(map);
    if map.get(key).is_some_and(|current| Arc::ptr_eq(current, live)) {
        map.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_subscriber_gets_replay_then_live() {
        let live = LiveStream::new(100);
        let mut first = live.subscribe();
        live.push(b"hel".to_vec());
        live.push(b"lo".to_vec());

        let mut second = live.subscribe();
        live.push(b"!".to_vec());

        assert_eq!(second.try_recv().unwrap(), StreamEvent::Data(b"hello".to_vec()));
        assert_eq!(second.try_recv().unwrap(), StreamEvent::Data(b"!".to_vec()));
        assert_eq!(first.try_recv().unwrap(), StreamEvent::Data(b"hel".to_vec()));
    }

    #[test]
    fn finish_notifies_everyone_once() {
        let live = LiveStream::new(10);
        let mut a = live.subscribe();
        let mut b = live.subscribe();
        live.finish(StreamEvent::Error("boom".into()));

        assert_eq!(a.try_recv().unwrap(), StreamEvent::Error("boom".into()));
        assert_eq!(b.try_recv().unwrap(), StreamEvent::Error("boom".into()));
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn subscribing_after_finish_sees_end() {
        let live = LiveStream::new(10);
        live.push(b"x".to_vec());
        live.finish(StreamEvent::End);
        let mut late = live.subscribe();
        assert_eq!(late.try_recv().unwrap(), StreamEvent::Data(b"x".to_vec()));
        assert_eq!(late.try_recv().unwrap(), StreamEvent::End);
    }

    #[test]
    fn dropped_consumers_are_pruned() {
        let live = LiveStream::new(10);
        let rx = live.subscribe();
        drop(rx);
        live.push(b"x".to_vec());
        assert!(lock(&live.state).consumers.is_empty());
    }

    fn pending_entry() -> (AttachMap, AttachKey, Arc<LiveStream>, PendingOpen) {
        let map: AttachMap = Arc::default();
        let key: AttachKey = (EngineId::from("podman.default"), "c1".to_string());
        let live = Arc::new(LiveStream::new(10));
        lock(&map).insert(key.clone(), Arc::clone(&live));
        let pending = PendingOpen {
            map: Arc::clone(&map),
            key: key.clone(),
            live: Arc::clone(&live),
            armed: true,
        };
        (map, key, live, pending)
    }

    #[test]
    fn abandoned_open_releases_entry_and_ends_joiners() {
        let (map, _key, live, pending) = pending_entry();
        let mut joined = live.subscribe();

        drop(pending);

        assert!(lock(&map).is_empty());
        assert_eq!(
            joined.try_recv().unwrap(),
            StreamEvent::Error(EngineError::Cancelled.to_string())
        );
    }

    #[test]
    fn disarmed_open_keeps_entry() {
        let (map, key, live, pending) = pending_entry();
        let mut joined = live.subscribe();

        let (_, _, handed_off) = pending.disarm();

        assert!(Arc::ptr_eq(&lock(&map)[&key], &handed_off));
        assert!(joined.try_recv().is_err());
    }

    #[test]
    fn abandoned_open_leaves_newer_stream_alone() {
        let (map, key, _live, pending) = pending_entry();
        let newer = Arc::new(LiveStream::new(10));
        lock(&map).insert(key.clone(), Arc::clone(&newer));

        drop(pending);

        assert!(Arc::ptr_eq(&lock(&map)[&key], &newer));
    }
}
