//! Drives one engine's raw event feed into the bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{EventBus, normalize};
use crate::engine::JsonStream;
use crate::error::EngineError;
use crate::model::EngineId;

/// Context handed to the failure callback when a feed dies.
#[derive(Debug)]
pub struct FeedFailure {
    pub engine_id: EngineId,
    pub error: EngineError,
    /// Time since the feed was opened.
    pub elapsed: Duration,
    /// Raw objects received before the failure, mapped or not.
    pub events_seen: u64,
}

/// Consume `feed` until it fails, ends or `cancel` fires.
///
/// Every raw object is normalized and published in delivery order. Objects
/// that do not map bump `unmapped`. An error item or the end of the feed is
/// reported once through `on_failure`; cancellation is silent. This function
/// never retries.
pub async fn run_feed<F>(
    engine_id: EngineId,
    mut feed: JsonStream,
    bus: EventBus,
    unmapped: Arc<AtomicU64>,
    cancel: CancellationToken,
    on_failure: F,
) where
    F: FnOnce(FeedFailure) + Send,
{
    let opened = Instant::now();
    let mut events_seen = 0u64;

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(engine_id = %engine_id, events_seen, "event feed cancelled");
                return;
            }
            item = feed.next() => item,
        };

        let error = match item {
            Some(Ok(raw)) => {
                events_seen += 1;
                match normalize(&raw) {
                    Some(event) => bus.publish(&engine_id, event),
                    None => {
                        unmapped.fetch_add(1, Ordering::Relaxed);
                        debug!(engine_id = %engine_id, raw = %raw, "dropping unmapped engine event");
                    }
                }
                continue;
            }
            Some(Err(e)) => e,
            None => EngineError::StreamClosed("event feed ended".to_string()),
        };

        on_failure(FeedFailure {
            engine_id,
            error,
            elapsed: opened.elapsed(),
            events_seen,
        });
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventAction;
    use futures::stream;
    use serde_json::json;
    use std::sync::Mutex;

    fn feed(items: Vec<crate::error::Result<serde_json::Value>>) -> JsonStream {
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn publishes_in_order_and_counts_unmapped() {
        let bus = EventBus::new();
        let mut events = bus.subscribe_events();
        let unmapped = Arc::new(AtomicU64::new(0));
        let failure = Arc::new(Mutex::new(None));
        let slot = failure.clone();

        run_feed(
            EngineId::from("docker.default"),
            feed(vec![
                Ok(json!({"status": "create", "Type": "container", "id": "c1"})),
                Ok(json!({"status": "attach", "Type": "container", "id": "c1"})),
                Ok(json!({"status": "start", "Type": "container", "id": "c1"})),
            ]),
            bus.clone(),
            unmapped.clone(),
            CancellationToken::new(),
            move |f| *slot.lock().unwrap() = Some(f),
        )
        .await;

        assert_eq!(events.recv().await.unwrap().event.action, EventAction::Create);
        assert_eq!(events.recv().await.unwrap().event.action, EventAction::Start);
        assert_eq!(unmapped.load(Ordering::Relaxed), 1);

        let failure = failure.lock().unwrap().take().unwrap();
        assert_eq!(failure.events_seen, 3);
        assert!(matches!(failure.error, EngineError::StreamClosed(_)));
    }

    #[tokio::test]
    async fn error_item_reports_failure_and_stops() {
        let bus = EventBus::new();
        let mut notes = bus.subscribe_notifications();
        let failure = Arc::new(Mutex::new(None));
        let slot = failure.clone();

        run_feed(
            EngineId::from("podman.machine"),
            feed(vec![
                Ok(json!({"Status": "pull", "Type": "image", "ID": "alpine"})),
                Err(EngineError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "gone"))),
                Ok(json!({"Status": "tag", "Type": "image", "ID": "alpine"})),
            ]),
            bus.clone(),
            Arc::new(AtomicU64::new(0)),
            CancellationToken::new(),
            move |f| *slot.lock().unwrap() = Some(f),
        )
        .await;

        assert_eq!(notes.recv().await.unwrap().name(), "image-pulled");
        assert!(notes.try_recv().is_err(), "nothing after the failure");
        let failure = failure.lock().unwrap().take().unwrap();
        assert_eq!(failure.events_seen, 1);
        assert!(failure.error.is_transient());
    }

    #[tokio::test]
    async fn cancellation_is_silent() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();

        run_feed(
            EngineId::from("a.b"),
            Box::pin(stream::pending()),
            EventBus::new(),
            Arc::new(AtomicU64::new(0)),
            cancel,
            move |_| *flag.lock().unwrap() = true,
        )
        .await;

        assert!(!*called.lock().unwrap());
    }
}
