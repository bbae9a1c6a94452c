//! Event normalizer and typed event bus.
//!
//! Each connected engine's raw event feed runs through [`feed::run_feed`],
//! which maps every object with [`normalize`] and publishes the result on
//! two broadcast channels:
//!
//! - the generic channel, carrying every mapped [`EngineEvent`] tagged with
//!   its engine, and
//! - the notification channel, carrying the fixed catalogue of
//!   [`RegistryNotification`]s (container/image changes, pod/volume/network
//!   change signals, engine set changes).
//!
//! Subscribers hold a [`broadcast::Receiver`]; dropping it unsubscribes.

pub mod feed;
pub mod normalize;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::model::EngineId;

pub use feed::{FeedFailure, run_feed};
pub use normalize::{EngineEvent, EventAction, EventKind, normalize};

/// Capacity of each broadcast channel. Slow subscribers lag rather than
/// block the feeds.
pub const BUS_CAPACITY: usize = 256;

/// A normalized event together with the engine that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedEvent {
    pub engine_id: EngineId,
    #[serde(flatten)]
    pub event: EngineEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerChange {
    Started,
    Stopped,
    Created,
    Removed,
    Died,
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageChange {
    Pulled,
    Tagged,
    Untagged,
    Removed,
    Built,
    Loaded,
}

/// Fixed-name notifications for dedicated consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RegistryNotification {
    Container {
        change: ContainerChange,
        engine_id: EngineId,
        container_id: String,
    },
    Image {
        change: ImageChange,
        engine_id: EngineId,
        image_id: String,
    },
    PodChanged {
        engine_id: EngineId,
    },
    VolumeChanged {
        engine_id: EngineId,
    },
    NetworkChanged {
        engine_id: EngineId,
    },
    EngineConnected {
        engine_id: EngineId,
    },
    EngineDisconnected {
        engine_id: EngineId,
    },
    EnginesChanged,
}

impl RegistryNotification {
    /// Derive the notification for a mapped event, if its category has one.
    pub fn for_event(engine_id: &EngineId, event: &EngineEvent) -> Option<Self> {
        let engine_id = engine_id.clone();
        let notification = match event.kind {
            EventKind::Container => {
                let change = match event.action {
                    EventAction::Start => ContainerChange::Started,
                    EventAction::Stop => ContainerChange::Stopped,
                    EventAction::Create => ContainerChange::Created,
                    EventAction::Destroy | EventAction::Remove => ContainerChange::Removed,
                    EventAction::Die => ContainerChange::Died,
                    EventAction::Kill => ContainerChange::Killed,
                    _ => return None,
                };
                Self::Container {
                    change,
                    engine_id,
                    container_id: event.subject_id.clone(),
                }
            }
            EventKind::Image => {
                let change = match event.action {
                    EventAction::Pull => ImageChange::Pulled,
                    EventAction::Tag => ImageChange::Tagged,
                    EventAction::Untag => ImageChange::Untagged,
                    EventAction::Remove => ImageChange::Removed,
                    EventAction::Build => ImageChange::Built,
                    EventAction::LoadFromArchive => ImageChange::Loaded,
                    _ => return None,
                };
                Self::Image {
                    change,
                    engine_id,
                    image_id: event.subject_id.clone(),
                }
            }
            EventKind::Pod => Self::PodChanged { engine_id },
            EventKind::Volume => Self::VolumeChanged { engine_id },
            EventKind::Network => Self::NetworkChanged { engine_id },
        };
        Some(notification)
    }

    /// Stable catalogue name (`container-started`, `engines-changed`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Container { change, .. } => match change {
                ContainerChange::Started => "container-started",
                ContainerChange::Stopped => "container-stopped",
                ContainerChange::Created => "container-created",
                ContainerChange::Removed => "container-removed",
                ContainerChange::Died => "container-died",
                ContainerChange::Killed => "container-killed",
            },
            Self::Image { change, .. } => match change {
                ImageChange::Pulled => "image-pulled",
                ImageChange::Tagged => "image-tagged",
                ImageChange::Untagged => "image-untagged",
                ImageChange::Removed => "image-removed",
                ImageChange::Built => "image-built",
                ImageChange::Loaded => "image-loaded",
            },
            Self::PodChanged { .. } => "pod-changed",
            Self::VolumeChanged { .. } => "volume-changed",
            Self::NetworkChanged { .. } => "network-changed",
            Self::EngineConnected { .. } => "engine-connected",
            Self::EngineDisconnected { .. } => "engine-disconnected",
            Self::EnginesChanged => "engines-changed",
        }
    }
}

/// The two broadcast channels. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    events: broadcast::Sender<TaggedEvent>,
    notifications: broadcast::Sender<RegistryNotification>,
}

impl EventBus {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(BUS_CAPACITY);
        let (notifications, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            events,
            notifications,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TaggedEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<RegistryNotification> {
        self.notifications.subscribe()
    }

    /// Generic events as a stream. Lagged gaps are logged and skipped.
    pub fn event_stream(&self) -> impl Stream<Item = TaggedEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|item| async move { skip_lag(item) })
    }

    /// Notifications as a stream. Lagged gaps are logged and skipped.
    pub fn notification_stream(&self) -> impl Stream<Item = RegistryNotification> + Send + 'static {
        BroadcastStream::new(self.notifications.subscribe())
            .filter_map(|item| async move { skip_lag(item) })
    }

    /// Publish a mapped event on the generic channel and, where the
    /// category has one, its named notification.
    pub fn publish(&self, engine_id: &EngineId, event: EngineEvent) {
        let notification = RegistryNotification::for_event(engine_id, &event);
        // No subscribers is not an error.
        let _ = self.events.send(TaggedEvent {
            engine_id: engine_id.clone(),
            event,
        });
        if let Some(notification) = notification {
            self.notify(notification);
        }
    }

    pub fn notify(&self, notification: RegistryNotification) {
        let _ = self.notifications.send(notification);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn skip_lag<T>(item: Result<T, BroadcastStreamRecvError>) -> Option<T> {
    match item {
        Ok(value) => Some(value),
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            tracing::warn!(skipped = n, "event subscriber lagged; events dropped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, action: EventAction) -> EngineEvent {
        EngineEvent {
            kind,
            action,
            subject_id: "s1".into(),
        }
    }

    #[test]
    fn container_notifications() {
        let id = EngineId::from("docker.default");
        let n = RegistryNotification::for_event(&id, &event(EventKind::Container, EventAction::Destroy)).unwrap();
        assert_eq!(n.name(), "container-removed");
        let n = RegistryNotification::for_event(&id, &event(EventKind::Container, EventAction::Kill)).unwrap();
        assert_eq!(n.name(), "container-killed");
    }

    #[test]
    fn image_and_generic_notifications() {
        let id = EngineId::from("podman.machine");
        let n = RegistryNotification::for_event(&id, &event(EventKind::Image, EventAction::LoadFromArchive)).unwrap();
        assert_eq!(n.name(), "image-loaded");
        let n = RegistryNotification::for_event(&id, &event(EventKind::Volume, EventAction::Create)).unwrap();
        assert_eq!(n, RegistryNotification::VolumeChanged { engine_id: id.clone() });
        assert!(RegistryNotification::for_event(&id, &event(EventKind::Image, EventAction::Start)).is_none());
    }

    #[tokio::test]
    async fn publish_reaches_both_channels() {
        let bus = EventBus::new();
        let mut events = bus.subscribe_events();
        let mut notes = bus.subscribe_notifications();
        let id = EngineId::from("docker.default");

        bus.publish(&id, event(EventKind::Container, EventAction::Start));

        let tagged = events.recv().await.unwrap();
        assert_eq!(tagged.engine_id, id);
        assert_eq!(tagged.event.action, EventAction::Start);
        assert_eq!(notes.recv().await.unwrap().name(), "container-started");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(&EngineId::from("a.b"), event(EventKind::Pod, EventAction::Create));
        bus.notify(RegistryNotification::EnginesChanged);
    }

    #[test]
    fn notification_serializes_with_type_tag() {
        let n = RegistryNotification::EngineConnected {
            engine_id: EngineId::from("docker.default"),
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["type"], "engine-connected");
        assert_eq!(v["engine_id"], "docker.default");
    }
}
