//! Pure mapping from raw engine event JSON to [`EngineEvent`].

use serde::Serialize;
use serde_json::Value;

/// Resource category an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Container,
    Image,
    Pod,
    Volume,
    Network,
}

/// What happened to the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Create,
    Start,
    Die,
    Stop,
    Kill,
    Destroy,
    Remove,
    Pull,
    Tag,
    Untag,
    Build,
    LoadFromArchive,
}

/// A normalized engine event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineEvent {
    pub kind: EventKind,
    pub action: EventAction,
    pub subject_id: String,
}

/// Map one raw event object to an [`EngineEvent`].
///
/// Both dialects are accepted: the compat feed's `status`/`Action` and `id`/
/// `Actor.ID` fields, and the native feed's `Status`/`ID`. An event with no
/// `Type` is a legacy container event. Returns `None` for every kind/action
/// combination the registry does not republish.
pub fn normalize(raw: &Value) -> Option<EngineEvent> {
    let action = str_field(raw, &["status", "Action", "Status"])?;
    // Compat actions carry detail after a colon (`exec_start: sh`).
    let action = action.split(':').next().unwrap_or_default().trim();
    let kind = match str_field(raw, &["Type", "type"]) {
        Some(kind) => parse_kind(kind)?,
        None => EventKind::Container,
    };
    let action = map_action(kind, &action.to_ascii_lowercase())?;

    let subject_id = str_field(raw, &["id", "ID"])
        .or_else(|| raw.get("Actor").and_then(|a| a.get("ID")).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    Some(EngineEvent {
        kind,
        action,
        subject_id,
    })
}

fn str_field<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| raw.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn parse_kind(kind: &str) -> Option<EventKind> {
    match kind.to_ascii_lowercase().as_str() {
        "container" => Some(EventKind::Container),
        "image" => Some(EventKind::Image),
        "pod" => Some(EventKind::Pod),
        "volume" => Some(EventKind::Volume),
        "network" => Some(EventKind::Network),
        _ => None,
    }
}

fn map_action(kind: EventKind, action: &str) -> Option<EventAction> {
    use EventAction::*;
    match (kind, action) {
        (EventKind::Container, "create") => Some(Create),
        (EventKind::Container, "start") => Some(Start),
        (EventKind::Container, "die") => Some(Die),
        (EventKind::Container, "stop") => Some(Stop),
        (EventKind::Container, "kill") => Some(Kill),
        (EventKind::Container, "destroy") => Some(Destroy),
        (EventKind::Container, "remove") => Some(Remove),

        (EventKind::Image, "pull") => Some(Pull),
        (EventKind::Image, "tag") => Some(Tag),
        (EventKind::Image, "untag") => Some(Untag),
        (EventKind::Image, "remove" | "delete") => Some(Remove),
        (EventKind::Image, "build") => Some(Build),
        (EventKind::Image, "loadfromarchive" | "load") => Some(LoadFromArchive),

        (EventKind::Pod, "create") => Some(Create),
        (EventKind::Pod, "start") => Some(Start),
        (EventKind::Pod, "stop") => Some(Stop),
        (EventKind::Pod, "kill") => Some(Kill),
        (EventKind::Pod, "remove") => Some(Remove),

        (EventKind::Volume | EventKind::Network, "create") => Some(Create),
        (EventKind::Volume | EventKind::Network, "destroy") => Some(Destroy),
        (EventKind::Volume | EventKind::Network, "remove") => Some(Remove),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compat_container_start() {
        let ev = normalize(&json!({
            "status": "start", "id": "abc", "Type": "container", "Action": "start",
            "Actor": {"ID": "abc", "Attributes": {"name": "web"}}
        }))
        .unwrap();
        assert_eq!(ev.kind, EventKind::Container);
        assert_eq!(ev.action, EventAction::Start);
        assert_eq!(ev.subject_id, "abc");
    }

    #[test]
    fn native_field_names() {
        let ev = normalize(&json!({"Status": "remove", "Type": "pod", "ID": "p1"})).unwrap();
        assert_eq!(ev.kind, EventKind::Pod);
        assert_eq!(ev.action, EventAction::Remove);
        assert_eq!(ev.subject_id, "p1");
    }

    #[test]
    fn actor_id_fallback_and_action_field() {
        let ev = normalize(&json!({"Type": "network", "Action": "create", "Actor": {"ID": "n1"}})).unwrap();
        assert_eq!(ev.kind, EventKind::Network);
        assert_eq!(ev.subject_id, "n1");
    }

    #[test]
    fn missing_type_is_container() {
        let ev = normalize(&json!({"status": "die", "id": "c9"})).unwrap();
        assert_eq!(ev.kind, EventKind::Container);
        assert_eq!(ev.action, EventAction::Die);
    }

    #[test]
    fn image_aliases() {
        let del = normalize(&json!({"status": "delete", "Type": "image", "id": "sha256:1"})).unwrap();
        assert_eq!(del.action, EventAction::Remove);
        let load = normalize(&json!({"status": "load", "Type": "image", "id": "i"})).unwrap();
        assert_eq!(load.action, EventAction::LoadFromArchive);
    }

    #[test]
    fn action_detail_is_stripped_before_mapping() {
        assert!(normalize(&json!({"status": "exec_start: sh", "Type": "container", "id": "c"})).is_none());
        assert!(normalize(&json!({"status": "health_status: healthy", "Type": "container"})).is_none());
    }

    #[test]
    fn unmapped_combinations_are_dropped() {
        assert!(normalize(&json!({"status": "pull", "Type": "container", "id": "c"})).is_none());
        assert!(normalize(&json!({"status": "connect", "Type": "network", "id": "n"})).is_none());
        assert!(normalize(&json!({"status": "start", "Type": "daemon"})).is_none());
        assert!(normalize(&json!({"Type": "container", "id": "c"})).is_none());
        assert!(normalize(&json!("not an object")).is_none());
    }
}
