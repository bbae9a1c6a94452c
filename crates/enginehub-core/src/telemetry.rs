//! Telemetry sink consumed around every public registry operation.
//!
//! Sinks are fire-and-forget: `track` returns nothing and the registry never
//! waits on it, so a broken sink cannot change an operation's outcome.

use std::time::Duration;

use serde_json::{Map, Value, json};

/// A fire-and-forget telemetry sink.
pub trait Telemetry: Send + Sync {
    fn track(&self, event: &str, properties: Value);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn track(&self, _event: &str, _properties: Value) {}
}

/// Sink that forwards events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn track(&self, event: &str, properties: Value) {
        tracing::debug!(telemetry_event = event, properties = %properties, "telemetry");
    }
}

/// Build the property bag recorded for one finished operation.
pub(crate) fn operation_properties(
    elapsed: Duration,
    error: Option<&dyn std::fmt::Display>,
    extra: Value,
) -> Value {
    let mut props = match extra {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("detail".to_string(), other);
            map
        }
    };
    props.insert("duration_ms".to_string(), json!(elapsed.as_millis() as u64));
    if let Some(err) = error {
        props.insert("error".to_string(), json!(err.to_string()));
    }
    Value::Object(props)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_merge_extra_and_error() {
        let err = std::io::Error::other("boom");
        let props = operation_properties(
            Duration::from_millis(12),
            Some(&err),
            json!({"engine_id": "docker.default"}),
        );
        assert_eq!(props["engine_id"], "docker.default");
        assert_eq!(props["duration_ms"], 12);
        assert_eq!(props["error"], "boom");
    }

    #[test]
    fn properties_without_error_have_no_error_key() {
        let props = operation_properties(Duration::ZERO, None, Value::Null);
        assert!(props.get("error").is_none());
        assert_eq!(props["duration_ms"], 0);
    }

    #[test]
    fn scalar_extra_is_wrapped() {
        let props = operation_properties(Duration::ZERO, None, json!("listing"));
        assert_eq!(props["detail"], "listing");
    }
}
