use std::env;
use std::time::Duration;

/// Timing and buffering knobs for the registry.
///
/// Reads overrides from `ENGINEHUB_*` environment variables, falling back to
/// the defaults below when a variable is unset or unparsable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// How often each registered endpoint's status is re-checked.
    pub status_poll_interval: Duration,
    /// Delay before reconnecting after an event-feed failure.
    pub reconnect_delay: Duration,
    /// Number of chunks kept for late attach subscribers.
    pub replay_buffer_chunks: usize,
    /// Fallback poll of an exec's running state.
    pub exec_poll_interval: Duration,
}

impl RegistryConfig {
    pub const DEFAULT_STATUS_POLL: Duration = Duration::from_secs(2);
    pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
    pub const DEFAULT_REPLAY_CHUNKS: usize = 100;
    pub const DEFAULT_EXEC_POLL: Duration = Duration::from_secs(1);

    /// Build a config from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (testable without env vars).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            status_poll_interval: millis("ENGINEHUB_STATUS_POLL_MS", Self::DEFAULT_STATUS_POLL),
            reconnect_delay: millis("ENGINEHUB_RECONNECT_DELAY_MS", Self::DEFAULT_RECONNECT_DELAY),
            replay_buffer_chunks: lookup("ENGINEHUB_REPLAY_CHUNKS")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(Self::DEFAULT_REPLAY_CHUNKS),
            exec_poll_interval: millis("ENGINEHUB_EXEC_POLL_MS", Self::DEFAULT_EXEC_POLL),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            status_poll_interval: Self::DEFAULT_STATUS_POLL,
            reconnect_delay: Self::DEFAULT_RECONNECT_DELAY,
            replay_buffer_chunks: Self::DEFAULT_REPLAY_CHUNKS,
            exec_poll_interval: Self::DEFAULT_EXEC_POLL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let cfg = RegistryConfig::default();
        assert_eq!(cfg.status_poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(5));
        assert_eq!(cfg.replay_buffer_chunks, 100);
        assert_eq!(cfg.exec_poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn empty_lookup_yields_defaults() {
        assert_eq!(RegistryConfig::from_lookup(|_| None), RegistryConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ENGINEHUB_STATUS_POLL_MS", "250"),
            ("ENGINEHUB_RECONNECT_DELAY_MS", "1000"),
            ("ENGINEHUB_REPLAY_CHUNKS", "10"),
        ]);
        let cfg = RegistryConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.status_poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(1));
        assert_eq!(cfg.replay_buffer_chunks, 10);
        assert_eq!(cfg.exec_poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn garbage_and_zero_fall_back() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ENGINEHUB_STATUS_POLL_MS", "soon"),
            ("ENGINEHUB_REPLAY_CHUNKS", "0"),
        ]);
        let cfg = RegistryConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.status_poll_interval, RegistryConfig::DEFAULT_STATUS_POLL);
        assert_eq!(cfg.replay_buffer_chunks, RegistryConfig::DEFAULT_REPLAY_CHUNKS);
    }
}
