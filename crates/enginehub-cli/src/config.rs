//! Configuration file management for enginehub.
//!
//! Provides a TOML-based config file at `~/.config/enginehub/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use enginehub_core::{AuthConfig, EngineEndpoint, EngineKind, RegistryConfig, StaticAuth};

/// Env var naming an alternative config file.
pub const CONFIG_ENV: &str = "ENGINEHUB_CONFIG";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub engines: Vec<EngineSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistrySection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auth: Vec<AuthSection>,
}

/// One `[[engines]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSection {
    pub provider: String,
    pub name: String,
    pub address: String,
    pub kind: EngineKind,
}

impl EngineSection {
    pub fn endpoint(&self) -> EngineEndpoint {
        EngineEndpoint::new(&self.provider, &self.name, &self.address, self.kind)
    }
}

/// Optional `[registry]` overrides, all in milliseconds except `replay_chunks`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySection {
    pub status_poll_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub replay_chunks: Option<usize>,
    pub exec_poll_ms: Option<u64>,
}

impl RegistrySection {
    /// Value this section supplies for a `RegistryConfig` env key.
    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "ENGINEHUB_STATUS_POLL_MS" => self.status_poll_ms.map(|v| v.to_string()),
            "ENGINEHUB_RECONNECT_DELAY_MS" => self.reconnect_delay_ms.map(|v| v.to_string()),
            "ENGINEHUB_REPLAY_CHUNKS" => self.replay_chunks.map(|v| v.to_string()),
            "ENGINEHUB_EXEC_POLL_MS" => self.exec_poll_ms.map(|v| v.to_string()),
            _ => None,
        }
    }
}

/// One `[[auth]]` entry: credentials for a registry host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSection {
    pub server_address: String,
    pub username: String,
    pub password: String,
}

/// Engines assumed when no config file exists.
pub fn default_engines() -> Vec<EngineSection> {
    vec![
        EngineSection {
            provider: "podman".to_string(),
            name: "default".to_string(),
            address: "unix:///run/podman/podman.sock".to_string(),
            kind: EngineKind::Native,
        },
        EngineSection {
            provider: "docker".to_string(),
            name: "default".to_string(),
            address: "unix:///var/run/docker.sock".to_string(),
            kind: EngineKind::Compat,
        },
    ]
}

/// The file `enginehub init` writes.
pub fn starter_config() -> ConfigFile {
    ConfigFile {
        engines: default_engines(),
        registry: Some(RegistrySection {
            status_poll_ms: Some(RegistryConfig::DEFAULT_STATUS_POLL.as_millis() as u64),
            reconnect_delay_ms: Some(RegistryConfig::DEFAULT_RECONNECT_DELAY.as_millis() as u64),
            replay_chunks: Some(RegistryConfig::DEFAULT_REPLAY_CHUNKS),
            exec_poll_ms: Some(RegistryConfig::DEFAULT_EXEC_POLL.as_millis() as u64),
        }),
        auth: Vec::new(),
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the enginehub config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/enginehub` or
/// `~/.config/enginehub`, also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("enginehub");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("enginehub")
}

/// Return the default path of the config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse a config file. Returns an error if it does not exist.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Serialize and write a config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix since `[[auth]]` holds passwords.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct HubConfig {
    /// The file that was read, if any.
    pub source: Option<PathBuf>,
    pub engines: Vec<EngineSection>,
    pub registry: RegistryConfig,
    pub auth: StaticAuth,
}

impl HubConfig {
    /// Resolve configuration from the process environment.
    pub fn resolve(cli_config: Option<&Path>) -> Result<Self> {
        Self::resolve_with(cli_config, |key| std::env::var(key).ok())
    }

    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - File: `cli_config` > `ENGINEHUB_CONFIG` > [`config_path`]. An
    ///   explicitly named file must exist; a missing default file means
    ///   defaults.
    /// - Registry timings: `ENGINEHUB_*` env > `[registry]` > built-in default.
    /// - Engines: `[[engines]]` > [`default_engines`].
    pub fn resolve_with(
        cli_config: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let (path, explicit) = match (cli_config, lookup(CONFIG_ENV)) {
            (Some(p), _) => (p.to_path_buf(), true),
            (None, Some(p)) => (PathBuf::from(p), true),
            (None, None) => (config_path(), false),
        };

        let file = if path.exists() {
            Some(load_config(&path)?)
        } else if explicit {
            bail!("config file {} does not exist", path.display());
        } else {
            None
        };

        let source = file.as_ref().map(|_| path.clone());
        let section = file
            .as_ref()
            .and_then(|f| f.registry.clone())
            .unwrap_or_default();
        let registry = RegistryConfig::from_lookup(|key| lookup(key).or_else(|| section.lookup(key)));

        let (engines, auth_sections) = match file {
            Some(f) if !f.engines.is_empty() => (f.engines, f.auth),
            Some(f) => (default_engines(), f.auth),
            None => (default_engines(), Vec::new()),
        };

        let mut auth = StaticAuth::new();
        for a in auth_sections {
            auth.insert(AuthConfig {
                username: a.username,
                password: a.password,
                server_address: a.server_address,
            });
        }

        Ok(Self {
            source,
            engines,
            registry,
            auth,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    fn write(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn starter_config_roundtrips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        save_config(&path, &starter_config()).unwrap();
        let loaded = load_config(&path).unwrap();

        assert_eq!(loaded.engines, default_engines());
        assert_eq!(loaded.registry.unwrap().replay_chunks, Some(100));
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        save_config(&path, &starter_config()).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn parses_engines_registry_and_auth() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            r#"
[[engines]]
provider = "podman"
name = "machine"
address = "ssh://core@127.0.0.1:2222/run/podman/podman.sock"
kind = "native"

[registry]
reconnect_delay_ms = 250

[[auth]]
server_address = "quay.io"
username = "robot"
password = "hunter2"
"#,
        );

        let cfg = HubConfig::resolve_with(Some(&path), env(&[])).unwrap();
        assert_eq!(cfg.source.as_deref(), Some(path.as_path()));
        assert_eq!(cfg.engines.len(), 1);
        assert_eq!(cfg.engines[0].endpoint().id().as_str(), "podman.machine");
        assert_eq!(cfg.engines[0].kind, EngineKind::Native);
        assert_eq!(cfg.registry.reconnect_delay, Duration::from_millis(250));
        assert_eq!(cfg.registry.status_poll_interval, RegistryConfig::DEFAULT_STATUS_POLL);
        assert!(!cfg.auth.is_empty());
    }

    #[test]
    fn env_var_overrides_config_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(tmp.path(), "[registry]\nstatus_poll_ms = 900\n");

        let cfg = HubConfig::resolve_with(
            Some(&path),
            env(&[("ENGINEHUB_STATUS_POLL_MS", "100")]),
        )
        .unwrap();
        assert_eq!(cfg.registry.status_poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn cli_flag_overrides_env_config_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let flag = write(tmp.path(), "[registry]\nreplay_chunks = 7\n");

        let cfg = HubConfig::resolve_with(
            Some(&flag),
            env(&[(CONFIG_ENV, "/nonexistent/enginehub.toml")]),
        )
        .unwrap();
        assert_eq!(cfg.registry.replay_buffer_chunks, 7);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let result = HubConfig::resolve_with(
            None,
            env(&[(CONFIG_ENV, "/nonexistent/enginehub.toml")]),
        );
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("does not exist"), "unexpected error: {msg}");
    }

    #[test]
    fn empty_engine_list_falls_back_to_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(tmp.path(), "engines = []\n");

        let cfg = HubConfig::resolve_with(Some(&path), env(&[])).unwrap();
        assert_eq!(cfg.engines, default_engines());
        assert_eq!(cfg.registry, RegistryConfig::default());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "[[engines]]\nprovider = \"x\"\nname = \"y\"\naddress = \"unix:///z\"\nkind = \"lxc\"\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("enginehub/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
