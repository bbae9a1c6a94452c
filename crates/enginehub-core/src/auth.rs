//! Registry credential lookup consumed by pull, push and build.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Credentials for one image registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub server_address: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("server_address", &self.server_address)
            .finish()
    }
}

/// Looks up credentials for an image reference.
pub trait AuthProvider: Send + Sync {
    fn auth_for_image(&self, image: &str) -> Option<AuthConfig>;
}

/// Provider that never has credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

impl AuthProvider for NoAuth {
    fn auth_for_image(&self, _image: &str) -> Option<AuthConfig> {
        None
    }
}

/// Fixed credentials keyed by registry host.
#[derive(Debug, Default, Clone)]
pub struct StaticAuth {
    by_host: HashMap<String, AuthConfig>,
}

impl StaticAuth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add credentials for `auth.server_address`, replacing earlier ones.
    pub fn insert(&mut self, auth: AuthConfig) {
        self.by_host.insert(auth.server_address.clone(), auth);
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }
}

impl AuthProvider for StaticAuth {
    fn auth_for_image(&self, image: &str) -> Option<AuthConfig> {
        self.by_host.get(registry_host(image)).cloned()
    }
}

/// Registry host of an image reference, defaulting to Docker Hub.
///
/// `quay.io/podman/hello` -> `quay.io`, `alpine` -> `docker.io`,
/// `localhost:5000/app` -> `localhost:5000`.
pub fn registry_host(image: &str) -> &str {
    match image.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first
        }
        _ => "docker.io",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_host_detection() {
        assert_eq!(registry_host("alpine"), "docker.io");
        assert_eq!(registry_host("library/alpine:3"), "docker.io");
        assert_eq!(registry_host("quay.io/podman/hello"), "quay.io");
        assert_eq!(registry_host("localhost:5000/app"), "localhost:5000");
        assert_eq!(registry_host("localhost/app"), "localhost");
    }

    #[test]
    fn static_auth_matches_by_host() {
        let mut auth = StaticAuth::new();
        auth.insert(AuthConfig {
            username: "bot".into(),
            password: "pw".into(),
            server_address: "quay.io".into(),
        });
        assert_eq!(auth.auth_for_image("quay.io/org/app:1").unwrap().username, "bot");
        assert!(auth.auth_for_image("alpine").is_none());
        assert!(!auth.is_empty());
    }

    #[test]
    fn debug_redacts_password() {
        let auth = AuthConfig {
            username: "me".into(),
            password: "hunter2".into(),
            server_address: "quay.io".into(),
        };
        let dbg = format!("{auth:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("redacted"));
    }
}
