//! Registry setup shared by every engine-facing command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use enginehub_core::{
    CliConnector, ConnectionGuard, ConnectionStatus, EngineId, EngineRegistry, Registration,
    TracingTelemetry,
};

use crate::config::HubConfig;

/// How long to wait for configured engines to come up.
const CONNECT_WAIT: Duration = Duration::from_secs(3);
const CONNECT_POLL: Duration = Duration::from_millis(50);

/// A registry with every configured engine registered.
pub struct Hub {
    pub registry: EngineRegistry,
    guards: Vec<ConnectionGuard>,
}

impl Hub {
    /// Build the registry, register each configured engine as always
    /// started, and wait briefly for the connections.
    pub async fn connect(config: HubConfig) -> Result<Self> {
        let registry = EngineRegistry::builder(Arc::new(CliConnector::new()))
            .config(config.registry)
            .telemetry(Arc::new(TracingTelemetry))
            .auth(Arc::new(config.auth))
            .build();

        let guards: Vec<ConnectionGuard> = config
            .engines
            .iter()
            .map(|engine| {
                debug!(engine = %engine.endpoint().id(), address = %engine.address, "registering engine");
                registry.register(Registration::new(
                    engine.endpoint(),
                    Arc::new(|| ConnectionStatus::Started),
                ))
            })
            .collect();

        let ids: Vec<EngineId> = guards.iter().map(|g| g.engine_id().clone()).collect();
        let deadline = tokio::time::Instant::now() + CONNECT_WAIT;
        while !ids.iter().all(|id| registry.is_connected(id)) {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(CONNECT_POLL).await;
        }
        for id in ids.iter().filter(|id| !registry.is_connected(id)) {
            warn!(engine = %id, "engine did not connect");
        }

        Ok(Self { registry, guards })
    }

    /// Resolve the engine a single-target command addresses.
    ///
    /// An explicit id is used as given; otherwise exactly one engine must be
    /// connected.
    pub fn engine(&self, explicit: Option<&str>) -> Result<EngineId> {
        if let Some(id) = explicit {
            return Ok(EngineId::from(id));
        }
        let connected: Vec<EngineId> = self
            .guards
            .iter()
            .map(|g| g.engine_id().clone())
            .filter(|id| self.registry.is_connected(id))
            .collect();
        match connected.as_slice() {
            [only] => Ok(only.clone()),
            [] => bail!("no engine is connected"),
            _ => bail!(
                "several engines are connected ({}); pick one with --engine",
                connected
                    .iter()
                    .map(EngineId::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    /// Unregister everything and stop background tasks.
    pub fn close(self) {
        for guard in self.guards {
            guard.dispose();
        }
        self.registry.shutdown();
    }
}

/// Token cancelled on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling");
            child.cancel();
        }
    });
    token
}
