//! Background tasks driving the per-endpoint state machine.
//!
//! Both tasks hold only a `Weak` to the registry so a dropped registry
//! stops them, and both exit as soon as the registration's stop token fires.

use std::sync::Weak;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::RegistryInner;
use crate::model::EngineId;

/// Re-check the endpoint's status every `period` until `stop` fires.
pub(super) fn spawn_status_poll(
    registry: Weak<RegistryInner>,
    engine_id: EngineId,
    registration: u64,
    stop: CancellationToken,
    period: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; registration already checked.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = registry.upgrade() else {
                break;
            };
            inner.check_status(&engine_id, registration);
        }
        debug!(engine_id = %engine_id, "status poll stopped");
    });
}

/// Retry opening the endpoint after `delay`, repeating while attempts fail.
///
/// Each attempt re-validates registration and status after the sleep, so
/// the loop ends by itself once the endpoint is gone or stopped.
pub(super) fn spawn_reconnect(
    registry: Weak<RegistryInner>,
    engine_id: EngineId,
    registration: u64,
    stop: CancellationToken,
    delay: Duration,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!(engine_id = %engine_id, "reconnect cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            let Some(inner) = registry.upgrade() else {
                return;
            };
            if !inner.try_reconnect(&engine_id, registration) {
                return;
            }
        }
    });
}
