//! Container engine registry.
//!
//! Multiplexes any number of local or remote container engines behind one
//! model. Engines are registered as endpoints with a status source; the
//! registry connects to each while it reports `started`, normalizes its
//! event feed onto a shared bus, fans queries out across every connected
//! engine and keeps long-lived streams (attach, stats, shells) alive for
//! their consumers.
//!
//! # Architecture
//!
//! ```text
//! Registration --register--> EngineRegistry
//!                                |  status poll / reconnect (connection)
//!                                |  EngineConnector -> EngineHandle (engine)
//!                                |  raw feed -> normalize -> EventBus (events)
//!                                v
//!                 list_* fan-out (aggregate)    attach / exec / stats (streaming)
//! ```

pub mod aggregate;
pub mod auth;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod streaming;
pub mod telemetry;

// Re-export the primary public API at the crate root.
pub use auth::{AuthConfig, AuthProvider, NoAuth, StaticAuth};
pub use config::RegistryConfig;
pub use connection::{ConnectionGuard, EngineRegistry, RegistryBuilder};
pub use engine::{CliConnector, CompatApi, EngineConnector, EngineHandle, NativeApi};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventAction, EventKind, RegistryNotification, TaggedEvent};
pub use model::*;
pub use streaming::{AttachSubscription, BuildEvent, PullEvent, ShellSession, StreamEvent};
pub use telemetry::{NoopTelemetry, Telemetry, TracingTelemetry};
