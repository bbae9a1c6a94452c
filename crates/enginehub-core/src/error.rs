//! Error taxonomy for the engine registry.
//!
//! Every fallible operation in the crate returns [`Result`]. Callers that
//! need to tell "no engine" apart from "engine said no" match on the
//! variants; the aggregation layer uses [`EngineError::is_transient`] only
//! for log levels, never to decide whether to propagate.

use crate::model::EngineId;

/// Convenience alias used across the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Errors produced by the registry and its engine adapters.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No connected engine matches the requested id.
    #[error("no running engine matches {engine_id}")]
    NoRunningEngine { engine_id: EngineId },

    /// The operation needs the native API but the engine only speaks compat.
    #[error("engine {engine_id} does not support {capability} (native API required)")]
    CapabilityMissing {
        engine_id: EngineId,
        capability: &'static str,
    },

    /// The engine answered with an error status.
    #[error("engine returned status {status}: {message}")]
    Api { status: u16, message: String },

    /// An engine command-line client exited with a non-zero status.
    #[error("{command} failed (exit {code}): {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Transport-level I/O failure (socket drop, broken pipe, spawn failure).
    #[error("engine transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine sent a payload that could not be decoded.
    #[error("failed to decode engine payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A stream ended before delivering what the operation needed.
    #[error("stream closed: {0}")]
    StreamClosed(String),

    /// A referenced object (container, exec session, stats consumer) is gone.
    #[error("{0} not found")]
    NotFound(String),

    /// The adapter cannot perform this operation at all.
    #[error("operation not supported by this engine client: {0}")]
    Unsupported(&'static str),
}

impl EngineError {
    /// Build an [`EngineError::NoRunningEngine`] for `engine_id`.
    pub fn no_engine(engine_id: &EngineId) -> Self {
        Self::NoRunningEngine {
            engine_id: engine_id.clone(),
        }
    }

    /// Build an [`EngineError::CapabilityMissing`] for `engine_id`.
    pub fn capability(engine_id: &EngineId, capability: &'static str) -> Self {
        Self::CapabilityMissing {
            engine_id: engine_id.clone(),
            capability,
        }
    }

    /// Whether this failure is expected to clear up on its own
    /// (transport hiccups, closed streams) rather than being a hard refusal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::StreamClosed(_))
    }

    /// HTTP-ish status code carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
