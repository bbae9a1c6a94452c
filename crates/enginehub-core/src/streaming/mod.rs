//! Streaming operations: attach, exec, shell, logs, stats, image transfer.
//!
//! The registry keeps two shared maps here: live attach streams keyed by
//! `(engine, container)` and stats consumers keyed by a monotonically
//! increasing id. Each entry is removed at the same point the stream's
//! natural end would remove it, whether the stream ends, fails or is
//! cancelled.
//!
//! Long-running operations take a [`CancellationToken`]; cancelling it drops
//! the engine stream, which releases the underlying process or socket, and
//! the operation returns [`EngineError::Cancelled`](crate::EngineError::Cancelled).

pub mod attach;
pub mod exec;
pub mod replay;
pub mod stats;
pub mod transfer;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::model::EngineId;

pub use attach::AttachSubscription;
pub use exec::ShellSession;
pub use replay::ReplayBuffer;
pub use transfer::{BuildEvent, PullEvent};

/// What a stream consumer observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data(Vec<u8>),
    Error(String),
    End,
}

pub(crate) type AttachKey = (EngineId, String);
pub(crate) type AttachMap = Arc<Mutex<HashMap<AttachKey, Arc<attach::LiveStream>>>>;
pub(crate) type StatsMap = Arc<Mutex<HashMap<u64, stats::StatsEntry>>>;

/// Stream bookkeeping owned by the registry.
pub(crate) struct StreamState {
    pub(crate) replay_chunks: usize,
    pub(crate) attach: AttachMap,
    pub(crate) stats: StatsMap,
    pub(crate) next_stats_id: AtomicU64,
}

impl StreamState {
    pub(crate) fn new(replay_chunks: usize) -> Self {
        Self {
            replay_chunks,
            attach: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(Mutex::new(HashMap::new())),
            next_stats_id: AtomicU64::new(1),
        }
    }

    /// Cancel every live stream and stats consumer.
    pub(crate) fn close_all(&self) {
        let live: Vec<_> = lock(&self.attach).drain().map(|(_, live)| live).collect();
        for stream in live {
            stream.cancel();
        }
        let consumers: Vec<_> = lock(&self.stats).drain().map(|(_, entry)| entry).collect();
        for entry in consumers {
            entry.cancel.cancel();
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Await `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = crate::Result<T>>,
) -> crate::Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(crate::EngineError::Cancelled),
        result = fut => result,
    }
}
