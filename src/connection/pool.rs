//! Session cache keyed by `host:port:user`.
//!
//! The pool holds at most one session per key. Each key has its own async
//! mutex, so concurrent acquires for the same unseen host wait for a single
//! creation instead of racing to open duplicates, while acquires for other
//! hosts proceed independently.
//!
//! On acquire:
//! - a cached session is probed with `echo "ping"`; a failed probe discards it
//! - a new session is confirmed with `echo "connection_test"` before caching
//!
//! Probes run through the pool's [`CommandExecutor`] and count against its
//! bound like any other command.
//!
//! Connection failures are returned as-is. Retrying is the caller's decision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::{
    CommandExecutor, ConnectionError, ConnectionResult, Session, SessionFactory, SessionTarget,
};

/// Probe sent to a cached session before reuse.
pub const REUSE_PROBE: &str = "echo \"ping\"";

/// Round trip sent to a fresh session before it is cached.
pub const LIVENESS_PROBE: &str = "echo \"connection_test\"";

type Slot = Arc<Mutex<Option<Arc<dyn Session>>>>;

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions opened through the factory
    pub created: u64,
    /// Acquires served from the cache
    pub reused: u64,
    /// Cached sessions dropped after a failed probe or explicit discard
    pub discarded: u64,
}

/// Per-key session cache.
pub struct ConnectionPool {
    factory: Arc<dyn SessionFactory>,
    executor: CommandExecutor,
    slots: DashMap<String, Slot>,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl ConnectionPool {
    /// Create an empty pool using `factory` to open sessions.
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self::with_executor(factory, CommandExecutor::default())
    }

    /// Create an empty pool whose probes share `executor`'s bound.
    pub fn with_executor(factory: Arc<dyn SessionFactory>, executor: CommandExecutor) -> Self {
        Self {
            factory,
            executor,
            slots: DashMap::new(),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    fn slot(&self, key: &str) -> Slot {
        Arc::clone(&self.slots.entry(key.to_string()).or_default())
    }

    /// Get a live session for the target, creating one if needed.
    pub async fn acquire(&self, target: &SessionTarget) -> ConnectionResult<Arc<dyn Session>> {
        let key = target.pool_key();
        let slot = self.slot(&key);
        let mut cached = slot.lock().await;

        if let Some(session) = cached.as_ref() {
            if self.probe(session.as_ref(), REUSE_PROBE, target.timeout).await {
                trace!(key = %key, "Reusing cached session");
                self.reused.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(session));
            }
            debug!(key = %key, "Cached session failed probe, reconnecting");
            if let Some(stale) = cached.take() {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = stale.close().await {
                    trace!(key = %key, error = %e, "Closing stale session failed");
                }
            }
        }

        debug!(key = %key, "Opening new session");
        let session = self.factory.connect(target).await?;
        self.created.fetch_add(1, Ordering::Relaxed);

        if !self.probe(session.as_ref(), LIVENESS_PROBE, target.timeout).await {
            warn!(key = %key, "New session failed liveness check");
            let _ = session.close().await;
            return Err(ConnectionError::Protocol(format!(
                "session to {} did not answer the liveness check",
                target.host
            )));
        }

        *cached = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Drop the cached session for a key, if any.
    pub async fn discard(&self, key: &str) {
        let slot = match self.slots.get(key) {
            Some(entry) => Arc::clone(entry.value()),
            None => return,
        };
        let stale = slot.lock().await.take();
        if let Some(session) = stale {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Discarding session");
            let _ = session.close().await;
        }
    }

    /// Close every cached session. Safe to call repeatedly.
    pub async fn close_all(&self) {
        let keys: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, slot)) = self.slots.remove(&key) {
                let session = slot.lock().await.take();
                if let Some(session) = session {
                    if let Err(e) = session.close().await {
                        warn!(key = %key, error = %e, "Error closing session");
                    }
                }
            }
        }
        debug!("All sessions closed");
    }

    /// Number of keys that currently hold a session.
    pub async fn cached_sessions(&self) -> usize {
        let slots: Vec<Slot> = self.slots.iter().map(|e| Arc::clone(e.value())).collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    async fn probe(&self, session: &dyn Session, command: &str, timeout: Duration) -> bool {
        matches!(
            self.executor.execute(session, command, timeout).await,
            Ok(result) if result.exit_ok
        )
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}
