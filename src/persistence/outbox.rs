// =============================================================================
// Outbox — ordered, retrying queue of store writes
// =============================================================================
//
// Producers push synchronously (cheap, safe to call while holding a ledger
// lock) and then call `flush`. A single flusher at a time drains the queue
// front to back; the first failure stops the drain so writes for the same
// key never land out of order. Whatever is left is retried by the next
// flush, either from the next mutation or from the periodic task in `main`.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use super::Store;
use crate::audit::VerdictRecord;
use crate::position_ledger::{Position, Trade};

/// A write that has not yet been acknowledged by the store.
#[derive(Debug, Clone)]
pub enum PendingWrite {
    Position(Position),
    Trade(Trade),
    Verdict(VerdictRecord),
}

impl PendingWrite {
    fn kind(&self) -> &'static str {
        match self {
            Self::Position(_) => "position",
            Self::Trade(_) => "trade",
            Self::Verdict(_) => "verdict",
        }
    }
}

/// Result of one drain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub written: usize,
    pub remaining: usize,
}

pub struct Outbox {
    store: Arc<dyn Store>,
    pending: Mutex<VecDeque<PendingWrite>>,
    flush_guard: tokio::sync::Mutex<()>,
    write_timeout: Duration,
}

impl Outbox {
    pub fn new(store: Arc<dyn Store>, write_timeout: Duration) -> Self {
        Self {
            store,
            pending: Mutex::new(VecDeque::new()),
            flush_guard: tokio::sync::Mutex::new(()),
            write_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Queue a write. Does not touch the store.
    pub fn push(&self, write: PendingWrite) {
        self.pending.lock().push_back(write);
    }

    /// Number of writes not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drain queued writes in order until the queue is empty or a write
    /// fails.
    pub async fn flush(&self) -> FlushReport {
        let _guard = self.flush_guard.lock().await;
        let mut written = 0;

        loop {
            let next = self.pending.lock().front().cloned();
            let Some(write) = next else { break };

            match tokio::time::timeout(self.write_timeout, self.write(&write)).await {
                Ok(Ok(())) => {
                    self.pending.lock().pop_front();
                    written += 1;
                }
                Ok(Err(e)) => {
                    warn!(kind = write.kind(), error = %e, "store write failed, kept in outbox");
                    break;
                }
                Err(_) => {
                    warn!(
                        kind = write.kind(),
                        timeout_ms = self.write_timeout.as_millis() as u64,
                        "store write timed out, kept in outbox"
                    );
                    break;
                }
            }
        }

        let remaining = self.pending();
        if written > 0 || remaining > 0 {
            debug!(written, remaining, "outbox flushed");
        }
        FlushReport { written, remaining }
    }

    async fn write(&self, write: &PendingWrite) -> anyhow::Result<()> {
        match write {
            PendingWrite::Position(p) => self.store.save_position(p).await,
            PendingWrite::Trade(t) => self.store.append_trade(t).await,
            PendingWrite::Verdict(v) => self.store.append_verdict(v).await,
        }
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("pending", &self.pending())
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}
