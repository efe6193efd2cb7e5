// =============================================================================
// Persistence — durable store for positions, trades and the verdict audit log
// =============================================================================
//
// The ledger and audit log are authoritative in memory. Every mutation is
// queued in the `Outbox` and written to a `Store` in FIFO order; failed
// writes stay queued and are retried, so the durable copy can lag but the
// lag is always visible through `Outbox::pending`.

pub mod json_file;
#[cfg(test)]
pub mod memory;
pub mod outbox;

use anyhow::Result;
use async_trait::async_trait;

use crate::audit::VerdictRecord;
use crate::position_ledger::{Position, Trade};

pub use json_file::JsonFileStore;
pub use outbox::{Outbox, PendingWrite};

/// Durable backing for ledger state and the audit trail.
///
/// Positions are keyed by symbol (upsert); trades and verdicts are
/// append-only.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_position(&self, position: &Position) -> Result<()>;
    async fn append_trade(&self, trade: &Trade) -> Result<()>;
    async fn append_verdict(&self, record: &VerdictRecord) -> Result<()>;

    async fn load_positions(&self) -> Result<Vec<Position>>;
    /// Oldest first.
    async fn load_trades(&self) -> Result<Vec<Trade>>;
    /// Oldest first.
    async fn load_verdicts(&self) -> Result<Vec<VerdictRecord>>;
}
