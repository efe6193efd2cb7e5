// =============================================================================
// Verdict Audit Log — append-only record of every processed signal
// =============================================================================
//
// One VerdictRecord is written per signal that passed ingestion, whatever
// the outcome (trade, skipped duplicate, no trade). The ValidationReporter
// reads this history to count signals and accepted entries.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::persistence::{Outbox, PendingWrite};
use crate::types::{Action, SignalType};

/// What execution did with the final action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Opened,
    Closed,
    /// BUY on an already-open symbol.
    AlreadyOpen,
    /// SELL on a flat symbol.
    NothingToSell,
    /// HOLD / PASS / SKIP.
    NoTrade,
    /// The ledger refused the order terms (e.g. non-positive price).
    Rejected,
}

/// Auditable record of one signal's journey through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub signal_id: String,
    pub symbol: String,
    pub signal_type: SignalType,
    /// Raw text of every sub-evaluation, in the order they were produced.
    pub sub_verdicts: Vec<String>,
    pub final_action: Action,
    pub outcome: OutcomeKind,
    /// Price the action was executed (or evaluated) at.
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

pub struct AuditLog {
    records: RwLock<Vec<VerdictRecord>>,
    outbox: Option<Arc<Outbox>>,
}

impl AuditLog {
    pub fn new(outbox: Option<Arc<Outbox>>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            outbox,
        }
    }

    /// Reload history from the outbox's store; degrade to empty on failure.
    pub async fn restore(outbox: Arc<Outbox>) -> Self {
        let records = outbox.store().load_verdicts().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to load verdict history, starting empty");
            Vec::new()
        });
        Self {
            records: RwLock::new(records),
            outbox: Some(outbox),
        }
    }

    /// Append a record and try to make it durable.
    pub async fn append(&self, record: VerdictRecord) {
        self.records.write().push(record.clone());
        if let Some(outbox) = &self.outbox {
            outbox.push(PendingWrite::Verdict(record));
            let report = outbox.flush().await;
            if report.remaining > 0 {
                warn!(remaining = report.remaining, "verdict record not yet durable, kept in outbox");
            }
        }
    }

    /// Full history, oldest first.
    pub fn records(&self) -> Vec<VerdictRecord> {
        self.records.read().clone()
    }

    /// The most recent `count` records, newest first.
    pub fn recent(&self, count: usize) -> Vec<VerdictRecord> {
        self.records.read().iter().rev().take(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").field("records", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::MemoryStore;
    use std::time::Duration;

    fn record(id: &str, action: Action) -> VerdictRecord {
        VerdictRecord {
            signal_id: id.to_string(),
            symbol: "BTCUSD".into(),
            signal_type: SignalType::BuySignal,
            sub_verdicts: vec!["VERDICT: BUY".into()],
            final_action: action,
            outcome: OutcomeKind::NoTrade,
            price: 100.0,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn recent_is_newest_first() {
        let log = AuditLog::new(None);
        log.append(record("a", Action::Skip)).await;
        log.append(record("b", Action::Hold)).await;
        log.append(record("c", Action::Buy)).await;

        let ids: Vec<String> = log.recent(2).into_iter().map(|r| r.signal_id).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert_eq!(log.len(), 3);
        assert_eq!(log.records()[0].signal_id, "a");
    }

    #[tokio::test]
    async fn records_survive_restore() {
        let store = Arc::new(MemoryStore::default());
        let outbox = Arc::new(Outbox::new(store.clone(), Duration::from_secs(1)));
        let log = AuditLog::new(Some(outbox.clone()));
        log.append(record("a", Action::Pass)).await;

        let restored = AuditLog::restore(outbox).await;
        assert_eq!(restored.records(), log.records());
    }

    #[test]
    fn record_serialises_with_wire_names() {
        let json = serde_json::to_value(record("x", Action::Skip)).unwrap();
        assert_eq!(json["signal_type"], "BUY_SIGNAL");
        assert_eq!(json["final_action"], "SKIP");
        assert_eq!(json["outcome"], "no_trade");
    }
}
