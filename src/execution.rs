// =============================================================================
// Execution Engine — applies a canonical action to the position ledger
// and records the outcome in the verdict audit log
// =============================================================================
//
// BUY  -> ledger.open   (AlreadyOpen  => no-op "already open, skipped")
// SELL -> ledger.close  (NotOpen      => no-op "nothing to sell, skipped")
// HOLD / PASS / SKIP -> no ledger interaction
//
// Execution is idempotent: replaying a BUY on an open symbol or a SELL on a
// flat one leaves the ledger untouched. Every outcome, including no-ops,
// produces exactly one VerdictRecord.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::{AuditLog, OutcomeKind, VerdictRecord};
use crate::position_ledger::{LedgerError, Position, PositionLedger, Trade};
use crate::types::{Action, SignalType};

// ---------------------------------------------------------------------------
// Input / result types
// ---------------------------------------------------------------------------

/// Everything execution needs to act on one resolved signal.
#[derive(Debug, Clone)]
pub struct Decision {
    pub signal_id: String,
    pub symbol: String,
    pub signal_type: SignalType,
    /// Raw sub-evaluation texts, kept for the audit trail.
    pub sub_verdicts: Vec<String>,
    pub action: Action,
    /// Execution price (live price if available, else the signal price).
    pub price: f64,
}

/// Outcome of an execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// A new position was opened.
    Opened { position: Position },
    /// The open position was closed and a trade booked.
    Closed { trade: Trade, cumulative_profit: f64 },
    /// BUY while a position is already open. Nothing changed.
    AlreadyOpen,
    /// SELL while flat. Nothing changed.
    NothingToSell,
    /// HOLD / PASS / SKIP.
    NoTrade { action: Action },
    /// The ledger refused the order terms.
    Rejected { reason: String },
}

impl ExecutionOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Opened { .. } => OutcomeKind::Opened,
            Self::Closed { .. } => OutcomeKind::Closed,
            Self::AlreadyOpen => OutcomeKind::AlreadyOpen,
            Self::NothingToSell => OutcomeKind::NothingToSell,
            Self::NoTrade { .. } => OutcomeKind::NoTrade,
            Self::Rejected { .. } => OutcomeKind::Rejected,
        }
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened { position } => write!(
                f,
                "Opened ${:.2} at ${:.2}",
                position.size_usd.unwrap_or_default(),
                position.entry_price.unwrap_or_default()
            ),
            Self::Closed {
                trade,
                cumulative_profit,
            } => write!(
                f,
                "Closed at ${:.2}: P&L ${:+.2} (cumulative ${:+.2})",
                trade.exit_price, trade.profit, cumulative_profit
            ),
            Self::AlreadyOpen => write!(f, "Position already open, skipped"),
            Self::NothingToSell => write!(f, "Nothing to sell, skipped"),
            Self::NoTrade { action } => write!(f, "No trade ({action})"),
            Self::Rejected { reason } => write!(f, "Rejected: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ExecutionEngine {
    ledger: Arc<PositionLedger>,
    audit: Arc<AuditLog>,
    trade_size_usd: f64,
}

impl ExecutionEngine {
    pub fn new(ledger: Arc<PositionLedger>, audit: Arc<AuditLog>, trade_size_usd: f64) -> Self {
        Self {
            ledger,
            audit,
            trade_size_usd,
        }
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    /// Apply `decision.action` to the ledger and append the audit record.
    pub async fn apply(&self, decision: &Decision) -> ExecutionOutcome {
        let symbol = decision.symbol.as_str();

        let outcome = match decision.action {
            Action::Buy => {
                match self
                    .ledger
                    .open(symbol, decision.price, self.trade_size_usd)
                    .await
                {
                    Ok(position) => ExecutionOutcome::Opened { position },
                    Err(LedgerError::AlreadyOpen { .. }) => ExecutionOutcome::AlreadyOpen,
                    Err(e) => Self::rejected(symbol, e),
                }
            }
            Action::Sell => match self.ledger.close(symbol, decision.price).await {
                Ok(trade) => ExecutionOutcome::Closed {
                    trade,
                    cumulative_profit: self.ledger.cumulative_profit(),
                },
                Err(LedgerError::NotOpen { .. }) => ExecutionOutcome::NothingToSell,
                Err(e) => Self::rejected(symbol, e),
            },
            action @ (Action::Hold | Action::Pass | Action::Skip) => {
                ExecutionOutcome::NoTrade { action }
            }
        };

        info!(
            signal_id = %decision.signal_id,
            symbol,
            action = %decision.action,
            price = decision.price,
            outcome = %outcome,
            "execution complete"
        );

        self.audit
            .append(VerdictRecord {
                signal_id: decision.signal_id.clone(),
                symbol: decision.symbol.clone(),
                signal_type: decision.signal_type,
                sub_verdicts: decision.sub_verdicts.clone(),
                final_action: decision.action,
                outcome: outcome.kind(),
                price: decision.price,
                timestamp: Utc::now(),
            })
            .await;
        debug!(records = self.audit.len(), "verdict recorded");

        outcome
    }

    fn rejected(symbol: &str, err: LedgerError) -> ExecutionOutcome {
        warn!(symbol, error = %err, "ledger rejected order");
        ExecutionOutcome::Rejected {
            reason: err.to_string(),
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("ledger", &self.ledger)
            .field("audit", &self.audit)
            .field("trade_size_usd", &self.trade_size_usd)
            .finish()
    }
}
