// =============================================================================
// Position Ledger — authoritative per-symbol open/flat state and trade history
// =============================================================================
//
// Life-cycle per symbol:
//   Flat  --open-->  Open  --close-->  Flat (+ one Trade appended)
//
// Invariants:
//   - At most one open position per symbol.
//   - An open position always has entry_price > 0 and size_usd > 0.
//   - A Trade is appended exactly once per successful close.
//   - Conflicting requests (open on open, close on flat) leave the ledger
//     untouched and return AlreadyOpen / NotOpen.
//
// Thread-safety: each symbol has its own `parking_lot::Mutex` slot, so
// writes to one symbol are serialised while different symbols proceed in
// parallel. The slot map itself sits behind a `RwLock` and is only
// write-locked when a symbol is seen for the first time. Lock order is
// always slot -> trades.
//
// Persistence: every mutation is pushed to the outbox while the slot lock
// is held (preserving per-symbol order) and flushed after it is released.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::persistence::{Outbox, PendingWrite};

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// The single logical row kept per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            open: false,
            entry_price: None,
            size_usd: None,
            opened_at: None,
        }
    }

    /// `(entry_price, size_usd)` if the position is open and well-formed.
    fn open_terms(&self) -> Option<(f64, f64)> {
        match (self.open, self.entry_price, self.size_usd) {
            (true, Some(entry), Some(size)) if entry > 0.0 && size > 0.0 => Some((entry, size)),
            _ => None,
        }
    }
}

/// A closed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size_usd: f64,
    /// Realised USD profit (negative for a loss).
    pub profit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: DateTime<Utc>,
}

/// `(exit − entry) × (size / entry)`: the USD P&L of a spot position of
/// `size_usd` notional.
pub fn realized_profit(entry_price: f64, exit_price: f64, size_usd: f64) -> f64 {
    (exit_price - entry_price) * (size_usd / entry_price)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("position already open for {symbol}")]
    AlreadyOpen { symbol: String },

    #[error("no open position for {symbol}")]
    NotOpen { symbol: String },

    #[error("invalid price {price} for {symbol}")]
    InvalidPrice { symbol: String, price: f64 },

    #[error("invalid size {size_usd} USD for {symbol}")]
    InvalidSize { symbol: String, size_usd: f64 },
}

// ---------------------------------------------------------------------------
// Position context (handed to evaluators)
// ---------------------------------------------------------------------------

/// Snapshot of a symbol's position marked to a price.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PositionContext {
    Flat,
    Open {
        entry_price: f64,
        size_usd: f64,
        mark_price: f64,
        unrealized_pct: f64,
        unrealized_usd: f64,
    },
}

impl PositionContext {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

impl std::fmt::Display for PositionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flat => write!(f, "No open position"),
            Self::Open {
                entry_price,
                size_usd,
                mark_price,
                unrealized_pct,
                unrealized_usd,
            } => write!(
                f,
                "Open: ${size_usd:.2} at ${entry_price:.2}, current ${mark_price:.2} \
                 (unrealized {unrealized_pct:.1}% / ${unrealized_usd:.2})"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

type Slot = Arc<Mutex<Position>>;

pub struct PositionLedger {
    slots: RwLock<HashMap<String, Slot>>,
    trades: RwLock<Vec<Trade>>,
    outbox: Option<Arc<Outbox>>,
}

impl PositionLedger {
    /// Empty ledger. Without an outbox nothing is persisted.
    pub fn new(outbox: Option<Arc<Outbox>>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            trades: RwLock::new(Vec::new()),
            outbox,
        }
    }

    /// Rebuild the ledger from the outbox's store. A failed read degrades
    /// to an empty ledger; malformed open rows are restored as flat.
    pub async fn restore(outbox: Arc<Outbox>) -> Self {
        let store = outbox.store().clone();

        let positions = store.load_positions().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to load positions, starting flat");
            Vec::new()
        });
        let trades = store.load_trades().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to load trade history, starting empty");
            Vec::new()
        });

        let mut slots = HashMap::new();
        for mut pos in positions {
            if pos.open && pos.open_terms().is_none() {
                warn!(symbol = %pos.symbol, ?pos, "stored open position is malformed, restoring as flat");
                pos = Position::flat(pos.symbol);
            }
            slots.insert(pos.symbol.clone(), Arc::new(Mutex::new(pos)));
        }

        info!(
            positions = slots.len(),
            open = slots.values().filter(|s| s.lock().open).count(),
            trades = trades.len(),
            "ledger restored"
        );

        Self {
            slots: RwLock::new(slots),
            trades: RwLock::new(trades),
            outbox: Some(outbox),
        }
    }

    fn slot(&self, symbol: &str) -> Slot {
        if let Some(slot) = self.slots.read().get(symbol) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Position::flat(symbol))))
            .clone()
    }

    fn enqueue(&self, write: PendingWrite) {
        if let Some(outbox) = &self.outbox {
            outbox.push(write);
        }
    }

    async fn flush(&self) {
        if let Some(outbox) = &self.outbox {
            let report = outbox.flush().await;
            if report.remaining > 0 {
                warn!(
                    remaining = report.remaining,
                    "ledger change not yet durable, kept in outbox"
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Current position for `symbol`; flat if none was ever recorded.
    pub fn get(&self, symbol: &str) -> Position {
        match self.slots.read().get(symbol) {
            Some(slot) => slot.lock().clone(),
            None => Position::flat(symbol),
        }
    }

    #[cfg(test)]
    pub fn is_open(&self, symbol: &str) -> bool {
        self.get(symbol).open
    }

    /// All currently open positions, sorted by symbol.
    pub fn open_positions(&self) -> Vec<Position> {
        let mut open: Vec<Position> = self
            .slots
            .read()
            .values()
            .map(|s| s.lock().clone())
            .filter(|p| p.open)
            .collect();
        open.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        open
    }

    /// Full trade history, oldest first.
    pub fn trades(&self) -> Vec<Trade> {
        self.trades.read().clone()
    }

    pub fn cumulative_profit(&self) -> f64 {
        self.trades.read().iter().map(|t| t.profit).sum()
    }

    /// Position for `symbol` marked to `mark_price`.
    pub fn context(&self, symbol: &str, mark_price: f64) -> PositionContext {
        match self.get(symbol).open_terms() {
            None => PositionContext::Flat,
            Some((entry, size)) => PositionContext::Open {
                entry_price: entry,
                size_usd: size,
                mark_price,
                unrealized_pct: (mark_price - entry) / entry * 100.0,
                unrealized_usd: realized_profit(entry, mark_price, size),
            },
        }
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Open a position. Fails with `AlreadyOpen` (ledger unchanged) if one
    /// is already open for `symbol`.
    pub async fn open(
        &self,
        symbol: &str,
        entry_price: f64,
        size_usd: f64,
    ) -> Result<Position, LedgerError> {
        if !(entry_price.is_finite() && entry_price > 0.0) {
            return Err(LedgerError::InvalidPrice {
                symbol: symbol.to_string(),
                price: entry_price,
            });
        }
        if !(size_usd.is_finite() && size_usd > 0.0) {
            return Err(LedgerError::InvalidSize {
                symbol: symbol.to_string(),
                size_usd,
            });
        }

        let opened = {
            let slot = self.slot(symbol);
            let mut pos = slot.lock();
            if pos.open {
                debug!(symbol, entry = ?pos.entry_price, "open rejected, position already open");
                return Err(LedgerError::AlreadyOpen {
                    symbol: symbol.to_string(),
                });
            }

            pos.open = true;
            pos.entry_price = Some(entry_price);
            pos.size_usd = Some(size_usd);
            pos.opened_at = Some(Utc::now());

            self.enqueue(PendingWrite::Position(pos.clone()));
            pos.clone()
        };

        info!(symbol, entry_price, size_usd, "position opened");
        self.flush().await;
        Ok(opened)
    }

    /// Close the open position for `symbol` at `exit_price`, append the
    /// resulting Trade and reset the symbol to flat. Fails with `NotOpen`
    /// (ledger unchanged) if the symbol is flat.
    pub async fn close(&self, symbol: &str, exit_price: f64) -> Result<Trade, LedgerError> {
        if !(exit_price.is_finite() && exit_price > 0.0) {
            return Err(LedgerError::InvalidPrice {
                symbol: symbol.to_string(),
                price: exit_price,
            });
        }

        let trade = {
            let slot = self.slot(symbol);
            let mut pos = slot.lock();
            let Some((entry_price, size_usd)) = pos.open_terms() else {
                debug!(symbol, "close rejected, no open position");
                return Err(LedgerError::NotOpen {
                    symbol: symbol.to_string(),
                });
            };

            let trade = Trade {
                id: Uuid::new_v4().to_string(),
                symbol: symbol.to_string(),
                entry_price,
                exit_price,
                size_usd,
                profit: realized_profit(entry_price, exit_price, size_usd),
                opened_at: pos.opened_at,
                closed_at: Utc::now(),
            };

            self.trades.write().push(trade.clone());
            *pos = Position::flat(symbol);

            self.enqueue(PendingWrite::Trade(trade.clone()));
            self.enqueue(PendingWrite::Position(pos.clone()));
            trade
        };

        info!(
            symbol,
            entry_price = trade.entry_price,
            exit_price,
            size_usd = trade.size_usd,
            profit = trade.profit,
            "position closed"
        );
        self.flush().await;
        Ok(trade)
    }
}

impl std::fmt::Debug for PositionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionLedger")
            .field("symbols", &self.slots.read().len())
            .field("trades", &self.trades.read().len())
            .field("persistent", &self.outbox.is_some())
            .finish()
    }
}
