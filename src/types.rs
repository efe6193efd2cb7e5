// =============================================================================
// Shared types used across the signal desk
// =============================================================================

use serde::{Deserialize, Serialize};

/// Which strategy condition an inbound signal reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    BuySignal,
    SellSignal,
}

impl SignalType {
    /// Human-facing label used in notification headers.
    pub fn label(&self) -> &'static str {
        match self {
            Self::BuySignal => "Buy",
            Self::SellSignal => "Sell",
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BuySignal => write!(f, "BUY_SIGNAL"),
            Self::SellSignal => write!(f, "SELL_SIGNAL"),
        }
    }
}

/// Canonical action driving execution.
///
/// Only `Buy` and `Sell` ever touch the ledger; the remaining variants are
/// recorded for the audit trail and the readiness report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
    Pass,
    Skip,
}

impl Action {
    /// Fixed vocabulary, in declaration order.
    pub const ALL: [Action; 5] = [
        Action::Buy,
        Action::Sell,
        Action::Hold,
        Action::Pass,
        Action::Skip,
    ];

    /// Parse a single vocabulary word (case-insensitive).
    pub fn from_word(word: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(word.trim()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
            Self::Pass => "PASS",
            Self::Skip => "SKIP",
        }
    }
}

impl Default for Action {
    fn default() -> Self {
        Self::Skip
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
