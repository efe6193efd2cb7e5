// =============================================================================
// External Collaborators — the seams the pipeline talks through
// =============================================================================
//
// Every outside dependency (language-model evaluation, live price, market
// context, outbound notification, inbound chat replies) sits behind an async trait so the
// pipeline can be driven by real HTTP adapters in production and by
// in-process fakes in tests. Callers wrap each call in a timeout and fall
// back to a documented default on error; implementations just report
// failure through `anyhow::Result`.
// =============================================================================

pub mod chat;
pub mod coingecko;
#[cfg(test)]
pub mod fake;

use anyhow::Result;
use async_trait::async_trait;

use crate::asset_registry::Asset;
use crate::position_ledger::PositionContext;
use crate::signal_ingest::SignalEvent;
use crate::types::SignalType;

pub use chat::{ChatClient, ChatEvaluator, ChatResponder, ChatSynthesizer};
pub use coingecko::CoinGeckoClient;

/// Reviews one signal's indicator snapshot and returns free text that
/// should carry a `VERDICT:` line.
#[async_trait]
pub trait SubEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        asset: &Asset,
        signal: &SignalEvent,
        position: &PositionContext,
    ) -> Result<String>;
}

/// Inputs for the final synthesis step.
#[derive(Debug, Clone)]
pub struct SynthesisInput<'a> {
    pub asset: &'a Asset,
    pub signal_type: SignalType,
    /// Text from the buy-side evaluator, if it ran.
    pub buy_review: Option<&'a str>,
    /// Text from the sell-side evaluator, if it ran.
    pub sell_review: Option<&'a str>,
    pub position: &'a PositionContext,
    pub market_context: &'a str,
}

/// Combines the sub-evaluations into the text the resolver decodes.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, input: &SynthesisInput<'_>) -> Result<String>;
}

/// Free-text market summary for an asset.
#[async_trait]
pub trait MarketContextProvider: Send + Sync {
    async fn context(&self, asset: &Asset) -> Result<String>;
}

/// Live USD price for an asset. `Ok(None)` means the source had no quote.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price(&self, asset: &Asset) -> Result<Option<f64>>;
}

/// Outbound message delivery (HTML-formatted text).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

/// One entry from the chat's update feed. Entries without text (joins,
/// stickers, edits) still carry an id so the feed can advance past them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUpdate {
    pub update_id: i64,
    pub chat_id: Option<String>,
    pub text: Option<String>,
}

/// Inbound chat messages, fetched by offset (long poll).
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Updates with `update_id >= offset`, oldest first.
    async fn updates(&self, offset: i64) -> Result<Vec<ChatUpdate>>;
}

/// Answers a user's question about the latest processed signal.
/// `signal_context` is a JSON rendering of that signal.
#[async_trait]
pub trait FollowUpResponder: Send + Sync {
    async fn answer(&self, question: &str, signal_context: &str) -> Result<String>;
}
