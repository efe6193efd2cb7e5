// In-process collaborators for tests: canned replies, optional failure,
// optional delay (useful with a paused clock to trip timeouts).

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    ChatUpdate, FollowUpResponder, MarketContextProvider, NotificationSink, PriceOracle,
    SubEvaluator, SynthesisInput, Synthesizer, UpdateSource,
};
use crate::asset_registry::Asset;
use crate::position_ledger::PositionContext;
use crate::signal_ingest::SignalEvent;

/// Returns `reply` (or an error when `reply` is `None`) after `delay`.
#[derive(Debug, Clone)]
pub struct Canned<T> {
    pub reply: Option<T>,
    pub delay: Duration,
}

impl<T: Clone> Canned<T> {
    pub fn ok(reply: T) -> Self {
        Self {
            reply: Some(reply),
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            delay: Duration::ZERO,
        }
    }

    pub fn slow(reply: T, delay: Duration) -> Self {
        Self {
            reply: Some(reply),
            delay,
        }
    }

    async fn answer(&self) -> Result<T> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone().ok_or_else(|| anyhow!("collaborator unavailable"))
    }
}

/// Records the position context it was shown.
#[derive(Debug)]
pub struct FakeEvaluator {
    pub canned: Canned<String>,
    pub seen_positions: Mutex<Vec<PositionContext>>,
}

impl FakeEvaluator {
    pub fn new(canned: Canned<String>) -> Self {
        Self {
            canned,
            seen_positions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SubEvaluator for FakeEvaluator {
    async fn evaluate(
        &self,
        _asset: &Asset,
        _signal: &SignalEvent,
        position: &PositionContext,
    ) -> Result<String> {
        self.seen_positions.lock().push(position.clone());
        self.canned.answer().await
    }
}

/// Records the buy/sell reviews and market context it was given. The reply
/// can be swapped between signals.
#[derive(Debug)]
pub struct FakeSynthesizer {
    canned: Mutex<Canned<String>>,
    pub seen: Mutex<Vec<(Option<String>, Option<String>, String)>>,
}

impl FakeSynthesizer {
    pub fn new(canned: Canned<String>) -> Self {
        Self {
            canned: Mutex::new(canned),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reply(&self, reply: &str) {
        *self.canned.lock() = Canned::ok(reply.to_string());
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, input: &SynthesisInput<'_>) -> Result<String> {
        self.seen.lock().push((
            input.buy_review.map(str::to_string),
            input.sell_review.map(str::to_string),
            input.market_context.to_string(),
        ));
        let canned = self.canned.lock().clone();
        canned.answer().await
    }
}

#[derive(Debug)]
pub struct FakeMarket(pub Canned<String>);

#[async_trait]
impl MarketContextProvider for FakeMarket {
    async fn context(&self, _asset: &Asset) -> Result<String> {
        self.0.answer().await
    }
}

#[derive(Debug)]
pub struct FakeOracle(pub Canned<Option<f64>>);

#[async_trait]
impl PriceOracle for FakeOracle {
    async fn price(&self, _asset: &Asset) -> Result<Option<f64>> {
        self.0.answer().await
    }
}

/// Captures every message; fails the first `fail_first` sends.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Start time of every attempt, successful or not.
    pub attempts: Mutex<Vec<tokio::time::Instant>>,
    pub delivered: Mutex<Vec<(tokio::time::Instant, String)>>,
    pub fail_first: Mutex<usize>,
    pub delay: Duration,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.delivered.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, message: &str) -> Result<()> {
        self.attempts.lock().push(tokio::time::Instant::now());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        {
            let mut remaining = self.fail_first.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(anyhow!("sink rejected message"));
            }
        }
        self.delivered
            .lock()
            .push((tokio::time::Instant::now(), message.to_string()));
        Ok(())
    }
}

/// Hands out one scripted batch per poll, then empty batches. Records the
/// offset of every poll.
#[derive(Debug, Default)]
pub struct ScriptedUpdates {
    batches: Mutex<VecDeque<Result<Vec<ChatUpdate>>>>,
    pub offsets: Mutex<Vec<i64>>,
}

impl ScriptedUpdates {
    pub fn new(batches: Vec<Result<Vec<ChatUpdate>>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            offsets: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl UpdateSource for ScriptedUpdates {
    async fn updates(&self, offset: i64) -> Result<Vec<ChatUpdate>> {
        self.offsets.lock().push(offset);
        self.batches.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Records (question, context) pairs.
#[derive(Debug)]
pub struct FakeResponder {
    pub canned: Canned<String>,
    pub questions: Mutex<Vec<(String, String)>>,
}

impl FakeResponder {
    pub fn new(canned: Canned<String>) -> Self {
        Self {
            canned,
            questions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl FollowUpResponder for FakeResponder {
    async fn answer(&self, question: &str, signal_context: &str) -> Result<String> {
        self.questions
            .lock()
            .push((question.to_string(), signal_context.to_string()));
        self.canned.answer().await
    }
}
