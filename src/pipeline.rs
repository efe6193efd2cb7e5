// =============================================================================
// Signal Pipeline — one inbound signal from raw text to delivered message
// =============================================================================
//
// Stages per signal (each pipeline is an independent task):
//
//   1. Ingest        raw text -> SignalEvent          (reject: log, stop)
//   2. Asset         registry resolve                 (optional reject on fallback)
//   3. Price         live oracle, else signal price
//   4. Position      ledger context marked to that price
//   5. Evaluate      buy- or sell-side review  ┐ concurrently
//      Market        context text              ┘
//   6. Synthesize    final free-text verdict
//   7. Resolve       text -> canonical Action (unrecognized -> SKIP)
//   8. Execute       idempotent ledger update + audit record
//   9. Notify        enqueue message, await the attempt, log the outcome
//
// Every collaborator call is bounded by `collaborator_timeout`; a failure or
// timeout degrades to a fixed fallback and never aborts later stages. Once
// a signal passes stage 2 it always reaches stage 9.
//
// No state is shared between pipelines except the ledger, the audit log,
// the notification queue and the bounded RecentSignals cache.
// =============================================================================

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::asset_registry::{AssetMatch, AssetRegistry};
use crate::collaborators::{
    MarketContextProvider, PriceOracle, SubEvaluator, SynthesisInput, Synthesizer,
};
use crate::execution::{Decision, ExecutionEngine, ExecutionOutcome};
use crate::notify::{NotificationQueue, SignalNotification};
use crate::position_ledger::PositionContext;
use crate::signal_ingest::{IngestError, SignalEvent, SignalIngestor};
use crate::types::SignalType;
use crate::verdict::{Resolution, VerdictResolver};

pub const BUY_REVIEW_FALLBACK: &str = "Buy evaluation unavailable";
pub const SELL_REVIEW_FALLBACK: &str = "Sell evaluation unavailable";
pub const SYNTHESIS_FALLBACK: &str = "Final evaluation unavailable";
pub const MARKET_CONTEXT_FALLBACK: &str = "unavailable";

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// The external collaborators a pipeline calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub buy_evaluator: Arc<dyn SubEvaluator>,
    pub sell_evaluator: Arc<dyn SubEvaluator>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub market: Arc<dyn MarketContextProvider>,
    pub oracle: Arc<dyn PriceOracle>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub timeframe_label: String,
    pub reject_unknown_assets: bool,
    pub collaborator_timeout: Duration,
    /// Invite chat replies under each message (only when someone answers them).
    pub follow_up_hint: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("symbol {symbol} is not a registered asset")]
    UnknownAsset { symbol: String },
}

// ---------------------------------------------------------------------------
// Per-request state
// ---------------------------------------------------------------------------

/// Everything known about one signal while it moves through the stages.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub signal: SignalEvent,
    pub asset: AssetMatch,
    pub received_at: DateTime<Utc>,
}

/// Where the execution price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Live,
    Signal,
}

/// Final record of a processed signal, kept in RecentSignals.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedSignal {
    pub signal: SignalEvent,
    pub asset_symbol: &'static str,
    pub asset_fallback: bool,
    pub execution_price: f64,
    pub price_source: PriceSource,
    pub position: PositionContext,
    pub market_context: Option<String>,
    pub buy_review: Option<String>,
    pub sell_review: Option<String>,
    pub synthesis: String,
    pub resolution: Resolution,
    pub outcome: ExecutionOutcome,
    pub received_at: DateTime<Utc>,
}

/// Bounded, newest-last cache of processed signals for the read API.
pub struct RecentSignals {
    capacity: usize,
    entries: Mutex<VecDeque<ProcessedSignal>>,
}

impl RecentSignals {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn push(&self, entry: ProcessedSignal) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Newest first.
    pub fn snapshot(&self) -> Vec<ProcessedSignal> {
        self.entries.lock().iter().rev().cloned().collect()
    }

    /// The most recently processed signal, if any.
    pub fn latest(&self) -> Option<ProcessedSignal> {
        self.entries.lock().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl std::fmt::Debug for RecentSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecentSignals")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct SignalPipeline {
    ingestor: SignalIngestor,
    registry: AssetRegistry,
    resolver: VerdictResolver,
    engine: Arc<ExecutionEngine>,
    queue: Arc<NotificationQueue>,
    collaborators: Collaborators,
    recent: Arc<RecentSignals>,
    settings: PipelineSettings,
}

/// Run `fut` under `limit`, mapping error and timeout to `None` with a warning.
async fn bounded<T, F>(stage: &'static str, limit: Duration, fut: F) -> Option<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(v)) => Some(v),
        Ok(Err(e)) => {
            warn!(stage, error = %e, "collaborator failed, using fallback");
            None
        }
        Err(_) => {
            warn!(
                stage,
                timeout_secs = limit.as_secs_f64(),
                "collaborator timed out, using fallback"
            );
            None
        }
    }
}

impl SignalPipeline {
    pub fn new(
        ingestor: SignalIngestor,
        engine: Arc<ExecutionEngine>,
        queue: Arc<NotificationQueue>,
        collaborators: Collaborators,
        recent: Arc<RecentSignals>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            ingestor,
            registry: AssetRegistry,
            resolver: VerdictResolver::new(),
            engine,
            queue,
            collaborators,
            recent,
            settings,
        }
    }

    pub fn recent(&self) -> &Arc<RecentSignals> {
        &self.recent
    }

    /// Process `raw` on its own task. Rejections are logged, not returned.
    pub fn submit(self: &Arc<Self>, raw: String) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = pipeline.process(&raw).await {
                warn!(error = %e, "signal rejected");
            }
        })
    }

    /// Stages 1-2: validate and build the per-request context.
    pub fn admit(&self, raw: &str) -> Result<PipelineContext, PipelineError> {
        let signal = self.ingestor.ingest(raw)?;
        let asset = self.registry.resolve(&signal.symbol);

        if let AssetMatch::Fallback(fallback) = asset {
            if self.settings.reject_unknown_assets {
                return Err(PipelineError::UnknownAsset {
                    symbol: signal.symbol,
                });
            }
            warn!(
                symbol = %signal.symbol,
                fallback = fallback.symbol,
                "unknown symbol, proceeding with fallback market context"
            );
        }

        info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            signal_type = %signal.signal_type,
            price = signal.price,
            ratio = ?signal.ratio,
            "signal admitted"
        );

        Ok(PipelineContext {
            signal,
            asset,
            received_at: Utc::now(),
        })
    }

    /// Run every stage for `raw`.
    pub async fn process(&self, raw: &str) -> Result<ProcessedSignal, PipelineError> {
        let ctx = self.admit(raw)?;
        let processed = self.run(ctx).await;
        self.recent.push(processed.clone());

        let message = self.render(&processed);
        let outcome = self.queue.enqueue(message).outcome().await;
        if outcome.is_delivered() {
            debug!(signal_id = %processed.signal.id, "signal notification delivered");
        } else {
            warn!(
                signal_id = %processed.signal.id,
                outcome = ?outcome,
                "signal notification not delivered"
            );
        }

        Ok(processed)
    }

    /// Stages 3-8.
    async fn run(&self, ctx: PipelineContext) -> ProcessedSignal {
        let limit = self.settings.collaborator_timeout;
        let c = &self.collaborators;
        let signal = &ctx.signal;
        let asset = ctx.asset.asset();

        // 3. price: a fallback asset's live quote belongs to a different
        //    instrument, so only known assets consult the oracle.
        let live = match ctx.asset {
            AssetMatch::Known(a) => bounded("price", limit, c.oracle.price(a))
                .await
                .flatten()
                .filter(|p| p.is_finite() && *p > 0.0),
            AssetMatch::Fallback(_) => None,
        };
        let (execution_price, price_source) = match live {
            Some(p) => (p, PriceSource::Live),
            None => (signal.price, PriceSource::Signal),
        };

        // 4. position
        let position = self.engine.ledger().context(&signal.symbol, execution_price);

        // 5. sub-evaluation and market context
        let review = async {
            match signal.signal_type {
                SignalType::BuySignal => bounded(
                    "buy_evaluator",
                    limit,
                    c.buy_evaluator.evaluate(asset, signal, &position),
                )
                .await
                .unwrap_or_else(|| BUY_REVIEW_FALLBACK.to_string()),
                SignalType::SellSignal => bounded(
                    "sell_evaluator",
                    limit,
                    c.sell_evaluator.evaluate(asset, signal, &position),
                )
                .await
                .unwrap_or_else(|| SELL_REVIEW_FALLBACK.to_string()),
            }
        };
        let market = bounded("market_context", limit, c.market.context(asset));
        let (review, market_context) = tokio::join!(review, market);

        let (buy_review, sell_review) = match signal.signal_type {
            SignalType::BuySignal => (Some(review), None),
            SignalType::SellSignal => (None, Some(review)),
        };

        // 6. synthesis
        let synthesis = bounded(
            "synthesizer",
            limit,
            c.synthesizer.synthesize(&SynthesisInput {
                asset,
                signal_type: signal.signal_type,
                buy_review: buy_review.as_deref(),
                sell_review: sell_review.as_deref(),
                position: &position,
                market_context: market_context.as_deref().unwrap_or(MARKET_CONTEXT_FALLBACK),
            }),
        )
        .await
        .unwrap_or_else(|| SYNTHESIS_FALLBACK.to_string());

        // 7. resolve
        let resolution = self.resolver.resolve(&synthesis, position.is_open());

        // 8. execute
        let decision = Decision {
            signal_id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            signal_type: signal.signal_type,
            sub_verdicts: buy_review.iter().chain(sell_review.iter()).cloned().collect(),
            action: resolution.action,
            price: execution_price,
        };
        let outcome = self.engine.apply(&decision).await;

        info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            action = %resolution.action,
            price_source = ?price_source,
            outcome = %outcome,
            "signal processed"
        );

        ProcessedSignal {
            asset_symbol: asset.symbol,
            asset_fallback: ctx.asset.is_fallback(),
            execution_price,
            price_source,
            position,
            market_context,
            buy_review,
            sell_review,
            synthesis,
            resolution,
            outcome,
            received_at: ctx.received_at,
            signal: ctx.signal,
        }
    }

    fn render(&self, p: &ProcessedSignal) -> String {
        let asset = self.registry.resolve(&p.signal.symbol);
        SignalNotification {
            timeframe: &self.settings.timeframe_label,
            signal: &p.signal,
            asset,
            position: &p.position,
            market_context: p.market_context.as_deref(),
            buy_review: p.buy_review.as_deref(),
            sell_review: p.sell_review.as_deref(),
            synthesis: &p.synthesis,
            outcome: &p.outcome,
            follow_up_hint: self.settings.follow_up_hint,
        }
        .render()
    }
}

impl std::fmt::Debug for SignalPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalPipeline")
            .field("engine", &self.engine)
            .field("queue", &self.queue)
            .field("recent", &self.recent)
            .field("settings", &self.settings)
            .finish()
    }
}
