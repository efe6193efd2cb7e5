// =============================================================================
// Central Application State — Signal Desk
// =============================================================================
//
// Ties the long-lived subsystems together for the HTTP layer. Each subsystem
// manages its own interior mutability; AppState only holds Arc handles and
// a few atomic counters for the health endpoint.
//
// Startup order inside `build`:
//   1. Restore ledger and audit history from the store (degrades to empty).
//   2. Start the notification queue consumer.
//   3. Wire the execution engine and the signal pipeline.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::audit::AuditLog;
use crate::collaborators::NotificationSink;
use crate::execution::ExecutionEngine;
use crate::notify::{NotificationQueue, QueueStats};
use crate::persistence::Outbox;
use crate::pipeline::{Collaborators, PipelineSettings, RecentSignals, SignalPipeline};
use crate::position_ledger::PositionLedger;
use crate::runtime_config::RuntimeConfig;
use crate::signal_ingest::SignalIngestor;
use crate::validation::{ValidationReport, ValidationReporter};

/// Point-in-time summary served by `/api/v1/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub uptime_secs: i64,
    pub server_time: i64,
    pub signals_received: u64,
    pub open_positions: usize,
    pub trades: usize,
    pub verdicts: usize,
    /// Store writes not yet acknowledged. `None` when running without a store.
    pub outbox_pending: Option<usize>,
    pub notifications: QueueStats,
}

/// Central application state shared across handlers via `Arc<AppState>`.
pub struct AppState {
    pub config: RuntimeConfig,

    // ── Domain ──────────────────────────────────────────────────────────
    pub ledger: Arc<PositionLedger>,
    pub audit: Arc<AuditLog>,
    pub pipeline: Arc<SignalPipeline>,
    pub reporter: ValidationReporter,

    // ── Delivery & persistence ──────────────────────────────────────────
    pub queue: Arc<NotificationQueue>,
    pub outbox: Option<Arc<Outbox>>,

    // ── Counters ────────────────────────────────────────────────────────
    /// Webhook bodies accepted (before validation).
    pub signals_received: AtomicU64,
    pub started_at: DateTime<Utc>,

    admin_token: Option<String>,
}

impl AppState {
    /// Restore persisted state and wire every subsystem. Must run inside a
    /// tokio runtime (the notification consumer is spawned here).
    pub async fn build(
        config: RuntimeConfig,
        outbox: Option<Arc<Outbox>>,
        sink: Arc<dyn NotificationSink>,
        collaborators: Collaborators,
        admin_token: Option<String>,
    ) -> Self {
        let admin_token = admin_token.filter(|t| !t.is_empty());
        let (ledger, audit) = match &outbox {
            Some(outbox) => (
                PositionLedger::restore(Arc::clone(outbox)).await,
                AuditLog::restore(Arc::clone(outbox)).await,
            ),
            None => (PositionLedger::new(None), AuditLog::new(None)),
        };
        let ledger = Arc::new(ledger);
        let audit = Arc::new(audit);

        let queue = Arc::new(NotificationQueue::spawn(
            sink,
            config.notify_min_interval(),
            config.collaborator_timeout(),
        ));

        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&audit),
            config.trade_size_usd,
        ));

        let pipeline = Arc::new(SignalPipeline::new(
            SignalIngestor::new(config.default_symbol.clone()),
            engine,
            Arc::clone(&queue),
            collaborators,
            Arc::new(RecentSignals::new(config.recent_signal_capacity)),
            PipelineSettings {
                timeframe_label: config.timeframe_label.clone(),
                reject_unknown_assets: config.reject_unknown_assets,
                collaborator_timeout: config.collaborator_timeout(),
                follow_up_hint: config.follow_up_replies,
            },
        ));

        info!(
            open_positions = ledger.open_positions().len(),
            trades = ledger.trades().len(),
            verdicts = audit.len(),
            persistent = outbox.is_some(),
            auth_configured = admin_token.is_some(),
            "application state ready"
        );

        Self {
            reporter: ValidationReporter::new(config.min_signals_for_report),
            config,
            ledger,
            audit,
            pipeline,
            queue,
            outbox,
            signals_received: AtomicU64::new(0),
            started_at: Utc::now(),
            admin_token,
        }
    }

    /// Expected bearer token; `None` means authenticated routes are closed.
    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    /// Hand a raw webhook body to the pipeline.
    pub fn accept_signal(&self, raw: String) {
        self.signals_received.fetch_add(1, Ordering::Relaxed);
        self.pipeline.submit(raw);
    }

    pub fn validation_report(&self) -> ValidationReport {
        self.reporter
            .report(&self.ledger.trades(), &self.audit.records())
    }

    pub fn health(&self) -> HealthSnapshot {
        let now = Utc::now();
        HealthSnapshot {
            status: "ok",
            uptime_secs: (now - self.started_at).num_seconds(),
            server_time: now.timestamp_millis(),
            signals_received: self.signals_received.load(Ordering::Relaxed),
            open_positions: self.ledger.open_positions().len(),
            trades: self.ledger.trades().len(),
            verdicts: self.audit.len(),
            outbox_pending: self.outbox.as_ref().map(|o| o.pending()),
            notifications: self.queue.stats(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("ledger", &self.ledger)
            .field("audit", &self.audit)
            .field("queue", &self.queue)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::collaborators::fake::{
        Canned, FakeEvaluator, FakeMarket, FakeOracle, FakeSynthesizer, RecordingSink,
    };

    pub const TEST_TOKEN: &str = "test-admin-token";

    /// Fakes whose synthesis always answers `verdict`.
    pub fn collaborators(verdict: &str) -> Collaborators {
        Collaborators {
            buy_evaluator: Arc::new(FakeEvaluator::new(Canned::ok("VERDICT: BUY".into()))),
            sell_evaluator: Arc::new(FakeEvaluator::new(Canned::ok("VERDICT: SELL".into()))),
            synthesizer: Arc::new(FakeSynthesizer::new(Canned::ok(verdict.to_string()))),
            market: Arc::new(FakeMarket(Canned::ok("Bitcoin $100.00".into()))),
            oracle: Arc::new(FakeOracle(Canned::ok(None))),
        }
    }

    /// In-memory state wired to the fakes above.
    pub async fn state(verdict: &str, sink: Arc<RecordingSink>) -> Arc<AppState> {
        Arc::new(
            AppState::build(
                RuntimeConfig::default(),
                None,
                sink,
                collaborators(verdict),
                Some(TEST_TOKEN.to_string()),
            )
            .await,
        )
    }
}
