// =============================================================================
// Signal Desk — Main Entry Point
// =============================================================================
//
// Receives indicator alerts on `POST /webhook`, runs each through the
// evaluation pipeline and paper-trades the resulting verdicts. No exchange
// orders are ever placed. With a Telegram bot configured, chat replies
// about the latest signal are answered too.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod asset_registry;
mod audit;
mod collaborators;
mod execution;
mod followup;
mod notify;
mod persistence;
mod pipeline;
mod position_ledger;
mod runtime_config;
mod signal_ingest;
mod types;
mod validation;
mod verdict;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::collaborators::{
    ChatClient, ChatEvaluator, ChatResponder, ChatSynthesizer, CoinGeckoClient,
    NotificationSink,
};
use crate::followup::FollowUpDesk;
use crate::notify::{LogSink, TelegramSink, TelegramUpdates};
use crate::persistence::{JsonFileStore, Outbox};
use crate::pipeline::Collaborators;
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "signal_desk.json";

/// Pause between follow-up polls.
const FOLLOW_UP_IDLE: Duration = Duration::from_secs(1);

/// Read a non-empty environment variable.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Signal Desk — Starting Up (paper trading)         ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    if let Some(addr) = env_opt("SIGNAL_DESK_BIND_ADDR") {
        config.bind_addr = addr;
    }

    info!(
        default_symbol = %config.default_symbol,
        trade_size_usd = config.trade_size_usd,
        reject_unknown_assets = config.reject_unknown_assets,
        "Configuration loaded"
    );

    // ── 2. Persistence ───────────────────────────────────────────────────
    let outbox = match JsonFileStore::open(config.data_dir.clone()).await {
        Ok(store) => Some(Arc::new(Outbox::new(
            Arc::new(store),
            config.collaborator_timeout(),
        ))),
        Err(e) => {
            error!(error = %e, dir = %config.data_dir.display(), "Store unavailable, running in memory only");
            None
        }
    };

    // ── 3. Collaborators ─────────────────────────────────────────────────
    let grok_key = env_opt("GROK_API_KEY").unwrap_or_else(|| {
        warn!("GROK_API_KEY is not set, every evaluation will fall back");
        String::new()
    });
    let chat = Arc::new(ChatClient::new(
        grok_key,
        config.evaluator.clone(),
        config.collaborator_timeout(),
    )?);
    let coingecko = Arc::new(CoinGeckoClient::new(
        env_opt("COINGECKO_API_KEY").as_deref(),
        config.collaborator_timeout(),
    )?);

    let collaborators = Collaborators {
        buy_evaluator: Arc::new(ChatEvaluator::buy(chat.clone())),
        sell_evaluator: Arc::new(ChatEvaluator::sell(chat.clone())),
        synthesizer: Arc::new(ChatSynthesizer::new(chat.clone())),
        market: coingecko.clone(),
        oracle: coingecko,
    };

    // ── 4. Notification sink ─────────────────────────────────────────────
    // The file keeps the configured flag even when Telegram is absent.
    let follow_up_configured = config.follow_up_replies;
    let telegram = match (env_opt("TELEGRAM_TOKEN"), env_opt("TELEGRAM_CHAT_ID")) {
        (Some(token), Some(chat_id)) => Some((token, chat_id)),
        _ => None,
    };
    let sink: Arc<dyn NotificationSink> = match &telegram {
        Some((token, chat_id)) => {
            info!(chat_id = %chat_id, "Telegram notifications enabled");
            Arc::new(TelegramSink::new(
                token.clone(),
                chat_id.clone(),
                config.collaborator_timeout(),
            )?)
        }
        None => {
            warn!("TELEGRAM_TOKEN / TELEGRAM_CHAT_ID not set, notifications go to the log");
            config.follow_up_replies = false;
            Arc::new(LogSink)
        }
    };

    // ── 5. Build shared state ────────────────────────────────────────────
    let admin_token = env_opt("SIGNAL_DESK_ADMIN_TOKEN");
    if admin_token.is_none() {
        warn!("SIGNAL_DESK_ADMIN_TOKEN is not set, the read API is closed");
    }
    let state = Arc::new(
        AppState::build(config, outbox.clone(), sink, collaborators, admin_token).await,
    );

    // ── 6. Outbox flush loop ─────────────────────────────────────────────
    if let Some(outbox) = outbox.clone() {
        let every = Duration::from_secs(state.config.outbox_flush_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if outbox.pending() == 0 {
                    continue;
                }
                let report = outbox.flush().await;
                if report.remaining > 0 {
                    warn!(written = report.written, remaining = report.remaining, "Outbox flush incomplete");
                } else {
                    info!(written = report.written, "Outbox drained");
                }
            }
        });
    }

    // ── 7. Follow-up replies ─────────────────────────────────────────────
    if let Some((token, chat_id)) = telegram.filter(|_| state.config.follow_up_replies) {
        let updates = TelegramUpdates::new(
            token,
            Duration::from_secs(state.config.follow_up_poll_secs),
            state.config.collaborator_timeout(),
        )?;
        let desk = FollowUpDesk::new(
            Arc::new(updates),
            Arc::new(ChatResponder::new(chat)),
            state.pipeline.recent().clone(),
            state.queue.clone(),
            chat_id,
            state.config.collaborator_timeout(),
        );
        tokio::spawn(desk.run(FOLLOW_UP_IDLE));
        info!("Follow-up replies enabled (answers start after the first signal)");
    }

    // ── 8. Start the API server ──────────────────────────────────────────
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {}", state.config.bind_addr))?;
    info!(addr = %state.config.bind_addr, "API server listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 9. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping gracefully");

    if let Some(outbox) = outbox {
        let report = outbox.flush().await;
        if report.remaining > 0 {
            error!(remaining = report.remaining, "Unwritten records lost on shutdown");
        }
    }

    let mut saved = state.config.clone();
    saved.follow_up_replies = follow_up_configured;
    if let Err(e) = saved.save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Signal Desk shut down complete.");
    Ok(())
}
