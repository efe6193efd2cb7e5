// =============================================================================
// Runtime Configuration — signal desk settings with atomic save
// =============================================================================
//
// Every tunable lives here. Secrets (API keys, bot tokens) are NOT part of
// this file; they are read from the environment in `main`.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// The notification sink refuses bursts faster than this.
pub const MIN_NOTIFY_INTERVAL_MS: u64 = 800;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "BTCUSD".to_string()
}

fn default_trade_size_usd() -> f64 {
    100.0
}

fn default_notify_min_interval_ms() -> u64 {
    1000
}

fn default_collaborator_timeout_secs() -> u64 {
    20
}

fn default_true() -> bool {
    true
}

fn default_follow_up_poll_secs() -> u64 {
    30
}

fn default_min_signals_for_report() -> usize {
    20
}

fn default_recent_signal_capacity() -> usize {
    100
}

fn default_outbox_flush_interval_secs() -> u64 {
    60
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_timeframe_label() -> String {
    "1H".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.x.ai/v1".to_string()
}

fn default_llm_model() -> String {
    "grok-4-fast-reasoning".to_string()
}

fn default_llm_temperature() -> f64 {
    0.3
}

// =============================================================================
// EvaluatorParams
// =============================================================================

/// Settings for the chat-completions evaluators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorParams {
    /// OpenAI-compatible API root (no trailing slash).
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_temperature")]
    pub temperature: f64,
}

impl Default for EvaluatorParams {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_llm_temperature(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Ingestion -----------------------------------------------------------

    /// Symbol assumed when a signal carries no `Symbol` field.
    #[serde(default = "default_symbol")]
    pub default_symbol: String,

    /// Reject signals whose symbol is not in the asset registry instead of
    /// proceeding with the fallback asset's market context.
    #[serde(default)]
    pub reject_unknown_assets: bool,

    /// Timeframe shown in notification headers (e.g. "1H").
    #[serde(default = "default_timeframe_label")]
    pub timeframe_label: String,

    // --- Execution -----------------------------------------------------------

    /// Notional size of every opened position, in USD.
    #[serde(default = "default_trade_size_usd")]
    pub trade_size_usd: f64,

    // --- Collaborators -------------------------------------------------------

    /// Upper bound on every evaluator / oracle / sink / store call.
    #[serde(default = "default_collaborator_timeout_secs")]
    pub collaborator_timeout_secs: u64,

    #[serde(default)]
    pub evaluator: EvaluatorParams,

    // --- Notifications -------------------------------------------------------

    /// Minimum gap between consecutive delivery attempts. Values below
    /// [`MIN_NOTIFY_INTERVAL_MS`] are raised to it.
    #[serde(default = "default_notify_min_interval_ms")]
    pub notify_min_interval_ms: u64,

    /// Answer chat replies about the latest signal. Only takes effect when
    /// a Telegram bot is configured.
    #[serde(default = "default_true")]
    pub follow_up_replies: bool,

    /// Long-poll window for fetching chat replies.
    #[serde(default = "default_follow_up_poll_secs")]
    pub follow_up_poll_secs: u64,

    // --- Reporting & persistence --------------------------------------------

    /// Recorded signals required before a readiness score is produced.
    #[serde(default = "default_min_signals_for_report")]
    pub min_signals_for_report: usize,

    /// How many processed signals the read API keeps in memory.
    #[serde(default = "default_recent_signal_capacity")]
    pub recent_signal_capacity: usize,

    /// Period of the background outbox flush.
    #[serde(default = "default_outbox_flush_interval_secs")]
    pub outbox_flush_interval_secs: u64,

    /// Directory holding positions.json, trades.jsonl and verdicts.jsonl.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    // --- API -----------------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_symbol: default_symbol(),
            reject_unknown_assets: false,
            timeframe_label: default_timeframe_label(),
            trade_size_usd: default_trade_size_usd(),
            collaborator_timeout_secs: default_collaborator_timeout_secs(),
            evaluator: EvaluatorParams::default(),
            notify_min_interval_ms: default_notify_min_interval_ms(),
            follow_up_replies: true,
            follow_up_poll_secs: default_follow_up_poll_secs(),
            min_signals_for_report: default_min_signals_for_report(),
            recent_signal_capacity: default_recent_signal_capacity(),
            outbox_flush_interval_secs: default_outbox_flush_interval_secs(),
            data_dir: default_data_dir(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            default_symbol = %config.default_symbol,
            trade_size_usd = config.trade_size_usd,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Delivery pacing, never below [`MIN_NOTIFY_INTERVAL_MS`].
    pub fn notify_min_interval(&self) -> Duration {
        if self.notify_min_interval_ms < MIN_NOTIFY_INTERVAL_MS {
            warn!(
                configured_ms = self.notify_min_interval_ms,
                floor_ms = MIN_NOTIFY_INTERVAL_MS,
                "notify interval below sink rate limit, raising to floor"
            );
            return Duration::from_millis(MIN_NOTIFY_INTERVAL_MS);
        }
        Duration::from_millis(self.notify_min_interval_ms)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs.max(1))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.default_symbol, "BTCUSD");
        assert!(!cfg.reject_unknown_assets);
        assert!((cfg.trade_size_usd - 100.0).abs() < f64::EPSILON);
        assert_eq!(cfg.min_signals_for_report, 20);
        assert_eq!(cfg.notify_min_interval(), Duration::from_millis(1000));
        assert_eq!(cfg.evaluator.model, "grok-4-fast-reasoning");
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:3000");
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.collaborator_timeout(), Duration::from_secs(20));
        assert!(cfg.follow_up_replies);
        assert_eq!(cfg.follow_up_poll_secs, 30);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "trade_size_usd": 50.0, "evaluator": { "model": "local" } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert!((cfg.trade_size_usd - 50.0).abs() < f64::EPSILON);
        assert_eq!(cfg.evaluator.model, "local");
        assert_eq!(cfg.evaluator.base_url, "https://api.x.ai/v1");
        assert_eq!(cfg.default_symbol, "BTCUSD");
    }

    #[test]
    fn notify_interval_is_clamped_to_sink_floor() {
        let cfg = RuntimeConfig {
            notify_min_interval_ms: 100,
            ..RuntimeConfig::default()
        };
        assert_eq!(
            cfg.notify_min_interval(),
            Duration::from_millis(MIN_NOTIFY_INTERVAL_MS)
        );
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signal_desk.json");
        let cfg = RuntimeConfig {
            default_symbol: "ETHUSD".into(),
            ..RuntimeConfig::default()
        };
        cfg.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.default_symbol, "ETHUSD");
        assert!(!path.with_extension("json.tmp").exists());
    }
}
