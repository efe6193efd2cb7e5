// =============================================================================
// Chat-Completions Evaluators — OpenAI-compatible HTTP adapter
// =============================================================================
//
// One `ChatClient` talks to any `/chat/completions` endpoint (xAI Grok by
// default). Three roles share it:
//   - buy-side reviewer   (answers VERDICT: BUY / SKIP)
//   - sell-side reviewer  (answers VERDICT: SELL / HOLD)
//   - final synthesizer   (answers FINAL VERDICT: BUY / SELL / HOLD / PASS / SKIP)
//   - follow-up responder (free-form answer to a chat reply)
//
// SECURITY: the API key is only ever sent as a bearer header and is never
// logged or included in Debug output.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument};

use super::{FollowUpResponder, SubEvaluator, SynthesisInput, Synthesizer};
use crate::asset_registry::Asset;
use crate::position_ledger::PositionContext;
use crate::runtime_config::EvaluatorParams;
use crate::signal_ingest::{
    SignalEvent, KEY_OBV, KEY_OBV_MA, KEY_QUOTE_VOLUME, KEY_QUOTE_VOLUME_SMA,
};
use crate::types::SignalType;

#[derive(Clone)]
pub struct ChatClient {
    api_key: String,
    params: EvaluatorParams,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(api_key: impl Into<String>, params: EvaluatorParams, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build chat http client")?;

        debug!(base_url = %params.base_url, model = %params.model, "ChatClient initialised");

        Ok(Self {
            api_key: api_key.into(),
            params,
            client,
        })
    }

    /// POST a single-turn prompt and return the trimmed reply text.
    #[instrument(skip(self, prompt), name = "chat::complete", fields(model = %self.params.model))]
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.params.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.params.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.params.temperature,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("POST /chat/completions request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse chat completion response")?;

        if !status.is_success() {
            bail!("chat completion returned {}: {}", status, body);
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .context("chat completion response has no message content")?
            .trim()
            .to_string();

        debug!(chars = content.len(), "chat completion received");
        Ok(content)
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.params.base_url)
            .field("model", &self.params.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Prompt construction
// ---------------------------------------------------------------------------

fn fmt_num(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{v:.decimals$}"),
        None => "N/A".to_string(),
    }
}

fn fmt_ratio(ratio: Option<f64>) -> String {
    match ratio {
        Some(r) => format!("{r:.2}x"),
        None => "N/A".to_string(),
    }
}

fn indicator_block(signal: &SignalEvent) -> String {
    format!(
        "- Price: ${price:.2}\n\
         - RSI (14): {rsi}\n\
         - Quote Volume (USD): {qv}\n\
         - Quote SMA (30): {qsma}\n\
         - Ratio: {ratio}\n\
         - OBV: {obv}\n\
         - OBV MA (21): {obv_ma}",
        price = signal.price,
        rsi = fmt_num(signal.rsi(), 2),
        qv = fmt_num(signal.indicator(KEY_QUOTE_VOLUME), 0),
        qsma = fmt_num(signal.indicator(KEY_QUOTE_VOLUME_SMA), 0),
        ratio = fmt_ratio(signal.ratio),
        obv = fmt_num(signal.indicator(KEY_OBV), 0),
        obv_ma = fmt_num(signal.indicator(KEY_OBV_MA), 0),
    )
}

pub fn buy_prompt(asset: &Asset, signal: &SignalEvent, position: &PositionContext) -> String {
    format!(
        "You are a crypto spot buy analyst for {name}.\n\n\
         Current position status: {position}\n\n\
         The strategy has signaled Open Long. Evaluate whether inflow conviction, trap risk and \
         momentum support a small, safe accumulation.\n\n\
         Rules:\n\
         - If there is already an open position, you MUST output SKIP.\n\
         - An unknown ratio (N/A) is not zero; treat it as missing evidence.\n\n\
         Current data:\n{data}\n\n\
         Verdict rules:\n\
         - BUY if the data supports the signal (ratio above 1.0x, low trap risk).\n\
         - SKIP if marginal, trapped, contradicted, or a position is already open.\n\n\
         Exact format:\n\
         VERDICT: BUY / SKIP\n\
         REASON: 2-4 sentences.",
        name = asset.display_name,
        position = position,
        data = indicator_block(signal),
    )
}

pub fn sell_prompt(asset: &Asset, signal: &SignalEvent, position: &PositionContext) -> String {
    format!(
        "You are a crypto spot sell analyst for {name}.\n\n\
         Current position status: {position}\n\n\
         The strategy has signaled Close Long. Evaluate whether distribution risk, \
         overextension or fading momentum justify an exit to protect gains.\n\n\
         Current data:\n{data}\n\n\
         Verdict rules:\n\
         - SELL if the data confirms the fade (weak ratio, overextension).\n\
         - HOLD if momentum is still decent or the data contradicts the signal.\n\n\
         Exact format:\n\
         VERDICT: SELL / HOLD\n\
         REASON: 2-4 sentences on ratio, RSI, momentum and risk.",
        name = asset.display_name,
        position = position,
        data = indicator_block(signal),
    )
}

pub fn synthesis_prompt(input: &SynthesisInput<'_>) -> String {
    format!(
        "Final synthesis for small, safe {name} spot trades. Prioritise capital protection.\n\n\
         Inputs:\n\
         - Trigger: {side} signal\n\
         - Buy Agent: {buy}\n\
         - Sell Agent: {sell}\n\
         - Position & live P&L: {position}\n\
         - Market data: {market}\n\n\
         Verdict rules:\n\
         - BUY only on strong consensus and clean context, and only when flat.\n\
         - SELL on fading momentum plus risk, and only when a position is open.\n\
         - HOLD on an open position with momentum.\n\
         - PASS when the signal is valid but the setup is not worth the risk.\n\
         - SKIP marginal cases.\n\n\
         Exact format:\n\
         FINAL VERDICT: BUY / SELL / HOLD / PASS / SKIP\n\
         REASON: 3-5 sentences synthesising inputs, market, position, risk.",
        name = input.asset.display_name,
        side = input.signal_type.label(),
        buy = input.buy_review.unwrap_or("No buy signal"),
        sell = input.sell_review.unwrap_or("No sell signal"),
        position = input.position,
        market = input.market_context,
    )
}

pub fn follow_up_prompt(question: &str, signal_context: &str) -> String {
    format!(
        "User follow-up on last signal: \"{question}\"\n\n\
         Last signal data for context:\n{signal_context}\n\n\
         Respond conversationally as the conservative trading analyst. Keep concise and direct."
    )
}

// ---------------------------------------------------------------------------
// Trait adapters
// ---------------------------------------------------------------------------

/// Sub-evaluator for one side of the book.
#[derive(Debug, Clone)]
pub struct ChatEvaluator {
    client: Arc<ChatClient>,
    side: SignalType,
}

impl ChatEvaluator {
    pub fn buy(client: Arc<ChatClient>) -> Self {
        Self {
            client,
            side: SignalType::BuySignal,
        }
    }

    pub fn sell(client: Arc<ChatClient>) -> Self {
        Self {
            client,
            side: SignalType::SellSignal,
        }
    }
}

#[async_trait]
impl SubEvaluator for ChatEvaluator {
    async fn evaluate(
        &self,
        asset: &Asset,
        signal: &SignalEvent,
        position: &PositionContext,
    ) -> Result<String> {
        let prompt = match self.side {
            SignalType::BuySignal => buy_prompt(asset, signal, position),
            SignalType::SellSignal => sell_prompt(asset, signal, position),
        };
        self.client.complete(&prompt).await
    }
}

#[derive(Debug, Clone)]
pub struct ChatSynthesizer {
    client: Arc<ChatClient>,
}

impl ChatSynthesizer {
    pub fn new(client: Arc<ChatClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Synthesizer for ChatSynthesizer {
    async fn synthesize(&self, input: &SynthesisInput<'_>) -> Result<String> {
        self.client.complete(&synthesis_prompt(input)).await
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponder {
    client: Arc<ChatClient>,
}

impl ChatResponder {
    pub fn new(client: Arc<ChatClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FollowUpResponder for ChatResponder {
    async fn answer(&self, question: &str, signal_context: &str) -> Result<String> {
        self.client
            .complete(&follow_up_prompt(question, signal_context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_registry::AssetRegistry;
    use crate::signal_ingest::SignalIngestor;

    fn signal(payload: &str) -> SignalEvent {
        SignalIngestor::new("BTCUSD").ingest(payload).unwrap()
    }

    #[test]
    fn buy_prompt_renders_indicators_and_missing_values() {
        let ev = signal(
            "Buy conditions met\nSymbol: ETHUSDT\nPrice: 2500.5\nRSI: 31.234\n\
             Quote Volume: 1500\nQuote Volume SMA: 1000",
        );
        let asset = AssetRegistry.resolve(&ev.symbol).asset();
        let prompt = buy_prompt(asset, &ev, &PositionContext::Flat);

        assert!(prompt.contains("analyst for Ethereum"));
        assert!(prompt.contains("Current position status: No open position"));
        assert!(prompt.contains("- Price: $2500.50"));
        assert!(prompt.contains("- RSI (14): 31.23"));
        assert!(prompt.contains("- Ratio: 1.50x"));
        assert!(prompt.contains("- OBV: N/A"));
        assert!(prompt.contains("VERDICT: BUY / SKIP"));
    }

    #[test]
    fn unknown_ratio_is_rendered_as_na() {
        let ev = signal("Sell conditions met\nPrice: 100\nQuote Volume: 10");
        let prompt = sell_prompt(AssetRegistry.fallback(), &ev, &PositionContext::Flat);
        assert!(prompt.contains("- Ratio: N/A"));
        assert!(prompt.contains("VERDICT: SELL / HOLD"));
    }

    #[test]
    fn synthesis_prompt_substitutes_absent_reviews() {
        let position = PositionContext::Flat;
        let input = SynthesisInput {
            asset: AssetRegistry.fallback(),
            signal_type: SignalType::BuySignal,
            buy_review: Some("VERDICT: BUY\nREASON: strong inflow"),
            sell_review: None,
            position: &position,
            market_context: "unavailable",
        };
        let prompt = synthesis_prompt(&input);
        assert!(prompt.contains("- Trigger: Buy signal"));
        assert!(prompt.contains("- Buy Agent: VERDICT: BUY"));
        assert!(prompt.contains("- Sell Agent: No sell signal"));
        assert!(prompt.contains("- Market data: unavailable"));
        assert!(prompt.contains("FINAL VERDICT: BUY / SELL / HOLD / PASS / SKIP"));
    }

    #[test]
    fn follow_up_prompt_quotes_question_and_context() {
        let prompt = follow_up_prompt("why skip?", "{\"symbol\": \"BTCUSD\"}");
        assert!(prompt.starts_with("User follow-up on last signal: \"why skip?\""));
        assert!(prompt.contains("Last signal data for context:\n{\"symbol\": \"BTCUSD\"}"));
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let client = ChatClient::new(
            "super-secret",
            EvaluatorParams::default(),
            Duration::from_secs(5),
        )
        .unwrap();
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
