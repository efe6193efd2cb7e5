// =============================================================================
// Signal Ingestor — raw `key: value` webhook text -> typed SignalEvent
// =============================================================================
//
// Parsing rules:
//   - Every line containing ':' is split on the first colon; key and value
//     are trimmed. Numeric-looking values become numbers, the rest stay text.
//   - `Price` must be present and numeric, otherwise MalformedSignal.
//   - Signal type comes from a case-insensitive "buy conditions" /
//     "sell conditions" marker anywhere in the payload (buy wins if both).
//   - The symbol is upper-cased, a trailing USDT becomes USD, and USD is
//     appended when missing.
//
// A rejected payload produces no side effects beyond a log line.
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::SignalType;

const BUY_MARKER: &str = "buy conditions";
const SELL_MARKER: &str = "sell conditions";

pub const KEY_PRICE: &str = "Price";
pub const KEY_RSI: &str = "RSI";
pub const KEY_QUOTE_VOLUME: &str = "Quote Volume";
pub const KEY_QUOTE_VOLUME_SMA: &str = "Quote Volume SMA";
pub const KEY_OBV: &str = "OBV";
pub const KEY_OBV_MA: &str = "OBV MA";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("malformed signal: {reason}")]
    MalformedSignal { reason: String },

    #[error("unknown signal type: payload names neither buy nor sell conditions")]
    UnknownSignalType,
}

// ---------------------------------------------------------------------------
// Parsed payload
// ---------------------------------------------------------------------------

/// A single parsed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Coerce a raw value. Accepts an optional leading `$` and thousands
    /// separators; anything non-finite stays text.
    pub fn coerce(raw: &str) -> Self {
        let trimmed = raw.trim();
        let cleaned: String = trimmed
            .trim_start_matches('$')
            .chars()
            .filter(|c| *c != ',')
            .collect();
        match cleaned.parse::<f64>() {
            Ok(n) if n.is_finite() && !cleaned.is_empty() => Self::Number(n),
            _ => Self::Text(trimmed.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

/// Split a payload into `key -> value` fields. Later duplicates win.
pub fn parse_fields(payload: &str) -> BTreeMap<String, FieldValue> {
    payload
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), FieldValue::coerce(v)))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// SignalEvent
// ---------------------------------------------------------------------------

/// A validated inbound signal. Never mutated after ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct SignalEvent {
    /// UUID v4, carried into the audit trail as the signal id.
    pub id: String,
    pub symbol: String,
    pub signal_type: SignalType,
    pub price: f64,
    /// Every numeric field except `Price`.
    pub indicators: BTreeMap<String, f64>,
    /// Quote volume over its SMA. `None` means unknown, not zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl SignalEvent {
    pub fn indicator(&self, key: &str) -> Option<f64> {
        self.indicators.get(key).copied()
    }

    pub fn rsi(&self) -> Option<f64> {
        self.indicator(KEY_RSI)
    }
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

pub struct SignalIngestor {
    symbol_pattern: Regex,
    default_symbol: String,
}

impl SignalIngestor {
    /// `default_symbol` is used when the payload has no `Symbol` field.
    pub fn new(default_symbol: impl Into<String>) -> Self {
        Self {
            // Optional exchange prefix, e.g. "Symbol: BINANCE:BTCUSDT".
            symbol_pattern: Regex::new(r"(?im)^[ \t]*symbol[ \t]*:[ \t]*(?:[A-Z0-9_]+:)?([A-Z0-9]+)")
                .expect("symbol pattern is valid"),
            default_symbol: normalize_symbol(&default_symbol.into()),
        }
    }

    /// Parse and validate a raw payload, stamping it with the current time.
    pub fn ingest(&self, payload: &str) -> Result<SignalEvent, IngestError> {
        self.ingest_at(payload, Utc::now())
    }

    pub fn ingest_at(
        &self,
        payload: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<SignalEvent, IngestError> {
        let fields = parse_fields(payload);

        let price = match fields.get(KEY_PRICE) {
            Some(FieldValue::Number(p)) => *p,
            Some(FieldValue::Text(t)) => {
                return Err(IngestError::MalformedSignal {
                    reason: format!("Price is not numeric: {t:?}"),
                })
            }
            None => {
                return Err(IngestError::MalformedSignal {
                    reason: "Price field missing".to_string(),
                })
            }
        };

        let signal_type = classify(payload).ok_or(IngestError::UnknownSignalType)?;

        let symbol = match self.symbol_pattern.captures(payload).and_then(|c| c.get(1)) {
            Some(m) => normalize_symbol(m.as_str()),
            None => {
                warn!(default = %self.default_symbol, "signal has no Symbol field, using default");
                self.default_symbol.clone()
            }
        };

        let indicators: BTreeMap<String, f64> = fields
            .iter()
            .filter(|(k, _)| k.as_str() != KEY_PRICE)
            .filter_map(|(k, v)| v.as_number().map(|n| (k.clone(), n)))
            .collect();

        let ratio = match (
            indicators.get(KEY_QUOTE_VOLUME),
            indicators.get(KEY_QUOTE_VOLUME_SMA),
        ) {
            (Some(vol), Some(sma)) if *sma != 0.0 => Some(vol / sma),
            _ => None,
        };

        let event = SignalEvent {
            id: Uuid::new_v4().to_string(),
            symbol,
            signal_type,
            price,
            indicators,
            ratio,
            timestamp,
        };

        debug!(
            id = %event.id,
            symbol = %event.symbol,
            signal_type = %event.signal_type,
            price = event.price,
            ratio = ?event.ratio,
            "signal ingested"
        );

        Ok(event)
    }
}

fn classify(payload: &str) -> Option<SignalType> {
    let lower = payload.to_lowercase();
    if lower.contains(BUY_MARKER) {
        Some(SignalType::BuySignal)
    } else if lower.contains(SELL_MARKER) {
        Some(SignalType::SellSignal)
    } else {
        None
    }
}

/// Upper-case, rewrite a trailing `USDT` to `USD`, append `USD` if missing.
pub fn normalize_symbol(raw: &str) -> String {
    let mut symbol = raw.trim().to_uppercase();
    if let Some(base) = symbol.strip_suffix("USDT") {
        symbol = format!("{base}USD");
    }
    if !symbol.ends_with("USD") {
        symbol.push_str("USD");
    }
    symbol
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const BUY_PAYLOAD: &str = "TBO Buy Conditions met\n\
        Symbol: BINANCE:BTCUSDT\n\
        Price: 64250.5\n\
        RSI: 38.2\n\
        Quote Volume: 1500000\n\
        Quote Volume SMA: 1000000\n\
        OBV: 12345\n\
        OBV MA: 12000\n\
        Note: dip buy";

    fn ingestor() -> SignalIngestor {
        SignalIngestor::new("BTCUSD")
    }

    #[test]
    fn parses_buy_signal_fields() {
        let ev = ingestor().ingest(BUY_PAYLOAD).unwrap();
        assert_eq!(ev.signal_type, SignalType::BuySignal);
        assert_eq!(ev.symbol, "BTCUSD");
        assert!((ev.price - 64250.5).abs() < 1e-9);
        assert_eq!(ev.rsi(), Some(38.2));
        assert_eq!(ev.indicator(KEY_OBV_MA), Some(12000.0));
        assert!(!ev.indicators.contains_key(KEY_PRICE));
        assert!(!ev.indicators.contains_key("Note"));
        assert!((ev.ratio.unwrap() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn sell_marker_is_case_insensitive() {
        let ev = ingestor()
            .ingest("SELL CONDITIONS\nSymbol: ethusdt\nPrice: 3100")
            .unwrap();
        assert_eq!(ev.signal_type, SignalType::SellSignal);
        assert_eq!(ev.symbol, "ETHUSD");
    }

    #[test]
    fn missing_price_is_malformed() {
        let err = ingestor().ingest("buy conditions\nSymbol: SOL").unwrap_err();
        assert!(matches!(err, IngestError::MalformedSignal { .. }));
    }

    #[test]
    fn non_numeric_price_is_malformed() {
        let err = ingestor()
            .ingest("buy conditions\nPrice: soon")
            .unwrap_err();
        assert!(matches!(err, IngestError::MalformedSignal { .. }));
    }

    #[test]
    fn payload_without_marker_is_unknown_type() {
        let err = ingestor().ingest("Symbol: SOL\nPrice: 150").unwrap_err();
        assert_eq!(err, IngestError::UnknownSignalType);
    }

    #[test]
    fn ratio_unknown_when_either_volume_missing_or_sma_zero() {
        let ev = ingestor()
            .ingest("buy conditions\nPrice: 10\nQuote Volume: 500")
            .unwrap();
        assert!(ev.ratio.is_none());

        let ev = ingestor()
            .ingest("buy conditions\nPrice: 10\nQuote Volume: 500\nQuote Volume SMA: 0")
            .unwrap();
        assert!(ev.ratio.is_none());

        let ev = ingestor()
            .ingest("buy conditions\nPrice: 10\nQuote Volume: 500\nQuote Volume SMA: n/a")
            .unwrap();
        assert!(ev.ratio.is_none());
    }

    #[test]
    fn missing_symbol_uses_default() {
        let ev = SignalIngestor::new("ethusdt")
            .ingest("buy conditions\nPrice: 10")
            .unwrap();
        assert_eq!(ev.symbol, "ETHUSD");
    }

    #[test]
    fn blank_symbol_line_uses_default() {
        let ingestor = SignalIngestor::new("BTCUSD");

        let ev = ingestor.ingest("buy conditions\nSymbol:\nPrice: 100").unwrap();
        assert_eq!(ev.symbol, "BTCUSD");

        let ev = ingestor
            .ingest("buy conditions\nSymbol: \t\nRSI: 30\nPrice: 100")
            .unwrap();
        assert_eq!(ev.symbol, "BTCUSD");
        assert_eq!(ev.rsi(), Some(30.0));
    }

    #[test]
    fn symbol_normalisation_rules() {
        assert_eq!(normalize_symbol("btcusdt"), "BTCUSD");
        assert_eq!(normalize_symbol("SOL"), "SOLUSD");
        assert_eq!(normalize_symbol("SuiUsd"), "SUIUSD");
    }

    #[test]
    fn field_coercion() {
        assert_eq!(FieldValue::coerce(" 1,250.5 "), FieldValue::Number(1250.5));
        assert_eq!(FieldValue::coerce("$99"), FieldValue::Number(99.0));
        assert_eq!(FieldValue::coerce("0"), FieldValue::Number(0.0));
        assert_eq!(FieldValue::coerce("NaN"), FieldValue::Text("NaN".into()));
        assert_eq!(FieldValue::coerce(""), FieldValue::Text(String::new()));
    }

    #[test]
    fn value_containing_colon_keeps_remainder() {
        let fields = parse_fields("Time: 12:00\nPrice: 5");
        assert_eq!(fields.get("Time"), Some(&FieldValue::Text("12:00".into())));
        assert_eq!(fields.get("Price"), Some(&FieldValue::Number(5.0)));
    }
}
