// =============================================================================
// Validation Reporter — historical readiness score for real-money trading
// =============================================================================
//
// Inputs are the full Trade and VerdictRecord histories. Below the minimum
// signal count the report is `InsufficientData`; otherwise:
//
//   win rate        wins / total trades              (breakeven is not a win)
//   profit factor   gross wins / gross |losses|      (∞ with wins and no
//                                                      losses, 0 with neither)
//   expectancy      mean realised profit per trade
//   max drawdown    largest drop of cumulative profit below its running peak,
//                   the peak starting at 0
//   acceptance      buy signals that opened a position / buy signals
//
// Readiness score: base 40
//   +20 win rate ≥ 55 %      +15 profit factor ≥ 1.6   +15 expectancy ≥ $2.5
//   +10 drawdown ≤ $12       +10 trades ≥ 40
// clamped to [40, 100].
// =============================================================================

use serde::Serialize;

use crate::audit::{OutcomeKind, VerdictRecord};
use crate::notify::escape_html;
use crate::position_ledger::Trade;
use crate::types::{Action, SignalType};

pub const SCORE_BASE: u32 = 40;
pub const SCORE_MAX: u32 = 100;

const WIN_RATE_THRESHOLD: f64 = 0.55;
const PROFIT_FACTOR_THRESHOLD: f64 = 1.6;
const EXPECTANCY_THRESHOLD: f64 = 2.5;
const MAX_DRAWDOWN_THRESHOLD: f64 = 12.0;
const MIN_TRADES_THRESHOLD: usize = 40;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_profit: f64,
    /// Fraction in [0, 1].
    pub win_rate: f64,
    pub gross_wins: f64,
    pub gross_losses: f64,
    /// Serialised as `null` when infinite.
    pub profit_factor: f64,
    pub expectancy: f64,
    pub max_drawdown: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalStats {
    pub total: usize,
    pub buy_signals: usize,
    pub sell_signals: usize,
    /// Buy signals whose execution opened a position.
    pub entered_buys: usize,
    /// `None` when there were no buy signals.
    pub acceptance_rate: Option<f64>,
    pub passes: usize,
    pub holds: usize,
    pub skips: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessTier {
    StrongEdge,
    GettingClose,
    KeepPaperTrading,
}

impl ReadinessTier {
    pub fn from_score(score: u32) -> Self {
        if score >= 80 {
            Self::StrongEdge
        } else if score >= 65 {
            Self::GettingClose
        } else {
            Self::KeepPaperTrading
        }
    }

    pub fn headline(&self) -> &'static str {
        match self {
            Self::StrongEdge => "✅ Strong edge — ready for small real allocation",
            Self::GettingClose => "⚠️ Getting close — need more data",
            Self::KeepPaperTrading => "⏳ Keep paper trading",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadinessReport {
    pub metrics: PerformanceMetrics,
    pub signals: SignalStats,
    pub score: u32,
    pub tier: ReadinessTier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationReport {
    InsufficientData { signals: usize, required: usize },
    Ready(ReadinessReport),
}

// ---------------------------------------------------------------------------
// Computation
// ---------------------------------------------------------------------------

/// Largest peak-to-trough decline of the cumulative profit curve. The
/// running peak starts at 0, so an opening loss counts as drawdown.
pub fn max_drawdown(profits: impl IntoIterator<Item = f64>) -> f64 {
    let mut cumulative = 0.0_f64;
    let mut peak = 0.0_f64;
    let mut max_dd = 0.0_f64;
    for p in profits {
        cumulative += p;
        if cumulative > peak {
            peak = cumulative;
        }
        let dd = peak - cumulative;
        if dd > max_dd {
            max_dd = dd;
        }
    }
    max_dd
}

impl PerformanceMetrics {
    /// `trades` must be in chronological order.
    pub fn compute(trades: &[Trade]) -> Self {
        let mut wins = 0usize;
        let mut losses = 0usize;
        let mut gross_wins = 0.0_f64;
        let mut gross_losses = 0.0_f64;

        for trade in trades {
            if trade.profit > 0.0 {
                wins += 1;
                gross_wins += trade.profit;
            } else if trade.profit < 0.0 {
                losses += 1;
                gross_losses += trade.profit.abs();
            }
        }

        let total_trades = trades.len();
        let total_profit: f64 = trades.iter().map(|t| t.profit).sum();

        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64
        } else {
            0.0
        };

        let profit_factor = if gross_losses > 0.0 {
            gross_wins / gross_losses
        } else if gross_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let expectancy = if total_trades > 0 {
            total_profit / total_trades as f64
        } else {
            0.0
        };

        Self {
            total_trades,
            wins,
            losses,
            total_profit,
            win_rate,
            gross_wins,
            gross_losses,
            profit_factor,
            expectancy,
            max_drawdown: max_drawdown(trades.iter().map(|t| t.profit)),
        }
    }
}

impl SignalStats {
    pub fn compute(records: &[VerdictRecord]) -> Self {
        let count_type = |ty: SignalType| records.iter().filter(|r| r.signal_type == ty).count();
        let count_action = |a: Action| records.iter().filter(|r| r.final_action == a).count();

        let buy_signals = count_type(SignalType::BuySignal);
        let entered_buys = records
            .iter()
            .filter(|r| r.signal_type == SignalType::BuySignal && r.outcome == OutcomeKind::Opened)
            .count();

        Self {
            total: records.len(),
            buy_signals,
            sell_signals: count_type(SignalType::SellSignal),
            entered_buys,
            acceptance_rate: (buy_signals > 0).then(|| entered_buys as f64 / buy_signals as f64),
            passes: count_action(Action::Pass),
            holds: count_action(Action::Hold),
            skips: count_action(Action::Skip),
        }
    }
}

/// Composite readiness score in `[SCORE_BASE, SCORE_MAX]`.
pub fn readiness_score(m: &PerformanceMetrics) -> u32 {
    let mut score = SCORE_BASE;
    if m.win_rate >= WIN_RATE_THRESHOLD {
        score += 20;
    }
    if m.profit_factor >= PROFIT_FACTOR_THRESHOLD {
        score += 15;
    }
    if m.expectancy >= EXPECTANCY_THRESHOLD {
        score += 15;
    }
    if m.max_drawdown <= MAX_DRAWDOWN_THRESHOLD {
        score += 10;
    }
    if m.total_trades >= MIN_TRADES_THRESHOLD {
        score += 10;
    }
    score.clamp(SCORE_BASE, SCORE_MAX)
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationReporter {
    min_signals: usize,
}

impl ValidationReporter {
    pub fn new(min_signals: usize) -> Self {
        Self { min_signals }
    }

    pub fn report(&self, trades: &[Trade], records: &[VerdictRecord]) -> ValidationReport {
        if records.len() < self.min_signals {
            return ValidationReport::InsufficientData {
                signals: records.len(),
                required: self.min_signals,
            };
        }

        let mut ordered = trades.to_vec();
        ordered.sort_by_key(|t| t.closed_at);

        let metrics = PerformanceMetrics::compute(&ordered);
        let score = readiness_score(&metrics);

        ValidationReport::Ready(ReadinessReport {
            signals: SignalStats::compute(records),
            tier: ReadinessTier::from_score(score),
            score,
            metrics,
        })
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn signed_usd(v: f64) -> String {
    if v >= 0.0 {
        format!("+${v:.2}")
    } else {
        format!("-${:.2}", v.abs())
    }
}

impl ValidationReport {
    /// HTML body for the notification sink.
    pub fn render_html(&self) -> String {
        match self {
            Self::InsufficientData { signals, required } => format!(
                "<b>Validation Report</b>\n\nNot enough signals yet ({signals}/{required} minimum).\n\
                 Keep paper trading."
            ),
            Self::Ready(r) => {
                let m = &r.metrics;
                let s = &r.signals;
                let pf = if m.profit_factor.is_infinite() {
                    "∞".to_string()
                } else {
                    format!("{:.2}", m.profit_factor)
                };
                let acceptance = s.acceptance_rate.unwrap_or(0.0) * 100.0;
                format!(
                    "<b>Validation Report — Real-Money Readiness</b>\n\n\
                     Closed trades: {} | Realized P&amp;L: {}\n\
                     Win rate: {:.1}% | Profit factor: {} | Expectancy: ${:.2}\n\
                     Max realized drawdown: ${:.2}\n\n\
                     Signal stats ({} total):\n\
                     Buy signals: {} → {} entered ({:.1}% acceptance)\n\
                     Sell signals: {}\n\
                     Passes: {} | Holds: {} | Skips: {}\n\n\
                     <b>Go-Live Score: {}/100</b>\n{}",
                    m.total_trades,
                    signed_usd(m.total_profit),
                    m.win_rate * 100.0,
                    pf,
                    m.expectancy,
                    m.max_drawdown,
                    s.total,
                    s.buy_signals,
                    s.entered_buys,
                    acceptance,
                    s.sell_signals,
                    s.passes,
                    s.holds,
                    s.skips,
                    r.score,
                    escape_html(r.tier.headline()),
                )
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn trades(profits: &[f64]) -> Vec<Trade> {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        profits
            .iter()
            .enumerate()
            .map(|(i, &p)| Trade {
                id: format!("t{i}"),
                symbol: "BTCUSD".into(),
                entry_price: 100.0,
                exit_price: 100.0 + p,
                size_usd: 100.0,
                profit: p,
                opened_at: None,
                closed_at: t0 + Duration::hours(i as i64),
            })
            .collect()
    }

    fn records(n: usize, signal_type: SignalType, action: Action, outcome: OutcomeKind) -> Vec<VerdictRecord> {
        (0..n)
            .map(|i| VerdictRecord {
                signal_id: format!("s{i}"),
                symbol: "BTCUSD".into(),
                signal_type,
                sub_verdicts: Vec::new(),
                final_action: action,
                outcome,
                price: 100.0,
                timestamp: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn drawdown_tracks_running_peak() {
        // cumulative: 10, 5, 7, -1, 19
        let dd = max_drawdown([10.0, -5.0, 2.0, -8.0, 20.0]);
        assert!((dd - 11.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_counts_opening_losses() {
        assert!((max_drawdown([-3.0, -2.0, 1.0]) - 5.0).abs() < 1e-9);
        assert_eq!(max_drawdown(Vec::<f64>::new()), 0.0);
    }

    #[test]
    fn nineteen_signals_is_insufficient() {
        let reporter = ValidationReporter::new(20);
        let recs = records(19, SignalType::BuySignal, Action::Skip, OutcomeKind::NoTrade);
        assert_eq!(
            reporter.report(&[], &recs),
            ValidationReport::InsufficientData {
                signals: 19,
                required: 20
            }
        );
    }

    #[test]
    fn twenty_signals_produce_bounded_score() {
        let reporter = ValidationReporter::new(20);
        let recs = records(20, SignalType::BuySignal, Action::Skip, OutcomeKind::NoTrade);
        for history in [vec![], vec![10.0, -5.0, 2.0, -8.0, 20.0], vec![-50.0; 10]] {
            match reporter.report(&trades(&history), &recs) {
                ValidationReport::Ready(r) => {
                    assert!((SCORE_BASE..=SCORE_MAX).contains(&r.score), "score {}", r.score)
                }
                other => panic!("expected ready report, got {other:?}"),
            }
        }
    }

    #[test]
    fn metrics_for_mixed_history() {
        let m = PerformanceMetrics::compute(&trades(&[10.0, -5.0, 2.0, -8.0, 20.0]));
        assert_eq!(m.total_trades, 5);
        assert_eq!((m.wins, m.losses), (3, 2));
        assert!((m.total_profit - 19.0).abs() < 1e-9);
        assert!((m.win_rate - 0.6).abs() < 1e-9);
        assert!((m.profit_factor - 32.0 / 13.0).abs() < 1e-9);
        assert!((m.expectancy - 3.8).abs() < 1e-9);
        assert!((m.max_drawdown - 11.0).abs() < 1e-9);
        // 40 + 20 (win rate) + 15 (pf) + 15 (expectancy) + 10 (dd ≤ 12)
        assert_eq!(readiness_score(&m), 100);
    }

    #[test]
    fn profit_factor_edge_cases() {
        assert!(PerformanceMetrics::compute(&trades(&[5.0, 3.0])).profit_factor.is_infinite());
        assert_eq!(PerformanceMetrics::compute(&[]).profit_factor, 0.0);
        assert_eq!(PerformanceMetrics::compute(&trades(&[0.0])).profit_factor, 0.0);
    }

    #[test]
    fn losing_history_scores_base() {
        let m = PerformanceMetrics::compute(&trades(&[-20.0, -1.0]));
        assert_eq!(readiness_score(&m), SCORE_BASE);
        assert_eq!(ReadinessTier::from_score(SCORE_BASE), ReadinessTier::KeepPaperTrading);
    }

    #[test]
    fn trades_are_ordered_by_close_time() {
        let mut history = trades(&[-8.0, 20.0, 10.0]);
        history.reverse();
        let reporter = ValidationReporter::new(0);
        let ValidationReport::Ready(r) = reporter.report(&history, &[]) else {
            panic!("expected ready report");
        };
        // chronological: -8, 20, 10 -> drawdown 8 from the zero peak
        assert!((r.metrics.max_drawdown - 8.0).abs() < 1e-9);
    }

    #[test]
    fn acceptance_counts_opened_buy_signals() {
        let mut recs = records(3, SignalType::BuySignal, Action::Buy, OutcomeKind::Opened);
        recs.extend(records(1, SignalType::BuySignal, Action::Buy, OutcomeKind::AlreadyOpen));
        recs.extend(records(4, SignalType::BuySignal, Action::Skip, OutcomeKind::NoTrade));
        recs.extend(records(2, SignalType::SellSignal, Action::Hold, OutcomeKind::NoTrade));

        let s = SignalStats::compute(&recs);
        assert_eq!((s.buy_signals, s.sell_signals, s.entered_buys), (8, 2, 3));
        assert!((s.acceptance_rate.unwrap() - 0.375).abs() < 1e-9);
        assert_eq!((s.passes, s.holds, s.skips), (0, 2, 4));

        assert_eq!(SignalStats::compute(&[]).acceptance_rate, None);
    }

    #[test]
    fn tiers_follow_score_bands() {
        assert_eq!(ReadinessTier::from_score(80), ReadinessTier::StrongEdge);
        assert_eq!(ReadinessTier::from_score(79), ReadinessTier::GettingClose);
        assert_eq!(ReadinessTier::from_score(65), ReadinessTier::GettingClose);
        assert_eq!(ReadinessTier::from_score(64), ReadinessTier::KeepPaperTrading);
    }

    #[test]
    fn render_html_shapes() {
        let short = ValidationReport::InsufficientData {
            signals: 3,
            required: 20,
        };
        assert!(short.render_html().contains("(3/20 minimum)"));

        let reporter = ValidationReporter::new(1);
        let recs = records(2, SignalType::BuySignal, Action::Buy, OutcomeKind::Opened);
        let html = reporter.report(&trades(&[5.0, 3.0]), &recs).render_html();
        assert!(html.contains("Realized P&amp;L: +$8.00"));
        assert!(html.contains("Profit factor: ∞"));
        assert!(html.contains("Buy signals: 2 → 2 entered (100.0% acceptance)"));
        assert!(html.contains("<b>Go-Live Score: "));
    }
}
