// =============================================================================
// Notification Formatting — HTML messages for the Telegram sink
// =============================================================================
//
// Free text from evaluators is escaped before it is embedded; only the
// markup produced here (<b>, <i>) reaches the sink unescaped.
//
// Length is enforced here, not in the sink: when a message would exceed
// Telegram's limit, the free-text sections are clipped after escaping, on
// an entity boundary, so the markup around them stays intact.
// =============================================================================

use crate::asset_registry::AssetMatch;
use crate::execution::ExecutionOutcome;
use crate::position_ledger::PositionContext;
use crate::signal_ingest::SignalEvent;

/// Telegram rejects messages longer than this.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Sections whose length comes from collaborators: market context, both
/// reviews and the synthesis.
const FREE_TEXT_SECTIONS: usize = 4;

/// Escape the three characters Telegram's HTML parse mode reserves.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape `text` and cut the result to at most `max_chars`, ending in `…`
/// when anything was dropped. Never splits an entity.
pub fn escape_clipped(text: &str, max_chars: usize) -> String {
    let escaped = escape_html(text);
    if escaped.chars().count() <= max_chars {
        return escaped;
    }
    if max_chars == 0 {
        return String::new();
    }

    let mut cut: String = escaped.chars().take(max_chars - 1).collect();
    if let Some(amp) = cut.rfind('&') {
        if !cut[amp..].contains(';') {
            cut.truncate(amp);
        }
    }
    cut.push('…');
    cut
}

/// Everything shown for one processed signal.
#[derive(Debug, Clone)]
pub struct SignalNotification<'a> {
    pub timeframe: &'a str,
    pub signal: &'a SignalEvent,
    pub asset: AssetMatch,
    pub position: &'a PositionContext,
    /// `None` when the market-context provider failed.
    pub market_context: Option<&'a str>,
    pub buy_review: Option<&'a str>,
    pub sell_review: Option<&'a str>,
    pub synthesis: &'a str,
    pub outcome: &'a ExecutionOutcome,
    /// Append the "Reply for follow-up." footer.
    pub follow_up_hint: bool,
}

impl SignalNotification<'_> {
    /// HTML body, at most [`MAX_MESSAGE_CHARS`] long.
    pub fn render(&self) -> String {
        let full = self.render_with(None);
        if full.chars().count() <= MAX_MESSAGE_CHARS {
            return full;
        }

        let overhead = self.render_with(Some(0)).chars().count();
        let per_section = MAX_MESSAGE_CHARS.saturating_sub(overhead) / FREE_TEXT_SECTIONS;
        self.render_with(Some(per_section))
    }

    fn render_with(&self, section_limit: Option<usize>) -> String {
        let free = |text: &str| match section_limit {
            Some(limit) => escape_clipped(text, limit),
            None => escape_html(text),
        };
        let signal = self.signal;
        let mut msg = format!(
            "<b>{} {} {} Signal</b>\nPrice: ${:.2}\nRSI: {}\nRatio: {}\n\n",
            escape_html(self.timeframe),
            escape_html(&signal.symbol),
            signal.signal_type.label(),
            signal.price,
            signal
                .rsi()
                .map(|r| format!("{r:.2}"))
                .unwrap_or_else(|| "N/A".into()),
            signal
                .ratio
                .map(|r| format!("{r:.2}x"))
                .unwrap_or_else(|| "N/A".into()),
        );

        if let AssetMatch::Fallback(asset) = self.asset {
            msg.push_str(&format!(
                "<i>Unknown symbol, using {} market context</i>\n\n",
                asset.display_name
            ));
        }

        match self.position {
            PositionContext::Flat => {
                msg.push_str("<b>Current position:</b> Flat - no open position\n\n")
            }
            open => msg.push_str(&format!("<b>Current position:</b> {open}\n\n")),
        }

        match self.market_context {
            Some(ctx) => msg.push_str(&format!("<b>Market Context:</b>\n{}\n\n", free(ctx))),
            None => msg.push_str("<b>Market Context:</b> Data unavailable\n\n"),
        }

        msg.push_str(&format!(
            "<b>Buy Agent:</b>\n{}\n\n<b>Sell Agent:</b>\n{}\n\n<b>Alpha Final:</b>\n{}\n\n",
            free(self.buy_review.unwrap_or("No buy signal")),
            free(self.sell_review.unwrap_or("No sell signal")),
            free(self.synthesis),
        ));

        let note = execution_note(self.outcome);
        if !note.is_empty() {
            msg.push_str(&note);
            msg.push_str("\n\n");
        }
        if self.follow_up_hint {
            msg.push_str("Reply for follow-up.");
        }
        msg.trim_end().to_string()
    }
}

fn execution_note(outcome: &ExecutionOutcome) -> String {
    match outcome {
        ExecutionOutcome::Opened { position } => format!(
            "<b>Trade executed:</b> <b>BUY</b>: ${:.2} at ${:.2}",
            position.size_usd.unwrap_or_default(),
            position.entry_price.unwrap_or_default()
        ),
        ExecutionOutcome::Closed {
            trade,
            cumulative_profit,
        } => format!(
            "<b>Trade executed:</b> <b>SELL</b>: ${:.2} at ${:.2}\nProfit: ${:.2}\nCumulative: ${:.2}",
            trade.size_usd, trade.exit_price, trade.profit, cumulative_profit
        ),
        ExecutionOutcome::AlreadyOpen | ExecutionOutcome::NothingToSell => {
            format!("<b>Execution:</b> {outcome}")
        }
        ExecutionOutcome::Rejected { reason } => {
            format!("<b>Execution rejected:</b> {}", escape_html(reason))
        }
        ExecutionOutcome::NoTrade { .. } => String::new(),
    }
}
