// =============================================================================
// Verdict Resolver — free-text evaluations -> one canonical Action
// =============================================================================
//
// Decoding order over the synthesis text:
//   1. A labelled `FINAL VERDICT: <word>` line.
//   2. Otherwise the first labelled `VERDICT: <word>` line.
//   3. Otherwise the first whole-word vocabulary token anywhere.
// Matching is case-insensitive and tolerates markdown emphasis around the
// label. Anything else is `Unrecognized`, which always resolves to SKIP so
// ambiguous text can never move capital.
//
// BUY only makes sense on a flat symbol and SELL only on an open one. The
// resolver reports that consistency but does not enforce it; execution is
// idempotent against the ledger.
// =============================================================================

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::Action;

const VOCABULARY: &str = "BUY|SELL|HOLD|PASS|SKIP";

/// Tagged decoder result. Decoding never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "action", rename_all = "snake_case")]
pub enum Decoded {
    Recognized(Action),
    Unrecognized,
}

impl Decoded {
    /// Unrecognized text maps to SKIP.
    pub fn action(&self) -> Action {
        match self {
            Self::Recognized(a) => *a,
            Self::Unrecognized => Action::Skip,
        }
    }
}

/// The resolver's answer for one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub action: Action,
    pub decoded: Decoded,
    /// False when the action contradicts the position (BUY while open,
    /// SELL while flat). Execution turns those into no-ops.
    pub consistent_with_position: bool,
}

/// Whether `action` would change state given the current position.
pub fn fits_position(action: Action, position_open: bool) -> bool {
    match action {
        Action::Buy => !position_open,
        Action::Sell => position_open,
        Action::Hold | Action::Pass | Action::Skip => true,
    }
}

pub struct VerdictResolver {
    final_label: Regex,
    any_label: Regex,
    bare_token: Regex,
}

impl VerdictResolver {
    pub fn new() -> Self {
        let label = |prefix: &str| {
            Regex::new(&format!(
                r"(?im)^[\W_]*{prefix}verdict[\W_]*?[:\-][\s*_]*({VOCABULARY})\b"
            ))
            .expect("verdict label pattern is valid")
        };
        Self {
            final_label: label(r"final\s+"),
            any_label: label(""),
            bare_token: Regex::new(&format!(r"(?i)\b({VOCABULARY})\b"))
                .expect("verdict token pattern is valid"),
        }
    }

    /// Decode the action named by `text`.
    pub fn decode(&self, text: &str) -> Decoded {
        let word = [&self.final_label, &self.any_label, &self.bare_token]
            .into_iter()
            .find_map(|re| re.captures(text).and_then(|c| c.get(1)))
            .map(|m| m.as_str());

        match word.and_then(Action::from_word) {
            Some(action) => Decoded::Recognized(action),
            None => Decoded::Unrecognized,
        }
    }

    /// Reduce the synthesis text to one action, noting whether it fits the
    /// ledger's view of the symbol.
    pub fn resolve(&self, synthesis: &str, position_open: bool) -> Resolution {
        let decoded = self.decode(synthesis);
        let action = decoded.action();
        let consistent_with_position = fits_position(action, position_open);

        match decoded {
            Decoded::Unrecognized => {
                warn!("no verdict token in synthesis, defaulting to SKIP");
            }
            Decoded::Recognized(_) if !consistent_with_position => {
                debug!(%action, position_open, "verdict contradicts position, execution will no-op");
            }
            Decoded::Recognized(_) => {}
        }

        Resolution {
            action,
            decoded,
            consistent_with_position,
        }
    }
}

impl Default for VerdictResolver {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> Decoded {
        VerdictResolver::new().decode(text)
    }

    #[test]
    fn text_without_token_resolves_to_skip() {
        let r = VerdictResolver::new().resolve("The market looks choppy, stay patient.", false);
        assert_eq!(r.decoded, Decoded::Unrecognized);
        assert_eq!(r.action, Action::Skip);
        assert!(r.consistent_with_position);
    }

    #[test]
    fn empty_text_is_unrecognized() {
        assert_eq!(decode(""), Decoded::Unrecognized);
    }

    #[test]
    fn final_verdict_label_wins_over_earlier_tokens() {
        let text = "Buy Agent: VERDICT: BUY\nSell Agent: no sell signal\n\
                    FINAL VERDICT: HOLD\nREASON: momentum intact, buy later.";
        assert_eq!(decode(text), Decoded::Recognized(Action::Hold));
    }

    #[test]
    fn plain_verdict_label_is_used_when_no_final_label() {
        let text = "Should we sell? Not yet.\nVERDICT: SKIP\nREASON: weak ratio";
        assert_eq!(decode(text), Decoded::Recognized(Action::Skip));
    }

    #[test]
    fn markdown_emphasis_is_tolerated() {
        assert_eq!(
            decode("**FINAL VERDICT:** sell\nREASON: distribution"),
            Decoded::Recognized(Action::Sell)
        );
        assert_eq!(
            decode("- Final Verdict - **Buy**"),
            Decoded::Recognized(Action::Buy)
        );
    }

    #[test]
    fn bare_scan_takes_first_whole_word() {
        assert_eq!(decode("I would pass on this, not buy."), Decoded::Recognized(Action::Pass));
        // "buying" and "selling" are not vocabulary tokens.
        assert_eq!(decode("buying pressure, selling later"), Decoded::Unrecognized);
    }

    #[test]
    fn consistency_follows_position_state() {
        let resolver = VerdictResolver::new();
        assert!(!resolver.resolve("FINAL VERDICT: BUY", true).consistent_with_position);
        assert!(resolver.resolve("FINAL VERDICT: BUY", false).consistent_with_position);
        assert!(!resolver.resolve("FINAL VERDICT: SELL", false).consistent_with_position);
        assert!(resolver.resolve("FINAL VERDICT: SELL", true).consistent_with_position);
        assert!(resolver.resolve("FINAL VERDICT: HOLD", true).consistent_with_position);
    }

    #[test]
    fn inconsistent_action_is_still_reported() {
        let r = VerdictResolver::new().resolve("FINAL VERDICT: BUY", true);
        assert_eq!(r.action, Action::Buy);
    }
}
