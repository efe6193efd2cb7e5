// =============================================================================
// Asset Registry — static symbol -> metadata resolution
// =============================================================================
//
// The table is fixed at compile time. Unknown symbols resolve to the BTCUSD
// entry, but the result is tagged `Fallback` so callers can tell a genuine
// match from a stand-in and decide whether to proceed.
// =============================================================================

use serde::Serialize;

/// Immutable metadata for a tradable asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    /// Normalised trading symbol, e.g. `BTCUSD`.
    pub symbol: &'static str,
    /// Identifier understood by the market-data provider (CoinGecko id).
    pub external_id: &'static str,
    pub display_name: &'static str,
}

const ASSETS: &[Asset] = &[
    Asset {
        symbol: "BTCUSD",
        external_id: "bitcoin",
        display_name: "Bitcoin",
    },
    Asset {
        symbol: "ETHUSD",
        external_id: "ethereum",
        display_name: "Ethereum",
    },
    Asset {
        symbol: "SOLUSD",
        external_id: "solana",
        display_name: "Solana",
    },
    Asset {
        symbol: "SUIUSD",
        external_id: "sui",
        display_name: "Sui",
    },
];

/// Outcome of a registry resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetMatch {
    /// The symbol is in the table.
    Known(&'static Asset),
    /// The symbol is unknown; the default asset stands in.
    Fallback(&'static Asset),
}

impl AssetMatch {
    pub fn asset(&self) -> &'static Asset {
        match self {
            Self::Known(a) | Self::Fallback(a) => a,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AssetRegistry;

impl AssetRegistry {
    /// Exact lookup; `None` for unknown symbols.
    pub fn lookup(&self, symbol: &str) -> Option<&'static Asset> {
        ASSETS.iter().find(|a| a.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Lookup with the default asset as a tagged stand-in.
    pub fn resolve(&self, symbol: &str) -> AssetMatch {
        match self.lookup(symbol) {
            Some(asset) => AssetMatch::Known(asset),
            None => AssetMatch::Fallback(self.fallback()),
        }
    }

    pub fn fallback(&self) -> &'static Asset {
        // The table always contains the fallback entry.
        &ASSETS[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_symbol_resolves_to_its_asset() {
        let registry = AssetRegistry;
        let m = registry.resolve("SOLUSD");
        assert!(!m.is_fallback());
        assert_eq!(m.asset().external_id, "solana");
        assert_eq!(registry.lookup("ethusd").map(|a| a.display_name), Some("Ethereum"));
    }

    #[test]
    fn unknown_symbol_is_tagged_fallback() {
        let registry = AssetRegistry;
        assert!(registry.lookup("DOGEUSD").is_none());
        let m = registry.resolve("DOGEUSD");
        assert!(m.is_fallback());
        assert_eq!(m.asset().symbol, "BTCUSD");
    }

    #[test]
    fn fallback_entry_is_first_in_table() {
        assert_eq!(AssetRegistry.fallback().symbol, "BTCUSD");
        assert_eq!(ASSETS.len(), 4);
    }
}
