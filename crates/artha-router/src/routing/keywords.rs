//! Deterministic phrase → provider pre-routing.
//!
//! The table holds provider-specific vocabulary only — terms distinctive
//! enough that a match is unambiguous ("stablecoin", "bilateral trade",
//! "residential property price"). Generic indicator names ("GDP",
//! "unemployment rate") must never appear here; they would let the
//! broadest-coverage default provider swallow specialized queries.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{normalize_phrase, ProviderId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRule {
    pub provider: ProviderId,
    pub phrases: Vec<String>,
}

/// Rules are evaluated in declaration order and the first match wins; the
/// order below is the documented, stable tie-break.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordTable {
    pub rules: Vec<KeywordRule>,
}

impl Default for KeywordTable {
    fn default() -> Self {
        let rule = |provider: ProviderId, phrases: &[&str]| KeywordRule {
            provider,
            phrases: phrases.iter().map(|p| p.to_string()).collect(),
        };
        Self {
            rules: vec![
                rule(
                    ProviderId::CoinGecko,
                    &["stablecoin", "bitcoin", "ethereum", "cryptocurrency", "crypto market", "defi"],
                ),
                rule(
                    ProviderId::Comtrade,
                    &["bilateral trade", "trade between", "exports to", "imports from", "trade flows"],
                ),
                rule(
                    ProviderId::Bis,
                    &[
                        "property price",
                        "house price",
                        "residential property",
                        "credit to gdp",
                        "debt service ratio",
                    ],
                ),
                rule(
                    ProviderId::Imf,
                    &[
                        "balance of payments",
                        "current account balance",
                        "foreign exchange reserves",
                        "special drawing rights",
                    ],
                ),
                rule(
                    ProviderId::Ecb,
                    &["deposit facility", "main refinancing", "euro area interest rate"],
                ),
                rule(
                    ProviderId::Eurostat,
                    &["hicp", "harmonised index of consumer prices"],
                ),
                rule(
                    ProviderId::Bls,
                    &["nonfarm payrolls", "jolts", "job openings"],
                ),
                rule(
                    ProviderId::Fred,
                    &["building permits", "treasury yield", "fed funds", "case shiller"],
                ),
            ],
        }
    }
}

impl KeywordTable {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read keyword table: {}", e))?;
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse keyword table: {}", e))
    }
}

#[derive(Debug, Clone)]
pub struct KeywordPreRouter {
    table: KeywordTable,
}

impl KeywordPreRouter {
    pub fn new(table: KeywordTable) -> Self {
        Self { table }
    }

    /// First provider whose registered phrase appears in the text, on word
    /// boundaries after normalization.
    pub fn route(&self, text: &str) -> Option<ProviderId> {
        let padded = format!(" {} ", normalize_phrase(text));
        for rule in &self.table.rules {
            for phrase in &rule.phrases {
                let needle = format!(" {} ", normalize_phrase(phrase));
                if padded.contains(&needle) {
                    tracing::debug!(
                        provider = %rule.provider,
                        phrase = %phrase,
                        "Keyword pre-router matched"
                    );
                    return Some(rule.provider);
                }
            }
        }
        None
    }
}

impl Default for KeywordPreRouter {
    fn default() -> Self {
        Self::new(KeywordTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_terms_route_to_coingecko() {
        let router = KeywordPreRouter::default();
        assert_eq!(router.route("stablecoin market cap growth"), Some(ProviderId::CoinGecko));
        assert_eq!(router.route("Bitcoin dominance over time"), Some(ProviderId::CoinGecko));
    }

    #[test]
    fn test_trade_terms_route_to_comtrade() {
        let router = KeywordPreRouter::default();
        assert_eq!(router.route("German exports to France"), Some(ProviderId::Comtrade));
        assert_eq!(router.route("bilateral trade with Japan"), Some(ProviderId::Comtrade));
    }

    #[test]
    fn test_property_terms_route_to_bis() {
        let router = KeywordPreRouter::default();
        assert_eq!(
            router.route("residential property prices in Korea"),
            Some(ProviderId::Bis)
        );
    }

    #[test]
    fn test_generic_indicators_do_not_match() {
        let router = KeywordPreRouter::default();
        assert_eq!(router.route("unemployment rate"), None);
        assert_eq!(router.route("GDP growth"), None);
        assert_eq!(router.route("inflation"), None);
    }

    #[test]
    fn test_word_boundaries_respected() {
        let router = KeywordPreRouter::default();
        // "bitcoins" is not the registered token "bitcoin".
        assert_eq!(router.route("bitcoinsomething index"), None);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        // A phrase registered for two providers resolves to the earlier rule.
        let table = KeywordTable {
            rules: vec![
                KeywordRule {
                    provider: ProviderId::Bis,
                    phrases: vec!["credit gap".into()],
                },
                KeywordRule {
                    provider: ProviderId::Imf,
                    phrases: vec!["credit gap".into()],
                },
            ],
        };
        let router = KeywordPreRouter::new(table);
        assert_eq!(router.route("credit gap for Spain"), Some(ProviderId::Bis));
    }
}
