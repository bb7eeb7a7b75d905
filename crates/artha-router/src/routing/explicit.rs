//! Detection of user-forced provider mentions.
//!
//! A mention counts as explicit when the provider name opens the query, sits
//! after a connector word ("from", "using", "via", "per", "according to"), or
//! is followed by a data token ("data", "dataset", "series", ...). A mention
//! followed within two tokens by an aggregate or plural marker is never
//! explicit: "OECD countries" and "IMF member economies" describe country
//! groups, not source requests. False negatives fall through to later routing
//! tiers; false positives for the excluded patterns are structurally
//! impossible.

use crate::types::{ParsedIntent, ProviderId};

const CONNECTORS: &[&str] = &["from", "using", "via", "per"];
const DATA_TOKENS: &[&str] = &["data", "dataset", "datasets", "series", "statistics", "figures"];
const AGGREGATE_MARKERS: &[&str] = &[
    "countries", "members", "member", "nations", "economies", "average", "averages", "total",
    "totals", "aggregate", "aggregates",
];

/// Alias token sequences per provider, checked longest-first so that
/// "european central bank" is never half-matched.
fn provider_aliases() -> &'static [(ProviderId, &'static [&'static str])] {
    &[
        (ProviderId::Bis, &["bank", "for", "international", "settlements"]),
        (ProviderId::Bls, &["bureau", "of", "labor", "statistics"]),
        (ProviderId::Fred, &["federal", "reserve", "economic", "data"]),
        (ProviderId::Ecb, &["european", "central", "bank"]),
        (ProviderId::Imf, &["international", "monetary", "fund"]),
        (ProviderId::Comtrade, &["un", "comtrade"]),
        (ProviderId::WorldBank, &["world", "bank"]),
        (ProviderId::CoinGecko, &["coin", "gecko"]),
        (ProviderId::CoinGecko, &["coingecko"]),
        (ProviderId::Eurostat, &["eurostat"]),
        (ProviderId::Comtrade, &["comtrade"]),
        (ProviderId::Fred, &["fred"]),
        (ProviderId::Oecd, &["oecd"]),
        (ProviderId::Imf, &["imf"]),
        (ProviderId::Ecb, &["ecb"]),
        (ProviderId::Bis, &["bis"]),
        (ProviderId::Bls, &["bls"]),
    ]
}

#[derive(Debug, Default)]
pub struct ExplicitProviderDetector;

impl ExplicitProviderDetector {
    pub fn new() -> Self {
        Self
    }

    /// Returns the user-forced provider, if any. Trusts an explicit provider
    /// already extracted upstream, then scans the raw query.
    pub fn detect(&self, intent: &ParsedIntent) -> Option<ProviderId> {
        if let Some(provider) = intent.explicit_provider {
            return Some(provider);
        }
        self.detect_in_text(&intent.raw_query)
    }

    pub fn detect_in_text(&self, text: &str) -> Option<ProviderId> {
        let normalized = crate::types::normalize_phrase(text);
        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        if tokens.is_empty() {
            return None;
        }

        // Earliest accepted mention wins.
        let mut best: Option<(usize, ProviderId)> = None;
        for (provider, alias) in provider_aliases() {
            for start in 0..tokens.len() {
                if !matches_at(&tokens, start, alias) {
                    continue;
                }
                let end = start + alias.len();
                if followed_by_aggregate(&tokens, end) {
                    continue;
                }
                if !is_explicit_mention(&tokens, start, end) {
                    continue;
                }
                if best.map_or(true, |(pos, _)| start < pos) {
                    best = Some((start, *provider));
                }
                break;
            }
        }
        best.map(|(_, provider)| provider)
    }
}

fn matches_at(tokens: &[&str], start: usize, alias: &[&str]) -> bool {
    tokens.len() >= start + alias.len()
        && alias.iter().zip(&tokens[start..]).all(|(a, t)| a == t)
}

/// Aggregate/plural marker within two tokens after the mention.
fn followed_by_aggregate(tokens: &[&str], end: usize) -> bool {
    tokens[end..]
        .iter()
        .take(2)
        .any(|t| AGGREGATE_MARKERS.contains(t))
}

fn is_explicit_mention(tokens: &[&str], start: usize, end: usize) -> bool {
    // Query opens with the provider name.
    if start == 0 {
        return true;
    }
    // Connector word before the mention, allowing one article in between:
    // "from eurostat", "via the imf", "according to oecd".
    let mut at = start;
    if tokens[at - 1] == "the" && at >= 2 {
        at -= 1;
    }
    if at >= 1 {
        let before = tokens[at - 1];
        if CONNECTORS.contains(&before) {
            return true;
        }
        if before == "to" && at >= 2 && tokens[at - 2] == "according" {
            return true;
        }
    }
    // Data token right after: "world bank data on poverty".
    tokens.get(end).map_or(false, |t| DATA_TOKENS.contains(t))
}
