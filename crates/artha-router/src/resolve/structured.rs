//! Structural-metadata lookup for providers that publish dataflow catalogs.
//!
//! Some providers describe their series through dataflows with named
//! dimensions rather than a flat code list. This tier queries that structure
//! directly: an exact dataflow id is near-certain, an exact name is strong,
//! and anything fuzzier is scaled down so the threshold decides.

use strsim::jaro_winkler;

use crate::catalog::CatalogSnapshot;
use crate::types::{normalize_phrase, IndicatorCandidate, ProviderId, SourceTier};

/// Score all dataflows of one provider against an already-normalized phrase,
/// best first. Empty when the provider publishes no structural catalog.
pub(crate) fn scan_dataflows(
    snapshot: &CatalogSnapshot,
    provider: ProviderId,
    normalized: &str,
) -> Vec<IndicatorCandidate> {
    let mut candidates: Vec<IndicatorCandidate> = snapshot
        .dataflows_for(provider)
        .iter()
        .map(|flow| {
            let id = normalize_phrase(&flow.id);
            let name = normalize_phrase(&flow.name);
            let score = if id == normalized {
                0.97
            } else if name == normalized {
                0.93
            } else if contains_either(&name, normalized) {
                0.72 + 0.2 * jaro_winkler(&name, normalized) as f32
            } else if !flow.description.is_empty()
                && normalize_phrase(&flow.description).contains(normalized)
            {
                0.74
            } else {
                0.8 * jaro_winkler(&name, normalized) as f32
            };
            IndicatorCandidate {
                provider,
                code: flow.id.clone(),
                display_name: flow.name.clone(),
                score,
                source_tier: SourceTier::Structured,
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

fn contains_either(name: &str, phrase: &str) -> bool {
    phrase.len() >= 3 && (name.contains(phrase) || phrase.contains(name))
}
