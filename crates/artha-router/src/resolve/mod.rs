//! Tiered indicator resolution.
//!
//! Given a provider and an indicator phrase, walk the confidence tiers in
//! fixed order — hardcoded aliases, flattened catalog, structural dataflows,
//! similarity index, LLM ranker — stopping at the first tier whose best
//! candidate clears the configured threshold. Later tiers are consulted only
//! when earlier ones decline; the order never changes at runtime. A tier
//! whose top candidates are too close to separate declines rather than
//! guessing. Failure inside a tier is absorbed and the walk continues; only
//! exhaustion of every tier surfaces to the caller, carrying the full path.

pub mod ranker;
pub mod structured;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use strsim::jaro_winkler;

use crate::catalog::CatalogSnapshot;
use crate::config::ResolutionConfig;
use crate::error::{AmbiguityDetail, IndicatorFailure};
use crate::llm::LlmClient;
use crate::similarity::Embedder;
use crate::types::{
    normalize_phrase, IndicatorCandidate, ProviderId, ResolvedIndicator, SourceTier,
};

use ranker::{CandidateRanker, RankOutcome};

/// How many candidates each deterministic tier contributes to the pooled
/// shortlist handed to the ranker.
const POOL_PER_TIER: usize = 4;

struct CachedResolution {
    resolved: ResolvedIndicator,
    inserted: Instant,
}

enum TierVerdict {
    Accept(IndicatorCandidate),
    Ambiguous(AmbiguityDetail),
    Decline,
}

pub struct IndicatorResolver {
    embedder: Arc<dyn Embedder>,
    ranker: CandidateRanker,
    config: ResolutionConfig,
    cache: Mutex<LruCache<String, CachedResolution>>,
}

impl IndicatorResolver {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
        config: ResolutionConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.cache_size.max(1)).expect("cache_size >= 1");
        Self {
            embedder,
            ranker: CandidateRanker::new(llm, &config),
            config,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Resolve a phrase against one provider's tiers.
    pub async fn resolve(
        &self,
        snapshot: &CatalogSnapshot,
        provider: ProviderId,
        phrase: &str,
        country: Option<&str>,
    ) -> Result<ResolvedIndicator, IndicatorFailure> {
        let normalized = normalize_phrase(phrase);
        let key = format!(
            "{}|{}|{}|{}",
            snapshot.version,
            provider,
            normalized,
            country.unwrap_or("")
        );
        if let Some(cached) = self.cache_get(&key) {
            return Ok(cached);
        }

        let mut path: Vec<SourceTier> = Vec::new();
        let mut ambiguity: Option<AmbiguityDetail> = None;
        let mut pool: Vec<IndicatorCandidate> = Vec::new();

        // Tier 1: direct alias table. A hit is definitionally confident.
        path.push(SourceTier::Hardcoded);
        if let Some(code) = snapshot.alias_lookup(provider, &normalized) {
            let resolved = ResolvedIndicator {
                provider,
                code: code.to_string(),
                confidence: 1.0,
                resolution_path: path,
            };
            self.cache_put(key, resolved.clone());
            return Ok(resolved);
        }

        // Tier 2: flattened catalog, scored by string similarity.
        path.push(SourceTier::Catalog);
        let catalog = scan_catalog(snapshot, provider, &normalized);
        match self.judge(&catalog) {
            TierVerdict::Accept(best) => {
                let resolved = accept(best, path);
                self.cache_put(key, resolved.clone());
                return Ok(resolved);
            }
            TierVerdict::Ambiguous(detail) => ambiguity = Some(detail),
            TierVerdict::Decline => {}
        }
        pool.extend(catalog.into_iter().take(POOL_PER_TIER));

        // Tier 3: structural dataflow catalogs, where the provider has one.
        let flows = structured::scan_dataflows(snapshot, provider, &normalized);
        if !flows.is_empty() {
            path.push(SourceTier::Structured);
            match self.judge(&flows) {
                TierVerdict::Accept(best) => {
                    let resolved = accept(best, path);
                    self.cache_put(key, resolved.clone());
                    return Ok(resolved);
                }
                TierVerdict::Ambiguous(detail) => ambiguity = Some(detail),
                TierVerdict::Decline => {}
            }
            pool.extend(flows.into_iter().take(POOL_PER_TIER));
        }

        // Tier 4: nearest neighbors in the similarity index.
        path.push(SourceTier::Similarity);
        let similar = self
            .scan_similarity(snapshot, Some(provider), &normalized)
            .await;
        match self.judge(&similar) {
            TierVerdict::Accept(best) => {
                let resolved = accept(best, path);
                self.cache_put(key, resolved.clone());
                return Ok(resolved);
            }
            TierVerdict::Ambiguous(detail) => ambiguity = Some(detail),
            TierVerdict::Decline => {}
        }
        pool.extend(similar);

        // Tier 5: hand the pooled shortlist to the ranker.
        dedupe(&mut pool);
        pool.truncate(self.config.ranker_shortlist_cap);
        if !pool.is_empty() {
            path.push(SourceTier::Llm);
            let outcome = self
                .ranker
                .rank(snapshot.version, Some(provider), &normalized, &pool)
                .await;
            if let RankOutcome::Match { index, confidence } = outcome {
                if confidence >= self.config.confidence_threshold {
                    let picked = pool[index].clone();
                    let resolved = ResolvedIndicator {
                        provider: picked.provider,
                        code: picked.code,
                        confidence,
                        resolution_path: path,
                    };
                    self.cache_put(key, resolved.clone());
                    return Ok(resolved);
                }
            }
        }

        tracing::info!(
            provider = %provider,
            phrase = %phrase,
            path = ?path,
            "All resolution tiers exhausted below threshold"
        );
        Err(IndicatorFailure::NoMatchFound {
            phrase: phrase.to_string(),
            provider,
            resolution_path: path,
            ambiguity,
        })
    }

    /// Cross-provider rescue pass: unrestricted similarity lookup followed by
    /// the ranker. Used after the routed provider exhausts all tiers.
    pub async fn resolve_any(
        &self,
        snapshot: &CatalogSnapshot,
        phrase: &str,
    ) -> Result<ResolvedIndicator, IndicatorFailure> {
        let normalized = normalize_phrase(phrase);
        let mut path = vec![SourceTier::Similarity];

        let mut pool = self.scan_similarity(snapshot, None, &normalized).await;
        pool.truncate(self.config.ranker_shortlist_cap);
        if !pool.is_empty() {
            path.push(SourceTier::Llm);
            let outcome = self
                .ranker
                .rank(snapshot.version, None, &normalized, &pool)
                .await;
            if let RankOutcome::Match { index, confidence } = outcome {
                if confidence >= self.config.confidence_threshold {
                    let picked = pool[index].clone();
                    return Ok(ResolvedIndicator {
                        provider: picked.provider,
                        code: picked.code,
                        confidence,
                        resolution_path: path,
                    });
                }
            }
        }

        Err(IndicatorFailure::NoMatchFound {
            phrase: phrase.to_string(),
            provider: ProviderId::WorldBank,
            resolution_path: path,
            ambiguity: None,
        })
    }

    pub fn cross_provider_rescue_enabled(&self) -> bool {
        self.config.enable_cross_provider_rescue
    }

    async fn scan_similarity(
        &self,
        snapshot: &CatalogSnapshot,
        provider: Option<ProviderId>,
        normalized: &str,
    ) -> Vec<IndicatorCandidate> {
        if snapshot.index.is_empty() {
            return Vec::new();
        }
        let vector = match self.embedder.embed(normalized).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(error = %e, "Embedding failed, skipping similarity tier");
                return Vec::new();
            }
        };
        match snapshot
            .index
            .top_k(&vector, provider, self.config.similarity_top_k)
        {
            Ok(hits) => hits
                .into_iter()
                .map(|hit| IndicatorCandidate {
                    provider: hit.provider,
                    code: hit.code,
                    display_name: hit.name,
                    score: hit.score,
                    source_tier: SourceTier::Similarity,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Similarity lookup failed, skipping tier");
                Vec::new()
            }
        }
    }

    /// Accept the tier's best candidate only when it clears the threshold and
    /// stands clear of the runner-up by the ambiguity margin.
    fn judge(&self, candidates: &[IndicatorCandidate]) -> TierVerdict {
        let Some(best) = candidates.first() else {
            return TierVerdict::Decline;
        };
        if best.score < self.config.confidence_threshold {
            return TierVerdict::Decline;
        }
        let runner_up = candidates.get(1).map(|c| c.score).unwrap_or(0.0);
        if best.score - runner_up < self.config.ambiguity_margin {
            let contenders = candidates
                .iter()
                .take(3)
                .map(|c| (c.code.clone(), c.score))
                .collect();
            return TierVerdict::Ambiguous(AmbiguityDetail {
                tier: best.source_tier,
                contenders,
            });
        }
        TierVerdict::Accept(best.clone())
    }

    fn cache_get(&self, key: &str) -> Option<ResolvedIndicator> {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        let mut cache = self.cache.lock();
        match cache.get(key) {
            Some(entry) if entry.inserted.elapsed() < ttl => {
                return Some(entry.resolved.clone());
            }
            Some(_) => {}
            None => return None,
        }
        // Expired entry.
        cache.pop(key);
        None
    }

    fn cache_put(&self, key: String, resolved: ResolvedIndicator) {
        self.cache.lock().put(
            key,
            CachedResolution {
                resolved,
                inserted: Instant::now(),
            },
        );
    }
}

fn accept(candidate: IndicatorCandidate, path: Vec<SourceTier>) -> ResolvedIndicator {
    ResolvedIndicator {
        provider: candidate.provider,
        code: candidate.code,
        confidence: candidate.score,
        resolution_path: path,
    }
}

/// Score one provider's flattened catalog against the phrase, best first.
fn scan_catalog(
    snapshot: &CatalogSnapshot,
    provider: ProviderId,
    normalized: &str,
) -> Vec<IndicatorCandidate> {
    let mut candidates: Vec<IndicatorCandidate> = snapshot
        .entries_for(provider)
        .iter()
        .map(|entry| {
            let name = normalize_phrase(&entry.name);
            let score = if name == *normalized {
                1.0
            } else if normalized.len() >= 3
                && (name.contains(normalized) || normalized.contains(&name))
            {
                0.8 + 0.2 * jaro_winkler(&name, normalized) as f32
            } else {
                let jw = 0.85 * jaro_winkler(&name, normalized) as f32;
                let description = normalize_phrase(&entry.description);
                if normalized.len() >= 3 && description.contains(normalized) {
                    jw.max(0.78)
                } else {
                    jw
                }
            };
            IndicatorCandidate {
                provider,
                code: entry.code.clone(),
                display_name: entry.name.clone(),
                score,
                source_tier: SourceTier::Catalog,
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

fn dedupe(pool: &mut Vec<IndicatorCandidate>) {
    let mut seen = std::collections::HashSet::new();
    pool.retain(|candidate| seen.insert((candidate.provider, candidate.code.clone())));
}
