//! LLM-based candidate ranking, the last resolution tier.
//!
//! Wraps the one non-deterministic dependency in the pipeline. A single
//! listwise call judges the pooled shortlist against the original phrase and
//! returns the best candidate index plus a confidence. Every failure mode —
//! LLM unavailable, timeout, unparseable output, out-of-range index — is a
//! `NoMatch`, never an error: callers fall through to their own no-match
//! handling. Verdicts are cached by (snapshot version, provider, phrase) so
//! repeat queries are deterministic for the cache lifetime.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::ResolutionConfig;
use crate::llm::LlmClient;
use crate::types::{IndicatorCandidate, ProviderId};

const RANK_OUTPUT_TOKENS: usize = 128;
const DESCRIPTION_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RankOutcome {
    /// Zero-based index into the shortlist, confidence clamped to [0, 1].
    Match { index: usize, confidence: f32 },
    NoMatch,
}

struct CachedVerdict {
    outcome: RankOutcome,
    inserted: Instant,
}

pub struct CandidateRanker {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
    cache_ttl: Duration,
    cache: Mutex<LruCache<String, CachedVerdict>>,
}

impl CandidateRanker {
    pub fn new(llm: Arc<dyn LlmClient>, config: &ResolutionConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_size.max(1)).expect("cache_size >= 1");
        Self {
            llm,
            timeout: Duration::from_secs(config.ranker_timeout_secs),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Rank the shortlist against the phrase. `snapshot_version` scopes the
    /// verdict cache so entries die with the catalog they were computed from.
    pub async fn rank(
        &self,
        snapshot_version: u64,
        provider: Option<ProviderId>,
        phrase: &str,
        candidates: &[IndicatorCandidate],
    ) -> RankOutcome {
        if candidates.is_empty() {
            return RankOutcome::NoMatch;
        }

        let key = cache_key(snapshot_version, provider, phrase);
        if let Some(cached) = self.cache_get(&key) {
            return cached;
        }

        let prompt = build_rank_prompt(phrase, candidates);
        let raw = match tokio::time::timeout(
            self.timeout,
            self.llm.generate(&prompt, RANK_OUTPUT_TOKENS),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(phrase = %phrase, error = %e, "Ranker call failed, treating as no match");
                return RankOutcome::NoMatch;
            }
            Err(_) => {
                tracing::warn!(
                    phrase = %phrase,
                    timeout_secs = self.timeout.as_secs(),
                    "Ranker timed out, treating as no match"
                );
                return RankOutcome::NoMatch;
            }
        };

        let outcome = parse_verdict(&raw, candidates.len());
        if outcome == RankOutcome::NoMatch {
            tracing::debug!(
                phrase = %phrase,
                output = %raw.chars().take(200).collect::<String>(),
                "Ranker declined or produced unusable output"
            );
        }
        self.cache_put(key, outcome);
        outcome
    }

    fn cache_get(&self, key: &str) -> Option<RankOutcome> {
        let mut cache = self.cache.lock();
        match cache.get(key) {
            Some(entry) if entry.inserted.elapsed() < self.cache_ttl => {
                return Some(entry.outcome);
            }
            Some(_) => {}
            None => return None,
        }
        // Expired entry.
        cache.pop(key);
        None
    }

    fn cache_put(&self, key: String, outcome: RankOutcome) {
        self.cache.lock().put(
            key,
            CachedVerdict {
                outcome,
                inserted: Instant::now(),
            },
        );
    }
}

fn cache_key(snapshot_version: u64, provider: Option<ProviderId>, phrase: &str) -> String {
    let scope = provider.map(|p| p.as_str()).unwrap_or("any");
    format!("{}|{}|{}", snapshot_version, scope, crate::types::normalize_phrase(phrase))
}

fn build_rank_prompt(phrase: &str, candidates: &[IndicatorCandidate]) -> String {
    let listing: String = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let name: String = c.display_name.chars().take(DESCRIPTION_CHARS).collect();
            format!("[{}] {} {} — {}", i + 1, c.provider.display_name(), c.code, name)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You match economic indicator requests to catalog entries. Given a requested \
         indicator and numbered candidate series, pick the single best match.\n\n\
         Requested indicator: \"{}\"\n\n\
         Candidates:\n{}\n\n\
         Return ONLY a JSON object: {{\"best\": <candidate number>, \"confidence\": <0.0-1.0>}}.\n\
         If none of the candidates is the requested indicator, return {{\"best\": null, \"confidence\": 0}}.\n\
         Output ONLY the JSON object, nothing else.",
        phrase, listing
    )
}

/// Parse the LLM verdict into an outcome.
///
/// Three-tier strategy: strict JSON parse, JSON-object substring parse, then
/// lenient field scanning. Anything that does not yield an in-range 1-based
/// index with positive confidence is `NoMatch` — the ranker never invents a
/// candidate the shortlist does not contain.
fn parse_verdict(raw: &str, candidate_count: usize) -> RankOutcome {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let json_str = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => cleaned,
    };

    #[derive(serde::Deserialize)]
    struct Verdict {
        best: Option<f64>,
        #[serde(default)]
        confidence: Option<f64>,
    }

    let (best, confidence) = match serde_json::from_str::<Verdict>(json_str) {
        Ok(verdict) => (verdict.best, verdict.confidence),
        Err(_) => (
            extract_json_number(json_str, "best"),
            extract_json_number(json_str, "confidence"),
        ),
    };

    let index = match best {
        Some(n) if n.fract() == 0.0 && n >= 1.0 && (n as usize) <= candidate_count => n as usize - 1,
        _ => return RankOutcome::NoMatch,
    };

    let confidence = confidence.unwrap_or(0.0).clamp(0.0, 1.0) as f32;
    if confidence <= 0.0 {
        // Exactly zero is a decline, never a silent accept.
        return RankOutcome::NoMatch;
    }

    RankOutcome::Match { index, confidence }
}

/// Extract a numeric field value by scanning for `"field": <number>`.
fn extract_json_number(json: &str, field: &str) -> Option<f64> {
    let pattern = format!("\"{}\"", field);
    let pos = json.find(&pattern)?;
    let after_key = &json[pos + pattern.len()..];
    let after_colon = after_key.trim_start().strip_prefix(':')?.trim_start();

    let num_str: String = after_colon
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    num_str.parse::<f64>().ok()
}
