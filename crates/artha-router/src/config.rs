use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::ProviderId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub resolution: ResolutionConfig,
    pub dispatch: DispatchConfig,
    pub backends: BackendConfig,
}

/// Knobs for the tiered indicator resolver. The confidence threshold and the
/// ambiguity margin live here so no call site carries a literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// A tier's best candidate must reach this confidence or the walk
    /// continues to the next tier.
    pub confidence_threshold: f32,
    /// When the top two candidates of a tier are closer than this, the tier
    /// declines rather than guessing.
    pub ambiguity_margin: f32,
    /// Nearest neighbors requested from the similarity index.
    pub similarity_top_k: usize,
    /// Cap on the pooled candidate list handed to the LLM ranker.
    pub ranker_shortlist_cap: usize,
    pub ranker_timeout_secs: u64,
    /// TTL for cached resolutions and ranker verdicts.
    pub cache_ttl_secs: u64,
    pub cache_size: usize,
    /// After the routed provider exhausts all tiers, retry once with an
    /// unrestricted similarity + ranker pass across all providers.
    pub enable_cross_provider_rescue: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Total attempts per fetch, including the first.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub fetch_cache_ttl_secs: u64,
    /// Overall per-query deadline; indicators still pending at expiry are
    /// returned with a Timeout marker.
    pub query_deadline_secs: u64,
    /// Minimum interval between requests to the same provider.
    pub default_min_interval_ms: u64,
    /// Per-provider overrides of the minimum interval.
    #[serde(default)]
    pub provider_min_interval_ms: HashMap<ProviderId, u64>,
}

/// Endpoints for the two network-bound backends: the LLM used by the
/// candidate ranker and the embedding service used by the similarity tier.
/// Both are OpenAI-compatible; keys come from the environment, never config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub llm_endpoint: String,
    pub llm_model: String,
    pub llm_api_key_env: String,
    pub embedding_endpoint: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
}

impl EngineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.resolution.confidence_threshold)
            || self.resolution.confidence_threshold == 0.0
        {
            return Err("resolution.confidence_threshold must be in (0.0, 1.0]".into());
        }
        if !(0.0..0.5).contains(&self.resolution.ambiguity_margin) {
            return Err("resolution.ambiguity_margin must be in [0.0, 0.5)".into());
        }
        if self.resolution.similarity_top_k == 0 {
            return Err("resolution.similarity_top_k must be > 0".into());
        }
        if self.resolution.ranker_shortlist_cap == 0 {
            return Err("resolution.ranker_shortlist_cap must be > 0".into());
        }
        if self.resolution.cache_size == 0 {
            return Err("resolution.cache_size must be > 0".into());
        }
        if self.dispatch.max_attempts == 0 {
            return Err("dispatch.max_attempts must be >= 1".into());
        }
        if self.dispatch.query_deadline_secs == 0 {
            return Err("dispatch.query_deadline_secs must be > 0".into());
        }
        if self.backends.embedding_dimension == 0 {
            return Err("backends.embedding_dimension must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("artha-router");

        // CoinGecko and Comtrade throttle hard; give them wider spacing.
        let mut provider_min_interval_ms = HashMap::new();
        provider_min_interval_ms.insert(ProviderId::CoinGecko, 1_200);
        provider_min_interval_ms.insert(ProviderId::Comtrade, 1_000);

        Self {
            data_dir,
            resolution: ResolutionConfig {
                confidence_threshold: 0.72,
                ambiguity_margin: 0.05,
                similarity_top_k: 8,
                ranker_shortlist_cap: 12,
                ranker_timeout_secs: 20,
                cache_ttl_secs: 900,
                cache_size: 2048,
                enable_cross_provider_rescue: true,
            },
            dispatch: DispatchConfig {
                max_attempts: 4,
                backoff_base_ms: 500,
                fetch_cache_ttl_secs: 900,
                query_deadline_secs: 45,
                default_min_interval_ms: 250,
                provider_min_interval_ms,
            },
            backends: BackendConfig {
                llm_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
                llm_model: "gpt-4o-mini".to_string(),
                llm_api_key_env: "ARTHA_LLM_API_KEY".to_string(),
                embedding_endpoint: "https://api.openai.com/v1/embeddings".to_string(),
                embedding_model: "text-embedding-3-small".to_string(),
                embedding_dimension: 1536,
            },
        }
    }
}
