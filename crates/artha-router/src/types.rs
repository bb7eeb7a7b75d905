use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The closed set of supported statistical-data providers.
///
/// Adding a provider means adding a variant here and extending the routing
/// data tables; nothing structural changes elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Fred,
    WorldBank,
    Imf,
    Oecd,
    Eurostat,
    Ecb,
    Bis,
    Comtrade,
    CoinGecko,
    Bls,
}

impl ProviderId {
    pub const ALL: [ProviderId; 10] = [
        ProviderId::Fred,
        ProviderId::WorldBank,
        ProviderId::Imf,
        ProviderId::Oecd,
        ProviderId::Eurostat,
        ProviderId::Ecb,
        ProviderId::Bis,
        ProviderId::Comtrade,
        ProviderId::CoinGecko,
        ProviderId::Bls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fred => "fred",
            Self::WorldBank => "world_bank",
            Self::Imf => "imf",
            Self::Oecd => "oecd",
            Self::Eurostat => "eurostat",
            Self::Ecb => "ecb",
            Self::Bis => "bis",
            Self::Comtrade => "comtrade",
            Self::CoinGecko => "coingecko",
            Self::Bls => "bls",
        }
    }

    /// Human-readable name used in ranker prompts and log lines.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Fred => "FRED",
            Self::WorldBank => "World Bank",
            Self::Imf => "IMF",
            Self::Oecd => "OECD",
            Self::Eurostat => "Eurostat",
            Self::Ecb => "ECB",
            Self::Bis => "BIS",
            Self::Comtrade => "UN Comtrade",
            Self::CoinGecko => "CoinGecko",
            Self::Bls => "BLS",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geographic aggregates a query may target instead of a single country.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    EuroArea,
    EuropeanUnion,
    OecdMembers,
    MiddleEast,
    World,
}

/// Inclusive date window requested for a series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// Coarsely-parsed intent delivered once per query by the upstream
/// intent-extraction step. Immutable for the lifetime of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub raw_query: String,
    /// One entry per requested indicator, in the order they appeared.
    pub indicator_phrases: Vec<String>,
    /// Provider the extractor already identified as user-forced, if any.
    pub explicit_provider: Option<ProviderId>,
    /// Normalized ISO 3166-1 alpha-2 country code.
    pub country: Option<String>,
    pub region: Option<Region>,
    pub date_range: Option<DateRange>,
    /// Set when the extractor could not produce a usable intent; the engine
    /// short-circuits without touching any resolution tier.
    pub clarification_needed: bool,
}

impl ParsedIntent {
    pub fn new(raw_query: impl Into<String>) -> Self {
        Self {
            raw_query: raw_query.into(),
            indicator_phrases: Vec::new(),
            explicit_provider: None,
            country: None,
            region: None,
            date_range: None,
            clarification_needed: false,
        }
    }

    pub fn with_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.indicator_phrases.push(phrase.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }
}

/// Which resolution strategy produced a candidate or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Hardcoded,
    Catalog,
    Structured,
    Similarity,
    Llm,
}

impl SourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hardcoded => "hardcoded",
            Self::Catalog => "catalog",
            Self::Structured => "structured",
            Self::Similarity => "similarity",
            Self::Llm => "llm",
        }
    }
}

/// Transient candidate produced while walking the resolution tiers.
/// Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorCandidate {
    pub provider: ProviderId,
    pub code: String,
    pub display_name: String,
    /// Confidence in [0, 1].
    pub score: f32,
    pub source_tier: SourceTier,
}

/// A successfully resolved (provider, code) pair for one indicator phrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedIndicator {
    pub provider: ProviderId,
    pub code: String,
    pub confidence: f32,
    /// Every tier consulted on the way to this result, in order.
    pub resolution_path: Vec<SourceTier>,
}

/// Why the routing engine picked a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    Explicit,
    Keyword,
    IndicatorOverride,
    CountryDefault,
    CatalogDefault,
    /// The routed provider produced no confident match and the cross-provider
    /// similarity + ranker pass recovered one from another provider.
    LlmFallback,
}

/// Exactly one per indicator phrase. The engine never returns "no provider"
/// for a well-formed intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub provider: ProviderId,
    pub reason: RouteReason,
    /// 1 = explicit ... 5 = catalog default, 6 = llm fallback.
    pub priority_tier: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesMetadata {
    pub source: ProviderId,
    pub indicator_code: String,
    pub country: Option<String>,
    pub frequency: Frequency,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Time series returned by the external provider-fetch contract. This crate
/// never inspects provider wire formats; adapters hand it back in this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    pub metadata: SeriesMetadata,
    pub points: Vec<SeriesPoint>,
}

/// Canonical phrase form shared by the hardcoded and catalog tiers and by
/// every cache key: lowercase, punctuation folded to spaces, whitespace
/// collapsed. "U.S. GDP" and "us gdp" normalize identically.
pub fn normalize_phrase(phrase: &str) -> String {
    let mut out = String::with_capacity(phrase.len());
    let mut last_space = true;
    for ch in phrase.chars() {
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}
