//! Top-level query engine: route → resolve → dispatch.
//!
//! One `ParsedIntent` comes in; per-indicator routing decisions and
//! resolutions fan out concurrently, join, and the dispatch coordinator
//! fetches the survivors. Every indicator carries its own success or typed
//! failure marker, and the whole query runs under one deadline — work still
//! pending at expiry is marked `Timeout` rather than dragging the rest down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use uuid::Uuid;

use crate::catalog::SnapshotStore;
use crate::config::EngineConfig;
use crate::dispatch::{DispatchCoordinator, DispatchJob, ProviderFetch};
use crate::error::{IndicatorFailure, QueryStatus};
use crate::llm::{LlmClient, OpenAiCompatibleClient};
use crate::resolve::IndicatorResolver;
use crate::routing::{ProviderRoutingEngine, RoutingTables};
use crate::similarity::{Embedder, HttpEmbedder};
use crate::types::{
    ParsedIntent, ResolvedIndicator, RouteReason, RoutingDecision, TimeSeries,
};

/// A resolved indicator together with its fetched series.
#[derive(Debug, Clone)]
pub struct FetchedIndicator {
    pub resolved: ResolvedIndicator,
    pub series: TimeSeries,
}

/// Result for one indicator phrase of a query.
#[derive(Debug)]
pub struct IndicatorOutcome {
    pub phrase: String,
    pub decision: RoutingDecision,
    pub outcome: Result<FetchedIndicator, IndicatorFailure>,
}

#[derive(Debug)]
pub struct QueryOutcome {
    pub query_id: Uuid,
    pub status: QueryStatus,
    pub outcomes: Vec<IndicatorOutcome>,
}

/// Routing + resolution for one phrase, without dispatch.
#[derive(Debug)]
pub struct PhraseResolution {
    pub phrase: String,
    pub decision: RoutingDecision,
    pub outcome: Result<ResolvedIndicator, IndicatorFailure>,
}

pub struct QueryEngine {
    snapshots: Arc<SnapshotStore>,
    router: ProviderRoutingEngine,
    resolver: IndicatorResolver,
    dispatcher: DispatchCoordinator,
    config: EngineConfig,
}

impl QueryEngine {
    /// Wire the engine from config: HTTP backends for embedding and ranking,
    /// built-in routing tables.
    pub fn new(
        config: EngineConfig,
        snapshots: Arc<SnapshotStore>,
        fetcher: Arc<dyn ProviderFetch>,
    ) -> anyhow::Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        let api_key = std::env::var(&config.backends.llm_api_key_env).ok();
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatibleClient::new(
            &config.backends.llm_endpoint,
            &config.backends.llm_model,
            api_key.clone(),
        )?);
        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            &config.backends.embedding_endpoint,
            &config.backends.embedding_model,
            api_key,
            config.backends.embedding_dimension,
        )?);
        Ok(Self::with_components(
            config,
            snapshots,
            RoutingTables::default(),
            embedder,
            llm,
            fetcher,
        ))
    }

    /// Assemble from explicit components. Tests and embedders-with-local-models
    /// come through here.
    pub fn with_components(
        config: EngineConfig,
        snapshots: Arc<SnapshotStore>,
        tables: RoutingTables,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
        fetcher: Arc<dyn ProviderFetch>,
    ) -> Self {
        let resolver = IndicatorResolver::new(embedder, llm, config.resolution.clone());
        let dispatcher = DispatchCoordinator::new(fetcher, config.dispatch.clone());
        Self {
            snapshots,
            router: ProviderRoutingEngine::new(tables),
            resolver,
            dispatcher,
            config,
        }
    }

    /// Route and resolve every indicator phrase, without fetching. Callers
    /// that only need the (provider, code) decisions stop here.
    pub async fn resolve(&self, intent: &ParsedIntent) -> Vec<PhraseResolution> {
        let snapshot = self.snapshots.current();
        let tasks = intent.indicator_phrases.iter().map(|phrase| {
            let snapshot = snapshot.clone();
            async move {
                let decision = self.router.route(intent, phrase);
                let (decision, outcome) = self
                    .resolve_with_rescue(&snapshot, decision, phrase, intent.country.as_deref())
                    .await;
                PhraseResolution {
                    phrase: phrase.clone(),
                    decision,
                    outcome,
                }
            }
        });
        join_all(tasks).await
    }

    /// Answer one query end to end.
    pub async fn answer(&self, intent: &ParsedIntent) -> QueryOutcome {
        let query_id = Uuid::new_v4();

        if intent.clarification_needed || intent.indicator_phrases.is_empty() {
            tracing::info!(
                query_id = %query_id,
                clarification = intent.clarification_needed,
                "Intent not answerable without clarification"
            );
            return QueryOutcome {
                query_id,
                status: QueryStatus::Failed,
                outcomes: Vec::new(),
            };
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.dispatch.query_deadline_secs);
        let snapshot = self.snapshots.current();

        // Phase 1: per-phrase routing + resolution, concurrently, each task
        // bounded by the query deadline.
        let tasks = intent.indicator_phrases.iter().enumerate().map(|(slot, phrase)| {
            let snapshot = snapshot.clone();
            async move {
                let decision = self.router.route(intent, phrase);
                let remaining = deadline.saturating_duration_since(Instant::now());
                match tokio::time::timeout(
                    remaining,
                    self.resolve_with_rescue(&snapshot, decision.clone(), phrase, intent.country.as_deref()),
                )
                .await
                {
                    Ok((decision, outcome)) => (slot, decision, outcome),
                    Err(_) => (slot, decision, Err(IndicatorFailure::Timeout)),
                }
            }
        });
        let resolutions: Vec<(usize, RoutingDecision, Result<ResolvedIndicator, IndicatorFailure>)> =
            join_all(tasks).await;

        // Phase 2: dispatch everything that resolved.
        let jobs: Vec<DispatchJob> = resolutions
            .iter()
            .filter_map(|(slot, _, outcome)| {
                outcome.as_ref().ok().map(|resolved| DispatchJob {
                    slot: *slot,
                    resolved: resolved.clone(),
                })
            })
            .collect();
        let mut fetched: std::collections::HashMap<usize, Result<TimeSeries, IndicatorFailure>> =
            self.dispatcher
                .dispatch_all(
                    jobs,
                    intent.country.as_deref(),
                    intent.date_range.as_ref(),
                    Some(deadline),
                )
                .await
                .into_iter()
                .collect();

        let mut outcomes = Vec::with_capacity(resolutions.len());
        for (slot, decision, resolution) in resolutions {
            let phrase = intent.indicator_phrases[slot].clone();
            let outcome = match resolution {
                Ok(resolved) => match fetched.remove(&slot) {
                    Some(Ok(series)) => Ok(FetchedIndicator { resolved, series }),
                    Some(Err(failure)) => Err(failure),
                    // Dispatch returned nothing for a resolved slot; only the
                    // deadline can cause that.
                    None => Err(IndicatorFailure::Timeout),
                },
                Err(failure) => Err(failure),
            };
            outcomes.push(IndicatorOutcome {
                phrase,
                decision,
                outcome,
            });
        }

        let succeeded = outcomes.iter().filter(|o| o.outcome.is_ok()).count();
        let status = if succeeded == outcomes.len() {
            QueryStatus::Complete
        } else if succeeded > 0 {
            QueryStatus::Partial
        } else {
            QueryStatus::Failed
        };

        tracing::info!(
            query_id = %query_id,
            indicators = outcomes.len(),
            succeeded = succeeded,
            status = ?status,
            "Query answered"
        );

        QueryOutcome {
            query_id,
            status,
            outcomes,
        }
    }

    /// Resolve under the routed provider; when every tier declines and the
    /// route was heuristic (never for an explicit user choice), try one
    /// unrestricted cross-provider pass and let its pick re-route the phrase.
    async fn resolve_with_rescue(
        &self,
        snapshot: &crate::catalog::CatalogSnapshot,
        decision: RoutingDecision,
        phrase: &str,
        country: Option<&str>,
    ) -> (RoutingDecision, Result<ResolvedIndicator, IndicatorFailure>) {
        match self
            .resolver
            .resolve(snapshot, decision.provider, phrase, country)
            .await
        {
            Ok(resolved) => (decision, Ok(resolved)),
            Err(primary) => {
                let rescue_allowed = self.resolver.cross_provider_rescue_enabled()
                    && decision.reason != RouteReason::Explicit;
                if rescue_allowed {
                    if let Ok(resolved) = self.resolver.resolve_any(snapshot, phrase).await {
                        let rerouted = RoutingDecision {
                            provider: resolved.provider,
                            reason: RouteReason::LlmFallback,
                            priority_tier: 6,
                        };
                        tracing::info!(
                            phrase = %phrase,
                            original = %decision.provider,
                            rerouted = %resolved.provider,
                            "Cross-provider rescue rerouted phrase"
                        );
                        return (rerouted, Ok(resolved));
                    }
                }
                (decision, Err(primary))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogArtifact, CatalogSnapshot};
    use crate::error::FetchError;
    use crate::similarity::EmbeddedIndicator;
    use crate::types::{DateRange, Frequency, ProviderId, SeriesMetadata, SourceTier};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ------------------------------------------------------------------
    // Stubs
    // ------------------------------------------------------------------

    struct StubEmbedder {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.vector.clone())
        }
        fn dimension(&self) -> usize {
            self.vector.len()
        }
    }

    struct StubLlm {
        reply: String,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn generate(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
            Ok(self.reply.clone())
        }
    }

    /// Succeeds for everything except codes listed in `unavailable` /
    /// `unsupported_region`.
    struct StubFetcher {
        unavailable: HashSet<String>,
        unsupported_region: HashSet<String>,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn ok() -> Self {
            Self {
                unavailable: HashSet::new(),
                unsupported_region: HashSet::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProviderFetch for StubFetcher {
        async fn fetch(
            &self,
            provider: ProviderId,
            code: &str,
            country: Option<&str>,
            _range: Option<&DateRange>,
        ) -> std::result::Result<TimeSeries, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable.contains(code) {
                return Err(FetchError::Unavailable("stubbed outage".into()));
            }
            if self.unsupported_region.contains(code) {
                return Err(FetchError::UnsupportedRegion("aggregate not covered".into()));
            }
            Ok(TimeSeries {
                metadata: SeriesMetadata {
                    source: provider,
                    indicator_code: code.to_string(),
                    country: country.map(str::to_string),
                    frequency: Frequency::Monthly,
                    unit: None,
                },
                points: Vec::new(),
            })
        }
    }

    // ------------------------------------------------------------------
    // Fixture
    // ------------------------------------------------------------------

    fn fixture_snapshot() -> CatalogSnapshot {
        let mut aliases = HashMap::new();
        let mut fred = HashMap::new();
        fred.insert("gdp growth".to_string(), "A191RL1Q225SBEA".to_string());
        fred.insert("unemployment rate".to_string(), "UNRATE".to_string());
        fred.insert("inflation rate".to_string(), "CPIAUCSL".to_string());
        aliases.insert(ProviderId::Fred, fred);

        let mut oecd = HashMap::new();
        oecd.insert("gdp growth".to_string(), "QNA.GDP.GROWTH".to_string());
        aliases.insert(ProviderId::Oecd, oecd);

        let mut imf = HashMap::new();
        imf.insert("inflation rate".to_string(), "PCPIPCH".to_string());
        aliases.insert(ProviderId::Imf, imf);

        let mut world_bank = HashMap::new();
        world_bank.insert("gdp growth".to_string(), "NY.GDP.MKTP.KD.ZG".to_string());
        world_bank.insert("unemployment rate".to_string(), "SL.UEM.TOTL.ZS".to_string());
        aliases.insert(ProviderId::WorldBank, world_bank);

        let mut comtrade = HashMap::new();
        comtrade.insert("trade between eu and middle east".to_string(), "TOTAL.TRADE".to_string());
        aliases.insert(ProviderId::Comtrade, comtrade);

        CatalogSnapshot::from_artifact(CatalogArtifact {
            version: 11,
            built_at: Utc::now(),
            aliases,
            entries: Vec::new(),
            dataflows: HashMap::new(),
            embedding_dimension: 2,
            embeddings: vec![EmbeddedIndicator {
                provider: ProviderId::CoinGecko,
                code: "stablecoin-mcap".into(),
                name: "Stablecoin market capitalization".into(),
                vector: vec![0.0, 1.0],
            }],
        })
        .unwrap()
    }

    fn engine_with(fetcher: Arc<StubFetcher>, llm_reply: &str) -> QueryEngine {
        let config = EngineConfig::default();
        let snapshots = Arc::new(SnapshotStore::new(fixture_snapshot()));
        QueryEngine::with_components(
            config,
            snapshots,
            RoutingTables::default(),
            Arc::new(StubEmbedder { vector: vec![0.0, 1.0] }),
            Arc::new(StubLlm { reply: llm_reply.to_string() }),
            fetcher,
        )
    }

    fn decline_reply() -> &'static str {
        r#"{"best": null, "confidence": 0}"#
    }

    // ------------------------------------------------------------------
    // End-to-end behavior
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_explicit_provider_resolved_and_fetched() {
        let fetcher = Arc::new(StubFetcher::ok());
        let engine = engine_with(fetcher.clone(), decline_reply());

        let intent = ParsedIntent::new("OECD GDP growth for Italy")
            .with_phrase("gdp growth")
            .with_country("IT");
        let outcome = engine.answer(&intent).await;

        assert_eq!(outcome.status, QueryStatus::Complete);
        assert_eq!(outcome.outcomes.len(), 1);
        let first = &outcome.outcomes[0];
        assert_eq!(first.decision.provider, ProviderId::Oecd);
        assert_eq!(first.decision.reason, RouteReason::Explicit);
        let fetched = first.outcome.as_ref().unwrap();
        assert_eq!(fetched.resolved.code, "QNA.GDP.GROWTH");
        assert_eq!(fetched.resolved.resolution_path, vec![SourceTier::Hardcoded]);
        assert_eq!(fetched.series.metadata.source, ProviderId::Oecd);
    }

    #[tokio::test]
    async fn test_partial_result_on_single_provider_outage() {
        let mut fetcher = StubFetcher::ok();
        fetcher.unavailable.insert("PCPIPCH".to_string());
        let fetcher = Arc::new(fetcher);

        let mut config = EngineConfig::default();
        config.dispatch.backoff_base_ms = 1;
        config.dispatch.default_min_interval_ms = 0;
        config.dispatch.provider_min_interval_ms.clear();
        let snapshots = Arc::new(SnapshotStore::new(fixture_snapshot()));
        let engine = QueryEngine::with_components(
            config,
            snapshots,
            RoutingTables::default(),
            Arc::new(StubEmbedder { vector: vec![0.0, 1.0] }),
            Arc::new(StubLlm { reply: decline_reply().to_string() }),
            fetcher,
        );

        // Three indicators for Brazil: inflation overrides to IMF (stubbed
        // down), the others resolve and fetch fine.
        let intent = ParsedIntent::new("Brazil inflation, gdp growth and unemployment")
            .with_phrase("inflation rate")
            .with_phrase("gdp growth")
            .with_phrase("unemployment rate")
            .with_country("BR");
        let outcome = engine.answer(&intent).await;

        assert_eq!(outcome.status, QueryStatus::Partial);
        assert_eq!(outcome.outcomes.len(), 3);
        assert!(matches!(
            outcome.outcomes[0].outcome,
            Err(IndicatorFailure::ProviderUnavailable { provider: ProviderId::Imf, .. })
        ));
        assert!(outcome.outcomes[1].outcome.is_ok());
        assert!(outcome.outcomes[2].outcome.is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_region_surfaces_typed_error() {
        let mut fetcher = StubFetcher::ok();
        fetcher.unsupported_region.insert("TOTAL.TRADE".to_string());
        let fetcher = Arc::new(fetcher);
        let engine = engine_with(fetcher, decline_reply());

        let intent = ParsedIntent::new("trade between EU and Middle East")
            .with_phrase("trade between EU and Middle East");
        let outcome = engine.answer(&intent).await;

        assert_eq!(outcome.status, QueryStatus::Failed);
        // Keyword pre-routing sent this to the trade specialist, and the
        // unsupported aggregate comes back typed, not as an empty series.
        assert_eq!(outcome.outcomes[0].decision.provider, ProviderId::Comtrade);
        assert!(matches!(
            outcome.outcomes[0].outcome,
            Err(IndicatorFailure::UnsupportedRegion { .. })
        ));
    }

    #[tokio::test]
    async fn test_clarification_short_circuits() {
        let fetcher = Arc::new(StubFetcher::ok());
        let engine = engine_with(fetcher.clone(), decline_reply());

        let mut intent = ParsedIntent::new("gdp?").with_phrase("gdp");
        intent.clarification_needed = true;
        let outcome = engine.answer(&intent).await;

        assert_eq!(outcome.status, QueryStatus::Failed);
        assert!(outcome.outcomes.is_empty());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_phrase_reports_no_match() {
        let fetcher = Arc::new(StubFetcher::ok());
        let mut config = EngineConfig::default();
        config.resolution.enable_cross_provider_rescue = false;
        let snapshots = Arc::new(SnapshotStore::new(fixture_snapshot()));
        let engine = QueryEngine::with_components(
            config,
            snapshots,
            RoutingTables::default(),
            Arc::new(StubEmbedder { vector: vec![1.0, 0.0] }),
            Arc::new(StubLlm { reply: decline_reply().to_string() }),
            fetcher.clone(),
        );

        let intent = ParsedIntent::new("US quantum widget sentiment")
            .with_phrase("quantum widget sentiment")
            .with_country("US");
        let outcome = engine.answer(&intent).await;

        assert_eq!(outcome.status, QueryStatus::Failed);
        match &outcome.outcomes[0].outcome {
            Err(IndicatorFailure::NoMatchFound { resolution_path, .. }) => {
                assert!(resolution_path.contains(&SourceTier::Hardcoded));
                assert!(resolution_path.contains(&SourceTier::Similarity));
            }
            other => panic!("expected NoMatchFound, got {:?}", other),
        }
        // Nothing was dispatched for an unresolved indicator.
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cross_provider_rescue_reroutes() {
        let fetcher = Arc::new(StubFetcher::ok());
        // Ranker confidently picks the first (and only) unrestricted hit.
        let engine = engine_with(fetcher, r#"{"best": 1, "confidence": 0.95}"#);

        // No keyword, no country: routes to the catalog default, which has no
        // matching series; the rescue pass finds the crypto series instead.
        let intent = ParsedIntent::new("digital dollar token float")
            .with_phrase("digital dollar token float");
        let outcome = engine.answer(&intent).await;

        assert_eq!(outcome.status, QueryStatus::Complete);
        let first = &outcome.outcomes[0];
        assert_eq!(first.decision.reason, RouteReason::LlmFallback);
        assert_eq!(first.decision.provider, ProviderId::CoinGecko);
        assert_eq!(first.outcome.as_ref().unwrap().resolved.code, "stablecoin-mcap");
    }

    #[tokio::test]
    async fn test_repeated_answers_are_deterministic() {
        let fetcher = Arc::new(StubFetcher::ok());
        let engine = engine_with(fetcher, decline_reply());

        let intent = ParsedIntent::new("US unemployment rate")
            .with_phrase("unemployment rate")
            .with_country("US");

        let first = engine.answer(&intent).await;
        let second = engine.answer(&intent).await;

        assert_eq!(first.status, QueryStatus::Complete);
        assert_eq!(second.status, QueryStatus::Complete);
        let a = first.outcomes[0].outcome.as_ref().unwrap();
        let b = second.outcomes[0].outcome.as_ref().unwrap();
        assert_eq!(a.resolved.code, b.resolved.code);
        assert_eq!(first.outcomes[0].decision, second.outcomes[0].decision);
    }

    #[tokio::test]
    async fn test_deadline_marks_pending_indicator_timed_out() {
        struct NeverFetcher;
        #[async_trait]
        impl ProviderFetch for NeverFetcher {
            async fn fetch(
                &self,
                _provider: ProviderId,
                _code: &str,
                _country: Option<&str>,
                _range: Option<&DateRange>,
            ) -> std::result::Result<TimeSeries, FetchError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!()
            }
        }

        let mut config = EngineConfig::default();
        config.dispatch.query_deadline_secs = 1;
        let snapshots = Arc::new(SnapshotStore::new(fixture_snapshot()));
        let engine = QueryEngine::with_components(
            config,
            snapshots,
            RoutingTables::default(),
            Arc::new(StubEmbedder { vector: vec![0.0, 1.0] }),
            Arc::new(StubLlm { reply: decline_reply().to_string() }),
            Arc::new(NeverFetcher),
        );

        let intent = ParsedIntent::new("US unemployment rate")
            .with_phrase("unemployment rate")
            .with_country("US");
        let outcome = engine.answer(&intent).await;

        assert_eq!(outcome.status, QueryStatus::Failed);
        assert!(matches!(
            outcome.outcomes[0].outcome,
            Err(IndicatorFailure::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_resolve_only_api_skips_dispatch() {
        let fetcher = Arc::new(StubFetcher::ok());
        let engine = engine_with(fetcher.clone(), decline_reply());

        let intent = ParsedIntent::new("US unemployment rate and gdp growth")
            .with_phrase("unemployment rate")
            .with_phrase("gdp growth")
            .with_country("US");
        let resolutions = engine.resolve(&intent).await;

        assert_eq!(resolutions.len(), 2);
        assert!(resolutions.iter().all(|r| r.outcome.is_ok()));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
