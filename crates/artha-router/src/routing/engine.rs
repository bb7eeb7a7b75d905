//! Provider routing: one decision per indicator phrase.
//!
//! Priority order is fixed and terminal on first hit:
//! explicit mention → keyword pre-route → indicator override →
//! country/region default → fallback default. The engine never returns
//! "no provider" for a well-formed intent; failing to resolve an indicator
//! code afterwards is a separate failure mode, not a routing failure.

use crate::routing::explicit::ExplicitProviderDetector;
use crate::routing::keywords::KeywordPreRouter;
use crate::routing::tables::RoutingTables;
use crate::types::{ParsedIntent, ProviderId, RouteReason, RoutingDecision};

pub struct ProviderRoutingEngine {
    detector: ExplicitProviderDetector,
    keywords: KeywordPreRouter,
    tables: RoutingTables,
}

impl ProviderRoutingEngine {
    pub fn new(tables: RoutingTables) -> Self {
        Self {
            detector: ExplicitProviderDetector::new(),
            keywords: KeywordPreRouter::new(tables.keywords.clone()),
            tables,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RoutingTables::default())
    }

    pub fn tables(&self) -> &RoutingTables {
        &self.tables
    }

    /// Route one indicator phrase of the intent.
    pub fn route(&self, intent: &ParsedIntent, phrase: &str) -> RoutingDecision {
        let decision = self.route_inner(intent, phrase);
        tracing::debug!(
            phrase = %phrase,
            provider = %decision.provider,
            reason = ?decision.reason,
            tier = decision.priority_tier,
            "Routing decision"
        );
        decision
    }

    fn route_inner(&self, intent: &ParsedIntent, phrase: &str) -> RoutingDecision {
        if let Some(provider) = self.detector.detect(intent) {
            return decision(provider, RouteReason::Explicit, 1);
        }

        // Keyword matching runs on the phrase. The full query text is only
        // consulted for single-indicator intents; in multi-indicator queries
        // it would let one phrase's vocabulary capture the others.
        let keyword_hit = self.keywords.route(phrase).or_else(|| {
            if intent.indicator_phrases.len() <= 1 {
                self.keywords.route(&intent.raw_query)
            } else {
                None
            }
        });
        if let Some(provider) = keyword_hit {
            return decision(provider, RouteReason::Keyword, 2);
        }

        let country = intent.country.as_deref();
        let has_domestic = self.tables.country_defaults.has_domestic(country);
        if country.is_some() && !has_domestic {
            if let Some(provider) = self.tables.overrides.match_phrase(phrase) {
                return decision(provider, RouteReason::IndicatorOverride, 3);
            }
        }

        if let Some(c) = country {
            let provider = self
                .tables
                .country_defaults
                .domestic_for(c)
                .unwrap_or(self.tables.country_defaults.fallback);
            return decision(provider, RouteReason::CountryDefault, 4);
        }
        if let Some(region) = intent.region {
            if let Some(provider) = self.tables.country_defaults.region_default(region) {
                return decision(provider, RouteReason::CountryDefault, 4);
            }
        }

        decision(self.tables.country_defaults.fallback, RouteReason::CatalogDefault, 5)
    }
}

fn decision(provider: ProviderId, reason: RouteReason, priority_tier: u8) -> RoutingDecision {
    RoutingDecision { provider, reason, priority_tier }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Region;

    fn engine() -> ProviderRoutingEngine {
        ProviderRoutingEngine::with_defaults()
    }

    #[test]
    fn test_explicit_mention_wins_over_everything() {
        // Italy would default to Eurostat, but the query names OECD.
        let intent = ParsedIntent::new("OECD GDP growth for Italy")
            .with_phrase("gdp growth")
            .with_country("IT");
        let decision = engine().route(&intent, "gdp growth");
        assert_eq!(decision.provider, ProviderId::Oecd);
        assert_eq!(decision.reason, RouteReason::Explicit);
        assert_eq!(decision.priority_tier, 1);
    }

    #[test]
    fn test_explicit_override_beats_keyword_and_country_default() {
        let intent = ParsedIntent::new("residential property prices from Eurostat for France")
            .with_phrase("residential property prices")
            .with_country("FR");
        let decision = engine().route(&intent, "residential property prices");
        assert_eq!(decision.provider, ProviderId::Eurostat);
        assert_eq!(decision.reason, RouteReason::Explicit);
    }

    #[test]
    fn test_aggregate_phrase_is_not_explicit() {
        let intent = ParsedIntent::new("unemployment in OECD countries").with_phrase("unemployment");
        let decision = engine().route(&intent, "unemployment");
        assert_ne!(decision.reason, RouteReason::Explicit);
    }

    #[test]
    fn test_keyword_preroute_without_explicit_mention() {
        let intent =
            ParsedIntent::new("stablecoin market cap growth since 2020").with_phrase("stablecoin market cap");
        let decision = engine().route(&intent, "stablecoin market cap");
        assert_eq!(decision.provider, ProviderId::CoinGecko);
        assert_eq!(decision.reason, RouteReason::Keyword);
        assert_eq!(decision.priority_tier, 2);
    }

    #[test]
    fn test_brazil_inflation_overrides_to_imf() {
        let intent = ParsedIntent::new("Brazil inflation rate")
            .with_phrase("inflation rate")
            .with_country("BR");
        let decision = engine().route(&intent, "inflation rate");
        assert_eq!(decision.provider, ProviderId::Imf);
        assert_eq!(decision.reason, RouteReason::IndicatorOverride);
        assert_eq!(decision.priority_tier, 3);
    }

    #[test]
    fn test_us_inflation_stays_domestic() {
        // Home country of a domestic provider keeps the domestic source even
        // for override-class indicators.
        let intent = ParsedIntent::new("US inflation rate")
            .with_phrase("inflation rate")
            .with_country("US");
        let decision = engine().route(&intent, "inflation rate");
        assert_eq!(decision.provider, ProviderId::Fred);
        assert_eq!(decision.reason, RouteReason::CountryDefault);
    }

    #[test]
    fn test_country_default_general_provider() {
        let intent = ParsedIntent::new("GDP per capita in Kenya")
            .with_phrase("gdp per capita")
            .with_country("KE");
        let decision = engine().route(&intent, "gdp per capita");
        assert_eq!(decision.provider, ProviderId::WorldBank);
        assert_eq!(decision.reason, RouteReason::CountryDefault);
        assert_eq!(decision.priority_tier, 4);
    }

    #[test]
    fn test_region_default() {
        let mut intent = ParsedIntent::new("euro area core inflation").with_phrase("core inflation");
        intent.region = Some(Region::EuroArea);
        let decision = engine().route(&intent, "core inflation");
        assert_eq!(decision.provider, ProviderId::Ecb);
        assert_eq!(decision.reason, RouteReason::CountryDefault);
    }

    #[test]
    fn test_fallback_when_nothing_else_applies() {
        let intent = ParsedIntent::new("gdp growth").with_phrase("gdp growth");
        let decision = engine().route(&intent, "gdp growth");
        assert_eq!(decision.provider, ProviderId::WorldBank);
        assert_eq!(decision.reason, RouteReason::CatalogDefault);
        assert_eq!(decision.priority_tier, 5);
    }

    #[test]
    fn test_routing_is_deterministic() {
        let intent = ParsedIntent::new("Brazil inflation rate")
            .with_phrase("inflation rate")
            .with_country("BR");
        let e = engine();
        let first = e.route(&intent, "inflation rate");
        for _ in 0..5 {
            assert_eq!(e.route(&intent, "inflation rate"), first);
        }
    }

    #[test]
    fn test_per_phrase_keyword_routing_in_multi_indicator_query() {
        let intent = ParsedIntent::new("compare US unemployment with bitcoin market cap")
            .with_phrase("unemployment")
            .with_phrase("bitcoin market cap")
            .with_country("US");
        let e = engine();
        // The crypto phrase reaches its specialist even though the query also
        // carries a generic macro phrase.
        let crypto = e.route(&intent, "bitcoin market cap");
        assert_eq!(crypto.provider, ProviderId::CoinGecko);
        assert_eq!(crypto.reason, RouteReason::Keyword);
        // And the macro phrase is not dragged along to the specialist.
        let macro_phrase = e.route(&intent, "unemployment");
        assert_eq!(macro_phrase.provider, ProviderId::Fred);
        assert_eq!(macro_phrase.reason, RouteReason::CountryDefault);
    }
}
