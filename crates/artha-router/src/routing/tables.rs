//! Externally editable routing tables.
//!
//! Keyword lists, indicator overrides, and country defaults are data, not
//! code: the built-in defaults below can be replaced wholesale from a JSON
//! file without recompilation, and tests substitute fixtures the same way.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::routing::keywords::KeywordTable;
use crate::types::{normalize_phrase, ProviderId, Region};

/// Indicator-term overrides: phrases that pull a query away from the generic
/// country default toward a specialist provider. Applied only to countries
/// without a domestic provider — a domestic provider's home country always
/// keeps its domestic source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRule {
    pub terms: Vec<String>,
    pub provider: ProviderId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorOverrideTable {
    pub rules: Vec<OverrideRule>,
}

impl Default for IndicatorOverrideTable {
    fn default() -> Self {
        Self {
            rules: vec![OverrideRule {
                terms: [
                    "inflation",
                    "consumer price",
                    "cpi",
                    "government debt",
                    "public debt",
                    "fiscal deficit",
                    "budget deficit",
                    "fiscal balance",
                ]
                .iter()
                .map(|t| t.to_string())
                .collect(),
                provider: ProviderId::Imf,
            }],
        }
    }
}

impl IndicatorOverrideTable {
    pub fn match_phrase(&self, phrase: &str) -> Option<ProviderId> {
        let padded = format!(" {} ", normalize_phrase(phrase));
        for rule in &self.rules {
            for term in &rule.terms {
                let needle = format!(" {} ", normalize_phrase(term));
                if padded.contains(&needle) {
                    return Some(rule.provider);
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryRule {
    pub country: String,
    pub provider: ProviderId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRule {
    pub region: Region,
    pub provider: ProviderId,
}

/// Country and region defaults: a domestic provider for its home countries, a
/// general multi-country provider for everyone else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryDefaultTable {
    pub domestic: Vec<CountryRule>,
    pub region_defaults: Vec<RegionRule>,
    pub fallback: ProviderId,
}

const EU_MEMBERS: &[&str] = &[
    "AT", "BE", "BG", "HR", "CY", "CZ", "DK", "EE", "FI", "FR", "DE", "GR", "HU", "IE", "IT",
    "LV", "LT", "LU", "MT", "NL", "PL", "PT", "RO", "SK", "SI", "ES", "SE",
];

impl Default for CountryDefaultTable {
    fn default() -> Self {
        let mut domestic = vec![CountryRule {
            country: "US".to_string(),
            provider: ProviderId::Fred,
        }];
        for member in EU_MEMBERS {
            domestic.push(CountryRule {
                country: member.to_string(),
                provider: ProviderId::Eurostat,
            });
        }
        Self {
            domestic,
            region_defaults: vec![
                RegionRule { region: Region::EuroArea, provider: ProviderId::Ecb },
                RegionRule { region: Region::EuropeanUnion, provider: ProviderId::Eurostat },
                RegionRule { region: Region::OecdMembers, provider: ProviderId::Oecd },
                RegionRule { region: Region::World, provider: ProviderId::WorldBank },
            ],
            fallback: ProviderId::WorldBank,
        }
    }
}

impl CountryDefaultTable {
    pub fn domestic_for(&self, country: &str) -> Option<ProviderId> {
        self.domestic
            .iter()
            .find(|rule| rule.country.eq_ignore_ascii_case(country))
            .map(|rule| rule.provider)
    }

    pub fn has_domestic(&self, country: Option<&str>) -> bool {
        country.map_or(false, |c| self.domestic_for(c).is_some())
    }

    pub fn region_default(&self, region: Region) -> Option<ProviderId> {
        self.region_defaults
            .iter()
            .find(|rule| rule.region == region)
            .map(|rule| rule.provider)
    }
}

/// The full routing configuration bundle, loadable from one JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingTables {
    #[serde(default)]
    pub keywords: KeywordTable,
    #[serde(default)]
    pub overrides: IndicatorOverrideTable,
    #[serde(default)]
    pub country_defaults: CountryDefaultTable,
}

impl Default for RoutingTables {
    fn default() -> Self {
        Self {
            keywords: KeywordTable::default(),
            overrides: IndicatorOverrideTable::default(),
            country_defaults: CountryDefaultTable::default(),
        }
    }
}

impl RoutingTables {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read routing tables: {}", e))?;
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse routing tables: {}", e))
    }
}
