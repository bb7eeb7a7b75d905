//! Error taxonomy for resolution and dispatch.
//!
//! Failures inside a single resolution tier are absorbed and cause
//! fall-through to the next tier; only exhaustion of all tiers surfaces as
//! `NoMatchFound`, and it always carries the full resolution path. Dispatch
//! failures are isolated per indicator and never abort the rest of a query.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ProviderId, SourceTier};

/// Typed result of the external provider-fetch contract.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FetchError {
    #[error("series not found")]
    NotFound,
    #[error("rate limited by provider")]
    RateLimited,
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("unsupported region: {0}")]
    UnsupportedRegion(String),
}

impl FetchError {
    /// Transient errors are retried with backoff; terminal ones are returned
    /// to the caller immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Unavailable(_))
    }
}

/// Diagnostic detail attached when the top candidates of the final tier were
/// too close in confidence to prefer one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbiguityDetail {
    pub tier: SourceTier,
    /// (code, confidence) of the contenders, best first.
    pub contenders: Vec<(String, f32)>,
}

/// Per-indicator failure marker. A query with N indicators where M fail
/// returns the N−M successes alongside M of these.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum IndicatorFailure {
    #[error("no confident match for '{phrase}' on {provider}")]
    NoMatchFound {
        phrase: String,
        provider: ProviderId,
        /// Every tier consulted before giving up, in order.
        resolution_path: Vec<SourceTier>,
        ambiguity: Option<AmbiguityDetail>,
    },

    #[error("series {code} not found on {provider}")]
    SeriesNotFound { provider: ProviderId, code: String },

    #[error("{provider} unavailable after {attempts} attempts")]
    ProviderUnavailable { provider: ProviderId, attempts: u32 },

    #[error("{provider} does not support the requested region: {detail}")]
    UnsupportedRegion { provider: ProviderId, detail: String },

    #[error("query deadline exceeded")]
    Timeout,
}

/// Overall status of a multi-indicator query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    /// Every indicator resolved and fetched.
    Complete,
    /// At least one success and at least one failure.
    Partial,
    /// Nothing succeeded.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::RateLimited.is_transient());
        assert!(FetchError::Unavailable("503".into()).is_transient());
        assert!(!FetchError::NotFound.is_transient());
        assert!(!FetchError::UnsupportedRegion("EU-MiddleEast".into()).is_transient());
    }

    #[test]
    fn test_failure_display_carries_context() {
        let failure = IndicatorFailure::NoMatchFound {
            phrase: "quantum widget index".into(),
            provider: ProviderId::Fred,
            resolution_path: vec![SourceTier::Hardcoded, SourceTier::Catalog],
            ambiguity: None,
        };
        let text = failure.to_string();
        assert!(text.contains("quantum widget index"));
        assert!(text.contains("fred"));
    }

    #[test]
    fn test_fetch_error_serializes_tagged() {
        let json = serde_json::to_string(&FetchError::Unavailable("timeout".into())).unwrap();
        assert!(json.contains("unavailable"));
        let back: FetchError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FetchError::Unavailable("timeout".into()));
    }
}
