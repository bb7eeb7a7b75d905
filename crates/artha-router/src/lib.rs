//! artha-router — indicator resolution and provider routing for free-text
//! economic-data queries.
//!
//! Given a coarsely-parsed intent, the engine decides which statistical-data
//! provider serves each requested indicator, resolves the provider-specific
//! series code through a fixed ladder of confidence tiers, and fetches the
//! series with per-provider rate limiting and per-indicator failure
//! isolation. Catalogs and the similarity index live in an atomically
//! swappable snapshot so rebuilds never disturb in-flight queries.

pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod llm;
pub mod resolve;
pub mod routing;
pub mod similarity;
pub mod types;

// Re-export the primary surface for convenience.
pub use catalog::{CatalogArtifact, CatalogSnapshot, SnapshotStore};
pub use config::EngineConfig;
pub use dispatch::{DispatchCoordinator, ProviderFetch};
pub use engine::{IndicatorOutcome, QueryEngine, QueryOutcome};
pub use error::{FetchError, IndicatorFailure, QueryStatus};
pub use resolve::IndicatorResolver;
pub use routing::{ProviderRoutingEngine, RoutingTables};
pub use similarity::{Embedder, SimilarityIndex};
pub use types::{
    ParsedIntent, ProviderId, ResolvedIndicator, RouteReason, RoutingDecision, SourceTier,
    TimeSeries,
};

// Re-export common result types.
pub use anyhow::{Error, Result};
pub use uuid::Uuid;
