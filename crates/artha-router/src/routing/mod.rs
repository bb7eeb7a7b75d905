pub mod engine;
pub mod explicit;
pub mod keywords;
pub mod tables;

pub use engine::ProviderRoutingEngine;
pub use explicit::ExplicitProviderDetector;
pub use keywords::{KeywordPreRouter, KeywordTable};
pub use tables::{CountryDefaultTable, IndicatorOverrideTable, RoutingTables};
