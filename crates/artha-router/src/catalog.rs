//! Catalog snapshot: the one piece of process-wide state.
//!
//! The offline index job produces a versioned JSON artifact holding the
//! per-provider alias tables, the flattened indicator catalog, the structural
//! dataflow catalogs, and the embedding matrix. At startup (and on rebuild)
//! the artifact is loaded into an immutable `CatalogSnapshot` and published
//! through `SnapshotStore` with a single atomic swap — in-flight requests keep
//! the `Arc` they started with, and no reader ever observes a partial rebuild.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::similarity::{EmbeddedIndicator, SimilarityIndex};
use crate::types::{normalize_phrase, ProviderId};

/// One row of a provider's flattened indicator catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub provider: ProviderId,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Provider-published structural metadata for one data series family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
}

/// On-disk shape of the snapshot artifact written by the offline build job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogArtifact {
    pub version: u64,
    pub built_at: DateTime<Utc>,
    /// phrase → code, per provider. Phrases are normalized at load time.
    pub aliases: HashMap<ProviderId, HashMap<String, String>>,
    pub entries: Vec<CatalogEntry>,
    #[serde(default)]
    pub dataflows: HashMap<ProviderId, Vec<Dataflow>>,
    pub embedding_dimension: usize,
    pub embeddings: Vec<EmbeddedIndicator>,
}

pub fn load_artifact(path: &Path) -> Result<CatalogArtifact> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot artifact {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse snapshot artifact {}", path.display()))
}

/// Immutable, fully-built view of one artifact version.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub version: u64,
    pub built_at: DateTime<Utc>,
    aliases: HashMap<ProviderId, HashMap<String, String>>,
    entries_by_provider: HashMap<ProviderId, Vec<CatalogEntry>>,
    dataflows: HashMap<ProviderId, Vec<Dataflow>>,
    pub index: SimilarityIndex,
}

impl CatalogSnapshot {
    pub fn from_artifact(artifact: CatalogArtifact) -> Result<Self> {
        let index = SimilarityIndex::build(artifact.embedding_dimension, artifact.embeddings)
            .context("Failed to build similarity index from artifact")?;

        let aliases = artifact
            .aliases
            .into_iter()
            .map(|(provider, table)| {
                let normalized = table
                    .into_iter()
                    .map(|(phrase, code)| (normalize_phrase(&phrase), code))
                    .collect();
                (provider, normalized)
            })
            .collect();

        let mut entries_by_provider: HashMap<ProviderId, Vec<CatalogEntry>> = HashMap::new();
        for entry in artifact.entries {
            entries_by_provider.entry(entry.provider).or_default().push(entry);
        }

        Ok(Self {
            version: artifact.version,
            built_at: artifact.built_at,
            aliases,
            entries_by_provider,
            dataflows: artifact.dataflows,
            index,
        })
    }

    /// Empty snapshot (version 0) for engines constructed before the first
    /// artifact load.
    pub fn empty() -> Self {
        Self {
            version: 0,
            built_at: Utc::now(),
            aliases: HashMap::new(),
            entries_by_provider: HashMap::new(),
            dataflows: HashMap::new(),
            index: SimilarityIndex::build(1, Vec::new()).expect("empty index is valid"),
        }
    }

    /// Direct alias hit for an already-normalized phrase.
    pub fn alias_lookup(&self, provider: ProviderId, normalized_phrase: &str) -> Option<&str> {
        self.aliases
            .get(&provider)?
            .get(normalized_phrase)
            .map(String::as_str)
    }

    pub fn entries_for(&self, provider: ProviderId) -> &[CatalogEntry] {
        self.entries_by_provider
            .get(&provider)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn dataflows_for(&self, provider: ProviderId) -> &[Dataflow] {
        self.dataflows.get(&provider).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Display name for a code, when the flattened catalog knows it.
    pub fn entry_name(&self, provider: ProviderId, code: &str) -> Option<&str> {
        self.entries_for(provider)
            .iter()
            .find(|entry| entry.code == code)
            .map(|entry| entry.name.as_str())
    }
}

/// Atomically-replaceable snapshot reference. Readers clone the `Arc` once per
/// request and never block a rebuild; a rebuild never blocks readers.
pub struct SnapshotStore {
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl SnapshotStore {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn from_artifact_file(path: &Path) -> Result<Self> {
        let artifact = load_artifact(path)?;
        Ok(Self::new(CatalogSnapshot::from_artifact(artifact)?))
    }

    pub fn current(&self) -> Arc<CatalogSnapshot> {
        self.current.read().clone()
    }

    /// Publish a rebuilt snapshot. Derived caches key on the snapshot version,
    /// so entries from older versions die with this swap.
    pub fn swap(&self, snapshot: CatalogSnapshot) {
        let version = snapshot.version;
        *self.current.write() = Arc::new(snapshot);
        tracing::info!(version = version, "Catalog snapshot swapped");
    }
}
