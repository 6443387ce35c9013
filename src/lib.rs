//! `imagedb` is an embedding-backed image catalog: text, similar-image and
//! hybrid search over an exact inner-product index, plus seeded clustering.
//!
//! Correctness rules the crate is built around:
//! - The vector store, embedding cache and `{id, path}` metadata always have
//!   the same length, and `id` is the insertion position.
//! - Every vector is unit-normalized before it is stored or queried.
//! - Persistence writes whole generations and flips `CURRENT` atomically.
//! - Embedding failures degrade to empty results; they never poison state.

pub mod catalog;
pub mod cluster;
pub mod config;
pub mod embed;
pub mod index;
pub mod ingest;
pub mod linalg;
pub mod search;
pub mod service;
pub mod stats;
pub mod storage;
pub mod store;
pub mod types;

pub use catalog::{Catalog, EmbeddingCache};
pub use config::{validate_config, IndexConfig};
pub use embed::{EmbeddingProvider, FeatureEmbedder, FeatureEmbedderConfig, ProviderSlot};
pub use ingest::{ImageSource, IngestError, IngestedImage};
pub use search::{SearchRequest, DEFAULT_LIMIT, DEFAULT_WEIGHT_TEXT};
pub use service::{ImageSearchService, ServiceStatus};
pub use stats::ServiceStats;
pub use store::{CatalogStore, ImageMetadata, ImageRecord, JsonCatalogStore, StoreError};
pub use types::{ClusterGroup, IndexEntry, SearchHit};

/// Library version string exposed to the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::VERSION;

    #[test]
    fn version_is_non_empty() {
        assert!(!VERSION.is_empty());
    }
}
