//! The aligned triple: vector store, embedding cache and `{id, path}`
//! metadata. `Catalog` is the only type allowed to append to them, and every
//! append touches all three or none.

use crate::index::FlatIpIndex;
use crate::linalg::is_usable;
use crate::types::{IndexEntry, Neighbor};

/// Largest per-component difference tolerated between a cached row and the
/// stored vector at the same position.
const ROW_TOLERANCE: f32 = 1e-5;

/// Raw embeddings kept alongside the store, row `p` belonging to entry `p`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmbeddingCache {
    dim: usize,
    rows: Vec<f32>,
}

impl EmbeddingCache {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            rows: Vec::new(),
        }
    }

    /// Builds a cache from a dense row-major matrix.
    pub fn from_matrix(dim: usize, rows: Vec<f32>) -> anyhow::Result<Self> {
        if dim == 0 {
            anyhow::bail!("embedding cache dim must be > 0");
        }
        if rows.len() % dim != 0 {
            anyhow::bail!(
                "embedding matrix length {} is not a multiple of dim {}",
                rows.len(),
                dim
            );
        }
        Ok(Self { dim, rows })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.rows.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dim)?;
        self.rows.get(start..start.checked_add(self.dim)?)
    }

    pub fn as_matrix(&self) -> &[f32] {
        &self.rows
    }

    fn push(&mut self, row: &[f32]) {
        debug_assert_eq!(row.len(), self.dim);
        self.rows.extend_from_slice(row);
    }

    fn clear(&mut self) {
        self.rows.clear();
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Catalog {
    store: FlatIpIndex,
    cache: EmbeddingCache,
    entries: Vec<IndexEntry>,
}

impl Catalog {
    pub fn new(dim: usize) -> Self {
        Self {
            store: FlatIpIndex::new(dim),
            cache: EmbeddingCache::new(dim),
            entries: Vec::new(),
        }
    }

    /// Reassembles a catalog from persisted parts, rejecting any mismatch.
    /// Stale cache rows (non-finite or near zero) are accepted and recomputed
    /// on use; any other row must match the stored vector.
    pub fn from_parts(
        store: FlatIpIndex,
        cache: EmbeddingCache,
        entries: Vec<IndexEntry>,
    ) -> anyhow::Result<Self> {
        let out = Self {
            store,
            cache,
            entries,
        };
        out.check_aligned()?;
        out.check_rows()?;
        Ok(out)
    }

    pub fn dim(&self) -> usize {
        self.store.dim()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn store(&self) -> &FlatIpIndex {
        &self.store
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Appends one image to all three structures. The store validates the
    /// vector first; the remaining pushes cannot fail, so on error nothing
    /// has changed.
    pub fn append(
        &mut self,
        path: impl Into<String>,
        embedding: &[f32],
    ) -> anyhow::Result<IndexEntry> {
        let position = self.store.add(embedding)?;
        let id = u64::try_from(position)?;
        let entry = IndexEntry::new(id, path);
        self.cache.push(embedding);
        self.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        self.store.search(query, k)
    }

    pub fn clear(&mut self) {
        self.store.clear();
        self.cache.clear();
        self.entries.clear();
    }

    pub fn check_aligned(&self) -> anyhow::Result<()> {
        let (store_dim, cache_dim) = (self.store.dim(), self.cache.dim());
        if store_dim != cache_dim {
            anyhow::bail!("catalog dim mismatch: store={store_dim} cache={cache_dim}");
        }
        let n_entries = self.entries.len();
        let n_cache = self.cache.len();
        let n_store = self.store.len();
        if n_entries != n_cache || n_cache != n_store {
            anyhow::bail!(
                "catalog length mismatch: metadata={n_entries} cache={n_cache} store={n_store}"
            );
        }
        for (position, entry) in self.entries.iter().enumerate() {
            if entry.id != position as u64 {
                anyhow::bail!(
                    "catalog metadata id {} stored at position {position}",
                    entry.id
                );
            }
        }
        Ok(())
    }

    /// Verifies that every usable cache row is the vector stored at the
    /// same position. Appends write both from one slice, so this only needs
    /// to run on reassembled state.
    pub fn check_rows(&self) -> anyhow::Result<()> {
        for position in 0..self.entries.len() {
            let (Some(row), Some(stored)) = (self.cache.row(position), self.store.vector(position))
            else {
                anyhow::bail!("catalog row {position} missing from cache or store");
            };
            if !is_usable(row) {
                continue;
            }
            let drift = row
                .iter()
                .zip(stored)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f32, f32::max);
            if drift.is_nan() || drift > ROW_TOLERANCE {
                anyhow::bail!("cached embedding at position {position} differs from stored vector");
            }
        }
        Ok(())
    }
}
