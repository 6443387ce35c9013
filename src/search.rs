//! Query composition over the aligned triple.
//!
//! A search resolves to exactly one query vector (text, reference image, or
//! a weighted blend of the two) and then runs a single exact inner-product
//! lookup. Failures anywhere along the way degrade to an empty result.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::catalog::Catalog;
use crate::embed::ProviderSlot;
use crate::linalg::{is_usable, l2_normalized, weighted_sum};
use crate::types::SearchHit;

pub const DEFAULT_WEIGHT_TEXT: f32 = 0.7;
pub const DEFAULT_LIMIT: usize = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub reference_id: Option<u64>,
    pub limit: usize,
    pub weight_text: f32,
}

impl SearchRequest {
    pub fn text(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            reference_id: None,
            limit,
            weight_text: DEFAULT_WEIGHT_TEXT,
        }
    }

    pub fn similar_to(reference_id: u64, limit: usize) -> Self {
        Self {
            query: String::new(),
            reference_id: Some(reference_id),
            limit,
            weight_text: DEFAULT_WEIGHT_TEXT,
        }
    }

    pub fn hybrid(
        query: impl Into<String>,
        reference_id: u64,
        limit: usize,
        weight_text: f32,
    ) -> Self {
        Self {
            query: query.into(),
            reference_id: Some(reference_id),
            limit,
            weight_text,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    Text,
    Hybrid { reference: u64 },
    Image { reference: u64 },
}

/// A reference id outside the catalog is ignored, not an error.
pub fn select_mode(query: &str, reference_id: Option<u64>, len: usize) -> SearchMode {
    match reference_id {
        Some(id) if usize::try_from(id).is_ok_and(|p| p < len) => {
            if query.trim().is_empty() {
                SearchMode::Image { reference: id }
            } else {
                SearchMode::Hybrid { reference: id }
            }
        }
        _ => SearchMode::Text,
    }
}

/// Clamps the text weight into `[0, 1]`; NaN falls back to the default.
pub fn effective_weight(weight_text: f32) -> f32 {
    if weight_text.is_nan() {
        DEFAULT_WEIGHT_TEXT
    } else {
        weight_text.clamp(0.0, 1.0)
    }
}

/// Maps a stored catalog path back to a file on disk.
pub fn resolve_source(media_root: &Path, stored: &str) -> PathBuf {
    let stored = Path::new(stored);
    if stored.is_absolute() {
        stored.to_path_buf()
    } else {
        media_root.join(stored)
    }
}

/// Returns the cached row for `position` when it is usable, otherwise a
/// freshly computed embedding of the entry's source file.
pub fn cached_or_recomputed<'c>(
    catalog: &'c Catalog,
    provider: &ProviderSlot,
    media_root: &Path,
    position: usize,
) -> Option<Cow<'c, [f32]>> {
    if let Some(row) = catalog.cache().row(position) {
        if is_usable(row) {
            return Some(Cow::Borrowed(row));
        }
    }
    let entry = catalog.entries().get(position)?;
    let source = resolve_source(media_root, &entry.path);
    tracing::debug!(position, path = %source.display(), "recomputing stale cached embedding");
    provider.embed_image(&source).map(Cow::Owned)
}

pub struct SearchEngine<'a> {
    catalog: &'a Catalog,
    provider: &'a ProviderSlot,
    media_root: &'a Path,
}

impl<'a> SearchEngine<'a> {
    pub fn new(catalog: &'a Catalog, provider: &'a ProviderSlot, media_root: &'a Path) -> Self {
        Self {
            catalog,
            provider,
            media_root,
        }
    }

    pub fn search(&self, req: &SearchRequest) -> Vec<SearchHit> {
        if self.catalog.is_empty() || req.limit == 0 {
            return Vec::new();
        }
        let Some(query) = self.query_vector(req) else {
            return Vec::new();
        };
        self.catalog
            .search(&query, req.limit)
            .into_iter()
            .filter_map(|n| {
                let entry = self.catalog.entries().get(n.position)?;
                Some(SearchHit {
                    id: entry.id,
                    path: entry.path.clone(),
                    score: n.score,
                })
            })
            .collect()
    }

    pub fn query_vector(&self, req: &SearchRequest) -> Option<Vec<f32>> {
        match select_mode(&req.query, req.reference_id, self.catalog.len()) {
            SearchMode::Text => self.text_vector(&req.query),
            SearchMode::Image { reference } => self.embedding_at(reference).map(Cow::into_owned),
            SearchMode::Hybrid { reference } => {
                let w = effective_weight(req.weight_text);
                if w >= 1.0 {
                    return self.text_vector(&req.query);
                }
                if w <= 0.0 {
                    return self.embedding_at(reference).map(Cow::into_owned);
                }
                let text = self.text_vector(&req.query)?;
                let image = self.embedding_at(reference)?;
                let blended = weighted_sum(&text, w, &image, 1.0 - w);
                let out = l2_normalized(blended);
                if out.is_none() {
                    tracing::debug!(reference, "hybrid query vector cancelled out");
                }
                out
            }
        }
    }

    /// Cached embedding of catalog entry `id`, recomputed when stale.
    pub fn embedding_at(&self, id: u64) -> Option<Cow<'a, [f32]>> {
        let position = usize::try_from(id).ok()?;
        cached_or_recomputed(self.catalog, self.provider, self.media_root, position)
    }

    fn text_vector(&self, query: &str) -> Option<Vec<f32>> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        self.provider.embed_text(query)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;

    use super::{effective_weight, select_mode, SearchEngine, SearchMode, SearchRequest};
    use crate::catalog::{Catalog, EmbeddingCache};
    use crate::embed::{EmbeddingProvider, ProviderSlot};
    use crate::index::FlatIpIndex;
    use crate::linalg::{dot, l2_normalized};
    use crate::types::IndexEntry;

    struct Table {
        texts: HashMap<String, Vec<f32>>,
        images: HashMap<String, Vec<f32>>,
    }

    impl EmbeddingProvider for Table {
        fn dim(&self) -> usize {
            2
        }

        fn embed_image(&self, path: &Path) -> Option<Vec<f32>> {
            let stem = path.file_stem()?.to_str()?;
            self.images.get(stem).cloned()
        }

        fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
            self.texts.get(text).cloned()
        }
    }

    fn provider() -> ProviderSlot {
        let table = Table {
            texts: HashMap::from([
                ("up".to_string(), vec![0.0, 1.0]),
                ("left".to_string(), vec![-1.0, 0.0]),
            ]),
            images: HashMap::from([("stale".to_string(), vec![0.6, 0.8])]),
        };
        ProviderSlot::new(Some(Arc::new(table)), 2)
    }

    fn catalog() -> anyhow::Result<Catalog> {
        let mut cat = Catalog::new(2);
        cat.append("right.png", &[1.0, 0.0])?;
        cat.append("up.png", &[0.0, 1.0])?;
        cat.append("diag.png", &[0.6, 0.8])?;
        Ok(cat)
    }

    #[test]
    fn mode_selection() {
        assert_eq!(select_mode("cat", None, 3), SearchMode::Text);
        assert_eq!(select_mode("cat", Some(7), 3), SearchMode::Text);
        assert_eq!(
            select_mode(" ", Some(1), 3),
            SearchMode::Image { reference: 1 }
        );
        assert_eq!(
            select_mode("cat", Some(1), 3),
            SearchMode::Hybrid { reference: 1 }
        );
    }

    #[test]
    fn weight_is_clamped() {
        assert_eq!(effective_weight(f32::NAN), 0.7);
        assert_eq!(effective_weight(2.0), 1.0);
        assert_eq!(effective_weight(-1.0), 0.0);
        assert_eq!(effective_weight(0.25), 0.25);
    }

    #[test]
    fn text_search_ranks_by_inner_product() -> anyhow::Result<()> {
        let cat = catalog()?;
        let slot = provider();
        let engine = SearchEngine::new(&cat, &slot, Path::new("."));
        let hits = engine.search(&SearchRequest::text("up", 2));
        let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(engine.search(&SearchRequest::text("unknown", 2)).is_empty());
        assert!(engine.search(&SearchRequest::text("   ", 2)).is_empty());
        Ok(())
    }

    #[test]
    fn degenerate_weights_match_single_modes() -> anyhow::Result<()> {
        let cat = catalog()?;
        let slot = provider();
        let engine = SearchEngine::new(&cat, &slot, Path::new("."));
        let text_only = engine.search(&SearchRequest::text("up", 3));
        let image_only = engine.search(&SearchRequest::similar_to(0, 3));
        assert_eq!(engine.search(&SearchRequest::hybrid("up", 0, 3, 1.0)), text_only);
        assert_eq!(engine.search(&SearchRequest::hybrid("up", 0, 3, 0.0)), image_only);
        assert_eq!(image_only[0].id, 0);
        assert_eq!(text_only[0].id, 1);
        Ok(())
    }

    #[test]
    fn hybrid_query_scores_against_the_normalized_blend() -> anyhow::Result<()> {
        let cat = catalog()?;
        let slot = provider();
        let engine = SearchEngine::new(&cat, &slot, Path::new("."));
        // text "up" = (0, 1), reference 0 = (1, 0)
        let blend = l2_normalized(vec![0.5, 0.5]).expect("non-zero blend");

        let hits = engine.search(&SearchRequest::hybrid("up", 0, 3, 0.5));
        // diag scores highest; right and up tie and keep position order.
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![2, 0, 1]);
        for hit in &hits {
            let row = cat.store().vector(hit.id as usize).expect("stored row");
            assert!((hit.score - dot(&blend, row)).abs() < 1e-6);
        }
        assert!((hits[0].score - 0.98995).abs() < 1e-4);

        let weighted = engine.search(&SearchRequest::hybrid("up", 0, 1, 0.25));
        let expected = l2_normalized(vec![0.75, 0.25]).expect("non-zero blend");
        assert_eq!(weighted[0].id, 0);
        assert!((weighted[0].score - dot(&expected, &[1.0, 0.0])).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn cancelled_hybrid_blend_returns_nothing() -> anyhow::Result<()> {
        let cat = catalog()?;
        let slot = provider();
        let engine = SearchEngine::new(&cat, &slot, Path::new("."));
        // "left" is the exact opposite of reference 0, so an even blend is zero.
        assert!(engine.search(&SearchRequest::hybrid("left", 0, 3, 0.5)).is_empty());
        assert!(!engine.search(&SearchRequest::hybrid("left", 0, 3, 0.4)).is_empty());
        Ok(())
    }

    #[test]
    fn stale_cache_rows_are_recomputed() -> anyhow::Result<()> {
        // Persisted caches may carry rows the store never validated.
        let cache = EmbeddingCache::from_matrix(2, vec![1.0, 0.0, 0.0, 0.0])?;
        let mut store = FlatIpIndex::new(2);
        store.add(&[1.0, 0.0])?;
        store.add(&[0.6, 0.8])?;
        let entries = vec![
            IndexEntry::new(0, "right.png"),
            IndexEntry::new(1, "stale.png"),
        ];
        let cat = Catalog::from_parts(store, cache, entries)?;

        let slot = provider();
        let engine = SearchEngine::new(&cat, &slot, Path::new("/media"));
        let v = engine.embedding_at(1).expect("recomputed");
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
        Ok(())
    }
}
