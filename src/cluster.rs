//! Semantic grouping of the catalog: seeded k-means over cached embeddings,
//! with each centroid named after the closest phrase of a fixed vocabulary.

use std::path::Path;

use crate::catalog::Catalog;
use crate::embed::ProviderSlot;
use crate::index::{l2_kmeans, KMeansConfig};
use crate::linalg::dot;
use crate::search::cached_or_recomputed;
use crate::types::ClusterGroup;

pub const ALL_IMAGES_LABEL: &str = "All Images";
pub const MIN_REQUESTED_CLUSTERS: usize = 2;
pub const MAX_REQUESTED_CLUSTERS: usize = 10;

pub const CATEGORIES: [&str; 15] = [
    "landscape",
    "portrait",
    "animals",
    "food",
    "architecture",
    "nature",
    "urban",
    "abstract",
    "people",
    "objects",
    "technology",
    "art",
    "black and white",
    "colorful",
    "vintage",
];

/// Service-level bound on the number of clusters a caller may ask for.
pub fn clamp_requested(requested_k: usize) -> usize {
    requested_k.clamp(MIN_REQUESTED_CLUSTERS, MAX_REQUESTED_CLUSTERS)
}

/// At least two images per cluster on average, never fewer than one cluster.
pub fn effective_k(requested_k: usize, count: usize) -> usize {
    requested_k.min(count / 2).max(1)
}

pub struct Clusterer<'a> {
    catalog: &'a Catalog,
    provider: &'a ProviderSlot,
    media_root: &'a Path,
    seed: u64,
    max_iters: usize,
}

impl<'a> Clusterer<'a> {
    pub fn new(catalog: &'a Catalog, provider: &'a ProviderSlot, media_root: &'a Path) -> Self {
        let defaults = KMeansConfig::default();
        Self {
            catalog,
            provider,
            media_root,
            seed: defaults.seed,
            max_iters: defaults.max_iters,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn cluster(&self, requested_k: usize) -> Vec<ClusterGroup> {
        let entries = self.catalog.entries();
        if entries.len() < 2 {
            return vec![ClusterGroup {
                id: 0,
                name: ALL_IMAGES_LABEL.to_string(),
                images: entries.to_vec(),
            }];
        }

        let k = effective_k(requested_k, entries.len());
        let points = self.points();
        let result = l2_kmeans(
            &points,
            &KMeansConfig {
                k,
                max_iters: self.max_iters,
                seed: self.seed,
            },
        );
        tracing::debug!(
            k,
            images = entries.len(),
            iterations = result.iterations,
            "clustered catalog"
        );

        let names = self.label_centroids(&result.centroids);
        let mut groups: Vec<ClusterGroup> = names
            .into_iter()
            .enumerate()
            .map(|(id, name)| ClusterGroup {
                id,
                name,
                images: Vec::new(),
            })
            .collect();
        // Entries are in id order, so each group's images stay sorted.
        for (entry, cid) in entries.iter().zip(&result.assignments) {
            if let Some(group) = groups.get_mut(*cid) {
                group.images.push(entry.clone());
            }
        }
        groups
    }

    fn points(&self) -> Vec<Vec<f32>> {
        let dim = self.catalog.dim();
        (0..self.catalog.len())
            .map(|position| {
                cached_or_recomputed(self.catalog, self.provider, self.media_root, position)
                    .map(|row| row.into_owned())
                    .unwrap_or_else(|| {
                        tracing::warn!(position, "no usable embedding; clustering a zero vector");
                        vec![0.0; dim]
                    })
            })
            .collect()
    }

    fn label_centroids(&self, centroids: &[Vec<f32>]) -> Vec<String> {
        let vocabulary: Vec<(&str, Vec<f32>)> = CATEGORIES
            .iter()
            .filter_map(|c| {
                let v = self.provider.embed_text(&format!("a photo of {c}"))?;
                Some((*c, v))
            })
            .collect();

        centroids
            .iter()
            .enumerate()
            .map(|(id, centroid)| {
                // Centroid norm is shared by every candidate, so the raw dot
                // product ranks categories the same as cosine similarity.
                let mut best: Option<(&str, f32)> = None;
                for &(category, ref v) in &vocabulary {
                    let score = dot(centroid, v);
                    if best.map_or(true, |(_, s)| score > s) {
                        best = Some((category, score));
                    }
                }
                match best {
                    Some((category, _)) => format!("{} Images", title_case(category)),
                    None => format!("Cluster {}", id + 1),
                }
            })
            .collect()
    }
}

/// Uppercases the first letter of every word and lowercases the rest.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::{clamp_requested, effective_k, title_case, Clusterer, ALL_IMAGES_LABEL};
    use crate::catalog::Catalog;
    use crate::embed::{EmbeddingProvider, ProviderSlot};

    /// Maps "a photo of food" to +x and "a photo of urban" to +y.
    struct Vocab;

    impl EmbeddingProvider for Vocab {
        fn dim(&self) -> usize {
            2
        }

        fn embed_image(&self, _path: &Path) -> Option<Vec<f32>> {
            None
        }

        fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
            match text {
                "a photo of food" => Some(vec![1.0, 0.0]),
                "a photo of urban" => Some(vec![0.0, 1.0]),
                _ => None,
            }
        }
    }

    /// "landscape" and "portrait" embed identically; "food" points away.
    struct TiedVocab;

    impl EmbeddingProvider for TiedVocab {
        fn dim(&self) -> usize {
            2
        }

        fn embed_image(&self, _path: &Path) -> Option<Vec<f32>> {
            None
        }

        fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
            match text {
                "a photo of landscape" | "a photo of portrait" => Some(vec![1.0, 0.0]),
                "a photo of food" => Some(vec![0.0, 1.0]),
                _ => None,
            }
        }
    }

    fn two_groups() -> anyhow::Result<Catalog> {
        let mut cat = Catalog::new(2);
        cat.append("a.png", &[1.0, 0.0])?;
        cat.append("b.png", &[0.0, 1.0])?;
        cat.append("c.png", &[0.99, 0.141])?;
        cat.append("d.png", &[0.141, 0.99])?;
        Ok(cat)
    }

    #[test]
    fn k_bounds() {
        assert_eq!(clamp_requested(0), 2);
        assert_eq!(clamp_requested(50), 10);
        assert_eq!(effective_k(5, 3), 1);
        assert_eq!(effective_k(5, 4), 2);
        assert_eq!(effective_k(5, 100), 5);
        assert_eq!(effective_k(0, 100), 1);
    }

    #[test]
    fn small_catalogs_form_one_group() -> anyhow::Result<()> {
        let slot = ProviderSlot::unavailable(2);
        let empty = Catalog::new(2);
        let groups = Clusterer::new(&empty, &slot, Path::new(".")).cluster(5);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, ALL_IMAGES_LABEL);
        assert!(groups[0].images.is_empty());

        let mut one = Catalog::new(2);
        one.append("a.png", &[1.0, 0.0])?;
        let groups = Clusterer::new(&one, &slot, Path::new(".")).cluster(5);
        assert_eq!(groups[0].images.len(), 1);
        Ok(())
    }

    #[test]
    fn groups_cover_every_entry_and_get_labels() -> anyhow::Result<()> {
        let cat = two_groups()?;
        let slot = ProviderSlot::new(Some(Arc::new(Vocab)), 2);
        let groups = Clusterer::new(&cat, &slot, Path::new(".")).cluster(5);
        assert_eq!(groups.len(), 2);
        let mut ids: Vec<u64> = groups
            .iter()
            .flat_map(|g| g.images.iter().map(|e| e.id))
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        for g in &groups {
            let first = g.images[0].id;
            let expected = if first % 2 == 0 { "Food Images" } else { "Urban Images" };
            assert_eq!(g.name, expected);
            assert!(g.images.windows(2).all(|w| w[0].id < w[1].id));
        }
        Ok(())
    }

    #[test]
    fn clustering_is_deterministic() -> anyhow::Result<()> {
        let cat = two_groups()?;
        let slot = ProviderSlot::new(Some(Arc::new(Vocab)), 2);
        let a = Clusterer::new(&cat, &slot, Path::new(".")).cluster(2);
        let b = Clusterer::new(&cat, &slot, Path::new(".")).cluster(2);
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn unlabeled_clusters_fall_back_to_numbers() -> anyhow::Result<()> {
        let cat = two_groups()?;
        let slot = ProviderSlot::unavailable(2);
        let groups = Clusterer::new(&cat, &slot, Path::new(".")).cluster(2);
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Cluster 1", "Cluster 2"]);
        Ok(())
    }

    #[test]
    fn label_ties_go_to_the_first_listed_category() -> anyhow::Result<()> {
        let mut cat = Catalog::new(2);
        cat.append("a.png", &[1.0, 0.0])?;
        cat.append("b.png", &[0.99, 0.141])?;
        cat.append("c.png", &[0.98, 0.199])?;
        let slot = ProviderSlot::new(Some(Arc::new(TiedVocab)), 2);
        let groups = Clusterer::new(&cat, &slot, Path::new(".")).cluster(5);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Landscape Images");
        Ok(())
    }

    #[test]
    fn title_case_matches_multiword_categories() {
        assert_eq!(title_case("black and white"), "Black And White");
        assert_eq!(title_case("food"), "Food");
    }
}
