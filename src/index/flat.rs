use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::linalg::dot;
use crate::types::Neighbor;

/// Exact inner-product index over a dense row-major matrix.
///
/// Positions are assigned in insertion order and never change. Callers are
/// expected to store unit vectors so scores are cosine similarities.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatIpIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIpIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Structural check for indexes that did not come from `add`.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dim == 0 {
            anyhow::bail!("flat index dim must be > 0");
        }
        if self.data.len() % self.dim != 0 {
            anyhow::bail!(
                "flat index holds {} floats, not a multiple of dim {}",
                self.data.len(),
                self.dim
            );
        }
        Ok(())
    }

    /// Appends a vector and returns its position. The store is unchanged on
    /// error.
    pub fn add(&mut self, vector: &[f32]) -> anyhow::Result<usize> {
        if self.dim == 0 {
            anyhow::bail!("flat index dim must be > 0");
        }
        if vector.len() != self.dim {
            anyhow::bail!(
                "vector dim mismatch: expected {}, got {}",
                self.dim,
                vector.len()
            );
        }
        if vector.iter().any(|x| !x.is_finite()) {
            anyhow::bail!("vector contains non-finite values");
        }
        let position = self.len();
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dim)?;
        let end = start.checked_add(self.dim)?;
        self.data.get(start..end)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> + '_ {
        self.data.chunks_exact(self.dim.max(1))
    }

    /// Top-`k` positions by descending score, ties by ascending position.
    /// `k` is capped to `len()`; an empty store or a wrong-sized query
    /// yields no hits.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        if query.len() != self.dim || k == 0 || self.is_empty() {
            return Vec::new();
        }
        let k = k.min(self.len());
        let mut hits: Vec<Neighbor> = self
            .iter()
            .enumerate()
            .map(|(position, row)| Neighbor {
                position,
                score: dot(query, row),
            })
            .collect();
        if k < hits.len() {
            hits.select_nth_unstable_by(k - 1, rank_order);
            hits.truncate(k);
        }
        hits.sort_by(rank_order);
        hits
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

fn rank_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.position.cmp(&b.position))
}
