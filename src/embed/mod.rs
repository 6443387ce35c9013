//! Boundary to the embedding capability.
//!
//! The index never talks to a provider directly; it goes through a
//! [`ProviderSlot`], which models a provider that was never initialized,
//! re-normalizes whatever comes back and drops wrong-sized vectors.

mod feature;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::linalg::l2_normalized;

pub use feature::{FeatureEmbedder, FeatureEmbedderConfig};

/// Produces unit-normalized vectors of a fixed dimension for images and
/// text. Implementations report failure as `None` and must not panic.
pub trait EmbeddingProvider: Send + Sync {
    fn dim(&self) -> usize;
    fn embed_image(&self, path: &Path) -> Option<Vec<f32>>;
    fn embed_text(&self, text: &str) -> Option<Vec<f32>>;
}

pub struct ProviderSlot {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    dim: usize,
    unavailable_logged: AtomicBool,
}

impl ProviderSlot {
    /// A provider whose dimension disagrees with `dim` is treated as
    /// unavailable.
    pub fn new(provider: Option<Arc<dyn EmbeddingProvider>>, dim: usize) -> Self {
        let provider = match provider {
            Some(p) if p.dim() != dim => {
                tracing::warn!(
                    expected = dim,
                    provided = p.dim(),
                    "embedding provider dimension mismatch; embeddings disabled"
                );
                None
            }
            other => other,
        };
        Self {
            provider,
            dim,
            unavailable_logged: AtomicBool::new(false),
        }
    }

    pub fn unavailable(dim: usize) -> Self {
        Self::new(None, dim)
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embed_image(&self, path: &Path) -> Option<Vec<f32>> {
        let provider = self.provider()?;
        let raw = provider.embed_image(path);
        if raw.is_none() {
            tracing::debug!(path = %path.display(), "image embedding failed");
        }
        self.accept(raw?)
    }

    pub fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        let provider = self.provider()?;
        let raw = provider.embed_text(text);
        if raw.is_none() {
            tracing::debug!(text, "text embedding failed");
        }
        self.accept(raw?)
    }

    fn provider(&self) -> Option<&dyn EmbeddingProvider> {
        if self.provider.is_none() && !self.unavailable_logged.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "embedding provider unavailable; search and ingestion return empty results"
            );
        }
        self.provider.as_deref()
    }

    fn accept(&self, v: Vec<f32>) -> Option<Vec<f32>> {
        if v.len() != self.dim {
            tracing::warn!(
                expected = self.dim,
                got = v.len(),
                "provider returned wrong-sized embedding"
            );
            return None;
        }
        l2_normalized(v)
    }
}

impl std::fmt::Debug for ProviderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSlot")
            .field("available", &self.is_available())
            .field("dim", &self.dim)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::{EmbeddingProvider, ProviderSlot};

    struct Fixed(Vec<f32>);

    impl EmbeddingProvider for Fixed {
        fn dim(&self) -> usize {
            self.0.len()
        }

        fn embed_image(&self, _path: &Path) -> Option<Vec<f32>> {
            Some(self.0.clone())
        }

        fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
            (!text.is_empty()).then(|| self.0.clone())
        }
    }

    #[test]
    fn unavailable_slot_returns_none() {
        let slot = ProviderSlot::unavailable(4);
        assert!(!slot.is_available());
        assert!(slot.embed_text("cat").is_none());
        assert!(slot.embed_image(Path::new("x.png")).is_none());
    }

    #[test]
    fn slot_renormalizes_output() {
        let slot = ProviderSlot::new(Some(Arc::new(Fixed(vec![3.0, 4.0]))), 2);
        let v = slot.embed_text("cat").expect("embedding");
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
        assert!(slot.embed_text("").is_none());
    }

    #[test]
    fn dimension_mismatch_disables_provider() {
        let slot = ProviderSlot::new(Some(Arc::new(Fixed(vec![1.0, 0.0]))), 3);
        assert!(!slot.is_available());
    }

    #[test]
    fn zero_vectors_are_rejected() {
        let slot = ProviderSlot::new(Some(Arc::new(Fixed(vec![0.0, 0.0]))), 2);
        assert!(slot.embed_image(Path::new("x.png")).is_none());
    }
}
