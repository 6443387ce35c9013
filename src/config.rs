use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DIM: usize = 512;
pub const DEFAULT_MAX_IMAGE_SIDE: u32 = 1920;
pub const DEFAULT_WORKERS: usize = 8;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Embedding dimension; must match the provider.
    pub dim: usize,
    /// Directory holding the persisted index generations.
    pub index_dir: PathBuf,
    /// Catalog paths are stored relative to this directory when possible.
    pub media_root: PathBuf,
    /// Destination for uploaded images; also the default rebuild source.
    pub upload_dir: PathBuf,
    pub max_image_side: u32,
    /// Size of the embedding worker pool for batch ingestion.
    pub workers: usize,
    /// Persist after this many appends (and always at the end of a batch).
    pub persist_every: usize,
    pub cluster_seed: u64,
    pub kmeans_max_iters: usize,
    /// Lowercase extensions, without the dot.
    pub image_extensions: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dim: DEFAULT_DIM,
            index_dir: PathBuf::from("index"),
            media_root: PathBuf::from("static"),
            upload_dir: PathBuf::from("static/uploads"),
            max_image_side: DEFAULT_MAX_IMAGE_SIDE,
            workers: DEFAULT_WORKERS,
            persist_every: 1,
            cluster_seed: 42,
            kmeans_max_iters: 300,
            image_extensions: ["png", "jpg", "jpeg", "gif"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl IndexConfig {
    /// Default layout rooted at `root`: `index/`, `static/`, `static/uploads/`.
    pub fn with_root(root: &Path) -> Self {
        Self {
            index_dir: root.join("index"),
            media_root: root.join("static"),
            upload_dir: root.join("static").join("uploads"),
            ..Default::default()
        }
    }

    pub fn load_json(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: Self = serde_json::from_slice(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        validate_config(&cfg)?;
        Ok(cfg)
    }
}

pub fn validate_config(cfg: &IndexConfig) -> anyhow::Result<()> {
    if cfg.dim == 0 {
        anyhow::bail!("index dim must be > 0");
    }
    if cfg.max_image_side == 0 {
        anyhow::bail!("max_image_side must be > 0");
    }
    if cfg.workers == 0 {
        anyhow::bail!("workers must be > 0");
    }
    if cfg.persist_every == 0 {
        anyhow::bail!("persist_every must be > 0");
    }
    if cfg.kmeans_max_iters == 0 {
        anyhow::bail!("kmeans_max_iters must be > 0");
    }
    if cfg.image_extensions.is_empty() {
        anyhow::bail!("image_extensions must not be empty");
    }
    if let Some(bad) = cfg
        .image_extensions
        .iter()
        .find(|e| e.is_empty() || e.starts_with('.') || e.to_lowercase() != **e)
    {
        anyhow::bail!("image extension {bad:?} must be lowercase and without a dot");
    }
    Ok(())
}
