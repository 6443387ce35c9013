#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use imagedb::{
    CatalogStore, EmbeddingProvider, ImageSearchService, IndexConfig, JsonCatalogStore,
};

pub const DIM: usize = 3;

/// Embeds images by file stem and text by exact string. Upload copies are
/// named `<timestamp>_<stem>`, so a stem also matches after the last `_`.
#[derive(Default)]
pub struct TableEmbedder {
    images: HashMap<String, Vec<f32>>,
    texts: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(mut self, stem: &str, v: [f32; DIM]) -> Self {
        self.images.insert(stem.to_string(), v.to_vec());
        self
    }

    pub fn text(mut self, text: &str, v: [f32; DIM]) -> Self {
        self.texts.insert(text.to_string(), v.to_vec());
        self
    }

    pub fn into_provider(self) -> Option<Arc<dyn EmbeddingProvider>> {
        Some(Arc::new(self))
    }
}

impl EmbeddingProvider for TableEmbedder {
    fn dim(&self) -> usize {
        DIM
    }

    fn embed_image(&self, path: &Path) -> Option<Vec<f32>> {
        // Reject anything that is not a decodable image, like a real model.
        image::open(path).ok()?;
        let stem = path.file_stem()?.to_str()?;
        let key = stem.rsplit('_').next().unwrap_or(stem);
        self.images
            .get(stem)
            .or_else(|| self.images.get(key))
            .cloned()
    }

    fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        self.texts.get(text).cloned()
    }
}

pub fn unit(v: [f32; DIM]) -> [f32; DIM] {
    let n = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.map(|x| x / n)
}

pub fn config(root: &Path) -> IndexConfig {
    IndexConfig {
        dim: DIM,
        workers: 2,
        ..IndexConfig::with_root(root)
    }
}

pub fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    RgbImage::from_pixel(width, height, Rgb([120, 80, 40])).save(&path)?;
    Ok(path)
}

pub fn open_service(
    root: &Path,
    embedder: TableEmbedder,
) -> anyhow::Result<(ImageSearchService, Arc<JsonCatalogStore>)> {
    let store = Arc::new(JsonCatalogStore::open(root.join("database/images.json"))?);
    let dyn_store: Arc<dyn CatalogStore> = store.clone();
    let service = ImageSearchService::open(config(root), embedder.into_provider(), Some(dyn_store))?;
    Ok((service, store))
}
