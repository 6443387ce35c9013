use std::path::Path;

use image::imageops::FilterType;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::EmbeddingProvider;
use crate::linalg::{dot, l2_normalized};

const THUMB_SIDE: u32 = 16;
const HIST_BINS_PER_CHANNEL: usize = 4;
const HIST_BINS: usize = HIST_BINS_PER_CHANNEL * HIST_BINS_PER_CHANNEL * HIST_BINS_PER_CHANNEL;
const IMAGE_FEATURES: usize = (THUMB_SIDE * THUMB_SIDE * 3) as usize + HIST_BINS;

#[derive(Clone, Debug)]
pub struct FeatureEmbedderConfig {
    pub dim: usize,
    pub seed: u64,
}

impl Default for FeatureEmbedderConfig {
    fn default() -> Self {
        Self {
            dim: 512,
            seed: 0x1A6E_5EED,
        }
    }
}

/// Deterministic, model-free embedder.
///
/// Images: a 16x16 RGB thumbnail plus a 4x4x4 colour histogram, projected
/// to `dim` through a seeded random matrix. Text: signed feature hashing of
/// lowercase tokens and token bigrams. The two spaces are not aligned the
/// way a learned image/text model's would be; this exists so the index can
/// run end-to-end without one.
pub struct FeatureEmbedder {
    cfg: FeatureEmbedderConfig,
    projection: Vec<f32>,
}

impl FeatureEmbedder {
    pub fn new(cfg: FeatureEmbedderConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let projection = (0..cfg.dim * IMAGE_FEATURES)
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect();
        Self { cfg, projection }
    }

    fn image_features(path: &Path) -> Option<Vec<f32>> {
        let img = image::open(path).ok()?;
        let rgb = img
            .resize_exact(THUMB_SIDE, THUMB_SIDE, FilterType::Triangle)
            .to_rgb8();
        let mut features = Vec::with_capacity(IMAGE_FEATURES);
        let mut hist = [0.0f32; HIST_BINS];
        for pixel in rgb.pixels() {
            let mut bin = 0usize;
            for channel in pixel.0 {
                features.push(channel as f32 / 255.0 - 0.5);
                bin = bin * HIST_BINS_PER_CHANNEL
                    + (channel as usize * HIST_BINS_PER_CHANNEL) / 256;
            }
            hist[bin] += 1.0;
        }
        let pixels = (THUMB_SIDE * THUMB_SIDE) as f32;
        features.extend(hist.iter().map(|c| c / pixels));
        Some(features)
    }
}

impl EmbeddingProvider for FeatureEmbedder {
    fn dim(&self) -> usize {
        self.cfg.dim
    }

    fn embed_image(&self, path: &Path) -> Option<Vec<f32>> {
        let features = Self::image_features(path)?;
        let out = self
            .projection
            .chunks_exact(IMAGE_FEATURES)
            .map(|row| dot(row, &features))
            .collect();
        l2_normalized(out)
    }

    fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();
        if tokens.is_empty() || self.cfg.dim == 0 {
            return None;
        }
        let mut out = vec![0.0f32; self.cfg.dim];
        let mut bump = |feature: &str, weight: f32| {
            let h = fnv1a(feature.as_bytes());
            let bucket = (h % self.cfg.dim as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            out[bucket] += sign * weight;
        };
        for token in &tokens {
            bump(token, 1.0);
        }
        for pair in tokens.windows(2) {
            bump(&format!("{} {}", pair[0], pair[1]), 0.5);
        }
        l2_normalized(out)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h = 0xcbf2_9ce4_8422_2325u64;
    for b in bytes {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}
