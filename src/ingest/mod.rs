//! Turning image files into catalog rows.
//!
//! [`prepare`] does everything that can run in parallel (decode, downscale,
//! embed) and never touches the catalog; the service applies the prepared
//! rows on a single writer thread.

mod pool;
mod source;
mod walk;

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};

use crate::embed::ProviderSlot;
use crate::store::ImageMetadata;

pub(crate) use pool::run_batch;
pub use source::{sanitize_file_name, ImageSource, MaterializedSource};
pub use walk::{enumerate_images, has_image_extension};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("image file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode image {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no embedding produced for {}", .0.display())]
    Embedding(PathBuf),
    #[error("unusable upload file name {0:?}")]
    InvalidName(String),
    #[error("index append failed: {0:#}")]
    Index(anyhow::Error),
}

impl IngestError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of a successful ingest.
#[derive(Clone, Debug, PartialEq)]
pub struct IngestedImage {
    pub id: u64,
    pub path: String,
    pub metadata: ImageMetadata,
    /// Set when a record store row was written for the image.
    pub record_id: Option<u64>,
}

/// An image that is ready to be appended to the catalog.
#[derive(Debug)]
pub struct Prepared {
    pub stored_path: String,
    pub metadata: ImageMetadata,
    pub embedding: Vec<f32>,
}

#[derive(Clone, Copy, Debug)]
pub struct PrepareContext<'a> {
    pub provider: &'a ProviderSlot,
    pub media_root: &'a Path,
    pub max_image_side: u32,
}

pub fn prepare(ctx: &PrepareContext<'_>, path: &Path) -> Result<Prepared, IngestError> {
    if !path.is_file() {
        return Err(IngestError::NotFound(path.to_path_buf()));
    }
    let metadata = normalize_image(path, ctx.max_image_side)?;
    let embedding = ctx
        .provider
        .embed_image(path)
        .ok_or_else(|| IngestError::Embedding(path.to_path_buf()))?;
    Ok(Prepared {
        stored_path: catalog_path(ctx.media_root, path),
        metadata,
        embedding,
    })
}

/// Decodes `path` and, when either side exceeds `max_side`, rewrites the
/// file downscaled to fit (aspect ratio kept). Returns the final geometry.
pub fn normalize_image(path: &Path, max_side: u32) -> Result<ImageMetadata, IngestError> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| IngestError::io(path, e))?;
    let format = reader.format();
    let img = reader.decode().map_err(|source| IngestError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let (width, height) = (img.width(), img.height());
    if width <= max_side && height <= max_side {
        return Ok(metadata_for(width, height, format));
    }

    let resized = image::DynamicImage::ImageRgb8(
        img.resize(max_side, max_side, FilterType::Lanczos3)
            .to_rgb8(),
    );
    let target_format = format
        .or_else(|| ImageFormat::from_path(path).ok())
        .unwrap_or(ImageFormat::Png);
    let tmp = sibling_tmp(path);
    resized
        .save_with_format(&tmp, target_format)
        .map_err(|source| IngestError::Decode {
            path: path.to_path_buf(),
            source,
        })
        .and_then(|_| fs::rename(&tmp, path).map_err(|e| IngestError::io(path, e)))
        .inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })?;
    tracing::debug!(
        path = %path.display(),
        from = ?(width, height),
        to = ?(resized.width(), resized.height()),
        "downscaled oversized image"
    );
    Ok(metadata_for(resized.width(), resized.height(), format))
}

/// Catalog path for `file`: relative to `media_root` with `/` separators
/// when the file lives under it, otherwise the absolute path.
pub fn catalog_path(media_root: &Path, file: &Path) -> String {
    let file = fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf());
    if let Ok(root) = fs::canonicalize(media_root) {
        if let Ok(rel) = file.strip_prefix(&root) {
            return rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
        }
    }
    file.to_string_lossy().into_owned()
}

fn metadata_for(width: u32, height: u32, format: Option<ImageFormat>) -> ImageMetadata {
    ImageMetadata {
        width,
        height,
        format: format.map(|f| format!("{f:?}").to_uppercase()),
    }
}

fn sibling_tmp(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.resize.tmp"))
}
