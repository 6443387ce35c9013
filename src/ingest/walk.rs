use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

/// Case-insensitive match of the file extension against `extensions`
/// (lowercase, no dot).
pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| extensions.iter().any(|x| *x == e))
}

/// Image files under `root`, sorted by path. Hidden entries (leading `.`)
/// are skipped, which also keeps in-flight resize temporaries out.
pub fn enumerate_images(
    root: &Path,
    recursive: bool,
    extensions: &[String],
) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let listing =
            fs::read_dir(&dir).with_context(|| format!("list image dir {}", dir.display()))?;
        for entry in listing {
            let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| format!("stat {}", path.display()))?;
            if file_type.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else if has_image_extension(&path, extensions) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}
