use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::IngestError;

const MAX_NAME_ATTEMPTS: u32 = 64;

/// Where an uploaded image comes from.
#[derive(Clone, Debug)]
pub enum ImageSource {
    /// An existing file; it is copied into the upload directory.
    Path(PathBuf),
    /// Raw bytes with the client-supplied file name.
    Bytes { file_name: String, data: Vec<u8> },
}

/// A file written into the upload directory on behalf of an ingest.
#[derive(Debug)]
pub struct MaterializedSource {
    pub path: PathBuf,
}

impl MaterializedSource {
    /// Removes the file after a failed ingest.
    pub fn discard(self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove rejected upload");
            }
        }
    }
}

impl ImageSource {
    pub fn file_name(&self) -> String {
        match self {
            Self::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Self::Bytes { file_name, .. } => file_name.clone(),
        }
    }

    /// Writes the image under `upload_dir` with a fresh, timestamped name.
    pub fn materialize(&self, upload_dir: &Path) -> Result<MaterializedSource, IngestError> {
        let raw_name = self.file_name();
        let name = sanitize_file_name(&raw_name).ok_or(IngestError::InvalidName(raw_name))?;
        fs::create_dir_all(upload_dir).map_err(|e| IngestError::io(upload_dir, e))?;

        let data = match self {
            Self::Path(path) => fs::read(path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => IngestError::NotFound(path.clone()),
                _ => IngestError::io(path, e),
            })?,
            Self::Bytes { data, .. } => data.clone(),
        };

        let stamp = Utc::now().timestamp();
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = if attempt == 0 {
                format!("{stamp}_{name}")
            } else {
                format!("{stamp}_{attempt}_{name}")
            };
            let path = upload_dir.join(candidate);
            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => file,
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(IngestError::io(&path, err)),
            };
            let written = file.write_all(&data).and_then(|_| file.sync_all());
            if let Err(err) = written {
                drop(file);
                let _ = fs::remove_file(&path);
                return Err(IngestError::io(&path, err));
            }
            return Ok(MaterializedSource { path });
        }
        Err(IngestError::io(
            upload_dir,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("no free upload name for {name}"),
            ),
        ))
    }
}

/// Keeps the final path component and only `[A-Za-z0-9._- ]` characters.
/// Returns `None` when nothing usable is left.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = last
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}
