//! User-facing catalog records: favorites, tags and image metadata.
//!
//! The vector index only needs `{id, path}`; everything a user edits lives
//! here and is reached through [`CatalogStore`].

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: u64,
    pub path: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: ImageMetadata,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("image record {0} not found")]
    NotFound(u64),
    #[error("record store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("record store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait CatalogStore: Send + Sync {
    fn add(&self, path: &str, metadata: ImageMetadata) -> StoreResult<ImageRecord>;
    fn get(&self, id: u64) -> StoreResult<Option<ImageRecord>>;
    /// Returns the removed record, or `None` when `id` was unknown.
    fn delete(&self, id: u64) -> StoreResult<Option<ImageRecord>>;
    fn list_all(&self) -> StoreResult<Vec<ImageRecord>>;
    fn list_favorites(&self) -> StoreResult<Vec<ImageRecord>>;
    /// Flips the favorite flag and returns the new value.
    fn toggle_favorite(&self, id: u64) -> StoreResult<bool>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    /// High-water mark; ids handed out stay retired after a delete.
    next_id: u64,
    records: Vec<ImageRecord>,
}

impl StoreFile {
    fn find_mut(&mut self, id: u64) -> Option<&mut ImageRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }
}

/// Records kept in one JSON document, rewritten atomically on every change.
pub struct JsonCatalogStore {
    path: PathBuf,
    state: Mutex<StoreFile>,
}

impl JsonCatalogStore {
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let mut state: StoreFile = match fs::read(&path) {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => StoreFile::default(),
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreFile::default(),
            Err(err) => return Err(err.into()),
        };
        let floor = state.records.iter().map(|r| r.id + 1).max().unwrap_or(1);
        state.next_id = state.next_id.max(floor);
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn write_all(&self, state: &StoreFile) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let encoded = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CatalogStore for JsonCatalogStore {
    fn add(&self, path: &str, metadata: ImageMetadata) -> StoreResult<ImageRecord> {
        let mut state = self.state.lock();
        let record = ImageRecord {
            id: state.next_id,
            path: path.to_string(),
            uploaded_at: Utc::now(),
            favorite: false,
            tags: Vec::new(),
            description: None,
            metadata,
        };
        state.records.push(record.clone());
        state.next_id += 1;
        if let Err(err) = self.write_all(&state) {
            state.records.pop();
            state.next_id -= 1;
            return Err(err);
        }
        Ok(record)
    }

    fn get(&self, id: u64) -> StoreResult<Option<ImageRecord>> {
        Ok(self.state.lock().records.iter().find(|r| r.id == id).cloned())
    }

    fn delete(&self, id: u64) -> StoreResult<Option<ImageRecord>> {
        let mut state = self.state.lock();
        let Some(idx) = state.records.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        let removed = state.records.remove(idx);
        if let Err(err) = self.write_all(&state) {
            state.records.insert(idx, removed);
            return Err(err);
        }
        Ok(Some(removed))
    }

    fn list_all(&self) -> StoreResult<Vec<ImageRecord>> {
        Ok(self.state.lock().records.clone())
    }

    fn list_favorites(&self) -> StoreResult<Vec<ImageRecord>> {
        Ok(self
            .state
            .lock()
            .records
            .iter()
            .filter(|r| r.favorite)
            .cloned()
            .collect())
    }

    fn toggle_favorite(&self, id: u64) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let record = state.find_mut(id).ok_or(StoreError::NotFound(id))?;
        record.favorite = !record.favorite;
        let now = record.favorite;
        if let Err(err) = self.write_all(&state) {
            if let Some(r) = state.find_mut(id) {
                r.favorite = !now;
            }
            return Err(err);
        }
        Ok(now)
    }
}
