//! The index service: one object owning the aligned triple, the provider
//! and the optional record store.
//!
//! Lock order is `update_gate` → `catalog` → `persist_gate`. Writers append
//! under the catalog write lock, then downgrade to a read lock to persist so
//! searches keep running while the generation is written.

mod batch;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::cluster::{clamp_requested, Clusterer};
use crate::config::{validate_config, IndexConfig};
use crate::embed::{EmbeddingProvider, ProviderSlot};
use crate::ingest::{prepare, ImageSource, IngestError, IngestedImage, PrepareContext, Prepared};
use crate::search::{resolve_source, SearchEngine, SearchRequest};
use crate::stats::{ServiceStats, ServiceStatsInner};
use crate::storage::{load_catalog, save_catalog, LoadOutcome};
use crate::store::CatalogStore;
use crate::types::{ClusterGroup, IndexEntry, SearchHit};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub provider_available: bool,
    pub dim: usize,
    pub indexed_images: usize,
    /// `None` when no record store is attached or it could not be read.
    pub records: Option<usize>,
    pub index_dir: PathBuf,
    pub stats: ServiceStats,
}

/// How a prepared image is applied. Single ingests persist on the
/// `persist_every` cadence; batches persist once when they finish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CommitMode {
    Single,
    Import,
    Rebuild,
}

impl CommitMode {
    fn records_metadata(self) -> bool {
        !matches!(self, CommitMode::Rebuild)
    }

    fn persists_per_append(self) -> bool {
        matches!(self, CommitMode::Single)
    }
}

pub struct ImageSearchService {
    cfg: IndexConfig,
    catalog: RwLock<Catalog>,
    provider: ProviderSlot,
    store: Option<Arc<dyn CatalogStore>>,
    update_gate: Mutex<()>,
    persist_gate: Mutex<()>,
    unpersisted: AtomicUsize,
    stats: ServiceStatsInner,
}

impl ImageSearchService {
    /// Opens the service, loading the persisted catalog when there is one.
    /// A corrupt or mismatched index is replaced by an empty catalog.
    pub fn open(
        cfg: IndexConfig,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        store: Option<Arc<dyn CatalogStore>>,
    ) -> anyhow::Result<Self> {
        validate_config(&cfg)?;
        let stats = ServiceStatsInner::default();
        let catalog = match load_catalog(&cfg.index_dir, cfg.dim) {
            Ok(LoadOutcome::Loaded(catalog)) => {
                tracing::info!(
                    images = catalog.len(),
                    dir = %cfg.index_dir.display(),
                    "loaded image index"
                );
                catalog
            }
            Ok(LoadOutcome::Fresh) => {
                tracing::info!(dir = %cfg.index_dir.display(), "no persisted index; starting empty");
                Catalog::new(cfg.dim)
            }
            Err(err) => {
                tracing::warn!(
                    dir = %cfg.index_dir.display(),
                    error = %format!("{err:#}"),
                    "failed to load image index; starting empty"
                );
                stats.inc_load_fallbacks();
                Catalog::new(cfg.dim)
            }
        };
        let provider = ProviderSlot::new(provider, cfg.dim);
        Ok(Self {
            cfg,
            catalog: RwLock::new(catalog),
            provider,
            store,
            update_gate: Mutex::new(()),
            persist_gate: Mutex::new(()),
            unpersisted: AtomicUsize::new(0),
            stats,
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.cfg
    }

    pub fn store(&self) -> Option<&Arc<dyn CatalogStore>> {
        self.store.as_ref()
    }

    pub fn len(&self) -> usize {
        self.catalog.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<IndexEntry> {
        self.catalog.read().entries().to_vec()
    }

    pub fn search(&self, req: &SearchRequest) -> Vec<SearchHit> {
        self.stats.inc_searches();
        let catalog = self.catalog.read();
        SearchEngine::new(&catalog, &self.provider, &self.cfg.media_root).search(req)
    }

    /// Groups the catalog; `requested_k` is clamped to `[2, 10]` first.
    pub fn clusters(&self, requested_k: usize) -> Vec<ClusterGroup> {
        let catalog = self.catalog.read();
        Clusterer::new(&catalog, &self.provider, &self.cfg.media_root)
            .with_seed(self.cfg.cluster_seed)
            .with_max_iters(self.cfg.kmeans_max_iters)
            .cluster(clamp_requested(requested_k))
    }

    /// Ingests a file in place and records it in the store.
    pub fn ingest_path(&self, path: &Path) -> Result<IngestedImage, IngestError> {
        let prepared = self.prepare_one(path)?;
        let _update_guard = self.update_gate.lock();
        self.commit(prepared, CommitMode::Single)
    }

    /// Copies `source` into the upload directory and ingests the copy. The
    /// copy is removed again when the ingest fails.
    pub fn ingest_upload(&self, source: ImageSource) -> Result<IngestedImage, IngestError> {
        let materialized = source
            .materialize(&self.cfg.upload_dir)
            .inspect_err(|_| self.stats.inc_ingest_failures())?;
        match self.ingest_path(&materialized.path) {
            Ok(ingested) => Ok(ingested),
            Err(err) => {
                tracing::info!(
                    path = %materialized.path.display(),
                    error = %err,
                    "upload rejected"
                );
                materialized.discard();
                Err(err)
            }
        }
    }

    /// Deletes a record, and its file when that lives in the upload
    /// directory, then rebuilds the index from the upload directory.
    /// Returns `false` when there is no such record.
    pub fn remove(&self, record_id: u64) -> anyhow::Result<bool> {
        let Some(store) = self.store.as_ref() else {
            anyhow::bail!("no record store attached");
        };
        let Some(record) = store.delete(record_id)? else {
            return Ok(false);
        };
        let file = resolve_source(&self.cfg.media_root, &record.path);
        match self.uploaded_file(&file) {
            Some(managed) => {
                if let Err(err) = std::fs::remove_file(&managed) {
                    tracing::warn!(path = %managed.display(), error = %err, "failed to delete image file");
                }
            }
            None => {
                tracing::info!(
                    path = %file.display(),
                    "image file is missing or outside the upload directory; left in place"
                );
            }
        }
        let indexed = self.rebuild(&self.cfg.upload_dir);
        tracing::info!(record_id, indexed, "removed image and rebuilt index");
        Ok(true)
    }

    /// Persists the current catalog. Returns `false` when it is empty.
    pub fn save(&self) -> anyhow::Result<bool> {
        let catalog = self.catalog.read();
        let _persist_guard = self.persist_gate.lock();
        let saved = save_catalog(&self.cfg.index_dir, &catalog)?;
        self.unpersisted.store(0, Ordering::Relaxed);
        Ok(saved)
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats
            .snapshot(self.unpersisted.load(Ordering::Relaxed) as u64)
    }

    pub fn status(&self) -> ServiceStatus {
        let records = self.store.as_ref().and_then(|s| match s.list_all() {
            Ok(all) => Some(all.len()),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read record store");
                None
            }
        });
        ServiceStatus {
            provider_available: self.provider.is_available(),
            dim: self.cfg.dim,
            indexed_images: self.len(),
            records,
            index_dir: self.cfg.index_dir.clone(),
            stats: self.stats(),
        }
    }

    /// Canonical form of `path` when it is an existing file under the
    /// upload directory.
    fn uploaded_file(&self, path: &Path) -> Option<PathBuf> {
        let file = path.canonicalize().ok()?;
        let uploads = self.cfg.upload_dir.canonicalize().ok()?;
        (file.starts_with(&uploads) && file.is_file()).then_some(file)
    }

    fn prepare_context(&self) -> PrepareContext<'_> {
        PrepareContext {
            provider: &self.provider,
            media_root: &self.cfg.media_root,
            max_image_side: self.cfg.max_image_side,
        }
    }

    fn prepare_one(&self, path: &Path) -> Result<Prepared, IngestError> {
        prepare(&self.prepare_context(), path).inspect_err(|err| {
            tracing::info!(path = %path.display(), error = %err, "image not ingested");
            self.stats.inc_ingest_failures();
        })
    }

    /// Appends a prepared image to the triple and, unless rebuilding, to the
    /// record store. Callers hold `update_gate`.
    fn commit(
        &self,
        prepared: Prepared,
        mode: CommitMode,
    ) -> Result<IngestedImage, IngestError> {
        let mut catalog = self.catalog.write();
        let entry = match catalog.append(prepared.stored_path.as_str(), &prepared.embedding) {
            Ok(entry) => entry,
            Err(err) => {
                self.stats.inc_ingest_failures();
                return Err(IngestError::Index(err));
            }
        };
        if let Err(err) = catalog.check_aligned() {
            tracing::error!(error = %format!("{err:#}"), "catalog lost alignment; resetting");
            catalog.clear();
            self.stats.inc_ingest_failures();
            return Err(IngestError::Index(err));
        }
        self.stats.inc_ingested();
        let appended = self.unpersisted.fetch_add(1, Ordering::Relaxed) + 1;
        if mode.persists_per_append() && appended >= self.cfg.persist_every {
            let catalog = RwLockWriteGuard::downgrade(catalog);
            self.persist_locked(&catalog);
        } else {
            drop(catalog);
        }
        tracing::debug!(id = entry.id, path = %entry.path, "indexed image");

        let record_id = if mode.records_metadata() {
            self.record(&entry.path, &prepared)
        } else {
            None
        };
        Ok(IngestedImage {
            id: entry.id,
            path: entry.path,
            metadata: prepared.metadata,
            record_id,
        })
    }

    fn record(&self, path: &str, prepared: &Prepared) -> Option<u64> {
        let store = self.store.as_ref()?;
        match store.add(path, prepared.metadata.clone()) {
            Ok(record) => Some(record.id),
            Err(err) => {
                tracing::warn!(path, error = %err, "indexed image but failed to add record");
                None
            }
        }
    }

    /// Saves `catalog`; the caller holds a read (or downgraded) lock on it.
    fn persist_locked(&self, catalog: &Catalog) {
        let _persist_guard = self.persist_gate.lock();
        match save_catalog(&self.cfg.index_dir, catalog) {
            Ok(_) => self.unpersisted.store(0, Ordering::Relaxed),
            Err(err) => {
                self.stats.inc_persist_errors();
                tracing::warn!(
                    dir = %self.cfg.index_dir.display(),
                    error = %format!("{err:#}"),
                    "failed to persist image index"
                );
            }
        }
    }
}

impl std::fmt::Debug for ImageSearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSearchService")
            .field("index_dir", &self.cfg.index_dir)
            .field("images", &self.len())
            .field("provider", &self.provider)
            .finish()
    }
}
