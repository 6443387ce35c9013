use super::*;

use crate::ingest::{enumerate_images, run_batch};
use crate::storage::discard_catalog;

impl ImageSearchService {
    /// Discards the catalog and re-ingests every image under `directory`
    /// (recursively, sorted). Store records are left alone. Returns the
    /// number of images indexed.
    pub fn rebuild(&self, directory: &Path) -> usize {
        let _update_guard = self.update_gate.lock();
        let paths = self.list_images(directory);
        {
            let mut catalog = self.catalog.write();
            catalog.clear();
            self.unpersisted.store(0, Ordering::Relaxed);
        }
        let (indexed, failed) = self.ingest_all(&paths, CommitMode::Rebuild);
        self.finish_batch();
        self.stats.record_rebuild(indexed);
        tracing::info!(
            dir = %directory.display(),
            indexed,
            failed,
            "rebuilt image index"
        );
        indexed
    }

    /// Rebuild from the configured upload directory.
    pub fn rebuild_uploads(&self) -> usize {
        self.rebuild(&self.cfg.upload_dir)
    }

    /// Appends every image under `directory` to the catalog and the record
    /// store. Returns `(processed, failed)`.
    pub fn batch_import(&self, directory: &Path) -> (usize, usize) {
        let _update_guard = self.update_gate.lock();
        let paths = self.list_images(directory);
        let (processed, failed) = self.ingest_all(&paths, CommitMode::Import);
        self.finish_batch();
        tracing::info!(
            dir = %directory.display(),
            processed,
            failed,
            "imported images"
        );
        (processed, failed)
    }

    fn list_images(&self, directory: &Path) -> Vec<PathBuf> {
        match enumerate_images(directory, true, &self.cfg.image_extensions) {
            Ok(paths) => paths,
            Err(err) => {
                tracing::warn!(
                    dir = %directory.display(),
                    error = %format!("{err:#}"),
                    "cannot enumerate images"
                );
                Vec::new()
            }
        }
    }

    /// Prepares `paths` on the worker pool and commits them in order without
    /// persisting; `finish_batch` writes the result once. Callers hold
    /// `update_gate`.
    fn ingest_all(&self, paths: &[PathBuf], mode: CommitMode) -> (usize, usize) {
        let ctx = self.prepare_context();
        let mut processed = 0usize;
        let mut failed = 0usize;
        let ran = run_batch(
            self.cfg.workers,
            paths,
            |path| prepare(&ctx, path),
            |path, prepared| {
                let committed = prepared
                    .inspect_err(|_| self.stats.inc_ingest_failures())
                    .and_then(|p| self.commit(p, mode));
                match committed {
                    Ok(_) => processed += 1,
                    Err(err) => {
                        tracing::info!(path = %path.display(), error = %err, "image not ingested");
                        failed += 1;
                    }
                }
            },
        );
        if let Err(err) = ran {
            tracing::warn!(error = %format!("{err:#}"), "ingest batch aborted");
            failed = paths.len() - processed;
        }
        (processed, failed)
    }

    /// End-of-batch persistence. An empty catalog has nothing to save, so
    /// any older generation is discarded instead of being reloaded later.
    fn finish_batch(&self) {
        let catalog = self.catalog.read();
        if !catalog.is_empty() {
            self.persist_locked(&catalog);
            return;
        }
        let _persist_guard = self.persist_gate.lock();
        if let Err(err) = discard_catalog(&self.cfg.index_dir) {
            self.stats.inc_persist_errors();
            tracing::warn!(error = %format!("{err:#}"), "failed to discard persisted index");
        }
    }
}
