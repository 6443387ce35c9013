use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub total_ingested: u64,
    pub ingest_failures: u64,
    pub total_searches: u64,
    pub rebuilds: u64,
    pub last_rebuild_images: u64,
    pub persist_errors: u64,
    pub load_fallbacks: u64,
    pub pending_persist: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ServiceStatsInner {
    total_ingested: AtomicU64,
    ingest_failures: AtomicU64,
    total_searches: AtomicU64,
    rebuilds: AtomicU64,
    last_rebuild_images: AtomicU64,
    persist_errors: AtomicU64,
    load_fallbacks: AtomicU64,
}

impl ServiceStatsInner {
    pub(crate) fn snapshot(&self, pending_persist: u64) -> ServiceStats {
        ServiceStats {
            total_ingested: self.total_ingested.load(Ordering::Relaxed),
            ingest_failures: self.ingest_failures.load(Ordering::Relaxed),
            total_searches: self.total_searches.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            last_rebuild_images: self.last_rebuild_images.load(Ordering::Relaxed),
            persist_errors: self.persist_errors.load(Ordering::Relaxed),
            load_fallbacks: self.load_fallbacks.load(Ordering::Relaxed),
            pending_persist,
        }
    }

    pub(crate) fn inc_ingested(&self) {
        self.total_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_ingest_failures(&self) {
        self.ingest_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_searches(&self) {
        self.total_searches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_persist_errors(&self) {
        self.persist_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_load_fallbacks(&self) {
        self.load_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rebuild(&self, images: usize) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        self.last_rebuild_images.store(images as u64, Ordering::Relaxed);
    }
}
