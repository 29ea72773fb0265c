use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Tracks pattern cache and document loading metrics
#[derive(Debug, Clone)]
pub struct ScanMetrics {
    // Pattern cache metrics
    cache_hits: Arc<AtomicU64>,
    cache_misses: Arc<AtomicU64>,

    // Document loading metrics
    documents_read: Arc<AtomicU64>,
    documents_mapped: Arc<AtomicU64>,
    bytes_loaded: Arc<AtomicU64>,
}

impl ScanMetrics {
    /// Creates a new ScanMetrics instance
    pub fn new() -> Self {
        Self {
            cache_hits: Arc::new(AtomicU64::new(0)),
            cache_misses: Arc::new(AtomicU64::new(0)),
            documents_read: Arc::new(AtomicU64::new(0)),
            documents_mapped: Arc::new(AtomicU64::new(0)),
            bytes_loaded: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records a pattern cache lookup
    pub fn record_cache_operation(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a loaded host document
    pub fn record_document(&self, bytes: u64, mapped: bool) {
        if mapped {
            self.documents_mapped.fetch_add(1, Ordering::Relaxed);
        } else {
            self.documents_read.fetch_add(1, Ordering::Relaxed);
        }
        let total = self.bytes_loaded.fetch_add(bytes, Ordering::Relaxed) + bytes;
        debug!("Document loaded: {} bytes, total: {} bytes", bytes, total);
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Gets current statistics
    pub fn get_stats(&self) -> ScanStats {
        ScanStats {
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            documents_read: self.documents_read.load(Ordering::Relaxed),
            documents_mapped: self.documents_mapped.load(Ordering::Relaxed),
            bytes_loaded: self.bytes_loaded.load(Ordering::Relaxed),
        }
    }

    /// Logs pattern cache statistics
    pub fn log_cache_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Pattern cache hits/misses: {}/{}",
            stats.cache_hits, stats.cache_misses
        );
    }

    /// Logs document loading statistics
    pub fn log_document_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Documents loaded (read/mapped): {}/{}, bytes loaded: {}",
            stats.documents_read, stats.documents_mapped, stats.bytes_loaded
        );
    }
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of [`ScanMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub documents_read: u64,
    pub documents_mapped: u64,
    pub bytes_loaded: u64,
}
