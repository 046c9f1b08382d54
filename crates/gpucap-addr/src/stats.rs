use std::sync::atomic::{AtomicU64, Ordering};

/// Lookup/eviction counters for an [`crate::AddressRegistry`].
///
/// Updated with relaxed atomics from whichever interception thread performs the operation, so a
/// snapshot is a best-effort view rather than a consistent cut.
#[derive(Debug, Default)]
pub struct RegistryStats {
    resolve_hits: AtomicU64,
    resolve_misses: AtomicU64,
    evictions: AtomicU64,
    cascaded_releases: AtomicU64,
}

impl RegistryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_resolve_hits(&self) {
        self.resolve_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resolve_misses(&self) {
        self.resolve_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_cascaded_releases(&self, count: u64) {
        self.cascaded_releases.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            resolve_hits: self.resolve_hits.load(Ordering::Relaxed),
            resolve_misses: self.resolve_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            cascaded_releases: self.cascaded_releases.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStatsSnapshot {
    pub resolve_hits: u64,
    pub resolve_misses: u64,
    /// Stale ranges dropped because a new registration overlapped them.
    pub evictions: u64,
    /// Placed resources dropped together with their heap.
    pub cascaded_releases: u64,
}
