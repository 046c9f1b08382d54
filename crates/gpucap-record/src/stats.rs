use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Telemetry counters for the recording scheduler.
///
/// `enqueued` is bumped by producer threads; everything else by the consumer thread. All updates
/// are relaxed, so a snapshot taken while recording is in progress is approximate.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
    frames: AtomicU64,
    peak_pending: AtomicU64,
    stranded: AtomicU64,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_frames(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_pending(&self, pending: usize) {
        self.peak_pending
            .fetch_max(pending as u64, Ordering::Relaxed);
    }

    pub fn add_stranded(&self, count: u64) {
        self.stranded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            peak_pending: self.peak_pending.load(Ordering::Relaxed),
            stranded: self.stranded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatsSnapshot {
    /// Messages (record/skip/frame end) accepted from producers.
    pub enqueued: u64,
    pub delivered: u64,
    /// Distinct keys declared irrelevant.
    pub skipped: u64,
    /// Records discarded: duplicate, already-passed or skipped keys.
    pub dropped: u64,
    pub frames: u64,
    pub peak_pending: u64,
    /// Records still buffered behind a gap when the scheduler shut down.
    pub stranded: u64,
}
