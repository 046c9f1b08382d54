//! Keyed reordering buffer.
//!
//! [`OrderingState`] is the single-threaded core of the recording scheduler. It tracks `next_key`,
//! the one key that may be delivered right now, and three side structures:
//! - a min-heap of commands that arrived before their turn
//! - merged inclusive ranges of keys that will never be recorded (`skip`)
//! - keys after whose delivery a frame boundary must fire
//!
//! `next_key` only grows. Everything below it has either been delivered or skipped, so anything
//! that later arrives for such a key is dropped.
//!
//! Keys live in `0..u64::MAX`: [`KEY_LIMIT`] itself is never delivered, so `next_key` can reach it
//! without overflowing.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::{CommandSink, SchedulerStats};

/// Exclusive upper bound of the key space.
pub const KEY_LIMIT: u64 = u64::MAX;

struct PendingToken<P> {
    key: u64,
    payload: P,
}

impl<P> PartialEq for PendingToken<P> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<P> Eq for PendingToken<P> {}

impl<P> PartialOrd for PendingToken<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for PendingToken<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

pub struct OrderingState<P> {
    next_key: u64,
    pending: BinaryHeap<Reverse<PendingToken<P>>>,
    /// start -> end, inclusive, non-adjacent, all above `next_key`.
    skips: BTreeMap<u64, u64>,
    frame_boundaries: BTreeSet<u64>,
    pending_warn_threshold: usize,
    backlog_warned: bool,
    stats: Arc<SchedulerStats>,
}

impl<P> Default for OrderingState<P> {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<P> OrderingState<P> {
    pub fn new(first_key: u64) -> Self {
        Self::with_stats(first_key, Arc::new(SchedulerStats::new()))
    }

    pub fn with_stats(first_key: u64, stats: Arc<SchedulerStats>) -> Self {
        Self {
            next_key: first_key,
            pending: BinaryHeap::new(),
            skips: BTreeMap::new(),
            frame_boundaries: BTreeSet::new(),
            pending_warn_threshold: usize::MAX,
            backlog_warned: false,
            stats,
        }
    }

    /// Warn once whenever the number of buffered commands reaches `threshold`.
    pub fn set_pending_warn_threshold(&mut self, threshold: usize) {
        self.pending_warn_threshold = threshold.max(1);
    }

    pub fn next_key(&self) -> u64 {
        self.next_key
    }

    /// Number of commands waiting for an earlier key.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Current merged skip ranges, inclusive.
    pub fn skip_ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.skips.iter().map(|(&start, &end)| (start, end))
    }

    pub fn pending_frame_boundaries(&self) -> impl Iterator<Item = u64> + '_ {
        self.frame_boundaries.iter().copied()
    }

    pub fn stats(&self) -> &Arc<SchedulerStats> {
        &self.stats
    }

    fn is_skipped(&self, key: u64) -> bool {
        self.skips
            .range(..=key)
            .next_back()
            .is_some_and(|(_, &end)| key <= end)
    }

    /// Deliver `payload` now if `key` is next, otherwise buffer it until its turn.
    pub fn record<S>(&mut self, key: u64, payload: P, sink: &mut S)
    where
        S: CommandSink<P> + ?Sized,
    {
        if key == KEY_LIMIT {
            warn!(key, "dropping record outside the key space");
            self.stats.inc_dropped();
            return;
        }
        if key < self.next_key {
            warn!(
                key,
                next_key = self.next_key,
                "dropping record for a key that was already delivered or skipped"
            );
            self.stats.inc_dropped();
            return;
        }

        if key == self.next_key {
            self.deliver(key, payload, sink);
            self.advance(sink);
            return;
        }

        if self.is_skipped(key) {
            trace!(key, "dropping record for skipped key");
            self.stats.inc_dropped();
            return;
        }

        self.pending.push(Reverse(PendingToken { key, payload }));
        let pending = self.pending.len();
        self.stats.observe_pending(pending);
        trace!(key, next_key = self.next_key, pending, "buffered out-of-order record");
        if pending >= self.pending_warn_threshold && !self.backlog_warned {
            self.backlog_warned = true;
            warn!(
                next_key = self.next_key,
                pending, "recording backlog is growing; a key may never have been recorded or skipped"
            );
        }
    }

    /// Declare that `key` will never be recorded.
    ///
    /// Skipping the next key lets everything queued behind it through. A record already buffered
    /// for a skipped key is cancelled.
    pub fn skip<S>(&mut self, key: u64, sink: &mut S)
    where
        S: CommandSink<P> + ?Sized,
    {
        if key == KEY_LIMIT {
            warn!(key, "ignoring skip outside the key space");
            return;
        }
        if key < self.next_key {
            trace!(key, next_key = self.next_key, "ignoring skip for a key already passed");
            return;
        }

        if key == self.next_key {
            self.stats.inc_skipped();
            self.fire_boundaries_in(key, key, sink);
            self.advance(sink);
            return;
        }

        if self.is_skipped(key) {
            return;
        }
        self.stats.inc_skipped();

        let mut start = key;
        let mut end = key;
        if let Some((&prev_start, &prev_end)) = self.skips.range(..key).next_back() {
            if prev_end.checked_add(1) == Some(key) {
                start = prev_start;
            }
        }
        if let Some(next_end) = key.checked_add(1).and_then(|k| self.skips.remove(&k)) {
            end = next_end;
        }
        self.skips.insert(start, end);
    }

    /// Fire a frame boundary once `key` has been delivered, or immediately if it already was.
    pub fn frame_end<S>(&mut self, key: u64, sink: &mut S)
    where
        S: CommandSink<P> + ?Sized,
    {
        if key == KEY_LIMIT {
            warn!(key, "ignoring frame end outside the key space");
        } else if key < self.next_key {
            self.stats.inc_frames();
            sink.on_frame_end();
        } else {
            self.frame_boundaries.insert(key);
        }
    }

    fn deliver<S>(&mut self, key: u64, payload: P, sink: &mut S)
    where
        S: CommandSink<P> + ?Sized,
    {
        sink.deliver(key, payload);
        self.stats.inc_delivered();
        if self.frame_boundaries.remove(&key) {
            self.stats.inc_frames();
            sink.on_frame_end();
        }
    }

    /// Boundaries registered on keys in `[start, end]` that will never be delivered.
    fn fire_boundaries_in<S>(&mut self, start: u64, end: u64, sink: &mut S)
    where
        S: CommandSink<P> + ?Sized,
    {
        let keys: Vec<u64> = self.frame_boundaries.range(start..=end).copied().collect();
        for key in keys {
            self.frame_boundaries.remove(&key);
            self.stats.inc_frames();
            sink.on_frame_end();
        }
    }

    /// Move past the key just consumed, crossing skip ranges and draining buffered records that
    /// became deliverable.
    fn advance<S>(&mut self, sink: &mut S)
    where
        S: CommandSink<P> + ?Sized,
    {
        self.next_key += 1;
        loop {
            if let Some(end) = self.skips.remove(&self.next_key) {
                self.fire_boundaries_in(self.next_key, end, sink);
                self.next_key = end + 1;
                continue;
            }

            let head = match self.pending.peek() {
                Some(Reverse(token)) => token.key,
                None => break,
            };
            if head > self.next_key {
                break;
            }
            let Some(Reverse(token)) = self.pending.pop() else {
                break;
            };
            if head < self.next_key {
                debug!(key = head, "discarding buffered record for a skipped or duplicate key");
                self.stats.inc_dropped();
                continue;
            }
            self.deliver(token.key, token.payload, sink);
            self.next_key += 1;
        }

        if self.pending.is_empty() {
            self.backlog_warned = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SinkEvent, VecSink};
    use pretty_assertions::assert_eq;

    fn cmd(key: u64, payload: &'static str) -> SinkEvent<&'static str> {
        SinkEvent::Command { key, payload }
    }

    #[test]
    fn in_order_records_are_delivered_immediately() {
        let mut state = OrderingState::new(1);
        let mut sink = VecSink::new();
        state.record(1, "a", &mut sink);
        state.record(2, "b", &mut sink);
        assert_eq!(sink.events, vec![cmd(1, "a"), cmd(2, "b")]);
        assert_eq!(state.next_key(), 3);
    }

    #[test]
    fn out_of_order_records_wait_for_the_gap() {
        let mut state = OrderingState::new(1);
        let mut sink = VecSink::new();
        state.record(3, "c", &mut sink);
        state.record(2, "b", &mut sink);
        assert!(sink.events.is_empty());
        assert_eq!(state.pending_len(), 2);

        state.record(1, "a", &mut sink);
        assert_eq!(sink.events, vec![cmd(1, "a"), cmd(2, "b"), cmd(3, "c")]);
        assert_eq!(state.pending_len(), 0);
        assert_eq!(state.next_key(), 4);
    }

    #[test]
    fn skipped_run_is_crossed() {
        let mut state = OrderingState::new(3);
        let mut sink = VecSink::new();
        state.skip(4, &mut sink);
        state.skip(5, &mut sink);
        state.skip(6, &mut sink);
        assert_eq!(state.skip_ranges().collect::<Vec<_>>(), vec![(4, 6)]);

        state.record(3, "A", &mut sink);
        state.record(7, "B", &mut sink);
        assert_eq!(sink.events, vec![cmd(3, "A"), cmd(7, "B")]);
        assert_eq!(state.skip_ranges().count(), 0);
    }

    #[test]
    fn skip_ranges_merge_with_both_neighbours() {
        let mut state: OrderingState<&str> = OrderingState::new(1);
        let mut sink: VecSink<&str> = VecSink::new();
        state.skip(10, &mut sink);
        state.skip(12, &mut sink);
        state.skip(5, &mut sink);
        assert_eq!(
            state.skip_ranges().collect::<Vec<_>>(),
            vec![(5, 5), (10, 10), (12, 12)]
        );

        state.skip(11, &mut sink);
        assert_eq!(state.skip_ranges().collect::<Vec<_>>(), vec![(5, 5), (10, 12)]);
        state.skip(9, &mut sink);
        state.skip(13, &mut sink);
        assert_eq!(state.skip_ranges().collect::<Vec<_>>(), vec![(5, 5), (9, 13)]);
        // Already covered.
        state.skip(11, &mut sink);
        assert_eq!(state.skip_ranges().collect::<Vec<_>>(), vec![(5, 5), (9, 13)]);
        assert_eq!(state.stats().snapshot().skipped, 6);
    }

    #[test]
    fn skipping_next_key_drains_buffer() {
        let mut state = OrderingState::new(1);
        let mut sink = VecSink::new();
        state.record(2, "b", &mut sink);
        state.skip(3, &mut sink);
        state.record(4, "d", &mut sink);
        state.skip(1, &mut sink);
        assert_eq!(sink.events, vec![cmd(2, "b"), cmd(4, "d")]);
        assert_eq!(state.next_key(), 5);
    }

    #[test]
    fn record_for_skipped_key_is_dropped() {
        let mut state = OrderingState::new(1);
        let mut sink = VecSink::new();
        state.skip(2, &mut sink);
        state.record(2, "late", &mut sink);
        state.record(1, "a", &mut sink);
        state.record(3, "c", &mut sink);
        assert_eq!(sink.events, vec![cmd(1, "a"), cmd(3, "c")]);
        assert_eq!(state.stats().snapshot().dropped, 1);
    }

    #[test]
    fn skip_cancels_buffered_record() {
        let mut state = OrderingState::new(1);
        let mut sink = VecSink::new();
        state.record(2, "b", &mut sink);
        state.record(3, "c", &mut sink);
        state.skip(2, &mut sink);
        state.record(1, "a", &mut sink);
        assert_eq!(sink.events, vec![cmd(1, "a"), cmd(3, "c")]);
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn stale_and_duplicate_records_are_dropped() {
        let mut state = OrderingState::new(1);
        let mut sink = VecSink::new();
        state.record(3, "c1", &mut sink);
        state.record(3, "c2", &mut sink);
        state.record(1, "a", &mut sink);
        state.record(1, "again", &mut sink);
        state.record(2, "b", &mut sink);
        assert_eq!(sink.keys(), vec![1, 2, 3]);
        assert_eq!(state.pending_len(), 0);
        assert_eq!(state.stats().snapshot().dropped, 2);
    }

    #[test]
    fn frame_end_before_record_fires_after_delivery() {
        let mut state = OrderingState::new(1);
        let mut sink = VecSink::new();
        state.record(1, "A", &mut sink);
        state.record(2, "B", &mut sink);
        state.frame_end(3, &mut sink);
        assert_eq!(sink.frame_ends(), 0);

        state.record(3, "C", &mut sink);
        state.record(4, "D", &mut sink);
        assert_eq!(
            sink.events,
            vec![
                cmd(1, "A"),
                cmd(2, "B"),
                cmd(3, "C"),
                SinkEvent::FrameEnd,
                cmd(4, "D"),
            ]
        );
    }

    #[test]
    fn frame_end_after_delivery_fires_immediately() {
        let mut state = OrderingState::new(1);
        let mut sink = VecSink::new();
        state.record(1, "A", &mut sink);
        state.frame_end(1, &mut sink);
        assert_eq!(sink.events, vec![cmd(1, "A"), SinkEvent::FrameEnd]);
        assert_eq!(state.pending_frame_boundaries().count(), 0);
    }

    #[test]
    fn frame_end_on_buffered_key_fires_when_drained() {
        let mut state = OrderingState::new(1);
        let mut sink = VecSink::new();
        state.record(2, "B", &mut sink);
        state.frame_end(2, &mut sink);
        state.record(1, "A", &mut sink);
        assert_eq!(
            sink.events,
            vec![cmd(1, "A"), cmd(2, "B"), SinkEvent::FrameEnd]
        );
    }

    #[test]
    fn frame_end_on_skipped_key_fires_when_crossed() {
        let mut state = OrderingState::new(1);
        let mut sink = VecSink::new();
        state.frame_end(3, &mut sink);
        state.skip(2, &mut sink);
        state.skip(3, &mut sink);
        state.record(1, "A", &mut sink);
        state.record(4, "D", &mut sink);
        assert_eq!(
            sink.events,
            vec![cmd(1, "A"), SinkEvent::FrameEnd, cmd(4, "D")]
        );
        assert_eq!(state.stats().snapshot().frames, 1);
    }

    #[test]
    fn skip_of_passed_key_is_ignored() {
        let mut state = OrderingState::new(1);
        let mut sink = VecSink::new();
        state.record(1, "A", &mut sink);
        state.skip(1, &mut sink);
        assert_eq!(state.next_key(), 2);
        assert_eq!(state.skip_ranges().count(), 0);
        assert_eq!(state.stats().snapshot().skipped, 0);
    }

    #[test]
    fn peak_pending_is_tracked() {
        let mut state = OrderingState::new(1);
        state.set_pending_warn_threshold(2);
        let mut sink = VecSink::new();
        for key in (2..=6).rev() {
            state.record(key, "x", &mut sink);
        }
        state.record(1, "x", &mut sink);
        assert_eq!(sink.keys(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(state.stats().snapshot().peak_pending, 5);
    }

    #[test]
    fn key_space_ends_below_u64_max() {
        let mut state = OrderingState::new(KEY_LIMIT - 2);
        let mut sink = VecSink::new();
        state.skip(KEY_LIMIT, &mut sink);
        state.frame_end(KEY_LIMIT, &mut sink);
        state.skip(KEY_LIMIT - 1, &mut sink);
        state.record(KEY_LIMIT - 2, "last", &mut sink);
        assert_eq!(state.next_key(), KEY_LIMIT);

        state.record(KEY_LIMIT, "beyond", &mut sink);
        assert_eq!(sink.events, vec![cmd(KEY_LIMIT - 2, "last")]);
        assert_eq!(state.next_key(), KEY_LIMIT);
        assert_eq!(state.pending_len(), 0);
        assert_eq!(state.stats().snapshot().dropped, 1);
    }
}
