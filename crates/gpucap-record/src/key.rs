use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide source of trace keys.
///
/// Every intercepted call takes exactly one key, in issue order. The allocator is injected into
/// the interception layer rather than living in a static, so independent captures (and tests) get
/// independent key spaces.
#[derive(Debug)]
pub struct TraceKeyAllocator {
    next: AtomicU64,
}

impl Default for TraceKeyAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceKeyAllocator {
    /// Allocator whose first key is `1`, matching [`crate::OrderingState::new`].
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first_key: u64) -> Self {
        Self {
            next: AtomicU64::new(first_key),
        }
    }

    /// Take the next key. Keys are unique and strictly increasing in allocation order.
    pub fn next_key(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The key the next call to [`Self::next_key`] will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}
