//! GPU virtual address registry.
//!
//! Two top-level interval maps are kept, both keyed by start address:
//! - standalone resources (resources with their own backing allocation)
//! - heaps, each owning a [`PlacedResourceIndex`] for the resources placed inside it
//!
//! Resolution checks standalone resources first, then heaps. Within a kind, ranges never
//! overlap: a registration that overlaps an existing range of the same kind evicts it. Native
//! destruction notifications can race with address reuse in a live process, so the most recent
//! registration is taken as the truth.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::{
    AddressError, AddressRange, ObjectKey, PlacedResourceIndex, PlacedResourceRange,
    RegistryStats, RegistryStatsSnapshot, ResourceUsage,
};

/// Result of [`AddressRegistry::resolve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedAddress {
    /// Object owning the address.
    pub key: ObjectKey,
    /// `address - start` of the owning range.
    pub offset: u64,
    /// Heap the owner is placed in, for placed resources.
    pub heap: Option<ObjectKey>,
}

#[derive(Clone, Copy, Debug)]
enum Owner {
    Resource { start: u64 },
    Heap { start: u64 },
    Placed { heap_start: u64 },
}

#[derive(Debug)]
struct HeapEntry {
    range: AddressRange,
    placed: PlacedResourceIndex,
}

trait Ranged {
    fn address_range(&self) -> &AddressRange;
}

impl Ranged for AddressRange {
    fn address_range(&self) -> &AddressRange {
        self
    }
}

impl Ranged for HeapEntry {
    fn address_range(&self) -> &AddressRange {
        &self.range
    }
}

/// `upper_bound(address)` then step back.
fn find_containing<V: Ranged>(map: &BTreeMap<u64, V>, address: u64) -> Option<&V> {
    map.range(..=address)
        .next_back()
        .map(|(_, v)| v)
        .filter(|v| v.address_range().contains(address))
}

/// Keys of every entry of a non-overlapping map that overlaps `range`.
fn overlapping<V: Ranged>(map: &BTreeMap<u64, V>, range: &AddressRange) -> Vec<ObjectKey> {
    map.range(..range.end)
        .rev()
        .map(|(_, v)| v.address_range())
        .take_while(|r| r.end > range.start)
        .map(|r| r.key)
        .collect()
}

#[derive(Debug, Default)]
struct RegistryInner {
    resources: BTreeMap<u64, AddressRange>,
    heaps: BTreeMap<u64, HeapEntry>,
    owners: HashMap<ObjectKey, Owner>,
}

impl RegistryInner {
    /// Drop whatever `key` is registered as. Heaps take their placed resources with them.
    ///
    /// Returns the number of placed resources released by a heap cascade, or `None` if `key` was
    /// unknown.
    fn release(&mut self, key: ObjectKey) -> Option<usize> {
        let owner = self.owners.remove(&key)?;
        match owner {
            Owner::Resource { start } => {
                self.resources.remove(&start);
                Some(0)
            }
            Owner::Heap { start } => {
                let Some(heap) = self.heaps.remove(&start) else {
                    return Some(0);
                };
                let cascaded = heap.placed.len();
                for placed in heap.placed.keys() {
                    self.owners.remove(&placed);
                }
                if cascaded > 0 {
                    debug!(heap = %key, cascaded, "heap release dropped placed resources");
                }
                Some(cascaded)
            }
            Owner::Placed { heap_start } => {
                if let Some(heap) = self.heaps.get_mut(&heap_start) {
                    heap.placed.remove(key);
                }
                Some(0)
            }
        }
    }

    fn evict(&mut self, victims: Vec<ObjectKey>, by: &AddressRange) -> (Vec<ObjectKey>, usize) {
        let mut cascaded = 0;
        for victim in &victims {
            debug!(
                victim = %victim,
                by = %by.key,
                start = format_args!("0x{:x}", by.start),
                end = format_args!("0x{:x}", by.end),
                "evicting stale overlapping range"
            );
            cascaded += self.release(*victim).unwrap_or(0);
        }
        (victims, cascaded)
    }
}

/// Address registry shared by all interception threads.
///
/// All operations take a single registry-wide lock so that a resolve observes an insert together
/// with its eviction and alias-link fixups. Lookups take the lock shared.
#[derive(Debug, Default)]
pub struct AddressRegistry {
    inner: RwLock<RegistryInner>,
    stats: RegistryStats,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a standalone resource spanning `[start, start + size)`.
    ///
    /// Returns the keys of stale resources evicted because they overlapped the new range.
    pub fn register_resource(
        &self,
        key: ObjectKey,
        start: u64,
        size: u64,
    ) -> Result<Vec<ObjectKey>, AddressError> {
        let range = AddressRange::from_size(key, start, size)?;
        let mut inner = self.inner.write();
        if let Some(cascaded) = inner.release(key) {
            self.stats.add_cascaded_releases(cascaded as u64);
        }

        let victims = overlapping(&inner.resources, &range);
        let (evicted, _) = inner.evict(victims, &range);
        self.stats.add_evictions(evicted.len() as u64);

        inner.resources.insert(start, range);
        inner.owners.insert(key, Owner::Resource { start });
        trace!(
            key = %key,
            start = format_args!("0x{:x}", range.start),
            end = format_args!("0x{:x}", range.end),
            "resource registered"
        );
        Ok(evicted)
    }

    /// Register a heap spanning `[start, start + size)`.
    ///
    /// Returns the keys of stale heaps evicted because they overlapped the new range; their placed
    /// resources are released with them.
    pub fn register_heap(
        &self,
        key: ObjectKey,
        start: u64,
        size: u64,
    ) -> Result<Vec<ObjectKey>, AddressError> {
        let range = AddressRange::from_size(key, start, size)?;
        let mut inner = self.inner.write();
        if let Some(cascaded) = inner.release(key) {
            self.stats.add_cascaded_releases(cascaded as u64);
        }

        let victims = overlapping(&inner.heaps, &range);
        let (evicted, cascaded) = inner.evict(victims, &range);
        self.stats.add_evictions(evicted.len() as u64);
        self.stats.add_cascaded_releases(cascaded as u64);

        inner.heaps.insert(
            start,
            HeapEntry {
                range,
                placed: PlacedResourceIndex::new(key),
            },
        );
        inner.owners.insert(key, Owner::Heap { start });
        trace!(
            key = %key,
            start = format_args!("0x{:x}", range.start),
            end = format_args!("0x{:x}", range.end),
            "heap registered"
        );
        Ok(evicted)
    }

    /// Register a resource placed inside `heap` at the absolute address range
    /// `[start, start + size)`.
    ///
    /// The range must lie within the heap. It may alias other placed resources of the same heap.
    pub fn register_placed(
        &self,
        key: ObjectKey,
        heap: ObjectKey,
        start: u64,
        size: u64,
        usage: ResourceUsage,
    ) -> Result<(), AddressError> {
        if key == heap {
            return Err(AddressError::KeyConflict { key });
        }
        let range = AddressRange::from_size(key, start, size)?;
        let mut inner = self.inner.write();

        let heap_start = match inner.owners.get(&heap) {
            Some(Owner::Heap { start }) => *start,
            _ => return Err(AddressError::UnknownHeap { heap }),
        };
        let heap_range = inner
            .heaps
            .get(&heap_start)
            .map(|entry| entry.range)
            .ok_or(AddressError::UnknownHeap { heap })?;
        if !heap_range.encloses(&range) {
            return Err(AddressError::OutsideHeap {
                key,
                start: range.start,
                end: range.end,
                heap,
                heap_start: heap_range.start,
                heap_end: heap_range.end,
            });
        }

        if let Some(cascaded) = inner.release(key) {
            self.stats.add_cascaded_releases(cascaded as u64);
        }
        // Releasing `key` cannot drop `heap` (keys differ), so the entry is still present.
        let Some(entry) = inner.heaps.get_mut(&heap_start) else {
            return Err(AddressError::UnknownHeap { heap });
        };
        let layer = entry.placed.insert(range, usage);
        inner.owners.insert(key, Owner::Placed { heap_start });
        trace!(
            key = %key,
            heap = %heap,
            layer,
            usage = ?usage,
            start = format_args!("0x{:x}", range.start),
            end = format_args!("0x{:x}", range.end),
            "placed resource registered"
        );
        Ok(())
    }

    /// Resolve `address` to its owner and the offset into the owner's range.
    ///
    /// Standalone resources are searched first. An address inside a heap resolves to the placed
    /// resource containing it (see [`PlacedResourceIndex::resolve`] for the aliasing tie-break),
    /// or to the heap itself when no placed resource covers it. `None` means the address is not
    /// tracked.
    pub fn resolve(&self, address: u64, usage_hint: Option<ResourceUsage>) -> Option<ResolvedAddress> {
        let inner = self.inner.read();

        let resolved = if let Some(resource) = find_containing(&inner.resources, address) {
            Some(ResolvedAddress {
                key: resource.key,
                offset: address - resource.start,
                heap: None,
            })
        } else if let Some(heap) = find_containing(&inner.heaps, address) {
            match heap.placed.resolve(address, usage_hint) {
                Some(placed) => Some(ResolvedAddress {
                    key: placed.range.key,
                    offset: address - placed.range.start,
                    heap: Some(heap.range.key),
                }),
                None => Some(ResolvedAddress {
                    key: heap.range.key,
                    offset: address - heap.range.start,
                    heap: None,
                }),
            }
        } else {
            None
        };

        match resolved {
            Some(_) => self.stats.inc_resolve_hits(),
            None => {
                self.stats.inc_resolve_misses();
                trace!(address = format_args!("0x{address:x}"), "address not tracked");
            }
        }
        resolved
    }

    /// Release whatever `key` is registered as. Unknown keys are ignored.
    ///
    /// Returns `true` if something was released.
    pub fn release(&self, key: ObjectKey) -> bool {
        let released = self.inner.write().release(key);
        if let Some(cascaded) = released {
            self.stats.add_cascaded_releases(cascaded as u64);
        }
        released.is_some()
    }

    /// The registered `[start, end)` of `key`, whatever kind of object it is.
    pub fn range_of(&self, key: ObjectKey) -> Option<AddressRange> {
        let inner = self.inner.read();
        match *inner.owners.get(&key)? {
            Owner::Resource { start } => inner.resources.get(&start).copied(),
            Owner::Heap { start } => inner.heaps.get(&start).map(|heap| heap.range),
            Owner::Placed { heap_start } => inner
                .heaps
                .get(&heap_start)
                .and_then(|heap| heap.placed.get(key))
                .map(|placed| placed.range),
        }
    }

    /// A copy of the placed-resource entry for `key`, including its alias links.
    pub fn placed(&self, key: ObjectKey) -> Option<PlacedResourceRange> {
        let inner = self.inner.read();
        match *inner.owners.get(&key)? {
            Owner::Placed { heap_start } => inner
                .heaps
                .get(&heap_start)
                .and_then(|heap| heap.placed.get(key))
                .cloned(),
            _ => None,
        }
    }

    /// Number of placed-resource layers of `heap`.
    pub fn heap_layer_count(&self, heap: ObjectKey) -> Option<usize> {
        let inner = self.inner.read();
        match *inner.owners.get(&heap)? {
            Owner::Heap { start } => inner.heaps.get(&start).map(|h| h.placed.layer_count()),
            _ => None,
        }
    }

    /// Number of live registrations of any kind.
    pub fn len(&self) -> usize {
        self.inner.read().owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStatsSnapshot {
        self.stats.snapshot()
    }
}
