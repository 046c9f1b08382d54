//! Descriptor handle registry.
//!
//! A descriptor heap exposes a contiguous range of handles, one slot every `stride` units. Handles
//! come in two flavours:
//! - CPU handles are opaque host addresses. Unrelated heaps of the same slot stride can produce
//!   ranges whose raw values collide, so CPU ranges are bucketed by `(stride, start % stride)`
//!   before the sorted-map search. A slot-aligned handle is found in its own bucket; a handle
//!   pointing inside a slot falls back to the other buckets of each stride and resolves to the
//!   range with the nearest slot start below it.
//! - GPU handles are heap-relative virtual offsets and are searched directly.
//!
//! Aligned lookups stay logarithmic. Heap destruction is rare and is a linear scan.
//!
//! An owner has at most one range per heap type and kind: creating it again replaces the old
//! range.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::{DescriptorError, ObjectKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorHeapType {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

impl DescriptorHeapType {
    pub const COUNT: usize = 4;

    #[inline]
    fn index(self) -> usize {
        match self {
            Self::CbvSrvUav => 0,
            Self::Sampler => 1,
            Self::Rtv => 2,
            Self::Dsv => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Cpu,
    Gpu,
}

/// Handle range `[start, end)` exposed by descriptor heap `owner`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorHandleRange {
    pub owner: ObjectKey,
    pub heap_type: DescriptorHeapType,
    pub kind: HandleKind,
    pub start: u64,
    pub end: u64,
    pub stride: u64,
}

impl DescriptorHandleRange {
    /// Range of `count` slots of `stride` units starting at `start`.
    pub fn with_count(
        owner: ObjectKey,
        heap_type: DescriptorHeapType,
        kind: HandleKind,
        start: u64,
        count: u64,
        stride: u64,
    ) -> Result<Self, DescriptorError> {
        let end = count
            .checked_mul(stride)
            .and_then(|len| start.checked_add(len))
            .ok_or(DescriptorError::Overflow {
                owner,
                start,
                count,
                stride,
            })?;
        let range = Self {
            owner,
            heap_type,
            kind,
            start,
            end,
            stride,
        };
        range.validate()?;
        Ok(range)
    }

    fn validate(&self) -> Result<(), DescriptorError> {
        if self.stride == 0 {
            return Err(DescriptorError::ZeroStride { owner: self.owner });
        }
        if self.end <= self.start {
            return Err(DescriptorError::EmptyRange {
                owner: self.owner,
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn contains(&self, handle: u64) -> bool {
        self.start <= handle && handle < self.end
    }

    /// Number of whole slots in the range.
    pub fn slot_count(&self) -> u64 {
        (self.end - self.start) / self.stride
    }

    #[inline]
    fn bucket(&self) -> u64 {
        self.start % self.stride
    }
}

/// Result of [`DescriptorHandleRegistry::get_handle_info`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandleInfo {
    pub owner: ObjectKey,
    /// Slot index, `(handle - start) / stride`.
    pub index: u64,
}

type RangeMap = BTreeMap<u64, DescriptorHandleRange>;

fn find_containing(map: &RangeMap, handle: u64) -> Option<&DescriptorHandleRange> {
    map.range(..=handle)
        .next_back()
        .map(|(_, r)| r)
        .filter(|r| r.contains(handle))
}

/// Remove every range of `map` overlapping `[start, end)`, returning their owners.
fn evict_overlapping(map: &mut RangeMap, start: u64, end: u64) -> Vec<ObjectKey> {
    let victims: Vec<u64> = map
        .range(..end)
        .rev()
        .take_while(|(_, r)| r.end > start)
        .map(|(s, _)| *s)
        .collect();
    victims
        .into_iter()
        .filter_map(|s| map.remove(&s))
        .map(|r| r.owner)
        .collect()
}

#[derive(Debug, Default)]
struct TypeTables {
    /// stride -> (start % stride) -> start -> range
    cpu: BTreeMap<u64, HashMap<u64, RangeMap>>,
    gpu: RangeMap,
}

impl TypeTables {
    /// Insert `range`, replacing any earlier range of the same owner and kind. Returns the owners
    /// of other ranges evicted by overlap, and whether an earlier range of the owner was replaced.
    fn insert(&mut self, range: DescriptorHandleRange) -> (Vec<ObjectKey>, bool) {
        let replaced = self.remove_owner(range.owner, range.kind) > 0;
        let map = match range.kind {
            HandleKind::Cpu => self
                .cpu
                .entry(range.stride)
                .or_default()
                .entry(range.bucket())
                .or_default(),
            HandleKind::Gpu => &mut self.gpu,
        };
        let evicted = evict_overlapping(map, range.start, range.end);
        map.insert(range.start, range);
        (evicted, replaced)
    }

    fn find(&self, kind: HandleKind, handle: u64) -> Option<&DescriptorHandleRange> {
        match kind {
            HandleKind::Cpu => self.cpu.iter().find_map(|(&stride, buckets)| {
                let residue = handle % stride;
                buckets
                    .get(&residue)
                    .and_then(|map| find_containing(map, handle))
                    .or_else(|| {
                        // Unaligned handle: the smallest offset into a slot wins.
                        buckets
                            .iter()
                            .filter_map(|(&bucket, map)| {
                                let offset = (residue + stride - bucket) % stride;
                                find_containing(map, handle).map(|r| (offset, r))
                            })
                            .min_by_key(|&(offset, _)| offset)
                            .map(|(_, r)| r)
                    })
            }),
            HandleKind::Gpu => find_containing(&self.gpu, handle),
        }
    }

    fn ranges(&self, kind: HandleKind) -> Box<dyn Iterator<Item = &DescriptorHandleRange> + '_> {
        match kind {
            HandleKind::Cpu => Box::new(
                self.cpu
                    .values()
                    .flat_map(|buckets| buckets.values())
                    .flat_map(|map| map.values()),
            ),
            HandleKind::Gpu => Box::new(self.gpu.values()),
        }
    }

    fn remove_owner(&mut self, owner: ObjectKey, kind: HandleKind) -> usize {
        let mut removed = 0;
        let mut retain = |map: &mut RangeMap| {
            let before = map.len();
            map.retain(|_, r| r.owner != owner);
            removed += before - map.len();
        };

        match kind {
            HandleKind::Cpu => {
                for buckets in self.cpu.values_mut() {
                    for map in buckets.values_mut() {
                        retain(map);
                    }
                    buckets.retain(|_, map| !map.is_empty());
                }
                self.cpu.retain(|_, buckets| !buckets.is_empty());
            }
            HandleKind::Gpu => retain(&mut self.gpu),
        }
        removed
    }

    fn len(&self) -> usize {
        self.ranges(HandleKind::Cpu).count() + self.gpu.len()
    }
}

/// Registry of descriptor heap handle ranges, shared by all interception threads.
#[derive(Debug, Default)]
pub struct DescriptorHandleRegistry {
    tables: RwLock<[TypeTables; DescriptorHeapType::COUNT]>,
}

impl DescriptorHandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a heap's handle range.
    ///
    /// A previous range of the same owner, heap type and kind is replaced. Ranges of other owners
    /// with the same heap type and kind (and, for CPU handles, the same bucket) that overlap
    /// `range` are stale and get evicted; their owners are returned.
    pub fn create_heap(
        &self,
        range: DescriptorHandleRange,
    ) -> Result<Vec<ObjectKey>, DescriptorError> {
        range.validate()?;
        let (evicted, replaced) = self.tables.write()[range.heap_type.index()].insert(range);
        if replaced {
            debug!(
                owner = %range.owner,
                heap_type = ?range.heap_type,
                kind = ?range.kind,
                "descriptor range re-created without destroy"
            );
        }
        if !evicted.is_empty() {
            debug!(
                owner = %range.owner,
                heap_type = ?range.heap_type,
                kind = ?range.kind,
                evicted = ?evicted,
                "descriptor range evicted stale ranges"
            );
        }
        trace!(
            owner = %range.owner,
            heap_type = ?range.heap_type,
            kind = ?range.kind,
            start = format_args!("0x{:x}", range.start),
            end = format_args!("0x{:x}", range.end),
            stride = range.stride,
            "descriptor range registered"
        );
        Ok(evicted)
    }

    /// Map a raw handle to its owning heap and slot index.
    pub fn get_handle_info(
        &self,
        heap_type: DescriptorHeapType,
        kind: HandleKind,
        handle: u64,
    ) -> Option<HandleInfo> {
        let tables = self.tables.read();
        let range = tables[heap_type.index()].find(kind, handle)?;
        Some(HandleInfo {
            owner: range.owner,
            index: (handle - range.start) / range.stride,
        })
    }

    /// Inverse of [`Self::get_handle_info`]: the live handle value of slot `index` of `owner`.
    pub fn handle_at(
        &self,
        heap_type: DescriptorHeapType,
        kind: HandleKind,
        owner: ObjectKey,
        index: u64,
    ) -> Option<u64> {
        let tables = self.tables.read();
        let range = tables[heap_type.index()]
            .ranges(kind)
            .find(|r| r.owner == owner)?;
        if index >= range.slot_count() {
            return None;
        }
        Some(range.start + index * range.stride)
    }

    /// Remove every CPU and GPU range owned by `owner`. Unknown owners are ignored.
    ///
    /// Returns the number of ranges removed.
    pub fn destroy_heap(&self, owner: ObjectKey) -> usize {
        let removed: usize = self
            .tables
            .write()
            .iter_mut()
            .map(|t| t.remove_owner(owner, HandleKind::Cpu) + t.remove_owner(owner, HandleKind::Gpu))
            .sum();
        if removed > 0 {
            trace!(owner = %owner, removed, "descriptor heap destroyed");
        }
        removed
    }

    /// Number of registered ranges across all heap types and kinds.
    pub fn len(&self) -> usize {
        self.tables.read().iter().map(TypeTables::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
