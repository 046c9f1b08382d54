//! Per-heap index of placed resources.
//!
//! A heap's byte range can be shared by several resources created at different times for
//! different purposes (for example a generic buffer and a raytracing acceleration structure over
//! the same bytes). Entries are kept in *layers*: each layer is a sorted map of non-overlapping
//! ranges, so the common non-aliased case stays a single `O(log n)` search, while aliased entries
//! spill into further layers and are linked to each other through their `intersecting` sets.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::trace;

use crate::{AddressRange, ObjectKey};

/// What a placed resource is used as.
///
/// Resolution of an aliased address prefers the resource whose usage matches the caller's hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceUsage {
    Buffer,
    Texture,
    AccelerationStructure,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacedResourceRange {
    pub range: AddressRange,
    pub heap_key: ObjectKey,
    pub layer: usize,
    pub usage: ResourceUsage,
    /// Keys of every other placed resource in the same heap whose range overlaps this one.
    pub intersecting: BTreeSet<ObjectKey>,
}

#[derive(Clone, Debug)]
pub struct PlacedResourceIndex {
    heap_key: ObjectKey,
    /// layer -> (start -> key). Entries within one layer never overlap.
    layers: Vec<BTreeMap<u64, ObjectKey>>,
    ranges: HashMap<ObjectKey, PlacedResourceRange>,
}

impl PlacedResourceIndex {
    pub fn new(heap_key: ObjectKey) -> Self {
        Self {
            heap_key,
            layers: Vec::new(),
            ranges: HashMap::new(),
        }
    }

    pub fn heap_key(&self) -> ObjectKey {
        self.heap_key
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn get(&self, key: ObjectKey) -> Option<&PlacedResourceRange> {
        self.ranges.get(&key)
    }

    pub fn contains_key(&self, key: ObjectKey) -> bool {
        self.ranges.contains_key(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = ObjectKey> + '_ {
        self.ranges.keys().copied()
    }

    /// Partners of `key`, i.e. the placed resources aliasing it.
    pub fn partners(&self, key: ObjectKey) -> Option<&BTreeSet<ObjectKey>> {
        self.ranges.get(&key).map(|r| &r.intersecting)
    }

    /// Insert `range` into the first layer it does not overlap, appending a layer if needed.
    ///
    /// Every existing entry overlapping `range` (in any layer) is linked to it in both
    /// directions. Re-inserting a known key replaces the previous entry. Returns the layer index.
    pub fn insert(&mut self, range: AddressRange, usage: ResourceUsage) -> usize {
        debug_assert!(!range.is_empty());

        if self.ranges.contains_key(&range.key) {
            self.remove(range.key);
        }

        let mut partners = BTreeSet::new();
        let mut target = None;
        for (idx, layer) in self.layers.iter().enumerate() {
            let before = partners.len();
            self.collect_overlaps(layer, &range, &mut partners);
            if target.is_none() && partners.len() == before {
                target = Some(idx);
            }
        }

        let layer = match target {
            Some(idx) => idx,
            None => {
                self.layers.push(BTreeMap::new());
                self.layers.len() - 1
            }
        };
        self.layers[layer].insert(range.start, range.key);

        for partner in &partners {
            if let Some(entry) = self.ranges.get_mut(partner) {
                entry.intersecting.insert(range.key);
            }
        }

        trace!(
            heap = %self.heap_key,
            key = %range.key,
            layer,
            aliases = partners.len(),
            "placed resource inserted"
        );

        self.ranges.insert(
            range.key,
            PlacedResourceRange {
                range,
                heap_key: self.heap_key,
                layer,
                usage,
                intersecting: partners,
            },
        );
        layer
    }

    /// Add the keys of every entry of `layer` overlapping `range` to `out`.
    fn collect_overlaps(
        &self,
        layer: &BTreeMap<u64, ObjectKey>,
        range: &AddressRange,
        out: &mut BTreeSet<ObjectKey>,
    ) {
        // Entries in a layer are disjoint, so walking back from the last entry starting before
        // `range.end` visits strictly decreasing end addresses.
        for (_, key) in layer.range(..range.end).rev() {
            let Some(entry) = self.ranges.get(key) else {
                continue;
            };
            if entry.range.end <= range.start {
                break;
            }
            out.insert(*key);
        }
    }

    /// Find the placed resource owning `address`.
    ///
    /// Layers are scanned in order; the first containing entry wins unless it is aliased. For an
    /// aliased entry the candidates are the entry and its partners that also contain `address`:
    /// a candidate whose usage matches `usage_hint` is preferred, then the one with the largest
    /// end address, then the lowest key.
    pub fn resolve(
        &self,
        address: u64,
        usage_hint: Option<ResourceUsage>,
    ) -> Option<&PlacedResourceRange> {
        for layer in &self.layers {
            let Some((_, key)) = layer.range(..=address).next_back() else {
                continue;
            };
            let Some(entry) = self.ranges.get(key) else {
                continue;
            };
            if !entry.range.contains(address) {
                continue;
            }
            if entry.intersecting.is_empty() {
                return Some(entry);
            }
            return Some(self.pick_alias(entry, address, usage_hint));
        }
        None
    }

    fn pick_alias<'a>(
        &'a self,
        entry: &'a PlacedResourceRange,
        address: u64,
        usage_hint: Option<ResourceUsage>,
    ) -> &'a PlacedResourceRange {
        core::iter::once(entry)
            .chain(
                entry
                    .intersecting
                    .iter()
                    .filter_map(|partner| self.ranges.get(partner)),
            )
            .filter(|candidate| candidate.range.contains(address))
            .max_by_key(|candidate| {
                (
                    usage_hint == Some(candidate.usage),
                    candidate.range.end,
                    core::cmp::Reverse(candidate.range.key),
                )
            })
            .unwrap_or(entry)
    }

    /// Remove `key` from its layer and from every partner's `intersecting` set.
    pub fn remove(&mut self, key: ObjectKey) -> Option<PlacedResourceRange> {
        let removed = self.ranges.remove(&key)?;

        if let Some(layer) = self.layers.get_mut(removed.layer) {
            if layer.get(&removed.range.start) == Some(&key) {
                layer.remove(&removed.range.start);
            }
        }
        while self.layers.last().is_some_and(BTreeMap::is_empty) {
            self.layers.pop();
        }

        for partner in &removed.intersecting {
            if let Some(entry) = self.ranges.get_mut(partner) {
                entry.intersecting.remove(&key);
            }
        }

        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn range(key: u64, start: u64, size: u64) -> AddressRange {
        AddressRange::from_size(ObjectKey(key), start, size).unwrap()
    }

    #[test]
    fn disjoint_entries_share_the_first_layer() {
        let mut index = PlacedResourceIndex::new(ObjectKey(1));
        assert_eq!(index.insert(range(2, 0x1000, 0x100), ResourceUsage::Buffer), 0);
        assert_eq!(index.insert(range(3, 0x1100, 0x100), ResourceUsage::Buffer), 0);
        assert_eq!(index.insert(range(4, 0x0800, 0x800), ResourceUsage::Texture), 0);
        assert_eq!(index.layer_count(), 1);

        assert_eq!(index.resolve(0x1000, None).unwrap().range.key, ObjectKey(2));
        assert_eq!(index.resolve(0x10FF, None).unwrap().range.key, ObjectKey(2));
        assert_eq!(index.resolve(0x1100, None).unwrap().range.key, ObjectKey(3));
        assert_eq!(index.resolve(0x0FFF, None).unwrap().range.key, ObjectKey(4));
        assert!(index.resolve(0x1200, None).is_none());
        assert!(index.resolve(0x07FF, None).is_none());
    }

    #[test]
    fn overlapping_entries_spill_into_new_layers_and_link() {
        let mut index = PlacedResourceIndex::new(ObjectKey(1));
        assert_eq!(index.insert(range(2, 0x1000, 0x800), ResourceUsage::Buffer), 0);
        assert_eq!(
            index.insert(range(3, 0x1400, 0x800), ResourceUsage::AccelerationStructure),
            1
        );
        // Overlaps both existing layers.
        assert_eq!(index.insert(range(4, 0x1600, 0x100), ResourceUsage::Texture), 2);
        // Fits back into layer 0 after entry 2.
        assert_eq!(index.insert(range(5, 0x1800, 0x100), ResourceUsage::Buffer), 0);

        let keys = |k: u64| -> Vec<u64> {
            index
                .partners(ObjectKey(k))
                .unwrap()
                .iter()
                .map(|k| k.0)
                .collect()
        };
        assert_eq!(keys(2), vec![3, 4]);
        assert_eq!(keys(3), vec![2, 4, 5]);
        assert_eq!(keys(4), vec![2, 3]);
        assert_eq!(keys(5), vec![3]);
    }

    #[test]
    fn aliased_resolve_prefers_matching_usage() {
        let mut index = PlacedResourceIndex::new(ObjectKey(1));
        index.insert(range(2, 0x1000, 0x1000), ResourceUsage::Buffer);
        index.insert(range(3, 0x1000, 0x800), ResourceUsage::AccelerationStructure);

        let hit = index
            .resolve(0x1200, Some(ResourceUsage::AccelerationStructure))
            .unwrap();
        assert_eq!(hit.range.key, ObjectKey(3));

        let hit = index.resolve(0x1200, Some(ResourceUsage::Buffer)).unwrap();
        assert_eq!(hit.range.key, ObjectKey(2));
    }

    #[test]
    fn aliased_resolve_falls_back_to_largest_end() {
        let mut index = PlacedResourceIndex::new(ObjectKey(1));
        index.insert(range(2, 0x1000, 0x400), ResourceUsage::Buffer);
        index.insert(range(3, 0x1000, 0x800), ResourceUsage::Buffer);

        let hit = index.resolve(0x1100, Some(ResourceUsage::Texture)).unwrap();
        assert_eq!(hit.range.key, ObjectKey(3));
        let hit = index.resolve(0x1100, None).unwrap();
        assert_eq!(hit.range.key, ObjectKey(3));

        // Partners that do not contain the address are never returned.
        let hit = index.resolve(0x1600, None).unwrap();
        assert_eq!(hit.range.key, ObjectKey(3));
    }

    #[test]
    fn aliased_resolve_equal_ends_picks_lowest_key() {
        let mut index = PlacedResourceIndex::new(ObjectKey(1));
        index.insert(range(9, 0x1000, 0x800), ResourceUsage::Buffer);
        index.insert(range(4, 0x1000, 0x800), ResourceUsage::Buffer);
        assert_eq!(index.resolve(0x1010, None).unwrap().range.key, ObjectKey(4));
    }

    #[test]
    fn remove_unlinks_partners_and_pops_empty_layers() {
        let mut index = PlacedResourceIndex::new(ObjectKey(1));
        index.insert(range(2, 0x1000, 0x800), ResourceUsage::Buffer);
        index.insert(range(3, 0x1400, 0x800), ResourceUsage::Texture);
        assert_eq!(index.layer_count(), 2);

        let removed = index.remove(ObjectKey(3)).unwrap();
        assert_eq!(removed.layer, 1);
        assert!(index.partners(ObjectKey(2)).unwrap().is_empty());
        assert_eq!(index.layer_count(), 1);
        assert!(index.remove(ObjectKey(3)).is_none());

        assert!(index.resolve(0x1A00, None).is_none());
        assert_eq!(index.resolve(0x1200, None).unwrap().range.key, ObjectKey(2));
    }

    #[test]
    fn reinsert_replaces_previous_entry() {
        let mut index = PlacedResourceIndex::new(ObjectKey(1));
        index.insert(range(2, 0x1000, 0x100), ResourceUsage::Buffer);
        index.insert(range(2, 0x2000, 0x100), ResourceUsage::Texture);
        assert_eq!(index.len(), 1);
        assert!(index.resolve(0x1000, None).is_none());
        let hit = index.resolve(0x2000, None).unwrap();
        assert_eq!(hit.usage, ResourceUsage::Texture);
    }

    #[test]
    fn entries_in_lower_layers_still_resolve_past_gaps() {
        let mut index = PlacedResourceIndex::new(ObjectKey(1));
        index.insert(range(2, 0x1000, 0x100), ResourceUsage::Buffer);
        index.insert(range(3, 0x1080, 0x100), ResourceUsage::Buffer);
        // Address only covered by the layer-1 entry.
        assert_eq!(index.resolve(0x1150, None).unwrap().range.key, ObjectKey(3));
    }
}
