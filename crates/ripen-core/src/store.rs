//! Per-location instance buckets for one stage graph.
//!
//! Buckets are created lazily on first insert and dropped once empty.
//! Inserting an instance that is [`almost_same`] as one already present
//! merges the counts instead of growing the bucket.
//!
//! [`almost_same`]: StageInstance::almost_same

use std::collections::BTreeMap;

use ripen_types::{ItemTypeId, LocationId};

use crate::instance::StageInstance;
use crate::maintenance;

/// `location -> instances` for a single stage graph.
#[derive(Debug, Clone, Default)]
pub struct InstanceStore {
    buckets: BTreeMap<LocationId, Vec<StageInstance>>,
}

impl InstanceStore {
    /// An empty store.
    pub const fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
        }
    }

    /// Insert an instance, merging it into an equivalent one if present.
    ///
    /// Zero-count instances are dropped. If merging would overflow the
    /// count the instance is kept separately.
    pub fn insert(&mut self, location: LocationId, instance: StageInstance, now: f64, epsilon: f64) {
        if instance.count() == 0 {
            return;
        }
        let bucket = self.buckets.entry(location).or_default();
        let merged = bucket
            .iter_mut()
            .find(|existing| existing.almost_same(&instance, now, epsilon))
            .is_some_and(|existing| existing.absorb(instance.count()));
        if !merged {
            bucket.push(instance);
        }
    }

    /// Append an instance as-is, without merging.
    pub fn push(&mut self, location: LocationId, instance: StageInstance) {
        if instance.count() > 0 {
            self.buckets.entry(location).or_default().push(instance);
        }
    }

    /// Instances at a location.
    pub fn bucket(&self, location: LocationId) -> Option<&[StageInstance]> {
        self.buckets.get(&location).map(Vec::as_slice)
    }

    /// Mutable instances at a location.
    pub fn bucket_mut(&mut self, location: LocationId) -> Option<&mut Vec<StageInstance>> {
        self.buckets.get_mut(&location)
    }

    /// Remove and return a location's bucket.
    pub fn take_bucket(&mut self, location: LocationId) -> Vec<StageInstance> {
        self.buckets.remove(&location).unwrap_or_default()
    }

    /// Put a bucket back. An empty bucket removes the location.
    pub fn put_bucket(&mut self, location: LocationId, bucket: Vec<StageInstance>) {
        if bucket.is_empty() {
            self.buckets.remove(&location);
        } else {
            self.buckets.insert(location, bucket);
        }
    }

    /// Drop a location and everything in it.
    pub fn remove_location(&mut self, location: LocationId) -> Option<Vec<StageInstance>> {
        self.buckets.remove(&location)
    }

    /// Whether the store holds anything at `location`.
    pub fn contains_location(&self, location: LocationId) -> bool {
        self.buckets.contains_key(&location)
    }

    /// Drop locations with no instances left.
    pub fn prune_empty(&mut self) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| bucket.iter().any(|instance| instance.count() > 0));
        before.saturating_sub(self.buckets.len())
    }

    /// Move `count` items of `item` from one location to another.
    ///
    /// Returns the part of `count` that could not be satisfied.
    #[allow(clippy::too_many_arguments)]
    pub fn move_instances(
        &mut self,
        from: LocationId,
        to: LocationId,
        item: ItemTypeId,
        count: u32,
        older_first: bool,
        now: f64,
        epsilon: f64,
    ) -> u32 {
        let Some(bucket) = self.buckets.get_mut(&from) else {
            return count;
        };
        let (moved, remainder) = maintenance::take_instances(bucket, item, count, older_first, now);
        if bucket.is_empty() {
            self.buckets.remove(&from);
        }
        for instance in moved {
            self.insert(to, instance, now, epsilon);
        }
        remainder
    }

    /// Sum of counts, optionally restricted to one presented item type.
    pub fn total_count(&self, item: Option<ItemTypeId>) -> u64 {
        self.iter()
            .filter(|(_, instance)| item.is_none_or(|item| instance.item() == item))
            .map(|(_, instance)| u64::from(instance.count()))
            .fold(0_u64, u64::saturating_add)
    }

    /// Iterate every instance with its location.
    pub fn iter(&self) -> impl Iterator<Item = (LocationId, &StageInstance)> {
        self.buckets
            .iter()
            .flat_map(|(location, bucket)| bucket.iter().map(move |instance| (*location, instance)))
    }

    /// Locations with at least one bucket.
    pub fn locations(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.buckets.keys().copied()
    }

    /// Mutable access to every bucket.
    pub fn buckets_mut(&mut self) -> impl Iterator<Item = (LocationId, &mut Vec<StageInstance>)> {
        self.buckets.iter_mut().map(|(location, bucket)| (*location, bucket))
    }

    /// Drop everything, returning the number of instances removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.len();
        self.buckets.clear();
        removed
    }

    /// Number of instances across all locations.
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Whether the store holds no instances.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
