//! Bucket housekeeping: merge, prune, and count-preserving transfer.
//!
//! # Passes
//!
//! - **Merge**: equivalent instances (see [`StageInstance::almost_same`])
//!   are folded into one; the absorbed instance is left with count 0.
//! - **Prune**: drops zero-count instances, instances sitting on an ordinal
//!   the graph no longer has, and decayed instances past the forgetting
//!   window. Non-regressing instances whose start lies in the future are
//!   re-anchored at `now`, keeping their progress.
//! - **Transfer**: [`take_instances`] removes a number of items from a
//!   bucket, oldest or youngest first, splitting at most one instance.

use ripen_types::{ItemTypeId, LocationId};
use tracing::{debug, warn};

use crate::engine::BOUNDARY_TOLERANCE;
use crate::graph::StageGraph;
use crate::instance::StageInstance;

/// What a prune pass removed or repaired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Instances with no items left.
    pub empty: usize,
    /// Instances on an ordinal or item the graph does not have.
    pub invalid: usize,
    /// Decayed instances past the forgetting window.
    pub forgotten: usize,
    /// Instances re-anchored because their stage started in the future.
    /// Not counted as removed.
    pub reanchored: usize,
}

impl PruneReport {
    /// Total instances removed.
    pub const fn total(&self) -> usize {
        self.empty
            .saturating_add(self.invalid)
            .saturating_add(self.forgotten)
    }

    /// Accumulate another report into this one.
    pub const fn absorb(&mut self, other: Self) {
        self.empty = self.empty.saturating_add(other.empty);
        self.invalid = self.invalid.saturating_add(other.invalid);
        self.forgotten = self.forgotten.saturating_add(other.forgotten);
        self.reanchored = self.reanchored.saturating_add(other.reanchored);
    }
}

/// Result of a full maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Instances folded into another.
    pub merged: usize,
    /// What the prune pass removed.
    pub pruned: PruneReport,
    /// Locations dropped because they became empty.
    pub emptied_locations: usize,
}

impl MaintenanceReport {
    /// Accumulate another report into this one.
    pub const fn absorb(&mut self, other: Self) {
        self.merged = self.merged.saturating_add(other.merged);
        self.pruned.absorb(other.pruned);
        self.emptied_locations = self.emptied_locations.saturating_add(other.emptied_locations);
    }
}

/// Fold equivalent instances together. Returns how many were absorbed.
pub fn merge_bucket(bucket: &mut [StageInstance], now: f64, epsilon: f64) -> usize {
    let mut merged = 0_usize;
    for split in 1..=bucket.len() {
        let (head, tail) = bucket.split_at_mut(split);
        let Some(keep) = head.last_mut() else {
            continue;
        };
        if keep.count() == 0 {
            continue;
        }
        for other in tail.iter_mut() {
            if other.count() > 0 && keep.almost_same(other, now, epsilon) && keep.absorb(other.count()) {
                other.consume(other.count());
                merged = merged.saturating_add(1);
            }
        }
    }
    merged
}

/// Remove instances that must no longer be tracked and re-anchor those
/// whose stage start lies in the future.
pub fn prune_bucket(
    graph: &StageGraph,
    location: LocationId,
    bucket: &mut Vec<StageInstance>,
    now: f64,
    forgetting_window: f64,
) -> PruneReport {
    let mut report = PruneReport::default();
    bucket.retain_mut(|instance| {
        if instance.count() == 0 {
            report.empty = report.empty.saturating_add(1);
            return false;
        }
        if instance.is_decayed() {
            if now - instance.start_time() > forgetting_window {
                report.forgotten = report.forgotten.saturating_add(1);
                return false;
            }
            return true;
        }
        let valid = graph
            .stage(instance.ordinal())
            .is_some_and(|stage| stage.item == instance.item());
        if !valid {
            report.invalid = report.invalid.saturating_add(1);
            return false;
        }
        // Negative rates legitimately start in the future.
        if instance.clock().slope() >= 0.0 && instance.start_time() > now + BOUNDARY_TOLERANCE {
            warn!(
                %location,
                source = %graph.source(),
                start = instance.start_time(),
                time = now,
                "Instance starts in the future, re-anchoring"
            );
            instance.set_new_start(now, instance.elapsed(now).max(0.0));
            report.reanchored = report.reanchored.saturating_add(1);
        }
        true
    });
    if report.total() > 0 || report.reanchored > 0 {
        debug!(
            %location,
            source = %graph.source(),
            empty = report.empty,
            invalid = report.invalid,
            forgotten = report.forgotten,
            reanchored = report.reanchored,
            "Pruned bucket"
        );
    }
    report
}

/// Take `count` items of `item` out of `bucket`.
///
/// Candidates are ordered by progress (ordinal, then elapsed time at
/// `now`), most advanced first when `older_first`. Whole instances are
/// taken greedily and at most one is split. Returns the taken instances and
/// the part of `count` that could not be satisfied.
pub fn take_instances(
    bucket: &mut Vec<StageInstance>,
    item: ItemTypeId,
    count: u32,
    older_first: bool,
    now: f64,
) -> (Vec<StageInstance>, u32) {
    let (mut candidates, rest): (Vec<StageInstance>, Vec<StageInstance>) = std::mem::take(bucket)
        .into_iter()
        .partition(|instance| instance.item() == item && instance.count() > 0);
    *bucket = rest;

    candidates.sort_by(|a, b| {
        a.ordinal()
            .cmp(&b.ordinal())
            .then_with(|| a.elapsed(now).total_cmp(&b.elapsed(now)))
    });
    if older_first {
        candidates.reverse();
    }

    let mut needed = count;
    let mut taken = Vec::new();
    for mut instance in candidates {
        if needed == 0 {
            bucket.push(instance);
        } else if instance.count() <= needed {
            needed = needed.saturating_sub(instance.count());
            taken.push(instance);
        } else {
            if let Some(part) = instance.split_off(needed) {
                taken.push(part);
                needed = 0;
            }
            bucket.push(instance);
        }
    }
    (taken, needed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ripen_types::ItemKind;

    use super::*;
    use crate::catalogue::ItemCatalogue;
    use crate::config::{ItemConfig, SourceConfig, StageConfig};
    use crate::engine::advance;

    const APPLE: ItemTypeId = ItemTypeId(0x1001);
    const RIPE: ItemTypeId = ItemTypeId(0x1002);
    const ROTTEN: ItemTypeId = ItemTypeId(0x1003);

    fn make_graph() -> StageGraph {
        let entries: Vec<ItemConfig> = [APPLE, RIPE, ROTTEN]
            .iter()
            .map(|id| ItemConfig {
                id: *id,
                name: format!("item {id}"),
                kind: ItemKind::Food,
                weight: 1.0,
                value: 1,
                armor_rating: 0.0,
                effects: Vec::new(),
            })
            .collect();
        let mut catalogue = ItemCatalogue::from_config(&entries).unwrap();
        let stage = |item, duration| StageConfig {
            no: None,
            item: Some(item),
            duration,
            name: String::new(),
            crafting_allowed: true,
            color: 0,
            effects: Vec::new(),
        };
        let settings = SourceConfig {
            item: APPLE,
            decay_target: ROTTEN,
            stages: vec![stage(APPLE, 5.0), stage(RIPE, 5.0)],
            containers: Vec::new(),
            modulators: Vec::new(),
            transformers: Vec::new(),
        };
        StageGraph::build(&settings, &mut catalogue, 1.0)
    }

    fn make_instance(count: u32, start: f64) -> StageInstance {
        StageInstance::new(APPLE, 0, count, false, start)
    }

    fn total(bucket: &[StageInstance]) -> u32 {
        bucket.iter().map(StageInstance::count).sum()
    }

    #[test]
    fn merge_folds_equivalent_instances() {
        let mut bucket = vec![
            make_instance(2, 1.0),
            make_instance(3, 1.001),
            make_instance(4, 3.0),
            make_instance(1, 1.002),
        ];
        assert_eq!(merge_bucket(&mut bucket, 4.0, 0.015), 2);
        assert_eq!(total(&bucket), 10);
        assert_eq!(bucket.first().map(StageInstance::count), Some(6));

        let report = prune_bucket(&make_graph(), LocationId::new(), &mut bucket, 4.0, 30.0);
        assert_eq!(report.empty, 2);
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn prune_forgets_old_decayed_instances() {
        let graph = make_graph();
        let mut decayed = make_instance(1, 0.0);
        assert!(advance(&mut decayed, &graph, 10.0));
        assert!(decayed.is_decayed());
        let mut bucket = vec![decayed, make_instance(1, 35.0)];

        let report = prune_bucket(&graph, LocationId::new(), &mut bucket, 39.0, 30.0);
        assert_eq!(report.forgotten, 0);
        let report = prune_bucket(&graph, LocationId::new(), &mut bucket, 41.0, 30.0);
        assert_eq!(report.forgotten, 1);
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn prune_drops_invalid_and_reanchors_future_instances() {
        let graph = make_graph();
        let mut bucket = vec![
            StageInstance::new(RIPE, 7, 1, false, 0.0),
            StageInstance::new(ROTTEN, 1, 1, false, 0.0),
            make_instance(1, 50.0),
            make_instance(1, 2.0),
        ];
        let report = prune_bucket(&graph, LocationId::new(), &mut bucket, 10.0, 30.0);
        assert_eq!(report.invalid, 2);
        assert_eq!(report.reanchored, 1);
        assert_eq!(report.total(), 2);
        assert_eq!(bucket.len(), 2);
        assert!(bucket.iter().all(|instance| instance.start_time() <= 10.0));
        assert_eq!(bucket.iter().map(StageInstance::count).sum::<u32>(), 2);
    }

    #[test]
    fn negative_rate_future_start_is_kept() {
        let graph = make_graph();
        let mut instance = StageInstance::new(RIPE, 1, 1, false, 0.0);
        instance.set_delay(0.0, -1.0, None);
        instance.set_new_start(1.0, 2.0);
        assert!(instance.start_time() > 1.0);
        let mut bucket = vec![instance];
        let report = prune_bucket(&graph, LocationId::new(), &mut bucket, 1.0, 30.0);
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn take_older_first_splits_the_newer() {
        let older = make_instance(3, 0.0);
        let newer = make_instance(4, 2.0);
        let mut bucket = vec![newer, older];

        let (taken, remainder) = take_instances(&mut bucket, APPLE, 5, true, 3.0);
        assert_eq!(remainder, 0);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken.first().map(StageInstance::count), Some(3));
        assert_eq!(taken.first().map(StageInstance::start_time), Some(0.0));
        assert_eq!(taken.get(1).map(StageInstance::count), Some(2));
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.first().map(StageInstance::count), Some(2));
        assert_eq!(bucket.first().map(StageInstance::start_time), Some(2.0));
    }

    #[test]
    fn take_younger_first_and_remainder() {
        let mut bucket = vec![make_instance(3, 0.0), make_instance(4, 2.0)];
        let (taken, remainder) = take_instances(&mut bucket, APPLE, 2, false, 3.0);
        assert_eq!(remainder, 0);
        assert_eq!(taken.first().map(StageInstance::start_time), Some(2.0));
        assert_eq!(total(&bucket), 5);

        let (taken, remainder) = take_instances(&mut bucket, APPLE, 9, false, 3.0);
        assert_eq!(total(&taken), 5);
        assert_eq!(remainder, 4);
        assert!(bucket.is_empty());
    }

    #[test]
    fn take_ignores_other_items() {
        let mut bucket = vec![StageInstance::new(RIPE, 1, 5, false, 0.0)];
        let (taken, remainder) = take_instances(&mut bucket, APPLE, 2, true, 1.0);
        assert!(taken.is_empty());
        assert_eq!(remainder, 2);
        assert_eq!(total(&bucket), 5);
    }

    #[test]
    fn report_accumulates() {
        let mut report = MaintenanceReport::default();
        report.absorb(MaintenanceReport {
            merged: 2,
            pruned: PruneReport {
                empty: 1,
                ..PruneReport::default()
            },
            emptied_locations: 1,
        });
        report.absorb(MaintenanceReport {
            merged: 1,
            ..MaintenanceReport::default()
        });
        assert_eq!(report.merged, 3);
        assert_eq!(report.pruned.total(), 1);
    }
}
