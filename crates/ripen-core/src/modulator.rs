//! Modulator probe trait and rate assignment.
//!
//! The engine never looks at the world itself. A [`ModulatorProbe`] tells
//! it which item types are present at a location at a given time, and
//! [`resolve`] turns that into an [`Assignment`] for one instance using the
//! graph's priority order:
//!
//! 1. the first configured transformer that is present and acts on the
//!    instance's stage;
//! 2. otherwise the first configured time modulator that is present;
//! 3. otherwise nothing (rate 1).
//!
//! [`StaticModulatorProbe`] is an in-memory probe with per-placement time
//! intervals, used by the driver binary and by tests.

use std::collections::BTreeMap;

use ripen_types::{ItemTypeId, LocationId};

use crate::graph::StageGraph;
use crate::instance::StageInstance;

/// Source of modulator presence information.
pub trait ModulatorProbe {
    /// Item types present at `location` at simulation time `at`.
    fn present_modulators(&self, location: LocationId, at: f64) -> Vec<ItemTypeId>;
}

/// A probe that reports nothing anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModulators;

impl ModulatorProbe for NoModulators {
    fn present_modulators(&self, _location: LocationId, _at: f64) -> Vec<ItemTypeId> {
        Vec::new()
    }
}

/// One modulator placement with its presence interval.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Placement {
    item: ItemTypeId,
    from: f64,
    until: Option<f64>,
}

impl Placement {
    fn covers(&self, at: f64) -> bool {
        self.from <= at && self.until.is_none_or(|until| at < until)
    }
}

/// In-memory probe backed by placement intervals.
#[derive(Debug, Clone, Default)]
pub struct StaticModulatorProbe {
    placements: BTreeMap<LocationId, Vec<Placement>>,
}

impl StaticModulatorProbe {
    /// An empty probe.
    pub const fn new() -> Self {
        Self {
            placements: BTreeMap::new(),
        }
    }

    /// Place `item` at `location`, present from time `from` onward.
    pub fn place(&mut self, location: LocationId, item: ItemTypeId, from: f64) {
        self.placements.entry(location).or_default().push(Placement {
            item,
            from,
            until: None,
        });
    }

    /// Remove an open placement of `item` at `location` as of time `at`.
    ///
    /// Returns whether a placement was closed.
    pub fn remove(&mut self, location: LocationId, item: ItemTypeId, at: f64) -> bool {
        let Some(placements) = self.placements.get_mut(&location) else {
            return false;
        };
        placements
            .iter_mut()
            .find(|placement| placement.item == item && placement.until.is_none())
            .map(|placement| placement.until = Some(at.max(placement.from)))
            .is_some()
    }
}

impl ModulatorProbe for StaticModulatorProbe {
    fn present_modulators(&self, location: LocationId, at: f64) -> Vec<ItemTypeId> {
        self.placements
            .get(&location)
            .map(|placements| {
                let mut items: Vec<ItemTypeId> = placements
                    .iter()
                    .filter(|placement| placement.covers(at))
                    .map(|placement| placement.item)
                    .collect();
                items.dedup();
                items
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// What should act on an instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Assignment {
    /// No modulator; rate 1.
    Free,
    /// A time modulator scaling the rate.
    Delay {
        /// The modulator item.
        modulator: ItemTypeId,
        /// Its rate multiplier.
        rate: f64,
    },
    /// A transformer.
    Transform {
        /// The transformer item.
        modulator: ItemTypeId,
    },
}

/// Pick the assignment for an instance at `ordinal` given the present items.
pub fn resolve(graph: &StageGraph, ordinal: u32, present: &[ItemTypeId]) -> Assignment {
    if let Some((modulator, _)) = graph
        .transformers()
        .find(|(item, target)| present.contains(item) && target.allows(ordinal))
    {
        return Assignment::Transform { modulator };
    }
    graph
        .modulators()
        .iter()
        .find(|modulator| present.contains(&modulator.item))
        .map_or(Assignment::Free, |modulator| Assignment::Delay {
            modulator: modulator.item,
            rate: modulator.multiplier,
        })
}

/// Install `assignment` on `instance` at time `t`. Returns whether the
/// instance's clock changed.
pub fn apply(instance: &mut StageInstance, t: f64, assignment: Assignment) -> bool {
    if instance.is_decayed() {
        return false;
    }
    match assignment {
        Assignment::Transform { modulator } => instance.set_transform(t, modulator),
        Assignment::Delay { modulator, rate } => {
            let removed = instance.remove_transform(t);
            instance.set_delay(t, rate, Some(modulator)) || removed
        }
        Assignment::Free => {
            let removed = instance.remove_transform(t);
            instance.set_delay(t, 1.0, None) || removed
        }
    }
}

/// Resolve and install the assignment for every live instance in a bucket.
pub fn apply_bucket(
    graph: &StageGraph,
    bucket: &mut [StageInstance],
    present: &[ItemTypeId],
    t: f64,
) -> usize {
    bucket
        .iter_mut()
        .filter(|instance| instance.count() > 0 && !instance.is_decayed())
        .map(|instance| {
            let assignment = resolve(graph, instance.ordinal(), present);
            apply(instance, t, assignment)
        })
        .filter(|changed| *changed)
        .count()
}
