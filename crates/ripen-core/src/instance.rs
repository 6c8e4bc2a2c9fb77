//! A count-bearing occurrence of an item sitting at some stage.

use ripen_types::{InstanceRecord, ItemTypeId, LocationId, StageView};

use crate::clock::StageClock;
use crate::graph::StageGraph;

/// A live stage instance.
///
/// Belongs to exactly one `(graph, location)` bucket. `item` always matches
/// the stage at `ordinal`, or the decay or transform target once
/// `is_decayed` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct StageInstance {
    start_time: f64,
    ordinal: u32,
    count: u32,
    item: ItemTypeId,
    is_fake: bool,
    is_decayed: bool,
    clock: StageClock,
}

impl StageInstance {
    /// A fresh instance whose current stage starts at `start_time`.
    pub const fn new(item: ItemTypeId, ordinal: u32, count: u32, is_fake: bool, start_time: f64) -> Self {
        Self {
            start_time,
            ordinal,
            count,
            item,
            is_fake,
            is_decayed: false,
            clock: StageClock::new(start_time),
        }
    }

    /// Rebuild an instance from its persisted record.
    pub const fn from_record(record: &InstanceRecord) -> Self {
        Self {
            start_time: record.start_time,
            ordinal: record.ordinal,
            count: record.count,
            item: record.item,
            is_fake: record.is_fake,
            is_decayed: record.is_decayed,
            clock: StageClock::from_parts(
                record.elapsed_offset,
                record.ref_time,
                record.rate_slope,
                record.modulator,
                record.is_transforming,
                record.transform_offset,
            ),
        }
    }

    /// Flatten into a persisted record.
    pub const fn to_record(&self, source: ItemTypeId, location: LocationId) -> InstanceRecord {
        InstanceRecord {
            source,
            location,
            item: self.item,
            start_time: self.start_time,
            ordinal: self.ordinal,
            count: self.count,
            is_fake: self.is_fake,
            is_decayed: self.is_decayed,
            is_transforming: self.clock.is_transforming(),
            elapsed_offset: self.clock.elapsed_offset(),
            ref_time: self.clock.ref_time(),
            rate_slope: self.clock.rate_slope(),
            modulator: self.clock.modulator(),
            transform_offset: self.clock.transform_offset(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Simulation time at which the current stage began.
    pub const fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Current stage ordinal.
    pub const fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Number of items.
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Item type the instance presents as.
    pub const fn item(&self) -> ItemTypeId {
        self.item
    }

    /// Whether the current stage item is derived.
    pub const fn is_fake(&self) -> bool {
        self.is_fake
    }

    /// Whether the instance reached a terminal item.
    pub const fn is_decayed(&self) -> bool {
        self.is_decayed
    }

    /// Whether a transformation is in progress.
    pub const fn is_transforming(&self) -> bool {
        self.clock.is_transforming()
    }

    /// The embedded clock.
    pub const fn clock(&self) -> &StageClock {
        &self.clock
    }

    /// Elapsed stage time at `t`.
    pub fn elapsed(&self, t: f64) -> f64 {
        self.clock.elapsed(t)
    }

    // -----------------------------------------------------------------------
    // Clock control
    // -----------------------------------------------------------------------

    // A rate change moves the point where elapsed was zero, so the start
    // time is recomputed from the clock after every change.

    /// See [`StageClock::set_delay`].
    pub fn set_delay(&mut self, t: f64, slope: f64, modulator: Option<ItemTypeId>) -> bool {
        let changed = self.clock.set_delay(t, slope, modulator);
        if changed {
            self.start_time = self.clock.stage_start(t);
        }
        changed
    }

    /// See [`StageClock::set_transform`].
    pub fn set_transform(&mut self, t: f64, modulator: ItemTypeId) -> bool {
        let changed = self.clock.set_transform(t, modulator);
        if changed {
            self.start_time = self.clock.stage_start(t);
        }
        changed
    }

    /// See [`StageClock::remove_transform`].
    pub fn remove_transform(&mut self, t: f64) -> bool {
        let changed = self.clock.remove_transform(t);
        if changed {
            self.start_time = self.clock.stage_start(t);
        }
        changed
    }

    /// Re-anchor after crossing a boundary by `overshoot` units at `t`.
    pub fn set_new_start(&mut self, t: f64, overshoot: f64) {
        self.start_time = self.clock.rebase(t, overshoot);
    }

    // -----------------------------------------------------------------------
    // Counts
    // -----------------------------------------------------------------------

    /// Whether `other` is the same occurrence as `self` at `now`: same
    /// stage and item and flags, start times and elapsed values within
    /// `epsilon`.
    pub fn almost_same(&self, other: &Self, now: f64, epsilon: f64) -> bool {
        self.ordinal == other.ordinal
            && self.item == other.item
            && self.is_decayed == other.is_decayed
            && self.is_transforming() == other.is_transforming()
            && self.clock.modulator() == other.clock.modulator()
            && (self.start_time - other.start_time).abs() < epsilon
            && (self.elapsed(now) - other.elapsed(now)).abs() < epsilon
    }

    /// Add `count` items. Returns `false` (and changes nothing) on overflow.
    pub fn absorb(&mut self, count: u32) -> bool {
        match self.count.checked_add(count) {
            Some(total) => {
                self.count = total;
                true
            }
            None => false,
        }
    }

    /// Remove up to `count` items, returning how many were removed.
    pub fn consume(&mut self, count: u32) -> u32 {
        let taken = count.min(self.count);
        self.count = self.count.saturating_sub(taken);
        taken
    }

    /// Split `count` items off into a new instance with identical state.
    ///
    /// Returns `None` unless `0 < count < self.count`.
    pub fn split_off(&mut self, count: u32) -> Option<Self> {
        if count == 0 || count >= self.count {
            return None;
        }
        self.count = self.count.saturating_sub(count);
        let mut part = self.clone();
        part.count = count;
        Some(part)
    }

    // -----------------------------------------------------------------------
    // Engine-only state changes
    // -----------------------------------------------------------------------

    pub(crate) const fn set_stage(&mut self, ordinal: u32, item: ItemTypeId, is_fake: bool) {
        self.ordinal = ordinal;
        self.item = item;
        self.is_fake = is_fake;
    }

    pub(crate) const fn mark_decayed(&mut self, ordinal: u32, item: ItemTypeId) {
        self.ordinal = ordinal;
        self.item = item;
        self.is_fake = false;
        self.is_decayed = true;
    }

    pub(crate) fn finish_transform(&mut self, t: f64, target: ItemTypeId) {
        self.clock.remove_transform(t);
        self.item = target;
        self.is_fake = false;
        self.is_decayed = true;
    }

    // -----------------------------------------------------------------------
    // Display
    // -----------------------------------------------------------------------

    /// Display projection at `now`.
    pub fn view(&self, graph: &StageGraph, now: f64, next_update: Option<f64>) -> StageView {
        let stage = if self.is_decayed {
            Some(graph.decay_stage())
        } else {
            graph.stage(self.ordinal)
        };
        let progress = if self.is_decayed {
            1.0
        } else if let Some(target) = self
            .clock
            .modulator()
            .filter(|_| self.is_transforming())
            .and_then(|modulator| graph.transform_for(modulator))
        {
            self.clock.transform_elapsed(now) / target.threshold
        } else {
            stage.map_or(0.0, |stage| self.elapsed(now) / stage.duration)
        };

        StageView {
            item: self.item,
            name: stage.map_or_else(String::new, |stage| stage.name.clone()),
            ordinal: self.ordinal,
            count: self.count,
            color: stage.map_or(0, |stage| stage.color),
            progress: progress.clamp(0.0, 1.0),
            next_update,
            crafting_allowed: stage.is_some_and(|stage| stage.crafting_allowed),
            is_decayed: self.is_decayed,
            is_transforming: self.is_transforming(),
            modulator: self.clock.modulator(),
        }
    }
}
