//! Scheduler support: wake times, modulator settlement, and a wake queue.
//!
//! The engine never polls. After every update the caller asks for the next
//! time an instance (or a whole location) needs attention and sleeps until
//! then. [`WakeQueue`] is the minimal event queue for doing that: one
//! pending wake per location, earliest first.
//!
//! # Settlement
//!
//! When a location is updated at `now`, some instances may already have
//! crossed a boundary under the rate installed at the previous update.
//! [`settle_modulators`] replays those crossings in time order before the
//! current modulator assignment is installed, so a new rate is never
//! applied retroactively past a boundary. It is a bounded work-list loop:
//! each iteration takes the earliest overdue instance, steps it at its own
//! hitting time, and re-resolves its modulator at that time.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use ripen_types::{LocationId, StageChange};
use tracing::warn;

use crate::engine::{self, step};
use crate::error::CoreError;
use crate::graph::StageGraph;
use crate::instance::StageInstance;
use crate::modulator::{self, ModulatorProbe};

// ---------------------------------------------------------------------------
// Wake times
// ---------------------------------------------------------------------------

/// The next simulation time at which `instance` changes stage, if ever.
pub fn next_update_time(instance: &StageInstance, graph: &StageGraph) -> Option<f64> {
    if instance.is_decayed() || instance.clock().is_frozen() {
        return None;
    }
    let clock = instance.clock();
    let transform = clock
        .modulator()
        .filter(|_| clock.is_transforming())
        .and_then(|modulator| graph.transform_for(modulator));
    if let Some(target) = transform {
        return Some(clock.hitting_time(target.threshold + clock.transform_offset()));
    }
    if graph.stage_count() < 2 && instance.item() == graph.decay_item() {
        return None;
    }
    if clock.slope() > 0.0 {
        graph
            .duration(instance.ordinal())
            .map(|duration| clock.hitting_time(duration))
    } else if instance.ordinal() == 0 {
        None
    } else {
        Some(clock.hitting_time(0.0))
    }
}

/// The earliest wake time across a bucket.
pub fn bucket_next_update(graph: &StageGraph, bucket: &[StageInstance]) -> Option<f64> {
    bucket
        .iter()
        .filter(|instance| instance.count() > 0)
        .filter_map(|instance| next_update_time(instance, graph))
        .min_by(f64::total_cmp)
}

/// The overdue instance with the earliest wake time no later than `now`,
/// skipping indices in `skip`.
pub fn earliest_update(
    graph: &StageGraph,
    bucket: &[StageInstance],
    now: f64,
    skip: &BTreeSet<usize>,
) -> Option<(usize, f64)> {
    bucket
        .iter()
        .enumerate()
        .filter(|(index, instance)| instance.count() > 0 && !skip.contains(index))
        .filter_map(|(index, instance)| {
            next_update_time(instance, graph)
                .filter(|when| *when <= now)
                .map(|when| (index, when))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Replay boundary crossings that happened under the installed rates before
/// `now`, re-resolving modulators at each crossing.
///
/// Stops at a fixed point, when no overdue instance makes progress, or
/// after `max_iterations` crossings.
///
/// # Errors
///
/// Returns [`CoreError::UnhealthyGraph`] if the graph is unhealthy.
pub fn settle_modulators(
    graph: &StageGraph,
    location: LocationId,
    bucket: &mut [StageInstance],
    probe: &dyn ModulatorProbe,
    now: f64,
    max_iterations: u32,
) -> Result<Vec<StageChange>, CoreError> {
    if !graph.is_healthy() {
        return Err(CoreError::unhealthy(graph.source(), graph.fault()));
    }
    let mut changes = Vec::new();
    let mut stalled = BTreeSet::new();
    let mut iterations = 0_u32;

    while let Some((index, when)) = earliest_update(graph, bucket, now, &stalled) {
        if iterations >= max_iterations {
            warn!(
                %location,
                source = %graph.source(),
                iterations,
                time = now,
                "Settlement iteration cap reached"
            );
            break;
        }
        iterations = iterations.saturating_add(1);

        let Some(instance) = bucket.get_mut(index) else {
            break;
        };
        match step(instance, graph, when) {
            Some(transition) => {
                changes.push(transition.into_change(instance, graph.source(), location, when));
                let present = probe.present_modulators(location, when);
                let assignment = modulator::resolve(graph, instance.ordinal(), &present);
                modulator::apply(instance, when, assignment);
            }
            None => {
                stalled.insert(index);
            }
        }
    }
    Ok(changes)
}

/// Bring a bucket up to date at `now`: settle, install the current
/// modulator assignment, then advance everything.
///
/// # Errors
///
/// Returns [`CoreError::UnhealthyGraph`] if the graph is unhealthy.
pub fn update_bucket(
    graph: &StageGraph,
    location: LocationId,
    bucket: &mut [StageInstance],
    probe: &dyn ModulatorProbe,
    now: f64,
    max_iterations: u32,
) -> Result<Vec<StageChange>, CoreError> {
    let mut changes = settle_modulators(graph, location, bucket, probe, now, max_iterations)?;
    let present = probe.present_modulators(location, now);
    modulator::apply_bucket(graph, bucket, &present, now);
    changes.extend(engine::advance_bucket(graph, location, bucket, now)?);
    Ok(changes)
}

// ---------------------------------------------------------------------------
// WakeQueue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct DueEntry {
    at: f64,
    location: LocationId,
}

impl PartialEq for DueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DueEntry {}

impl PartialOrd for DueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at
            .total_cmp(&other.at)
            .then_with(|| self.location.cmp(&other.location))
    }
}

/// Min-queue of location wake times, one live entry per location.
///
/// Rescheduling a location leaves its old heap entry behind; stale entries
/// are recognised by comparing against the latest time and skipped.
#[derive(Debug, Clone, Default)]
pub struct WakeQueue {
    heap: BinaryHeap<Reverse<DueEntry>>,
    latest: BTreeMap<LocationId, u64>,
}

impl WakeQueue {
    /// An empty queue.
    pub const fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            latest: BTreeMap::new(),
        }
    }

    /// Schedule `location` at `at`, replacing any earlier schedule.
    /// Non-finite times are ignored.
    pub fn schedule(&mut self, location: LocationId, at: f64) -> bool {
        if !at.is_finite() {
            return false;
        }
        self.latest.insert(location, at.to_bits());
        self.heap.push(Reverse(DueEntry { at, location }));
        true
    }

    /// Schedule `location` at `at` unless it is already due sooner.
    pub fn schedule_earliest(&mut self, location: LocationId, at: f64) -> bool {
        let sooner = self
            .latest
            .get(&location)
            .is_some_and(|bits| f64::from_bits(*bits) <= at);
        if sooner {
            return false;
        }
        self.schedule(location, at)
    }

    /// Drop the pending wake of `location`.
    pub fn cancel(&mut self, location: LocationId) -> bool {
        self.latest.remove(&location).is_some()
    }

    /// Earliest pending wake time.
    pub fn peek_time(&mut self) -> Option<f64> {
        self.discard_stale();
        self.heap.peek().map(|Reverse(entry)| entry.at)
    }

    /// Pop every location due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: f64) -> Vec<(LocationId, f64)> {
        let mut due = Vec::new();
        loop {
            self.discard_stale();
            let Some(Reverse(entry)) = self.heap.peek().copied() else {
                break;
            };
            if entry.at > now {
                break;
            }
            self.heap.pop();
            self.latest.remove(&entry.location);
            due.push((entry.location, entry.at));
        }
        due
    }

    /// Number of locations with a pending wake.
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.latest.get(&entry.location) == Some(&entry.at.to_bits()) {
                break;
            }
            self.heap.pop();
        }
    }
}
