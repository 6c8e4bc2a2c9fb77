//! Stage progression: moving instances across stage boundaries.
//!
//! [`step`] is the whole state machine for one instance at one time:
//!
//! 1. Decayed instances are terminal and never change.
//! 2. A transforming instance switches to its transform target once the
//!    transformer has acted for its threshold. If the graph no longer knows
//!    the transformer, the transformation is dropped and normal progression
//!    applies.
//! 3. A single-stage graph whose only stage is the decay target just
//!    re-anchors.
//! 4. Otherwise the elapsed value is walked backward (negative rate) or
//!    forward across as many boundaries as it covers. Running off the end
//!    of the sequence decays the instance.
//!
//! Boundaries are compared with [`BOUNDARY_TOLERANCE`] so that stepping an
//! instance at its own hitting time always crosses.

use ripen_types::{ChangeKind, ItemTypeId, LocationId, StageChange};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::graph::StageGraph;
use crate::instance::StageInstance;
use crate::schedule::next_update_time;

/// Slack allowed when comparing an elapsed value against a boundary.
pub const BOUNDARY_TOLERANCE: f64 = 1e-9;

/// What an instance looked like before a transition, and how it changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Item before the change.
    pub old_item: ItemTypeId,
    /// Ordinal before the change.
    pub old_ordinal: u32,
    /// Whether the old item was derived.
    pub was_fake: bool,
    /// Kind of change.
    pub kind: ChangeKind,
}

impl Transition {
    /// Build the change record for `instance` after this transition.
    pub fn into_change(
        self,
        instance: &StageInstance,
        source: ItemTypeId,
        location: LocationId,
        update_time: f64,
    ) -> StageChange {
        StageChange {
            location,
            source,
            old_item: self.old_item,
            new_item: instance.item(),
            old_ordinal: self.old_ordinal,
            new_ordinal: (!instance.is_decayed()).then_some(instance.ordinal()),
            count: instance.count(),
            update_time,
            was_fake: self.was_fake,
            kind: self.kind,
        }
    }
}

/// Advance or regress `instance` to time `t`.
///
/// Returns the transition if the instance changed stage or item.
pub fn step(instance: &mut StageInstance, graph: &StageGraph, t: f64) -> Option<Transition> {
    if instance.is_decayed() {
        return None;
    }
    let old_item = instance.item();
    let old_ordinal = instance.ordinal();
    let was_fake = instance.is_fake();
    let transition = |kind| Transition {
        old_item,
        old_ordinal,
        was_fake,
        kind,
    };

    if instance.is_transforming() {
        let active = instance
            .clock()
            .modulator()
            .and_then(|modulator| graph.transform_for(modulator))
            .map(|target| (target.target, target.threshold));
        if let Some((target, threshold)) = active {
            let progress = instance.clock().transform_elapsed(t);
            if progress + BOUNDARY_TOLERANCE < threshold {
                return None;
            }
            instance.finish_transform(t, target);
            instance.set_new_start(t, (progress - threshold).max(0.0));
            return Some(transition(ChangeKind::Transformed));
        }
        instance.remove_transform(t);
    }

    if graph.stage_count() < 2 && instance.item() == graph.decay_item() {
        instance.set_new_start(t, 0.0);
        return None;
    }

    // An ordinal the graph no longer has is left for the prune pass.
    graph.duration(old_ordinal)?;

    let mut ordinal = old_ordinal;
    let mut diff = instance.elapsed(t);
    let mut decayed = false;
    let mut clamped = false;

    let regress =
        diff < -BOUNDARY_TOLERANCE || (instance.clock().slope() < 0.0 && diff <= BOUNDARY_TOLERANCE);
    if regress {
        while diff <= BOUNDARY_TOLERANCE {
            let Some(previous) = ordinal.checked_sub(1) else {
                diff = 0.0;
                clamped = true;
                break;
            };
            let Some(duration) = graph.duration(previous) else {
                break;
            };
            ordinal = previous;
            diff += duration;
        }
    } else {
        loop {
            let Some(duration) = graph.duration(ordinal) else {
                decayed = true;
                break;
            };
            if diff + BOUNDARY_TOLERANCE < duration {
                break;
            }
            diff = (diff - duration).max(0.0);
            let Some(next) = ordinal.checked_add(1) else {
                decayed = true;
                break;
            };
            ordinal = next;
        }
    }

    if ordinal == old_ordinal && !decayed {
        if clamped {
            instance.set_new_start(t, 0.0);
        }
        return None;
    }

    let kind = if decayed {
        instance.mark_decayed(ordinal, graph.decay_item());
        ChangeKind::Decayed
    } else {
        let stage = graph.stage(ordinal)?;
        instance.set_stage(ordinal, stage.item, graph.is_fake(ordinal));
        if ordinal < old_ordinal {
            ChangeKind::Regressed
        } else {
            ChangeKind::Advanced
        }
    };
    instance.set_new_start(t, diff);
    Some(transition(kind))
}

/// Advance `instance` to `t`, returning whether it changed.
pub fn advance(instance: &mut StageInstance, graph: &StageGraph, t: f64) -> bool {
    step(instance, graph, t).is_some()
}

/// Advance every instance in a bucket to `t`.
///
/// # Errors
///
/// Returns [`CoreError::UnhealthyGraph`] without touching the bucket if the
/// graph is unhealthy.
pub fn advance_bucket(
    graph: &StageGraph,
    location: LocationId,
    bucket: &mut [StageInstance],
    t: f64,
) -> Result<Vec<StageChange>, CoreError> {
    if !graph.is_healthy() {
        return Err(CoreError::unhealthy(graph.source(), graph.fault()));
    }
    let mut changes = Vec::new();
    for instance in bucket.iter_mut().filter(|instance| instance.count() > 0) {
        if let Some(transition) = step(instance, graph, t) {
            let change = transition.into_change(instance, graph.source(), location, t);
            debug!(
                %location,
                source = %change.source,
                old = %change.old_item,
                new = %change.new_item,
                count = change.count,
                kind = ?change.kind,
                time = t,
                "Stage changed"
            );
            changes.push(change);
        }
        correct_anomaly(instance, graph, location, t);
    }
    Ok(changes)
}

/// Re-anchor an instance whose next wake time is not in the future.
pub(crate) fn correct_anomaly(
    instance: &mut StageInstance,
    graph: &StageGraph,
    location: LocationId,
    t: f64,
) {
    let Some(next) = next_update_time(instance, graph) else {
        return;
    };
    if next > t {
        return;
    }
    warn!(
        %location,
        source = %graph.source(),
        ordinal = instance.ordinal(),
        next,
        time = t,
        "Next update is not in the future, re-anchoring"
    );
    if !instance.is_transforming() {
        instance.set_new_start(t, 0.0);
    }
}
