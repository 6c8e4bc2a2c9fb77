//! Plain records exchanged with the host.
//!
//! Nothing here carries behaviour. [`StageChange`] is what the engine emits
//! for the host to materialize, [`InstanceRecord`] is the flat form an
//! instance takes when the host persists it, and [`StageView`] is the
//! read-only display projection.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::ChangeKind;
use crate::ids::{ItemTypeId, LocationId};

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// One magic effect entry on a consumable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StageEffect {
    /// Host id of the magic effect.
    pub effect: u32,
    /// Effect magnitude.
    #[serde(default)]
    pub magnitude: f64,
    /// Effect duration in host seconds.
    #[serde(default)]
    pub duration: u32,
}

// ---------------------------------------------------------------------------
// StageChange
// ---------------------------------------------------------------------------

/// A stage transition for `count` items at one location.
///
/// The host swaps `count` units of `old_item` for `new_item` at `location`.
/// `new_ordinal` is `None` when the instance left the stage sequence
/// (decayed or transformed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StageChange {
    /// Location bucket the instance lives in.
    pub location: LocationId,
    /// Source item type of the stage graph that produced the change.
    pub source: ItemTypeId,
    /// Item type before the change.
    pub old_item: ItemTypeId,
    /// Item type after the change.
    pub new_item: ItemTypeId,
    /// Stage ordinal before the change.
    pub old_ordinal: u32,
    /// Stage ordinal after the change, if still inside the sequence.
    pub new_ordinal: Option<u32>,
    /// Number of items affected.
    pub count: u32,
    /// Simulation time at which the change took effect.
    pub update_time: f64,
    /// Whether the old item was a derived (fake) stage item.
    pub was_fake: bool,
    /// Transition kind.
    pub kind: ChangeKind,
}

// ---------------------------------------------------------------------------
// InstanceRecord
// ---------------------------------------------------------------------------

/// Flat persisted form of a stage instance.
///
/// Field order is irrelevant; records are keyed by `(source, location)`
/// when restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct InstanceRecord {
    /// Source item type of the owning stage graph.
    pub source: ItemTypeId,
    /// Location bucket.
    pub location: LocationId,
    /// Item type the instance currently presents as.
    pub item: ItemTypeId,
    /// Start time of the current stage.
    pub start_time: f64,
    /// Current stage ordinal.
    pub ordinal: u32,
    /// Number of items.
    pub count: u32,
    /// Whether the current stage item is derived (fake).
    pub is_fake: bool,
    /// Whether the instance has decayed or finished transforming.
    pub is_decayed: bool,
    /// Whether a transformation is in progress.
    pub is_transforming: bool,
    /// Clock: elapsed value captured at `ref_time`.
    pub elapsed_offset: f64,
    /// Clock: reference time.
    pub ref_time: f64,
    /// Clock: rate slope.
    pub rate_slope: f64,
    /// Clock: active modulator, if any.
    pub modulator: Option<ItemTypeId>,
    /// Clock: elapsed value when the current transformation began.
    #[serde(default)]
    pub transform_offset: f64,
}

// ---------------------------------------------------------------------------
// StageView
// ---------------------------------------------------------------------------

/// Read-only display projection of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StageView {
    /// Item type the instance presents as.
    pub item: ItemTypeId,
    /// Stage display name.
    pub name: String,
    /// Stage ordinal.
    pub ordinal: u32,
    /// Number of items.
    pub count: u32,
    /// Stage display color (`0xRRGGBB`).
    pub color: u32,
    /// Fraction of the current stage already elapsed, in `[0, 1]`.
    pub progress: f64,
    /// Next time the instance needs attention, if ever.
    pub next_update: Option<f64>,
    /// Whether the stage item may be used for crafting.
    pub crafting_allowed: bool,
    /// Whether the instance has decayed.
    pub is_decayed: bool,
    /// Whether a transformation is in progress.
    pub is_transforming: bool,
    /// Active modulator, if any.
    pub modulator: Option<ItemTypeId>,
}
