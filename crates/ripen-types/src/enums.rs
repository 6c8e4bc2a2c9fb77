//! Enumeration types shared between the engine and its host.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Item kinds
// ---------------------------------------------------------------------------

/// The host-side kind of an item type.
///
/// The kind selects which property payload an item record carries and
/// therefore which properties a stage may override (only consumables and
/// ingredients carry magic effects).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ItemKind {
    /// Edible food with restoring effects.
    Food,
    /// Alchemy ingredient with discoverable effects.
    Ingredient,
    /// Brewed potion or poison.
    Potion,
    /// Wearable armor piece. No effects.
    Armor,
    /// Anything else: clutter, containers, tools. No effects.
    Misc,
}

// ---------------------------------------------------------------------------
// Stage changes
// ---------------------------------------------------------------------------

/// What kind of transition a [`StageChange`](crate::StageChange) describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ChangeKind {
    /// Moved forward one or more stages.
    Advanced,
    /// Moved backward one or more stages under a negative rate.
    Regressed,
    /// Exhausted the stage sequence and became the decay target.
    Decayed,
    /// Completed a transformation into a transformer's target item.
    Transformed,
}
