//! Shared type definitions for the Ripen stage-progression engine.
//!
//! Types defined here are the vocabulary between the engine core and its
//! host. They flow downstream to `TypeScript` via `ts-rs` for any inspection
//! dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Location and item-type identifiers
//! - [`enums`] -- Item kinds and change kinds
//! - [`structs`] -- Change records, persisted instance records, display views

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{ChangeKind, ItemKind};
pub use ids::{ItemTypeId, LocationId};
pub use structs::{InstanceRecord, StageChange, StageEffect, StageView};
