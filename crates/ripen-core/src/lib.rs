//! Stage progression core for the Ripen decay engine.
//!
//! Items age through an ordered sequence of stages and end in a terminal
//! decayed item. Every instance carries an affine clock, so the exact time
//! of its next stage change is always known and nothing has to be polled.
//!
//! # Modules
//!
//! - [`catalogue`] -- Recognised item types, the [`ItemProperties`]
//!   capability trait, and the derived (fake) item pool.
//! - [`clock`] -- The affine elapsed-time clock embedded in each instance.
//! - [`config`] -- Configuration loading from `ripen-config.yaml` into
//!   strongly-typed structs.
//! - [`engine`] -- The per-instance progression state machine.
//! - [`error`] -- Construction and runtime error types.
//! - [`graph`] -- Per-source stage graphs with fail-closed construction.
//! - [`instance`] -- Count-bearing stage instances.
//! - [`maintenance`] -- Merge, prune, and count-preserving transfer.
//! - [`modulator`] -- [`ModulatorProbe`] trait and rate assignment.
//! - [`registry`] -- The [`Registry`] owning every graph and store.
//! - [`schedule`] -- Wake times, modulator settlement, and [`WakeQueue`].
//! - [`store`] -- Per-location instance buckets.
//!
//! [`ItemProperties`]: catalogue::ItemProperties
//! [`ModulatorProbe`]: modulator::ModulatorProbe
//! [`Registry`]: registry::Registry
//! [`WakeQueue`]: schedule::WakeQueue

pub mod catalogue;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod instance;
pub mod maintenance;
pub mod modulator;
pub mod registry;
pub mod schedule;
pub mod store;

pub use catalogue::{ItemCatalogue, ItemProperties};
pub use clock::StageClock;
pub use config::{ConfigError, RipenConfig};
pub use error::{CatalogueError, CoreError, GraphError};
pub use graph::StageGraph;
pub use instance::StageInstance;
pub use modulator::{ModulatorProbe, NoModulators, StaticModulatorProbe};
pub use registry::Registry;
pub use schedule::WakeQueue;
pub use store::InstanceStore;
