//! Configuration loading and typed config structures for the Ripen engine.
//!
//! The canonical configuration lives in `ripen-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure and a loader that reads the file. The parsed configuration is
//! never mutated after loading; stage graphs are built from it once.

use std::path::Path;

use serde::Deserialize;

use ripen_types::{ItemKind, ItemTypeId, StageEffect};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `ripen-config.yaml`. Every section has
/// defaults, so an empty document is a valid (if inert) configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RipenConfig {
    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Demo driver settings (used by the engine binary only).
    #[serde(default)]
    pub driver: DriverConfig,

    /// Every item type the host recognises.
    #[serde(default)]
    pub catalogue: Vec<ItemConfig>,

    /// Stage settings, one entry per source item type.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl RipenConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `RIPEN_LOG_LEVEL` overrides `logging.level` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to a mapping.
        if yaml.trim().is_empty() {
            let mut config = Self::default();
            config.logging.apply_env_overrides();
            return Ok(config);
        }
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.logging.apply_env_overrides();
        Ok(config)
    }
}

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// How long a decayed instance is kept after its full-decay time.
    #[serde(default = "default_forgetting_window")]
    pub forgetting_window: f64,

    /// Tolerance under which two instances count as the same occurrence.
    #[serde(default = "default_merge_epsilon")]
    pub merge_epsilon: f64,

    /// Upper bound on boundary crossings resolved per settlement pass.
    #[serde(default = "default_settlement_max_iterations")]
    pub settlement_max_iterations: u32,

    /// Nominal duration given to every graph's decay stage.
    #[serde(default = "default_decay_stage_duration")]
    pub decay_stage_duration: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            forgetting_window: default_forgetting_window(),
            merge_epsilon: default_merge_epsilon(),
            settlement_max_iterations: default_settlement_max_iterations(),
            decay_stage_duration: default_decay_stage_duration(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins over
    /// this value when the binary builds its filter.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl LoggingConfig {
    /// Override the level with `RIPEN_LOG_LEVEL` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("RIPEN_LOG_LEVEL") {
            self.level = val;
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Settings for the demo driver in the engine binary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DriverConfig {
    /// Simulation time units advanced per driver tick.
    #[serde(default = "default_time_step")]
    pub time_step: f64,

    /// Real-time milliseconds slept between driver ticks.
    #[serde(default)]
    pub tick_interval_ms: u64,

    /// Number of driver ticks to run.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,

    /// Run a merge/prune pass every N ticks (0 disables).
    #[serde(default = "default_maintenance_interval_ticks")]
    pub maintenance_interval_ticks: u64,

    /// Items placed into the world at time 0.
    #[serde(default)]
    pub seeds: Vec<SeedConfig>,

    /// Modulator items placed into the world.
    #[serde(default)]
    pub modulators: Vec<PlacementConfig>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            time_step: default_time_step(),
            tick_interval_ms: 0,
            max_ticks: default_max_ticks(),
            maintenance_interval_ticks: default_maintenance_interval_ticks(),
            seeds: Vec::new(),
            modulators: Vec::new(),
        }
    }
}

/// A stack of items seeded into a named location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedConfig {
    /// Location name (the driver maps names to location ids).
    pub location: String,
    /// Item type to place.
    pub item: ItemTypeId,
    /// Number of items.
    pub count: u32,
    /// Container type of the location, if it is a container.
    #[serde(default)]
    pub container: Option<ItemTypeId>,
}

/// A modulator item placed into a named location for an interval.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlacementConfig {
    /// Location name.
    pub location: String,
    /// Item type to place.
    pub item: ItemTypeId,
    /// Time the item arrives.
    #[serde(default)]
    pub from: f64,
    /// Time the item is taken away. Absent means it stays.
    #[serde(default)]
    pub until: Option<f64>,
}

/// One catalogue entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemConfig {
    /// Host form id.
    pub id: ItemTypeId,
    /// Display name.
    pub name: String,
    /// Item kind.
    pub kind: ItemKind,
    /// Carry weight.
    #[serde(default)]
    pub weight: f32,
    /// Gold value.
    #[serde(default)]
    pub value: u32,
    /// Armor rating (armor only).
    #[serde(default)]
    pub armor_rating: f32,
    /// Magic effects (consumables and ingredients only).
    #[serde(default)]
    pub effects: Vec<StageEffect>,
}

/// Stage settings for one source item type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    /// The source item type.
    pub item: ItemTypeId,
    /// Item the source becomes once every stage has elapsed.
    pub decay_target: ItemTypeId,
    /// Ordered stage definitions.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    /// Container types in which the source ages. Empty means everywhere.
    #[serde(default)]
    pub containers: Vec<ItemTypeId>,
    /// Time modulators in priority order.
    #[serde(default)]
    pub modulators: Vec<ModulatorConfig>,
    /// Transformers in priority order.
    #[serde(default)]
    pub transformers: Vec<TransformerConfig>,
}

/// One stage of a source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StageConfig {
    /// Explicit ordinal. Defaults to the stage's position in the list.
    #[serde(default)]
    pub no: Option<u32>,
    /// Item the stage presents as. When absent the stage is derived from
    /// the source item (a fake stage) with `effects` applied.
    #[serde(default)]
    pub item: Option<ItemTypeId>,
    /// Stage duration in time units.
    pub duration: f64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Whether the stage item may be used for crafting.
    #[serde(default = "default_true")]
    pub crafting_allowed: bool,
    /// Display color (`0xRRGGBB`).
    #[serde(default = "default_color")]
    pub color: u32,
    /// Effect overrides for fake stages.
    #[serde(default)]
    pub effects: Vec<StageEffect>,
}

/// A time modulator: while present, multiplies the aging rate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModulatorConfig {
    /// Modulator item type.
    pub item: ItemTypeId,
    /// Rate multiplier (negative values reverse aging).
    pub multiplier: f64,
}

/// A transformer: while present for `duration`, turns the source into
/// `target`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransformerConfig {
    /// Transformer item type.
    pub item: ItemTypeId,
    /// Item produced once the threshold is reached.
    pub target: ItemTypeId,
    /// Threshold duration in time units.
    pub duration: f64,
    /// Stage ordinals the transformer acts on. Empty means all stages.
    #[serde(default)]
    pub allowed_stages: Vec<u32>,
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_forgetting_window() -> f64 {
    30.0
}

const fn default_merge_epsilon() -> f64 {
    0.015
}

const fn default_settlement_max_iterations() -> u32 {
    256
}

const fn default_decay_stage_duration() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_time_step() -> f64 {
    0.25
}

const fn default_max_ticks() -> u64 {
    200
}

const fn default_maintenance_interval_ticks() -> u64 {
    20
}

const fn default_true() -> bool {
    true
}

const fn default_color() -> u32 {
    0x00FF_FFFF
}
