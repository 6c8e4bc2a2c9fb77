//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode of startup and of the driver
//! loop so `main` can propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ripen_core::ConfigError,
    },

    /// A core operation failed.
    #[error("core error: {source}")]
    Core {
        /// The underlying core error.
        #[from]
        source: ripen_core::CoreError,
    },

    /// A seed entry could not be placed.
    #[error("seed error at {location}: {message}")]
    Seed {
        /// Location name from the config.
        location: String,
        /// Description of the failure.
        message: String,
    },

    /// The final snapshot could not be serialized.
    #[error("snapshot error: {source}")]
    Snapshot {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}
