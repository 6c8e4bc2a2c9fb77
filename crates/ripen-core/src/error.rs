//! Error types for the `ripen-core` crate.
//!
//! Construction failures are [`GraphError`]s and are stored on the graph
//! that failed, which then refuses every operation. Runtime failures reach
//! callers as [`CoreError`].

use ripen_types::ItemTypeId;

/// Why a stage graph could not be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The graph has no stage with ordinal 0.
    #[error("source {source_item} has no stage 0")]
    MissingStageZero {
        /// The source item type.
        source_item: ItemTypeId,
    },

    /// Stage ordinals do not form `0..N` without gaps or duplicates.
    #[error("source {source_item} stage ordinals are not contiguous: {ordinals:?}")]
    NonContiguousOrdinals {
        /// The source item type.
        source_item: ItemTypeId,
        /// The ordinals as configured, sorted.
        ordinals: Vec<u32>,
    },

    /// A stage has a duration that is zero, negative, or not finite.
    #[error("source {source_item} stage {ordinal} has non-positive duration")]
    NonPositiveDuration {
        /// The source item type.
        source_item: ItemTypeId,
        /// The offending stage.
        ordinal: u32,
    },

    /// An item referenced by the settings is not in the catalogue.
    #[error("source {source_item} references unknown item {item}")]
    UnknownItem {
        /// The source item type.
        source_item: ItemTypeId,
        /// The unresolved item.
        item: ItemTypeId,
    },

    /// Two stages present as the same item type.
    #[error("source {source_item} uses item {item} for more than one stage")]
    DuplicateStageItem {
        /// The source item type.
        source_item: ItemTypeId,
        /// The repeated item.
        item: ItemTypeId,
    },

    /// A transformer's target item is not in the catalogue.
    #[error("source {source_item} transformer {modulator} targets unknown item {target}")]
    UnknownTransformTarget {
        /// The source item type.
        source_item: ItemTypeId,
        /// The transformer item.
        modulator: ItemTypeId,
        /// The unresolved target.
        target: ItemTypeId,
    },

    /// A modulator or transformer item is not in the catalogue.
    #[error("source {source_item} references unknown modulator {modulator}")]
    UnknownModulator {
        /// The source item type.
        source_item: ItemTypeId,
        /// The unresolved modulator.
        modulator: ItemTypeId,
    },

    /// A transformer lists a stage ordinal the graph does not have.
    #[error("source {source_item} transformer {modulator} allows missing stage {ordinal}")]
    InvalidAllowedOrdinal {
        /// The source item type.
        source_item: ItemTypeId,
        /// The transformer item.
        modulator: ItemTypeId,
        /// The missing ordinal.
        ordinal: u32,
    },

    /// A modulator multiplier is not a finite number.
    #[error("source {source_item} modulator {modulator} has a non-finite multiplier")]
    InvalidMultiplier {
        /// The source item type.
        source_item: ItemTypeId,
        /// The offending modulator.
        modulator: ItemTypeId,
    },

    /// A transformer threshold is not a finite positive number.
    #[error("source {source_item} transformer {modulator} has non-positive threshold")]
    InvalidThreshold {
        /// The source item type.
        source_item: ItemTypeId,
        /// The offending transformer.
        modulator: ItemTypeId,
    },

    /// Deriving a fake stage item failed.
    #[error("source {source_item} could not derive stage item: {source}")]
    Catalogue {
        /// The source item type.
        source_item: ItemTypeId,
        /// The underlying catalogue error.
        source: CatalogueError,
    },

    /// The graph was marked unhealthy after construction.
    #[error("source {source_item} was invalidated: {reason}")]
    Invalidated {
        /// The source item type.
        source_item: ItemTypeId,
        /// Why it was invalidated.
        reason: String,
    },
}

/// Errors raised by the item catalogue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogueError {
    /// The same id was registered twice.
    #[error("duplicate item id: {0}")]
    DuplicateItem(ItemTypeId),

    /// The id falls inside the range reserved for derived items.
    #[error("item id {0} is inside the reserved dynamic range")]
    ReservedId(ItemTypeId),

    /// A derived item was requested from an unknown base item.
    #[error("unknown base item: {0}")]
    UnknownItem(ItemTypeId),

    /// Every dynamic id has been handed out.
    #[error("dynamic item pool exhausted")]
    PoolExhausted,
}

/// Errors surfaced by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The stage graph for the source is unhealthy and refuses all work.
    #[error("stage graph for {source_item} is unhealthy: {reason}")]
    UnhealthyGraph {
        /// The source item type.
        source_item: ItemTypeId,
        /// The construction or invalidation failure.
        reason: String,
    },

    /// No stage graph tracks this item type.
    #[error("item {0} is not tracked by any stage graph")]
    UntrackedItem(ItemTypeId),

    /// No stage graph exists for this source item type.
    #[error("unknown source item: {0}")]
    UnknownSource(ItemTypeId),

    /// A count of zero was supplied where a positive count is required.
    #[error("count must be positive")]
    InvalidCount,

    /// The catalogue rejected an operation.
    #[error("catalogue error: {source}")]
    Catalogue {
        /// The underlying catalogue error.
        #[from]
        source: CatalogueError,
    },
}

impl CoreError {
    /// Build an [`CoreError::UnhealthyGraph`] from a stored graph fault.
    pub fn unhealthy(source_item: ItemTypeId, fault: Option<&GraphError>) -> Self {
        Self::UnhealthyGraph {
            source_item,
            reason: fault.map_or_else(|| "unknown fault".to_owned(), ToString::to_string),
        }
    }
}
