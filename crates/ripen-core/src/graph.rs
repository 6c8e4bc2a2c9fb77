//! Per-source stage graph: ordered stages, a decay target, and the
//! modulators and transformers that act on the source.
//!
//! A [`StageGraph`] is built once from a [`SourceConfig`] and never changes
//! shape afterwards. Construction fails closed: a graph whose settings
//! violate an invariant is still returned, but it carries the
//! [`GraphError`] as its fault and [`is_healthy`](StageGraph::is_healthy)
//! reports `false`. Callers must not use an unhealthy graph.

use std::collections::{BTreeMap, BTreeSet};

use ripen_types::{ItemTypeId, StageEffect};

use crate::catalogue::ItemCatalogue;
use crate::config::SourceConfig;
use crate::error::{CatalogueError, GraphError};

/// Display color used for the decay stage.
const DECAY_COLOR: u32 = 0x0080_8080;

/// One stage of a source.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDefinition {
    /// Item the stage presents as.
    pub item: ItemTypeId,
    /// Duration in time units (always positive).
    pub duration: f64,
    /// Position in the sequence.
    pub ordinal: u32,
    /// Display name.
    pub name: String,
    /// Whether the stage item may be used for crafting.
    pub crafting_allowed: bool,
    /// Effect overrides applied to fake stage items.
    pub effect_overrides: Vec<StageEffect>,
    /// Display color (`0xRRGGBB`).
    pub color: u32,
}

/// What a transformer produces and when.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformTarget {
    /// Item produced.
    pub target: ItemTypeId,
    /// Time the transformer must act before the switch happens.
    pub threshold: f64,
    /// Stages the transformer acts on. Empty means every stage.
    pub allowed_ordinals: BTreeSet<u32>,
}

impl TransformTarget {
    /// Whether the transformer acts on an instance at `ordinal`.
    pub fn allows(&self, ordinal: u32) -> bool {
        self.allowed_ordinals.is_empty() || self.allowed_ordinals.contains(&ordinal)
    }
}

/// A time modulator and its rate multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modulator {
    /// Modulator item type.
    pub item: ItemTypeId,
    /// Rate multiplier.
    pub multiplier: f64,
}

/// The stage sequence of one source item type.
#[derive(Debug, Clone)]
pub struct StageGraph {
    source: ItemTypeId,
    stages: BTreeMap<u32, StageDefinition>,
    fake_ordinals: BTreeSet<u32>,
    decay_stage: StageDefinition,
    transforms: BTreeMap<ItemTypeId, TransformTarget>,
    transform_order: Vec<ItemTypeId>,
    modulators: Vec<Modulator>,
    containers: BTreeSet<ItemTypeId>,
    fault: Option<GraphError>,
}

impl StageGraph {
    /// Build a graph from settings, deriving fake stage items in
    /// `catalogue` as needed.
    ///
    /// Never fails outright: on an invariant violation the returned graph
    /// is unhealthy and carries the error.
    pub fn build(
        settings: &SourceConfig,
        catalogue: &mut ItemCatalogue,
        decay_stage_duration: f64,
    ) -> Self {
        match Self::try_build(settings, catalogue, decay_stage_duration) {
            Ok(graph) => graph,
            Err(fault) => Self::unhealthy(settings.item, settings.decay_target, fault),
        }
    }

    /// Build a graph, returning the first invariant violation as an error.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] describing the violated invariant.
    pub fn try_build(
        settings: &SourceConfig,
        catalogue: &mut ItemCatalogue,
        decay_stage_duration: f64,
    ) -> Result<Self, GraphError> {
        let source_item = settings.item;
        let known = |item: ItemTypeId| {
            if catalogue.contains(item) {
                Ok(())
            } else {
                Err(GraphError::UnknownItem { source_item, item })
            }
        };
        known(source_item)?;
        known(settings.decay_target)?;

        // Ordinals: explicit `no`, else position.
        let mut ordered: Vec<(u32, usize)> = Vec::with_capacity(settings.stages.len());
        for (position, stage) in settings.stages.iter().enumerate() {
            let fallback = u32::try_from(position).map_err(|_err| {
                GraphError::NonContiguousOrdinals {
                    source_item,
                    ordinals: Vec::new(),
                }
            })?;
            ordered.push((stage.no.unwrap_or(fallback), position));
        }
        ordered.sort_unstable();
        let ordinals: Vec<u32> = ordered.iter().map(|(ordinal, _)| *ordinal).collect();
        if ordinals.first() != Some(&0) {
            return Err(GraphError::MissingStageZero { source_item });
        }
        let contiguous = ordinals
            .iter()
            .zip(0_u32..)
            .all(|(ordinal, expected)| *ordinal == expected);
        if !contiguous {
            return Err(GraphError::NonContiguousOrdinals {
                source_item,
                ordinals,
            });
        }

        let mut seen_items = BTreeSet::new();
        for &(ordinal, position) in &ordered {
            let Some(stage) = settings.stages.get(position) else {
                continue;
            };
            if !stage.duration.is_finite() || stage.duration <= 0.0 {
                return Err(GraphError::NonPositiveDuration {
                    source_item,
                    ordinal,
                });
            }
            if let Some(item) = stage.item {
                known(item)?;
                if !seen_items.insert(item) {
                    return Err(GraphError::DuplicateStageItem { source_item, item });
                }
            }
        }
        let stage_count = u32::try_from(ordered.len()).map_err(|_err| {
            GraphError::NonContiguousOrdinals {
                source_item,
                ordinals: Vec::new(),
            }
        })?;

        let mut modulators = Vec::with_capacity(settings.modulators.len());
        for modulator in &settings.modulators {
            if !catalogue.contains(modulator.item) {
                return Err(GraphError::UnknownModulator {
                    source_item,
                    modulator: modulator.item,
                });
            }
            if !modulator.multiplier.is_finite() {
                return Err(GraphError::InvalidMultiplier {
                    source_item,
                    modulator: modulator.item,
                });
            }
            modulators.push(Modulator {
                item: modulator.item,
                multiplier: modulator.multiplier,
            });
        }

        let mut transforms = BTreeMap::new();
        let mut transform_order = Vec::with_capacity(settings.transformers.len());
        for transformer in &settings.transformers {
            if !catalogue.contains(transformer.item) {
                return Err(GraphError::UnknownModulator {
                    source_item,
                    modulator: transformer.item,
                });
            }
            if !catalogue.contains(transformer.target) {
                return Err(GraphError::UnknownTransformTarget {
                    source_item,
                    modulator: transformer.item,
                    target: transformer.target,
                });
            }
            if !transformer.duration.is_finite() || transformer.duration <= 0.0 {
                return Err(GraphError::InvalidThreshold {
                    source_item,
                    modulator: transformer.item,
                });
            }
            if let Some(&ordinal) = transformer
                .allowed_stages
                .iter()
                .find(|ordinal| **ordinal >= stage_count)
            {
                return Err(GraphError::InvalidAllowedOrdinal {
                    source_item,
                    modulator: transformer.item,
                    ordinal,
                });
            }
            if transforms.contains_key(&transformer.item) {
                continue;
            }
            transform_order.push(transformer.item);
            transforms.insert(
                transformer.item,
                TransformTarget {
                    target: transformer.target,
                    threshold: transformer.duration,
                    allowed_ordinals: transformer.allowed_stages.iter().copied().collect(),
                },
            );
        }

        // Everything validated; only now touch the catalogue, and only if
        // every fake stage can get an id.
        let fake_count = ordered
            .iter()
            .filter_map(|(_, position)| settings.stages.get(*position))
            .filter(|stage| stage.item.is_none())
            .count();
        if fake_count > catalogue.dynamic_remaining() {
            return Err(GraphError::Catalogue {
                source_item,
                source: CatalogueError::PoolExhausted,
            });
        }
        let mut stages = BTreeMap::new();
        let mut fake_ordinals = BTreeSet::new();
        for &(ordinal, position) in &ordered {
            let Some(stage) = settings.stages.get(position) else {
                continue;
            };
            let item = match stage.item {
                Some(item) => item,
                None => {
                    fake_ordinals.insert(ordinal);
                    catalogue
                        .derive(source_item, &stage.name, &stage.effects)
                        .map_err(|source| GraphError::Catalogue {
                            source_item,
                            source,
                        })?
                }
            };
            stages.insert(
                ordinal,
                StageDefinition {
                    item,
                    duration: stage.duration,
                    ordinal,
                    name: stage.name.clone(),
                    crafting_allowed: stage.crafting_allowed,
                    effect_overrides: stage.effects.clone(),
                    color: stage.color,
                },
            );
        }

        Ok(Self {
            source: source_item,
            stages,
            fake_ordinals,
            decay_stage: decay_definition(
                settings.decay_target,
                stage_count,
                decay_stage_duration,
                catalogue.name(settings.decay_target).unwrap_or("Decayed"),
            ),
            transforms,
            transform_order,
            modulators,
            containers: settings.containers.iter().copied().collect(),
            fault: None,
        })
    }

    /// An empty graph that refuses all work.
    pub fn unhealthy(source: ItemTypeId, decay_target: ItemTypeId, fault: GraphError) -> Self {
        Self {
            source,
            stages: BTreeMap::new(),
            fake_ordinals: BTreeSet::new(),
            decay_stage: decay_definition(decay_target, 0, 1.0, "Decayed"),
            transforms: BTreeMap::new(),
            transform_order: Vec::new(),
            modulators: Vec::new(),
            containers: BTreeSet::new(),
            fault: Some(fault),
        }
    }

    /// Whether the graph may be used.
    pub const fn is_healthy(&self) -> bool {
        self.fault.is_none()
    }

    /// The construction or invalidation failure, if any.
    pub const fn fault(&self) -> Option<&GraphError> {
        self.fault.as_ref()
    }

    /// Mark the graph unhealthy after the fact. Permanent.
    pub fn invalidate(&mut self, reason: &str) {
        if self.fault.is_none() {
            self.fault = Some(GraphError::Invalidated {
                source_item: self.source,
                reason: reason.to_owned(),
            });
        }
    }

    /// The source item type.
    pub const fn source(&self) -> ItemTypeId {
        self.source
    }

    /// Stage at `ordinal`.
    pub fn stage(&self, ordinal: u32) -> Option<&StageDefinition> {
        self.stages.get(&ordinal)
    }

    /// Duration of the stage at `ordinal`.
    pub fn duration(&self, ordinal: u32) -> Option<f64> {
        self.stages.get(&ordinal).map(|stage| stage.duration)
    }

    /// Whether `ordinal` is a stage of this graph.
    pub fn has_stage(&self, ordinal: u32) -> bool {
        self.stages.contains_key(&ordinal)
    }

    /// Number of stages (excluding the decay stage).
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Iterate stages in order.
    pub fn stages(&self) -> impl Iterator<Item = &StageDefinition> {
        self.stages.values()
    }

    /// Whether the stage at `ordinal` presents as a derived item.
    pub fn is_fake(&self, ordinal: u32) -> bool {
        self.fake_ordinals.contains(&ordinal)
    }

    /// The terminal decay stage.
    pub const fn decay_stage(&self) -> &StageDefinition {
        &self.decay_stage
    }

    /// The decay target item.
    pub const fn decay_item(&self) -> ItemTypeId {
        self.decay_stage.item
    }

    /// Sum of all stage durations: time from stage 0 to decay at rate 1.
    pub fn total_duration(&self) -> f64 {
        self.stages.values().map(|stage| stage.duration).sum()
    }

    /// The stage ordinal an item corresponds to. The source item maps to
    /// stage 0 when stage 0 is a derived item.
    pub fn ordinal_of(&self, item: ItemTypeId) -> Option<u32> {
        self.stages
            .values()
            .find(|stage| stage.item == item)
            .map(|stage| stage.ordinal)
            .or_else(|| (item == self.source && self.has_stage(0)).then_some(0))
    }

    /// Every item this graph tracks: the source and each stage item.
    pub fn tracked_items(&self) -> BTreeSet<ItemTypeId> {
        let mut items: BTreeSet<ItemTypeId> = self.stages.values().map(|stage| stage.item).collect();
        if self.has_stage(0) {
            items.insert(self.source);
        }
        items
    }

    /// Transformation registered for a transformer item.
    pub fn transform_for(&self, modulator: ItemTypeId) -> Option<&TransformTarget> {
        self.transforms.get(&modulator)
    }

    /// Transformers in priority order.
    pub fn transformers(&self) -> impl Iterator<Item = (ItemTypeId, &TransformTarget)> {
        self.transform_order
            .iter()
            .filter_map(|item| self.transforms.get(item).map(|target| (*item, target)))
    }

    /// Items this graph's instances can end up as: the decay target and
    /// every transformation target.
    pub fn terminal_items(&self) -> BTreeSet<ItemTypeId> {
        std::iter::once(self.decay_item())
            .chain(self.transforms.values().map(|t| t.target))
            .collect()
    }

    /// Whether an item is a possible terminal item of this graph.
    pub fn is_terminal_item(&self, item: ItemTypeId) -> bool {
        item == self.decay_item() || self.transforms.values().any(|t| t.target == item)
    }

    /// Time modulators in priority order.
    pub fn modulators(&self) -> &[Modulator] {
        &self.modulators
    }

    /// Whether items inside a container of type `container` age. Items not
    /// in any container always age.
    pub fn allows_container(&self, container: Option<ItemTypeId>) -> bool {
        container.is_none_or(|container| {
            self.containers.is_empty() || self.containers.contains(&container)
        })
    }
}

fn decay_definition(item: ItemTypeId, ordinal: u32, duration: f64, name: &str) -> StageDefinition {
    StageDefinition {
        item,
        duration: if duration.is_finite() && duration > 0.0 {
            duration
        } else {
            1.0
        },
        ordinal,
        name: name.to_owned(),
        crafting_allowed: false,
        effect_overrides: Vec::new(),
        color: DECAY_COLOR,
    }
}
