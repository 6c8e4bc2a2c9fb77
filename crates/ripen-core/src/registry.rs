//! The registry: every stage graph, its instance store, and the catalogue.
//!
//! A [`Registry`] is built once from configuration and passed by reference
//! to whoever drives the engine. Each source gets its own
//! [`parking_lot::RwLock`], so all mutation of one graph's store is
//! serialized while display queries share a read lock. No operation ever
//! holds two source locks at once.
//!
//! # Cascades
//!
//! When an instance decays or transforms into an item that another source
//! tracks (rotten apples feeding a compost graph), the decayed instance is
//! handed off: it leaves its own store and is registered with the other
//! source at its decay time, then that source is brought up to date too.
//! Hand-offs run through a work-list bounded by the number of sources.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use ripen_types::{InstanceRecord, ItemTypeId, LocationId, StageChange, StageView};
use tracing::{debug, info, warn};

use crate::catalogue::ItemCatalogue;
use crate::config::{EngineConfig, RipenConfig, SourceConfig};
use crate::error::CoreError;
use crate::graph::StageGraph;
use crate::instance::StageInstance;
use crate::maintenance::{self, MaintenanceReport};
use crate::modulator::ModulatorProbe;
use crate::schedule;
use crate::store::InstanceStore;

/// One source's graph and its live instances.
#[derive(Debug)]
struct SourceState {
    graph: StageGraph,
    store: InstanceStore,
}

/// All stage graphs and instance stores.
#[derive(Debug)]
pub struct Registry {
    catalogue: ItemCatalogue,
    engine: EngineConfig,
    sources: BTreeMap<ItemTypeId, RwLock<SourceState>>,
    index: BTreeMap<ItemTypeId, ItemTypeId>,
    /// Terminal items no graph tracks, mapped to the sources whose stores
    /// may still hold them.
    holders: BTreeMap<ItemTypeId, Vec<ItemTypeId>>,
}

impl Registry {
    /// Build the catalogue and every graph from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Catalogue`] if the catalogue itself is invalid.
    /// Invalid sources do not fail the registry; they become unhealthy
    /// slots.
    pub fn from_config(config: &RipenConfig) -> Result<Self, CoreError> {
        let catalogue = ItemCatalogue::from_config(&config.catalogue)?;
        Ok(Self::new(catalogue, &config.sources, config.engine.clone()))
    }

    /// Build a graph for every source over an existing catalogue.
    pub fn new(mut catalogue: ItemCatalogue, sources: &[SourceConfig], engine: EngineConfig) -> Self {
        let mut slots = BTreeMap::new();
        let mut index = BTreeMap::new();

        for settings in sources {
            if slots.contains_key(&settings.item) {
                warn!(source = %settings.item, "Duplicate source settings ignored");
                continue;
            }
            let graph = StageGraph::build(settings, &mut catalogue, engine.decay_stage_duration);
            let tracked = match graph.fault() {
                None => graph.tracked_items(),
                Some(err) => {
                    warn!(source = %settings.item, %err, "Stage graph is unhealthy");
                    std::iter::once(settings.item).collect()
                }
            };
            for item in tracked {
                if let Some(owner) = index.get(&item) {
                    warn!(%item, source = %settings.item, owner = %owner, "Item already tracked");
                    continue;
                }
                index.insert(item, settings.item);
            }
            slots.insert(
                settings.item,
                RwLock::new(SourceState {
                    graph,
                    store: InstanceStore::new(),
                }),
            );
        }

        let mut holders: BTreeMap<ItemTypeId, Vec<ItemTypeId>> = BTreeMap::new();
        for (source, slot) in &slots {
            let state = slot.read();
            if !state.graph.is_healthy() {
                continue;
            }
            for item in state.graph.terminal_items() {
                if !index.contains_key(&item) {
                    holders.entry(item).or_default().push(*source);
                }
            }
        }

        info!(
            sources = slots.len(),
            tracked_items = index.len(),
            terminal_items = holders.len(),
            derived_items = catalogue.dynamic_count(),
            "Registry ready"
        );
        Self {
            catalogue,
            engine,
            sources: slots,
            index,
            holders,
        }
    }

    /// Clear every store and release derived catalogue items.
    ///
    /// Returns the number of derived items released.
    pub fn teardown(mut self) -> usize {
        for slot in self.sources.values() {
            slot.write().store.clear();
        }
        self.sources.clear();
        self.index.clear();
        self.holders.clear();
        self.catalogue.release_dynamic()
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// The item catalogue, including derived stage items.
    pub const fn catalogue(&self) -> &ItemCatalogue {
        &self.catalogue
    }

    /// Engine settings in effect.
    pub const fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    /// Source item types with a graph slot.
    pub fn sources(&self) -> impl Iterator<Item = ItemTypeId> + '_ {
        self.sources.keys().copied()
    }

    /// The source whose graph tracks `item`.
    pub fn source_for(&self, item: ItemTypeId) -> Option<ItemTypeId> {
        self.index.get(&item).copied()
    }

    /// Whether any graph tracks `item`.
    pub fn is_tracked(&self, item: ItemTypeId) -> bool {
        self.index.contains_key(&item)
    }

    /// Whether the graph for `source` exists and is healthy.
    pub fn is_healthy(&self, source: ItemTypeId) -> bool {
        self.sources
            .get(&source)
            .is_some_and(|slot| slot.read().graph.is_healthy())
    }

    /// Run `f` against the graph for `source` under a read lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownSource`] or [`CoreError::UnhealthyGraph`].
    pub fn with_graph<R>(&self, source: ItemTypeId, f: impl FnOnce(&StageGraph) -> R) -> Result<R, CoreError> {
        let state = self.read_healthy(source)?;
        Ok(f(&state.graph))
    }

    // -----------------------------------------------------------------------
    // Registration and updates
    // -----------------------------------------------------------------------

    /// Start tracking `count` items of `item` at `location` as of time `t`.
    ///
    /// Returns `Ok(false)` when the container does not let the item age.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidCount`] for a zero count,
    /// [`CoreError::UntrackedItem`] if no graph tracks the item, and
    /// [`CoreError::UnhealthyGraph`] if its graph is unhealthy.
    pub fn register(
        &self,
        location: LocationId,
        container: Option<ItemTypeId>,
        item: ItemTypeId,
        count: u32,
        t: f64,
    ) -> Result<bool, CoreError> {
        if count == 0 {
            return Err(CoreError::InvalidCount);
        }
        let source = self.source_for(item).ok_or(CoreError::UntrackedItem(item))?;
        let mut state = self.write_healthy(source)?;
        let SourceState { graph, store } = &mut *state;

        if !graph.allows_container(container) {
            debug!(%location, %item, container = ?container, "Container does not allow aging");
            return Ok(false);
        }
        let instance = fresh_instance(graph, item, count, t)?;
        store.insert(location, instance, t, self.engine.merge_epsilon);
        debug!(%location, %source, %item, count, time = t, "Registered items");
        Ok(true)
    }

    /// Bring every instance at `location` up to date at `now`.
    ///
    /// Returns the stage changes in the order they happened per source,
    /// including changes in sources reached through hand-offs.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnhealthyGraph`] if a graph with instances at the
    /// location became unhealthy.
    pub fn update_location(
        &self,
        location: LocationId,
        now: f64,
        probe: &dyn ModulatorProbe,
    ) -> Result<Vec<StageChange>, CoreError> {
        let mut pending: VecDeque<ItemTypeId> = self
            .sources
            .iter()
            .filter(|(_, slot)| slot.read().store.contains_location(location))
            .map(|(source, _)| *source)
            .collect();
        let mut budget = self.sources.len().saturating_mul(2).max(1);
        let mut changes = Vec::new();

        while let Some(source) = pending.pop_front() {
            if budget == 0 {
                warn!(%location, time = now, pending = pending.len(), "Hand-off budget exhausted");
                break;
            }
            budget = budget.saturating_sub(1);

            let handoffs = self.update_source(source, location, now, probe, &mut changes)?;
            for (target, instance) in handoffs {
                match self.adopt(target, location, &instance, now) {
                    Ok(()) => {
                        if !pending.contains(&target) {
                            pending.push_back(target);
                        }
                    }
                    Err(err) => {
                        warn!(%location, %source, %target, %err, "Hand-off failed, keeping items");
                        self.write_slot(source)?.store.push(location, instance);
                    }
                }
            }
        }
        Ok(changes)
    }

    /// Earliest time anything at `location` needs attention.
    pub fn next_update_time(&self, location: LocationId) -> Option<f64> {
        self.sources
            .values()
            .filter_map(|slot| {
                let state = slot.read();
                if !state.graph.is_healthy() {
                    return None;
                }
                state
                    .store
                    .bucket(location)
                    .and_then(|bucket| schedule::bucket_next_update(&state.graph, bucket))
            })
            .min_by(f64::total_cmp)
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    /// Move `count` items of `item` between locations.
    ///
    /// `item` may also be a decay or transformation target still held by
    /// the graph that produced it.
    ///
    /// Returns the part of `count` that was not available.
    ///
    /// # Errors
    ///
    /// [`CoreError::UntrackedItem`] or [`CoreError::UnhealthyGraph`].
    pub fn move_items(
        &self,
        from: LocationId,
        to: LocationId,
        item: ItemTypeId,
        count: u32,
        older_first: bool,
        now: f64,
    ) -> Result<u32, CoreError> {
        let mut remainder = count;
        for source in self.holders_of(item)? {
            if remainder == 0 {
                break;
            }
            let mut state = self.write_healthy(source)?;
            remainder = state.store.move_instances(
                from,
                to,
                item,
                remainder,
                older_first,
                now,
                self.engine.merge_epsilon,
            );
        }
        debug!(%from, %to, %item, count, remainder, time = now, "Moved items");
        Ok(remainder)
    }

    /// Stop tracking `count` items of `item` at `location` (eaten, sold,
    /// destroyed).
    ///
    /// Returns the part of `count` that was not available.
    ///
    /// # Errors
    ///
    /// [`CoreError::UntrackedItem`] or [`CoreError::UnhealthyGraph`].
    pub fn discard(
        &self,
        location: LocationId,
        item: ItemTypeId,
        count: u32,
        older_first: bool,
        now: f64,
    ) -> Result<u32, CoreError> {
        let mut remainder = count;
        for source in self.holders_of(item)? {
            if remainder == 0 {
                break;
            }
            let mut state = self.write_healthy(source)?;
            let Some(bucket) = state.store.bucket_mut(location) else {
                continue;
            };
            let (taken, left) = maintenance::take_instances(bucket, item, remainder, older_first, now);
            if bucket.is_empty() {
                state.store.remove_location(location);
            }
            debug!(%location, %source, %item, discarded = taken.len(), remainder = left, "Discarded items");
            remainder = left;
        }
        Ok(remainder)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Merge and prune every bucket of every healthy source.
    pub fn maintain(&self, now: f64) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        for slot in self.sources.values() {
            let mut state = slot.write();
            let SourceState { graph, store } = &mut *state;
            if !graph.is_healthy() {
                continue;
            }
            for (location, bucket) in store.buckets_mut() {
                report.merged = report
                    .merged
                    .saturating_add(maintenance::merge_bucket(bucket, now, self.engine.merge_epsilon));
                report.pruned.absorb(maintenance::prune_bucket(
                    graph,
                    location,
                    bucket,
                    now,
                    self.engine.forgetting_window,
                ));
            }
            report.emptied_locations = report.emptied_locations.saturating_add(store.prune_empty());
        }
        debug!(
            merged = report.merged,
            pruned = report.pruned.total(),
            emptied = report.emptied_locations,
            time = now,
            "Maintenance pass complete"
        );
        report
    }

    /// Drop every instance of `source`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownSource`].
    pub fn reset_source(&self, source: ItemTypeId) -> Result<usize, CoreError> {
        let removed = self.write_slot(source)?.store.clear();
        info!(%source, removed, "Source reset");
        Ok(removed)
    }

    /// Mark a graph unhealthy and clear its store.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownSource`].
    pub fn mark_unhealthy(&self, source: ItemTypeId, reason: &str) -> Result<usize, CoreError> {
        let mut state = self.write_slot(source)?;
        state.graph.invalidate(reason);
        let removed = state.store.clear();
        warn!(%source, reason, removed, "Stage graph marked unhealthy, store reset");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Queries and persistence
    // -----------------------------------------------------------------------

    /// Display projections for everything at `location`.
    pub fn view(&self, location: LocationId, now: f64) -> Vec<StageView> {
        let mut views = Vec::new();
        for slot in self.sources.values() {
            let state = slot.read();
            if !state.graph.is_healthy() {
                continue;
            }
            let Some(bucket) = state.store.bucket(location) else {
                continue;
            };
            views.extend(bucket.iter().map(|instance| {
                let next = schedule::next_update_time(instance, &state.graph);
                instance.view(&state.graph, now, next)
            }));
        }
        views
    }

    /// Total item count tracked by `source`.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownSource`] or [`CoreError::UnhealthyGraph`].
    pub fn total_count(&self, source: ItemTypeId) -> Result<u64, CoreError> {
        Ok(self.read_healthy(source)?.store.total_count(None))
    }

    /// Flat records of every instance in every healthy source.
    pub fn snapshot(&self) -> Vec<InstanceRecord> {
        let mut records = Vec::new();
        for (source, slot) in &self.sources {
            let state = slot.read();
            if !state.graph.is_healthy() {
                continue;
            }
            records.extend(
                state
                    .store
                    .iter()
                    .map(|(location, instance)| instance.to_record(*source, location)),
            );
        }
        records
    }

    /// Rebuild instances from records. Records that do not fit a healthy
    /// graph are dropped with a warning.
    ///
    /// Returns the number of records restored.
    pub fn restore(&self, records: &[InstanceRecord]) -> usize {
        let mut restored = 0_usize;
        for record in records {
            let Some(slot) = self.sources.get(&record.source) else {
                warn!(source = %record.source, "Dropping record for unknown source");
                continue;
            };
            let mut state = slot.write();
            if !record_fits(&state.graph, record) {
                warn!(
                    source = %record.source,
                    location = %record.location,
                    item = %record.item,
                    ordinal = record.ordinal,
                    "Dropping record that does not fit its graph"
                );
                continue;
            }
            state
                .store
                .push(record.location, StageInstance::from_record(record));
            restored = restored.saturating_add(1);
        }
        info!(restored, dropped = records.len().saturating_sub(restored), "Restored instances");
        restored
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Sources whose stores can hold `item`: the graph tracking it, or
    /// every graph it is a terminal item of.
    fn holders_of(&self, item: ItemTypeId) -> Result<Vec<ItemTypeId>, CoreError> {
        if let Some(source) = self.source_for(item) {
            return Ok(vec![source]);
        }
        let sources: Vec<ItemTypeId> = self
            .holders
            .get(&item)
            .into_iter()
            .flatten()
            .copied()
            .filter(|source| self.is_healthy(*source))
            .collect();
        if sources.is_empty() {
            Err(CoreError::UntrackedItem(item))
        } else {
            Ok(sources)
        }
    }

    fn slot(&self, source: ItemTypeId) -> Result<&RwLock<SourceState>, CoreError> {
        self.sources.get(&source).ok_or(CoreError::UnknownSource(source))
    }

    fn write_slot(&self, source: ItemTypeId) -> Result<RwLockWriteGuard<'_, SourceState>, CoreError> {
        Ok(self.slot(source)?.write())
    }

    fn read_healthy(&self, source: ItemTypeId) -> Result<RwLockReadGuard<'_, SourceState>, CoreError> {
        let state = self.slot(source)?.read();
        if state.graph.is_healthy() {
            Ok(state)
        } else {
            Err(CoreError::unhealthy(source, state.graph.fault()))
        }
    }

    fn write_healthy(&self, source: ItemTypeId) -> Result<RwLockWriteGuard<'_, SourceState>, CoreError> {
        let state = self.slot(source)?.write();
        if state.graph.is_healthy() {
            Ok(state)
        } else {
            Err(CoreError::unhealthy(source, state.graph.fault()))
        }
    }

    /// Update one source's bucket and pull out instances to hand off.
    fn update_source(
        &self,
        source: ItemTypeId,
        location: LocationId,
        now: f64,
        probe: &dyn ModulatorProbe,
        changes: &mut Vec<StageChange>,
    ) -> Result<Vec<(ItemTypeId, StageInstance)>, CoreError> {
        let mut state = self.write_healthy(source)?;
        let SourceState { graph, store } = &mut *state;
        let mut bucket = store.take_bucket(location);

        let updated = schedule::update_bucket(
            graph,
            location,
            &mut bucket,
            probe,
            now,
            self.engine.settlement_max_iterations,
        );

        let (handoffs, mut kept): (Vec<StageInstance>, Vec<StageInstance>) =
            bucket.into_iter().partition(|instance| {
                instance.is_decayed()
                    && instance.count() > 0
                    && self
                        .source_for(instance.item())
                        .is_some_and(|target| target != source)
            });
        maintenance::merge_bucket(&mut kept, now, self.engine.merge_epsilon);
        maintenance::prune_bucket(graph, location, &mut kept, now, self.engine.forgetting_window);
        store.put_bucket(location, kept);

        changes.extend(updated?);
        Ok(handoffs
            .into_iter()
            .filter_map(|instance| self.source_for(instance.item()).map(|target| (target, instance)))
            .collect())
    }

    /// Register a decayed instance with the source that tracks its item.
    fn adopt(
        &self,
        target: ItemTypeId,
        location: LocationId,
        instance: &StageInstance,
        now: f64,
    ) -> Result<(), CoreError> {
        let mut state = self.write_healthy(target)?;
        let SourceState { graph, store } = &mut *state;
        let adopted = fresh_instance(graph, instance.item(), instance.count(), instance.start_time())?;
        store.insert(location, adopted, now, self.engine.merge_epsilon);
        debug!(
            %location,
            source = %target,
            item = %instance.item(),
            count = instance.count(),
            start = instance.start_time(),
            "Adopted handed-off items"
        );
        Ok(())
    }
}

/// A new instance of `item` at the stage it corresponds to.
fn fresh_instance(graph: &StageGraph, item: ItemTypeId, count: u32, start: f64) -> Result<StageInstance, CoreError> {
    let ordinal = graph.ordinal_of(item).ok_or(CoreError::UntrackedItem(item))?;
    let stage = graph.stage(ordinal).ok_or(CoreError::UntrackedItem(item))?;
    Ok(StageInstance::new(stage.item, ordinal, count, graph.is_fake(ordinal), start))
}

/// Whether a persisted record describes a valid instance of `graph`.
fn record_fits(graph: &StageGraph, record: &InstanceRecord) -> bool {
    if !graph.is_healthy() || record.count == 0 {
        return false;
    }
    let finite = [record.start_time, record.elapsed_offset, record.ref_time, record.transform_offset]
        .iter()
        .all(|value| value.is_finite());
    if !finite {
        return false;
    }
    if record.is_decayed {
        return graph.is_terminal_item(record.item);
    }
    graph
        .stage(record.ordinal)
        .is_some_and(|stage| stage.item == record.item && graph.is_fake(record.ordinal) == record.is_fake)
}
