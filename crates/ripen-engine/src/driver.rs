//! Event-driven demo driver.
//!
//! The driver owns a [`Registry`], a [`StaticModulatorProbe`] and a
//! [`WakeQueue`]. Driver ticks only pace the loop: within a tick every
//! location due at or before the tick's end is updated at its own wake
//! time, then rescheduled from [`Registry::next_update_time`] and its next
//! modulator placement change.

use std::collections::BTreeMap;
use std::time::Duration;

use ripen_core::config::{DriverConfig, RipenConfig};
use ripen_core::maintenance::MaintenanceReport;
use ripen_core::{Registry, StaticModulatorProbe, WakeQueue};
use ripen_types::{InstanceRecord, LocationId};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::sink::ChangeSink;

/// Outcome of a driver run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriverSummary {
    /// Ticks executed.
    pub ticks: u64,
    /// Location updates performed.
    pub updates: u64,
    /// Stage change records produced.
    pub changes: u64,
    /// Simulation time at the end of the run.
    pub final_time: f64,
    /// Accumulated maintenance results.
    pub maintenance: MaintenanceReport,
}

/// Drives a seeded world forward in simulation time.
pub struct Driver {
    registry: Registry,
    probe: StaticModulatorProbe,
    queue: WakeQueue,
    settings: DriverConfig,
    wake_budget: u32,
    locations: BTreeMap<String, LocationId>,
    probe_events: BTreeMap<LocationId, Vec<f64>>,
}

impl Driver {
    /// Build the registry from `config` and place its seeds and modulators.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Core`] if the catalogue is invalid and
    /// [`EngineError::Seed`] if a seed cannot be registered.
    pub fn from_config(config: &RipenConfig) -> Result<Self, EngineError> {
        let registry = Registry::from_config(config)?;
        let mut driver = Self {
            registry,
            probe: StaticModulatorProbe::new(),
            queue: WakeQueue::new(),
            settings: config.driver.clone(),
            wake_budget: config.engine.settlement_max_iterations.max(1),
            locations: BTreeMap::new(),
            probe_events: BTreeMap::new(),
        };
        driver.place_modulators();
        driver.seed()?;
        Ok(driver)
    }

    /// The underlying registry.
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of locations with a pending wake.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Persisted form of every tracked instance.
    pub fn snapshot(&self) -> Vec<InstanceRecord> {
        self.registry.snapshot()
    }

    /// Consume the driver, tearing the registry down.
    pub fn teardown(self) -> usize {
        self.registry.teardown()
    }

    fn location_id(&mut self, name: &str) -> LocationId {
        *self
            .locations
            .entry(name.to_owned())
            .or_insert_with(LocationId::new)
    }

    fn place_modulators(&mut self) {
        let placements = self.settings.modulators.clone();
        for placement in &placements {
            let location = self.location_id(&placement.location);
            self.probe.place(location, placement.item, placement.from);
            let events = self.probe_events.entry(location).or_default();
            events.push(placement.from);
            if let Some(until) = placement.until {
                self.probe.remove(location, placement.item, until);
                events.push(until);
            }
            debug!(
                %location,
                item = %placement.item,
                from = placement.from,
                until = ?placement.until,
                "Modulator placed"
            );
        }
        for (location, events) in &mut self.probe_events {
            events.sort_by(f64::total_cmp);
            events.dedup_by(|a, b| a.total_cmp(b).is_eq());
            if let Some(first) = events.first() {
                self.queue.schedule_earliest(*location, *first);
            }
        }
    }

    fn seed(&mut self) -> Result<(), EngineError> {
        let seeds = self.settings.seeds.clone();
        for seed in &seeds {
            let location = self.location_id(&seed.location);
            let registered = self
                .registry
                .register(location, seed.container, seed.item, seed.count, 0.0)
                .map_err(|err| EngineError::Seed {
                    location: seed.location.clone(),
                    message: err.to_string(),
                })?;
            if registered {
                self.queue.schedule_earliest(location, 0.0);
            } else {
                warn!(location = %seed.location, item = %seed.item, "Seed does not age in its container");
            }
        }
        info!(
            locations = self.locations.len(),
            seeds = seeds.len(),
            "World seeded"
        );
        Ok(())
    }

    fn next_probe_event(&self, location: LocationId, after: f64) -> Option<f64> {
        self.probe_events
            .get(&location)
            .and_then(|events| events.iter().copied().find(|event| *event > after))
    }

    fn reschedule(&mut self, location: LocationId, after: f64) {
        match self.registry.next_update_time(location) {
            Some(next) => {
                self.queue.schedule(location, next.max(after));
            }
            None => {
                self.queue.cancel(location);
            }
        }
        if let Some(event) = self.next_probe_event(location, after) {
            self.queue.schedule_earliest(location, event);
        }
    }

    /// Update every location due at or before `now`, each at its own wake
    /// time. Returns `(updates, changes)`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Core`] if a location update fails.
    pub fn process_due(&mut self, now: f64, sink: &mut dyn ChangeSink) -> Result<(u64, u64), EngineError> {
        let mut updates = 0_u64;
        let mut changes = 0_u64;
        let mut wakes = 0_u32;
        loop {
            let due = self.queue.pop_due(now);
            if due.is_empty() {
                break;
            }
            for (location, at) in due {
                let batch = self.registry.update_location(location, at, &self.probe)?;
                updates = updates.saturating_add(1);
                changes = changes.saturating_add(u64::try_from(batch.len()).unwrap_or(u64::MAX));
                if !batch.is_empty() {
                    sink.on_changes(at, &batch);
                }
                self.reschedule(location, at);
                wakes = wakes.saturating_add(1);
            }
            if wakes >= self.wake_budget {
                warn!(wakes, time = now, "Wake budget reached, deferring to next tick");
                break;
            }
        }
        Ok((updates, changes))
    }

    /// Run ticks until `max_ticks` or until nothing is left to wake.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Core`] if a location update fails.
    pub async fn run(&mut self, sink: &mut dyn ChangeSink) -> Result<DriverSummary, EngineError> {
        let mut summary = DriverSummary::default();
        let mut now = 0.0_f64;

        for tick in 0..self.settings.max_ticks {
            let (updates, changes) = self.process_due(now, sink)?;
            summary.updates = summary.updates.saturating_add(updates);
            summary.changes = summary.changes.saturating_add(changes);
            summary.ticks = tick.saturating_add(1);
            summary.final_time = now;

            let interval = self.settings.maintenance_interval_ticks;
            if interval > 0 && tick.checked_rem(interval) == Some(0) {
                summary.maintenance.absorb(self.registry.maintain(now));
            }

            if self.queue.is_empty() {
                info!(tick, time = now, "Nothing left to wake");
                break;
            }
            if self.settings.tick_interval_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.settings.tick_interval_ms)).await;
            }
            now += self.settings.time_step;
        }

        info!(
            ticks = summary.ticks,
            updates = summary.updates,
            changes = summary.changes,
            final_time = summary.final_time,
            merged = summary.maintenance.merged,
            pruned = summary.maintenance.pruned.total(),
            "Driver run complete"
        );
        Ok(summary)
    }
}
