//! Stage change sinks.
//!
//! The driver hands every batch of [`StageChange`]s it produces to a
//! [`ChangeSink`]. [`LoggingSink`] reports them through `tracing` and keeps
//! a running [`ChangeTally`].

use ripen_types::{ChangeKind, StageChange};
use tracing::info;

/// Receives the stage changes of each location update.
pub trait ChangeSink: Send {
    /// Called once per location update that produced changes.
    fn on_changes(&mut self, now: f64, changes: &[StageChange]);
}

/// Item counts moved per transition kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTally {
    /// Items that moved forward.
    pub advanced: u64,
    /// Items that moved backward.
    pub regressed: u64,
    /// Items that became their decay target.
    pub decayed: u64,
    /// Items that completed a transformation.
    pub transformed: u64,
}

impl ChangeTally {
    /// Count one change.
    pub fn record(&mut self, change: &StageChange) {
        let slot = match change.kind {
            ChangeKind::Advanced => &mut self.advanced,
            ChangeKind::Regressed => &mut self.regressed,
            ChangeKind::Decayed => &mut self.decayed,
            ChangeKind::Transformed => &mut self.transformed,
        };
        *slot = slot.saturating_add(u64::from(change.count));
    }

    /// Items counted across every kind.
    pub const fn total(&self) -> u64 {
        self.advanced
            .saturating_add(self.regressed)
            .saturating_add(self.decayed)
            .saturating_add(self.transformed)
    }
}

/// Sink that logs each change at info level.
#[derive(Debug, Clone, Default)]
pub struct LoggingSink {
    tally: ChangeTally,
}

impl LoggingSink {
    /// A sink with an empty tally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts seen so far.
    pub const fn tally(&self) -> ChangeTally {
        self.tally
    }
}

impl ChangeSink for LoggingSink {
    fn on_changes(&mut self, now: f64, changes: &[StageChange]) {
        for change in changes {
            self.tally.record(change);
            info!(
                location = %change.location,
                source = %change.source,
                old_item = %change.old_item,
                new_item = %change.new_item,
                old_ordinal = change.old_ordinal,
                new_ordinal = ?change.new_ordinal,
                count = change.count,
                kind = ?change.kind,
                at = change.update_time,
                now,
                "Stage changed"
            );
        }
    }
}
