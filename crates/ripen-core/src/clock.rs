//! Affine elapsed-time clock embedded in every stage instance.
//!
//! The clock answers "how much stage time has elapsed at simulation time
//! `t`?" with a single affine function:
//!
//! ```text
//! elapsed(t) = (t - ref_time) * clamp(rate_slope, -1000, 1000) + elapsed_offset
//! ```
//!
//! # Design Principles
//!
//! - Changing the rate snapshots the current elapsed value into
//!   `elapsed_offset` and moves `ref_time` to now. History is never
//!   replayed, so a rate change is O(1) however many came before it.
//! - The inverse (the hitting time of a threshold) is solved directly from
//!   the same formula, which is what lets the scheduler sleep until the
//!   exact moment of the next boundary.
//! - Division by the slope goes through [`guarded_slope`] everywhere. A
//!   slope whose magnitude is below [`EPSILON`] counts as frozen and is
//!   replaced by a signed epsilon in denominators; callers that need to
//!   know whether a future crossing exists ask [`StageClock::is_frozen`].
//! - A transformation locks the rate at 1 until it is removed.

use ripen_types::ItemTypeId;

/// Slopes are clamped to `[-MAX_RATE, MAX_RATE]`.
pub const MAX_RATE: f64 = 1000.0;

/// Slopes and rate differences smaller than this are treated as zero.
pub const EPSILON: f64 = 1e-6;

/// Clamp a raw slope into the supported range. `NaN` becomes 0.
pub fn clamp_slope(slope: f64) -> f64 {
    if slope.is_nan() {
        return 0.0;
    }
    slope.clamp(-MAX_RATE, MAX_RATE)
}

/// The clamped slope, pushed away from zero when it is degenerate.
///
/// This is the only denominator used for slope divisions.
pub fn guarded_slope(slope: f64) -> f64 {
    let clamped = clamp_slope(slope);
    if clamped.abs() >= EPSILON {
        clamped
    } else if clamped.is_sign_negative() {
        -EPSILON
    } else {
        EPSILON
    }
}

/// Per-instance elapsed-time clock.
#[derive(Debug, Clone, PartialEq)]
pub struct StageClock {
    /// Elapsed value at `ref_time`.
    elapsed_offset: f64,
    /// Reference simulation time.
    ref_time: f64,
    /// Raw rate slope (clamped on read).
    rate_slope: f64,
    /// Modulator responsible for the current slope, if any.
    modulator: Option<ItemTypeId>,
    /// Whether a transformation is in progress.
    transforming: bool,
    /// Elapsed value when the current transformation began.
    transform_offset: f64,
}

impl StageClock {
    /// A clock at rate 1 with zero elapsed time at `ref_time`.
    pub const fn new(ref_time: f64) -> Self {
        Self {
            elapsed_offset: 0.0,
            ref_time,
            rate_slope: 1.0,
            modulator: None,
            transforming: false,
            transform_offset: 0.0,
        }
    }

    /// Restore a clock from its persisted fields.
    pub const fn from_parts(
        elapsed_offset: f64,
        ref_time: f64,
        rate_slope: f64,
        modulator: Option<ItemTypeId>,
        transforming: bool,
        transform_offset: f64,
    ) -> Self {
        Self {
            elapsed_offset,
            ref_time,
            rate_slope,
            modulator,
            transforming,
            transform_offset,
        }
    }

    /// Elapsed value captured at the reference time.
    pub const fn elapsed_offset(&self) -> f64 {
        self.elapsed_offset
    }

    /// Reference simulation time.
    pub const fn ref_time(&self) -> f64 {
        self.ref_time
    }

    /// Raw (unclamped) rate slope, as stored.
    pub const fn rate_slope(&self) -> f64 {
        self.rate_slope
    }

    /// Clamped rate slope.
    pub fn slope(&self) -> f64 {
        clamp_slope(self.rate_slope)
    }

    /// Active modulator, if any.
    pub const fn modulator(&self) -> Option<ItemTypeId> {
        self.modulator
    }

    /// Whether a transformation is in progress.
    pub const fn is_transforming(&self) -> bool {
        self.transforming
    }

    /// Elapsed value when the current transformation began.
    pub const fn transform_offset(&self) -> f64 {
        self.transform_offset
    }

    /// Whether the clock is effectively stopped.
    pub fn is_frozen(&self) -> bool {
        self.slope().abs() < EPSILON
    }

    /// Elapsed stage time at simulation time `t`.
    pub fn elapsed(&self, t: f64) -> f64 {
        if self.is_frozen() {
            return self.elapsed_offset;
        }
        (t - self.ref_time).mul_add(self.slope(), self.elapsed_offset)
    }

    /// Elapsed time since the current transformation began.
    pub fn transform_elapsed(&self, t: f64) -> f64 {
        self.elapsed(t) - self.transform_offset
    }

    /// Install a new slope and modulator at time `t`.
    ///
    /// No-op while transforming, and when neither the slope nor the
    /// modulator changes. Returns whether the clock changed.
    pub fn set_delay(&mut self, t: f64, slope: f64, modulator: Option<ItemTypeId>) -> bool {
        if self.transforming {
            return false;
        }
        if (clamp_slope(slope) - self.slope()).abs() < EPSILON && modulator == self.modulator {
            return false;
        }
        self.elapsed_offset = self.elapsed(t);
        self.ref_time = t;
        self.rate_slope = slope;
        self.modulator = modulator;
        true
    }

    /// Start transforming under `modulator` at time `t`.
    ///
    /// Re-entering under the same modulator is a no-op; switching to a
    /// different one drops the previous transformation first. Returns
    /// whether the clock changed.
    pub fn set_transform(&mut self, t: f64, modulator: ItemTypeId) -> bool {
        if self.transforming {
            if self.modulator == Some(modulator) {
                return false;
            }
            self.remove_transform(t);
        }
        self.set_delay(t, 1.0, Some(modulator));
        self.transforming = true;
        self.transform_offset = self.elapsed(t);
        true
    }

    /// Stop transforming at time `t`.
    ///
    /// The base clock resumes at rate 1 from the offset it had when the
    /// transformation began. Returns whether the clock changed.
    pub fn remove_transform(&mut self, t: f64) -> bool {
        if !self.transforming {
            return false;
        }
        self.transforming = false;
        self.elapsed_offset = self.transform_offset;
        self.ref_time = t;
        self.rate_slope = 1.0;
        self.modulator = None;
        self.transform_offset = 0.0;
        true
    }

    /// Restart the clock after crossing a boundary by `overshoot` units.
    ///
    /// Returns the new stage start time, i.e. the simulation time at which
    /// elapsed was zero. A frozen clock keeps the overshoot in its offset
    /// and starts at `t`.
    pub fn rebase(&mut self, t: f64, overshoot: f64) -> f64 {
        if self.is_frozen() {
            self.ref_time = t;
            self.elapsed_offset = overshoot;
            return t;
        }
        let start = t - overshoot / guarded_slope(self.rate_slope);
        self.ref_time = start;
        self.elapsed_offset = 0.0;
        start
    }

    /// Simulation time at which elapsed was (or will be) zero on the current
    /// segment, seen from `t`. A frozen clock reports `t`.
    pub fn stage_start(&self, t: f64) -> f64 {
        if self.is_frozen() {
            return t;
        }
        t - self.elapsed(t) / guarded_slope(self.rate_slope)
    }

    /// Simulation time at which `elapsed` reaches `threshold`.
    pub fn hitting_time(&self, threshold: f64) -> f64 {
        self.ref_time + (threshold - self.elapsed_offset) / guarded_slope(self.rate_slope)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    const SALT: ItemTypeId = ItemTypeId(0x3001);
    const BARREL: ItemTypeId = ItemTypeId(0x3002);

    #[test]
    fn fresh_clock_tracks_wall_time() {
        let clock = StageClock::new(10.0);
        assert_abs_diff_eq!(clock.elapsed(10.0), 0.0);
        assert_abs_diff_eq!(clock.elapsed(13.5), 3.5);
    }

    #[test]
    fn slope_is_clamped() {
        let mut clock = StageClock::new(0.0);
        clock.set_delay(0.0, 5000.0, Some(SALT));
        assert_abs_diff_eq!(clock.slope(), MAX_RATE);
        assert_abs_diff_eq!(clock.elapsed(1.0), 1000.0);

        clock.set_delay(1.0, f64::NAN, None);
        assert!(clock.is_frozen());
    }

    #[test]
    fn set_delay_snapshots_and_changes_rate() {
        let mut clock = StageClock::new(0.0);
        assert!(clock.set_delay(4.0, 0.5, Some(SALT)));
        assert_abs_diff_eq!(clock.elapsed_offset(), 4.0);
        assert_abs_diff_eq!(clock.ref_time(), 4.0);
        assert_abs_diff_eq!(clock.elapsed(8.0), 6.0);
    }

    #[test]
    fn unchanged_delay_keeps_reference_point() {
        let mut clock = StageClock::new(0.0);
        assert!(clock.set_delay(2.0, 0.5, Some(SALT)));
        assert!(!clock.set_delay(3.0, 0.5, Some(SALT)));
        assert_abs_diff_eq!(clock.ref_time(), 2.0);
        // Same rate but a different modulator is a change.
        assert!(clock.set_delay(3.0, 0.5, Some(BARREL)));
    }

    #[test]
    fn frozen_clock_holds_offset() {
        let mut clock = StageClock::new(0.0);
        clock.set_delay(3.0, 0.0, Some(SALT));
        assert!(clock.is_frozen());
        assert_abs_diff_eq!(clock.elapsed(100.0), 3.0);
    }

    #[test]
    fn transform_locks_rate() {
        let mut clock = StageClock::new(0.0);
        assert!(clock.set_transform(2.0, BARREL));
        assert!(clock.is_transforming());
        assert_abs_diff_eq!(clock.transform_offset(), 2.0);
        assert!(!clock.set_delay(3.0, 10.0, Some(SALT)));
        assert_abs_diff_eq!(clock.transform_elapsed(5.0), 3.0);
        // Same transformer again is a no-op.
        assert!(!clock.set_transform(4.0, BARREL));
    }

    #[test]
    fn switching_transformer_restarts_transform() {
        let mut clock = StageClock::new(0.0);
        clock.set_transform(1.0, BARREL);
        assert!(clock.set_transform(3.0, SALT));
        assert_eq!(clock.modulator(), Some(SALT));
        assert_abs_diff_eq!(clock.transform_elapsed(3.0), 0.0);
    }

    #[test]
    fn remove_transform_resumes_from_entry_offset() {
        let mut clock = StageClock::new(0.0);
        clock.set_transform(2.0, BARREL);
        assert!(clock.remove_transform(6.0));
        assert!(!clock.is_transforming());
        assert_eq!(clock.modulator(), None);
        // Offset captured at entry (2.0), resumed at t = 6.
        assert_abs_diff_eq!(clock.elapsed(6.0), 2.0);
        assert_abs_diff_eq!(clock.elapsed(7.0), 3.0);
        assert!(!clock.remove_transform(7.0));
    }

    #[test]
    fn rebase_moves_start_back_by_overshoot() {
        let mut clock = StageClock::new(0.0);
        clock.set_delay(0.0, 2.0, None);
        let start = clock.rebase(6.0, 2.0);
        assert_abs_diff_eq!(start, 5.0);
        assert_abs_diff_eq!(clock.elapsed(6.0), 2.0);
    }

    #[test]
    fn rebase_of_frozen_clock_keeps_overshoot() {
        let mut clock = StageClock::new(0.0);
        clock.set_delay(0.0, 0.0, Some(SALT));
        let start = clock.rebase(6.0, 0.25);
        assert_abs_diff_eq!(start, 6.0);
        assert_abs_diff_eq!(clock.elapsed(50.0), 0.25);
    }

    #[test]
    fn hitting_time_inverts_elapsed() {
        let mut clock = StageClock::new(1.0);
        clock.set_delay(3.0, 0.75, Some(SALT));
        for t in [3.0, 4.5, 10.0, 123.25] {
            assert_abs_diff_eq!(clock.hitting_time(clock.elapsed(t)), t, epsilon = 1e-9);
        }
        clock.set_delay(20.0, -2.0, None);
        assert_abs_diff_eq!(clock.hitting_time(0.0), 20.0 + clock.elapsed(20.0) / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn stage_start_follows_rate() {
        let mut clock = StageClock::new(0.0);
        clock.set_delay(4.0, 0.5, Some(SALT));
        assert_abs_diff_eq!(clock.stage_start(6.0), -4.0, epsilon = 1e-12);
        clock.set_delay(6.0, -1.0, None);
        assert_abs_diff_eq!(clock.stage_start(6.0), 11.0, epsilon = 1e-12);
        clock.set_delay(7.0, 0.0, None);
        assert_abs_diff_eq!(clock.stage_start(9.0), 9.0);
    }

    #[test]
    fn guarded_slope_never_returns_zero() {
        assert_abs_diff_eq!(guarded_slope(0.0), EPSILON);
        assert_abs_diff_eq!(guarded_slope(-0.0), -EPSILON);
        assert_abs_diff_eq!(guarded_slope(-3.0), -3.0);
        assert_abs_diff_eq!(guarded_slope(1e9), MAX_RATE);
    }
}
