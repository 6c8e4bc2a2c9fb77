//! End-to-end properties of the progression core.
//!
//! Everything here goes through the public API only: a registry built from
//! YAML, the clock, the engine state machine, and the maintenance passes.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use approx::assert_abs_diff_eq;
use ripen_core::clock::StageClock;
use ripen_core::engine::{advance, step};
use ripen_core::maintenance::take_instances;
use ripen_core::modulator::StaticModulatorProbe;
use ripen_core::schedule::next_update_time;
use ripen_core::{NoModulators, Registry, RipenConfig, StageGraph, StageInstance};
use ripen_types::{ChangeKind, ItemTypeId, LocationId};

const APPLE: ItemTypeId = ItemTypeId(4097);
const RIPE: ItemTypeId = ItemTypeId(4098);
const ROTTEN: ItemTypeId = ItemTypeId(4099);
const CIDER: ItemTypeId = ItemTypeId(4100);
const ASH: ItemTypeId = ItemTypeId(4200);
const VENISON: ItemTypeId = ItemTypeId(4353);
const AGED: ItemTypeId = ItemTypeId(4355);
const SALT: ItemTypeId = ItemTypeId(8193);
const BARREL: ItemTypeId = ItemTypeId(8194);
const RACK: ItemTypeId = ItemTypeId(8196);

const CONFIG: &str = r"
engine:
  forgetting_window: 20.0
catalogue:
  - { id: 4097, name: Apple, kind: food }
  - { id: 4098, name: Ripe Apple, kind: food }
  - { id: 4099, name: Rotten Apple, kind: food }
  - { id: 4100, name: Cider, kind: potion }
  - { id: 4200, name: Ash, kind: misc }
  - { id: 8193, name: Salt, kind: ingredient }
  - { id: 8194, name: Barrel, kind: misc }
  - { id: 4353, name: Venison, kind: food }
  - { id: 4354, name: Spoiled Meat, kind: food }
  - { id: 4355, name: Aged Venison, kind: food }
  - { id: 8196, name: Smoking Rack, kind: misc }
sources:
  - item: 4097
    decay_target: 4099
    stages:
      - { item: 4097, duration: 10.0, name: Fresh }
      - { item: 4098, duration: 10.0, name: Ripe }
    modulators:
      - { item: 8193, multiplier: 0.5 }
    transformers:
      - { item: 8194, target: 4100, duration: 3.0, allowed_stages: [1] }
  - item: 4200
    decay_target: 4200
    stages:
      - { item: 4200, duration: 1.0, name: Ash }
  - item: 4353
    decay_target: 4354
    stages:
      - { item: 4353, duration: 5.0, name: Fresh }
      - { item: 4355, duration: 3.0, name: Aged }
    modulators:
      - { item: 8196, multiplier: -1.0 }
";

fn registry() -> Registry {
    let config = RipenConfig::parse(CONFIG).unwrap();
    Registry::from_config(&config).unwrap()
}

fn with_apple_graph<R>(registry: &Registry, f: impl FnOnce(&StageGraph) -> R) -> R {
    registry.with_graph(APPLE, f).unwrap()
}

// =============================================================================
// Clock properties
// =============================================================================

#[test]
fn affine_clock_matches_piecewise_samples() {
    let segments = [(0.0, 1.0), (2.0, 3.0), (5.0, 0.25), (9.0, -2.0), (10.0, 0.0), (12.0, 1.5)];
    let mut clock = StageClock::new(0.0);
    for (start, slope) in segments {
        clock.set_delay(start, slope, None);
    }

    // Integrate the same piecewise function by hand.
    let expected = |t: f64| -> f64 {
        let mut total = 0.0;
        for (index, (start, slope)) in segments.iter().enumerate() {
            let end = segments.get(index + 1).map_or(f64::INFINITY, |next| next.0);
            if t <= *start {
                break;
            }
            total += (t.min(end) - start) * slope;
        }
        total
    };

    // Only the last segment is live on the clock; earlier ones are folded
    // into its offset. Sample that segment densely.
    for sample in 0..40 {
        let t = 12.0 + f64::from(sample) * 0.5;
        assert_abs_diff_eq!(clock.elapsed(t), expected(t), epsilon = 1e-9);
    }
}

#[test]
fn affine_clock_tracks_each_segment_as_it_is_installed() {
    let segments = [(0.0, 2.0), (1.0, 0.5), (4.0, -1.0), (6.0, 4.0)];
    let mut clock = StageClock::new(0.0);
    let mut offset = 0.0;
    for (index, (start, slope)) in segments.iter().enumerate() {
        clock.set_delay(*start, *slope, None);
        let end = segments.get(index + 1).map_or(*start + 3.0, |next| next.0);
        let mut t = *start;
        while t < end {
            assert_abs_diff_eq!(clock.elapsed(t), offset + (t - start) * slope, epsilon = 1e-9);
            t += 0.125;
        }
        offset += (end - start) * slope;
    }
}

#[test]
fn hitting_time_inverts_elapsed() {
    for slope in [0.01, 0.5, 1.0, 7.0, 999.0, -0.3, -40.0] {
        let mut clock = StageClock::new(3.0);
        clock.set_delay(4.0, slope, None);
        for t in [4.5, 10.0, 123.25] {
            assert_abs_diff_eq!(clock.hitting_time(clock.elapsed(t)), t, epsilon = 1e-6);
        }
    }
}

// =============================================================================
// Engine properties and scenarios
// =============================================================================

#[test]
fn boundary_at_exact_duration() {
    let registry = registry();
    with_apple_graph(&registry, |graph| {
        let mut instance = StageInstance::new(APPLE, 0, 1, false, 0.0);
        assert_eq!(instance.elapsed(10.0), 10.0);
        let transition = step(&mut instance, graph, 10.0).unwrap();
        assert_eq!(transition.kind, ChangeKind::Advanced);
        assert_eq!(instance.ordinal(), 1);
        assert_abs_diff_eq!(instance.elapsed(10.0), 0.0, epsilon = 1e-12);
    });
}

#[test]
fn advance_is_idempotent_at_a_fixed_time() {
    let registry = registry();
    with_apple_graph(&registry, |graph| {
        for t in [3.0, 10.0, 14.5, 20.0, 80.0] {
            let mut instance = StageInstance::new(APPLE, 0, 1, false, 0.0);
            advance(&mut instance, graph, t);
            let settled = instance.clone();
            assert!(!advance(&mut instance, graph, t));
            assert_eq!(instance, settled);
        }
    });
}

#[test]
fn scenario_single_stage_never_decays() {
    let registry = registry();
    registry
        .with_graph(ASH, |graph| {
            let mut instance = StageInstance::new(ASH, 0, 2, false, 0.0);
            for t in [0.5, 2.0, 100.0] {
                assert!(!advance(&mut instance, graph, t));
                assert!(!instance.is_decayed());
                assert_eq!(instance.start_time(), t);
            }
            assert_eq!(next_update_time(&instance, graph), None);
        })
        .unwrap();
}

#[test]
fn scenario_double_rate_crosses_with_overshoot() {
    let registry = registry();
    with_apple_graph(&registry, |graph| {
        let mut instance = StageInstance::new(APPLE, 0, 1, false, 0.0);
        instance.set_delay(0.0, 2.0, None);
        assert!(advance(&mut instance, graph, 6.0));
        assert_eq!(instance.ordinal(), 1);
        assert_abs_diff_eq!(instance.elapsed(6.0), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(instance.start_time(), 5.0, epsilon = 1e-12);
    });
}

#[test]
fn scenario_transform_past_threshold() {
    let registry = registry();
    with_apple_graph(&registry, |graph| {
        let mut instance = StageInstance::new(RIPE, 1, 1, false, 0.0);
        instance.set_transform(0.0, BARREL);
        let transition = step(&mut instance, graph, 4.0).unwrap();
        assert_eq!(transition.kind, ChangeKind::Transformed);
        assert_eq!(instance.item(), CIDER);
        assert_abs_diff_eq!(instance.start_time(), 3.0, epsilon = 1e-12);
    });
}

#[test]
fn scenario_split_older_first() {
    let older = StageInstance::new(APPLE, 0, 3, false, 0.0);
    let newer = StageInstance::new(APPLE, 0, 4, false, 1.0);
    let mut bucket = vec![older, newer];
    let (moved, remainder) = take_instances(&mut bucket, APPLE, 5, true, 2.0);

    assert_eq!(remainder, 0);
    assert_eq!(moved.iter().map(StageInstance::count).collect::<Vec<_>>(), vec![3, 2]);
    assert_eq!(bucket.len(), 1);
    assert_eq!(bucket[0].count(), 2);
    assert_eq!(bucket[0].start_time(), 1.0);
}

// =============================================================================
// Registry properties
// =============================================================================

#[test]
fn moves_conserve_counts() {
    let registry = registry();
    let locations: Vec<LocationId> = (0..4).map(|_| LocationId::new()).collect();
    for (index, location) in locations.iter().enumerate() {
        let start = f64::from(u32::try_from(index).unwrap());
        registry.register(*location, None, APPLE, 10, start).unwrap();
    }
    let total = registry.total_count(APPLE).unwrap();
    assert_eq!(total, 40);

    // Deterministic pseudo-random walk of transfers.
    let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
    let mut next = || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed
    };
    for round in 0..200_u32 {
        let from = locations[usize::try_from(next() % 4).unwrap()];
        let to = locations[usize::try_from(next() % 4).unwrap()];
        let count = u32::try_from(next() % 9).unwrap();
        let now = 4.0 + f64::from(round) * 0.01;
        let remainder = registry
            .move_items(from, to, APPLE, count, next() % 2 == 0, now)
            .unwrap();
        assert!(remainder <= count);
        assert_eq!(registry.total_count(APPLE).unwrap(), total);
    }
    registry.maintain(6.0);
    assert_eq!(registry.total_count(APPLE).unwrap(), total);
}

#[test]
fn salt_arriving_late_does_not_rewrite_history() {
    let registry = registry();
    let cellar = LocationId::new();
    let mut probe = StaticModulatorProbe::new();
    registry.register(cellar, None, APPLE, 4, 0.0).unwrap();
    probe.place(cellar, SALT, 12.0);

    let changes = registry.update_location(cellar, 14.0, &probe).unwrap();
    assert_eq!(changes.len(), 1);
    assert_abs_diff_eq!(changes[0].update_time, 10.0, epsilon = 1e-9);

    // Rate 1 from 10 to 14, then salt halves it from here on.
    let view = registry.view(cellar, 14.0);
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].modulator, Some(SALT));
    assert_abs_diff_eq!(view[0].progress, 0.4, epsilon = 1e-9);
    assert_abs_diff_eq!(view[0].next_update.unwrap(), 26.0, epsilon = 1e-9);
}

#[test]
fn rack_removed_after_regression_keeps_items() {
    let registry = registry();
    let smokehouse = LocationId::new();
    let mut probe = StaticModulatorProbe::new();
    registry.register(smokehouse, None, VENISON, 4, 0.0).unwrap();

    // Aged at 5, then the rack runs the clock backwards from 6.
    probe.place(smokehouse, RACK, 6.0);
    let changes = registry.update_location(smokehouse, 6.0, &probe).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].new_item, AGED);
    assert_eq!(registry.next_update_time(smokehouse), Some(7.0));

    let changes = registry.update_location(smokehouse, 8.0, &probe).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Regressed);
    assert_abs_diff_eq!(changes[0].update_time, 7.0, epsilon = 1e-9);
    assert_eq!(registry.total_count(VENISON).unwrap(), 4);

    // Back to rate 1 with 3 of 5 units left to lose.
    assert!(probe.remove(smokehouse, RACK, 9.0));
    assert!(registry.update_location(smokehouse, 9.0, &probe).unwrap().is_empty());
    assert_eq!(registry.total_count(VENISON).unwrap(), 4);
    registry.maintain(9.0);
    assert_eq!(registry.total_count(VENISON).unwrap(), 4);

    let view = registry.view(smokehouse, 9.0);
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].ordinal, 0);
    assert_eq!(view[0].modulator, None);
    assert_abs_diff_eq!(view[0].progress, 0.6, epsilon = 1e-9);
    assert_abs_diff_eq!(view[0].next_update.unwrap(), 11.0, epsilon = 1e-9);

    let changes = registry.update_location(smokehouse, 12.0, &probe).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Advanced);
    assert_abs_diff_eq!(changes[0].update_time, 11.0, epsilon = 1e-9);
}

#[test]
fn decayed_apples_can_still_be_moved() {
    let registry = registry();
    let shelf = LocationId::new();
    let bin = LocationId::new();
    registry.register(shelf, None, APPLE, 3, 0.0).unwrap();
    registry.update_location(shelf, 25.0, &NoModulators).unwrap();
    assert!(!registry.is_tracked(ROTTEN));

    assert_eq!(registry.move_items(shelf, bin, ROTTEN, 3, true, 25.0).unwrap(), 0);
    assert!(registry.view(shelf, 25.0).is_empty());
    assert_eq!(registry.view(bin, 25.0).len(), 1);
    assert_eq!(registry.discard(bin, ROTTEN, 5, false, 25.0).unwrap(), 2);
    assert_eq!(registry.total_count(APPLE).unwrap(), 0);
}

#[test]
fn barrel_turns_ripe_apples_into_cider() {
    let registry = registry();
    let cellar = LocationId::new();
    let mut probe = StaticModulatorProbe::new();
    probe.place(cellar, BARREL, 0.0);
    registry.register(cellar, None, APPLE, 2, 0.0).unwrap();

    // Barrel cannot act on fresh apples.
    assert!(registry.update_location(cellar, 5.0, &probe).unwrap().is_empty());
    assert_eq!(registry.next_update_time(cellar), Some(10.0));

    let changes = registry.update_location(cellar, 30.0, &probe).unwrap();
    let kinds: Vec<ChangeKind> = changes.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ChangeKind::Advanced, ChangeKind::Transformed]);
    assert_eq!(changes[1].new_item, CIDER);
    assert_abs_diff_eq!(changes[1].update_time, 13.0, epsilon = 1e-9);
    assert_eq!(registry.next_update_time(cellar), None);

    // Cider is kept until the forgetting window passes.
    registry.maintain(32.0);
    assert_eq!(registry.total_count(APPLE).unwrap(), 2);
    registry.maintain(34.0);
    assert_eq!(registry.total_count(APPLE).unwrap(), 0);
}

#[test]
fn decayed_apples_are_forgotten() {
    let registry = registry();
    let shelf = LocationId::new();
    registry.register(shelf, None, APPLE, 1, 0.0).unwrap();
    let changes = registry.update_location(shelf, 25.0, &NoModulators).unwrap();
    assert_eq!(changes.last().map(|c| c.kind), Some(ChangeKind::Decayed));
    assert_eq!(changes.last().map(|c| c.new_item), Some(ROTTEN));
    assert_eq!(changes.last().and_then(|c| c.new_ordinal), None);

    assert_eq!(registry.maintain(39.0).pruned.forgotten, 0);
    assert_eq!(registry.maintain(41.0).pruned.forgotten, 1);
    assert_eq!(registry.maintain(41.0).emptied_locations, 0);
    assert!(registry.view(shelf, 41.0).is_empty());
}

#[test]
fn snapshot_survives_json_and_keeps_schedule() {
    let registry = registry();
    let cellar = LocationId::new();
    let mut probe = StaticModulatorProbe::new();
    probe.place(cellar, SALT, 0.0);
    registry.register(cellar, None, APPLE, 3, 0.0).unwrap();
    registry.update_location(cellar, 1.0, &probe).unwrap();
    let before = registry.next_update_time(cellar);

    let json = serde_json::to_string(&registry.snapshot()).unwrap();
    let records: Vec<ripen_types::InstanceRecord> = serde_json::from_str(&json).unwrap();

    let restored = self::registry();
    assert_eq!(restored.restore(&records), 1);
    assert_eq!(restored.next_update_time(cellar), before);
    assert_eq!(restored.view(cellar, 1.0), registry.view(cellar, 1.0));
}

#[test]
fn unhealthy_source_is_isolated() {
    let yaml = CONFIG.replace("{ item: 4098, duration: 10.0, name: Ripe }", "{ item: 4098, duration: 0.0, name: Ripe }");
    let config = RipenConfig::parse(&yaml).unwrap();
    let registry = Registry::from_config(&config).unwrap();
    let here = LocationId::new();

    assert!(!registry.is_healthy(APPLE));
    assert!(registry.is_healthy(ASH));
    assert!(registry.register(here, None, APPLE, 1, 0.0).is_err());
    assert!(registry.register(here, None, ASH, 1, 0.0).unwrap());
    assert!(registry.update_location(here, 5.0, &NoModulators).unwrap().is_empty());
}
