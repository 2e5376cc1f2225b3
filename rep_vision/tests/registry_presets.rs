use rep_vision::registry::{PLANK_HOLD, SPORTS_BALL_BOUNCE};
use rep_vision::{AuxLandmark, AuxLandmarks, CounterKind, CounterRegistry, LogicType, Report, Sample};

fn body(offset: f64) -> AuxLandmarks {
    AuxLandmarks::from([
        (9, AuxLandmark::new(0.30 + offset, 0.99)),
        (11, AuxLandmark::new(0.45 + offset, 0.99)),
        (12, AuxLandmark::new(0.45 + offset, 0.99)),
    ])
}

#[test]
fn plank_preset_counts_a_coherent_dip() {
    let registry = CounterRegistry::with_builtin_presets();
    let mut plank = registry.build(PLANK_HOLD).expect("preset");

    for i in 0..30 {
        plank.process(Sample::new(0.5, i as f64, 0.95), Some(&body(0.0)));
    }
    // Below the preset's confidence gate.
    assert_eq!(plank.process(Sample::new(0.9, 30.0, 0.8), Some(&body(0.4))), Report::Skipped);

    plank.process(Sample::new(0.65, 31.0, 0.95), Some(&body(0.15)));
    let report = plank.process(Sample::new(0.5, 32.0, 0.95), Some(&body(0.0)));
    assert_eq!(report, Report::RepCompleted { count: 1 });
}

#[test]
fn presets_build_fresh_counters() {
    let registry = CounterRegistry::with_builtin_presets();
    let mut first = registry.build(SPORTS_BALL_BOUNCE).expect("preset");
    let second = registry.build(SPORTS_BALL_BOUNCE).expect("preset");
    first.update(Sample::new(800.0, 0.0, 0.9), None);
    assert_eq!(first.snapshot().calibration_progress, 1.0 / 30.0);
    assert_eq!(second.snapshot().calibration_progress, 0.0);
}

#[test]
fn toml_counters_join_the_presets() {
    let mut registry = CounterRegistry::with_builtin_presets();
    let names = registry
        .load_toml(
            r#"
            [[counter]]
            name = "dog_jump"
            logic_type = "jump_detection"
            stable_frames = 2
            calibration_frames = 10
            [counter.kind]
            type = "animal"
            object_class = "dog"

            [[counter]]
            name = "arm_wave"
            logic_type = "oscillation"
            pattern_window = 4
            [counter.kind]
            type = "human"
            validation_landmarks = [13, 14]
            "#,
        )
        .expect("valid file");
    assert_eq!(names, vec!["dog_jump", "arm_wave"]);
    assert_eq!(registry.list_by_kind(CounterKind::Animal), vec!["cat_jump", "dog_jump"]);

    let config = registry.get("arm_wave").expect("registered");
    assert_eq!(config.logic_type, LogicType::Oscillation);
    assert_eq!(config.threshold, 0.1);

    let mut dog = registry.build("dog_jump").expect("registered");
    for i in 0..10 {
        dog.update(Sample::new(700.0, i as f64, 0.9), None);
    }
    assert!(dog.is_calibrated());
    // Up past the jump line, then back down near the rest position.
    for (i, value) in [600.0, 560.0, 698.0, 700.0].into_iter().enumerate() {
        dog.update(Sample::new(value, 10.0 + i as f64, 0.9), None);
    }
    assert_eq!(dog.count(), 1);
}
