use proptest::prelude::*;
use rep_vision::core_modules::calibration_window::CalibrationWindow;
use rep_vision::{AdjustDirection, CounterConfig, CounterState, LogicType, RepCounter, Sample};

const EPSILON: f64 = 1e-9;

fn full_window(values: &[f64]) -> CalibrationWindow {
    let mut window = CalibrationWindow::new(values.len());
    for value in values {
        window.push(*value);
    }
    window
}

proptest! {
    #[test]
    fn pose_thresholds_stay_ordered_and_inside_the_frame(values in prop::collection::vec(0.0f64..=1.0, 30)) {
        let config = CounterConfig::human("pose");
        let model = config.calibrator().calibrate(&full_window(&values), None).expect("full window");
        let t = model.thresholds();
        prop_assert!(t.upper < t.reference && t.reference < t.lower);
        prop_assert!(t.lower - t.upper >= config.min_zone_width - EPSILON);
        // Lines leave the frame only to keep a reference at the edge enclosed.
        let half = config.min_zone_width / 2.0;
        prop_assert!(t.upper >= 0.0_f64.min(t.reference - half) - EPSILON);
        prop_assert!(t.lower <= 1.0_f64.max(t.reference + half) + EPSILON);
    }

    #[test]
    fn constant_pose_window_is_its_own_reference(v in 0.0f64..=1.0) {
        let config = CounterConfig::human("pose");
        let model = config.calibrator().calibrate(&full_window(&[v; 30]), None).expect("full window");
        let t = model.thresholds();
        prop_assert_eq!(t.reference, v);
        prop_assert!(t.upper < v && v < t.lower);
    }

    #[test]
    fn constant_pixel_window_is_its_own_reference(v in 0.0f64..=1080.0) {
        let config = CounterConfig {
            logic_type: LogicType::VerticalMovement,
            threshold: 60.0,
            ..CounterConfig::object("box")
        };
        let model = config.calibrator().calibrate(&full_window(&[v; 30]), None).expect("full window");
        let t = model.thresholds();
        prop_assert_eq!(t.reference, v);
        prop_assert!(t.upper < v && v < t.lower);
    }

    #[test]
    fn ground_lines_sit_above_the_ground(values in prop::collection::vec(60.0f64..1020.0, 30)) {
        let config = CounterConfig::object("ball");
        let model = config.calibrator().calibrate(&full_window(&values), None).expect("full window");
        let t = model.thresholds();
        prop_assert!(t.upper < t.lower && t.lower < t.reference);
        prop_assert!(t.lower - t.upper >= config.min_zone_width - EPSILON);
        prop_assert!(t.upper >= config.frame_margin.min(t.lower - config.min_zone_width) - EPSILON);
    }

    #[test]
    fn offset_target_keeps_its_zone(rest in 100.0f64..1000.0, size in 20.0f64..400.0) {
        let config = CounterConfig::animal("cat");
        let model = config.calibrator().calibrate(&full_window(&[rest; 30]), Some(size)).expect("full window");
        let t = model.thresholds();
        prop_assert!(t.upper < t.reference && t.reference < t.lower);
        prop_assert!(t.lower - t.upper >= config.min_zone_width - EPSILON);
    }

    #[test]
    fn adjustments_never_cross_the_lines(
        moves in prop::collection::vec((any::<bool>(), 0.0f64..0.5), 1..20),
        sensitivity in 0.01f64..10.0,
    ) {
        let config = CounterConfig::human("pose");
        let mut model = config.calibrator().calibrate(&full_window(&[0.5; 30]), None).expect("full window");
        model.set_sensitivity(sensitivity).expect("positive multiplier");
        for (up, amount) in moves {
            let direction = if up { AdjustDirection::Up } else { AdjustDirection::Down };
            let t = model.adjust(direction, amount).expect("finite amount");
            prop_assert!(t.upper < t.reference && t.reference < t.lower);
            prop_assert!(t.lower - t.upper >= config.min_zone_width - EPSILON);
        }
        prop_assert!(model.sensitivity() >= 0.3 && model.sensitivity() <= 3.0);
    }

    #[test]
    fn no_count_before_the_window_fills(values in prop::collection::vec(0.0f64..=1.0, 29)) {
        let mut counter = RepCounter::new(CounterConfig::human("pose")).expect("valid config");
        for (i, value) in values.iter().enumerate() {
            prop_assert_eq!(counter.update(Sample::new(*value, i as f64, 0.99), None), 0);
        }
        prop_assert_eq!(counter.state(), CounterState::Calibrating);
        prop_assert!(counter.snapshot().calibration_progress < 1.0);
    }
}
