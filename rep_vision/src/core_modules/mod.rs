pub mod calibration_window;
pub mod calibrator;
pub mod pattern_detector;
pub mod sample;
pub mod state_machine;
pub mod threshold_model;
pub mod validation;
