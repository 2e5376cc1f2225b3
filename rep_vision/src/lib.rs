// THEORY:
// This file is the main entry point for the `rep_vision` library crate: a repetition
// counting engine that turns a per-frame scalar signal (a landmark coordinate or a
// bounding-box center) into a count of completed movements.
//
// The primary export is `RepCounter`, one counting session for one tracked target,
// together with its configuration (`CounterConfig`), its per-frame result (`Report`)
// and its introspection record (`DebugSnapshot`). Around it sit the explicit
// `CounterRegistry` of named configurations and the `SessionPool` / `SharedCounter`
// concurrency wrappers. The numerical building blocks (`core_modules`) stay public
// for callers that want to compose their own pipeline.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod registry;

pub use config::{AnimalSettings, CounterConfig, CounterKind, HumanSettings, KindConfig, ObjectSettings};
pub use core_modules::sample::{AuxLandmark, AuxLandmarks, LandmarkId, Sample};
pub use core_modules::state_machine::{CounterState, Direction, LogicType, Transition};
pub use core_modules::threshold_model::{AdjustDirection, SensitivityDirection, ThresholdSnapshot};
pub use error::{CounterError, Result, SessionId};
pub use parallel_pipeline::{SessionPool, SharedCounter};
pub use pipeline::{DebugSnapshot, ParamValue, ParameterChange, RepCounter, Report};
pub use registry::CounterRegistry;
