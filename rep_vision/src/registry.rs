// THEORY:
// The `CounterRegistry` is the catalogue of counters a process knows how to build.
// It is an ordinary value: constructed once (usually at startup), passed by
// reference to whoever needs to build counters, and never reached through global
// state. Registering, listing and clearing are explicit operations on that value.
//
// Key architectural principles:
// 1.  **Configurations, Not Instances**: The registry stores `CounterConfig`s. Every
//     `build` call produces a fresh, uncalibrated `RepCounter`, so two sessions built
//     from the same entry never share state.
// 2.  **Deterministic Listing**: Entries are kept in a `BTreeMap`, so listings are
//     sorted by name without extra work.
// 3.  **Presets as Data**: The built-in presets are ordinary configurations, and
//     additional ones can be loaded from TOML `[[counter]]` tables at runtime.

use crate::config::{AnimalSettings, CounterConfig, CounterKind, HumanSettings, KindConfig, ObjectSettings};
use crate::core_modules::state_machine::{Direction, LogicType};
use crate::error::{CounterError, Result};
use crate::pipeline::RepCounter;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const PLANK_HOLD: &str = "plank_hold";
pub const CAT_JUMP: &str = "cat_jump";
pub const SPORTS_BALL_BOUNCE: &str = "sports_ball_bounce";

// Pose landmark indices used by the plank preset.
const MOUTH_LEFT: u32 = 9;
const LEFT_SHOULDER: u32 = 11;
const RIGHT_SHOULDER: u32 = 12;

/// A TOML file holding any number of `[[counter]]` tables.
#[derive(Debug, Deserialize)]
struct CounterFile {
    #[serde(default)]
    counter: Vec<CounterConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct CounterRegistry {
    entries: BTreeMap<String, CounterConfig>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the plank, cat and sports-ball presets.
    pub fn with_builtin_presets() -> Self {
        let mut registry = Self::new();
        for config in builtin_presets() {
            registry.register(config.name.clone(), config);
        }
        registry
    }

    /// Registers `config` under `name`, returning the entry it replaced.
    pub fn register(&mut self, name: impl Into<String>, config: CounterConfig) -> Option<CounterConfig> {
        let name = name.into();
        debug!(counter = %name, kind = %config.counter_kind(), logic = %config.logic_type, "Registering counter");
        self.entries.insert(name, config)
    }

    pub fn get(&self, name: &str) -> Option<&CounterConfig> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Registered names of one kind, sorted.
    pub fn list_by_kind(&self, kind: CounterKind) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, config)| config.counter_kind() == kind)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn remove(&mut self, name: &str) -> Option<CounterConfig> {
        self.entries.remove(name)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Builds a fresh counter from the named entry.
    pub fn build(&self, name: &str) -> Result<RepCounter> {
        let config = self
            .get(name)
            .ok_or_else(|| CounterError::UnknownCounter(name.to_string()))?;
        RepCounter::new(config.clone())
    }

    /// Registers every `[[counter]]` table of a TOML document.
    ///
    /// All tables are parsed and validated before any is registered, so a bad table
    /// leaves the registry untouched. Returns the registered names.
    pub fn load_toml(&mut self, text: &str) -> Result<Vec<String>> {
        let file: CounterFile = toml::from_str(text)?;
        for config in &file.counter {
            config.validate()?;
        }
        let names: Vec<String> = file.counter.iter().map(|c| c.name.clone()).collect();
        for config in file.counter {
            self.register(config.name.clone(), config);
        }
        info!(count = names.len(), "Loaded counter presets");
        Ok(names)
    }
}

/// The presets shipped with the engine.
pub fn builtin_presets() -> Vec<CounterConfig> {
    let plank = CounterConfig {
        description: "Shoulder dip during a plank hold, validated against the other shoulder and the mouth".to_string(),
        logic_type: LogicType::VerticalMovement,
        direction: Direction::DownFirst,
        threshold: 0.1,
        stable_frames: 3,
        min_confidence: 0.9,
        kind: KindConfig::Human(HumanSettings {
            validation_landmarks: vec![LEFT_SHOULDER, RIGHT_SHOULDER, MOUTH_LEFT],
            ..HumanSettings::default()
        }),
        ..CounterConfig::human(PLANK_HOLD)
    };

    let cat = CounterConfig {
        description: "Cat jumps: leave the resting spot and cross the target line above it".to_string(),
        logic_type: LogicType::MovementDetection,
        threshold: 40.0,
        stable_frames: 5,
        min_confidence: 0.4,
        kind: KindConfig::Animal(AnimalSettings::default()),
        ..CounterConfig::animal(CAT_JUMP)
    };

    let ball = CounterConfig {
        description: "Ball bounces: leave the ground past the bounce line, then land".to_string(),
        logic_type: LogicType::BounceDetection,
        threshold: 40.0,
        stable_frames: 5,
        min_confidence: 0.25,
        kind: KindConfig::Object(ObjectSettings::default()),
        ..CounterConfig::object(SPORTS_BALL_BOUNCE)
    };

    vec![plank, cat, ball]
}
