use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Key {
    W,
    A,
    S,
    D,
    Q,
    E,
    C,
    L,
    V,
    LeftShift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequirement {
    pub key: Key,
    /// `true` requires the key held, `false` requires it released.
    pub down: bool,
}

impl KeyRequirement {
    pub fn down(key: Key) -> Self {
        Self { key, down: true }
    }

    pub fn up(key: Key) -> Self {
        Self { key, down: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub name: String,
    #[serde(default)]
    pub keys: Vec<KeyRequirement>,
    #[serde(default)]
    pub default: bool,
    /// Locomotion speed pooled into the requested move vector.
    #[serde(default)]
    pub velocity: f32,
    #[serde(default)]
    pub user_control: f32,
    #[serde(default)]
    pub network_control: f32,
}

impl SignalConfig {
    /// Matches when any held-key requirement is held and no released-key
    /// requirement is held. Signals without held-key requirements only ever
    /// activate as the default.
    fn matches(&self, input: &InputFrame) -> bool {
        let any_held = self
            .keys
            .iter()
            .any(|req| req.down && input.is_down(req.key));
        let blocked = self
            .keys
            .iter()
            .any(|req| !req.down && input.is_down(req.key));
        any_held && !blocked
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlsConfig {
    pub forward: Key,
    pub back: Key,
    pub left: Key,
    pub right: Key,
    pub turn_left: Key,
    pub turn_right: Key,
    /// Degrees requested by a held turn key.
    pub turn_rate: f32,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            forward: Key::W,
            back: Key::S,
            left: Key::A,
            right: Key::D,
            turn_left: Key::Q,
            turn_right: Key::E,
            turn_rate: 90.0,
        }
    }
}

/// World-space point picked by the user, optionally on an interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Projection {
    pub point: Vec3,
    #[serde(default)]
    pub interaction: Option<String>,
}

/// Input device state polled once per tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputFrame {
    #[serde(default)]
    pub keys_down: HashSet<Key>,
    #[serde(default)]
    pub projection: Option<Projection>,
}

impl InputFrame {
    pub fn with_keys(keys: &[Key]) -> Self {
        Self {
            keys_down: keys.iter().copied().collect(),
            projection: None,
        }
    }

    pub fn is_down(&self, key: Key) -> bool {
        self.keys_down.contains(&key)
    }
}

/// Maps the declarative signal table onto the current input and pools the
/// active signal's speed and authorities.
pub struct Controller {
    signals: Vec<SignalConfig>,
    controls: ControlsConfig,
    default_index: usize,
    input: InputFrame,
    active: usize,
}

impl Controller {
    pub fn new(signals: Vec<SignalConfig>, controls: ControlsConfig) -> anyhow::Result<Self> {
        let defaults: Vec<usize> = signals
            .iter()
            .enumerate()
            .filter(|(_, signal)| signal.default)
            .map(|(idx, _)| idx)
            .collect();
        anyhow::ensure!(
            defaults.len() == 1,
            "exactly one default signal is required, found {}",
            defaults.len()
        );
        let default_index = defaults[0];
        Ok(Self {
            signals,
            controls,
            default_index,
            input: InputFrame::default(),
            active: default_index,
        })
    }

    pub fn update(&mut self, input: &InputFrame) {
        self.input = input.clone();
        let active = self
            .signals
            .iter()
            .position(|signal| signal.matches(&self.input))
            .unwrap_or(self.default_index);
        if active != self.active {
            debug!(
                target: "locomotion_core::controller",
                from = self.signals[self.active].name.as_str(),
                to = self.signals[active].name.as_str(),
                "signal changed"
            );
        }
        self.active = active;
    }

    pub fn input(&self) -> &InputFrame {
        &self.input
    }

    pub fn signals(&self) -> &[SignalConfig] {
        &self.signals
    }

    pub fn active_signal(&self) -> &SignalConfig {
        &self.signals[self.active]
    }

    pub fn signal_index(&self, name: &str) -> Option<usize> {
        self.signals.iter().position(|signal| signal.name == name)
    }

    pub fn query_signal(&self, name: &str) -> bool {
        self.signals[self.active].name == name
    }

    /// One-hot vector over the signal table for the active signal.
    pub fn pool_signals(&self) -> Vec<f32> {
        let mut pooled = vec![0.0; self.signals.len()];
        pooled[self.active] = 1.0;
        pooled
    }

    pub fn pool_user_control(&self, signals: &[f32]) -> f32 {
        self.pool(signals, |signal| signal.user_control)
    }

    pub fn pool_network_control(&self, signals: &[f32]) -> f32 {
        self.pool(signals, |signal| signal.network_control)
    }

    pub fn pool_velocity(&self, signals: &[f32]) -> f32 {
        self.pool(signals, |signal| signal.velocity)
    }

    fn pool(&self, signals: &[f32], field: impl Fn(&SignalConfig) -> f32) -> f32 {
        self.signals
            .iter()
            .zip(signals.iter())
            .map(|(signal, weight)| field(signal) * weight)
            .sum()
    }

    /// Local-space move request (x right, z forward) scaled by the pooled speed.
    pub fn query_move(&self, signals: &[f32]) -> Vec3 {
        let mut direction = Vec3::ZERO;
        if self.input.is_down(self.controls.forward) {
            direction.z += 1.0;
        }
        if self.input.is_down(self.controls.back) {
            direction.z -= 1.0;
        }
        if self.input.is_down(self.controls.left) {
            direction.x -= 1.0;
        }
        if self.input.is_down(self.controls.right) {
            direction.x += 1.0;
        }
        direction.normalize_or_zero() * self.pool_velocity(signals)
    }

    pub fn query_turn(&self) -> f32 {
        let mut turn = 0.0;
        if self.input.is_down(self.controls.turn_left) {
            turn -= self.controls.turn_rate;
        }
        if self.input.is_down(self.controls.turn_right) {
            turn += self.controls.turn_rate;
        }
        turn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;

    fn controller() -> Controller {
        let config = ControllerConfig::default();
        Controller::new(config.signals, config.controls).expect("controller")
    }

    #[test]
    fn falls_back_to_default_signal() {
        let mut controller = controller();
        controller.update(&InputFrame::default());
        assert_eq!(controller.active_signal().name, "Idle");
        assert_eq!(controller.pool_signals(), vec![1.0, 0.0, 0.0, 0.0, 0.0]);
        assert!((controller.pool_network_control(&controller.pool_signals()) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn walk_and_run_pool_speed() {
        let mut controller = controller();
        controller.update(&InputFrame::with_keys(&[Key::W]));
        assert!(controller.query_signal("Walk"));
        let signals = controller.pool_signals();
        assert_eq!(controller.query_move(&signals), Vec3::new(0.0, 0.0, 1.0));

        controller.update(&InputFrame::with_keys(&[Key::W, Key::LeftShift]));
        assert!(controller.query_signal("Run"));
        let signals = controller.pool_signals();
        assert!((controller.query_move(&signals).z - 3.0).abs() < 1e-6);
    }

    #[test]
    fn sit_key_activates_sit_signal() {
        let mut controller = controller();
        controller.update(&InputFrame::with_keys(&[Key::C]));
        assert!(controller.query_signal("Sit"));
        let signals = controller.pool_signals();
        assert_eq!(controller.pool_network_control(&signals), 0.0);
        assert_eq!(controller.pool_user_control(&signals), 0.25);
    }

    #[test]
    fn turn_keys_map_to_signed_rate() {
        let mut controller = controller();
        controller.update(&InputFrame::with_keys(&[Key::Q]));
        assert_eq!(controller.query_turn(), -90.0);
        controller.update(&InputFrame::with_keys(&[Key::E]));
        assert_eq!(controller.query_turn(), 90.0);
    }

    #[test]
    fn rejects_tables_without_default() {
        let mut signals = ControllerConfig::default().signals;
        signals[0].default = false;
        assert!(Controller::new(signals, ControlsConfig::default()).is_err());
    }
}
