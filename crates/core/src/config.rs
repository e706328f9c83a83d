use crate::controller::{ControlsConfig, Key, KeyRequirement, SignalConfig};
use crate::port::ProtocolLayout;
use crate::noise::NoiseConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default = "default_styles")]
    pub styles: Vec<String>,
    #[serde(default = "default_styles")]
    pub actions: Vec<String>,
    #[serde(default = "default_contacts")]
    pub contacts: Vec<String>,
    #[serde(default)]
    pub bones: Vec<String>,
    #[serde(default = "default_signals")]
    pub signals: Vec<SignalConfig>,
    #[serde(default)]
    pub controls: ControlsConfig,
    #[serde(default)]
    pub blending: BlendingConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub interaction: InteractionConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default = "default_framerate")]
    pub framerate: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            styles: default_styles(),
            actions: default_styles(),
            contacts: default_contacts(),
            bones: Vec::new(),
            signals: default_signals(),
            controls: ControlsConfig::default(),
            blending: BlendingConfig::default(),
            sensor: SensorConfig::default(),
            interaction: InteractionConfig::default(),
            navigation: NavigationConfig::default(),
            predictor: PredictorConfig::default(),
            noise: NoiseConfig::default(),
            logging: LoggingConfig::default(),
            telemetry: TelemetryConfig::default(),
            framerate: default_framerate(),
        }
    }
}

impl ControllerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read controller config {:?}", path))?;
        let config: ControllerConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse controller config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.window.validate()?;
        anyhow::ensure!(self.framerate > 0.0, "framerate must be > 0");
        anyhow::ensure!(!self.styles.is_empty(), "at least one style is required");
        anyhow::ensure!(!self.actions.is_empty(), "at least one action is required");
        anyhow::ensure!(unique(&self.styles), "style names must be unique");
        anyhow::ensure!(unique(&self.actions), "action names must be unique");
        anyhow::ensure!(unique(&self.contacts), "contact bone names must be unique");

        anyhow::ensure!(!self.signals.is_empty(), "at least one signal is required");
        let defaults = self.signals.iter().filter(|signal| signal.default).count();
        anyhow::ensure!(
            defaults == 1,
            "exactly one signal must be marked default, found {defaults}"
        );
        let names: Vec<String> = self.signals.iter().map(|s| s.name.clone()).collect();
        anyhow::ensure!(unique(&names), "signal names must be unique");
        anyhow::ensure!(
            names == self.actions,
            "signals {:?} must match the action set {:?} in order",
            names,
            self.actions
        );
        for signal in &self.signals {
            anyhow::ensure!(
                (0.0..=1.0).contains(&signal.user_control)
                    && (0.0..=1.0).contains(&signal.network_control),
                "signal {} authorities must be within [0,1]",
                signal.name
            );
            anyhow::ensure!(
                signal.velocity >= 0.0,
                "signal {} velocity must be non-negative",
                signal.name
            );
        }

        self.blending.validate()?;
        self.sensor.validate()?;
        for name in &self.interaction.signals {
            anyhow::ensure!(
                self.styles.contains(name),
                "interaction signal {name} has no matching style"
            );
            anyhow::ensure!(
                names.contains(name),
                "interaction signal {name} is not a declared signal"
            );
        }
        anyhow::ensure!(
            self.actions.contains(&self.interaction.walk_action),
            "walk action {} is not a declared action",
            self.interaction.walk_action
        );
        anyhow::ensure!(
            self.interaction.exit_threshold > 0.0 && self.interaction.exit_threshold < 1.0,
            "interaction.exit_threshold must be within (0,1)"
        );

        let layout = ProtocolLayout::from_config(self);
        if let Some(expected) = self.predictor.input_dim {
            anyhow::ensure!(
                expected == layout.input_dim(),
                "predictor.input_dim {expected} disagrees with feed layout {}",
                layout.input_dim()
            );
        }
        if let Some(expected) = self.predictor.output_dim {
            anyhow::ensure!(
                expected == layout.output_dim(),
                "predictor.output_dim {expected} disagrees with read layout {}",
                layout.output_dim()
            );
        }
        Ok(())
    }

    pub fn style_index(&self, name: &str) -> Option<usize> {
        self.styles.iter().position(|style| style == name)
    }

    pub fn action_index(&self, name: &str) -> Option<usize> {
        self.actions.iter().position(|action| action == name)
    }

    /// One-hot action intent for the named action.
    pub fn action_intent(&self, name: &str) -> Vec<f32> {
        let mut intent = vec![0.0; self.actions.len()];
        if let Some(idx) = self.action_index(name) {
            intent[idx] = 1.0;
        }
        intent
    }
}

fn unique(names: &[String]) -> bool {
    let mut seen = HashSet::new();
    names.iter().all(|name| seen.insert(name.as_str()))
}

fn default_framerate() -> f32 {
    30.0
}

fn default_styles() -> Vec<String> {
    ["Idle", "Walk", "Run", "Sit", "Liedown"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}

fn default_contacts() -> Vec<String> {
    ["right_hip", "right_wrist", "left_wrist", "right_foot", "left_foot"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}

fn default_signals() -> Vec<SignalConfig> {
    let idle = SignalConfig {
        name: "Idle".into(),
        keys: [Key::W, Key::A, Key::S, Key::D, Key::Q, Key::E]
            .into_iter()
            .map(KeyRequirement::up)
            .chain(std::iter::once(KeyRequirement::down(Key::V)))
            .collect(),
        default: true,
        velocity: 0.0,
        user_control: 0.25,
        network_control: 0.1,
    };
    let walk = SignalConfig {
        name: "Walk".into(),
        keys: [Key::W, Key::A, Key::S, Key::D, Key::Q, Key::E]
            .into_iter()
            .map(KeyRequirement::down)
            .chain([KeyRequirement::up(Key::LeftShift), KeyRequirement::up(Key::C)])
            .collect(),
        default: false,
        velocity: 1.0,
        user_control: 0.25,
        network_control: 0.25,
    };
    let run = SignalConfig {
        name: "Run".into(),
        keys: vec![KeyRequirement::down(Key::LeftShift)],
        default: false,
        velocity: 3.0,
        user_control: 0.25,
        network_control: 0.25,
    };
    let sit = SignalConfig {
        name: "Sit".into(),
        keys: vec![KeyRequirement::down(Key::C)],
        default: false,
        velocity: 0.0,
        user_control: 0.25,
        network_control: 0.0,
    };
    let liedown = SignalConfig {
        name: "Liedown".into(),
        keys: vec![KeyRequirement::down(Key::L)],
        default: false,
        velocity: 0.0,
        user_control: 0.25,
        network_control: 0.0,
    };
    vec![idle, walk, run, sit, liedown]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub past_keys: usize,
    pub future_keys: usize,
    /// Seconds covered by the past half.
    #[serde(default = "WindowConfig::default_span")]
    pub past_window: f32,
    /// Seconds covered by the future half.
    #[serde(default = "WindowConfig::default_span")]
    pub future_window: f32,
    pub resolution: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            past_keys: 6,
            future_keys: 6,
            past_window: 1.0,
            future_window: 1.0,
            resolution: 1,
        }
    }
}

impl WindowConfig {
    fn default_span() -> f32 {
        1.0
    }

    pub fn sample_count(&self) -> usize {
        self.resolution * (self.past_keys + self.future_keys) + 1
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.past_keys > 0, "window.past_keys must be > 0");
        anyhow::ensure!(self.future_keys > 0, "window.future_keys must be > 0");
        anyhow::ensure!(
            self.past_keys == self.future_keys,
            "window keys must be symmetric around the pivot ({} past vs {} future)",
            self.past_keys,
            self.future_keys
        );
        anyhow::ensure!(self.resolution > 0, "window.resolution must be > 0");
        anyhow::ensure!(
            self.past_window > 0.0 && self.future_window > 0.0,
            "window spans must be > 0"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendingConfig {
    #[serde(default = "BlendingConfig::default_static_curvature")]
    pub static_curvature: f32,
    #[serde(default = "BlendingConfig::default_dynamic_curvature")]
    pub dynamic_curvature: f32,
    #[serde(default = "BlendingConfig::default_bias_exponent")]
    pub bias_exponent: f32,
    /// Seconds of motion requested across the whole window.
    #[serde(default = "BlendingConfig::default_look_ahead")]
    pub look_ahead_time: f32,
    #[serde(default = "BlendingConfig::default_correction_curvature")]
    pub correction_curvature: f32,
    /// Multiplier on squared root/goal disagreement in the inverse-trajectory
    /// trust exponent.
    #[serde(default = "BlendingConfig::default_correction_sharpness")]
    pub correction_sharpness: f32,
    #[serde(default = "BlendingConfig::default_pose_blend")]
    pub pose_blend: f32,
}

impl Default for BlendingConfig {
    fn default() -> Self {
        Self {
            static_curvature: Self::default_static_curvature(),
            dynamic_curvature: Self::default_dynamic_curvature(),
            bias_exponent: Self::default_bias_exponent(),
            look_ahead_time: Self::default_look_ahead(),
            correction_curvature: Self::default_correction_curvature(),
            correction_sharpness: Self::default_correction_sharpness(),
            pose_blend: Self::default_pose_blend(),
        }
    }
}

impl BlendingConfig {
    fn default_static_curvature() -> f32 {
        2.0
    }

    fn default_dynamic_curvature() -> f32 {
        0.5
    }

    fn default_bias_exponent() -> f32 {
        0.75
    }

    fn default_look_ahead() -> f32 {
        2.0
    }

    fn default_correction_curvature() -> f32 {
        2.0
    }

    fn default_correction_sharpness() -> f32 {
        100.0
    }

    fn default_pose_blend() -> f32 {
        0.5
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.static_curvature > 0.0
                && self.dynamic_curvature > 0.0
                && self.correction_curvature > 0.0,
            "blending curvatures must be > 0"
        );
        anyhow::ensure!(self.bias_exponent > 0.0, "blending.bias_exponent must be > 0");
        anyhow::ensure!(self.look_ahead_time >= 0.0, "blending.look_ahead_time must be >= 0");
        anyhow::ensure!(
            self.correction_sharpness >= 0.0,
            "blending.correction_sharpness must be >= 0"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.pose_blend),
            "blending.pose_blend must be within [0,1]"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub resolution: [usize; 3],
    /// Extent sensed around the root in free locomotion.
    #[serde(default = "SensorConfig::default_size")]
    pub size: [f32; 3],
    #[serde(default = "SensorConfig::default_smoothing")]
    pub smoothing: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            resolution: [8, 8, 8],
            size: Self::default_size(),
            smoothing: Self::default_smoothing(),
        }
    }
}

impl SensorConfig {
    fn default_size() -> [f32; 3] {
        [2.0, 2.0, 2.0]
    }

    fn default_smoothing() -> f32 {
        0.9
    }

    pub fn cell_count(&self) -> usize {
        self.resolution.iter().product()
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.resolution.iter().all(|axis| *axis > 0),
            "sensor.resolution must be > 0 on every axis"
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&self.smoothing),
            "sensor.smoothing must be within [0,1)"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionConfig {
    #[serde(default = "InteractionConfig::default_signals")]
    pub signals: Vec<String>,
    #[serde(default = "InteractionConfig::default_threshold")]
    pub exit_threshold: f32,
    #[serde(default = "InteractionConfig::default_true")]
    pub use_path_planning: bool,
    #[serde(default)]
    pub use_contact_oracle: bool,
    #[serde(default = "InteractionConfig::default_contact")]
    pub target_contact: String,
    #[serde(default = "InteractionConfig::default_walk")]
    pub walk_action: String,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            signals: Self::default_signals(),
            exit_threshold: Self::default_threshold(),
            use_path_planning: true,
            use_contact_oracle: false,
            target_contact: Self::default_contact(),
            walk_action: Self::default_walk(),
        }
    }
}

impl InteractionConfig {
    fn default_signals() -> Vec<String> {
        vec!["Sit".into(), "Liedown".into()]
    }

    fn default_threshold() -> f32 {
        0.25
    }

    fn default_true() -> bool {
        true
    }

    fn default_contact() -> String {
        "Hips".into()
    }

    fn default_walk() -> String {
        "Walk".into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    #[serde(default = "NavigationConfig::default_sample_radius")]
    pub sample_radius: f32,
    #[serde(default = "NavigationConfig::default_prune")]
    pub prune_distance: f32,
    #[serde(default = "NavigationConfig::default_move_reach")]
    pub move_reach: f32,
    #[serde(default = "NavigationConfig::default_turn_reach")]
    pub turn_reach: f32,
    #[serde(default = "NavigationConfig::default_forward_cone")]
    pub forward_cone_degrees: f32,
    #[serde(default = "NavigationConfig::default_dead_zone")]
    pub turn_dead_zone_degrees: f32,
    #[serde(default = "NavigationConfig::default_turn")]
    pub turn_degrees: f32,
    #[serde(default = "NavigationConfig::default_cell_size")]
    pub cell_size: f32,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            sample_radius: Self::default_sample_radius(),
            prune_distance: Self::default_prune(),
            move_reach: Self::default_move_reach(),
            turn_reach: Self::default_turn_reach(),
            forward_cone_degrees: Self::default_forward_cone(),
            turn_dead_zone_degrees: Self::default_dead_zone(),
            turn_degrees: Self::default_turn(),
            cell_size: Self::default_cell_size(),
        }
    }
}

impl NavigationConfig {
    fn default_sample_radius() -> f32 {
        1.0
    }

    fn default_prune() -> f32 {
        0.5
    }

    fn default_move_reach() -> f32 {
        0.3
    }

    fn default_turn_reach() -> f32 {
        0.5
    }

    fn default_forward_cone() -> f32 {
        45.0
    }

    fn default_dead_zone() -> f32 {
        10.0
    }

    fn default_turn() -> f32 {
        90.0
    }

    fn default_cell_size() -> f32 {
        0.25
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PredictorConfig {
    /// Expected feed dimensionality; checked against the layout at setup.
    #[serde(default)]
    pub input_dim: Option<usize>,
    #[serde(default)]
    pub output_dim: Option<usize>,
    /// Directory holding normalisation binaries for `NormalizedPredictor`.
    #[serde(default)]
    pub norm_dir: Option<PathBuf>,
    #[serde(default)]
    pub latent_dim: usize,
    #[serde(default)]
    pub latent_std: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "INFO".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_level(),
            log_path: None,
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControllerConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.window.sample_count(), 13);
    }

    #[test]
    fn missing_default_signal_is_rejected() {
        let mut config = ControllerConfig::default();
        for signal in &mut config.signals {
            signal.default = false;
        }
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("default"));
    }

    #[test]
    fn asymmetric_window_is_rejected() {
        let mut config = ControllerConfig::default();
        config.window.future_keys = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn predictor_dimension_mismatch_is_rejected() {
        let mut config = ControllerConfig::default();
        config.predictor.input_dim = Some(7);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("input_dim"));
    }

    #[test]
    fn parses_partial_json_with_defaults() {
        let config: ControllerConfig = serde_json::from_str(
            r#"{ "window": { "past_keys": 6, "future_keys": 6, "resolution": 5 },
                 "bones": ["hips", "head"] }"#,
        )
        .expect("parse");
        assert_eq!(config.window.sample_count(), 61);
        assert_eq!(config.signals.len(), 5);
        config.validate().expect("valid");
    }
}
