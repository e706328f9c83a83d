//! Headless scenario description: initial pose, static scene and a scripted
//! input timeline.

use crate::controller::{InputFrame, Key, Projection};
use crate::interaction::Interaction;
use crate::math::Transform;
use crate::navigation::NavigationBounds;
use crate::sensor::{Aabb, BoxScene};
use crate::skeleton::{Bone, Skeleton};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Input held from `from_tick` until the next entry takes over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedInput {
    pub from_tick: u64,
    #[serde(default)]
    pub keys: Vec<Key>,
    #[serde(default)]
    pub projection: Option<Projection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub root: Transform,
    /// Explicit rest pose; when empty an upright chain is built from the
    /// configured bone names.
    #[serde(default)]
    pub bones: Vec<Bone>,
    #[serde(default = "Scenario::default_body_height")]
    pub body_height: f32,
    #[serde(default)]
    pub boxes: Vec<Aabb>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    /// Enables path planning over a grid built from `boxes`.
    #[serde(default)]
    pub navigation: Option<NavigationBounds>,
    #[serde(default)]
    pub inputs: Vec<ScriptedInput>,
    #[serde(default)]
    pub ticks: Option<u64>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            root: Transform::IDENTITY,
            bones: Vec::new(),
            body_height: Self::default_body_height(),
            boxes: Vec::new(),
            interactions: Vec::new(),
            navigation: None,
            inputs: Vec::new(),
            ticks: None,
        }
    }
}

impl Scenario {
    fn default_body_height() -> f32 {
        1.6
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {:?}", path))?;
        let scenario: Scenario = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse scenario {:?}", path))?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.body_height >= 0.0, "body_height must be non-negative");
        for pair in self.inputs.windows(2) {
            anyhow::ensure!(
                pair[0].from_tick < pair[1].from_tick,
                "scripted inputs must be ordered by strictly increasing from_tick"
            );
        }
        let mut ids = HashSet::new();
        for interaction in &self.interactions {
            anyhow::ensure!(
                ids.insert(interaction.id.as_str()),
                "duplicate interaction id {}",
                interaction.id
            );
        }
        Ok(())
    }

    pub fn skeleton(&self, names: &[String]) -> Skeleton {
        if self.bones.is_empty() {
            Skeleton::upright(names, self.root, self.body_height)
        } else {
            Skeleton::new(self.root, self.bones.clone())
        }
    }

    pub fn scene(&self) -> BoxScene {
        BoxScene::new(self.boxes.clone())
    }

    /// Input in effect on `tick` (1-based). Before the first entry nothing
    /// is held.
    pub fn input_at(&self, tick: u64) -> InputFrame {
        self.inputs
            .iter()
            .take_while(|entry| entry.from_tick <= tick)
            .last()
            .map(|entry| InputFrame {
                keys_down: entry.keys.iter().copied().collect(),
                projection: entry.projection.clone(),
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_resolves_timeline() {
        let scenario: Scenario = serde_json::from_str(
            r#"{
                "boxes": [{"min": [-0.5, 0.0, 2.5], "max": [0.5, 0.9, 3.5]}],
                "inputs": [
                    {"from_tick": 5, "keys": ["W"]},
                    {"from_tick": 10, "keys": ["C", "LEFT_SHIFT"]},
                    {"from_tick": 20}
                ]
            }"#,
        )
        .expect("scenario");
        scenario.validate().expect("valid");
        assert!(scenario.input_at(1).keys_down.is_empty());
        assert!(scenario.input_at(5).is_down(Key::W));
        assert!(scenario.input_at(9).is_down(Key::W));
        let held = scenario.input_at(12);
        assert!(held.is_down(Key::C) && held.is_down(Key::LeftShift) && !held.is_down(Key::W));
        assert!(scenario.input_at(25).keys_down.is_empty());
        assert_eq!(scenario.scene().boxes.len(), 1);
        assert_eq!(scenario.body_height, 1.6);
    }

    #[test]
    fn unordered_timeline_is_rejected() {
        let scenario = Scenario {
            inputs: vec![
                ScriptedInput {
                    from_tick: 3,
                    keys: vec![],
                    projection: None,
                },
                ScriptedInput {
                    from_tick: 3,
                    keys: vec![Key::W],
                    projection: None,
                },
            ],
            ..Scenario::default()
        };
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn upright_skeleton_when_no_bones_given() {
        let names = vec!["Hips".to_string(), "Head".to_string()];
        let skeleton = Scenario::default().skeleton(&names);
        skeleton.matches(&names).expect("names");
        assert_eq!(skeleton.bones[1].position.y, 1.6);
    }
}
