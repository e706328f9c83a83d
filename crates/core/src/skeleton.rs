use crate::math::{look_rotation, Transform};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub name: String,
    pub position: Vec3,
    #[serde(default = "Bone::default_rotation")]
    pub rotation: Quat,
    #[serde(default)]
    pub velocity: Vec3,
}

impl Bone {
    fn default_rotation() -> Quat {
        Quat::IDENTITY
    }

    pub fn new(name: impl Into<String>, position: Vec3) -> Self {
        Self {
            name: name.into(),
            position,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn set_orientation(&mut self, forward: Vec3, up: Vec3) {
        if forward.length_squared() > 1e-12 {
            self.rotation = look_rotation(forward, up);
        }
    }
}

/// Output pose of one character: the committed root plus world-space bones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    #[serde(default)]
    pub root: Transform,
    #[serde(default)]
    pub bones: Vec<Bone>,
}

impl Skeleton {
    pub fn new(root: Transform, bones: Vec<Bone>) -> Self {
        Self { root, bones }
    }

    /// Bones stacked above the root, evenly spaced up to `height`.
    pub fn upright(names: &[String], root: Transform, height: f32) -> Self {
        let step = if names.len() > 1 {
            height / (names.len() - 1) as f32
        } else {
            0.0
        };
        let bones = names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let mut bone = Bone::new(
                    name.clone(),
                    root.to_world_position(Vec3::new(0.0, idx as f32 * step, 0.0)),
                );
                bone.rotation = root.rotation;
                bone
            })
            .collect();
        Self { root, bones }
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bone(&self, name: &str) -> Option<&Bone> {
        self.bones.iter().find(|bone| bone.name == name)
    }

    /// Checks the bone order against the configured names.
    pub fn matches(&self, names: &[String]) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.bones.len() == names.len(),
            "skeleton has {} bones, configuration names {}",
            self.bones.len(),
            names.len()
        );
        for (bone, name) in self.bones.iter().zip(names) {
            anyhow::ensure!(
                &bone.name == name,
                "skeleton bone {} does not match configured bone {}",
                bone.name,
                name
            );
        }
        Ok(())
    }
}
