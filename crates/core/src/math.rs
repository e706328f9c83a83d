use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

const DIRECTION_EPS: f32 = 1e-6;

/// Rigid transform used for roots, goals, contacts and interaction centres.
///
/// Forward is +Z and up is +Y.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    #[serde(default = "identity_rotation")]
    pub rotation: Quat,
}

fn identity_rotation() -> Quat {
    Quat::IDENTITY
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Transform at `position` facing `direction` projected on the ground plane.
    pub fn from_position_direction(position: Vec3, direction: Vec3) -> Self {
        Self {
            position,
            rotation: look_rotation(planar(direction), Vec3::Y),
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_direction(mut self, direction: Vec3) -> Self {
        self.rotation = look_rotation(direction, Vec3::Y);
        self
    }

    /// Same transform dropped onto the ground plane (height zeroed).
    pub fn grounded(mut self) -> Self {
        self.position.y = 0.0;
        self
    }

    pub fn to_local_position(&self, world: Vec3) -> Vec3 {
        self.rotation.inverse() * (world - self.position)
    }

    pub fn to_local_direction(&self, world: Vec3) -> Vec3 {
        self.rotation.inverse() * world
    }

    pub fn to_world_position(&self, local: Vec3) -> Vec3 {
        self.position + self.rotation * local
    }

    pub fn to_world_direction(&self, local: Vec3) -> Vec3 {
        self.rotation * local
    }

    pub fn interpolate(&self, other: &Transform, t: f32) -> Transform {
        interpolate_transform(self, other, t)
    }
}

/// Rotation whose forward axis points along `forward` with `up` as the
/// secondary hint. Degenerate inputs fall back to identity instead of NaN.
pub fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    let forward = match forward.try_normalize() {
        Some(forward) => forward,
        None => return Quat::IDENTITY,
    };
    let right = match up.cross(forward).try_normalize() {
        Some(right) => right,
        None => {
            // forward parallel to up: pick any perpendicular right axis
            let fallback = if forward.x.abs() < 0.9 { Vec3::X } else { Vec3::Z };
            match fallback.cross(forward).try_normalize() {
                Some(right) => right,
                None => return Quat::IDENTITY,
            }
        }
    };
    let up = forward.cross(right);
    Quat::from_mat3(&Mat3::from_cols(right, up, forward)).normalize()
}

/// Projects `direction` on the ground plane and normalises it.
pub fn planar(direction: Vec3) -> Vec3 {
    Vec3::new(direction.x, 0.0, direction.z).normalize_or_zero()
}

pub fn normalize_or_zero(direction: Vec3) -> Vec3 {
    if direction.is_finite() {
        direction.normalize_or_zero()
    } else {
        Vec3::ZERO
    }
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    a + (b - a) * t
}

pub fn lerp_vec3(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    a.lerp(b, t.clamp(0.0, 1.0))
}

/// Spherical interpolation of two vectors treating them as directions with
/// magnitude; the magnitude is interpolated linearly.
pub fn slerp_vec3(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    let t = t.clamp(0.0, 1.0);
    let len_a = a.length();
    let len_b = b.length();
    if len_a < DIRECTION_EPS || len_b < DIRECTION_EPS {
        return a.lerp(b, t);
    }
    let dir_a = a / len_a;
    let dir_b = b / len_b;
    let dot = dir_a.dot(dir_b).clamp(-1.0, 1.0);
    let length = len_a + (len_b - len_a) * t;
    if dot > 1.0 - DIRECTION_EPS {
        return dir_a.lerp(dir_b, t).normalize_or_zero() * length;
    }
    let angle = dot.acos();
    let axis = if dot < -1.0 + DIRECTION_EPS {
        let candidate = dir_a.cross(Vec3::Y);
        if candidate.length_squared() < DIRECTION_EPS {
            dir_a.cross(Vec3::X).normalize()
        } else {
            candidate.normalize()
        }
    } else {
        dir_a.cross(dir_b).normalize()
    };
    Quat::from_axis_angle(axis, angle * t) * dir_a * length
}

pub fn interpolate_transform(a: &Transform, b: &Transform, t: f32) -> Transform {
    let t = t.clamp(0.0, 1.0);
    Transform {
        position: a.position.lerp(b.position, t),
        rotation: a.rotation.slerp(b.rotation, t).normalize(),
    }
}

pub fn interpolate_weights(a: &[f32], b: &[f32], t: f32) -> Vec<f32> {
    a.iter().zip(b.iter()).map(|(x, y)| lerp(*x, *y, t)).collect()
}

/// Symmetric temporal falloff over a window of `count` samples: 1 at the
/// centre, 0 at both ends, sharpened by `curvature`.
pub fn falloff(index: usize, count: usize, curvature: f32) -> f32 {
    if count <= 1 {
        return 1.0;
    }
    let span = (count - 1) as f32;
    let base = (1.0 - (2.0 * index as f32 / span - 1.0).abs()).clamp(0.0, 1.0);
    base.powf(curvature)
}

/// Linear remap of `value` from `[from_min, from_max]` into `[to_min, to_max]`.
pub fn normalise(value: f32, from_min: f32, from_max: f32, to_min: f32, to_max: f32) -> f32 {
    let span = from_max - from_min;
    if span.abs() < f32::EPSILON {
        return to_min;
    }
    (value - from_min) / span * (to_max - to_min) + to_min
}

/// Clamp into `[0,1]`; NaN collapses to 0.
pub fn clamp01(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn clamp01_all(values: &mut [f32]) {
    for value in values.iter_mut() {
        *value = clamp01(*value);
    }
}

/// Unsigned angle between two vectors, degrees.
pub fn angle_degrees(a: Vec3, b: Vec3) -> f32 {
    let denom = (a.length_squared() * b.length_squared()).sqrt();
    if denom < DIRECTION_EPS {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Signed angle from `from` to `to` around `axis`, degrees. Positive turns
/// +Z toward +X around +Y.
pub fn signed_angle_degrees(from: Vec3, to: Vec3, axis: Vec3) -> f32 {
    let unsigned = angle_degrees(from, to);
    let sign = axis.dot(from.cross(to));
    if sign < 0.0 {
        -unsigned
    } else {
        unsigned
    }
}

pub fn yaw_rotation(degrees: f32) -> Quat {
    Quat::from_axis_angle(Vec3::Y, degrees.to_radians())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn falloff_peaks_at_centre_and_vanishes_at_edges() {
        for curvature in [0.5, 1.0, 2.0, 7.0] {
            assert!(approx(falloff(6, 13, curvature), 1.0));
            assert!(approx(falloff(0, 13, curvature), 0.0));
            assert!(approx(falloff(12, 13, curvature), 0.0));
        }
        assert!(falloff(3, 13, 2.0) < falloff(3, 13, 0.5));
    }

    #[test]
    fn look_rotation_matches_forward() {
        let rotation = look_rotation(Vec3::X, Vec3::Y);
        assert!((rotation * Vec3::Z - Vec3::X).length() < 1e-5);
        assert_eq!(look_rotation(Vec3::ZERO, Vec3::Y), Quat::IDENTITY);
    }

    #[test]
    fn relative_round_trip() {
        let root = Transform::from_position_direction(Vec3::new(3.0, 0.0, -2.0), Vec3::X);
        let world = Vec3::new(1.0, 2.0, 5.0);
        let local = root.to_local_position(world);
        assert!((root.to_world_position(local) - world).length() < 1e-5);
    }

    #[test]
    fn slerp_keeps_unit_length_between_directions() {
        let mid = slerp_vec3(Vec3::Z, Vec3::X, 0.5);
        assert!(approx(mid.length(), 1.0));
        assert!(approx(mid.x, mid.z));
    }

    #[test]
    fn yaw_turns_forward_toward_positive_x() {
        let turned = yaw_rotation(90.0) * Vec3::Z;
        assert!((turned - Vec3::X).length() < 1e-5);
        assert!(approx(signed_angle_degrees(Vec3::Z, Vec3::X, Vec3::Y), 90.0));
    }

    #[test]
    fn clamp_handles_nan() {
        assert_eq!(clamp01(f32::NAN), 0.0);
        assert_eq!(clamp01(1.5), 1.0);
        assert_eq!(clamp01(-0.3), 0.0);
    }
}
