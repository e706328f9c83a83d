//! Cuboid occupancy grid sensed around a transform.

use crate::math::{interpolate_transform, Transform};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        let half = size.abs() * 0.5;
        Self::new(center - half, center + half)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Separating-axis test against an oriented box.
    pub fn overlaps_oriented(&self, center: Vec3, half_extents: Vec3, rotation: Quat) -> bool {
        let box_axes = [rotation * Vec3::X, rotation * Vec3::Y, rotation * Vec3::Z];
        let world_axes = [Vec3::X, Vec3::Y, Vec3::Z];
        let own_half = self.half_extents();
        let offset = center - self.center();

        let separated = |axis: Vec3| -> bool {
            if axis.length_squared() < 1e-10 {
                return false;
            }
            let own = own_half.x * axis.x.abs() + own_half.y * axis.y.abs() + own_half.z * axis.z.abs();
            let other = half_extents.x * axis.dot(box_axes[0]).abs()
                + half_extents.y * axis.dot(box_axes[1]).abs()
                + half_extents.z * axis.dot(box_axes[2]).abs();
            offset.dot(axis).abs() > own + other
        };

        if world_axes.iter().any(|axis| separated(*axis)) {
            return false;
        }
        if box_axes.iter().any(|axis| separated(*axis)) {
            return false;
        }
        for world in world_axes {
            for local in box_axes {
                if separated(world.cross(local)) {
                    return false;
                }
            }
        }
        true
    }
}

/// Collision geometry the occupancy sensor queries.
pub trait CollisionScene {
    fn overlaps_box(&self, center: Vec3, half_extents: Vec3, rotation: Quat) -> bool;
}

/// Static scene made of axis-aligned boxes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoxScene {
    #[serde(default)]
    pub boxes: Vec<Aabb>,
}

impl BoxScene {
    pub fn new(boxes: Vec<Aabb>) -> Self {
        Self { boxes }
    }

    pub fn push(&mut self, aabb: Aabb) {
        self.boxes.push(aabb);
    }
}

impl CollisionScene for BoxScene {
    fn overlaps_box(&self, center: Vec3, half_extents: Vec3, rotation: Quat) -> bool {
        self.boxes
            .iter()
            .any(|aabb| aabb.overlaps_oriented(center, half_extents, rotation))
    }
}

/// Grid of cells inside a cuboid placed at a pivot. Each cell carries its
/// world reference point and an exponentially smoothed occupancy.
#[derive(Debug, Clone)]
pub struct OccupancySensor {
    resolution: [usize; 3],
    /// Cell centres in the unit cube `[-0.5, 0.5]^3`.
    points: Vec<Vec3>,
    references: Vec<Vec3>,
    occupancies: Vec<f32>,
    pivot: Transform,
    size: Vec3,
    primed: bool,
}

impl OccupancySensor {
    pub fn new(resolution: [usize; 3]) -> Self {
        let [rx, ry, rz] = resolution;
        let mut points = Vec::with_capacity(rx * ry * rz);
        for x in 0..rx {
            for y in 0..ry {
                for z in 0..rz {
                    points.push(Vec3::new(
                        -0.5 + (x as f32 + 0.5) / rx as f32,
                        -0.5 + (y as f32 + 0.5) / ry as f32,
                        -0.5 + (z as f32 + 0.5) / rz as f32,
                    ));
                }
            }
        }
        let count = points.len();
        Self {
            resolution,
            points,
            references: vec![Vec3::ZERO; count],
            occupancies: vec![0.0; count],
            pivot: Transform::IDENTITY,
            size: Vec3::ZERO,
            primed: false,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.points.len()
    }

    pub fn resolution(&self) -> [usize; 3] {
        self.resolution
    }

    pub fn pivot(&self) -> Transform {
        self.pivot
    }

    pub fn size(&self) -> Vec3 {
        self.size
    }

    pub fn references(&self) -> &[Vec3] {
        &self.references
    }

    pub fn occupancies(&self) -> &[f32] {
        &self.occupancies
    }

    /// Forgets the smoothed state; the next sense starts from scratch.
    pub fn reset(&mut self) {
        self.occupancies.iter_mut().for_each(|value| *value = 0.0);
        self.primed = false;
    }

    /// Samples `scene` inside a cuboid of `size` centred on `pivot`.
    /// `smoothing` in `[0,1)` keeps that share of the previous state.
    pub fn sense(
        &mut self,
        pivot: &Transform,
        scene: &dyn CollisionScene,
        size: Vec3,
        smoothing: f32,
    ) {
        let smoothing = smoothing.clamp(0.0, 1.0);
        if self.primed {
            self.pivot = interpolate_transform(&self.pivot, pivot, 1.0 - smoothing);
            self.size = self.size.lerp(size, 1.0 - smoothing);
        } else {
            self.pivot = *pivot;
            self.size = size;
            self.primed = true;
        }
        let [rx, ry, rz] = self.resolution;
        let cell_half = self.size / Vec3::new(rx as f32, ry as f32, rz as f32) * 0.5;
        for (idx, point) in self.points.iter().enumerate() {
            let reference = self.pivot.to_world_position(*point * self.size);
            let hit = scene.overlaps_box(reference, cell_half, self.pivot.rotation);
            let sample = if hit { 1.0 } else { 0.0 };
            self.references[idx] = reference;
            self.occupancies[idx] = smoothing * self.occupancies[idx] + (1.0 - smoothing) * sample;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> BoxScene {
        BoxScene::new(vec![Aabb::from_center_size(
            Vec3::new(0.5, 0.25, 0.0),
            Vec3::new(1.0, 0.5, 2.0),
        )])
    }

    #[test]
    fn oriented_overlap() {
        let aabb = Aabb::from_center_size(Vec3::ZERO, Vec3::ONE);
        assert!(aabb.overlaps_oriented(Vec3::new(0.9, 0.0, 0.0), Vec3::splat(0.5), Quat::IDENTITY));
        assert!(!aabb.overlaps_oriented(Vec3::new(1.1, 0.0, 0.0), Vec3::splat(0.5), Quat::IDENTITY));
        // a 45 degree yaw reaches further along x
        let yaw = Quat::from_rotation_y(std::f32::consts::FRAC_PI_4);
        assert!(aabb.overlaps_oriented(Vec3::new(1.15, 0.0, 0.0), Vec3::splat(0.5), yaw));
    }

    #[test]
    fn occupancy_marks_cells_inside_boxes() {
        let mut sensor = OccupancySensor::new([4, 4, 4]);
        sensor.sense(&Transform::IDENTITY, &scene(), Vec3::splat(2.0), 0.0);
        assert_eq!(sensor.cell_count(), 64);
        let occupied = sensor.occupancies().iter().filter(|o| **o > 0.5).count();
        assert!(occupied > 0 && occupied < 64);
        for (reference, occupancy) in sensor.references().iter().zip(sensor.occupancies()) {
            if reference.x < -0.5 {
                assert_eq!(*occupancy, 0.0);
            }
        }
    }

    #[test]
    fn smoothing_blends_toward_new_readings() {
        let mut sensor = OccupancySensor::new([2, 2, 2]);
        let full = BoxScene::new(vec![Aabb::from_center_size(Vec3::ZERO, Vec3::splat(10.0))]);
        sensor.sense(&Transform::IDENTITY, &full, Vec3::ONE, 0.9);
        assert!(sensor.occupancies().iter().all(|o| (*o - 0.1).abs() < 1e-6));
        sensor.sense(&Transform::IDENTITY, &full, Vec3::ONE, 0.9);
        assert!(sensor.occupancies().iter().all(|o| (*o - 0.19).abs() < 1e-6));
        sensor.reset();
        assert!(sensor.occupancies().iter().all(|o| *o == 0.0));
    }
}
