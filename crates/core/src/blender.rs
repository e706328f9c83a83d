//! User-intent blending into the goal channel.
//!
//! Both entry points only touch samples from the pivot onward and are no-ops
//! when the user has no authority.

use crate::config::BlendingConfig;
use crate::math::{
    clamp01, lerp, lerp_vec3, look_rotation, normalise, planar, yaw_rotation, Transform,
};
use crate::window::TimeWindow;
use glam::{Quat, Vec3};

#[derive(Debug, Clone)]
pub struct ControlBlender {
    config: BlendingConfig,
}

impl ControlBlender {
    pub fn new(config: BlendingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BlendingConfig {
        &self.config
    }

    /// Pulls the future goal toward a fixed world target.
    pub fn apply_static_goal(
        &self,
        window: &mut TimeWindow,
        position: Vec3,
        direction: Vec3,
        actions: &[f32],
        user_control: f32,
    ) {
        if user_control <= 0.0 {
            return;
        }
        let target = look_rotation(direction, Vec3::Y);
        let has_direction = direction.length_squared() > 1e-12;
        let pivot = window.pivot();
        let count = window.layout().sample_count();
        for i in pivot..count {
            let weight = window.layout().weight(i, self.config.static_curvature) * user_control;
            let current = window.goal().transform(i);
            let rotation = if has_direction {
                current.rotation.slerp(target, weight).normalize()
            } else {
                current.rotation
            };
            window.goal_mut().set_transform(
                i,
                Transform::new(lerp_vec3(current.position, position, weight), rotation),
            );
        }
        self.blend_actions(window, actions, user_control);
    }

    /// Steers the future goal from `root` along a locally requested move and
    /// turn (degrees), blending with the displacement the goal already has.
    pub fn apply_dynamic_goal(
        &self,
        window: &mut TimeWindow,
        root: &Transform,
        move_vector: Vec3,
        turn: f32,
        actions: &[f32],
        user_control: f32,
    ) {
        if user_control <= 0.0 {
            return;
        }
        let count = window.layout().sample_count();
        let pivot = window.pivot();
        let mut heading = planar(root.forward());
        if heading == Vec3::ZERO {
            heading = Vec3::Z;
        }
        let step = if count > 1 {
            self.config.look_ahead_time / (count - 1) as f32
        } else {
            0.0
        };

        let mut positions = Vec::with_capacity(count);
        let mut rotations: Vec<Quat> = Vec::with_capacity(count);
        let mut previous = root.position;
        for i in 0..count {
            let weight = window.layout().weight(i, self.config.dynamic_curvature);
            let bias = 1.0 - (1.0 - weight).powf(self.config.bias_exponent);
            let direction = yaw_rotation(bias * turn) * heading;
            let rotation = look_rotation(direction, Vec3::Y);
            let requested = rotation * move_vector * step;
            let existing = if count < 2 {
                Vec3::ZERO
            } else if i == 0 {
                window.goal().position(1) - window.goal().position(0)
            } else {
                window.goal().position(i) - window.goal().position(i - 1)
            };
            let position = previous + lerp_vec3(existing, requested, bias);
            previous = position;
            positions.push(position);
            rotations.push(rotation);
        }

        for i in pivot..count {
            let current = window.goal().transform(i);
            window.goal_mut().set_transform(
                i,
                Transform::new(
                    lerp_vec3(current.position, positions[i], user_control),
                    current.rotation.slerp(rotations[i], user_control).normalize(),
                ),
            );
        }
        self.blend_actions(window, actions, user_control);
    }

    /// Moves every future action row a bounded step toward `intent`. Values
    /// near the middle of `[0,1]` move fastest; the step ramps in over the
    /// first future key.
    fn blend_actions(&self, window: &mut TimeWindow, intent: &[f32], user_control: f32) {
        let pivot = window.pivot();
        let count = window.layout().sample_count();
        let future_samples = window.layout().future_sample_count().max(1) as f32;
        let future_keys = window.layout().future_key_count().max(1) as f32;
        let actions = window.goal_mut().actions_mut();
        let width = actions.width().min(intent.len());
        for i in pivot..count {
            let ramp = normalise(
                (i - pivot) as f32 / future_samples,
                0.0,
                1.0,
                1.0 / future_keys,
                1.0,
            );
            for column in 0..width {
                let value = actions.get(i, column);
                let target = intent[column];
                if value == target {
                    continue;
                }
                let closeness = 2.0 * (0.5 - (value - 0.5).abs());
                let closeness = normalise(closeness, 0.0, 1.0, user_control, 1.0 - user_control);
                let stepped =
                    clamp01(value + closeness * user_control * (target - value).signum());
                actions.set(i, column, lerp(value, stepped, ramp));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowConfig;
    use crate::window::WindowLayout;

    fn window() -> TimeWindow {
        let layout = WindowLayout::new(&WindowConfig::default()).expect("layout");
        let names = vec!["Idle".to_string(), "Walk".to_string()];
        TimeWindow::new(layout, names.clone(), names, vec![], Transform::IDENTITY)
    }

    fn blender() -> ControlBlender {
        ControlBlender::new(BlendingConfig::default())
    }

    #[test]
    fn zero_authority_is_a_no_op() {
        let mut window = window();
        window
            .goal_mut()
            .set_transform(9, Transform::IDENTITY.with_position(Vec3::new(1.0, 0.0, 2.0)));
        let before = window.clone();
        let blender = blender();
        blender.apply_static_goal(&mut window, Vec3::new(5.0, 0.0, 0.0), Vec3::X, &[0.0, 1.0], 0.0);
        blender.apply_dynamic_goal(
            &mut window,
            &Transform::IDENTITY,
            Vec3::Z,
            45.0,
            &[0.0, 1.0],
            0.0,
        );
        for i in 0..13 {
            assert_eq!(window.goal().transform(i), before.goal().transform(i));
            assert_eq!(window.goal().actions().row(i), before.goal().actions().row(i));
        }
    }

    #[test]
    fn static_goal_approaches_target_monotonically() {
        let mut window = window();
        let blender = blender();
        let target = Vec3::new(5.0, 0.0, 0.0);
        let pivot = window.pivot();
        let mut last = window.goal().position(pivot).x;
        for _ in 0..60 {
            blender.apply_static_goal(&mut window, target, Vec3::X, &[1.0, 0.0], 0.25);
            let x = window.goal().position(pivot).x;
            assert!(x >= last - 1e-6, "regressed from {last} to {x}");
            assert!(x <= target.x + 1e-5, "overshot to {x}");
            last = x;
        }
        assert!((last - target.x).abs() < 1e-3);
    }

    #[test]
    fn static_goal_never_touches_history() {
        let mut window = window();
        let before = window.clone();
        blender().apply_static_goal(&mut window, Vec3::new(5.0, 0.0, 0.0), Vec3::X, &[0.0, 1.0], 0.5);
        for i in 0..window.pivot() {
            assert_eq!(window.goal().transform(i), before.goal().transform(i));
        }
        assert!(window.goal().position(window.pivot()).x > 0.0);
    }

    #[test]
    fn action_rows_move_toward_intent_within_bounds() {
        let mut window = window();
        let blender = blender();
        for _ in 0..200 {
            blender.apply_static_goal(&mut window, Vec3::ZERO, Vec3::Z, &[0.0, 1.0], 0.25);
        }
        let pivot = window.pivot();
        let row = window.goal().actions().row(pivot + 3);
        assert!(row[0] < 0.05 && row[1] > 0.95, "{row:?}");
        for i in 0..13 {
            for value in window.goal().actions().row(i) {
                assert!((0.0..=1.0).contains(value));
            }
        }
    }

    #[test]
    fn dynamic_goal_moves_forward_and_turns() {
        let mut window = window();
        let blender = blender();
        for _ in 0..50 {
            blender.apply_dynamic_goal(
                &mut window,
                &Transform::IDENTITY,
                Vec3::Z,
                0.0,
                &[0.0, 1.0],
                0.25,
            );
        }
        let pivot = window.pivot();
        assert!(window.goal().position(12).z > window.goal().position(pivot).z);

        let mut window = self::window();
        for _ in 0..50 {
            blender.apply_dynamic_goal(
                &mut window,
                &Transform::IDENTITY,
                Vec3::ZERO,
                90.0,
                &[1.0, 0.0],
                0.25,
            );
        }
        // turn bias peaks at the pivot and fades toward the window end
        assert!(window.goal().forward(pivot).x > 0.95);
        assert!(window.goal().forward(pivot).x > window.goal().forward(11).x);
        assert!(window.goal().forward(12).x.abs() < 1e-4);
    }

    #[test]
    fn dynamic_goal_without_request_keeps_steady_goal() {
        let mut window = window();
        let before = window.clone();
        blender().apply_dynamic_goal(
            &mut window,
            &Transform::IDENTITY,
            Vec3::ZERO,
            0.0,
            &[1.0, 0.0],
            0.25,
        );
        for i in 0..13 {
            let delta = window.goal().position(i) - before.goal().position(i);
            assert!(delta.length() < 1e-6);
            assert_eq!(window.goal().actions().row(i), before.goal().actions().row(i));
        }
    }
}
