//! Sliding time window: a fixed set of samples around the pivot ("now") with
//! sparse key samples at a fixed stride, plus the channels co-indexed with it.

use crate::channels::{ContactChannel, GoalChannel, RootChannel, StyleChannel, WeightTable};
use crate::config::WindowConfig;
use crate::math::{falloff, interpolate_transform, lerp, lerp_vec3, slerp_vec3, Transform};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub index: usize,
    /// Seconds relative to the pivot; negative in the past.
    pub timestamp: f32,
}

/// Pure index bookkeeping for the window. Holds no payload.
#[derive(Debug, Clone)]
pub struct WindowLayout {
    past_keys: usize,
    future_keys: usize,
    resolution: usize,
    samples: Vec<Sample>,
}

impl WindowLayout {
    pub fn new(config: &WindowConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let count = config.sample_count();
        let pivot = config.past_keys * config.resolution;
        let past_step = config.past_window / pivot as f32;
        let future_step = config.future_window / (config.future_keys * config.resolution) as f32;
        let samples = (0..count)
            .map(|index| {
                let timestamp = if index < pivot {
                    -((pivot - index) as f32) * past_step
                } else {
                    (index - pivot) as f32 * future_step
                };
                Sample { index, timestamp }
            })
            .collect();
        Ok(Self {
            past_keys: config.past_keys,
            future_keys: config.future_keys,
            resolution: config.resolution,
            samples,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn pivot(&self) -> usize {
        (self.samples.len() - 1) / 2
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn past_key_count(&self) -> usize {
        self.past_keys
    }

    pub fn future_key_count(&self) -> usize {
        self.future_keys
    }

    /// Keys including the pivot key.
    pub fn key_count(&self) -> usize {
        self.past_keys + self.future_keys + 1
    }

    pub fn pivot_key(&self) -> usize {
        self.past_keys
    }

    pub fn future_sample_count(&self) -> usize {
        self.future_keys * self.resolution
    }

    pub fn sample(&self, index: usize) -> Sample {
        self.samples[index]
    }

    pub fn key(&self, key: usize) -> Sample {
        self.samples[key * self.resolution]
    }

    pub fn keys(&self) -> impl Iterator<Item = Sample> + '_ {
        (0..self.key_count()).map(move |key| self.key(key))
    }

    pub fn is_key(&self, index: usize) -> bool {
        index % self.resolution == 0
    }

    /// Nearest key at or before `index`.
    pub fn previous_key(&self, index: usize) -> Sample {
        self.key(index / self.resolution)
    }

    /// Nearest key at or after `index`.
    pub fn next_key(&self, index: usize) -> Sample {
        let key = (index + self.resolution - 1) / self.resolution;
        self.key(key.min(self.key_count() - 1))
    }

    /// Temporal falloff at `index`: 1 at the pivot, 0 at both window ends.
    pub fn weight(&self, index: usize, curvature: f32) -> f32 {
        falloff(index, self.sample_count(), curvature)
    }
}

/// Window plus its exclusively owned channels.
#[derive(Debug, Clone)]
pub struct TimeWindow {
    layout: WindowLayout,
    root: RootChannel,
    style: StyleChannel,
    goal: GoalChannel,
    contact: ContactChannel,
}

impl TimeWindow {
    pub fn new(
        layout: WindowLayout,
        styles: Vec<String>,
        actions: Vec<String>,
        contacts: Vec<String>,
        initial: Transform,
    ) -> Self {
        let samples = layout.sample_count();
        Self {
            root: RootChannel::new(samples, initial),
            style: WeightTable::one_hot(samples, styles, 0),
            goal: GoalChannel::new(samples, initial, actions),
            contact: WeightTable::new(samples, contacts),
            layout,
        }
    }

    pub fn layout(&self) -> &WindowLayout {
        &self.layout
    }

    pub fn pivot(&self) -> usize {
        self.layout.pivot()
    }

    pub fn root(&self) -> &RootChannel {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut RootChannel {
        &mut self.root
    }

    pub fn style(&self) -> &StyleChannel {
        &self.style
    }

    pub fn style_mut(&mut self) -> &mut StyleChannel {
        &mut self.style
    }

    pub fn goal(&self) -> &GoalChannel {
        &self.goal
    }

    pub fn goal_mut(&mut self) -> &mut GoalChannel {
        &mut self.goal
    }

    pub fn contact(&self) -> &ContactChannel {
        &self.contact
    }

    pub fn contact_mut(&mut self) -> &mut ContactChannel {
        &mut self.contact
    }

    pub fn pivot_root(&self) -> Transform {
        self.root.transform(self.pivot())
    }

    /// History shift: every channel's sample `i+1` moves to `i` for
    /// `i < pivot`. No interpolation.
    pub fn advance(&mut self) {
        let pivot = self.pivot();
        self.root.shift_left(pivot);
        self.style.shift_left(pivot);
        self.goal.shift_left(pivot);
        self.contact.shift_left(pivot);
    }

    /// Recomputes every non-key sample from the pivot onward out of its
    /// bracketing keys. History samples are left as shifted.
    pub fn densify(&mut self) {
        let resolution = self.layout.resolution();
        if resolution <= 1 {
            return;
        }
        for i in self.pivot()..self.layout.sample_count() {
            if self.layout.is_key(i) {
                continue;
            }
            let t = (i % resolution) as f32 / resolution as f32;
            let prev = self.layout.previous_key(i).index;
            let next = self.layout.next_key(i).index;

            let position = lerp_vec3(self.root.position(prev), self.root.position(next), t);
            let direction = slerp_vec3(self.root.direction(prev), self.root.direction(next), t);
            self.root.set_position(i, position);
            self.root.set_direction(i, direction);

            let goal = interpolate_transform(
                &self.goal.transform(prev),
                &self.goal.transform(next),
                t,
            );
            self.goal.set_transform(i, goal);

            for column in 0..self.style.width() {
                let value = lerp(self.style.get(prev, column), self.style.get(next, column), t);
                self.style.set(i, column, value);
            }
            let actions = self.goal.actions_mut();
            for column in 0..actions.width() {
                let value = lerp(actions.get(prev, column), actions.get(next, column), t);
                actions.set(i, column, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    fn layout(resolution: usize) -> WindowLayout {
        WindowLayout::new(&WindowConfig {
            past_keys: 6,
            future_keys: 6,
            past_window: 1.0,
            future_window: 1.0,
            resolution,
        })
        .expect("layout")
    }

    fn window(resolution: usize) -> TimeWindow {
        TimeWindow::new(
            layout(resolution),
            names(&["idle", "walk"]),
            names(&["idle", "walk"]),
            names(&["left_foot", "right_foot"]),
            Transform::IDENTITY,
        )
    }

    #[test]
    fn key_mapping_is_symmetric_around_pivot() {
        let layout = layout(5);
        assert_eq!(layout.sample_count(), 61);
        assert_eq!(layout.pivot(), 30);
        assert_eq!(layout.key(layout.pivot_key()).index, 30);
        let keys: Vec<usize> = layout.keys().map(|key| key.index).collect();
        assert_eq!(keys.len(), 13);
        for pair in keys.windows(2) {
            assert_eq!(pair[1] - pair[0], 5);
        }
        for (idx, key) in keys.iter().enumerate() {
            assert_eq!(keys[keys.len() - 1 - idx], 60 - key);
        }
        assert!((layout.key(0).timestamp + 1.0).abs() < 1e-6);
        assert!((layout.key(12).timestamp - 1.0).abs() < 1e-6);
        assert_eq!(layout.sample(30).timestamp, 0.0);
    }

    #[test]
    fn bracketing_keys() {
        let layout = layout(5);
        assert_eq!(layout.previous_key(33).index, 30);
        assert_eq!(layout.next_key(33).index, 35);
        assert_eq!(layout.previous_key(35).index, 35);
        assert_eq!(layout.next_key(35).index, 35);
        assert_eq!(layout.next_key(60).index, 60);
    }

    #[test]
    fn weight_is_one_at_pivot_and_zero_at_ends() {
        let layout = layout(1);
        for curvature in [0.5, 2.0] {
            assert!((layout.weight(layout.pivot(), curvature) - 1.0).abs() < 1e-6);
            assert_eq!(layout.weight(0, curvature), 0.0);
            assert_eq!(layout.weight(12, curvature), 0.0);
        }
    }

    #[test]
    fn advance_shifts_every_channel_exactly() {
        let mut window = window(1);
        for i in 0..13 {
            let x = i as f32;
            window
                .root_mut()
                .set_transform(i, Transform::from_position_direction(Vec3::new(x, 0.0, 0.0), Vec3::Z));
            window
                .goal_mut()
                .set_transform(i, Transform::IDENTITY.with_position(Vec3::new(0.0, 0.0, x)));
            window.style_mut().set_row(i, &[x / 13.0, 1.0 - x / 13.0]);
            window.goal_mut().actions_mut().set_row(i, &[x / 20.0, 0.5]);
            window.contact_mut().set_row(i, &[x / 13.0, 0.25]);
        }
        let before = window.clone();
        window.advance();
        for i in 0..window.pivot() {
            assert_eq!(window.root().transform(i), before.root().transform(i + 1));
            assert_eq!(window.goal().transform(i), before.goal().transform(i + 1));
            assert_eq!(window.style().row(i), before.style().row(i + 1));
            assert_eq!(window.goal().actions().row(i), before.goal().actions().row(i + 1));
            assert_eq!(window.contact().row(i), before.contact().row(i + 1));
        }
        for i in window.pivot()..13 {
            assert_eq!(window.root().transform(i), before.root().transform(i));
        }
    }

    #[test]
    fn densify_interpolates_between_future_keys() {
        let mut window = window(5);
        window
            .root_mut()
            .set_position(30, Vec3::new(0.0, 0.0, 0.0));
        window
            .root_mut()
            .set_position(35, Vec3::new(5.0, 0.0, 0.0));
        window.style_mut().set_row(35, &[0.0, 1.0]);
        window.densify();
        assert!((window.root().position(32).x - 2.0).abs() < 1e-5);
        assert!((window.style().get(33, 1) - 0.6).abs() < 1e-5);
        // history is untouched
        assert_eq!(window.root().position(27), Vec3::ZERO);
    }
}
