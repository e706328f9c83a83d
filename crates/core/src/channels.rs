use crate::math::{look_rotation, Transform};
use glam::{Quat, Vec3};

/// Per-sample root transforms.
#[derive(Debug, Clone)]
pub struct RootChannel {
    transforms: Vec<Transform>,
}

impl RootChannel {
    pub(crate) fn new(samples: usize, initial: Transform) -> Self {
        Self {
            transforms: vec![initial; samples],
        }
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn transform(&self, index: usize) -> Transform {
        self.transforms[index]
    }

    pub fn set_transform(&mut self, index: usize, transform: Transform) {
        self.transforms[index] = transform;
    }

    pub fn position(&self, index: usize) -> Vec3 {
        self.transforms[index].position
    }

    pub fn set_position(&mut self, index: usize, position: Vec3) {
        self.transforms[index].position = position;
    }

    pub fn rotation(&self, index: usize) -> Quat {
        self.transforms[index].rotation
    }

    pub fn direction(&self, index: usize) -> Vec3 {
        self.transforms[index].forward()
    }

    /// Re-orients sample `index` to face `direction`; a zero direction keeps
    /// the current heading.
    pub fn set_direction(&mut self, index: usize, direction: Vec3) {
        if direction.length_squared() > 1e-12 && direction.is_finite() {
            self.transforms[index].rotation = look_rotation(direction, Vec3::Y);
        }
    }

    pub fn last(&self) -> Transform {
        self.transforms[self.transforms.len() - 1]
    }

    pub(crate) fn shift_left(&mut self, until: usize) {
        for i in 0..until {
            self.transforms[i] = self.transforms[i + 1];
        }
    }
}

/// Named per-sample weight rows (styles, goal actions, contacts), each scalar
/// in `[0,1]` by convention.
#[derive(Debug, Clone)]
pub struct WeightTable {
    names: Vec<String>,
    values: Vec<f32>,
}

pub type StyleChannel = WeightTable;
pub type ContactChannel = WeightTable;

impl WeightTable {
    pub(crate) fn new(samples: usize, names: Vec<String>) -> Self {
        let width = names.len();
        Self {
            names,
            values: vec![0.0; samples * width],
        }
    }

    /// Every row set to one-hot on `column`.
    pub(crate) fn one_hot(samples: usize, names: Vec<String>, column: usize) -> Self {
        let mut table = Self::new(samples, names);
        if column < table.width() {
            for row in 0..samples {
                table.set(row, column, 1.0);
            }
        }
        table
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn width(&self) -> usize {
        self.names.len()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    pub fn row(&self, sample: usize) -> &[f32] {
        let width = self.width();
        &self.values[sample * width..(sample + 1) * width]
    }

    pub fn get(&self, sample: usize, column: usize) -> f32 {
        self.values[sample * self.width() + column]
    }

    pub fn value(&self, sample: usize, name: &str) -> Option<f32> {
        self.index_of(name).map(|column| self.get(sample, column))
    }

    pub fn set(&mut self, sample: usize, column: usize, value: f32) {
        let width = self.width();
        self.values[sample * width + column] = value;
    }

    pub fn set_row(&mut self, sample: usize, values: &[f32]) {
        let width = self.width();
        let row = &mut self.values[sample * width..(sample + 1) * width];
        for (slot, value) in row.iter_mut().zip(values.iter()) {
            *slot = *value;
        }
    }

    pub(crate) fn shift_left(&mut self, until: usize) {
        let width = self.width();
        if width == 0 || until == 0 {
            return;
        }
        self.values.copy_within(width..(until + 1) * width, 0);
    }
}

/// Desired future root pose per sample plus the action engagement rows.
#[derive(Debug, Clone)]
pub struct GoalChannel {
    transforms: Vec<Transform>,
    actions: WeightTable,
}

impl GoalChannel {
    pub(crate) fn new(samples: usize, initial: Transform, actions: Vec<String>) -> Self {
        Self {
            transforms: vec![initial; samples],
            actions: WeightTable::one_hot(samples, actions, 0),
        }
    }

    pub fn transform(&self, index: usize) -> Transform {
        self.transforms[index]
    }

    pub fn set_transform(&mut self, index: usize, transform: Transform) {
        self.transforms[index] = transform;
    }

    pub fn position(&self, index: usize) -> Vec3 {
        self.transforms[index].position
    }

    pub fn forward(&self, index: usize) -> Vec3 {
        self.transforms[index].forward()
    }

    pub fn actions(&self) -> &WeightTable {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut WeightTable {
        &mut self.actions
    }

    pub(crate) fn shift_left(&mut self, until: usize) {
        for i in 0..until {
            self.transforms[i] = self.transforms[i + 1];
        }
        self.actions.shift_left(until);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn weight_table_shift_moves_rows_left() {
        let mut table = WeightTable::new(5, names(&["a", "b"]));
        for row in 0..5 {
            table.set_row(row, &[row as f32, 10.0 + row as f32]);
        }
        table.shift_left(2);
        assert_eq!(table.row(0), &[1.0, 11.0]);
        assert_eq!(table.row(1), &[2.0, 12.0]);
        assert_eq!(table.row(2), &[2.0, 12.0]);
        assert_eq!(table.row(4), &[4.0, 14.0]);
    }

    #[test]
    fn one_hot_initialises_every_row() {
        let table = WeightTable::one_hot(3, names(&["idle", "walk"]), 0);
        assert_eq!(table.value(2, "idle"), Some(1.0));
        assert_eq!(table.value(2, "walk"), Some(0.0));
        assert_eq!(table.value(2, "run"), None);
    }

    #[test]
    fn zero_direction_keeps_heading() {
        let mut root = RootChannel::new(3, Transform::IDENTITY);
        root.set_direction(1, Vec3::X);
        root.set_direction(1, Vec3::ZERO);
        assert!((root.direction(1) - Vec3::X).length() < 1e-5);
    }
}
