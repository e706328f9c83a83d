//! Feed/read contract with the external sequence predictor.
//!
//! The predictor sees one flat scalar vector per tick and returns another.
//! Both streams are strictly ordered; the order is fixed by the frame driver
//! and any change to it is a breaking protocol change.

use crate::config::ControllerConfig;
use anyhow::{anyhow, bail};
use glam::{Vec2, Vec3};
use tracing::warn;

/// Black-box predictor: flat scalars in, flat scalars out.
pub trait SequencePredictor: Send {
    fn predict(&mut self, input: &[f32]) -> anyhow::Result<Vec<f32>>;

    fn name(&self) -> &str {
        "predictor"
    }
}

/// Echoes the first `output_dim` fed scalars back. Because the read stream
/// is a prefix of the feed stream, this reproduces the committed state.
#[derive(Debug, Clone, Default)]
pub struct IdentityPredictor {
    output_dim: Option<usize>,
}

impl IdentityPredictor {
    pub fn new(output_dim: Option<usize>) -> Self {
        Self { output_dim }
    }
}

impl SequencePredictor for IdentityPredictor {
    fn predict(&mut self, input: &[f32]) -> anyhow::Result<Vec<f32>> {
        let len = self.output_dim.unwrap_or(input.len());
        anyhow::ensure!(
            len <= input.len(),
            "identity predictor needs {len} inputs, got {}",
            input.len()
        );
        Ok(input[..len].to_vec())
    }

    fn name(&self) -> &str {
        "identity"
    }
}

/// Per-tick dimensionality of the feed and read streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolLayout {
    pub bones: usize,
    pub keys: usize,
    pub styles: usize,
    pub actions: usize,
    pub contacts: usize,
    pub geometry_cells: usize,
}

impl ProtocolLayout {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            bones: config.bones.len(),
            keys: config.window.past_keys + config.window.future_keys + 1,
            styles: config.styles.len(),
            actions: config.actions.len(),
            contacts: config.contacts.len(),
            geometry_cells: config.sensor.cell_count(),
        }
    }

    /// Everything the predictor reads back, in feed order.
    pub fn output_dim(&self) -> usize {
        // pose (position, forward, up, velocity) + inverse pose
        self.bones * (12 + 3)
            // trajectory XZ position + XZ direction + styles
            + self.keys * (4 + self.styles)
            + self.contacts
            // inverse trajectory XZ position + XZ direction
            + self.keys * 4
            // goal position + direction + actions
            + self.keys * (6 + self.actions)
    }

    /// Output block plus the occupancy grid (reference xyz + occupancy).
    pub fn input_dim(&self) -> usize {
        self.output_dim() + self.geometry_cells * 4
    }
}

/// Ordered scalar streams exchanged with a `SequencePredictor`.
#[derive(Debug, Default)]
pub struct PredictorPort {
    input: Vec<f32>,
    output: Vec<f32>,
    cursor: usize,
    input_dim: Option<usize>,
    output_dim: Option<usize>,
    sanitized: usize,
}

impl PredictorPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Port that enforces the agreed per-tick dimensionality.
    pub fn with_layout(layout: ProtocolLayout) -> Self {
        Self {
            input: Vec::with_capacity(layout.input_dim()),
            output: Vec::with_capacity(layout.output_dim()),
            input_dim: Some(layout.input_dim()),
            output_dim: Some(layout.output_dim()),
            ..Self::default()
        }
    }

    /// Clears both streams for a new tick.
    pub fn begin(&mut self) {
        self.input.clear();
        self.output.clear();
        self.cursor = 0;
        self.sanitized = 0;
    }

    pub fn input(&self) -> &[f32] {
        &self.input
    }

    pub fn fed(&self) -> usize {
        self.input.len()
    }

    pub fn remaining(&self) -> usize {
        self.output.len() - self.cursor
    }

    pub fn feed(&mut self, value: f32) {
        self.input.push(value);
    }

    pub fn feed_slice(&mut self, values: &[f32]) {
        self.input.extend_from_slice(values);
    }

    pub fn feed_bools(&mut self, values: &[bool]) {
        self.input
            .extend(values.iter().map(|flag| if *flag { 1.0 } else { 0.0 }));
    }

    pub fn feed_vec2(&mut self, value: Vec2) {
        self.feed(value.x);
        self.feed(value.y);
    }

    pub fn feed_vec3(&mut self, value: Vec3) {
        self.feed(value.x);
        self.feed(value.y);
        self.feed(value.z);
    }

    pub fn feed_xy(&mut self, value: Vec3) {
        self.feed(value.x);
        self.feed(value.y);
    }

    pub fn feed_xz(&mut self, value: Vec3) {
        self.feed(value.x);
        self.feed(value.z);
    }

    pub fn feed_yz(&mut self, value: Vec3) {
        self.feed(value.y);
        self.feed(value.z);
    }

    /// Runs the predictor over the fed stream. Dimensionality mismatches and
    /// predictor failures are fatal for the tick.
    pub fn predict(&mut self, predictor: &mut dyn SequencePredictor) -> anyhow::Result<()> {
        if let Some(expected) = self.input_dim {
            if self.input.len() != expected {
                bail!(
                    "feed produced {} scalars, protocol expects {expected}",
                    self.input.len()
                );
            }
        }
        let output = predictor
            .predict(&self.input)
            .map_err(|err| anyhow!("predictor '{}' failed: {err:#}", predictor.name()))?;
        if let Some(expected) = self.output_dim {
            if output.len() != expected {
                bail!(
                    "predictor '{}' returned {} scalars, protocol expects {expected}",
                    predictor.name(),
                    output.len()
                );
            }
        }
        self.output = output;
        self.cursor = 0;
        Ok(())
    }

    /// Next output scalar. Non-finite values are replaced by zero.
    pub fn read(&mut self) -> anyhow::Result<f32> {
        let value = *self.output.get(self.cursor).ok_or_else(|| {
            anyhow!(
                "read past the end of predictor output ({} scalars)",
                self.output.len()
            )
        })?;
        self.cursor += 1;
        if value.is_finite() {
            Ok(value)
        } else {
            self.sanitized += 1;
            Ok(0.0)
        }
    }

    pub fn read_slice(&mut self, count: usize) -> anyhow::Result<Vec<f32>> {
        (0..count).map(|_| self.read()).collect()
    }

    pub fn read_vec2(&mut self) -> anyhow::Result<Vec2> {
        Ok(Vec2::new(self.read()?, self.read()?))
    }

    pub fn read_vec3(&mut self) -> anyhow::Result<Vec3> {
        Ok(Vec3::new(self.read()?, self.read()?, self.read()?))
    }

    pub fn read_xy(&mut self) -> anyhow::Result<Vec3> {
        Ok(Vec3::new(self.read()?, self.read()?, 0.0))
    }

    pub fn read_xz(&mut self) -> anyhow::Result<Vec3> {
        let x = self.read()?;
        let z = self.read()?;
        Ok(Vec3::new(x, 0.0, z))
    }

    pub fn read_yz(&mut self) -> anyhow::Result<Vec3> {
        let y = self.read()?;
        let z = self.read()?;
        Ok(Vec3::new(0.0, y, z))
    }

    /// Confirms the read side consumed exactly what the predictor produced.
    pub fn finish(&mut self) -> anyhow::Result<()> {
        if self.sanitized > 0 {
            warn!(
                target: "locomotion_core::port",
                count = self.sanitized,
                "non-finite predictor outputs replaced with zero"
            );
        }
        anyhow::ensure!(
            self.cursor == self.output.len(),
            "read consumed {} of {} predictor outputs",
            self.cursor,
            self.output.len()
        );
        Ok(())
    }
}
