//! Normalised, latent-conditioned predictor backends.
//!
//! The numeric model is a black box (`LatentModel`). This module owns what
//! surrounds it: per-segment normalisation loaded from disk, latent noise,
//! and the mapping onto the flat `SequencePredictor` boundary.

use crate::config::PredictorConfig;
use crate::port::{ProtocolLayout, SequencePredictor};
use crate::noise::LatentSampler;
use anyhow::{bail, Context};
use std::fs;
use std::path::Path;
use tracing::info;

const STD_EPS: f32 = 1e-8;

/// Per-feature mean and standard deviation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationStats {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl NormalizationStats {
    pub fn new(mean: Vec<f32>, std: Vec<f32>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            mean.len() == std.len(),
            "normalisation mean has {} entries but std has {}",
            mean.len(),
            std.len()
        );
        Ok(Self { mean, std })
    }

    pub fn identity(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            std: vec![1.0; dim],
        }
    }

    /// Loads `<prefix>mean.bin` and `<prefix>std.bin` from `dir`.
    pub fn load(dir: &Path, prefix: &str, dim: usize) -> anyhow::Result<Self> {
        let mean = read_binary(&dir.join(format!("{prefix}mean.bin")), dim)?;
        let std = read_binary(&dir.join(format!("{prefix}std.bin")), dim)?;
        Self::new(mean, std)
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn normalize(&self, values: &mut [f32]) {
        for ((value, mean), std) in values.iter_mut().zip(&self.mean).zip(&self.std) {
            let std = if std.abs() < STD_EPS { 1.0 } else { *std };
            *value = (*value - mean) / std;
        }
    }

    pub fn unnormalize(&self, values: &mut [f32]) {
        for ((value, mean), std) in values.iter_mut().zip(&self.mean).zip(&self.std) {
            *value = *value * std + mean;
        }
    }
}

/// Reads `count` little-endian `f32` values. Missing or short files are
/// errors.
pub fn read_binary(path: &Path, count: usize) -> anyhow::Result<Vec<f32>> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read normalisation file {:?}", path))?;
    if bytes.len() < count * 4 {
        bail!(
            "normalisation file {:?} holds {} values, expected {count}",
            path,
            bytes.len() / 4
        );
    }
    Ok(bytes
        .chunks_exact(4)
        .take(count)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Numeric backend executed on normalised inputs plus a latent vector.
pub trait LatentModel: Send {
    fn execute(&mut self, inputs: &[&[f32]], latent: &[f32]) -> anyhow::Result<Vec<f32>>;

    fn name(&self) -> &str {
        "model"
    }
}

#[derive(Debug, Clone)]
pub struct InputSegment {
    pub name: String,
    pub stats: NormalizationStats,
}

impl InputSegment {
    pub fn new(name: impl Into<String>, stats: NormalizationStats) -> Self {
        Self {
            name: name.into(),
            stats,
        }
    }

    pub fn dim(&self) -> usize {
        self.stats.dim()
    }
}

/// Splits the flat feed into segments, normalises each, samples the latent,
/// runs the model and un-normalises its output.
pub struct NormalizedPredictor<M: LatentModel> {
    model: M,
    segments: Vec<InputSegment>,
    output: NormalizationStats,
    latent: Vec<f32>,
    latent_std: f32,
    sampler: LatentSampler,
    name: String,
}

impl<M: LatentModel> NormalizedPredictor<M> {
    pub fn new(
        model: M,
        segments: Vec<InputSegment>,
        output: NormalizationStats,
        latent_dim: usize,
        latent_std: f32,
        sampler: LatentSampler,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!segments.is_empty(), "at least one input segment is required");
        anyhow::ensure!(latent_std >= 0.0, "latent std must be non-negative");
        let name = format!("normalized:{}", model.name());
        Ok(Self {
            model,
            segments,
            output,
            latent: vec![0.0; latent_dim],
            latent_std,
            sampler,
            name,
        })
    }

    /// Loads the motion (`x1`) and geometry (`x2`) input statistics and the
    /// output (`Y`) statistics from `config.norm_dir`.
    pub fn from_config(
        model: M,
        config: &PredictorConfig,
        layout: &ProtocolLayout,
        sampler: LatentSampler,
    ) -> anyhow::Result<Self> {
        let Some(dir) = config.norm_dir.as_deref() else {
            bail!("predictor.norm_dir is required for a normalised predictor");
        };
        let motion_dim = layout.output_dim();
        let geometry_dim = layout.input_dim() - motion_dim;
        let segments = vec![
            InputSegment::new("x1", NormalizationStats::load(dir, "x1", motion_dim)?),
            InputSegment::new("x2", NormalizationStats::load(dir, "x2", geometry_dim)?),
        ];
        let output = NormalizationStats::load(dir, "Y", motion_dim)?;
        info!(
            target: "locomotion_core::model",
            dir = %dir.display(),
            motion_dim,
            geometry_dim,
            latent_dim = config.latent_dim,
            "loaded normalisation statistics"
        );
        Self::new(model, segments, output, config.latent_dim, config.latent_std, sampler)
    }

    pub fn input_dim(&self) -> usize {
        self.segments.iter().map(InputSegment::dim).sum()
    }

    pub fn output_dim(&self) -> usize {
        self.output.dim()
    }

    /// Latent vector drawn for the most recent prediction.
    pub fn last_latent(&self) -> &[f32] {
        &self.latent
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: LatentModel> SequencePredictor for NormalizedPredictor<M> {
    fn predict(&mut self, input: &[f32]) -> anyhow::Result<Vec<f32>> {
        anyhow::ensure!(
            input.len() == self.input_dim(),
            "normalised predictor expects {} inputs, got {}",
            self.input_dim(),
            input.len()
        );
        let mut normalised = input.to_vec();
        let mut offset = 0;
        for segment in &self.segments {
            let end = offset + segment.dim();
            segment.stats.normalize(&mut normalised[offset..end]);
            offset = end;
        }
        let mut slices: Vec<&[f32]> = Vec::with_capacity(self.segments.len());
        let mut offset = 0;
        for segment in &self.segments {
            slices.push(&normalised[offset..offset + segment.dim()]);
            offset += segment.dim();
        }

        self.sampler.fill_normal(&mut self.latent, 0.0, self.latent_std);
        let mut output = self
            .model
            .execute(&slices, &self.latent)
            .with_context(|| format!("model '{}' failed", self.model.name()))?;
        anyhow::ensure!(
            output.len() == self.output.dim(),
            "model '{}' produced {} outputs, expected {}",
            self.model.name(),
            output.len(),
            self.output.dim()
        );
        self.output.unnormalize(&mut output);
        Ok(output)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Returns the first segment unchanged and remembers what it saw.
    #[derive(Default)]
    struct EchoModel {
        seen: Vec<Vec<f32>>,
    }

    impl LatentModel for EchoModel {
        fn execute(&mut self, inputs: &[&[f32]], latent: &[f32]) -> anyhow::Result<Vec<f32>> {
            self.seen = inputs.iter().map(|slice| slice.to_vec()).collect();
            self.seen.push(latent.to_vec());
            Ok(inputs[0].to_vec())
        }
    }

    fn write_floats(path: &Path, values: &[f32]) {
        let bytes: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();
        fs::write(path, bytes).expect("write floats");
    }

    #[test]
    fn reads_little_endian_floats() {
        let scratch = tempdir().unwrap();
        let dir = scratch.path();
        let path = dir.join("vmean.bin");
        write_floats(&path, &[1.5, -2.0, 3.25]);
        assert_eq!(read_binary(&path, 3).unwrap(), vec![1.5, -2.0, 3.25]);
        assert_eq!(read_binary(&path, 2).unwrap(), vec![1.5, -2.0]);
        assert!(read_binary(&path, 4).is_err());
        assert!(read_binary(&dir.join("missing.bin"), 1).is_err());
    }

    #[test]
    fn normalisation_round_trips() {
        let stats = NormalizationStats::new(vec![1.0, 2.0], vec![2.0, 0.5]).unwrap();
        let mut values = vec![3.0, 3.0];
        stats.normalize(&mut values);
        assert_eq!(values, vec![1.0, 2.0]);
        stats.unnormalize(&mut values);
        assert_eq!(values, vec![3.0, 3.0]);
    }

    #[test]
    fn predictor_normalises_each_segment() {
        let segments = vec![
            InputSegment::new("x1", NormalizationStats::new(vec![1.0; 2], vec![2.0; 2]).unwrap()),
            InputSegment::new("x2", NormalizationStats::new(vec![0.0; 3], vec![10.0; 3]).unwrap()),
        ];
        let output = NormalizationStats::new(vec![1.0; 2], vec![2.0; 2]).unwrap();
        let mut predictor = NormalizedPredictor::new(
            EchoModel::default(),
            segments,
            output,
            4,
            0.1,
            LatentSampler::from_seed(5),
        )
        .unwrap();
        let result = predictor.predict(&[3.0, 5.0, 10.0, 20.0, 30.0]).unwrap();
        // echoing the normalised motion segment and un-normalising restores it
        assert_eq!(result, vec![3.0, 5.0]);
        let seen = &predictor.model().seen;
        assert_eq!(seen[0], vec![1.0, 2.0]);
        assert_eq!(seen[1], vec![1.0, 2.0, 3.0]);
        assert_eq!(seen[2].len(), 4);
        assert!(predictor.predict(&[1.0]).is_err());
    }

    #[test]
    fn missing_statistics_fail_at_load() {
        let dir = tempdir().unwrap();
        let config = PredictorConfig {
            norm_dir: Some(dir.path().to_path_buf()),
            latent_dim: 2,
            latent_std: 0.1,
            ..PredictorConfig::default()
        };
        let layout = ProtocolLayout {
            bones: 1,
            keys: 3,
            styles: 1,
            actions: 1,
            contacts: 1,
            geometry_cells: 1,
        };
        let result = NormalizedPredictor::from_config(
            EchoModel::default(),
            &config,
            &layout,
            LatentSampler::from_seed(1),
        );
        assert!(result.is_err());
    }
}
