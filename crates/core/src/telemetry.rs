//! Per-tick telemetry rows written to disk by a background worker.

use anyhow::{bail, Context};
use glam::Vec3;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct TelemetryStats {
    pub rows_written: usize,
    pub error: Option<String>,
}

/// Named scalar fields collected once per tick. The first stored row fixes
/// the layout; every later row must fill exactly the same fields.
pub struct TelemetryWriter {
    data_path: PathBuf,
    labels_path: PathBuf,
    tx: Option<Sender<Vec<f32>>>,
    handle: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<TelemetryStats>>,
    names: Vec<String>,
    weights: Vec<f32>,
    row: Vec<f32>,
    cursor: usize,
    layout_fixed: bool,
    finished: bool,
}

impl TelemetryWriter {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create telemetry file {:?}", path))?;
        let stats = Arc::new(Mutex::new(TelemetryStats::default()));
        let (tx, rx) = mpsc::channel::<Vec<f32>>();
        let worker_stats = Arc::clone(&stats);
        let handle = thread::spawn(move || {
            let mut writer = BufWriter::new(file);
            for row in rx {
                let line = row
                    .iter()
                    .map(|value| format!("{value:.5}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                if let Err(err) = writeln!(writer, "{line}") {
                    worker_stats.lock().error = Some(err.to_string());
                    return;
                }
                worker_stats.lock().rows_written += 1;
            }
            if let Err(err) = writer.flush() {
                worker_stats.lock().error = Some(err.to_string());
            }
        });
        Ok(Self {
            data_path: path.to_path_buf(),
            labels_path: path.with_extension("labels"),
            tx: Some(tx),
            handle: Some(handle),
            stats,
            names: Vec::new(),
            weights: Vec::new(),
            row: Vec::new(),
            cursor: 0,
            layout_fixed: false,
            finished: false,
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn labels_path(&self) -> &Path {
        &self.labels_path
    }

    pub fn feed(&mut self, value: f32, name: &str, weight: f32) -> anyhow::Result<()> {
        if self.layout_fixed {
            if self.cursor >= self.row.len() {
                bail!("telemetry row overflow at field {name}");
            }
            self.row[self.cursor] = value;
        } else {
            self.row.push(value);
            self.names.push(name.to_string());
            self.weights.push(weight);
        }
        self.cursor += 1;
        Ok(())
    }

    /// Fields are named `<name>1..<name>N`.
    pub fn feed_slice(&mut self, values: &[f32], name: &str, weight: f32) -> anyhow::Result<()> {
        for (idx, value) in values.iter().enumerate() {
            self.feed(*value, &format!("{name}{}", idx + 1), weight)?;
        }
        Ok(())
    }

    pub fn feed_vec3(&mut self, value: Vec3, name: &str, weight: f32) -> anyhow::Result<()> {
        self.feed_slice(&value.to_array(), name, weight)
    }

    /// Queues the current row for the worker.
    pub fn store(&mut self) -> anyhow::Result<()> {
        if self.layout_fixed && self.cursor != self.row.len() {
            let fed = self.cursor;
            self.cursor = 0;
            bail!(
                "telemetry row has {} fields, layout has {}",
                fed,
                self.row.len()
            );
        }
        self.layout_fixed = true;
        self.cursor = 0;
        let Some(tx) = self.tx.as_ref() else {
            bail!("telemetry writer already finished");
        };
        tx.send(self.row.clone())
            .map_err(|_| anyhow::anyhow!("telemetry worker stopped"))?;
        Ok(())
    }

    pub fn stats(&self) -> TelemetryStats {
        self.stats.lock().clone()
    }

    /// Closes the queue, waits for every pending row to be written and
    /// writes the label file (`index name weight`).
    pub fn finish(&mut self) -> anyhow::Result<TelemetryStats> {
        if self.finished {
            return Ok(self.stats());
        }
        self.finished = true;
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                bail!("telemetry worker panicked");
            }
        }
        let stats = self.stats();
        if let Some(err) = &stats.error {
            bail!("telemetry write to {:?} failed: {err}", self.data_path);
        }
        self.write_labels()?;
        info!(
            target: "locomotion_core::telemetry",
            rows = stats.rows_written,
            fields = self.names.len(),
            path = %self.data_path.display(),
            "telemetry finished"
        );
        Ok(stats)
    }

    fn write_labels(&self) -> anyhow::Result<()> {
        let file = File::create(&self.labels_path)
            .with_context(|| format!("Failed to create label file {:?}", self.labels_path))?;
        let mut writer = BufWriter::new(file);
        for (idx, (name, weight)) in self.names.iter().zip(&self.weights).enumerate() {
            writeln!(writer, "[{idx}] {name} {weight}")?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl Drop for TelemetryWriter {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.finish() {
                warn!(
                    target: "locomotion_core::telemetry",
                    error = %err,
                    "telemetry finish on drop failed"
                );
            }
        }
    }
}
