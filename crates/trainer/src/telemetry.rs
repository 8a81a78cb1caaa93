//! Scalar event sinks
//!
//! The trainer reports `(name, value, step)` scalars through [`ScalarSink`].
//! Sinks never fail the caller: a sink that cannot write logs once and goes
//! quiet.

use chrono::Utc;
use metrics::describe_gauge;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::{PipelineError, Result};

/// One recorded scalar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub name: String,
    pub value: f64,
    pub step: u64,
    /// Seconds since the Unix epoch
    pub wall_time: f64,
}

pub trait ScalarSink {
    fn record(&mut self, name: &str, value: f64, step: u64);

    fn flush(&mut self) {}
}

/// Emits scalars as `debug!` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ScalarSink for TracingSink {
    fn record(&mut self, name: &str, value: f64, step: u64) {
        debug!(scalar = name, value, step, "scalar");
    }
}

/// Publishes scalars as `metrics` gauges. Installing a recorder is up to the host.
#[derive(Debug, Clone)]
pub struct MetricsSink {
    prefix: String,
}

impl MetricsSink {
    pub fn new(prefix: impl Into<String>) -> Self {
        let sink = Self {
            prefix: prefix.into(),
        };
        describe_gauge!(sink.gauge_name("Loss/train"), "Mean training MSE of the last epoch");
        describe_gauge!(sink.gauge_name("Loss/valid"), "Mean validation MSE of the last epoch");
        sink
    }

    fn gauge_name(&self, scalar: &str) -> String {
        let scalar: String = scalar
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        format!("{}_{}", self.prefix, scalar)
    }
}

impl ScalarSink for MetricsSink {
    fn record(&mut self, name: &str, value: f64, step: u64) {
        metrics::gauge!(self.gauge_name(name)).set(value);
        metrics::gauge!(format!("{}_step", self.prefix)).set(step as f64);
    }
}

/// Appends JSON lines to `<dir>/events.<timestamp>.jsonl`
#[derive(Debug)]
pub struct EventFileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl EventFileSink {
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        let path = dir.join(format!("events.{}.jsonl", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
        let file = File::create(&path).map_err(|e| PipelineError::io(&path, e))?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.writer.is_some()
    }

    fn disable(&mut self, err: &dyn std::fmt::Display) {
        warn!(
            path = %self.path.display(),
            "scalar event log disabled after write failure: {}",
            err
        );
        self.writer = None;
    }
}

impl ScalarSink for EventFileSink {
    fn record(&mut self, name: &str, value: f64, step: u64) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let event = ScalarEvent {
            name: name.to_string(),
            value,
            step,
            wall_time: Utc::now().timestamp_micros() as f64 / 1e6,
        };
        let outcome = serde_json::to_writer(&mut *writer, &event)
            .map_err(|e| e.to_string())
            .and_then(|_| writer.write_all(b"\n").map_err(|e| e.to_string()));
        if let Err(err) = outcome {
            self.disable(&err);
        }
    }

    fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.flush() {
                self.disable(&err);
            }
        }
    }
}

impl Drop for EventFileSink {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Keeps every event in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub events: Vec<ScalarEvent>,
}

impl MemorySink {
    pub fn values(&self, name: &str) -> Vec<(u64, f64)> {
        self.events
            .iter()
            .filter(|e| e.name == name)
            .map(|e| (e.step, e.value))
            .collect()
    }
}

impl ScalarSink for MemorySink {
    fn record(&mut self, name: &str, value: f64, step: u64) {
        self.events.push(ScalarEvent {
            name: name.to_string(),
            value,
            step,
            wall_time: 0.0,
        });
    }
}

/// Forwards to several sinks
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn ScalarSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl ScalarSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn ScalarSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ScalarSink for FanoutSink {
    fn record(&mut self, name: &str, value: f64, step: u64) {
        for sink in &mut self.sinks {
            sink.record(name, value, step);
        }
    }

    fn flush(&mut self) {
        for sink in &mut self.sinks {
            sink.flush();
        }
    }
}

impl<S: ScalarSink + ?Sized> ScalarSink for &mut S {
    fn record(&mut self, name: &str, value: f64, step: u64) {
        (**self).record(name, value, step);
    }

    fn flush(&mut self) {
        (**self).flush();
    }
}
