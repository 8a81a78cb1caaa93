//! Compute placement
//!
//! Parameters and batch data must live on the same device for a forward or
//! backward pass. Only the CPU backend is compiled in: asking for an
//! accelerator resolves to CPU with a single warning.

use crate::errors::{PipelineError, Result};
use crate::loader::Batch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    #[default]
    Cpu,
    Accelerator,
}

impl ComputeDevice {
    pub fn is_available(&self) -> bool {
        matches!(self, ComputeDevice::Cpu)
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "cpu"),
            ComputeDevice::Accelerator => write!(f, "accelerator"),
        }
    }
}

impl FromStr for ComputeDevice {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(ComputeDevice::Cpu),
            "accelerator" | "cuda" | "gpu" => Ok(ComputeDevice::Accelerator),
            other => Err(PipelineError::config(format!(
                "unknown device `{}` (expected cpu or accelerator)",
                other
            ))),
        }
    }
}

/// Resolved device for one training or inference run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    requested: ComputeDevice,
    device: ComputeDevice,
}

impl Placement {
    /// Pick the requested device, falling back to CPU when it is unavailable
    pub fn resolve(requested: ComputeDevice) -> Self {
        let device = if requested.is_available() {
            requested
        } else {
            warn!(
                requested = %requested,
                "compute device unavailable, falling back to cpu"
            );
            ComputeDevice::Cpu
        };
        Self { requested, device }
    }

    pub fn cpu() -> Self {
        Self {
            requested: ComputeDevice::Cpu,
            device: ComputeDevice::Cpu,
        }
    }

    pub fn device(&self) -> ComputeDevice {
        self.device
    }

    pub fn requested(&self) -> ComputeDevice {
        self.requested
    }

    pub fn fell_back(&self) -> bool {
        self.requested != self.device
    }

    /// Bind `batch` to this device for the duration of one computation
    pub fn bind<'b>(&self, batch: &'b Batch) -> PlacedBatch<'b> {
        trace!(device = %self.device, rows = batch.len(), pinned = batch.pinned, "batch placed");
        PlacedBatch {
            batch,
            device: self.device,
        }
    }
}

/// A batch resident on a device. Released when dropped.
#[derive(Debug)]
pub struct PlacedBatch<'b> {
    batch: &'b Batch,
    device: ComputeDevice,
}

impl PlacedBatch<'_> {
    pub fn device(&self) -> ComputeDevice {
        self.device
    }

    /// Fail unless this batch lives on `device`
    pub fn ensure_on(&self, device: ComputeDevice) -> Result<()> {
        if self.device != device {
            return Err(PipelineError::Device(format!(
                "batch on {} but parameters on {}",
                self.device, device
            )));
        }
        Ok(())
    }
}

impl Deref for PlacedBatch<'_> {
    type Target = Batch;

    fn deref(&self) -> &Batch {
        self.batch
    }
}

impl Drop for PlacedBatch<'_> {
    fn drop(&mut self) {
        trace!(device = %self.device, rows = self.batch.len(), "batch released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Batch {
        Batch {
            rows: vec![0, 1],
            features: vec![1.0, 2.0],
            targets: None,
            width: 1,
            pinned: true,
        }
    }

    #[test]
    fn test_accelerator_falls_back() {
        let placement = Placement::resolve(ComputeDevice::Accelerator);
        assert_eq!(placement.device(), ComputeDevice::Cpu);
        assert!(placement.fell_back());

        let placement = Placement::resolve(ComputeDevice::Cpu);
        assert!(!placement.fell_back());
    }

    #[test]
    fn test_bind_and_check() {
        let batch = batch();
        let placed = Placement::cpu().bind(&batch);
        assert_eq!(placed.len(), 2);
        assert!(placed.ensure_on(ComputeDevice::Cpu).is_ok());
        assert!(matches!(
            placed.ensure_on(ComputeDevice::Accelerator),
            Err(PipelineError::Device(_))
        ));
    }

    #[test]
    fn test_parse() {
        assert_eq!("CUDA".parse::<ComputeDevice>().unwrap(), ComputeDevice::Accelerator);
        assert_eq!("cpu".parse::<ComputeDevice>().unwrap(), ComputeDevice::Cpu);
        assert!("tpu".parse::<ComputeDevice>().is_err());
    }
}
