//! Compute backend abstraction
//!
//! A backend owns the two height buffers, the parameter block and the seed
//! buffer on its device. The orchestrator drives it one cycle at a time and
//! only ever names buffers through [`BufferId`].

use std::fmt;
use std::str::FromStr;

use log::{info, warn};

use super::block::ParamBlock;
use super::cpu::CpuBackend;
use super::droplet::PassTotals;
use super::gpu::GpuBackend;
use crate::error::ErosionError;

/// One of the two ping-pong height buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BufferId {
    #[default]
    Zero,
    One,
}

impl BufferId {
    pub fn index(self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One => 1,
        }
    }

    /// The alternate buffer.
    pub fn other(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer {}", self.index())
    }
}

/// Device-side operations for one simulation run.
///
/// Every cycle the orchestrator calls, in order: `write_seeds`,
/// `write_cycle_index`, `dispatch_erosion`, `dispatch_smoothing`,
/// `finish_cycle`. Dispatches may be recorded lazily; `finish_cycle` must not
/// return before both passes have completed on the device.
pub trait ComputeBackend {
    fn name(&self) -> &str;

    /// Create both height buffers initialised to `heights`, the uniform
    /// blocks and a seed buffer sized for `droplets_per_cycle`.
    fn allocate(&mut self, heights: &[i32], block: &ParamBlock) -> Result<(), ErosionError>;

    fn write_seeds(&mut self, seeds: &[u32]) -> Result<(), ErosionError>;

    /// Rewrite only the cycle-index field of the device block.
    fn write_cycle_index(&mut self, block: &ParamBlock) -> Result<(), ErosionError>;

    /// Erosion pass over the authoritative buffer `current`.
    fn dispatch_erosion(&mut self, current: BufferId) -> Result<(), ErosionError>;

    /// Smoothing pass reading `current` and writing `current.other()`.
    fn dispatch_smoothing(&mut self, current: BufferId) -> Result<(), ErosionError>;

    /// Block until the device has retired every pass of this cycle.
    fn finish_cycle(&mut self) -> Result<(), ErosionError>;

    fn read_back(&mut self, buffer: BufferId) -> Result<Vec<i32>, ErosionError>;

    /// Totals of the most recent erosion pass, for backends that track them.
    fn last_pass_totals(&self) -> Option<PassTotals> {
        None
    }
}

impl<B: ComputeBackend + ?Sized> ComputeBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn allocate(&mut self, heights: &[i32], block: &ParamBlock) -> Result<(), ErosionError> {
        (**self).allocate(heights, block)
    }

    fn write_seeds(&mut self, seeds: &[u32]) -> Result<(), ErosionError> {
        (**self).write_seeds(seeds)
    }

    fn write_cycle_index(&mut self, block: &ParamBlock) -> Result<(), ErosionError> {
        (**self).write_cycle_index(block)
    }

    fn dispatch_erosion(&mut self, current: BufferId) -> Result<(), ErosionError> {
        (**self).dispatch_erosion(current)
    }

    fn dispatch_smoothing(&mut self, current: BufferId) -> Result<(), ErosionError> {
        (**self).dispatch_smoothing(current)
    }

    fn finish_cycle(&mut self) -> Result<(), ErosionError> {
        (**self).finish_cycle()
    }

    fn read_back(&mut self, buffer: BufferId) -> Result<Vec<i32>, ErosionError> {
        (**self).read_back(buffer)
    }

    fn last_pass_totals(&self) -> Option<PassTotals> {
        (**self).last_pass_totals()
    }
}

/// Which backend to run on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// GPU when an adapter is available, CPU otherwise
    #[default]
    Auto,
    Gpu,
    Cpu,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Gpu => write!(f, "gpu"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "gpu" => Ok(Self::Gpu),
            "cpu" => Ok(Self::Cpu),
            other => Err(format!("unknown backend `{}` (expected auto, gpu or cpu)", other)),
        }
    }
}

/// Create a backend. `Gpu` fails with `Initialization` when no adapter or
/// device is available; `Auto` falls back to the CPU instead.
pub fn create_backend(kind: BackendKind) -> Result<Box<dyn ComputeBackend>, ErosionError> {
    let backend: Box<dyn ComputeBackend> = match kind {
        BackendKind::Cpu => Box::new(CpuBackend::new()),
        BackendKind::Gpu => Box::new(GpuBackend::new()?),
        BackendKind::Auto => match GpuBackend::new() {
            Ok(gpu) => Box::new(gpu),
            Err(e) => {
                warn!("GPU not available ({}), using CPU parallel erosion", e);
                Box::new(CpuBackend::new())
            }
        },
    };
    info!("Using {} backend", backend.name());
    Ok(backend)
}
