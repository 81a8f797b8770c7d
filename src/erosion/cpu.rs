//! CPU backend: both passes as rayon parallel iterators over atomic buffers.

use std::sync::atomic::{AtomicI32, Ordering};

use log::debug;
use rayon::prelude::*;

use super::backend::{BufferId, ComputeBackend};
use super::block::ParamBlock;
use super::droplet::{simulate_droplet, PassTotals};
use super::smoothing::smoothed_cell;
use crate::error::ErosionError;

struct CpuBuffers {
    heights: [Vec<AtomicI32>; 2],
    seeds: Vec<u32>,
    block: ParamBlock,
}

impl CpuBuffers {
    /// `(authoritative, alternate)` for the given current buffer.
    fn pair(&self, current: BufferId) -> (&[AtomicI32], &[AtomicI32]) {
        (
            &self.heights[current.index()],
            &self.heights[current.other().index()],
        )
    }
}

/// Reference backend. Every dispatch runs to completion before it returns.
#[derive(Default)]
pub struct CpuBackend {
    buffers: Option<CpuBuffers>,
    last_totals: Option<PassTotals>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffers(&self) -> Result<&CpuBuffers, ErosionError> {
        self.buffers
            .as_ref()
            .ok_or_else(|| ErosionError::RuntimeCompute("cpu backend used before allocate".into()))
    }

    fn buffers_mut(&mut self) -> Result<&mut CpuBuffers, ErosionError> {
        self.buffers
            .as_mut()
            .ok_or_else(|| ErosionError::RuntimeCompute("cpu backend used before allocate".into()))
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn allocate(&mut self, heights: &[i32], block: &ParamBlock) -> Result<(), ErosionError> {
        let expected = block.ints().total_cells as usize;
        if heights.len() != expected {
            return Err(ErosionError::DimensionMismatch { expected, actual: heights.len() });
        }

        let make = || heights.iter().map(|&h| AtomicI32::new(h)).collect::<Vec<_>>();
        self.buffers = Some(CpuBuffers {
            heights: [make(), make()],
            seeds: vec![0; block.ints().droplets_per_cycle as usize],
            block: *block,
        });
        self.last_totals = None;
        Ok(())
    }

    fn write_seeds(&mut self, seeds: &[u32]) -> Result<(), ErosionError> {
        let buffers = self.buffers_mut()?;
        if seeds.len() != buffers.seeds.len() {
            return Err(ErosionError::RuntimeCompute(format!(
                "seed buffer holds {} droplets, got {}",
                buffers.seeds.len(),
                seeds.len()
            )));
        }
        buffers.seeds.copy_from_slice(seeds);
        Ok(())
    }

    fn write_cycle_index(&mut self, block: &ParamBlock) -> Result<(), ErosionError> {
        self.buffers_mut()?.block.copy_cycle_index_from(block);
        Ok(())
    }

    fn dispatch_erosion(&mut self, current: BufferId) -> Result<(), ErosionError> {
        let buffers = self.buffers()?;
        let (authoritative, alternate) = buffers.pair(current);

        // Pass-start copy: droplets sample this, never the buffer they modify
        alternate
            .par_iter()
            .zip(authoritative.par_iter())
            .for_each(|(dst, src)| dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed));

        let block = &buffers.block;
        let totals = buffers
            .seeds
            .par_iter()
            .map(|&start| simulate_droplet(alternate, authoritative, block, start))
            .fold(PassTotals::default, PassTotals::record)
            .reduce(PassTotals::default, PassTotals::merge);

        debug!(
            "cycle {}: {} droplets, {} steps, eroded {} deposited {}",
            block.cycle_index(),
            totals.droplets,
            totals.steps,
            totals.eroded,
            totals.deposited
        );
        self.last_totals = Some(totals);
        Ok(())
    }

    fn dispatch_smoothing(&mut self, current: BufferId) -> Result<(), ErosionError> {
        let buffers = self.buffers()?;
        let (authoritative, alternate) = buffers.pair(current);
        let dim = buffers.block.ints().dim_x as usize;

        alternate.par_iter().enumerate().for_each(|(idx, dst)| {
            dst.store(smoothed_cell(authoritative, dim, idx), Ordering::Relaxed);
        });
        Ok(())
    }

    fn finish_cycle(&mut self) -> Result<(), ErosionError> {
        // Passes are synchronous here
        self.buffers().map(|_| ())
    }

    fn read_back(&mut self, buffer: BufferId) -> Result<Vec<i32>, ErosionError> {
        let buffers = self.buffers()?;
        Ok(buffers.heights[buffer.index()]
            .iter()
            .map(|h| h.load(Ordering::Relaxed))
            .collect())
    }

    fn last_pass_totals(&self) -> Option<PassTotals> {
        self.last_totals
    }
}
