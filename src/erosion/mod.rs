//! Droplet hydraulic erosion
//!
//! Heights are held as fixed-point `i32` values in two device buffers. Each
//! cycle scatters a fresh set of droplets over the grid:
//! - **Erosion pass**: one invocation per droplet walks downhill, picking up
//!   and dropping sediment with atomic updates on the authoritative buffer
//! - **Smoothing pass**: one invocation per cell writes the 3x3 mean into the
//!   alternate buffer, which then becomes authoritative
//!
//! Both passes exist as WGSL kernels ([`gpu`]) and as a rayon implementation
//! ([`cpu`]) with identical arithmetic.

pub mod backend;
pub mod block;
pub mod cpu;
pub mod droplet;
pub mod gpu;
pub mod orchestrator;
pub mod params;
pub mod seeds;
pub mod smoothing;

pub use backend::{create_backend, BackendKind, BufferId, ComputeBackend};
pub use block::ParamBlock;
pub use cpu::CpuBackend;
pub use droplet::{DropletOutcome, PassTotals};
pub use gpu::GpuBackend;
pub use orchestrator::{
    CycleObserver, CycleState, RunStats, Simulation, SimulationOutput, SimulationState,
};
pub use params::{ErosionPreset, SimulationParameters};
pub use seeds::{RandomSeeds, SeedSource};

use crate::error::ErosionError;
use crate::heightfield::Heightfield;

/// Erode `input` on the requested backend with fresh random droplets.
///
/// Convenience wrapper over [`Simulation`]; pass an observer to receive
/// snapshots or to stop between cycles.
pub fn erode<O: CycleObserver + ?Sized>(
    input: &Heightfield,
    params: SimulationParameters,
    kind: BackendKind,
    seed: Option<u64>,
    observer: &mut O,
) -> Result<SimulationOutput, ErosionError> {
    let backend = create_backend(kind)?;
    let seeds = match seed {
        Some(seed) => RandomSeeds::from_seed(seed),
        None => RandomSeeds::from_entropy(),
    };
    Simulation::new(backend, seeds, params, input)?.run(observer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erode_on_cpu() {
        let input = Heightfield::new_with(32, 0.25);
        let params = SimulationParameters {
            grid_dim: 32,
            droplets_per_cycle: 64,
            cycles: 2,
            scale: 1000,
            ..Default::default()
        };

        let output = erode(&input, params, BackendKind::Cpu, Some(1), &mut ()).unwrap();

        assert_eq!(output.cycles_completed, 2);
        assert_eq!(output.heightfield, input);
    }
}
