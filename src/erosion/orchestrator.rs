//! Cycle orchestration
//!
//! [`Simulation`] is the whole state of one run: backend, seed source,
//! parameter block and the ping-pong bookkeeping. Each cycle regenerates the
//! droplet seeds, updates the cycle index, runs the erosion pass followed by
//! the smoothing pass, waits for both, and then swaps the authoritative
//! buffer. Snapshots are read back every `draw_interval` cycles and after the
//! last one.

use std::fmt;
use std::ops::ControlFlow;

use log::{debug, error, info};

use super::backend::{BufferId, ComputeBackend};
use super::block::ParamBlock;
use super::params::SimulationParameters;
use super::seeds::SeedSource;
use crate::error::ErosionError;
use crate::fixed_point::{to_fixed, unscale_grid};
use crate::heightfield::Heightfield;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimulationState {
    Idle,
    Running { cycle: u32 },
    Done,
    Aborted,
}

impl fmt::Display for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running { cycle } => write!(f, "running (cycle {})", cycle),
            Self::Done => write!(f, "done"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Ping-pong position between cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleState {
    /// Index of the next cycle to run (equals the number completed)
    pub cycle_index: u32,
    /// Buffer holding the authoritative heights
    pub current: BufferId,
}

/// Receives progress from a running simulation.
pub trait CycleObserver {
    /// When false, due snapshots are skipped and no readback happens.
    fn wants_snapshots(&self) -> bool {
        true
    }

    fn on_snapshot(&mut self, _cycle: u32, _heights: &Heightfield) {}

    /// Called after every completed cycle. `Break` declines the next cycle.
    fn on_cycle_complete(&mut self, _cycle: u32, _total_cycles: u32) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Runs to completion without snapshots.
impl CycleObserver for () {
    fn wants_snapshots(&self) -> bool {
        false
    }
}

impl<O: CycleObserver + ?Sized> CycleObserver for &mut O {
    fn wants_snapshots(&self) -> bool {
        (**self).wants_snapshots()
    }

    fn on_snapshot(&mut self, cycle: u32, heights: &Heightfield) {
        (**self).on_snapshot(cycle, heights)
    }

    fn on_cycle_complete(&mut self, cycle: u32, total_cycles: u32) -> ControlFlow<()> {
        (**self).on_cycle_complete(cycle, total_cycles)
    }
}

/// Counters for one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub erosion_passes: u32,
    pub smoothing_passes: u32,
    pub snapshot_readbacks: u32,
    pub final_readbacks: u32,
    pub droplets_simulated: u64,
    /// Fixed-point material removed, when the backend reports pass totals
    pub eroded: i64,
    pub deposited: i64,
}

#[derive(Clone, Debug)]
pub struct SimulationOutput {
    pub heightfield: Heightfield,
    pub cycles_completed: u32,
    /// The observer declined a cycle before the configured count was reached
    pub stopped_early: bool,
    pub stats: RunStats,
}

pub struct Simulation<B, S> {
    backend: B,
    seeds: S,
    params: SimulationParameters,
    block: ParamBlock,
    seed_buffer: Vec<u32>,
    state: SimulationState,
    cycle: CycleState,
    stats: RunStats,
}

impl<B: ComputeBackend, S: SeedSource> Simulation<B, S> {
    /// Validate the run, quantize `input` and allocate device resources.
    pub fn new(
        mut backend: B,
        seeds: S,
        params: SimulationParameters,
        input: &Heightfield,
    ) -> Result<Self, ErosionError> {
        params.validate()?;
        if input.size() != params.grid_dim as usize || input.len() != params.total_cells() as usize {
            return Err(ErosionError::DimensionMismatch {
                expected: params.total_cells() as usize,
                actual: input.len(),
            });
        }

        let fixed = to_fixed(input.as_slice(), params.scale)?;
        let block = ParamBlock::new(&params);
        backend.allocate(&fixed, &block)?;

        info!(
            "Simulation ready on {}: {}x{} grid, {} droplets x {} cycles, scale {}",
            backend.name(),
            params.grid_dim,
            params.grid_dim,
            params.droplets_per_cycle,
            params.cycles,
            params.scale
        );

        Ok(Self {
            backend,
            seeds,
            seed_buffer: vec![0; params.droplets_per_cycle as usize],
            params,
            block,
            state: SimulationState::Idle,
            cycle: CycleState {
                cycle_index: 0,
                current: BufferId::Zero,
            },
            stats: RunStats::default(),
        })
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn cycle_state(&self) -> CycleState {
        self.cycle
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run every configured cycle and return the final heightfield.
    ///
    /// Only allowed once, from `Idle`. Any backend failure aborts the run and
    /// is returned; no partial result is produced.
    pub fn run<O: CycleObserver + ?Sized>(
        &mut self,
        observer: &mut O,
    ) -> Result<SimulationOutput, ErosionError> {
        if self.state != SimulationState::Idle {
            return Err(ErosionError::NotRunnable(self.state));
        }

        match self.run_cycles(observer) {
            Ok(output) => {
                self.state = SimulationState::Done;
                info!(
                    "Simulation done after {} cycles ({} droplets)",
                    output.cycles_completed, output.stats.droplets_simulated
                );
                Ok(output)
            }
            Err(e) => {
                error!("Simulation aborted at {}: {}", self.state, e);
                self.state = SimulationState::Aborted;
                Err(e)
            }
        }
    }

    fn run_cycles<O: CycleObserver + ?Sized>(
        &mut self,
        observer: &mut O,
    ) -> Result<SimulationOutput, ErosionError> {
        let cycles = self.params.cycles;
        let mut stopped_early = false;

        for i in 0..cycles {
            self.state = SimulationState::Running { cycle: i };
            self.run_cycle(i)?;

            let last = i + 1 == cycles;
            if (i % self.params.draw_interval == 0 || last) && observer.wants_snapshots() {
                let snapshot = self.read_current()?;
                self.stats.snapshot_readbacks += 1;
                observer.on_snapshot(i, &snapshot);
            }

            if observer.on_cycle_complete(i, cycles).is_break() {
                if !last {
                    info!("Stopping after cycle {} of {}", i + 1, cycles);
                    stopped_early = true;
                }
                break;
            }
        }

        let heightfield = self.read_current()?;
        self.stats.final_readbacks += 1;

        Ok(SimulationOutput {
            heightfield,
            cycles_completed: self.cycle.cycle_index,
            stopped_early,
            stats: self.stats,
        })
    }

    fn run_cycle(&mut self, index: u32) -> Result<(), ErosionError> {
        self.seeds.fill(&mut self.seed_buffer, self.params.total_cells());
        self.backend.write_seeds(&self.seed_buffer)?;

        self.block.set_cycle_index(index);
        self.backend.write_cycle_index(&self.block)?;

        let current = self.cycle.current;
        self.backend.dispatch_erosion(current)?;
        self.stats.erosion_passes += 1;
        self.backend.dispatch_smoothing(current)?;
        self.stats.smoothing_passes += 1;
        self.backend.finish_cycle()?;

        self.stats.droplets_simulated += self.params.droplets_per_cycle as u64;
        if let Some(totals) = self.backend.last_pass_totals() {
            self.stats.eroded += totals.eroded;
            self.stats.deposited += totals.deposited;
        }

        // Smoothing output becomes authoritative
        self.cycle = CycleState {
            cycle_index: index + 1,
            current: current.other(),
        };
        debug!("Cycle {} complete, heights now in {}", index, self.cycle.current);
        Ok(())
    }

    fn read_current(&mut self) -> Result<Heightfield, ErosionError> {
        let fixed = self.backend.read_back(self.cycle.current)?;
        unscale_grid(&fixed, self.params.scale, self.params.grid_dim as usize)
    }
}
