//! Per-cycle droplet start positions
//!
//! Every cycle draws a fresh set of cell indices; nothing from a previous
//! cycle is reused. The random source is injectable so runs can be replayed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Produces droplet start cells for one cycle.
pub trait SeedSource {
    /// Overwrite every entry of `seeds` with a cell index in `0..total_cells`.
    fn fill(&mut self, seeds: &mut [u32], total_cells: u32);
}

impl<S: SeedSource + ?Sized> SeedSource for &mut S {
    fn fill(&mut self, seeds: &mut [u32], total_cells: u32) {
        (**self).fill(seeds, total_cells)
    }
}

impl<S: SeedSource + ?Sized> SeedSource for Box<S> {
    fn fill(&mut self, seeds: &mut [u32], total_cells: u32) {
        (**self).fill(seeds, total_cells)
    }
}

/// Independent uniform draws from any `rand` generator.
pub struct RandomSeeds<R = ChaCha8Rng> {
    rng: R,
}

impl<R: Rng> RandomSeeds<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RandomSeeds<ChaCha8Rng> {
    /// Deterministic source: the same seed replays the same droplets.
    pub fn from_seed(seed: u64) -> Self {
        Self::new(ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(ChaCha8Rng::from_entropy())
    }
}

impl<R: Rng> SeedSource for RandomSeeds<R> {
    fn fill(&mut self, seeds: &mut [u32], total_cells: u32) {
        for seed in seeds.iter_mut() {
            *seed = self.rng.gen_range(0..total_cells);
        }
    }
}
