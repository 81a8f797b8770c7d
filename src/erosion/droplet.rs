//! Droplet lifetime kernel (CPU)
//!
//! Mirrors `erode_droplets` in `shaders/erosion.wgsl` step for step. Heights
//! are sampled from the pass-start copy and every change is applied with an
//! atomic add/subtract on the authoritative buffer, so the result of a pass
//! does not depend on the order droplets run in.

use std::sync::atomic::{AtomicI32, Ordering};

use super::block::ParamBlock;

/// Sediment capacity multiplier
pub const CAPACITY_FACTOR: f32 = 4.0;
/// Added to the slope so capacity strictly grows with it
pub const MIN_SLOPE: f32 = 0.01;
/// Acceleration from descending one height unit
pub const GRAVITY: f32 = 4.0;
/// Gradient magnitude at or below which a cell counts as flat
pub const FLAT_EPSILON: f32 = 1e-6;
/// Floor on squared velocity
pub const MIN_SPEED_SQ: f32 = 0.01;

/// What a single droplet did over its lifetime. Amounts are fixed-point units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DropletOutcome {
    pub steps: u32,
    pub eroded: i64,
    pub deposited: i64,
}

impl DropletOutcome {
    /// Sediment that left the grid with the droplet.
    pub fn carried_off(&self) -> i64 {
        self.eroded - self.deposited
    }
}

/// Sums over every droplet of one erosion pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassTotals {
    pub droplets: u64,
    pub steps: u64,
    pub eroded: i64,
    pub deposited: i64,
}

impl PassTotals {
    pub fn record(mut self, outcome: DropletOutcome) -> Self {
        self.droplets += 1;
        self.steps += outcome.steps as u64;
        self.eroded += outcome.eroded;
        self.deposited += outcome.deposited;
        self
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            droplets: self.droplets + other.droplets,
            steps: self.steps + other.steps,
            eroded: self.eroded + other.eroded,
            deposited: self.deposited + other.deposited,
        }
    }
}

/// Read-only view of the pass-start heights.
struct Surface<'a> {
    heights: &'a [AtomicI32],
    dim: usize,
}

impl Surface<'_> {
    /// Interior test: bilinear sampling reads the cell and its +x/+z neighbours.
    fn contains(&self, x: f32, z: f32) -> bool {
        let limit = (self.dim - 1) as f32;
        x >= 0.0 && z >= 0.0 && x < limit && z < limit
    }

    fn cell(&self, x: f32, z: f32) -> usize {
        z.floor() as usize * self.dim + x.floor() as usize
    }

    fn at(&self, idx: usize) -> f32 {
        self.heights[idx].load(Ordering::Relaxed) as f32
    }

    /// Bilinear height and gradient at a sub-cell position.
    fn sample(&self, x: f32, z: f32) -> (f32, f32, f32) {
        let idx = self.cell(x, z);
        let fx = x - x.floor();
        let fz = z - z.floor();

        let h00 = self.at(idx);
        let h10 = self.at(idx + 1);
        let h01 = self.at(idx + self.dim);
        let h11 = self.at(idx + self.dim + 1);

        let gx = (h10 - h00) * (1.0 - fz) + (h11 - h01) * fz;
        let gz = (h01 - h00) * (1.0 - fx) + (h11 - h10) * fx;
        let h0 = h00 * (1.0 - fx) + h10 * fx;
        let h1 = h01 * (1.0 - fx) + h11 * fx;
        (h0 * (1.0 - fz) + h1 * fz, gx, gz)
    }
}

/// Simulate one droplet starting at cell `start`.
///
/// `snapshot` holds the heights at pass start, `target` is the authoritative
/// buffer receiving the atomic updates. Both are row-major with side `dim_x`.
pub fn simulate_droplet(
    snapshot: &[AtomicI32],
    target: &[AtomicI32],
    block: &ParamBlock,
    start: u32,
) -> DropletOutcome {
    let ints = block.ints();
    let floats = block.floats();
    let surface = Surface {
        heights: snapshot,
        dim: ints.dim_x as usize,
    };
    let mut outcome = DropletOutcome::default();

    let mut x = (start % ints.dim_x) as f32;
    let mut z = (start / ints.dim_x) as f32;
    if !surface.contains(x, z) {
        return outcome;
    }

    // Volumes and heights share the fixed-point unit
    let unit = (ints.start_volume as f32).max(1.0);
    let min_volume = ints.min_volume as f32;
    let mut volume = ints.start_volume as f32;
    let mut velocity = 1.0f32;
    let mut sediment: i64 = 0;

    for _ in 0..ints.max_iterations {
        if volume < min_volume {
            break;
        }

        let (height, gx, gz) = surface.sample(x, z);
        let len = gx.hypot(gz);
        if len <= FLAT_EPSILON {
            break;
        }

        let next_x = x - gx / len;
        let next_z = z - gz / len;
        if !surface.contains(next_x, next_z) {
            // Off the grid, taking its sediment along
            return outcome;
        }
        outcome.steps += 1;

        let cell = surface.cell(x, z);
        let (next_height, _, _) = surface.sample(next_x, next_z);
        let dh = next_height - height;

        if dh >= 0.0 {
            // Pit: fill up to the rim and stop
            let fill = sediment.min(dh.floor() as i64);
            if fill > 0 {
                target[cell].fetch_add(fill as i32, Ordering::Relaxed);
                outcome.deposited += fill;
            }
            return outcome;
        }

        let slope = -dh;
        let capacity = (slope + MIN_SLOPE) * velocity * (volume / unit) * CAPACITY_FACTOR;
        let carried = sediment as f32;

        if capacity > carried {
            let amount = ((capacity - carried) * floats.erosion_rate).min(slope).floor() as i64;
            if amount > 0 {
                target[cell].fetch_sub(amount as i32, Ordering::Relaxed);
                sediment += amount;
                outcome.eroded += amount;
            }
        } else {
            let amount = (((carried - capacity) * floats.deposition_rate).floor() as i64).min(sediment);
            if amount > 0 {
                target[cell].fetch_add(amount as i32, Ordering::Relaxed);
                sediment -= amount;
                outcome.deposited += amount;
            }
        }

        velocity = (velocity * velocity - dh / unit * GRAVITY).max(MIN_SPEED_SQ).sqrt();
        volume *= 1.0 - floats.evaporation_rate;
        x = next_x;
        z = next_z;
    }

    if sediment > 0 {
        target[surface.cell(x, z)].fetch_add(sediment as i32, Ordering::Relaxed);
        outcome.deposited += sediment;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erosion::params::SimulationParameters;

    fn atomics(values: &[i32]) -> Vec<AtomicI32> {
        values.iter().map(|&v| AtomicI32::new(v)).collect()
    }

    fn loads(values: &[AtomicI32]) -> Vec<i32> {
        values.iter().map(|v| v.load(Ordering::Relaxed)).collect()
    }

    fn block(dim: u32) -> ParamBlock {
        ParamBlock::new(&SimulationParameters {
            grid_dim: dim,
            droplets_per_cycle: 1,
            scale: 1000,
            ..Default::default()
        })
    }

    /// A plane falling towards +x with the given drop per cell.
    fn ramp(dim: usize, top: i32, drop: i32) -> Vec<i32> {
        (0..dim * dim).map(|i| top - (i % dim) as i32 * drop).collect()
    }

    #[test]
    fn test_flat_cell_changes_nothing() {
        let heights = vec![500; 16 * 16];
        let snapshot = atomics(&heights);
        let target = atomics(&heights);

        let outcome = simulate_droplet(&snapshot, &target, &block(16), 5 * 16 + 5);

        assert_eq!(outcome, DropletOutcome::default());
        assert_eq!(loads(&target), heights);
    }

    #[test]
    fn test_below_min_volume_terminates_immediately() {
        let dim = 16;
        let heights = ramp(dim, 2000, 100);
        let snapshot = atomics(&heights);
        let target = atomics(&heights);
        let block = ParamBlock::new(&SimulationParameters {
            grid_dim: dim as u32,
            scale: 1000,
            start_volume: 0.001,
            min_volume: 0.01,
            ..Default::default()
        });

        let outcome = simulate_droplet(&snapshot, &target, &block, 3);

        assert_eq!(outcome.steps, 0);
        assert_eq!(loads(&target), heights);
    }

    #[test]
    fn test_droplet_erodes_downhill() {
        let dim = 32;
        let heights = ramp(dim, 5000, 100);
        let snapshot = atomics(&heights);
        let target = atomics(&heights);

        let outcome = simulate_droplet(&snapshot, &target, &block(dim as u32), (10 * dim + 2) as u32);

        assert!(outcome.steps > 0);
        assert!(outcome.eroded > 0);
        let after = loads(&target);
        assert!(after[10 * dim + 2] < heights[10 * dim + 2]);
        // Only the droplet's row was touched
        for (i, (&a, &b)) in after.iter().zip(&heights).enumerate() {
            if i / dim != 10 {
                assert_eq!(a, b, "cell {} changed", i);
            }
        }
    }

    #[test]
    fn test_deposits_never_exceed_carried_sediment() {
        let dim = 48;
        // Steep ramp feeding into a flat basin: capacity collapses on the flat
        let heights: Vec<i32> = (0..dim * dim)
            .map(|i| {
                let x = (i % dim) as i32;
                if x < 20 { 8000 - x * 400 } else { 0 }
            })
            .collect();
        let snapshot = atomics(&heights);
        let target = atomics(&heights);
        let block = block(dim as u32);

        for row in 1..dim - 1 {
            let outcome = simulate_droplet(&snapshot, &target, &block, (row * dim + 1) as u32);
            assert!(outcome.deposited <= outcome.eroded, "{:?}", outcome);
            assert!(outcome.carried_off() >= 0);
        }

        let before: i64 = heights.iter().map(|&h| h as i64).sum();
        let after: i64 = loads(&target).iter().map(|&h| h as i64).sum();
        assert!(after <= before);
    }

    #[test]
    fn test_droplet_drops_load_on_first_flat_cell() {
        let dim = 48;
        let flat_x = 20;
        let heights: Vec<i32> = (0..dim * dim)
            .map(|i| {
                let x = (i % dim) as i32;
                if x < flat_x as i32 { 8000 - x * 400 } else { 0 }
            })
            .collect();
        let snapshot = atomics(&heights);
        let target = atomics(&heights);
        let block = block(dim as u32);

        for row in 1..dim - 1 {
            let outcome = simulate_droplet(&snapshot, &target, &block, (row * dim + 1) as u32);
            assert!(outcome.eroded > 0, "row {}: {:?}", row, outcome);
            assert_eq!(outcome.carried_off(), 0, "row {}: {:?}", row, outcome);
        }

        let after = loads(&target);
        for row in 1..dim - 1 {
            let cells = row * dim..(row + 1) * dim;
            assert!(after[row * dim + flat_x] > 0, "row {} left nothing on the flat", row);
            // Past the first flat cell nothing moves
            for i in row * dim + flat_x + 1..(row + 1) * dim {
                assert_eq!(after[i], 0, "cell {} changed", i);
            }
            let before: i64 = heights[cells.clone()].iter().map(|&h| h as i64).sum();
            let now: i64 = after[cells].iter().map(|&h| h as i64).sum();
            assert_eq!(now, before, "row {} lost material", row);
        }
    }

    #[test]
    fn test_edge_start_leaves_grid_untouched() {
        let dim = 8;
        let heights = ramp(dim, 1000, 10);
        let snapshot = atomics(&heights);
        let target = atomics(&heights);

        // Last column and last row have no +x/+z neighbour for sampling
        for start in [dim - 1, dim * (dim - 1), dim * dim - 1] {
            let outcome = simulate_droplet(&snapshot, &target, &block(dim as u32), start as u32);
            assert_eq!(outcome, DropletOutcome::default());
        }
        assert_eq!(loads(&target), heights);
    }

    #[test]
    fn test_reads_pass_start_copy_only() {
        let dim = 32;
        let heights = ramp(dim, 5000, 100);
        let snapshot = atomics(&heights);
        let first = atomics(&heights);
        let second = atomics(&heights);
        let block = block(dim as u32);

        // Running another droplet first must not change what this one sees
        simulate_droplet(&snapshot, &second, &block, (11 * dim + 2) as u32);
        let alone = simulate_droplet(&snapshot, &first, &block, (10 * dim + 2) as u32);
        let after_other = simulate_droplet(&snapshot, &second, &block, (10 * dim + 2) as u32);

        assert_eq!(alone, after_other);
    }

    #[test]
    fn test_pass_totals_accumulate() {
        let a = DropletOutcome { steps: 3, eroded: 10, deposited: 4 };
        let b = DropletOutcome { steps: 1, eroded: 0, deposited: 0 };
        let totals = PassTotals::default().record(a).merge(PassTotals::default().record(b));
        assert_eq!(totals, PassTotals { droplets: 2, steps: 4, eroded: 10, deposited: 4 });
    }
}
