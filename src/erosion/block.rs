//! Uniform parameter block shared by the erosion and smoothing kernels
//!
//! Two groups, laid out exactly as the WGSL `IntParams` / `FloatParams`
//! structs. Only `cycle_index` changes during a run, and it is rewritten in
//! place at [`ParamBlock::CYCLE_INDEX_OFFSET`].

use bytemuck::{Pod, Zeroable};

use super::params::SimulationParameters;

/// Integer constants (binding 0)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct IntConstants {
    pub droplets_per_cycle: u32,
    pub cycle_index: u32,
    pub max_iterations: u32,
    /// Scaled start volume
    pub start_volume: u32,
    /// Scaled minimum volume
    pub min_volume: u32,
    pub dim_x: u32,
    pub dim_z: u32,
    pub total_cells: u32,
    pub barrier_interval: u32,
    _pad: [u32; 3],
}

/// Float constants (binding 1)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct FloatConstants {
    pub deposition_rate: f32,
    pub erosion_rate: f32,
    pub evaporation_rate: f32,
    _pad: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ParamBlock {
    ints: IntConstants,
    floats: FloatConstants,
}

impl ParamBlock {
    /// Byte offset of `cycle_index` inside the integer group.
    pub const CYCLE_INDEX_OFFSET: u64 = std::mem::offset_of!(IntConstants, cycle_index) as u64;

    pub fn new(params: &SimulationParameters) -> Self {
        Self {
            ints: IntConstants {
                droplets_per_cycle: params.droplets_per_cycle,
                cycle_index: 0,
                max_iterations: params.max_iterations_per_droplet,
                start_volume: params.scaled_start_volume(),
                min_volume: params.scaled_min_volume(),
                dim_x: params.grid_dim,
                dim_z: params.grid_dim,
                total_cells: params.total_cells(),
                barrier_interval: params.barrier_interval,
                _pad: [0; 3],
            },
            floats: FloatConstants {
                deposition_rate: params.deposition_rate,
                erosion_rate: params.erosion_rate,
                evaporation_rate: params.evaporation_rate,
                _pad: 0.0,
            },
        }
    }

    pub fn ints(&self) -> &IntConstants {
        &self.ints
    }

    pub fn floats(&self) -> &FloatConstants {
        &self.floats
    }

    pub fn cycle_index(&self) -> u32 {
        self.ints.cycle_index
    }

    /// Update the cycle index; nothing else in the block changes.
    pub fn set_cycle_index(&mut self, cycle_index: u32) {
        self.ints.cycle_index = cycle_index;
    }

    /// The four bytes to write at [`Self::CYCLE_INDEX_OFFSET`].
    pub fn cycle_index_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.ints.cycle_index)
    }

    pub fn int_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.ints)
    }

    pub fn float_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.floats)
    }

    /// Overwrite only the cycle index from another block of the same run.
    pub(crate) fn copy_cycle_index_from(&mut self, other: &ParamBlock) {
        self.ints.cycle_index = other.ints.cycle_index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SimulationParameters {
        SimulationParameters {
            grid_dim: 512,
            droplets_per_cycle: 100,
            scale: 1000,
            barrier_interval: 7,
            ..Default::default()
        }
    }

    #[test]
    fn test_layout_matches_shader_structs() {
        assert_eq!(std::mem::size_of::<IntConstants>(), 48);
        assert_eq!(std::mem::size_of::<FloatConstants>(), 16);
        assert_eq!(ParamBlock::CYCLE_INDEX_OFFSET, 4);
    }

    #[test]
    fn test_packs_parameters() {
        let block = ParamBlock::new(&params());
        let ints = block.ints();
        assert_eq!(ints.droplets_per_cycle, 100);
        assert_eq!(ints.cycle_index, 0);
        assert_eq!(ints.max_iterations, 1000);
        assert_eq!(ints.start_volume, 1000);
        assert_eq!(ints.min_volume, 1);
        assert_eq!((ints.dim_x, ints.dim_z), (512, 512));
        assert_eq!(ints.total_cells, 512 * 512);
        assert_eq!(ints.barrier_interval, 7);

        let floats = block.floats();
        assert_eq!(floats.erosion_rate, 0.3);
        assert_eq!(floats.deposition_rate, 0.3);
        assert_eq!(floats.evaporation_rate, 0.001);
    }

    #[test]
    fn test_cycle_index_update_touches_only_its_bytes() {
        let mut block = ParamBlock::new(&params());
        let before = block.int_bytes().to_vec();
        let floats_before = block.float_bytes().to_vec();

        block.set_cycle_index(0xA1B2_C3D4);
        let after = block.int_bytes();

        let offset = ParamBlock::CYCLE_INDEX_OFFSET as usize;
        for (i, (a, b)) in before.iter().zip(after).enumerate() {
            if (offset..offset + 4).contains(&i) {
                continue;
            }
            assert_eq!(a, b, "byte {} changed", i);
        }
        assert_eq!(&after[offset..offset + 4], block.cycle_index_bytes());
        assert_eq!(block.float_bytes(), &floats_before[..]);
        assert_eq!(block.cycle_index(), 0xA1B2_C3D4);
    }
}
