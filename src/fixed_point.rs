//! Float <-> fixed-point height conversion
//!
//! Heights live on the device as `i32` values scaled by a constant `S`, so
//! concurrent droplets can accumulate changes with integer atomics. Integer
//! addition is exact and commutative, which makes a pass independent of the
//! order in which droplets run.
//!
//! Quantization rounds half away from zero (`f64::round`). The round trip
//! `dequantize(quantize(v, s), s)` is within `1 / (2s)` of `v`.

use crate::error::ErosionError;
use crate::heightfield::Heightfield;

/// Largest magnitude a quantized height may have.
///
/// Leaves head-room so a 3x3 smoothing window sum stays inside `i32`.
pub const MAX_FIXED_MAGNITUDE: i32 = i32::MAX / 16;

/// Quantize one height. `None` for non-finite or out-of-range values.
pub fn quantize(value: f32, scale: u32) -> Option<i32> {
    if !value.is_finite() {
        return None;
    }
    let scaled = (value as f64 * scale as f64).round();
    if scaled.abs() > MAX_FIXED_MAGNITUDE as f64 {
        return None;
    }
    Some(scaled as i32)
}

pub fn dequantize(value: i32, scale: u32) -> f32 {
    (value as f64 / scale as f64) as f32
}

/// Convert a float heightfield buffer to fixed point.
pub fn to_fixed(values: &[f32], scale: u32) -> Result<Vec<i32>, ErosionError> {
    values
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            quantize(value, scale).ok_or(ErosionError::InvalidHeight { index, value })
        })
        .collect()
}

pub fn from_fixed(values: &[i32], scale: u32) -> Vec<f32> {
    values.iter().map(|&q| dequantize(q, scale)).collect()
}

/// Unscale a read-back buffer into a square grid of side `size`.
pub fn unscale_grid(values: &[i32], scale: u32, size: usize) -> Result<Heightfield, ErosionError> {
    Heightfield::from_vec(size, from_fixed(values, scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_round_trip_within_half_step() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for &scale in &[1u32, 3, 1000, 65_536, 1_000_000] {
            let bound = 0.5 / scale as f32 + 1e-6;
            for _ in 0..2000 {
                let v: f32 = rng.gen_range(-4.0..4.0);
                let q = quantize(v, scale).unwrap();
                let back = dequantize(q, scale);
                assert!(
                    (back - v).abs() <= bound,
                    "scale {} value {} came back as {}",
                    scale, v, back
                );
            }
        }
    }

    #[test]
    fn test_rounds_half_away_from_zero() {
        assert_eq!(quantize(0.5, 1), Some(1));
        assert_eq!(quantize(-0.5, 1), Some(-1));
        assert_eq!(quantize(2.5, 1), Some(3));
        assert_eq!(quantize(0.25, 2), Some(1));
        assert_eq!(quantize(0.0004, 1000), Some(0));
    }

    #[test]
    fn test_rejects_non_finite_and_overflow() {
        assert_eq!(quantize(f32::NAN, 1000), None);
        assert_eq!(quantize(f32::INFINITY, 1000), None);
        assert_eq!(quantize(1.0e9, 1000), None);

        let err = to_fixed(&[0.0, f32::NAN], 10).unwrap_err();
        assert!(matches!(err, ErosionError::InvalidHeight { index: 1, .. }));
    }

    #[test]
    fn test_unscale_grid_shapes_rows() {
        let grid = unscale_grid(&[0, 500, 1000, 1500], 1000, 2).unwrap();
        assert_eq!(grid.to_rows(), vec![vec![0.0, 0.5], vec![1.0, 1.5]]);

        assert!(unscale_grid(&[0, 1, 2], 1000, 2).is_err());
    }
}
