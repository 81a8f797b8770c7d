//! 3x3 box smoothing (CPU)
//!
//! Same arithmetic as `smooth_heights` in the shader: integer mean of the
//! in-bounds neighbourhood, rounded half away from zero like `quantize`.

use std::sync::atomic::{AtomicI32, Ordering};

/// Smoothed value for cell `idx` of a `dim` x `dim` grid.
pub fn smoothed_cell(src: &[AtomicI32], dim: usize, idx: usize) -> i32 {
    let x = idx % dim;
    let z = idx / dim;

    let mut sum: i64 = 0;
    let mut count: i64 = 0;
    for nz in z.saturating_sub(1)..=(z + 1).min(dim - 1) {
        for nx in x.saturating_sub(1)..=(x + 1).min(dim - 1) {
            sum += src[nz * dim + nx].load(Ordering::Relaxed) as i64;
            count += 1;
        }
    }
    rounded_mean(sum, count) as i32
}

/// `sum / count` rounded to nearest, ties away from zero.
fn rounded_mean(sum: i64, count: i64) -> i64 {
    let half = count / 2;
    if sum >= 0 {
        (sum + half) / count
    } else {
        (sum - half) / count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atomics(values: &[i32]) -> Vec<AtomicI32> {
        values.iter().map(|&v| AtomicI32::new(v)).collect()
    }

    fn smooth_all(values: &[i32], dim: usize) -> Vec<i32> {
        let src = atomics(values);
        (0..values.len()).map(|i| smoothed_cell(&src, dim, i)).collect()
    }

    #[test]
    fn test_flat_field_is_fixed_point() {
        let values = vec![1234; 5 * 5];
        assert_eq!(smooth_all(&values, 5), values);
    }

    #[test]
    fn test_spike_spreads_over_neighbourhood() {
        let mut values = vec![0; 5 * 5];
        values[2 * 5 + 2] = 900;
        let out = smooth_all(&values, 5);

        assert_eq!(out[2 * 5 + 2], 100);
        assert_eq!(out[5 + 1], 100);
        assert_eq!(out[3 * 5 + 3], 100);
        assert_eq!(out[0], 0);
    }

    #[test]
    fn test_edges_average_in_bounds_cells_only() {
        // Corner sees 4 cells, edge sees 6
        let mut values = vec![0; 3 * 3];
        values[0] = 400;
        let out = smooth_all(&values, 3);
        assert_eq!(out[0], 100);
        assert_eq!(out[1], 67);
        assert_eq!(out[4], 44);
    }

    #[test]
    fn test_negative_means_round_away_from_zero() {
        let mut values = vec![0; 3 * 3];
        values[4] = -10;
        let out = smooth_all(&values, 3);
        // -10 / 4 and -10 / 9
        assert_eq!(out[0], -3);
        assert_eq!(out[4], -1);
    }

    #[test]
    fn test_rounded_mean_ties() {
        assert_eq!(rounded_mean(10, 4), 3);
        assert_eq!(rounded_mean(9, 6), 2);
        assert_eq!(rounded_mean(8, 6), 1);
        assert_eq!(rounded_mean(-9, 6), -2);
        assert_eq!(rounded_mean(4, 9), 0);
        assert_eq!(rounded_mean(5, 9), 1);
    }

    #[test]
    fn test_repeated_smoothing_keeps_mean_height() {
        // Irregular bump on a level plateau; 30 passes never reach the border
        // rings, so any drift in the mean comes from rounding alone
        let dim = 96;
        let mut values: Vec<i32> = (0..dim * dim)
            .map(|i| {
                let (x, z) = ((i % dim) as f64, (i / dim) as f64);
                let r = ((x - 48.0).powi(2) + (z - 48.0).powi(2)).sqrt();
                if r < 8.0 {
                    10_000 + ((8.0 - r) * 3_000.0) as i32 + (i * 7919 % 97) as i32
                } else {
                    10_000
                }
            })
            .collect();
        let mean = |values: &[i32]| values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64;
        let before = mean(&values);

        for _ in 0..30 {
            values = smooth_all(&values, dim);
        }

        let after = mean(&values);
        assert!((after - before).abs() < 1.0, "mean {} -> {}", before, after);
        assert!(values[48 * dim + 48] < 34_000);
    }
}
