//! Base terrain generation
//!
//! Fractal Perlin noise: `levels` octaves, each at twice the frequency of the
//! previous one with its amplitude multiplied by `exponent`. The result is
//! normalized to [0, 1].

use noise::{NoiseFn, Perlin, Seedable};

use crate::error::ErosionError;
use crate::heightfield::Heightfield;

/// Noise periods across the grid at the first octave
const BASE_FREQUENCY: f64 = 4.0;
const LACUNARITY: f64 = 2.0;

pub const DEFAULT_LEVELS: u32 = 5;
pub const DEFAULT_EXPONENT: f32 = 0.5;

fn fbm(noise: &Perlin, x: f64, y: f64, octaves: u32, persistence: f64) -> f64 {
    let mut total = 0.0;
    let mut amplitude = 1.0;
    let mut frequency = 1.0;
    let mut max_value = 0.0;

    for _ in 0..octaves {
        total += amplitude * noise.get([x * frequency, y * frequency]);
        max_value += amplitude;
        amplitude *= persistence;
        frequency *= LACUNARITY;
    }

    total / max_value
}

/// Generate a `size` x `size` terrain with heights in [0, 1].
pub fn generate_base_terrain(
    size: usize,
    levels: u32,
    exponent: f32,
    seed: u64,
) -> Result<Heightfield, ErosionError> {
    if size < 2 {
        return Err(ErosionError::InvalidParameter {
            name: "size",
            reason: "terrain needs at least 2 cells per side".into(),
        });
    }
    if levels == 0 {
        return Err(ErosionError::InvalidParameter {
            name: "levels",
            reason: "at least one octave is required".into(),
        });
    }
    if !(exponent > 0.0 && exponent <= 1.0) {
        return Err(ErosionError::InvalidParameter {
            name: "exponent",
            reason: "must be in (0, 1]".into(),
        });
    }

    let noise = Perlin::new(1).set_seed(seed as u32);
    let step = BASE_FREQUENCY / size as f64;

    let mut field = Heightfield::new(size);
    for z in 0..size {
        for x in 0..size {
            let h = fbm(&noise, x as f64 * step, z as f64 * step, levels, exponent as f64);
            field.set(x, z, h as f32);
        }
    }

    normalize(&mut field);
    Ok(field)
}

/// Stretch heights to [0, 1]. A constant field becomes all zero.
fn normalize(field: &mut Heightfield) {
    let Some((min_h, max_h)) = field.min_max() else {
        return;
    };
    let range = max_h - min_h;
    let size = field.size();
    for z in 0..size {
        for x in 0..size {
            let h = field.get(x, z);
            let t = if range > 0.0 { (h - min_h) / range } else { 0.0 };
            field.set(x, z, t.clamp(0.0, 1.0));
        }
    }
}
