//! Simulation parameters and configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErosionError;

/// Grid side lengths offered by the command-line tool.
pub const SUPPORTED_GRID_SIZES: [u32; 3] = [512, 1024, 2048];

/// Smallest grid the droplet kernel can walk (bilinear sampling needs a 2x2 interior).
pub const MIN_GRID_DIM: u32 = 3;

/// Erosion intensity preset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ErosionPreset {
    /// Few droplets, low erosion - softens the input
    Gentle,
    /// Balanced erosion
    #[default]
    Normal,
    /// Many droplets, strong erosion - deep channels
    Aggressive,
}

impl ErosionPreset {
    pub fn all() -> &'static [Self] {
        &[Self::Gentle, Self::Normal, Self::Aggressive]
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Gentle => "Subtle smoothing",
            Self::Normal => "Balanced erosion",
            Self::Aggressive => "Deep channels and ridges",
        }
    }
}

impl std::fmt::Display for ErosionPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gentle => write!(f, "gentle"),
            Self::Normal => write!(f, "normal"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl std::str::FromStr for ErosionPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|preset| preset.to_string() == s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown preset `{}` (expected gentle, normal or aggressive)", s))
    }
}

/// Parameters for one simulation run.
///
/// Everything except the cycle index is fixed for the whole run; the cycle
/// index lives in the parameter block and is updated between cycles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParameters {
    /// Side length N of the square grid
    pub grid_dim: u32,

    /// Droplets simulated in parallel per cycle
    pub droplets_per_cycle: u32,

    /// Number of (seed, erosion, smoothing) cycles. Zero returns the input.
    pub cycles: u32,

    /// Fixed-point multiplier S applied to heights
    pub scale: u32,

    /// Fraction of spare capacity picked up per step (0.0-1.0]
    pub erosion_rate: f32,

    /// Fraction of excess sediment dropped per step (0.0-1.0]
    pub deposition_rate: f32,

    /// Fraction of water lost per step
    pub evaporation_rate: f32,

    /// Initial droplet water volume, in height units (scaled by the block builder)
    pub start_volume: f32,

    /// Droplet dies below this volume, in height units
    pub min_volume: f32,

    /// Upper bound on droplet lifetime in steps
    pub max_iterations_per_droplet: u32,

    /// Forwarded verbatim to the erosion kernel
    pub barrier_interval: u32,

    /// Snapshot cadence in cycles (the last cycle always snapshots)
    pub draw_interval: u32,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            grid_dim: 1024,
            droplets_per_cycle: 65_536,
            cycles: 200,
            scale: 100_000,
            erosion_rate: 0.3,
            deposition_rate: 0.3,
            evaporation_rate: 0.001,
            start_volume: 1.0,
            min_volume: 0.001,
            max_iterations_per_droplet: 1000,
            barrier_interval: 5,
            draw_interval: 10,
        }
    }
}

impl SimulationParameters {
    /// Default parameters for a grid of side `grid_dim`.
    pub fn for_grid(grid_dim: u32) -> Self {
        Self {
            grid_dim,
            ..Default::default()
        }
    }

    /// Create parameters from a preset
    pub fn from_preset(preset: ErosionPreset, grid_dim: u32) -> Self {
        let base = Self::for_grid(grid_dim);
        match preset {
            ErosionPreset::Gentle => Self {
                droplets_per_cycle: 16_384,
                cycles: 100,
                erosion_rate: 0.1,
                deposition_rate: 0.5,
                ..base
            },
            ErosionPreset::Normal => base,
            ErosionPreset::Aggressive => Self {
                droplets_per_cycle: 262_144,
                cycles: 400,
                erosion_rate: 0.6,
                deposition_rate: 0.2,
                ..base
            },
        }
    }

    pub fn total_cells(&self) -> u32 {
        self.grid_dim * self.grid_dim
    }

    /// Start volume in fixed-point units.
    pub fn scaled_start_volume(&self) -> u32 {
        (self.start_volume as f64 * self.scale as f64).round() as u32
    }

    /// Minimum volume in fixed-point units.
    pub fn scaled_min_volume(&self) -> u32 {
        (self.min_volume as f64 * self.scale as f64).round() as u32
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), ErosionError> {
        fn invalid(name: &'static str, reason: impl Into<String>) -> ErosionError {
            ErosionError::InvalidParameter { name, reason: reason.into() }
        }

        if self.grid_dim < MIN_GRID_DIM {
            return Err(invalid("grid_dim", format!("must be at least {}", MIN_GRID_DIM)));
        }
        if (self.grid_dim as u64).pow(2) > u32::MAX as u64 {
            return Err(invalid("grid_dim", "cell count does not fit in u32"));
        }
        if self.droplets_per_cycle == 0 {
            return Err(invalid("droplets_per_cycle", "must be positive"));
        }
        if self.scale == 0 {
            return Err(invalid("scale", "must be positive"));
        }
        if !(self.erosion_rate > 0.0 && self.erosion_rate <= 1.0) {
            return Err(invalid("erosion_rate", "must be in (0, 1]"));
        }
        if !(self.deposition_rate > 0.0 && self.deposition_rate <= 1.0) {
            return Err(invalid("deposition_rate", "must be in (0, 1]"));
        }
        if !(self.evaporation_rate >= 0.0 && self.evaporation_rate < 1.0) {
            return Err(invalid("evaporation_rate", "must be in [0, 1)"));
        }
        if !(self.start_volume.is_finite() && self.start_volume >= 0.0) {
            return Err(invalid("start_volume", "must be finite and non-negative"));
        }
        if !(self.min_volume.is_finite() && self.min_volume >= 0.0) {
            return Err(invalid("min_volume", "must be finite and non-negative"));
        }
        let max_volume = u32::MAX as f64 / self.scale as f64;
        if self.start_volume as f64 > max_volume || self.min_volume as f64 > max_volume {
            return Err(invalid("start_volume", "scaled volume does not fit in u32"));
        }
        if self.max_iterations_per_droplet == 0 {
            return Err(invalid("max_iterations_per_droplet", "must be positive"));
        }
        if self.draw_interval == 0 {
            return Err(invalid("draw_interval", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ParamsFileError {
    #[error("failed to access parameter file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed parameter file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Load parameters from a JSON file. Missing fields take their defaults.
pub fn load_json(path: impl AsRef<Path>) -> Result<SimulationParameters, ParamsFileError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

pub fn save_json(params: &SimulationParameters, path: impl AsRef<Path>) -> Result<(), ParamsFileError> {
    let text = serde_json::to_string_pretty(params)?;
    fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        SimulationParameters::default().validate().unwrap();
        for &preset in ErosionPreset::all() {
            SimulationParameters::from_preset(preset, 512).validate().unwrap();
        }
    }

    #[test]
    fn test_scaled_volumes() {
        let params = SimulationParameters {
            scale: 1000,
            ..Default::default()
        };
        assert_eq!(params.scaled_start_volume(), 1000);
        assert_eq!(params.scaled_min_volume(), 1);
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let cases = [
            SimulationParameters { droplets_per_cycle: 0, ..Default::default() },
            SimulationParameters { scale: 0, ..Default::default() },
            SimulationParameters { erosion_rate: 0.0, ..Default::default() },
            SimulationParameters { deposition_rate: 1.5, ..Default::default() },
            SimulationParameters { evaporation_rate: 1.0, ..Default::default() },
            SimulationParameters { grid_dim: 2, ..Default::default() },
            SimulationParameters { draw_interval: 0, ..Default::default() },
            SimulationParameters { max_iterations_per_droplet: 0, ..Default::default() },
            SimulationParameters { start_volume: f32::NAN, ..Default::default() },
        ];
        for params in cases {
            assert!(
                matches!(params.validate(), Err(ErosionError::InvalidParameter { .. })),
                "accepted {:?}",
                params
            );
        }
    }

    #[test]
    fn test_zero_cycles_is_valid() {
        let params = SimulationParameters { cycles: 0, ..Default::default() };
        params.validate().unwrap();
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!("Aggressive".parse::<ErosionPreset>(), Ok(ErosionPreset::Aggressive));
        assert!("extreme".parse::<ErosionPreset>().is_err());
    }

    #[test]
    fn test_json_round_trip_with_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.json");

        let params = SimulationParameters {
            droplets_per_cycle: 42,
            barrier_interval: 9,
            ..SimulationParameters::for_grid(512)
        };
        save_json(&params, &path).unwrap();
        assert_eq!(load_json(&path).unwrap(), params);

        std::fs::write(&path, r#"{ "cycles": 3 }"#).unwrap();
        let loaded = load_json(&path).unwrap();
        assert_eq!(loaded.cycles, 3);
        assert_eq!(loaded.grid_dim, SimulationParameters::default().grid_dim);
    }
}
