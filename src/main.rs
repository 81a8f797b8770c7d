use std::error::Error;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use log::warn;

use droplet_erosion::erosion::params::{load_json, save_json, SUPPORTED_GRID_SIZES};
use droplet_erosion::erosion::{self, BackendKind, CycleObserver, ErosionPreset, SimulationParameters};
use droplet_erosion::export::{self, Normalization};
use droplet_erosion::terrain;
use droplet_erosion::Heightfield;

#[derive(Parser, Debug)]
#[command(name = "droplet_erosion")]
#[command(about = "Erode a heightfield with parallel water droplets")]
struct Args {
    /// Heightfield to erode (CSV); generates base terrain if not given
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Side length of generated terrain
    #[arg(short = 'n', long, default_value = "1024", value_parser = parse_grid_size)]
    size: u32,

    /// Noise octaves for generated terrain
    #[arg(long, default_value_t = terrain::DEFAULT_LEVELS)]
    levels: u32,

    /// Amplitude falloff per octave for generated terrain
    #[arg(long, default_value_t = terrain::DEFAULT_EXPONENT)]
    exponent: f32,

    /// Seed for generated terrain
    #[arg(long, default_value = "1")]
    terrain_seed: u64,

    /// Load simulation parameters from a JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Erosion preset (gentle, normal, aggressive)
    #[arg(short, long, default_value = "normal")]
    preset: ErosionPreset,

    /// Droplets per cycle
    #[arg(short, long)]
    droplets: Option<u32>,

    /// Number of cycles
    #[arg(long)]
    cycles: Option<u32>,

    /// Fixed-point scale applied to heights
    #[arg(long)]
    scale: Option<u32>,

    #[arg(long)]
    erosion_rate: Option<f32>,

    #[arg(long)]
    deposition_rate: Option<f32>,

    #[arg(long)]
    barrier_interval: Option<u32>,

    /// Snapshot every N cycles
    #[arg(long)]
    draw_interval: Option<u32>,

    /// Maximum steps per droplet
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Droplet seed (uses random seed if not specified)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Compute backend (auto, gpu, cpu)
    #[arg(short, long, default_value = "auto")]
    backend: BackendKind,

    /// Output CSV path
    #[arg(short, long, default_value = "eroded.csv")]
    output: PathBuf,

    /// Also write the result as a grayscale PNG
    #[arg(long)]
    png: Option<PathBuf>,

    /// Write a PNG frame for every snapshot into this directory
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Stretch PNG output to the grid's min/max instead of clamping to [0, 1]
    #[arg(long)]
    normalize: bool,

    /// Save the effective parameters as JSON
    #[arg(long)]
    save_config: Option<PathBuf>,
}

impl Args {
    fn normalization(&self) -> Normalization {
        if self.normalize {
            Normalization::MinMax
        } else {
            Normalization::Clamp
        }
    }
}

fn parse_grid_size(s: &str) -> Result<u32, String> {
    let size: u32 = s.parse().map_err(|_| format!("`{}` is not a number", s))?;
    if SUPPORTED_GRID_SIZES.contains(&size) {
        Ok(size)
    } else {
        Err(format!("size must be one of {:?}", SUPPORTED_GRID_SIZES))
    }
}

/// Prints progress and writes snapshot frames.
struct Progress {
    snapshot_dir: Option<PathBuf>,
    normalization: Normalization,
    started: Instant,
    report_every: u32,
}

impl CycleObserver for Progress {
    fn wants_snapshots(&self) -> bool {
        self.snapshot_dir.is_some()
    }

    fn on_snapshot(&mut self, cycle: u32, heights: &Heightfield) {
        let Some(dir) = &self.snapshot_dir else {
            return;
        };
        let path = dir.join(format!("cycle_{:05}.png", cycle));
        if let Err(e) = export::save_png(heights, &path, self.normalization) {
            warn!("Failed to write snapshot {}: {}", path.display(), e);
        }
    }

    fn on_cycle_complete(&mut self, cycle: u32, total_cycles: u32) -> ControlFlow<()> {
        let done = cycle + 1;
        if done % self.report_every == 0 || done == total_cycles {
            println!(
                "  cycle {}/{} ({:.1?} elapsed)",
                done,
                total_cycles,
                self.started.elapsed()
            );
        }
        ControlFlow::Continue(())
    }
}

fn build_params(args: &Args, grid_dim: u32) -> Result<SimulationParameters, Box<dyn Error>> {
    let mut params = match &args.config {
        Some(path) => load_json(path)?,
        None => SimulationParameters::from_preset(args.preset, grid_dim),
    };
    params.grid_dim = grid_dim;

    if let Some(v) = args.droplets { params.droplets_per_cycle = v; }
    if let Some(v) = args.cycles { params.cycles = v; }
    if let Some(v) = args.scale { params.scale = v; }
    if let Some(v) = args.erosion_rate { params.erosion_rate = v; }
    if let Some(v) = args.deposition_rate { params.deposition_rate = v; }
    if let Some(v) = args.barrier_interval { params.barrier_interval = v; }
    if let Some(v) = args.draw_interval { params.draw_interval = v; }
    if let Some(v) = args.max_iterations { params.max_iterations_per_droplet = v; }

    params.validate()?;
    Ok(params)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let input = match &args.input {
        Some(path) => {
            println!("Loading heightfield from {}", path.display());
            let grid = export::load_csv(path)?;
            if !SUPPORTED_GRID_SIZES.contains(&(grid.size() as u32)) {
                return Err(format!(
                    "input is {}x{}; size must be one of {:?}",
                    grid.size(),
                    grid.size(),
                    SUPPORTED_GRID_SIZES
                )
                .into());
            }
            grid
        }
        None => {
            println!(
                "Generating {}x{} base terrain ({} levels, exponent {}, seed {})",
                args.size, args.size, args.levels, args.exponent, args.terrain_seed
            );
            terrain::generate_base_terrain(args.size as usize, args.levels, args.exponent, args.terrain_seed)?
        }
    };

    let params = build_params(&args, input.size() as u32)?;
    if let Some(path) = &args.save_config {
        save_json(&params, path)?;
        println!("Saved parameters to {}", path.display());
    }
    if let Some(dir) = &args.snapshot_dir {
        std::fs::create_dir_all(dir)?;
    }

    let seed = args.seed.unwrap_or_else(|| rand::random());
    println!("Eroding with seed: {}", seed);
    println!(
        "Grid: {}x{}, droplets per cycle: {}, cycles: {}",
        params.grid_dim, params.grid_dim, params.droplets_per_cycle, params.cycles
    );

    let mut progress = Progress {
        snapshot_dir: args.snapshot_dir.clone(),
        normalization: args.normalization(),
        started: Instant::now(),
        report_every: params.draw_interval,
    };
    let cycles = params.cycles;
    let output = erosion::erode(&input, params, args.backend, Some(seed), &mut progress)?;

    let elapsed = progress.started.elapsed();
    let (min_h, max_h) = output.heightfield.min_max().unwrap_or((0.0, 0.0));
    println!("Completed {} of {} cycles in {:.2?}", output.cycles_completed, cycles, elapsed);
    println!("Height range: {:.4} to {:.4}", min_h, max_h);
    println!(
        "Droplets: {}, snapshots: {}",
        output.stats.droplets_simulated, output.stats.snapshot_readbacks
    );

    export::save_csv(&output.heightfield, &args.output)?;
    println!("Wrote {}", args.output.display());
    if let Some(path) = &args.png {
        export::save_png(&output.heightfield, path, args.normalization())?;
        println!("Wrote {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_normalization_flag() {
        let args = Args::try_parse_from(["droplet_erosion"]).unwrap();
        assert_eq!(args.normalization(), Normalization::Clamp);

        let args = Args::try_parse_from(["droplet_erosion", "--normalize", "--png", "out.png"]).unwrap();
        assert_eq!(args.normalization(), Normalization::MinMax);
    }

    #[test]
    fn test_size_must_be_supported() {
        assert!(Args::try_parse_from(["droplet_erosion", "-n", "512"]).is_ok());
        assert!(Args::try_parse_from(["droplet_erosion", "-n", "500"]).is_err());
    }
}
