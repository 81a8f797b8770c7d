//! Profiling tool: times terrain generation and each erosion backend

use std::time::{Duration, Instant};

use droplet_erosion::erosion::{
    create_backend, BackendKind, RandomSeeds, Simulation, SimulationParameters,
};
use droplet_erosion::{terrain, Heightfield};

fn profile_backend(kind: BackendKind, input: &Heightfield, params: &SimulationParameters, seed: u64) -> Option<Duration> {
    let backend = match create_backend(kind) {
        Ok(backend) => backend,
        Err(e) => {
            println!("{} backend unavailable: {}", kind, e);
            return None;
        }
    };
    let name = backend.name().to_string();

    let start = Instant::now();
    let mut sim = match Simulation::new(backend, RandomSeeds::from_seed(seed), params.clone(), input) {
        Ok(sim) => sim,
        Err(e) => {
            println!("{} setup failed: {}", name, e);
            return None;
        }
    };
    let setup_time = start.elapsed();

    let start = Instant::now();
    let output = match sim.run(&mut ()) {
        Ok(output) => output,
        Err(e) => {
            println!("{} run failed: {}", name, e);
            return None;
        }
    };
    let run_time = start.elapsed();

    let per_cycle = run_time / params.cycles.max(1);
    println!("{} backend:", name);
    println!("  Setup (quantize + allocate): {:?}", setup_time);
    println!("  {} cycles: {:?} ({:?} per cycle)", output.cycles_completed, run_time, per_cycle);
    if output.stats.eroded > 0 {
        let scale = params.scale as f64;
        println!("  Eroded: {:.3} units", output.stats.eroded as f64 / scale);
        println!("  Deposited: {:.3} units", output.stats.deposited as f64 / scale);
    }
    if let Some((min_h, max_h)) = output.heightfield.min_max() {
        println!("  Height range: {:.4} to {:.4}", min_h, max_h);
    }
    println!();

    Some(setup_time + run_time)
}

fn main() {
    env_logger::init();

    let size = 512;
    let seed = 1337u64;

    println!("=== Performance Profiling ===");
    println!("Map size: {}x{} ({} cells)", size, size, size * size);
    println!();

    let start = Instant::now();
    let input = match terrain::generate_base_terrain(size, terrain::DEFAULT_LEVELS, terrain::DEFAULT_EXPONENT, seed) {
        Ok(input) => input,
        Err(e) => {
            println!("Terrain generation failed: {}", e);
            return;
        }
    };
    let terrain_time = start.elapsed();
    println!("Terrain generation: {:?}", terrain_time);

    let params = SimulationParameters {
        cycles: 20,
        droplets_per_cycle: 65_536,
        ..SimulationParameters::for_grid(size as u32)
    };
    println!("\nErosion parameters:");
    println!("  Droplets per cycle: {}", params.droplets_per_cycle);
    println!("  Cycles: {}", params.cycles);
    println!("  Scale: {}", params.scale);
    println!();

    let cpu_time = profile_backend(BackendKind::Cpu, &input, &params, seed);
    let gpu_time = profile_backend(BackendKind::Gpu, &input, &params, seed);

    println!("=== Summary ===");
    println!("Terrain:     {:?}", terrain_time);
    if let Some(cpu) = cpu_time {
        println!("CPU erosion: {:?}", cpu);
    }
    if let Some(gpu) = gpu_time {
        println!("GPU erosion: {:?}", gpu);
    }
    if let (Some(cpu), Some(gpu)) = (cpu_time, gpu_time) {
        println!("─────────────────────────────────");
        println!("GPU speedup: {:>8.2}x", cpu.as_secs_f64() / gpu.as_secs_f64().max(1e-9));
    }
}
