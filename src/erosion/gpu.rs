//! GPU erosion backend using wgpu compute shaders
//!
//! Both height buffers, the two uniform groups and the seed buffer live on
//! the device for the whole run. A cycle records the pass-start copy, the
//! erosion pass and the smoothing pass into one command encoder, which
//! `finish_cycle` submits and waits on.

use std::borrow::Cow;
use std::sync::mpsc;

use log::{debug, info};
use wgpu::util::DeviceExt;

use super::backend::{BufferId, ComputeBackend};
use super::block::ParamBlock;
use super::droplet::{CAPACITY_FACTOR, FLAT_EPSILON, GRAVITY, MIN_SLOPE, MIN_SPEED_SQ};
use crate::error::ErosionError;

/// Threads per workgroup for both kernels
pub const WORKGROUP_SIZE: u32 = 256;

/// Per-dimension workgroup limit guaranteed by `wgpu::Limits::default()`
const MAX_GROUPS_PER_DIMENSION: u32 = 65_535;

/// Workgroup grid covering `invocations` threads.
///
/// Wide dispatches fold into a second dimension; the kernels recover the
/// linear index from `num_workgroups` and discard the overhang.
pub fn dispatch_size(invocations: u32) -> (u32, u32) {
    let groups = invocations.div_ceil(WORKGROUP_SIZE).max(1);
    let x = groups.min(MAX_GROUPS_PER_DIMENSION);
    (x, groups.div_ceil(x))
}

/// Full WGSL source with the kernel constants prepended.
fn shader_source() -> String {
    let prelude = format!(
        "const WORKGROUP_SIZE: u32 = {}u;\n\
         const CAPACITY_FACTOR: f32 = {:?};\n\
         const MIN_SLOPE: f32 = {:?};\n\
         const GRAVITY: f32 = {:?};\n\
         const FLAT_EPSILON: f32 = {:?};\n\
         const MIN_SPEED_SQ: f32 = {:?};\n\n",
        WORKGROUP_SIZE, CAPACITY_FACTOR, MIN_SLOPE, GRAVITY, FLAT_EPSILON, MIN_SPEED_SQ
    );
    prelude + include_str!("shaders/erosion.wgsl")
}

struct GpuResources {
    heights: [wgpu::Buffer; 2],
    int_uniform: wgpu::Buffer,
    seeds: wgpu::Buffer,
    staging: wgpu::Buffer,
    /// Indexed by the current buffer
    bind_groups: [wgpu::BindGroup; 2],
    droplets: u32,
    cells: u32,
    height_bytes: u64,
    // Bound through the bind groups; kept alive here
    _float_uniform: wgpu::Buffer,
}

pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    bind_group_layout: wgpu::BindGroupLayout,
    erode_pipeline: wgpu::ComputePipeline,
    smooth_pipeline: wgpu::ComputePipeline,
    resources: Option<GpuResources>,
    /// Encoder of the cycle being recorded, with its error scopes open
    pending: Option<wgpu::CommandEncoder>,
}

impl GpuBackend {
    /// Acquire an adapter and device and compile both kernels.
    pub fn new() -> Result<Self, ErosionError> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self, ErosionError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| ErosionError::Initialization("no compatible GPU adapter".into()))?;

        let adapter_info = adapter.get_info();
        info!("GPU adapter: {} ({:?})", adapter_info.name, adapter_info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Erosion GPU"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| ErosionError::Initialization(e.to_string()))?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Erosion Compute Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(shader_source())),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let uniform = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Erosion Bind Group Layout"),
            entries: &[
                // Integer constants
                uniform(0),
                // Float constants
                uniform(1),
                // Authoritative heights (atomic)
                storage(2, false),
                // Droplet start cells
                storage(3, true),
                // Alternate heights: pass-start copy, then smoothing output
                storage(4, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Erosion Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |label: &str, entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let erode_pipeline = pipeline("Erosion Pipeline", "erode_droplets");
        let smooth_pipeline = pipeline("Smoothing Pipeline", "smooth_heights");

        if let Some(err) = device.pop_error_scope().await {
            return Err(ErosionError::ResourceCreation {
                resource: "compute pipelines",
                reason: err.to_string(),
            });
        }

        Ok(Self {
            device,
            queue,
            adapter_name: adapter_info.name,
            bind_group_layout,
            erode_pipeline,
            smooth_pipeline,
            resources: None,
            pending: None,
        })
    }

    fn resources(&self) -> Result<&GpuResources, ErosionError> {
        self.resources.as_ref().ok_or_else(not_allocated)
    }

    fn record_pass(&mut self, pipeline: Pipeline, current: BufferId) -> Result<(), ErosionError> {
        let resources = self.resources.as_ref().ok_or_else(not_allocated)?;
        let device = &self.device;
        let encoder = self.pending.get_or_insert_with(|| open_cycle(device));

        let (label, compute, invocations) = match pipeline {
            Pipeline::Erode => {
                // Pass-start copy into the alternate buffer
                encoder.copy_buffer_to_buffer(
                    &resources.heights[current.index()],
                    0,
                    &resources.heights[current.other().index()],
                    0,
                    resources.height_bytes,
                );
                ("Erosion Pass", &self.erode_pipeline, resources.droplets)
            }
            Pipeline::Smooth => ("Smoothing Pass", &self.smooth_pipeline, resources.cells),
        };
        let (groups_x, groups_y) = dispatch_size(invocations);

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(compute);
        pass.set_bind_group(0, &resources.bind_groups[current.index()], &[]);
        pass.dispatch_workgroups(groups_x, groups_y, 1);
        Ok(())
    }
}

fn not_allocated() -> ErosionError {
    ErosionError::RuntimeCompute("gpu backend used before allocate".into())
}

/// Start recording a cycle. The two scopes are popped in `finish_cycle`.
fn open_cycle(device: &wgpu::Device) -> wgpu::CommandEncoder {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Erosion Cycle Encoder"),
    })
}

#[derive(Clone, Copy)]
enum Pipeline {
    Erode,
    Smooth,
}

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &str {
        "gpu"
    }

    fn allocate(&mut self, heights: &[i32], block: &ParamBlock) -> Result<(), ErosionError> {
        let ints = block.ints();
        let expected = ints.total_cells as usize;
        if heights.len() != expected {
            return Err(ErosionError::DimensionMismatch { expected, actual: heights.len() });
        }

        let height_bytes = std::mem::size_of_val(heights) as u64;
        let seed_bytes = ints.droplets_per_cycle as u64 * std::mem::size_of::<u32>() as u64;
        let limit = self.device.limits().max_storage_buffer_binding_size as u64;
        if height_bytes.max(seed_bytes) > limit {
            return Err(ErosionError::ResourceCreation {
                resource: "storage buffers",
                reason: format!(
                    "{} bytes exceeds the device binding limit of {} bytes",
                    height_bytes.max(seed_bytes),
                    limit
                ),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let height_buffer = |label: &str| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(heights),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            })
        };
        let heights_buffers = [height_buffer("Height Buffer 0"), height_buffer("Height Buffer 1")];

        let int_uniform = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Integer Constants"),
            contents: block.int_bytes(),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let float_uniform = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Float Constants"),
            contents: block.float_bytes(),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let seeds = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Droplet Seeds"),
            size: seed_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: height_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = |current: BufferId| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Erosion Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: int_uniform.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: float_uniform.as_entire_binding() },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: heights_buffers[current.index()].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry { binding: 3, resource: seeds.as_entire_binding() },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: heights_buffers[current.other().index()].as_entire_binding(),
                    },
                ],
            })
        };
        let bind_groups = [bind_group(BufferId::Zero), bind_group(BufferId::One)];

        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            return Err(ErosionError::ResourceCreation {
                resource: "simulation buffers",
                reason: err.to_string(),
            });
        }

        debug!(
            "Allocated {} cells ({} bytes per buffer) and {} seeds on {}",
            ints.total_cells, height_bytes, ints.droplets_per_cycle, self.adapter_name
        );
        self.resources = Some(GpuResources {
            heights: heights_buffers,
            int_uniform,
            seeds,
            staging,
            bind_groups,
            droplets: ints.droplets_per_cycle,
            cells: ints.total_cells,
            height_bytes,
            _float_uniform: float_uniform,
        });
        Ok(())
    }

    fn write_seeds(&mut self, seeds: &[u32]) -> Result<(), ErosionError> {
        let resources = self.resources()?;
        if seeds.len() != resources.droplets as usize {
            return Err(ErosionError::RuntimeCompute(format!(
                "seed buffer holds {} droplets, got {}",
                resources.droplets,
                seeds.len()
            )));
        }
        self.queue.write_buffer(&resources.seeds, 0, bytemuck::cast_slice(seeds));
        Ok(())
    }

    fn write_cycle_index(&mut self, block: &ParamBlock) -> Result<(), ErosionError> {
        let resources = self.resources()?;
        self.queue.write_buffer(
            &resources.int_uniform,
            ParamBlock::CYCLE_INDEX_OFFSET,
            block.cycle_index_bytes(),
        );
        Ok(())
    }

    fn dispatch_erosion(&mut self, current: BufferId) -> Result<(), ErosionError> {
        self.record_pass(Pipeline::Erode, current)
    }

    fn dispatch_smoothing(&mut self, current: BufferId) -> Result<(), ErosionError> {
        self.record_pass(Pipeline::Smooth, current)
    }

    fn finish_cycle(&mut self) -> Result<(), ErosionError> {
        let Some(encoder) = self.pending.take() else {
            return Ok(());
        };
        self.queue.submit(std::iter::once(encoder.finish()));
        self.device.poll(wgpu::Maintain::Wait);

        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        match validation.or(out_of_memory) {
            Some(err) => Err(ErosionError::RuntimeCompute(err.to_string())),
            None => Ok(()),
        }
    }

    fn read_back(&mut self, buffer: BufferId) -> Result<Vec<i32>, ErosionError> {
        if self.pending.is_some() {
            return Err(ErosionError::RuntimeCompute(
                "readback requested while a cycle is still being recorded".into(),
            ));
        }
        let resources = self.resources()?;

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(
            &resources.heights[buffer.index()],
            0,
            &resources.staging,
            0,
            resources.height_bytes,
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = resources.staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|_| ErosionError::RuntimeCompute("readback callback dropped".into()))?
            .map_err(|e| ErosionError::RuntimeCompute(format!("failed to map staging buffer: {}", e)))?;

        let data = buffer_slice.get_mapped_range();
        let result: Vec<i32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        resources.staging.unmap();
        Ok(result)
    }
}
