use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use cgmath::{Matrix4, Vector3};
use wgpu::util::DeviceExt;

use crate::grid::PlenoxelGrid;
use crate::integrator::FogConfig;
use crate::renderer::{elapsed_ms, ExecutionTimes, Renderer};
use crate::scene::SceneState;

const COLOR_BUFFER_GROUP_ID: u32 = 0;
const COLOR_BUFFER_IDX: u32 = 0;

const GRID_BUFFER_GROUP_ID: u32 = 1;
const GRID_BUFFER_IDX: u32 = 0;

const FRAME_BUFFER_GROUP_ID: u32 = 2;
const FRAME_BUFFER_IDX: u32 = 0;

const WORKGROUP_DIM: u32 = 16;

/// Per-dispatch uniform block. Field order and the trailing pad match the
/// std140-style layout of `FrameUniforms` in plenoxels.wgsl.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct FrameUniformBufferInput {
    world_view_inv: [[f32; 4]; 4],
    world_view_proj_inv: [[f32; 4]; 4],
    box_min: [f32; 3],
    grid_size: u32,
    box_max: [f32; 3],
    width: u32,
    height: u32,
    fog_step_size: f32,
    fog_opacity: f32,
    _padding: u32,
}

impl FrameUniformBufferInput {
    fn new(scene: &SceneState, width: u32, height: u32) -> Self {
        FrameUniformBufferInput {
            world_view_inv: scene.world_view_inv.into(),
            world_view_proj_inv: scene.world_view_proj_inv.into(),
            box_min: scene.bounding_box.min.into(),
            grid_size: scene.grid.size() as u32,
            box_max: scene.bounding_box.max.into(),
            width,
            height,
            fog_step_size: scene.fog.step_size,
            fog_opacity: scene.fog.opacity,
            _padding: 0,
        }
    }
}

struct MarchPipelines {
    forward_pipeline: wgpu::ComputePipeline,
    ray_march_pipeline: wgpu::ComputePipeline,
}

impl MarchPipelines {
    fn new(device: &wgpu::Device) -> Self {
        let color_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("March: Color Buffer Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: COLOR_BUFFER_IDX,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });
        let grid_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("March: Grid Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: GRID_BUFFER_IDX,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });
        let frame_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("March: Frame Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: FRAME_BUFFER_IDX,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("March Pipeline Layout"),
            bind_group_layouts: &[
                &color_bind_group_layout,
                &grid_bind_group_layout,
                &frame_bind_group_layout,
            ],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::include_wgsl!("plenoxels.wgsl"));
        let forward_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Forward Pipeline"),
            layout: Some(&layout),
            module: &shader,
            entry_point: Some("forward"),
            compilation_options: Default::default(),
            cache: None,
        });
        let ray_march_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Ray March Pipeline"),
            layout: Some(&layout),
            module: &shader,
            entry_point: Some("ray_march"),
            compilation_options: Default::default(),
            cache: None,
        });
        Self {
            forward_pipeline,
            ray_march_pipeline,
        }
    }

    fn record<'pass>(
        &'pass self,
        cpass: &mut wgpu::ComputePass<'pass>,
        bindings: &'pass MarchBindings,
        entry: MarchEntry,
        width: u32,
        height: u32,
    ) {
        let pipeline = match entry {
            MarchEntry::Forward => &self.forward_pipeline,
            MarchEntry::RayMarch => &self.ray_march_pipeline,
        };
        cpass.set_pipeline(pipeline);
        cpass.set_bind_group(COLOR_BUFFER_GROUP_ID, &bindings.color_bind_group, &[]);
        cpass.set_bind_group(GRID_BUFFER_GROUP_ID, &bindings.grid_bind_group, &[]);
        cpass.set_bind_group(FRAME_BUFFER_GROUP_ID, &bindings.frame_bind_group, &[]);
        cpass.dispatch_workgroups(
            width.div_ceil(WORKGROUP_DIM),
            height.div_ceil(WORKGROUP_DIM),
            1,
        );
    }
}

#[derive(Copy, Clone)]
enum MarchEntry {
    Forward,
    RayMarch,
}

impl MarchEntry {
    fn name(self) -> &'static str {
        match self {
            MarchEntry::Forward => "Forward",
            MarchEntry::RayMarch => "RayMarch",
        }
    }
}

struct MarchBindings {
    color_bind_group: wgpu::BindGroup,
    grid_bind_group: wgpu::BindGroup,
    frame_bind_group: wgpu::BindGroup,
}

impl MarchBindings {
    fn new(
        device: &wgpu::Device,
        pipelines: &MarchPipelines,
        color_buffer: &wgpu::Buffer,
        grid_buffer: &wgpu::Buffer,
        frame_uniform: &wgpu::Buffer,
    ) -> Self {
        let color_bind_group = Self::color_bind_group(device, pipelines, color_buffer);
        let grid_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("March: Grid Bind Group"),
            layout: &pipelines
                .forward_pipeline
                .get_bind_group_layout(GRID_BUFFER_GROUP_ID),
            entries: &[wgpu::BindGroupEntry {
                binding: GRID_BUFFER_IDX,
                resource: grid_buffer.as_entire_binding(),
            }],
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("March: Frame Bind Group"),
            layout: &pipelines
                .forward_pipeline
                .get_bind_group_layout(FRAME_BUFFER_GROUP_ID),
            entries: &[wgpu::BindGroupEntry {
                binding: FRAME_BUFFER_IDX,
                resource: frame_uniform.as_entire_binding(),
            }],
        });

        Self {
            color_bind_group,
            grid_bind_group,
            frame_bind_group,
        }
    }

    fn color_bind_group(
        device: &wgpu::Device,
        pipelines: &MarchPipelines,
        color_buffer: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("March: Color Buffer Bind Group"),
            layout: &pipelines
                .forward_pipeline
                .get_bind_group_layout(COLOR_BUFFER_GROUP_ID),
            entries: &[wgpu::BindGroupEntry {
                binding: COLOR_BUFFER_IDX,
                resource: color_buffer.as_entire_binding(),
            }],
        })
    }

    fn update_color_buffer(
        &mut self,
        device: &wgpu::Device,
        pipelines: &MarchPipelines,
        color_buffer: &wgpu::Buffer,
    ) {
        self.color_bind_group = Self::color_bind_group(device, pipelines, color_buffer);
    }
}

/// Compute-shader renderer. Holds the grid in a read-only storage buffer
/// uploaded once at construction; the color and staging buffers are
/// reallocated when the requested image size changes.
pub struct GpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: MarchPipelines,
    bindings: MarchBindings,
    frame_uniform: wgpu::Buffer,
    color_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
    color_pixels: u32,
    scene: SceneState,
    times: ExecutionTimes,
}

impl GpuRenderer {
    pub fn new(grid: Arc<PlenoxelGrid>) -> Result<Self> {
        pollster::block_on(Self::new_async(grid))
    }

    async fn new_async(grid: Arc<PlenoxelGrid>) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .context("no suitable GPU adapter found")?;
        log::info!("rendering on {}", adapter.get_info().name);

        // A 128^3 grid is ~235 MB of voxel data, past the default storage
        // binding limit.
        let mut required_limits = wgpu::Limits::default();
        required_limits.max_buffer_size = 2147483647;
        required_limits.max_storage_buffer_binding_size = 2147483647;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: None,
                    required_features: wgpu::Features::empty(),
                    required_limits,
                    memory_hints: wgpu::MemoryHints::MemoryUsage,
                },
                None,
            )
            .await
            .context("failed to create GPU device")?;

        let grid_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Plenoxel Grid Buffer"),
            contents: bytemuck::cast_slice(grid.voxels()),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let scene = SceneState::new(grid);
        let frame_uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frame Uniform Buffer"),
            contents: bytemuck::cast_slice(&[FrameUniformBufferInput::new(&scene, 1, 1)]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let color_pixels = 1;
        let (color_buffer, staging_buffer) = Self::create_color_buffers(&device, color_pixels);

        let pipelines = MarchPipelines::new(&device);
        let bindings = MarchBindings::new(
            &device,
            &pipelines,
            &color_buffer,
            &grid_buffer,
            &frame_uniform,
        );

        Ok(GpuRenderer {
            device,
            queue,
            pipelines,
            bindings,
            frame_uniform,
            color_buffer,
            staging_buffer,
            color_pixels,
            scene,
            times: ExecutionTimes::new(),
        })
    }

    fn create_color_buffers(device: &wgpu::Device, pixels: u32) -> (wgpu::Buffer, wgpu::Buffer) {
        let size = pixels as u64 * std::mem::size_of::<u32>() as u64;
        let color_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Color Buffer"),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Color Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        (color_buffer, staging_buffer)
    }

    fn ensure_color_buffers(&mut self, pixels: u32) {
        if self.color_pixels == pixels {
            return;
        }
        let (color_buffer, staging_buffer) = Self::create_color_buffers(&self.device, pixels);
        self.color_buffer = color_buffer;
        self.staging_buffer = staging_buffer;
        self.color_pixels = pixels;
        self.bindings
            .update_color_buffer(&self.device, &self.pipelines, &self.color_buffer);
    }

    fn render(&mut self, entry: MarchEntry, width: u32, height: u32) -> Result<Vec<u32>> {
        let pixels = width * height;
        self.ensure_color_buffers(pixels);

        let upload_start = Instant::now();
        self.queue.write_buffer(
            &self.frame_uniform,
            0,
            bytemuck::cast_slice(&[FrameUniformBufferInput::new(&self.scene, width, height)]),
        );
        let upload_ms = elapsed_ms(upload_start);

        let render_start = Instant::now();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("March Pass"),
                timestamp_writes: None,
            });
            self.pipelines
                .record(&mut cpass, &self.bindings, entry, width, height);
        }
        let copy_size = pixels as u64 * std::mem::size_of::<u32>() as u64;
        encoder.copy_buffer_to_buffer(&self.color_buffer, 0, &self.staging_buffer, 0, copy_size);
        self.queue.submit(Some(encoder.finish()));
        self.device.poll(wgpu::Maintain::Wait);
        let render_ms = elapsed_ms(render_start);

        let readback_start = Instant::now();
        let slice = self.staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .context("color readback channel closed")?
            .context("failed to map color staging buffer")?;

        let out_color = bytemuck::cast_slice::<u8, u32>(&slice.get_mapped_range()).to_vec();
        self.staging_buffer.unmap();
        let readback_ms = elapsed_ms(readback_start);

        self.times
            .record(entry.name(), [render_ms, upload_ms, readback_ms, 0.0]);
        Ok(out_color)
    }
}

impl Renderer for GpuRenderer {
    fn set_world_view_matrix(&mut self, mat: Matrix4<f32>) -> Result<()> {
        self.scene.set_world_view_matrix(mat)
    }

    fn set_world_view_proj_matrix(&mut self, mat: Matrix4<f32>) -> Result<()> {
        self.scene.set_world_view_proj_matrix(mat)
    }

    fn set_bounding_box(&mut self, min: Vector3<f32>, max: Vector3<f32>) {
        self.scene.set_bounding_box(min, max);
    }

    fn set_fog_config(&mut self, fog: FogConfig) {
        self.scene.set_fog_config(fog);
    }

    fn forward(&mut self, width: u32, height: u32) -> Result<Vec<u32>> {
        self.render(MarchEntry::Forward, width, height)
    }

    fn ray_march(&mut self, width: u32, height: u32) -> Result<Vec<u32>> {
        self.render(MarchEntry::RayMarch, width, height)
    }

    fn execution_time(&self, name: &str) -> [f32; 4] {
        self.times.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::CpuRenderer;
    use crate::SH_WIDTH;
    use cgmath::{Deg, Point3};

    fn test_grid(size: usize) -> PlenoxelGrid {
        let mut grid = PlenoxelGrid::new(size);
        for z in 0..size {
            for y in 0..size {
                for x in 0..size {
                    let voxel = grid.voxel_mut(x, y, z);
                    voxel.density = (x + y + z) as f32 * 0.4;
                    for i in 0..SH_WIDTH {
                        voxel.sh_r[i] = 0.02 * (x * SH_WIDTH + i) as f32 / size as f32;
                        voxel.sh_g[i] = 0.02 * (y * SH_WIDTH + i) as f32 / size as f32;
                        voxel.sh_b[i] = 0.02 * (z * SH_WIDTH + i) as f32 / size as f32;
                    }
                }
            }
        }
        grid
    }

    fn aim(renderer: &mut dyn Renderer) {
        renderer
            .set_world_view_matrix(Matrix4::look_at_rh(
                Point3::new(0.5, 0.6, 2.2),
                Point3::new(0.5, 0.5, 0.5),
                Vector3::unit_y(),
            ))
            .unwrap();
        renderer
            .set_world_view_proj_matrix(cgmath::perspective(Deg(60.0), 1.0, 0.1, 100.0))
            .unwrap();
        renderer.set_bounding_box(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn gpu_matches_cpu_within_quantization() {
        let grid = Arc::new(test_grid(8));

        // No adapter on CI runners without a GPU; nothing to compare then.
        let mut gpu = match GpuRenderer::new(grid.clone()) {
            Ok(gpu) => gpu,
            Err(err) => {
                eprintln!("skipping GPU parity test: {err:#}");
                return;
            }
        };
        let mut cpu = CpuRenderer::new(grid);
        aim(&mut gpu);
        aim(&mut cpu);

        let (width, height) = (32u32, 32u32);
        let gpu_pixels = gpu.forward(width, height).unwrap();
        let cpu_pixels = cpu.forward(width, height).unwrap();
        assert_eq!(gpu_pixels.len(), cpu_pixels.len());

        for (i, (g, c)) in gpu_pixels.iter().zip(&cpu_pixels).enumerate() {
            for shift in [0, 8, 16, 24] {
                let gb = (g >> shift) & 0xff;
                let cb = (c >> shift) & 0xff;
                assert!(
                    gb.abs_diff(cb) <= 2,
                    "pixel {i} channel at bit {shift}: gpu {gb} vs cpu {cb}",
                );
            }
        }

        let gpu_fog = gpu.ray_march(width, height).unwrap();
        let cpu_fog = cpu.ray_march(width, height).unwrap();
        for (g, c) in gpu_fog.iter().zip(&cpu_fog) {
            for shift in [0, 8, 16, 24] {
                assert!(((g >> shift) & 0xff).abs_diff((c >> shift) & 0xff) <= 2);
            }
        }
    }
}
