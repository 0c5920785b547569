use bytemuck::{Pod, Zeroable};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, ColorTargetState, CommandEncoder, ComputePipeline, Device, FragmentState,
    PipelineCompilationOptions, PipelineLayoutDescriptor, PrimitiveState, Queue, RenderPipeline,
    ShaderStages, TextureFormat, TextureView, VertexState,
};

use crate::config::{RenderSettings, SeedLayout};
use crate::sim::{FrameUniforms, Particle, SimParams, seed};
use crate::trail::ParticleLook;

use super::pass::{ADDITIVE, storage_entry, uniform_entry};

const PARTICLE_SIM_CS: &str = include_str!("../../../../assets/shaders/builtin/particle_sim.wgsl");
const PARTICLE_RENDER: &str =
    include_str!("../../../../assets/shaders/builtin/particle_render.wgsl");

const WORKGROUP_SIZE: u32 = 256;

/// Particle render uniforms: 64 bytes.
/// Must be kept in sync with `RenderUniforms` in `particle_render.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct ParticleRenderUniforms {
    pub resolution: [f32; 2],
    pub point_size: f32,
    pub glow: f32,
    pub slow: [f32; 3],
    pub speed_scale: f32,
    pub fast: [f32; 3],
    pub accent_mix: f32,
    pub accent: [f32; 3],
    pub _pad: f32,
}

impl ParticleRenderUniforms {
    pub fn new(look: &ParticleLook, width: u32, height: u32) -> Self {
        Self {
            resolution: [width as f32, height as f32],
            point_size: look.point_size,
            glow: look.glow,
            slow: look.palette.slow,
            speed_scale: look.speed_scale,
            fast: look.palette.fast,
            accent_mix: look.palette.accent_mix,
            accent: look.palette.accent,
            _pad: 0.0,
        }
    }
}

/// GPU particle pool with ping-pong storage buffers: the compute pass reads
/// one and writes the other, the render pass draws the freshly written one.
pub struct ParticlePass {
    capacity: u32,
    active_count: u32,
    layout: SeedLayout,

    storage_buffers: [wgpu::Buffer; 2],
    /// Buffer holding the latest particle state.
    current: usize,
    uniform_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    render_uniform_buffer: wgpu::Buffer,

    compute_pipeline: ComputePipeline,
    compute_bind_groups: [BindGroup; 2],

    render_pipeline: RenderPipeline,
    render_bind_groups: [BindGroup; 2],
}

impl ParticlePass {
    pub fn new(
        device: &Device,
        queue: &Queue,
        hdr_format: TextureFormat,
        settings: &RenderSettings,
    ) -> Self {
        let capacity = settings.particle_capacity.max(1);
        let buffer_size = std::mem::size_of::<Particle>() as u64 * capacity as u64;

        let storage_buffers = [
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("particles-a"),
                size: buffer_size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("particles-b"),
                size: buffer_size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
        ];

        let uniform_buffer = super::pass::create_uniform_buffer(
            device,
            "frame-uniforms",
            std::mem::size_of::<FrameUniforms>(),
        );
        let params_buffer = super::pass::create_uniform_buffer(
            device,
            "sim-params",
            std::mem::size_of::<SimParams>(),
        );
        let render_uniform_buffer = super::pass::create_uniform_buffer(
            device,
            "particle-render-uniforms",
            std::mem::size_of::<ParticleRenderUniforms>(),
        );

        // --- Compute pipeline ---
        let compute_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("particle-compute-bgl"),
            entries: &[
                uniform_entry(0, ShaderStages::COMPUTE, std::mem::size_of::<FrameUniforms>()),
                uniform_entry(1, ShaderStages::COMPUTE, std::mem::size_of::<SimParams>()),
                storage_entry(2, ShaderStages::COMPUTE, true),
                storage_entry(3, ShaderStages::COMPUTE, false),
            ],
        });

        let compute_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("particle-sim"),
            source: wgpu::ShaderSource::Wgsl(PARTICLE_SIM_CS.into()),
        });

        let compute_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("particle-compute-layout"),
            bind_group_layouts: &[&compute_bgl],
            push_constant_ranges: &[],
        });

        let compute_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("particle-compute-pipeline"),
            layout: Some(&compute_pipeline_layout),
            module: &compute_shader,
            entry_point: Some("cs_main"),
            compilation_options: PipelineCompilationOptions::default(),
            cache: None,
        });

        let compute_bind_groups = create_compute_bind_groups(
            device,
            &compute_bgl,
            &uniform_buffer,
            &params_buffer,
            &storage_buffers,
        );

        // --- Render pipeline ---
        let render_entries: [BindGroupLayoutEntry; 2] = [
            storage_entry(0, ShaderStages::VERTEX, true),
            uniform_entry(
                1,
                ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                std::mem::size_of::<ParticleRenderUniforms>(),
            ),
        ];
        let render_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("particle-render-bgl"),
            entries: &render_entries,
        });

        let render_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("particle-render"),
            source: wgpu::ShaderSource::Wgsl(PARTICLE_RENDER.into()),
        });

        let render_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("particle-render-layout"),
            bind_group_layouts: &[&render_bgl],
            push_constant_ranges: &[],
        });

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("particle-render-pipeline"),
            layout: Some(&render_pipeline_layout),
            vertex: VertexState {
                module: &render_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: PipelineCompilationOptions::default(),
            },
            fragment: Some(FragmentState {
                module: &render_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(ColorTargetState {
                    format: hdr_format,
                    blend: Some(ADDITIVE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: PipelineCompilationOptions::default(),
            }),
            primitive: PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let render_bind_groups = create_render_bind_groups(
            device,
            &render_bgl,
            &storage_buffers,
            &render_uniform_buffer,
        );

        let pass = Self {
            capacity,
            active_count: settings.active_particles.min(capacity),
            layout: settings.seed_layout,
            storage_buffers,
            current: 0,
            uniform_buffer,
            params_buffer,
            render_uniform_buffer,
            compute_pipeline,
            compute_bind_groups,
            render_pipeline,
            render_bind_groups,
        };
        pass.upload_params(queue, settings);
        pass.upload_particles(queue, &seed::seed(pass.layout, capacity as usize));
        pass
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn upload_params(&self, queue: &Queue, settings: &RenderSettings) {
        let params = SimParams::from_settings(settings);
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
    }

    /// Overwrite both storage buffers with `particles`.
    pub fn upload_particles(&self, queue: &Queue, particles: &[Particle]) {
        let bytes: &[u8] = bytemuck::cast_slice(particles);
        for buffer in &self.storage_buffers {
            queue.write_buffer(buffer, 0, bytes);
        }
    }

    /// Whether `settings` need a new pool rather than a parameter upload.
    pub fn needs_rebuild(&self, settings: &RenderSettings) -> bool {
        settings.particle_capacity.max(1) != self.capacity || settings.seed_layout != self.layout
    }

    pub fn apply_settings(&mut self, queue: &Queue, settings: &RenderSettings) {
        self.upload_params(queue, settings);
        self.active_count = settings.active_particles.min(self.capacity);
    }

    /// Step every particle once; the written buffer becomes current.
    pub fn dispatch(&mut self, encoder: &mut CommandEncoder, queue: &Queue, uniforms: &FrameUniforms) {
        let mut uniforms = *uniforms;
        uniforms.active_count = uniforms.active_count.min(self.active_count);
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let workgroups = self.capacity.div_ceil(WORKGROUP_SIZE);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("particle-sim"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.compute_pipeline);
            pass.set_bind_group(0, &self.compute_bind_groups[self.current], &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        self.current = 1 - self.current;
    }

    /// Draw active particles additively on top of `target`.
    pub fn render(
        &self,
        encoder: &mut CommandEncoder,
        queue: &Queue,
        target: &TextureView,
        uniforms: &ParticleRenderUniforms,
    ) {
        queue.write_buffer(&self.render_uniform_buffer, 0, bytemuck::bytes_of(uniforms));

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("particle-render"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.render_pipeline);
        pass.set_bind_group(0, &self.render_bind_groups[self.current], &[]);
        // 6 vertices per particle (instanced quad)
        pass.draw(0..6, 0..self.active_count);
    }
}

fn create_compute_bind_groups(
    device: &Device,
    layout: &BindGroupLayout,
    uniform_buffer: &wgpu::Buffer,
    params_buffer: &wgpu::Buffer,
    storage_buffers: &[wgpu::Buffer; 2],
) -> [BindGroup; 2] {
    // bind_group[i]: read storage[i], write storage[1 - i]
    std::array::from_fn(|i| {
        device.create_bind_group(&BindGroupDescriptor {
            label: Some(&format!("particle-compute-bg-{i}")),
            layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: params_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: storage_buffers[i].as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: storage_buffers[1 - i].as_entire_binding(),
                },
            ],
        })
    })
}

fn create_render_bind_groups(
    device: &Device,
    layout: &BindGroupLayout,
    storage_buffers: &[wgpu::Buffer; 2],
    render_uniform_buffer: &wgpu::Buffer,
) -> [BindGroup; 2] {
    std::array::from_fn(|i| {
        device.create_bind_group(&BindGroupDescriptor {
            label: Some(&format!("particle-render-bg-{i}")),
            layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: storage_buffers[i].as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: render_uniform_buffer.as_entire_binding(),
                },
            ],
        })
    })
}
