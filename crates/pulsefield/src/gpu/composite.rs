use bytemuck::{Pod, Zeroable};
use wgpu::{
    BindGroupLayout, CommandEncoder, Device, Queue, RenderPipeline, ShaderStages, TextureFormat,
    TextureView,
};

use crate::compositor::CompositeParams;

use super::pass::{
    create_fs_pipeline, create_uniform_buffer, run_fullscreen_pass, sampler_entry, tex_entry,
    uniform_entry,
};
use super::render_target::RenderTarget;

const COMPOSITE_FS: &str = include_str!("../../../../assets/shaders/builtin/composite.wgsl");

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct CompositeUniforms {
    bloom_mix: f32,
    gamma: f32,
    _pad: [f32; 2],
}

/// Final `base + bloom` tone-mapping pass. One pipeline per output format:
/// the swapchain (when presenting) and the capture texture.
pub struct CompositePass {
    bgl: BindGroupLayout,
    pipelines: Vec<(TextureFormat, RenderPipeline)>,
    params: wgpu::Buffer,
}

impl CompositePass {
    pub fn new(device: &Device, formats: &[TextureFormat]) -> Self {
        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite-bgl"),
            entries: &[
                tex_entry(0),
                tex_entry(1),
                sampler_entry(2),
                uniform_entry(3, ShaderStages::FRAGMENT, std::mem::size_of::<CompositeUniforms>()),
            ],
        });

        let mut pipelines: Vec<(TextureFormat, RenderPipeline)> = Vec::new();
        for &format in formats {
            if pipelines.iter().any(|(f, _)| *f == format) {
                continue;
            }
            let pipeline = create_fs_pipeline(device, "composite", &bgl, COMPOSITE_FS, format, None);
            pipelines.push((format, pipeline));
        }

        let params = create_uniform_buffer(
            device,
            "composite-params",
            std::mem::size_of::<CompositeUniforms>(),
        );

        Self {
            bgl,
            pipelines,
            params,
        }
    }

    pub fn write_params(&self, queue: &Queue, params: &CompositeParams) {
        let uniforms = CompositeUniforms {
            bloom_mix: params.bloom_mix,
            gamma: params.gamma,
            _pad: [0.0; 2],
        };
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&uniforms));
    }

    /// Composite `base` and `bloom` into `target`. Returns false when no
    /// pipeline was built for `format`.
    pub fn draw(
        &self,
        encoder: &mut CommandEncoder,
        device: &Device,
        base: &RenderTarget,
        bloom: &RenderTarget,
        target: &TextureView,
        format: TextureFormat,
    ) -> bool {
        let Some((_, pipeline)) = self.pipelines.iter().find(|(f, _)| *f == format) else {
            log::warn!("No composite pipeline for {format:?}");
            return false;
        };

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("composite-bg"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&base.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&bloom.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&bloom.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.params.as_entire_binding(),
                },
            ],
        });

        run_fullscreen_pass(
            encoder,
            "composite",
            pipeline,
            &bind_group,
            target,
            wgpu::LoadOp::Clear(wgpu::Color::BLACK),
        );
        true
    }
}
