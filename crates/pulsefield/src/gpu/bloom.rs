use bytemuck::{Pod, Zeroable};
use wgpu::{BindGroupLayout, CommandEncoder, Device, Queue, RenderPipeline, ShaderStages};

use crate::compositor::bloom_size;

use super::pass::{
    create_fs_pipeline, create_uniform_buffer, run_fullscreen_pass, tex_entry, uniform_entry,
};
use super::render_target::RenderTarget;
use super::trail::HDR_FORMAT;

const BLOOM_EXTRACT_FS: &str = include_str!("../../../../assets/shaders/builtin/bloom_extract.wgsl");
const BLOOM_BLUR_FS: &str = include_str!("../../../../assets/shaders/builtin/bloom_blur.wgsl");

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct ExtractUniforms {
    target_size: [f32; 2],
    threshold: f32,
    _pad: f32,
}

/// Must match `BlurParams` in `bloom_blur.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct BlurUniforms {
    /// Texel step: (1, 0) horizontal, (0, 1) vertical.
    direction: [i32; 2],
    radius: u32,
    sigma: f32,
}

/// Half-resolution bright pass followed by a separable Gaussian blur.
pub struct BloomPass {
    extract: RenderTarget,
    blur_h: RenderTarget,
    blur_v: RenderTarget,

    extract_bgl: BindGroupLayout,
    extract_pipeline: RenderPipeline,
    extract_params: wgpu::Buffer,

    blur_bgl: BindGroupLayout,
    blur_pipeline: RenderPipeline,
    // One buffer per direction: both passes land in the same submission.
    blur_h_params: wgpu::Buffer,
    blur_v_params: wgpu::Buffer,
}

impl BloomPass {
    pub fn new(device: &Device, width: u32, height: u32) -> Self {
        let (bw, bh) = bloom_size(width, height);

        let extract_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("bloom-extract-bgl"),
            entries: &[
                tex_entry(0),
                uniform_entry(1, ShaderStages::FRAGMENT, std::mem::size_of::<ExtractUniforms>()),
            ],
        });
        let blur_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("bloom-blur-bgl"),
            entries: &[
                tex_entry(0),
                uniform_entry(1, ShaderStages::FRAGMENT, std::mem::size_of::<BlurUniforms>()),
            ],
        });

        Self {
            extract: RenderTarget::new(device, bw, bh, HDR_FORMAT, "bloom-extract"),
            blur_h: RenderTarget::new(device, bw, bh, HDR_FORMAT, "bloom-blur-h"),
            blur_v: RenderTarget::new(device, bw, bh, HDR_FORMAT, "bloom-blur-v"),
            extract_pipeline: create_fs_pipeline(
                device,
                "bloom-extract",
                &extract_bgl,
                BLOOM_EXTRACT_FS,
                HDR_FORMAT,
                None,
            ),
            extract_params: create_uniform_buffer(
                device,
                "bloom-extract-params",
                std::mem::size_of::<ExtractUniforms>(),
            ),
            extract_bgl,
            blur_pipeline: create_fs_pipeline(
                device,
                "bloom-blur",
                &blur_bgl,
                BLOOM_BLUR_FS,
                HDR_FORMAT,
                None,
            ),
            blur_h_params: create_uniform_buffer(
                device,
                "bloom-blur-h-params",
                std::mem::size_of::<BlurUniforms>(),
            ),
            blur_v_params: create_uniform_buffer(
                device,
                "bloom-blur-v-params",
                std::mem::size_of::<BlurUniforms>(),
            ),
            blur_bgl,
        }
    }

    pub fn resize(&mut self, device: &Device, width: u32, height: u32) {
        let (bw, bh) = bloom_size(width, height);
        self.extract.resize(device, bw, bh);
        self.blur_h.resize(device, bw, bh);
        self.blur_v.resize(device, bw, bh);
    }

    /// Blurred bloom, valid after `blur_v`.
    pub fn output(&self) -> &RenderTarget {
        &self.blur_v
    }

    pub fn extract(
        &self,
        encoder: &mut CommandEncoder,
        device: &Device,
        queue: &Queue,
        source: &RenderTarget,
        threshold: f32,
    ) {
        let uniforms = ExtractUniforms {
            target_size: [self.extract.width as f32, self.extract.height as f32],
            threshold,
            _pad: 0.0,
        };
        queue.write_buffer(&self.extract_params, 0, bytemuck::bytes_of(&uniforms));
        let bind_group = self.bind_group(
            device,
            "bloom-extract-bg",
            &self.extract_bgl,
            source,
            &self.extract_params,
        );
        run_fullscreen_pass(
            encoder,
            "bloom-extract",
            &self.extract_pipeline,
            &bind_group,
            &self.extract.view,
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
        );
    }

    pub fn blur_h(
        &self,
        encoder: &mut CommandEncoder,
        device: &Device,
        queue: &Queue,
        radius: u32,
        sigma: f32,
    ) {
        self.blur(
            encoder,
            device,
            queue,
            &self.blur_h_params,
            BlurUniforms {
                direction: [1, 0],
                radius,
                sigma,
            },
            &self.extract,
            &self.blur_h,
            "bloom-blur-h",
        );
    }

    pub fn blur_v(
        &self,
        encoder: &mut CommandEncoder,
        device: &Device,
        queue: &Queue,
        radius: u32,
        sigma: f32,
    ) {
        self.blur(
            encoder,
            device,
            queue,
            &self.blur_v_params,
            BlurUniforms {
                direction: [0, 1],
                radius,
                sigma,
            },
            &self.blur_h,
            &self.blur_v,
            "bloom-blur-v",
        );
    }

    fn blur(
        &self,
        encoder: &mut CommandEncoder,
        device: &Device,
        queue: &Queue,
        params: &wgpu::Buffer,
        uniforms: BlurUniforms,
        source: &RenderTarget,
        target: &RenderTarget,
        label: &str,
    ) {
        queue.write_buffer(params, 0, bytemuck::bytes_of(&uniforms));
        let bind_group = self.bind_group(device, label, &self.blur_bgl, source, params);
        run_fullscreen_pass(
            encoder,
            label,
            &self.blur_pipeline,
            &bind_group,
            &target.view,
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
        );
    }

    fn bind_group(
        &self,
        device: &Device,
        label: &str,
        layout: &BindGroupLayout,
        source: &RenderTarget,
        params: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params.as_entire_binding(),
                },
            ],
        })
    }
}
