use bytemuck::{Pod, Zeroable};
use wgpu::{BindGroupLayout, CommandEncoder, Device, Queue, RenderPipeline, ShaderStages, TextureFormat};

use crate::raster::HdrImage;
use crate::trail::TrailParams;

use super::pass::{
    ADDITIVE, create_fs_pipeline, create_uniform_buffer, run_fullscreen_pass, tex_entry,
    uniform_entry, unfilterable_tex_entry,
};
use super::render_target::{PingPongTarget, RenderTarget};

const TRAIL_DIFFUSE_FS: &str = include_str!("../../../../assets/shaders/builtin/trail_diffuse.wgsl");
const TRAIL_OVERLAY_FS: &str = include_str!("../../../../assets/shaders/builtin/trail_overlay.wgsl");

/// HDR accumulation format for trails and bloom.
pub const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
const OVERLAY_FORMAT: TextureFormat = TextureFormat::Rgba32Float;

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct DiffuseUniforms {
    diffusion: f32,
    dissipation: f32,
    _pad: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct OverlayUniforms {
    visibility: f32,
    _pad: [f32; 3],
}

/// Overlay image resampled to the trail size and uploaded once.
struct OverlayTexture {
    source: HdrImage,
    view: wgpu::TextureView,
}

impl OverlayTexture {
    fn new(device: &Device, queue: &Queue, source: HdrImage, width: u32, height: u32) -> Self {
        let fitted = if source.size() == (width, height) {
            source.clone()
        } else {
            resample(&source, width, height)
        };

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("overlay"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OVERLAY_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(fitted.pixels()),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 16),
                rows_per_image: Some(height),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { source, view }
    }
}

/// Bilinear resample of `src` to `width`×`height`.
fn resample(src: &HdrImage, width: u32, height: u32) -> HdrImage {
    let mut out = HdrImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let c = src.sample_bilinear(
                (x as f32 + 0.5) / width as f32,
                (y as f32 + 0.5) / height as f32,
            );
            out.add(x, y, c);
        }
    }
    out
}

/// Trail ping-pong plus the diffuse and overlay passes that feed it.
pub struct TrailPass {
    targets: PingPongTarget,

    diffuse_bgl: BindGroupLayout,
    diffuse_pipeline: RenderPipeline,
    diffuse_params: wgpu::Buffer,

    overlay_bgl: BindGroupLayout,
    overlay_pipeline: RenderPipeline,
    overlay_params: wgpu::Buffer,
    overlay: Option<OverlayTexture>,
}

impl TrailPass {
    pub fn new(device: &Device, width: u32, height: u32) -> Self {
        let targets = PingPongTarget::new(device, width, height, HDR_FORMAT);

        let diffuse_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("trail-diffuse-bgl"),
            entries: &[
                tex_entry(0),
                uniform_entry(1, ShaderStages::FRAGMENT, std::mem::size_of::<DiffuseUniforms>()),
            ],
        });
        let diffuse_pipeline = create_fs_pipeline(
            device,
            "trail-diffuse",
            &diffuse_bgl,
            TRAIL_DIFFUSE_FS,
            HDR_FORMAT,
            None,
        );
        let diffuse_params = create_uniform_buffer(
            device,
            "trail-diffuse-params",
            std::mem::size_of::<DiffuseUniforms>(),
        );

        let overlay_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("trail-overlay-bgl"),
            entries: &[
                unfilterable_tex_entry(0),
                uniform_entry(1, ShaderStages::FRAGMENT, std::mem::size_of::<OverlayUniforms>()),
            ],
        });
        let overlay_pipeline = create_fs_pipeline(
            device,
            "trail-overlay",
            &overlay_bgl,
            TRAIL_OVERLAY_FS,
            HDR_FORMAT,
            Some(ADDITIVE),
        );
        let overlay_params = create_uniform_buffer(
            device,
            "trail-overlay-params",
            std::mem::size_of::<OverlayUniforms>(),
        );

        Self {
            targets,
            diffuse_bgl,
            diffuse_pipeline,
            diffuse_params,
            overlay_bgl,
            overlay_pipeline,
            overlay_params,
            overlay: None,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        let t = self.targets.write_target();
        (t.width, t.height)
    }

    /// Reallocate both trail targets; history is dropped. The overlay is
    /// refitted to the new size.
    pub fn resize(&mut self, device: &Device, queue: &Queue, width: u32, height: u32) {
        self.targets.resize(device, width, height);
        if let Some(overlay) = self.overlay.take() {
            let (w, h) = self.size();
            self.overlay = Some(OverlayTexture::new(device, queue, overlay.source, w, h));
        }
    }

    pub fn set_overlay(&mut self, device: &Device, queue: &Queue, overlay: Option<&HdrImage>) {
        let (w, h) = self.size();
        self.overlay = overlay.map(|img| OverlayTexture::new(device, queue, img.clone(), w, h));
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    /// Trail frame being built this tick.
    pub fn write_target(&self) -> &RenderTarget {
        self.targets.write_target()
    }

    /// Latest completed trail frame, valid after `flip`.
    pub fn latest(&self) -> &RenderTarget {
        self.targets.read_target()
    }

    pub fn flip(&mut self) {
        self.targets.flip();
    }

    /// Diffuse and decay last tick's frame into the write target.
    pub fn diffuse(
        &self,
        encoder: &mut CommandEncoder,
        device: &Device,
        queue: &Queue,
        params: &TrailParams,
    ) {
        let uniforms = DiffuseUniforms {
            diffusion: params.diffusion,
            dissipation: params.dissipation,
            _pad: [0.0; 2],
        };
        queue.write_buffer(&self.diffuse_params, 0, bytemuck::bytes_of(&uniforms));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("trail-diffuse-bg"),
            layout: &self.diffuse_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.targets.read_target().view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.diffuse_params.as_entire_binding(),
                },
            ],
        });

        run_fullscreen_pass(
            encoder,
            "trail-diffuse",
            &self.diffuse_pipeline,
            &bind_group,
            &self.targets.write_target().view,
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
        );
    }

    /// Add the overlay scaled by `visibility`. No-op without an overlay or
    /// when it is fully hidden.
    pub fn add_overlay(
        &self,
        encoder: &mut CommandEncoder,
        device: &Device,
        queue: &Queue,
        visibility: f32,
    ) {
        let Some(overlay) = &self.overlay else {
            return;
        };
        if visibility <= 0.0 {
            return;
        }

        let uniforms = OverlayUniforms {
            visibility,
            _pad: [0.0; 3],
        };
        queue.write_buffer(&self.overlay_params, 0, bytemuck::bytes_of(&uniforms));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("trail-overlay-bg"),
            layout: &self.overlay_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&overlay.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.overlay_params.as_entire_binding(),
                },
            ],
        });

        run_fullscreen_pass(
            encoder,
            "trail-overlay",
            &self.overlay_pipeline,
            &bind_group,
            &self.targets.write_target().view,
            wgpu::LoadOp::Load,
        );
    }
}
