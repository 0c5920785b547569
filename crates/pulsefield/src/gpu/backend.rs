use wgpu::{CommandEncoder, SurfaceTexture, TextureView};

use crate::config::RenderSettings;
use crate::pipeline::{BackendError, FrameParams, RenderBackend, Stage};
use crate::raster::{Frame, HdrImage};

use super::bloom::BloomPass;
use super::capture::FrameCapture;
use super::composite::CompositePass;
use super::context::{CAPTURE_FORMAT, GpuContext};
use super::particles::{ParticlePass, ParticleRenderUniforms};
use super::trail::{HDR_FORMAT, TrailPass};

/// Encoder and swapchain image for the tick being recorded.
struct InFlight {
    encoder: CommandEncoder,
    surface: Option<SurfaceTexture>,
    surface_view: Option<TextureView>,
}

/// wgpu backend: compute simulation plus fullscreen render passes, all
/// recorded into one encoder and submitted in `end_frame`.
pub struct GpuBackend {
    ctx: GpuContext,
    particles: ParticlePass,
    trail: TrailPass,
    bloom: BloomPass,
    composite: CompositePass,
    capture: FrameCapture,
    frame: Option<InFlight>,
}

impl GpuBackend {
    pub fn new(
        ctx: GpuContext,
        width: u32,
        height: u32,
        settings: &RenderSettings,
    ) -> Result<Self, BackendError> {
        let (width, height) = (width.max(1), height.max(1));
        let mut formats = vec![CAPTURE_FORMAT];
        if let Some(p) = &ctx.presenter {
            formats.push(p.config.format);
        }

        let (particles, trail, bloom, composite, capture) = ctx.checked("render passes", |device| {
            (
                ParticlePass::new(device, &ctx.queue, HDR_FORMAT, settings),
                TrailPass::new(device, width, height),
                BloomPass::new(device, width, height),
                CompositePass::new(device, &formats),
                FrameCapture::new(device, width, height),
            )
        })?;

        log::info!(
            "GPU backend ready: {width}x{height}, {} particles",
            particles.capacity()
        );

        Ok(Self {
            ctx,
            particles,
            trail,
            bloom,
            composite,
            capture,
            frame: None,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }
}

impl RenderBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn size(&self) -> (u32, u32) {
        self.trail.size()
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.ctx.resize(width, height);
        let Self {
            ctx,
            trail,
            bloom,
            capture,
            ..
        } = self;
        ctx.checked("resized targets", |device| {
            trail.resize(device, &ctx.queue, width, height);
            bloom.resize(device, width, height);
            capture.resize(device, width, height);
        })
    }

    fn apply_settings(&mut self, settings: &RenderSettings) -> Result<(), BackendError> {
        if self.particles.needs_rebuild(settings) {
            let ctx = &self.ctx;
            self.particles = ctx.checked("particle pool", |device| {
                ParticlePass::new(device, &ctx.queue, HDR_FORMAT, settings)
            })?;
            log::info!("Particle pool rebuilt: {}", self.particles.capacity());
        } else {
            self.particles.apply_settings(&self.ctx.queue, settings);
        }
        Ok(())
    }

    fn set_overlay(&mut self, overlay: Option<&HdrImage>) -> Result<(), BackendError> {
        let Self { ctx, trail, .. } = self;
        ctx.checked("overlay", |device| trail.set_overlay(device, &ctx.queue, overlay))
    }

    fn begin_frame(&mut self, _params: &FrameParams) -> Result<(), BackendError> {
        if self.frame.take().is_some() {
            log::warn!("Dropping an unfinished tick");
        }
        let surface = self.ctx.acquire()?;
        let surface_view = surface
            .as_ref()
            .map(|s| s.texture.create_view(&wgpu::TextureViewDescriptor::default()));
        let encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("tick") });
        self.frame = Some(InFlight {
            encoder,
            surface,
            surface_view,
        });
        Ok(())
    }

    fn run_stage(&mut self, stage: Stage, params: &FrameParams) -> Result<(), BackendError> {
        let Self {
            ctx,
            particles,
            trail,
            bloom,
            composite,
            capture,
            frame,
        } = self;
        let Some(frame) = frame.as_mut() else {
            return Err(BackendError::Setup(format!(
                "stage {} outside a frame",
                stage.label()
            )));
        };
        let device = &ctx.device;
        let queue = &ctx.queue;
        let encoder = &mut frame.encoder;

        match stage {
            Stage::Simulate => particles.dispatch(encoder, queue, &params.uniforms),
            Stage::Diffuse => trail.diffuse(encoder, device, queue, &params.trail),
            Stage::Overlay => trail.add_overlay(encoder, device, queue, params.text_visibility),
            Stage::RenderParticles => {
                let (w, h) = trail.size();
                let uniforms = ParticleRenderUniforms::new(&params.look, w, h);
                particles.render(encoder, queue, &trail.write_target().view, &uniforms);
                trail.flip();
            }
            Stage::BloomExtract => {
                bloom.extract(encoder, device, queue, trail.latest(), params.bloom_threshold)
            }
            Stage::BlurH => bloom.blur_h(encoder, device, queue, params.blur_radius, params.blur_sigma),
            Stage::BlurV => bloom.blur_v(encoder, device, queue, params.blur_radius, params.blur_sigma),
            Stage::Composite => {
                composite.write_params(queue, &params.composite);
                let (target, format) = match &frame.surface_view {
                    Some(view) => (view, ctx.format),
                    None => (&capture.target.view, CAPTURE_FORMAT),
                };
                composite.draw(encoder, device, trail.latest(), bloom.output(), target, format);
            }
        }
        Ok(())
    }

    fn end_frame(&mut self, capture: bool) -> Result<Option<Frame>, BackendError> {
        let Some(InFlight {
            mut encoder,
            surface,
            surface_view,
        }) = self.frame.take()
        else {
            return Err(BackendError::Setup("end_frame without begin_frame".into()));
        };

        if capture {
            // Presenting ticks composite into the swapchain; redo it offscreen.
            if surface.is_some() {
                self.composite.draw(
                    &mut encoder,
                    &self.ctx.device,
                    self.trail.latest(),
                    self.bloom.output(),
                    &self.capture.target.view,
                    CAPTURE_FORMAT,
                );
            }
            self.capture.copy_to_staging(&mut encoder);
        }

        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        drop(surface_view);
        if let Some(surface) = surface {
            surface.present();
        }

        if capture {
            self.capture.read(&self.ctx.device).map(Some)
        } else {
            Ok(None)
        }
    }
}
