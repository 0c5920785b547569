//! Reference backend: every stage on the CPU with rayon data parallelism.
//! Deterministic and headless, so it backs tests and `export --cpu`.

use crate::compositor::FrameCompositor;
use crate::config::RenderSettings;
use crate::pipeline::{BackendError, FrameParams, RenderBackend, Stage};
use crate::raster::{Frame, HdrImage};
use crate::sim::ParticleSimulator;
use crate::trail::TrailAccumulator;

pub struct CpuBackend {
    simulator: ParticleSimulator,
    trail: TrailAccumulator,
    compositor: FrameCompositor,
    overlay: Option<HdrImage>,
    frame: Frame,
}

impl CpuBackend {
    pub fn new(width: u32, height: u32, settings: &RenderSettings) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        Self {
            simulator: ParticleSimulator::new(settings),
            trail: TrailAccumulator::new(width, height),
            compositor: FrameCompositor::new(width, height),
            overlay: None,
            frame: Frame::new(width, height),
        }
    }

    pub fn simulator(&self) -> &ParticleSimulator {
        &self.simulator
    }

    pub fn trail(&self) -> &TrailAccumulator {
        &self.trail
    }

    /// Last composited frame, valid after a full tick.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

impl RenderBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn size(&self) -> (u32, u32) {
        self.trail.size()
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        let (width, height) = (width.max(1), height.max(1));
        self.trail.resize(width, height);
        self.compositor.resize(width, height);
        self.frame = Frame::new(width, height);
        // A stale overlay is resampled until the host supplies a new one.
        Ok(())
    }

    fn apply_settings(&mut self, settings: &RenderSettings) -> Result<(), BackendError> {
        self.simulator.apply_settings(settings);
        Ok(())
    }

    fn set_overlay(&mut self, overlay: Option<&HdrImage>) -> Result<(), BackendError> {
        self.overlay = overlay.cloned();
        Ok(())
    }

    fn begin_frame(&mut self, _params: &FrameParams) -> Result<(), BackendError> {
        Ok(())
    }

    fn run_stage(&mut self, stage: Stage, params: &FrameParams) -> Result<(), BackendError> {
        match stage {
            Stage::Simulate => self.simulator.step(&params.uniforms),
            Stage::Diffuse => self.trail.diffuse(&params.trail),
            Stage::Overlay => {
                if let Some(overlay) = &self.overlay {
                    self.trail.add_overlay(overlay, params.text_visibility);
                }
            }
            Stage::RenderParticles => {
                self.trail.splat_particles(self.simulator.active(), &params.look);
                self.trail.flip();
            }
            Stage::BloomExtract => self
                .compositor
                .extract(self.trail.current(), params.bloom_threshold),
            Stage::BlurH => self.compositor.blur_h(params.blur_radius, params.blur_sigma),
            Stage::BlurV => self.compositor.blur_v(params.blur_radius, params.blur_sigma),
            Stage::Composite => {
                self.compositor
                    .composite(self.trail.current(), &params.composite, &mut self.frame)
            }
        }
        Ok(())
    }

    fn end_frame(&mut self, capture: bool) -> Result<Option<Frame>, BackendError> {
        Ok(capture.then(|| self.frame.clone()))
    }
}
