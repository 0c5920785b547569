//! The per-tick pass sequence and the backend seam that executes it.

use thiserror::Error;

use crate::audio::AudioReactiveSnapshot;
use crate::compositor::{CompositeParams, bloom_boost, bloom_mix};
use crate::config::RenderSettings;
use crate::preset::VisualPreset;
use crate::raster::{Frame, HdrImage};
use crate::sim::FrameUniforms;
use crate::timeline::TimelineState;
use crate::trail::{ParticleLook, TrailParams, particle_glow};

/// One pass of the tick. Each stage reads only what earlier stages wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Simulate,
    Diffuse,
    Overlay,
    RenderParticles,
    BloomExtract,
    BlurH,
    BlurV,
    Composite,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Simulate => "simulate",
            Stage::Diffuse => "diffuse",
            Stage::Overlay => "overlay",
            Stage::RenderParticles => "render-particles",
            Stage::BloomExtract => "bloom-extract",
            Stage::BlurH => "bloom-blur-h",
            Stage::BlurV => "bloom-blur-v",
            Stage::Composite => "composite",
        }
    }
}

/// Strict execution order for every tick, live or export.
pub const TICK_STAGES: [Stage; 8] = [
    Stage::Simulate,
    Stage::Diffuse,
    Stage::Overlay,
    Stage::RenderParticles,
    Stage::BloomExtract,
    Stage::BlurH,
    Stage::BlurV,
    Stage::Composite,
];

/// Everything sampled at the start of a tick.
#[derive(Debug, Clone, Copy)]
pub struct TickInputs<'a> {
    pub delta_time: f32,
    /// Position inside the loop, in seconds.
    pub time: f32,
    /// Touch point in the `[-1, 1]²` domain, if any.
    pub touch: Option<[f32; 2]>,
    pub audio: AudioReactiveSnapshot,
    pub timeline: TimelineState,
    pub preset: &'a VisualPreset,
    pub settings: &'a RenderSettings,
}

/// Resolved parameters for every stage of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameParams {
    pub uniforms: FrameUniforms,
    pub trail: TrailParams,
    pub text_visibility: f32,
    pub look: ParticleLook,
    pub bloom_threshold: f32,
    pub blur_radius: u32,
    pub blur_sigma: f32,
    pub composite: CompositeParams,
}

impl FrameParams {
    pub fn build(inputs: &TickInputs<'_>) -> Self {
        let TickInputs {
            preset,
            settings,
            audio,
            timeline,
            ..
        } = *inputs;

        let uniforms = FrameUniforms {
            delta_time: inputs.delta_time,
            time: inputs.time,
            force_position: inputs.touch.unwrap_or([0.0, 0.0]),
            force_active: inputs.touch.is_some() as u32,
            force_gain: preset.force_response * timeline.force_multiplier,
            noise_jitter: timeline.noise_jitter,
            kick_pulse: audio.kick_pulse,
            snare_pulse: audio.snare_pulse,
            amplitude: audio.amplitude,
            beat_phase: audio.beat_phase,
            preset_noise_scale: preset.noise_scale,
            active_count: settings.active_particles.min(settings.particle_capacity),
            _pad: [0; 3],
        };

        let boost = bloom_boost(settings.base_bloom_boost, timeline.bloom_gain, &audio);

        Self {
            uniforms,
            trail: TrailParams {
                diffusion: settings.diffusion,
                dissipation: settings.dissipation,
            },
            text_visibility: timeline.text_visibility,
            look: ParticleLook {
                palette: preset.palette,
                glow: particle_glow(
                    settings.particle_intensity,
                    preset.bloom_response,
                    audio.amplitude,
                ),
                speed_scale: settings.speed_scale,
                point_size: settings.point_size,
            },
            bloom_threshold: settings.bloom_threshold,
            blur_radius: settings.blur_radius,
            blur_sigma: settings.blur_sigma,
            composite: CompositeParams {
                bloom_mix: bloom_mix(settings.bloom_strength, preset.base_bloom, boost),
                gamma: settings.gamma,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// Resource creation failed; the session cannot run.
    #[error("backend setup failed: {0}")]
    Setup(String),
    /// Per-frame acquisition failed; skip this tick and retry.
    #[error("frame skipped: {0}")]
    Transient(String),
    /// The composited frame could not be read back.
    #[error("frame readback failed: {0}")]
    Readback(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// Executes the tick stages. CPU and GPU implementations share this contract.
pub trait RenderBackend {
    fn name(&self) -> &'static str;

    /// Trail/output resolution.
    fn size(&self) -> (u32, u32);

    /// Reallocate every size-dependent buffer. Never called mid-tick.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), BackendError>;

    /// Push new simulation/look tunables. Capacity changes reseed the pool.
    fn apply_settings(&mut self, settings: &RenderSettings) -> Result<(), BackendError>;

    /// Premultiplied overlay at trail resolution, or `None` to clear it.
    fn set_overlay(&mut self, overlay: Option<&HdrImage>) -> Result<(), BackendError>;

    /// Acquire the output target and upload per-tick parameters.
    fn begin_frame(&mut self, params: &FrameParams) -> Result<(), BackendError>;

    fn run_stage(&mut self, stage: Stage, params: &FrameParams) -> Result<(), BackendError>;

    /// Finish the tick; when `capture` is set, block until the composited frame
    /// is readable and return it.
    fn end_frame(&mut self, capture: bool) -> Result<Option<Frame>, BackendError>;
}

/// Run one full tick on `backend` in `TICK_STAGES` order.
pub fn execute(
    backend: &mut dyn RenderBackend,
    params: &FrameParams,
    capture: bool,
) -> Result<Option<Frame>, BackendError> {
    backend.begin_frame(params)?;
    for stage in TICK_STAGES {
        backend.run_stage(stage, params)?;
    }
    backend.end_frame(capture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::TimelineDirector;

    #[test]
    fn stage_order_is_fixed() {
        let labels: Vec<_> = TICK_STAGES.iter().map(|s| s.label()).collect();
        assert_eq!(
            labels,
            [
                "simulate",
                "diffuse",
                "overlay",
                "render-particles",
                "bloom-extract",
                "bloom-blur-h",
                "bloom-blur-v",
                "composite",
            ]
        );
    }

    fn inputs<'a>(
        preset: &'a VisualPreset,
        settings: &'a RenderSettings,
        audio: AudioReactiveSnapshot,
    ) -> TickInputs<'a> {
        TickInputs {
            delta_time: 1.0 / 60.0,
            time: 2.0,
            touch: None,
            audio,
            timeline: TimelineDirector::standard().state(2.0, audio.amplitude),
            preset,
            settings,
        }
    }

    #[test]
    fn build_maps_touch_and_gain() {
        let preset = VisualPreset::default_preset();
        let settings = RenderSettings::default();
        let mut i = inputs(preset, &settings, AudioReactiveSnapshot::SILENT);
        i.touch = Some([0.25, -0.5]);
        let p = FrameParams::build(&i);
        assert_eq!(p.uniforms.force_active, 1);
        assert_eq!(p.uniforms.force_position, [0.25, -0.5]);
        assert!(
            (p.uniforms.force_gain - preset.force_response * i.timeline.force_multiplier).abs()
                < 1e-6
        );
        assert_eq!(p.uniforms.preset_noise_scale, preset.noise_scale);
        assert_eq!(p.text_visibility, i.timeline.text_visibility);

        i.touch = None;
        assert_eq!(FrameParams::build(&i).uniforms.force_active, 0);
    }

    #[test]
    fn bloom_mix_uses_preset_base_and_boost() {
        let preset = VisualPreset::default_preset();
        let settings = RenderSettings::default();
        let mut i = inputs(preset, &settings, AudioReactiveSnapshot::SILENT);
        i.timeline.bloom_gain = 1.0;
        let p = FrameParams::build(&i);
        let expected = settings.bloom_strength * preset.base_bloom + settings.base_bloom_boost;
        assert!((p.composite.bloom_mix - expected).abs() < 1e-6);
    }

    #[test]
    fn glow_rises_with_amplitude() {
        let preset = VisualPreset::default_preset();
        let settings = RenderSettings::default();
        let quiet = FrameParams::build(&inputs(preset, &settings, AudioReactiveSnapshot::SILENT));
        let loud = FrameParams::build(&inputs(
            preset,
            &settings,
            AudioReactiveSnapshot {
                amplitude: 1.0,
                ..Default::default()
            },
        ));
        assert!(loud.look.glow > quiet.look.glow);
        assert_eq!(quiet.look.glow, settings.particle_intensity);
    }

    #[test]
    fn transient_errors_are_flagged() {
        assert!(BackendError::Transient("lost".into()).is_transient());
        assert!(!BackendError::Setup("oom".into()).is_transient());
    }
}
