use bytemuck::{Pod, Zeroable};

use crate::config::RenderSettings;

/// One pool slot: 16 bytes (2 x vec2f). Positions live in `[-1, 1]²`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: [f32; 2],
    pub velocity: [f32; 2],
}

/// Per-tick bundle: 64 bytes.
/// Must be kept in sync with the WGSL `FrameUniforms` struct.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    // Time + touch (16 bytes)
    pub delta_time: f32,
    pub time: f32,
    pub force_position: [f32; 2],

    // Touch gain + audio (16 bytes)
    pub force_active: u32,
    pub force_gain: f32,
    pub noise_jitter: f32,
    pub kick_pulse: f32,

    // Audio + preset (16 bytes)
    pub snare_pulse: f32,
    pub amplitude: f32,
    pub beat_phase: f32,
    pub preset_noise_scale: f32,

    // Pool (16 bytes)
    pub active_count: u32,
    pub _pad: [u32; 3],
}

impl FrameUniforms {
    pub fn is_force_active(&self) -> bool {
        self.force_active != 0
    }
}

/// Integrator tunables: 32 bytes. Constant across ticks until settings change.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct SimParams {
    pub force_strength: f32,
    pub force_radius: f32,
    pub viscosity: f32,
    pub noise_amount: f32,
    pub amplitude_noise: f32,
    pub kick_impulse: f32,
    pub snare_impulse: f32,
    /// Half-extent of the square domain.
    pub bound: f32,
}

impl SimParams {
    pub fn from_settings(s: &RenderSettings) -> Self {
        Self {
            force_strength: s.force_strength,
            force_radius: s.force_radius,
            viscosity: s.viscosity,
            noise_amount: s.noise_amount,
            amplitude_noise: s.amplitude_noise,
            kick_impulse: s.kick_impulse,
            snare_impulse: s.snare_impulse,
            bound: 1.0,
        }
    }
}

impl Default for SimParams {
    fn default() -> Self {
        Self::from_settings(&RenderSettings::default())
    }
}
