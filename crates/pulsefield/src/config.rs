use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::preset::{DEFAULT_PRESET, VisualPreset};

pub const MIN_BPM: f32 = 40.0;
pub const MAX_BPM: f32 = 200.0;

/// Parameters handed over by the setup UI. Ranges are validated upstream;
/// `normalized()` clamps again before anything reaches the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_preset_key")]
    pub preset: String,
    #[serde(default = "default_bpm")]
    pub bpm: f32,
    #[serde(default)]
    pub groove: f32,
}

fn default_preset_key() -> String {
    DEFAULT_PRESET.to_string()
}

fn default_bpm() -> f32 {
    110.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            text: String::new(),
            preset: default_preset_key(),
            bpm: default_bpm(),
            groove: 0.0,
        }
    }
}

impl SessionConfig {
    pub fn normalized(&self) -> Self {
        let bpm = if self.bpm.is_finite() {
            self.bpm.clamp(MIN_BPM, MAX_BPM)
        } else {
            default_bpm()
        };
        let groove = if self.groove.is_finite() {
            self.groove.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let preset = match VisualPreset::by_key(&self.preset) {
            Some(p) => p.key.to_string(),
            None => {
                log::warn!(
                    "Unknown preset '{}', falling back to '{DEFAULT_PRESET}'",
                    self.preset
                );
                default_preset_key()
            }
        };
        Self {
            text: self.text.clone(),
            preset,
            bpm,
            groove,
        }
    }

    /// Resolve the preset record. Unknown keys resolve to the default preset.
    pub fn visual_preset(&self) -> &'static VisualPreset {
        VisualPreset::by_key(&self.preset).unwrap_or_else(VisualPreset::default_preset)
    }
}

/// Particle seeding layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedLayout {
    Grid,
    Disk,
}

/// Tunables for simulation, trails and bloom. Stored as JSON in the user
/// config directory; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "default_capacity")]
    pub particle_capacity: u32,
    #[serde(default = "default_capacity")]
    pub active_particles: u32,
    #[serde(default = "default_seed_layout")]
    pub seed_layout: SeedLayout,

    // Simulation
    #[serde(default = "default_force_strength")]
    pub force_strength: f32,
    #[serde(default = "default_force_radius")]
    pub force_radius: f32,
    #[serde(default = "default_viscosity")]
    pub viscosity: f32,
    #[serde(default = "default_noise_amount")]
    pub noise_amount: f32,
    #[serde(default = "default_amplitude_noise")]
    pub amplitude_noise: f32,
    #[serde(default = "default_kick_impulse")]
    pub kick_impulse: f32,
    #[serde(default = "default_snare_impulse")]
    pub snare_impulse: f32,

    // Particle look
    #[serde(default = "default_particle_intensity")]
    pub particle_intensity: f32,
    #[serde(default = "default_point_size")]
    pub point_size: f32,
    #[serde(default = "default_speed_scale")]
    pub speed_scale: f32,

    // Trails
    #[serde(default = "default_diffusion")]
    pub diffusion: f32,
    #[serde(default = "default_dissipation")]
    pub dissipation: f32,

    // Bloom / composite
    #[serde(default = "default_bloom_threshold")]
    pub bloom_threshold: f32,
    #[serde(default = "default_one")]
    pub bloom_strength: f32,
    #[serde(default = "default_base_bloom_boost")]
    pub base_bloom_boost: f32,
    #[serde(default = "default_blur_radius")]
    pub blur_radius: u32,
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
    #[serde(default = "default_gamma")]
    pub gamma: f32,
}

fn default_capacity() -> u32 {
    32768
}
fn default_seed_layout() -> SeedLayout {
    SeedLayout::Disk
}
fn default_force_strength() -> f32 {
    2.5
}
fn default_force_radius() -> f32 {
    0.35
}
fn default_viscosity() -> f32 {
    0.96
}
fn default_noise_amount() -> f32 {
    0.004
}
fn default_amplitude_noise() -> f32 {
    0.5
}
fn default_kick_impulse() -> f32 {
    0.9
}
fn default_snare_impulse() -> f32 {
    0.6
}
fn default_particle_intensity() -> f32 {
    0.25
}
fn default_point_size() -> f32 {
    2.0
}
fn default_speed_scale() -> f32 {
    1.5
}
fn default_diffusion() -> f32 {
    0.2
}
fn default_dissipation() -> f32 {
    0.94
}
fn default_bloom_threshold() -> f32 {
    0.8
}
fn default_one() -> f32 {
    1.0
}
fn default_base_bloom_boost() -> f32 {
    0.6
}
fn default_blur_radius() -> u32 {
    6
}
fn default_blur_sigma() -> f32 {
    3.0
}
fn default_gamma() -> f32 {
    2.2
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            particle_capacity: default_capacity(),
            active_particles: default_capacity(),
            seed_layout: default_seed_layout(),
            force_strength: default_force_strength(),
            force_radius: default_force_radius(),
            viscosity: default_viscosity(),
            noise_amount: default_noise_amount(),
            amplitude_noise: default_amplitude_noise(),
            kick_impulse: default_kick_impulse(),
            snare_impulse: default_snare_impulse(),
            particle_intensity: default_particle_intensity(),
            point_size: default_point_size(),
            speed_scale: default_speed_scale(),
            diffusion: default_diffusion(),
            dissipation: default_dissipation(),
            bloom_threshold: default_bloom_threshold(),
            bloom_strength: default_one(),
            base_bloom_boost: default_base_bloom_boost(),
            blur_radius: default_blur_radius(),
            blur_sigma: default_blur_sigma(),
            gamma: default_gamma(),
        }
    }
}

/// Upper bound on blur taps per side, shared with the blur shader loop.
pub const MAX_BLUR_RADIUS: u32 = 32;

impl RenderSettings {
    fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("pulsefield").join("render.json"))
    }

    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str::<Self>(&json) {
                Ok(settings) => settings.sanitized(),
                Err(e) => {
                    log::warn!("Ignoring malformed {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) {
        let Some(path) = Self::path() else {
            return;
        };
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = std::fs::write(path, json);
        }
    }

    /// Clamp every field into its usable range.
    pub fn sanitized(&self) -> Self {
        let mut s = self.clone();
        s.particle_capacity = s.particle_capacity.max(1);
        s.active_particles = s.active_particles.min(s.particle_capacity);
        s.force_radius = s.force_radius.max(1e-3);
        s.viscosity = s.viscosity.clamp(0.0, 1.0);
        s.noise_amount = s.noise_amount.max(0.0);
        s.point_size = s.point_size.max(0.5);
        s.diffusion = s.diffusion.clamp(0.0, 1.0);
        s.dissipation = s.dissipation.clamp(0.0, 1.0);
        s.bloom_threshold = s.bloom_threshold.max(0.0);
        s.bloom_strength = s.bloom_strength.max(0.0);
        s.base_bloom_boost = s.base_bloom_boost.max(0.0);
        s.blur_radius = s.blur_radius.min(MAX_BLUR_RADIUS);
        s.blur_sigma = s.blur_sigma.max(0.1);
        s.gamma = s.gamma.max(0.1);
        s
    }
}
