use serde::{Deserialize, Serialize};

/// Procedural drum kit flavours. Each maps to a fixed set of synthesis
/// parameters in `audio::kit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrumKitId {
    Electro,
    Acoustic,
    Lofi,
}

/// Three linear-RGB colors plus a mix factor toward the accent color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    pub slow: [f32; 3],
    pub fast: [f32; 3],
    pub accent: [f32; 3],
    pub accent_mix: f32,
}

impl Palette {
    /// Color for a particle at normalized speed `t` (0 = resting, 1 = fast).
    pub fn color_at(&self, t: f32) -> [f32; 3] {
        let t = t.clamp(0.0, 1.0);
        let m = self.accent_mix.clamp(0.0, 1.0);
        std::array::from_fn(|i| {
            let base = self.slow[i] + (self.fast[i] - self.slow[i]) * t;
            base + (self.accent[i] - base) * m
        })
    }
}

/// Immutable look-and-feel record, addressed by `key`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualPreset {
    pub key: &'static str,
    pub name: &'static str,
    pub palette: Palette,
    /// Baseline bloom multiplier, scaled by `RenderSettings::bloom_strength`.
    pub base_bloom: f32,
    /// How strongly particle glow follows the loop amplitude.
    pub bloom_response: f32,
    /// Scales the touch force gain.
    pub force_response: f32,
    /// Spatial frequency of the idle noise field.
    pub noise_scale: f32,
    pub drum_kit: DrumKitId,
}

pub const DEFAULT_PRESET: &str = "neon";

pub static PRESETS: &[VisualPreset] = &[
    VisualPreset {
        key: "neon",
        name: "Neon",
        palette: Palette {
            slow: [0.10, 0.35, 1.00],
            fast: [1.00, 0.20, 0.85],
            accent: [0.30, 1.00, 0.90],
            accent_mix: 0.15,
        },
        base_bloom: 1.35,
        bloom_response: 0.35,
        force_response: 1.0,
        noise_scale: 3.0,
        drum_kit: DrumKitId::Electro,
    },
    VisualPreset {
        key: "ember",
        name: "Ember",
        palette: Palette {
            slow: [0.60, 0.08, 0.02],
            fast: [1.00, 0.65, 0.15],
            accent: [1.00, 0.95, 0.80],
            accent_mix: 0.10,
        },
        base_bloom: 1.10,
        bloom_response: 0.55,
        force_response: 1.25,
        noise_scale: 2.2,
        drum_kit: DrumKitId::Acoustic,
    },
    VisualPreset {
        key: "aurora",
        name: "Aurora",
        palette: Palette {
            slow: [0.05, 0.55, 0.35],
            fast: [0.40, 0.95, 0.60],
            accent: [0.55, 0.30, 1.00],
            accent_mix: 0.25,
        },
        base_bloom: 1.50,
        bloom_response: 0.25,
        force_response: 0.8,
        noise_scale: 4.5,
        drum_kit: DrumKitId::Lofi,
    },
    VisualPreset {
        key: "mono",
        name: "Mono",
        palette: Palette {
            slow: [0.55, 0.55, 0.60],
            fast: [1.00, 1.00, 1.00],
            accent: [1.00, 1.00, 1.00],
            accent_mix: 0.0,
        },
        base_bloom: 0.90,
        bloom_response: 0.45,
        force_response: 1.1,
        noise_scale: 3.5,
        drum_kit: DrumKitId::Electro,
    },
];

impl VisualPreset {
    /// Look up a preset by key (case-insensitive).
    pub fn by_key(key: &str) -> Option<&'static VisualPreset> {
        PRESETS.iter().find(|p| p.key.eq_ignore_ascii_case(key))
    }

    pub fn default_preset() -> &'static VisualPreset {
        &PRESETS[0]
    }

    pub fn keys() -> impl Iterator<Item = &'static str> {
        PRESETS.iter().map(|p| p.key)
    }
}
