//! Procedural drum samples. Rendered once per `Preparing` phase, then mixed
//! by the reactive core; nothing is loaded from disk.

use std::f32::consts::TAU;

use crate::preset::DrumKitId;

/// Synthesis constants for one kit flavour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KitParams {
    pub kick_start_hz: f32,
    pub kick_end_hz: f32,
    /// Pitch sweep time constant (s).
    pub kick_sweep: f32,
    /// Amplitude time constant (s).
    pub kick_decay: f32,
    pub snare_tone_hz: f32,
    pub snare_decay: f32,
    /// 0 = pure tone, 1 = pure noise.
    pub snare_noise: f32,
    pub hat_decay: f32,
    pub hat_level: f32,
    /// tanh drive applied to every voice; 1.0 is nearly clean.
    pub drive: f32,
    /// Quantization bits, 0 disables crushing.
    pub crush_bits: u32,
}

impl DrumKitId {
    pub fn params(self) -> KitParams {
        match self {
            DrumKitId::Electro => KitParams {
                kick_start_hz: 160.0,
                kick_end_hz: 48.0,
                kick_sweep: 0.035,
                kick_decay: 0.16,
                snare_tone_hz: 190.0,
                snare_decay: 0.11,
                snare_noise: 0.7,
                hat_decay: 0.025,
                hat_level: 0.25,
                drive: 1.6,
                crush_bits: 0,
            },
            DrumKitId::Acoustic => KitParams {
                kick_start_hz: 110.0,
                kick_end_hz: 55.0,
                kick_sweep: 0.02,
                kick_decay: 0.22,
                snare_tone_hz: 220.0,
                snare_decay: 0.16,
                snare_noise: 0.55,
                hat_decay: 0.04,
                hat_level: 0.2,
                drive: 1.0,
                crush_bits: 0,
            },
            DrumKitId::Lofi => KitParams {
                kick_start_hz: 130.0,
                kick_end_hz: 45.0,
                kick_sweep: 0.05,
                kick_decay: 0.2,
                snare_tone_hz: 175.0,
                snare_decay: 0.13,
                snare_noise: 0.8,
                hat_decay: 0.03,
                hat_level: 0.18,
                drive: 2.2,
                crush_bits: 6,
            },
        }
    }
}

/// Rendered one-shot samples for each voice, mono, at `sample_rate`.
#[derive(Debug, Clone)]
pub struct DrumKit {
    pub id: DrumKitId,
    pub sample_rate: u32,
    pub kick: Vec<f32>,
    pub snare: Vec<f32>,
    pub hat: Vec<f32>,
}

/// Which sample a voice plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Voice {
    Kick,
    Snare,
    Hat,
}

impl DrumKit {
    /// Render all voices. The same `(id, sample_rate, seed)` always yields
    /// identical samples.
    pub fn synthesize(id: DrumKitId, sample_rate: u32, seed: u64) -> Self {
        let params = id.params();
        let sr = sample_rate.max(8000) as f32;
        let mut rng = fastrand::Rng::with_seed(seed);

        let kick = render_kick(&params, sr);
        let snare = render_snare(&params, sr, &mut rng);
        let hat = render_hat(&params, sr, &mut rng);

        Self {
            id,
            sample_rate,
            kick: finish(kick, &params),
            snare: finish(snare, &params),
            hat: finish(hat, &params),
        }
    }

    pub fn sample(&self, voice: Voice) -> &[f32] {
        match voice {
            Voice::Kick => &self.kick,
            Voice::Snare => &self.snare,
            Voice::Hat => &self.hat,
        }
    }
}

fn sample_count(seconds: f32, sr: f32) -> usize {
    (seconds * sr).ceil().max(1.0) as usize
}

fn render_kick(p: &KitParams, sr: f32) -> Vec<f32> {
    let len = sample_count(p.kick_decay * 6.0, sr);
    let mut phase = 0.0f32;
    (0..len)
        .map(|i| {
            let t = i as f32 / sr;
            let freq = p.kick_end_hz + (p.kick_start_hz - p.kick_end_hz) * (-t / p.kick_sweep).exp();
            phase = (phase + freq / sr).fract();
            let amp = (-t / p.kick_decay).exp();
            (phase * TAU).sin() * amp
        })
        .collect()
}

fn render_snare(p: &KitParams, sr: f32, rng: &mut fastrand::Rng) -> Vec<f32> {
    let len = sample_count(p.snare_decay * 6.0, sr);
    (0..len)
        .map(|i| {
            let t = i as f32 / sr;
            let tone = (TAU * p.snare_tone_hz * t).sin() * (-t / (p.snare_decay * 0.6)).exp();
            let noise = (rng.f32() * 2.0 - 1.0) * (-t / p.snare_decay).exp();
            tone * (1.0 - p.snare_noise) + noise * p.snare_noise
        })
        .collect()
}

fn render_hat(p: &KitParams, sr: f32, rng: &mut fastrand::Rng) -> Vec<f32> {
    let len = sample_count(p.hat_decay * 6.0, sr);
    // One-pole high-pass keeps only the bright part of the noise.
    let mut prev_in = 0.0f32;
    let mut prev_out = 0.0f32;
    let a = 0.85f32;
    (0..len)
        .map(|i| {
            let t = i as f32 / sr;
            let x = rng.f32() * 2.0 - 1.0;
            let y = a * (prev_out + x - prev_in);
            prev_in = x;
            prev_out = y;
            y * (-t / p.hat_decay).exp() * p.hat_level
        })
        .collect()
}

fn finish(mut samples: Vec<f32>, p: &KitParams) -> Vec<f32> {
    let norm = p.drive.tanh().max(1e-3);
    for s in &mut samples {
        let mut v = (*s * p.drive).tanh() / norm;
        if p.crush_bits > 0 {
            let levels = (1u32 << p.crush_bits) as f32;
            v = (v * levels).round() / levels;
        }
        *s = v.clamp(-1.0, 1.0);
    }
    samples
}
