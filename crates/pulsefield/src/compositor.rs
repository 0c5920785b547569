//! Bloom and final composite on the CPU: half-resolution bright pass, separable
//! Gaussian blur, then `base + bloom`, Reinhard tone map and gamma.

use rayon::prelude::*;

use crate::audio::AudioReactiveSnapshot;
use crate::raster::{Frame, HdrImage};

/// Audio weighting inside `bloom_boost`.
const KICK_BOOST: f32 = 0.5;
const SNARE_BOOST: f32 = 0.25;
const AMPLITUDE_BOOST: f32 = 0.35;

/// `base_bloom_boost · bloom_gain · (1 + 0.5·kick + 0.25·snare + 0.35·amplitude)`.
pub fn bloom_boost(base_bloom_boost: f32, bloom_gain: f32, audio: &AudioReactiveSnapshot) -> f32 {
    base_bloom_boost
        * bloom_gain
        * (1.0
            + KICK_BOOST * audio.kick_pulse
            + SNARE_BOOST * audio.snare_pulse
            + AMPLITUDE_BOOST * audio.amplitude)
}

/// Factor applied to the blurred bloom before it is added to the base.
pub fn bloom_mix(bloom_strength: f32, preset_base_bloom: f32, boost: f32) -> f32 {
    bloom_strength * preset_base_bloom + boost
}

/// Normalized weights for `2·radius + 1` taps, center first at index `radius`.
pub fn gaussian_kernel(radius: u32, sigma: f32) -> Vec<f32> {
    let sigma = sigma.max(1e-3);
    let r = radius as i32;
    let mut weights: Vec<f32> = (-r..=r)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Half-resolution size used by the bloom chain.
pub fn bloom_size(width: u32, height: u32) -> (u32, u32) {
    ((width / 2).max(1), (height / 2).max(1))
}

/// 2x2 box downsample of `src` into `dst`, keeping `max(c - threshold, 0)`.
pub fn bright_pass_downsample(src: &HdrImage, threshold: f32, dst: &mut HdrImage) {
    let scale_x = src.width() as f32 / dst.width().max(1) as f32;
    let scale_y = src.height() as f32 / dst.height().max(1) as f32;
    dst.rows_mut().enumerate().for_each(|(y, row)| {
        let sy = (y as f32 * scale_y) as i64;
        for (x, out) in row.iter_mut().enumerate() {
            let sx = (x as f32 * scale_x) as i64;
            let a = src.get_clamped(sx, sy);
            let b = src.get_clamped(sx + 1, sy);
            let c = src.get_clamped(sx, sy + 1);
            let d = src.get_clamped(sx + 1, sy + 1);
            *out = std::array::from_fn(|i| {
                let avg = (a[i] + b[i] + c[i] + d[i]) * 0.25;
                (avg - threshold).max(0.0)
            });
        }
    });
}

fn blur(src: &HdrImage, kernel: &[f32], dst: &mut HdrImage, dx: i64, dy: i64) {
    let radius = (kernel.len() / 2) as i64;
    dst.rows_mut().enumerate().for_each(|(y, row)| {
        let y = y as i64;
        for (x, out) in row.iter_mut().enumerate() {
            let x = x as i64;
            let mut acc = [0.0f32; 4];
            for (k, &w) in kernel.iter().enumerate() {
                let o = k as i64 - radius;
                let s = src.get_clamped(x + o * dx, y + o * dy);
                for i in 0..4 {
                    acc[i] += s[i] * w;
                }
            }
            *out = acc;
        }
    });
}

pub fn blur_horizontal(src: &HdrImage, kernel: &[f32], dst: &mut HdrImage) {
    blur(src, kernel, dst, 1, 0);
}

pub fn blur_vertical(src: &HdrImage, kernel: &[f32], dst: &mut HdrImage) {
    blur(src, kernel, dst, 0, 1);
}

/// Reinhard then gamma, to an 8-bit channel value.
#[inline]
pub fn tonemap_channel(hdr: f32, gamma: f32) -> u8 {
    let hdr = hdr.max(0.0);
    let mapped = hdr / (hdr + 1.0);
    let encoded = mapped.powf(1.0 / gamma);
    (encoded * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Inputs of the final composite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeParams {
    /// `bloom_mix(..)` for this tick.
    pub bloom_mix: f32,
    pub gamma: f32,
}

/// `hdr = base + bloom·mix`, tone mapped into `out`. `bloom` may be any size
/// and is sampled bilinearly.
pub fn composite(base: &HdrImage, bloom: &HdrImage, params: &CompositeParams, out: &mut Frame) {
    let (w, h) = base.size();
    out.width = w;
    out.height = h;
    out.rgba.resize(w as usize * h as usize * 4, 0);
    out.rgba
        .par_chunks_mut(w.max(1) as usize * 4)
        .enumerate()
        .for_each(|(y, row)| {
            let v = (y as f32 + 0.5) / h as f32;
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let u = (x as f32 + 0.5) / w as f32;
                let b = base.get(x as u32, y as u32);
                let bl = bloom.sample_bilinear(u, v);
                for i in 0..3 {
                    px[i] = tonemap_channel(b[i] + bl[i] * params.bloom_mix, params.gamma);
                }
                px[3] = 255;
            }
        });
}

/// Bloom working set sized to half the trail resolution.
pub struct FrameCompositor {
    extract: HdrImage,
    blur_h: HdrImage,
    blur_v: HdrImage,
    kernel: Vec<f32>,
    kernel_key: (u32, u32),
}

impl FrameCompositor {
    pub fn new(width: u32, height: u32) -> Self {
        let (bw, bh) = bloom_size(width, height);
        Self {
            extract: HdrImage::new(bw, bh),
            blur_h: HdrImage::new(bw, bh),
            blur_v: HdrImage::new(bw, bh),
            kernel: vec![1.0],
            kernel_key: (0, 0),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        *self = Self {
            kernel: std::mem::take(&mut self.kernel),
            kernel_key: self.kernel_key,
            ..Self::new(width, height)
        };
    }

    pub fn bloom_size(&self) -> (u32, u32) {
        self.extract.size()
    }

    /// Blurred bloom after the V pass.
    pub fn bloom(&self) -> &HdrImage {
        &self.blur_v
    }

    pub fn extract(&mut self, base: &HdrImage, threshold: f32) {
        bright_pass_downsample(base, threshold, &mut self.extract);
    }

    fn kernel(&mut self, radius: u32, sigma: f32) -> &[f32] {
        let key = (radius, sigma.to_bits());
        if key != self.kernel_key {
            self.kernel = gaussian_kernel(radius, sigma);
            self.kernel_key = key;
        }
        &self.kernel
    }

    pub fn blur_h(&mut self, radius: u32, sigma: f32) {
        self.kernel(radius, sigma);
        blur_horizontal(&self.extract, &self.kernel, &mut self.blur_h);
    }

    pub fn blur_v(&mut self, radius: u32, sigma: f32) {
        self.kernel(radius, sigma);
        blur_vertical(&self.blur_h, &self.kernel, &mut self.blur_v);
    }

    pub fn composite(&self, base: &HdrImage, params: &CompositeParams, out: &mut Frame) {
        composite(base, &self.blur_v, params, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderSettings;
    use crate::preset::VisualPreset;

    #[test]
    fn boost_equals_base_when_silent_at_unit_gain() {
        let preset = VisualPreset::default_preset();
        assert_eq!(preset.base_bloom, 1.35);
        assert_eq!(preset.bloom_response, 0.35);
        let settings = RenderSettings::default();
        let boost = bloom_boost(
            settings.base_bloom_boost,
            1.0,
            &AudioReactiveSnapshot::SILENT,
        );
        assert_eq!(boost, settings.base_bloom_boost);
    }

    #[test]
    fn boost_grows_with_audio() {
        let loud = AudioReactiveSnapshot {
            kick_pulse: 1.0,
            snare_pulse: 1.0,
            amplitude: 1.0,
            ..Default::default()
        };
        let b = bloom_boost(0.6, 1.0, &loud);
        assert!((b - 0.6 * 2.1).abs() < 1e-6);
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(6, 3.0);
        assert_eq!(k.len(), 13);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        for i in 0..6 {
            assert!((k[i] - k[12 - i]).abs() < 1e-7);
        }
        assert!(k[6] > k[5]);
    }

    #[test]
    fn zero_radius_kernel_is_identity() {
        assert_eq!(gaussian_kernel(0, 2.0), vec![1.0]);
    }

    #[test]
    fn bright_pass_thresholds_and_halves() {
        let src = HdrImage::filled(8, 6, [1.5, 0.5, 0.8, 1.0]);
        let (bw, bh) = bloom_size(8, 6);
        let mut dst = HdrImage::new(bw, bh);
        bright_pass_downsample(&src, 0.8, &mut dst);
        assert_eq!(dst.size(), (4, 3));
        let p = dst.get(1, 1);
        assert!((p[0] - 0.7).abs() < 1e-6);
        assert_eq!(p[1], 0.0);
        assert!(p[2] < 1e-6);
    }

    #[test]
    fn blur_preserves_uniform_field() {
        let src = HdrImage::filled(5, 4, [0.3, 0.3, 0.3, 0.3]);
        let k = gaussian_kernel(3, 1.5);
        let mut h = HdrImage::new(5, 4);
        let mut v = HdrImage::new(5, 4);
        blur_horizontal(&src, &k, &mut h);
        blur_vertical(&h, &k, &mut v);
        assert!(v.pixels().iter().all(|p| (p[0] - 0.3).abs() < 1e-5));
    }

    #[test]
    fn blur_spreads_energy() {
        let mut src = HdrImage::new(9, 1);
        src.add(4, 0, [1.0; 4]);
        let k = gaussian_kernel(2, 1.0);
        let mut dst = HdrImage::new(9, 1);
        blur_horizontal(&src, &k, &mut dst);
        assert!(dst.get(3, 0)[0] > 0.0);
        assert!(dst.get(4, 0)[0] < 1.0);
        let total: f32 = dst.pixels().iter().map(|p| p[0]).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn tonemap_curve() {
        assert_eq!(tonemap_channel(0.0, 2.2), 0);
        assert_eq!(tonemap_channel(-3.0, 2.2), 0);
        // Reinhard(1) = 0.5, linear gamma
        assert_eq!(tonemap_channel(1.0, 1.0), 128);
        assert!(tonemap_channel(1e6, 2.2) >= 254);
    }

    #[test]
    fn composite_adds_scaled_bloom() {
        let base = HdrImage::filled(4, 4, [0.5, 0.5, 0.5, 1.0]);
        let bloom = HdrImage::filled(2, 2, [0.5, 0.0, 0.0, 0.0]);
        let mut out = Frame::new(0, 0);
        composite(
            &base,
            &bloom,
            &CompositeParams {
                bloom_mix: 1.0,
                gamma: 1.0,
            },
            &mut out,
        );
        assert_eq!((out.width, out.height), (4, 4));
        let px = out.pixel(2, 2);
        // r: 1.0 -> 0.5, g: 0.5 -> 1/3
        assert_eq!(px[0], 128);
        assert_eq!(px[1], 85);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn compositor_chain_runs_at_half_resolution() {
        let mut c = FrameCompositor::new(16, 10);
        assert_eq!(c.bloom_size(), (8, 5));
        let base = HdrImage::filled(16, 10, [2.0, 2.0, 2.0, 1.0]);
        c.extract(&base, 1.0);
        c.blur_h(4, 2.0);
        c.blur_v(4, 2.0);
        assert!(c.bloom().pixels().iter().all(|p| (p[0] - 1.0).abs() < 1e-4));
        c.resize(4, 4);
        assert_eq!(c.bloom_size(), (2, 2));
    }
}
