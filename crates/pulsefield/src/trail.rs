//! Persistent trails: two HDR buffers swapped every tick. Each tick the
//! previous frame is diffused and decayed into the other buffer, the overlay
//! and particles are added on top, then the roles flip.

use rayon::prelude::*;

use crate::preset::Palette;
use crate::raster::HdrImage;
use crate::sim::Particle;

/// Per-tick diffusion/decay factors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailParams {
    /// 0 keeps the center pixel, 1 replaces it with the neighbor average.
    pub diffusion: f32,
    /// Multiplier applied after diffusion; 1 keeps energy.
    pub dissipation: f32,
}

/// How particles are colored and weighted when splatted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleLook {
    pub palette: Palette,
    /// Per-particle energy after amplitude response.
    pub glow: f32,
    /// Speed that maps to the palette's `fast` end is `1 / speed_scale`.
    pub speed_scale: f32,
    pub point_size: f32,
}

impl ParticleLook {
    /// Premultiplied contribution of a particle moving at `speed`.
    pub fn color(&self, speed: f32) -> [f32; 4] {
        let [r, g, b] = self.palette.color_at(speed * self.speed_scale);
        [r * self.glow, g * self.glow, b * self.glow, self.glow]
    }
}

/// `glow = intensity · (1 + bloom_response · amplitude)`.
pub fn particle_glow(intensity: f32, bloom_response: f32, amplitude: f32) -> f32 {
    intensity * (1.0 + bloom_response * amplitude)
}

/// Normalized domain coordinates to continuous pixel coordinates.
/// `+y` is up in the domain and down in the image.
#[inline]
pub fn to_pixel(position: [f32; 2], width: u32, height: u32) -> (f32, f32) {
    (
        (position[0] + 1.0) * 0.5 * width as f32,
        (1.0 - position[1]) * 0.5 * height as f32,
    )
}

/// One diffused, decayed pixel from its 5-point neighborhood.
#[inline]
pub fn diffuse_pixel(
    center: [f32; 4],
    left: [f32; 4],
    right: [f32; 4],
    up: [f32; 4],
    down: [f32; 4],
    params: &TrailParams,
) -> [f32; 4] {
    std::array::from_fn(|i| {
        let neighbors = (left[i] + right[i] + up[i] + down[i]) * 0.25;
        let diffused = center[i] + (neighbors - center[i]) * params.diffusion;
        diffused * params.dissipation
    })
}

pub struct TrailAccumulator {
    buffers: [HdrImage; 2],
    /// Index of the buffer holding the latest completed frame.
    current: usize,
}

impl TrailAccumulator {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buffers: [HdrImage::new(width, height), HdrImage::new(width, height)],
            current: 0,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.buffers[0].size()
    }

    /// Reallocate both buffers; history is dropped.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.buffers = [HdrImage::new(width, height), HdrImage::new(width, height)];
        self.current = 0;
    }

    pub fn clear(&mut self) {
        for b in &mut self.buffers {
            b.clear();
        }
    }

    /// Latest completed frame (read side).
    pub fn current(&self) -> &HdrImage {
        &self.buffers[self.current]
    }

    /// Frame being built this tick (write side).
    pub fn target(&self) -> &HdrImage {
        &self.buffers[1 - self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    fn split(&mut self) -> (&HdrImage, &mut HdrImage) {
        let [a, b] = &mut self.buffers;
        if self.current == 0 {
            (&*a, b)
        } else {
            (&*b, a)
        }
    }

    /// Diffuse and decay `current` into `target`, overwriting it.
    pub fn diffuse(&mut self, params: &TrailParams) {
        let (src, dst) = self.split();
        let width = dst.width() as usize;
        dst.rows_mut().enumerate().for_each(|(y, row)| {
            let y = y as i64;
            for (x, out) in row.iter_mut().enumerate().take(width) {
                let x = x as i64;
                *out = diffuse_pixel(
                    src.get_clamped(x, y),
                    src.get_clamped(x - 1, y),
                    src.get_clamped(x + 1, y),
                    src.get_clamped(x, y - 1),
                    src.get_clamped(x, y + 1),
                    params,
                );
            }
        });
    }

    /// Add the premultiplied overlay scaled by `visibility` into `target`.
    /// A differently sized overlay is resampled bilinearly.
    pub fn add_overlay(&mut self, overlay: &HdrImage, visibility: f32) {
        if visibility <= 0.0 || overlay.pixels().is_empty() {
            return;
        }
        let (_, dst) = self.split();
        let (w, h) = dst.size();
        let same_size = overlay.size() == (w, h);
        dst.rows_mut().enumerate().for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let o = if same_size {
                    overlay.get(x as u32, y as u32)
                } else {
                    overlay.sample_bilinear(
                        (x as f32 + 0.5) / w as f32,
                        (y as f32 + 0.5) / h as f32,
                    )
                };
                for (d, s) in out.iter_mut().zip(o) {
                    *d += s * visibility;
                }
            }
        });
    }

    /// Additively splat every particle into `target` with a bilinear 2x2
    /// footprint scaled by the point area.
    pub fn splat_particles(&mut self, particles: &[Particle], look: &ParticleLook) {
        let (_, dst) = self.split();
        let (w, h) = dst.size();
        if w == 0 || h == 0 {
            return;
        }
        let area = look.point_size * look.point_size;
        for p in particles {
            let speed = (p.velocity[0] * p.velocity[0] + p.velocity[1] * p.velocity[1]).sqrt();
            let color = look.color(speed).map(|c| c * area);
            let (px, py) = to_pixel(p.position, w, h);
            let fx = px - 0.5;
            let fy = py - 0.5;
            let x0 = fx.floor();
            let y0 = fy.floor();
            let tx = fx - x0;
            let ty = fy - y0;
            let taps = [
                (0, 0, (1.0 - tx) * (1.0 - ty)),
                (1, 0, tx * (1.0 - ty)),
                (0, 1, (1.0 - tx) * ty),
                (1, 1, tx * ty),
            ];
            for (ox, oy, weight) in taps {
                let x = x0 as i64 + ox;
                let y = y0 as i64 + oy;
                if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 || weight <= 0.0 {
                    continue;
                }
                dst.add(x as u32, y as u32, color.map(|c| c * weight));
            }
        }
    }

    /// Make `target` the current frame.
    pub fn flip(&mut self) {
        self.current = 1 - self.current;
    }
}
