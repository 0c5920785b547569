use std::f32::consts::PI;

use crate::config::SeedLayout;

use super::types::Particle;

/// Seeded particles stay inside this radius so the first tick does not
/// reflect anything.
const SEED_EXTENT: f32 = 0.9;

pub fn seed(layout: SeedLayout, count: usize) -> Vec<Particle> {
    match layout {
        SeedLayout::Grid => seed_grid(count),
        SeedLayout::Disk => seed_disk(count),
    }
}

/// Row-major square grid covering `[-0.9, 0.9]²`.
pub fn seed_grid(count: usize) -> Vec<Particle> {
    let side = (count as f32).sqrt().ceil().max(1.0) as usize;
    let step = if side > 1 {
        2.0 * SEED_EXTENT / (side - 1) as f32
    } else {
        0.0
    };
    (0..count)
        .map(|i| {
            let col = (i % side) as f32;
            let row = (i / side) as f32;
            let x = if side > 1 { -SEED_EXTENT + col * step } else { 0.0 };
            let y = if side > 1 { SEED_EXTENT - row * step } else { 0.0 };
            Particle {
                position: [x, y],
                velocity: [0.0, 0.0],
            }
        })
        .collect()
}

/// Golden-angle spiral: uniform area density inside a disk of radius 0.9.
pub fn seed_disk(count: usize) -> Vec<Particle> {
    let golden = PI * (3.0 - 5.0f32.sqrt());
    (0..count)
        .map(|i| {
            let r = SEED_EXTENT * ((i as f32 + 0.5) / count as f32).sqrt();
            let theta = i as f32 * golden;
            Particle {
                position: [r * theta.cos(), r * theta.sin()],
                velocity: [0.0, 0.0],
            }
        })
        .collect()
}
