//! Integer-hash value noise. The same arithmetic runs in `particle_sim.wgsl`
//! so CPU and GPU backends drift in the same direction.

/// PCG-style 32-bit hash.
#[inline]
pub fn pcg(v: u32) -> u32 {
    let state = v.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Lattice value in `[-1, 1]`.
#[inline]
fn lattice(x: i32, y: i32, seed: u32) -> f32 {
    let h = pcg((x as u32) ^ pcg((y as u32) ^ pcg(seed)));
    (h >> 8) as f32 / 16_777_215.0 * 2.0 - 1.0
}

/// Smoothly interpolated value noise in `[-1, 1]`.
pub fn value_noise(px: f32, py: f32, seed: u32) -> f32 {
    let fx = px.floor();
    let fy = py.floor();
    let ix = fx as i32;
    let iy = fy as i32;
    let tx = px - fx;
    let ty = py - fy;
    let ux = tx * tx * (3.0 - 2.0 * tx);
    let uy = ty * ty * (3.0 - 2.0 * ty);

    let a = lattice(ix, iy, seed);
    let b = lattice(ix + 1, iy, seed);
    let c = lattice(ix, iy + 1, seed);
    let d = lattice(ix + 1, iy + 1, seed);

    let top = a + (b - a) * ux;
    let bottom = c + (d - c) * ux;
    top + (bottom - top) * uy
}

/// Drift speed of the noise field through time.
const TIME_DRIFT: [f32; 2] = [0.5, -0.37];

/// 2D noise vector for particle `id` at `(x, y)` scaled by `scale`.
pub fn field(x: f32, y: f32, scale: f32, time: f32, id: u32) -> [f32; 2] {
    let qx = x * scale + time * TIME_DRIFT[0];
    let qy = y * scale + time * TIME_DRIFT[1];
    let seed = id.wrapping_mul(2);
    [
        value_noise(qx, qy, seed),
        value_noise(qx, qy, seed.wrapping_add(1)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_bounded() {
        for i in 0..2000 {
            let x = i as f32 * 0.173 - 50.0;
            let y = i as f32 * -0.091 + 20.0;
            let v = value_noise(x, y, i);
            assert!((-1.0..=1.0).contains(&v), "{v}");
        }
    }

    #[test]
    fn noise_is_continuous_across_cells() {
        let left = value_noise(2.0 - 1e-4, 0.5, 9);
        let right = value_noise(2.0 + 1e-4, 0.5, 9);
        assert!((left - right).abs() < 1e-2);
    }

    #[test]
    fn noise_matches_lattice_at_integers() {
        assert_eq!(value_noise(3.0, -4.0, 5), lattice(3, -4, 5));
    }

    #[test]
    fn field_varies_by_particle() {
        let a = field(0.1, 0.2, 3.0, 1.0, 0);
        let b = field(0.1, 0.2, 3.0, 1.0, 1);
        assert_ne!(a, b);
        assert_eq!(a, field(0.1, 0.2, 3.0, 1.0, 0));
    }
}
