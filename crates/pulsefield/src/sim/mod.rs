pub mod noise;
pub mod seed;
pub mod types;

pub use types::{FrameUniforms, Particle, SimParams};

use std::f32::consts::TAU;

use glam::Vec2;
use rayon::prelude::*;

use crate::config::{RenderSettings, SeedLayout};

/// Keeps the touch force finite at the touch point.
const FORCE_EPSILON: f32 = 1e-4;
/// Velocity factor applied on a wall bounce.
pub const BOUNCE_DAMPING: f32 = -0.6;

/// Beat-synced scale for the idle noise.
#[inline]
pub fn beat_pulse(beat_phase: f32) -> f32 {
    0.6 + 0.4 * (TAU * beat_phase).sin()
}

/// `1 - smoothstep(0, radius, d)`: 1 at the touch point, 0 at the radius.
#[inline]
pub fn falloff(d: f32, radius: f32) -> f32 {
    let t = (d / radius).clamp(0.0, 1.0);
    1.0 - t * t * (3.0 - 2.0 * t)
}

/// Mirror one coordinate back into `[-bound, bound]`.
#[inline]
fn reflect_axis(pos: &mut f32, vel: &mut f32, bound: f32) {
    if *pos > bound {
        *pos = 2.0 * bound - *pos;
        *vel *= BOUNCE_DAMPING;
    } else if *pos < -bound {
        *pos = -2.0 * bound - *pos;
        *vel *= BOUNCE_DAMPING;
    }
    // A particle more than one domain width out still lands inside.
    *pos = pos.clamp(-bound, bound);
}

pub fn reflect_bounds(p: &mut Particle, bound: f32) {
    let [px, py] = &mut p.position;
    let [vx, vy] = &mut p.velocity;
    reflect_axis(px, vx, bound);
    reflect_axis(py, vy, bound);
}

/// Advance one particle. Pure function of its own state, its pool index and
/// the shared read-only bundle.
pub fn step_particle(p: &mut Particle, id: u32, params: &SimParams, u: &FrameUniforms) {
    let dt = u.delta_time;
    let pos = Vec2::from(p.position);
    let mut vel = Vec2::from(p.velocity);

    // Repulsive touch force
    let mut touch = Vec2::ZERO;
    if u.is_force_active() {
        let delta = pos - Vec2::from(u.force_position);
        let d = delta.length();
        let magnitude =
            params.force_strength * u.force_gain * falloff(d, params.force_radius) / (d + FORCE_EPSILON);
        touch = delta * magnitude;
    }

    // Beat-synced idle drift
    let [nx, ny] = noise::field(pos.x, pos.y, u.preset_noise_scale, u.time, id);
    let noise_gain = beat_pulse(u.beat_phase)
        * params.noise_amount
        * (u.noise_jitter + params.amplitude_noise * u.amplitude);
    let drift = Vec2::new(nx, ny) * noise_gain;

    // Kick pushes outward, snare swirls
    let radial = pos.normalize_or_zero();
    let impulses = radial * (u.kick_pulse * params.kick_impulse * dt)
        + radial.perp() * (u.snare_pulse * params.snare_impulse * dt);

    vel = vel * params.viscosity + touch * dt + drift + impulses;
    p.velocity = vel.to_array();
    p.position = (pos + vel * dt).to_array();
    reflect_bounds(p, params.bound);
}

/// Step the first `u.active_count` particles in parallel.
pub fn step_particles(particles: &mut [Particle], params: &SimParams, u: &FrameUniforms) {
    let active = (u.active_count as usize).min(particles.len());
    particles[..active]
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, p)| step_particle(p, i as u32, params, u));
}

/// CPU-side particle pool. Seeded once and reused for the whole session.
pub struct ParticleSimulator {
    particles: Vec<Particle>,
    params: SimParams,
    active_count: u32,
    layout: SeedLayout,
}

impl ParticleSimulator {
    pub fn new(settings: &RenderSettings) -> Self {
        let capacity = settings.particle_capacity as usize;
        Self {
            particles: seed::seed(settings.seed_layout, capacity),
            params: SimParams::from_settings(settings),
            active_count: settings.active_particles.min(settings.particle_capacity),
            layout: settings.seed_layout,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.particles.len() as u32
    }

    pub fn active_count(&self) -> u32 {
        self.active_count
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn active(&self) -> &[Particle] {
        &self.particles[..self.active_count as usize]
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// Apply new tunables. Capacity or layout changes reseed the pool.
    pub fn apply_settings(&mut self, settings: &RenderSettings) {
        self.params = SimParams::from_settings(settings);
        if settings.particle_capacity as usize != self.particles.len()
            || settings.seed_layout != self.layout
        {
            self.layout = settings.seed_layout;
            self.particles = seed::seed(self.layout, settings.particle_capacity as usize);
        }
        self.active_count = settings.active_particles.min(self.capacity());
    }

    pub fn reseed(&mut self) {
        self.particles = seed::seed(self.layout, self.particles.len());
    }

    /// Mutate every active particle in place. `u.active_count` is clamped to
    /// the pool; a non-positive `delta_time` leaves the pool untouched.
    pub fn step(&mut self, u: &FrameUniforms) {
        if u.delta_time.is_nan() || u.delta_time <= 0.0 {
            return;
        }
        let mut u = *u;
        u.active_count = u.active_count.min(self.capacity());
        step_particles(&mut self.particles, &self.params, &u);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_params() -> SimParams {
        SimParams {
            noise_amount: 0.0,
            viscosity: 1.0,
            ..Default::default()
        }
    }

    fn uniforms(dt: f32) -> FrameUniforms {
        FrameUniforms {
            delta_time: dt,
            active_count: 1,
            preset_noise_scale: 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn reflects_past_right_wall() {
        let mut p = Particle {
            position: [1.05, 0.0],
            velocity: [1.0, 0.2],
        };
        reflect_bounds(&mut p, 1.0);
        assert!((p.position[0] - 0.95).abs() < 1e-6);
        assert!((p.velocity[0] + 0.6).abs() < 1e-6);
        assert_eq!(p.velocity[1], 0.2);
    }

    #[test]
    fn reflects_past_bottom_wall() {
        let mut p = Particle {
            position: [0.0, -1.2],
            velocity: [0.0, -2.0],
        };
        reflect_bounds(&mut p, 1.0);
        assert!((p.position[1] + 0.8).abs() < 1e-6);
        assert!((p.velocity[1] - 1.2).abs() < 1e-6);
    }

    #[test]
    fn far_outlier_lands_inside() {
        let mut p = Particle {
            position: [7.0, 0.0],
            velocity: [0.0, 0.0],
        };
        reflect_bounds(&mut p, 1.0);
        assert!(p.position[0].abs() <= 1.0);
    }

    #[test]
    fn falloff_edges() {
        assert_eq!(falloff(0.0, 0.3), 1.0);
        assert_eq!(falloff(0.3, 0.3), 0.0);
        assert_eq!(falloff(0.5, 0.3), 0.0);
        assert!((falloff(0.15, 0.3) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn touch_pushes_particle_away() {
        let params = quiet_params();
        let mut p = Particle {
            position: [0.1, 0.0],
            velocity: [0.0, 0.0],
        };
        let u = FrameUniforms {
            force_active: 1,
            force_gain: 1.0,
            force_position: [0.0, 0.0],
            ..uniforms(1.0 / 60.0)
        };
        step_particle(&mut p, 0, &params, &u);
        assert!(p.velocity[0] > 0.0);
        assert!(p.position[0] > 0.1);
        assert!(p.velocity[1].abs() < 1e-6);
    }

    #[test]
    fn touch_outside_radius_has_no_effect() {
        let params = quiet_params();
        let mut p = Particle {
            position: [0.9, 0.0],
            velocity: [0.0, 0.0],
        };
        let u = FrameUniforms {
            force_active: 1,
            force_gain: 1.0,
            ..uniforms(1.0 / 60.0)
        };
        step_particle(&mut p, 0, &params, &u);
        assert_eq!(p.velocity, [0.0, 0.0]);
    }

    #[test]
    fn kick_is_radial_snare_is_tangential() {
        let params = quiet_params();
        let start = Particle {
            position: [0.5, 0.0],
            velocity: [0.0, 0.0],
        };

        let mut kicked = start;
        step_particle(
            &mut kicked,
            0,
            &params,
            &FrameUniforms {
                kick_pulse: 1.0,
                ..uniforms(0.1)
            },
        );
        assert!(kicked.velocity[0] > 0.0);
        assert!(kicked.velocity[1].abs() < 1e-6);

        let mut snared = start;
        step_particle(
            &mut snared,
            0,
            &params,
            &FrameUniforms {
                snare_pulse: 1.0,
                ..uniforms(0.1)
            },
        );
        assert!(snared.velocity[0].abs() < 1e-6);
        assert!(snared.velocity[1] > 0.0);
    }

    #[test]
    fn viscosity_damps_velocity() {
        let params = SimParams {
            noise_amount: 0.0,
            viscosity: 0.5,
            ..Default::default()
        };
        let mut p = Particle {
            position: [0.0, 0.0],
            velocity: [0.4, 0.0],
        };
        step_particle(&mut p, 0, &params, &uniforms(0.01));
        assert!((p.velocity[0] - 0.2).abs() < 1e-6);
        assert!((p.position[0] - 0.002).abs() < 1e-6);
    }

    #[test]
    fn noise_scales_with_jitter_and_amplitude() {
        let params = SimParams {
            viscosity: 0.0,
            ..Default::default()
        };
        let at = |jitter: f32, amplitude: f32| {
            let mut p = Particle {
                position: [0.3, -0.2],
                velocity: [0.0, 0.0],
            };
            step_particle(
                &mut p,
                7,
                &params,
                &FrameUniforms {
                    noise_jitter: jitter,
                    amplitude,
                    beat_phase: 0.25,
                    ..uniforms(0.016)
                },
            );
            Vec2::from(p.velocity).length()
        };
        assert_eq!(at(0.0, 0.0), 0.0);
        assert!(at(1.0, 0.0) > 0.0);
        assert!(at(1.0, 1.0) > at(1.0, 0.0));
    }

    #[test]
    fn only_active_particles_move() {
        let settings = RenderSettings {
            particle_capacity: 64,
            active_particles: 16,
            ..Default::default()
        };
        let mut sim = ParticleSimulator::new(&settings);
        let before = sim.particles().to_vec();
        sim.step(&FrameUniforms {
            kick_pulse: 1.0,
            noise_jitter: 1.0,
            active_count: 16,
            ..uniforms(1.0 / 60.0)
        });
        let after = sim.particles();
        assert!(after[..16].iter().zip(&before[..16]).any(|(a, b)| a != b));
        assert_eq!(&after[16..], &before[16..]);
    }

    #[test]
    fn active_count_is_clamped_to_capacity() {
        let settings = RenderSettings {
            particle_capacity: 8,
            active_particles: 8,
            ..Default::default()
        };
        let mut sim = ParticleSimulator::new(&settings);
        sim.step(&FrameUniforms {
            kick_pulse: 1.0,
            active_count: 1000,
            ..uniforms(0.02)
        });
        assert!(sim.particles().iter().all(|p| p.position.iter().all(|c| c.abs() <= 1.0)));
    }

    #[test]
    fn zero_dt_is_a_no_op() {
        let mut sim = ParticleSimulator::new(&RenderSettings {
            particle_capacity: 4,
            active_particles: 4,
            ..Default::default()
        });
        let before = sim.particles().to_vec();
        sim.step(&FrameUniforms {
            kick_pulse: 1.0,
            active_count: 4,
            ..uniforms(0.0)
        });
        assert_eq!(sim.particles(), &before[..]);
    }

    #[test]
    fn settings_change_reseeds_only_on_layout_or_capacity() {
        let mut settings = RenderSettings {
            particle_capacity: 32,
            active_particles: 32,
            ..Default::default()
        };
        let mut sim = ParticleSimulator::new(&settings);
        sim.particles_mut()[0].velocity = [0.5, 0.5];

        settings.viscosity = 0.5;
        sim.apply_settings(&settings);
        assert_eq!(sim.particles()[0].velocity, [0.5, 0.5]);
        assert_eq!(sim.params().viscosity, 0.5);

        settings.seed_layout = SeedLayout::Grid;
        sim.apply_settings(&settings);
        assert_eq!(sim.particles()[0].velocity, [0.0, 0.0]);
    }
}
