use std::f32::consts::LN_2;

/// Default impulse half-life in seconds.
pub const IMPULSE_HALF_LIFE: f32 = 0.08;
/// Default EMA factor for the RMS smoother.
pub const RMS_SMOOTHING: f32 = 0.15;

/// Percussive impulse: jumps to exactly 1.0 on trigger and halves every
/// `half_life` seconds.
#[derive(Debug, Clone, Copy)]
pub struct Impulse {
    value: f32,
    half_life: f32,
}

impl Impulse {
    pub fn new(half_life: f32) -> Self {
        Self {
            value: 0.0,
            half_life: half_life.max(1e-4),
        }
    }

    pub fn trigger(&mut self) {
        self.value = 1.0;
    }

    /// Decay by `dt` seconds. Non-positive `dt` leaves the value unchanged.
    pub fn decay(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        self.value *= (-LN_2 * dt / self.half_life).exp();
        if self.value < 1e-6 {
            self.value = 0.0;
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

impl Default for Impulse {
    fn default() -> Self {
        Self::new(IMPULSE_HALF_LIFE)
    }
}

/// Exponential moving average over per-block RMS values.
#[derive(Debug, Clone, Copy)]
pub struct RmsSmoother {
    smoothed: f32,
    factor: f32,
}

impl RmsSmoother {
    pub fn new(factor: f32) -> Self {
        Self {
            smoothed: 0.0,
            factor: factor.clamp(0.0, 1.0),
        }
    }

    /// Fold one raw RMS reading in and return the smoothed value.
    pub fn update(&mut self, raw: f32) -> f32 {
        self.smoothed += (raw - self.smoothed) * self.factor;
        self.smoothed
    }

    pub fn value(&self) -> f32 {
        self.smoothed
    }

    pub fn reset(&mut self) {
        self.smoothed = 0.0;
    }
}

impl Default for RmsSmoother {
    fn default() -> Self {
        Self::new(RMS_SMOOTHING)
    }
}

/// Root mean square of a sample block; 0 for an empty block.
pub fn block_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_decays_monotonically() {
        let mut imp = Impulse::default();
        imp.trigger();
        let mut prev = imp.value();
        for dt in [0.001, 0.016, 0.033, 0.1, 0.25, 0.5, 1.0] {
            imp.decay(dt);
            assert!(imp.value() <= prev, "{} > {prev}", imp.value());
            prev = imp.value();
        }
        assert!(prev < 0.01);
    }

    #[test]
    fn impulse_halves_after_half_life() {
        let mut imp = Impulse::new(0.08);
        imp.trigger();
        imp.decay(0.08);
        assert!((imp.value() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn impulse_retrigger_is_exactly_one() {
        let mut imp = Impulse::default();
        imp.trigger();
        imp.decay(0.05);
        assert!(imp.value() < 1.0);
        imp.trigger();
        assert_eq!(imp.value(), 1.0);
    }

    #[test]
    fn impulse_ignores_non_positive_dt() {
        let mut imp = Impulse::default();
        imp.trigger();
        imp.decay(0.0);
        imp.decay(-1.0);
        assert_eq!(imp.value(), 1.0);
    }

    #[test]
    fn smoother_converges_monotonically() {
        let mut s = RmsSmoother::default();
        let target = 0.4;
        let mut prev_err = f32::INFINITY;
        let mut ticks = 0;
        while (s.value() - target).abs() > 1e-3 {
            s.update(target);
            let err = (s.value() - target).abs();
            assert!(err < prev_err);
            assert!(s.value() <= target);
            prev_err = err;
            ticks += 1;
            assert!(ticks < 100, "did not converge");
        }
        // (1 - 0.15)^n * 0.4 < 1e-3 after n = 37
        assert!(ticks <= 38);
    }

    #[test]
    fn block_rms_of_square_wave() {
        let samples = [0.5, -0.5, 0.5, -0.5];
        assert!((block_rms(&samples) - 0.5).abs() < 1e-6);
        assert_eq!(block_rms(&[]), 0.0);
    }
}
