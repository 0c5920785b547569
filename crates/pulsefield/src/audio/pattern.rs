//! Sixteen-step drum pattern and the timer-driven sequencer that walks it.

pub const STEPS_PER_BAR: u32 = 16;
pub const KICK_STEPS: [u32; 4] = [0, 4, 8, 12];
pub const SNARE_STEPS: [u32; 2] = [4, 12];
/// Swing shift of odd steps at `groove = 1`, as a fraction of one step.
pub const SWING_FRACTION: f32 = 0.5;

/// Which voices fire on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepTriggers {
    pub kick: bool,
    pub snare: bool,
    pub hat: bool,
    pub accent: bool,
}

/// Tempo and swing for the fixed four-on-the-floor pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrumPattern {
    pub bpm: f32,
    pub groove: f32,
}

impl DrumPattern {
    pub fn new(bpm: f32, groove: f32) -> Self {
        Self {
            bpm: bpm.max(1.0),
            groove: groove.clamp(0.0, 1.0),
        }
    }

    /// Seconds per sixteenth note: `60 / bpm / 4`.
    pub fn step_duration(&self) -> f32 {
        60.0 / self.bpm / 4.0
    }

    pub fn bar_duration(&self) -> f32 {
        self.step_duration() * STEPS_PER_BAR as f32
    }

    /// Maximum swing shift in seconds (reached at `groove = 1`).
    pub fn swing_scale(&self) -> f32 {
        self.step_duration() * SWING_FRACTION
    }

    /// Onset of `step` relative to the start of its bar, swing included.
    pub fn step_time(&self, step: u32) -> f32 {
        let step = step % STEPS_PER_BAR;
        let straight = step as f32 * self.step_duration();
        if step % 2 == 1 {
            straight + self.groove * self.swing_scale()
        } else {
            straight
        }
    }

    pub fn triggers(&self, step: u32) -> StepTriggers {
        let step = step % STEPS_PER_BAR;
        StepTriggers {
            kick: KICK_STEPS.contains(&step),
            snare: SNARE_STEPS.contains(&step),
            hat: true,
            accent: step % 4 == 0,
        }
    }
}

/// A step that fired during an `advance` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepEvent {
    pub step: u32,
    pub bar: u32,
    pub triggers: StepTriggers,
    /// Seconds from the start of the advanced block to the onset.
    pub offset: f32,
}

/// Walks the pattern in discrete timer ticks. Every step whose onset falls in
/// `(block_start, block_end]` fires during that tick; the step at t = 0 fires
/// on the first tick.
#[derive(Debug, Clone)]
pub struct StepSequencer {
    pattern: DrumPattern,
    elapsed: f64,
    next_step: u64,
    current_step: Option<u64>,
}

impl StepSequencer {
    pub fn new(pattern: DrumPattern) -> Self {
        Self {
            pattern,
            elapsed: 0.0,
            next_step: 0,
            current_step: None,
        }
    }

    pub fn pattern(&self) -> &DrumPattern {
        &self.pattern
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Absolute onset time of the `index`-th step since start.
    fn onset(&self, index: u64) -> f64 {
        let bar = index / STEPS_PER_BAR as u64;
        let step = (index % STEPS_PER_BAR as u64) as u32;
        bar as f64 * self.pattern.bar_duration() as f64 + self.pattern.step_time(step) as f64
    }

    /// Advance by `dt` seconds, appending fired steps to `events` in order.
    pub fn advance(&mut self, dt: f32, events: &mut Vec<StepEvent>) {
        let block_start = self.elapsed;
        let block_end = block_start + dt.max(0.0) as f64;

        loop {
            let onset = self.onset(self.next_step);
            if onset > block_end {
                break;
            }
            let index = self.next_step;
            let step = (index % STEPS_PER_BAR as u64) as u32;
            events.push(StepEvent {
                step,
                bar: (index / STEPS_PER_BAR as u64) as u32,
                triggers: self.pattern.triggers(step),
                offset: (onset - block_start).max(0.0) as f32,
            });
            self.current_step = Some(index);
            self.next_step += 1;
        }

        self.elapsed = block_end;
    }

    /// Index of the most recently fired step within its bar.
    pub fn step_index(&self) -> u32 {
        self.current_step
            .map_or(0, |i| (i % STEPS_PER_BAR as u64) as u32)
    }

    pub fn bar_index(&self) -> u32 {
        self.current_step
            .map_or(0, |i| (i / STEPS_PER_BAR as u64) as u32)
    }

    /// Fraction of the current step that has elapsed, in `[0, 1)`.
    pub fn beat_phase(&self) -> f32 {
        let Some(current) = self.current_step else {
            return 0.0;
        };
        let start = self.onset(current);
        let end = self.onset(current + 1);
        let len = end - start;
        if len <= 0.0 {
            return 0.0;
        }
        let phase = ((self.elapsed - start) / len) as f32;
        phase.clamp(0.0, 1.0 - f32::EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_kicks(pattern: DrumPattern, seconds: f32, dt: f32) -> Vec<f32> {
        let mut seq = StepSequencer::new(pattern);
        let mut events = Vec::new();
        let mut kicks = Vec::new();
        while seq.elapsed() < seconds as f64 {
            let start = seq.elapsed() as f32;
            events.clear();
            seq.advance(dt, &mut events);
            for e in &events {
                if e.triggers.kick {
                    kicks.push(start + e.offset);
                }
            }
        }
        kicks
    }

    #[test]
    fn step_duration_at_100_bpm() {
        let p = DrumPattern::new(100.0, 0.0);
        assert!((p.step_duration() - 0.15).abs() < 1e-6);
        assert!((p.bar_duration() - 2.4).abs() < 1e-5);
    }

    #[test]
    fn kicks_land_on_quarter_notes() {
        let kicks = collect_kicks(DrumPattern::new(100.0, 0.0), 2.3, 0.01);
        let expected = [0.0, 0.6, 1.2, 1.8];
        assert_eq!(kicks.len(), expected.len(), "{kicks:?}");
        for (k, e) in kicks.iter().zip(expected) {
            assert!((k - e).abs() < 1e-4, "kick at {k}, expected {e}");
        }
    }

    #[test]
    fn kicks_repeat_every_bar() {
        let kicks = collect_kicks(DrumPattern::new(100.0, 0.0), 4.5, 1.0 / 60.0);
        assert_eq!(kicks.len(), 8);
        assert!((kicks[4] - 2.4).abs() < 1e-4);
        assert!((kicks[7] - 4.2).abs() < 1e-4);
    }

    #[test]
    fn trigger_sets() {
        let p = DrumPattern::new(120.0, 0.0);
        let kicks: Vec<u32> = (0..16).filter(|&s| p.triggers(s).kick).collect();
        let snares: Vec<u32> = (0..16).filter(|&s| p.triggers(s).snare).collect();
        let accents: Vec<u32> = (0..16).filter(|&s| p.triggers(s).accent).collect();
        assert_eq!(kicks, KICK_STEPS);
        assert_eq!(snares, SNARE_STEPS);
        assert_eq!(accents, [0, 4, 8, 12]);
        assert!((0..16).all(|s| p.triggers(s).hat));
    }

    #[test]
    fn swing_shifts_only_odd_steps() {
        let straight = DrumPattern::new(100.0, 0.0);
        let swung = DrumPattern::new(100.0, 1.0);
        assert_eq!(swung.step_time(2), straight.step_time(2));
        let shift = swung.step_time(3) - straight.step_time(3);
        assert!((shift - swung.swing_scale()).abs() < 1e-6);
        assert!((swung.swing_scale() - 0.075).abs() < 1e-6);
    }

    #[test]
    fn every_step_fires_once_regardless_of_tick_size() {
        for dt in [0.001, 0.013, 0.05, 0.4] {
            let mut seq = StepSequencer::new(DrumPattern::new(137.0, 0.6));
            let mut events = Vec::new();
            while seq.elapsed() < 5.0 {
                seq.advance(dt, &mut events);
            }
            let indices: Vec<u64> = events
                .iter()
                .map(|e| e.bar as u64 * 16 + e.step as u64)
                .collect();
            for (i, idx) in indices.iter().enumerate() {
                assert_eq!(*idx, i as u64, "dt={dt}");
            }
        }
    }

    #[test]
    fn beat_phase_stays_in_unit_interval() {
        let mut seq = StepSequencer::new(DrumPattern::new(90.0, 0.3));
        let mut events = Vec::new();
        assert_eq!(seq.beat_phase(), 0.0);
        for _ in 0..500 {
            seq.advance(0.007, &mut events);
            let phase = seq.beat_phase();
            assert!((0.0..1.0).contains(&phase), "phase {phase}");
        }
    }

    #[test]
    fn beat_phase_halfway_through_step() {
        let mut seq = StepSequencer::new(DrumPattern::new(100.0, 0.0));
        let mut events = Vec::new();
        seq.advance(0.075, &mut events);
        assert_eq!(events.len(), 1);
        assert!((seq.beat_phase() - 0.5).abs() < 1e-4);
        assert_eq!(seq.step_index(), 0);
        assert_eq!(seq.bar_index(), 0);
    }

    #[test]
    fn indices_wrap_into_next_bar() {
        let mut seq = StepSequencer::new(DrumPattern::new(100.0, 0.0));
        let mut events = Vec::new();
        seq.advance(2.45, &mut events);
        assert_eq!(seq.bar_index(), 1);
        assert_eq!(seq.step_index(), 0);
    }
}
