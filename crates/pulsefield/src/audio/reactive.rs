use crate::config::SessionConfig;
use crate::preset::DrumKitId;

use super::envelope::{Impulse, RmsSmoother, block_rms};
use super::kit::{DrumKit, Voice};
use super::pattern::{DrumPattern, StepEvent, StepSequencer};
use super::{AudioReactiveSnapshot, ReactiveSource};

/// Everything needed to (re)build the loop. Changing any field means a full
/// stop/prepare/start cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReactiveConfig {
    pub bpm: f32,
    pub groove: f32,
    pub kit: DrumKitId,
    pub seed: u64,
    pub sample_rate: u32,
    /// Multiplier from smoothed RMS to exposed amplitude.
    pub amplitude_gain: f32,
    /// Master output level.
    pub volume: f32,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            bpm: 110.0,
            groove: 0.0,
            kit: DrumKitId::Electro,
            seed: 0x5eed,
            sample_rate: 48000,
            amplitude_gain: 2.5,
            volume: 0.8,
        }
    }
}

impl ReactiveConfig {
    /// Loop settings for a session. `session` is expected to be normalized.
    pub fn for_session(session: &SessionConfig) -> Self {
        Self {
            bpm: session.bpm,
            groove: session.groove,
            kit: session.visual_preset().drum_kit,
            ..Self::default()
        }
    }
}

const KICK_LEVEL: f32 = 0.9;
const SNARE_LEVEL: f32 = 0.6;
const HAT_LEVEL: f32 = 0.35;
const ACCENT_HAT_LEVEL: f32 = 0.6;

#[derive(Debug, Clone, Copy)]
struct ActiveVoice {
    voice: Voice,
    /// Samples still to wait before playback starts.
    delay: usize,
    pos: usize,
    level: f32,
}

/// Timer-stepped synthesis state: sequencer, voice mixer, impulses and the
/// RMS smoother. Deterministic for a given config and tick sequence.
pub struct ReactiveCore {
    config: ReactiveConfig,
    sequencer: StepSequencer,
    kit: DrumKit,
    voices: Vec<ActiveVoice>,
    kick: Impulse,
    snare: Impulse,
    rms: RmsSmoother,
    sample_debt: f64,
    events: Vec<StepEvent>,
    block: Vec<f32>,
}

impl ReactiveCore {
    /// Build the synthesis graph and render the kit samples.
    pub fn prepare(config: ReactiveConfig) -> Self {
        let pattern = DrumPattern::new(config.bpm, config.groove);
        let kit = DrumKit::synthesize(config.kit, config.sample_rate, config.seed);
        log::debug!(
            "Prepared {:?} kit at {} BPM, groove {:.2}, {} Hz",
            config.kit,
            pattern.bpm,
            pattern.groove,
            config.sample_rate
        );
        Self {
            config,
            sequencer: StepSequencer::new(pattern),
            kit,
            voices: Vec::with_capacity(16),
            kick: Impulse::default(),
            snare: Impulse::default(),
            rms: RmsSmoother::default(),
            sample_debt: 0.0,
            events: Vec::with_capacity(8),
            block: Vec::new(),
        }
    }

    pub fn config(&self) -> &ReactiveConfig {
        &self.config
    }

    /// Samples rendered by the most recent `advance`.
    pub fn last_block(&self) -> &[f32] {
        &self.block
    }

    /// Steps fired by the most recent `advance`.
    pub fn last_events(&self) -> &[StepEvent] {
        &self.events
    }

    /// Advance the loop by `dt` seconds: decay impulses, fire due steps,
    /// render the matching block of audio and fold its RMS into the smoother.
    pub fn advance(&mut self, dt: f32) -> AudioReactiveSnapshot {
        let dt = dt.max(0.0);
        self.kick.decay(dt);
        self.snare.decay(dt);

        self.events.clear();
        self.sequencer.advance(dt, &mut self.events);

        let sr = self.config.sample_rate as f32;
        for event in &self.events {
            let delay = (event.offset * sr) as usize;
            if event.triggers.kick {
                self.kick.trigger();
                self.voices.push(ActiveVoice {
                    voice: Voice::Kick,
                    delay,
                    pos: 0,
                    level: KICK_LEVEL,
                });
            }
            if event.triggers.snare {
                self.snare.trigger();
                self.voices.push(ActiveVoice {
                    voice: Voice::Snare,
                    delay,
                    pos: 0,
                    level: SNARE_LEVEL,
                });
            }
            if event.triggers.hat {
                self.voices.push(ActiveVoice {
                    voice: Voice::Hat,
                    delay,
                    pos: 0,
                    level: if event.triggers.accent {
                        ACCENT_HAT_LEVEL
                    } else {
                        HAT_LEVEL
                    },
                });
            }
        }

        self.sample_debt += f64::from(dt) * f64::from(self.config.sample_rate);
        let count = self.sample_debt.floor() as usize;
        self.sample_debt -= count as f64;
        self.render_block(count);

        if !self.block.is_empty() {
            self.rms.update(block_rms(&self.block));
        }

        self.snapshot()
    }

    fn render_block(&mut self, count: usize) {
        self.block.clear();
        self.block.resize(count, 0.0);
        let volume = self.config.volume;
        let kit = &self.kit;

        for v in &mut self.voices {
            let sample = kit.sample(v.voice);
            let start = v.delay.min(count);
            v.delay -= start;
            for out in &mut self.block[start..] {
                if v.pos >= sample.len() {
                    break;
                }
                *out += sample[v.pos] * v.level * volume;
                v.pos += 1;
            }
        }
        self.voices
            .retain(|v| v.delay > 0 || v.pos < kit.sample(v.voice).len());

        for s in &mut self.block {
            *s = s.clamp(-1.0, 1.0);
        }
    }

    /// Current metrics without advancing time.
    pub fn snapshot(&self) -> AudioReactiveSnapshot {
        AudioReactiveSnapshot {
            amplitude: (self.rms.value() * self.config.amplitude_gain).min(1.0),
            kick_pulse: self.kick.value(),
            snare_pulse: self.snare.value(),
            beat_phase: self.sequencer.beat_phase(),
            bar_index: self.sequencer.bar_index(),
            step_index: self.sequencer.step_index(),
        }
    }
}

impl ReactiveSource for ReactiveCore {
    fn sample(&mut self, dt: f32) -> AudioReactiveSnapshot {
        self.advance(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(bpm: f32) -> ReactiveCore {
        ReactiveCore::prepare(ReactiveConfig {
            bpm,
            sample_rate: 22050,
            ..Default::default()
        })
    }

    #[test]
    fn first_tick_fires_kick() {
        let mut c = core(100.0);
        let snap = c.advance(1.0 / 60.0);
        assert_eq!(snap.kick_pulse, 1.0);
        assert_eq!(snap.snare_pulse, 0.0);
        assert_eq!(snap.step_index, 0);
        assert!(snap.amplitude > 0.0);
    }

    #[test]
    fn kick_decays_between_triggers() {
        let mut c = core(100.0);
        let mut prev = c.advance(0.01).kick_pulse;
        // Next kick is at 0.6 s; stay well before it.
        for _ in 0..50 {
            let k = c.advance(0.01).kick_pulse;
            assert!(k <= prev);
            prev = k;
        }
        assert!(prev < 0.05);
    }

    #[test]
    fn snare_fires_on_step_four() {
        let mut c = core(100.0);
        let mut saw_snare = false;
        for _ in 0..70 {
            let snap = c.advance(0.01);
            if snap.snare_pulse == 1.0 {
                assert_eq!(snap.step_index, 4);
                saw_snare = true;
            }
        }
        assert!(saw_snare);
    }

    #[test]
    fn block_length_tracks_sample_rate() {
        let mut c = core(120.0);
        let mut total = 0;
        for _ in 0..100 {
            c.advance(0.01);
            total += c.last_block().len();
        }
        // 1 s at 22050 Hz, fractional samples carried between blocks
        assert!((total as i64 - 22050).abs() <= 1, "{total}");
    }

    #[test]
    fn zero_dt_renders_nothing() {
        let mut c = core(120.0);
        c.advance(0.05);
        let amp = c.snapshot().amplitude;
        c.advance(0.0);
        assert!(c.last_block().is_empty());
        assert_eq!(c.snapshot().amplitude, amp);
    }

    #[test]
    fn amplitude_is_capped() {
        let mut c = ReactiveCore::prepare(ReactiveConfig {
            amplitude_gain: 1000.0,
            sample_rate: 22050,
            ..Default::default()
        });
        for _ in 0..20 {
            let snap = c.advance(0.01);
            assert!(snap.amplitude <= 1.0);
        }
    }

    #[test]
    fn session_picks_preset_kit() {
        let session = SessionConfig {
            preset: "ember".into(),
            bpm: 90.0,
            groove: 0.3,
            ..Default::default()
        };
        let cfg = ReactiveConfig::for_session(&session);
        assert_eq!(cfg.bpm, 90.0);
        assert_eq!(cfg.groove, 0.3);
        assert_eq!(cfg.kit, session.visual_preset().drum_kit);
    }

    #[test]
    fn identical_configs_produce_identical_audio() {
        let mut a = core(128.0);
        let mut b = core(128.0);
        for _ in 0..30 {
            let sa = a.advance(1.0 / 30.0);
            let sb = b.advance(1.0 / 30.0);
            assert_eq!(sa, sb);
            assert_eq!(a.last_block(), b.last_block());
        }
    }
}
