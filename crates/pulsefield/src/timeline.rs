//! Scripted three-phase loop: chaos, then text forming, then dissolving.
//! A pure function of loop time; the only mutable state is diagnostic.

use thiserror::Error;

/// Which part of the loop a phase represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Chaos,
    Text,
    Dissolve,
}

/// The four parameters every phase interpolates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseValues {
    pub force_multiplier: f32,
    pub bloom_gain: f32,
    pub text_visibility: f32,
    pub noise_jitter: f32,
}

impl PhaseValues {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        let mix = |a: f32, b: f32| a + (b - a) * t;
        Self {
            force_multiplier: mix(self.force_multiplier, other.force_multiplier),
            bloom_gain: mix(self.bloom_gain, other.bloom_gain),
            text_visibility: mix(self.text_visibility, other.text_visibility),
            noise_jitter: mix(self.noise_jitter, other.noise_jitter),
        }
    }
}

/// One half-open interval `[start, end)` of the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelinePhase {
    pub start: f32,
    pub end: f32,
    pub kind: PhaseKind,
    pub from: PhaseValues,
    pub to: PhaseValues,
}

impl TimelinePhase {
    fn contains(&self, t: f32) -> bool {
        t >= self.start && t < self.end
    }
}

/// Interpolated parameters for one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineState {
    pub kind: PhaseKind,
    pub force_multiplier: f32,
    pub bloom_gain: f32,
    pub text_visibility: f32,
    pub noise_jitter: f32,
}

#[derive(Debug, Error, PartialEq)]
pub enum TimelineError {
    #[error("timeline needs at least one phase")]
    Empty,
    #[error("first phase must start at 0, starts at {0}")]
    DoesNotStartAtZero(f32),
    #[error("phase {index} is empty or inverted ({start}..{end})")]
    InvalidPhase { index: usize, start: f32, end: f32 },
    #[error("gap or overlap between phase {index} (ends {end}) and the next (starts {next_start})")]
    NotContiguous {
        index: usize,
        end: f32,
        next_start: f32,
    },
}

/// Smoothstep easing `p²(3 − 2p)` on a clamped input.
pub fn ease(p: f32) -> f32 {
    let p = p.clamp(0.0, 1.0);
    p * p * (3.0 - 2.0 * p)
}

const AMPLITUDE_BLOOM: f32 = 0.2;
const AMPLITUDE_JITTER: f32 = 0.08;

pub struct TimelineDirector {
    phases: Vec<TimelinePhase>,
    total: f32,
    last_phase: Option<PhaseKind>,
}

impl TimelineDirector {
    /// Validate that `phases` partition `[0, total)` without gaps or overlaps.
    pub fn new(phases: Vec<TimelinePhase>) -> Result<Self, TimelineError> {
        let first = phases.first().ok_or(TimelineError::Empty)?;
        if first.start != 0.0 {
            return Err(TimelineError::DoesNotStartAtZero(first.start));
        }
        for (index, p) in phases.iter().enumerate() {
            if p.end.is_nan() || p.end <= p.start || !p.end.is_finite() {
                return Err(TimelineError::InvalidPhase {
                    index,
                    start: p.start,
                    end: p.end,
                });
            }
        }
        for (index, pair) in phases.windows(2).enumerate() {
            if pair[0].end != pair[1].start {
                return Err(TimelineError::NotContiguous {
                    index,
                    end: pair[0].end,
                    next_start: pair[1].start,
                });
            }
        }
        let total = phases[phases.len() - 1].end;
        Ok(Self {
            phases,
            total,
            last_phase: None,
        })
    }

    /// 1.0 s chaos, 2.5 s text, 1.5 s dissolve.
    pub fn standard() -> Self {
        let chaos_start = PhaseValues {
            force_multiplier: 1.6,
            bloom_gain: 0.8,
            text_visibility: 0.0,
            noise_jitter: 1.0,
        };
        let text_start = PhaseValues {
            force_multiplier: 1.2,
            bloom_gain: 1.0,
            text_visibility: 0.0,
            noise_jitter: 0.6,
        };
        let dissolve_start = PhaseValues {
            force_multiplier: 0.6,
            bloom_gain: 1.3,
            text_visibility: 1.0,
            noise_jitter: 0.15,
        };
        let phases = vec![
            TimelinePhase {
                start: 0.0,
                end: 1.0,
                kind: PhaseKind::Chaos,
                from: chaos_start,
                to: text_start,
            },
            TimelinePhase {
                start: 1.0,
                end: 3.5,
                kind: PhaseKind::Text,
                from: text_start,
                to: dissolve_start,
            },
            TimelinePhase {
                start: 3.5,
                end: 5.0,
                kind: PhaseKind::Dissolve,
                from: dissolve_start,
                // Ends where chaos begins so the loop seam is continuous.
                to: chaos_start,
            },
        ];
        Self {
            phases,
            total: 5.0,
            last_phase: None,
        }
    }

    pub fn total_duration(&self) -> f32 {
        self.total
    }

    pub fn phases(&self) -> &[TimelinePhase] {
        &self.phases
    }

    /// Map a loop-relative time to its phase; the last phase catches
    /// `t == total` and any rounding spill.
    fn phase_at(&self, looped: f32) -> &TimelinePhase {
        self.phases
            .iter()
            .find(|p| p.contains(looped))
            .unwrap_or(&self.phases[self.phases.len() - 1])
    }

    /// Deterministic parameters at `time` seconds with live `amplitude`.
    pub fn state(&self, time: f32, amplitude: f32) -> TimelineState {
        let looped = time.rem_euclid(self.total);
        let phase = self.phase_at(looped);
        let progress = ((looped - phase.start) / (phase.end - phase.start)).clamp(0.0, 1.0);
        let v = phase.from.lerp(&phase.to, ease(progress));
        TimelineState {
            kind: phase.kind,
            force_multiplier: v.force_multiplier,
            bloom_gain: v.bloom_gain + amplitude * AMPLITUDE_BLOOM,
            text_visibility: v.text_visibility,
            noise_jitter: v.noise_jitter + amplitude * AMPLITUDE_JITTER,
        }
    }

    /// `state` plus phase-change logging.
    pub fn observe(&mut self, time: f32, amplitude: f32) -> TimelineState {
        let state = self.state(time, amplitude);
        if self.last_phase != Some(state.kind) {
            log::debug!("Timeline phase {:?} at t={time:.3}", state.kind);
            self.last_phase = Some(state.kind);
        }
        state
    }

    pub fn last_phase(&self) -> Option<PhaseKind> {
        self.last_phase
    }

    /// Clear diagnostic state only.
    pub fn reset(&mut self) {
        self.last_phase = None;
    }
}

impl Default for TimelineDirector {
    fn default() -> Self {
        Self::standard()
    }
}
