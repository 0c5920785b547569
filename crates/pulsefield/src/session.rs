//! Session orchestration: one `Visualizer` per running loop, shared by the
//! live viewer (display-paced) and the exporter (fixed step).

use crate::audio::{AudioReactiveSnapshot, ReactiveSource};
use crate::config::{RenderSettings, SessionConfig};
use crate::pipeline::{BackendError, FrameParams, RenderBackend, TickInputs, execute};
use crate::preset::VisualPreset;
use crate::raster::{Frame, HdrImage};
use crate::timeline::{TimelineDirector, TimelineState};

/// Longest wall-clock step a display-paced tick will simulate.
pub const MAX_DISPLAY_DT: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

/// How each tick's `delta_time` is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FramePacing {
    /// Measured wall-clock time between presented frames.
    Display,
    /// `1 / fps` regardless of wall-clock time.
    Fixed { fps: u32 },
}

impl FramePacing {
    pub fn delta(&self, wall_dt: f32) -> f32 {
        match *self {
            FramePacing::Display => {
                if wall_dt.is_finite() {
                    wall_dt.clamp(0.0, MAX_DISPLAY_DT)
                } else {
                    0.0
                }
            }
            FramePacing::Fixed { fps } => 1.0 / fps.max(1) as f32,
        }
    }

    /// Session clock after `ticks` ticks. Fixed pacing derives it from the
    /// tick count so frame `k` lands exactly on `k / fps`.
    fn advance(&self, elapsed: f64, ticks: u64, dt: f32) -> f64 {
        match *self {
            FramePacing::Display => elapsed + f64::from(dt),
            FramePacing::Fixed { fps } => ticks as f64 / f64::from(fps.max(1)),
        }
    }
}

/// Current touch point in the `[-1, 1]²` simulation domain.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TouchInput {
    position: Option<[f32; 2]>,
}

impl TouchInput {
    pub fn set(&mut self, domain: [f32; 2]) {
        self.position = Some(domain.map(|c| c.clamp(-1.0, 1.0)));
    }

    /// Pointer position in window pixels (origin top-left).
    pub fn set_pixel(&mut self, x: f32, y: f32, width: u32, height: u32) {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        self.set([x / w * 2.0 - 1.0, 1.0 - y / h * 2.0]);
    }

    pub fn clear(&mut self) {
        self.position = None;
    }

    pub fn position(&self) -> Option<[f32; 2]> {
        self.position
    }
}

/// Result of one `tick`.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The stage list ran; the frame is present when capture was requested.
    Rendered(Option<Frame>),
    /// Nothing was drawn: the session is not running or the output target
    /// was temporarily unavailable.
    Skipped,
}

pub struct Visualizer<B: RenderBackend> {
    backend: B,
    config: SessionConfig,
    preset: &'static VisualPreset,
    settings: RenderSettings,
    director: TimelineDirector,
    pacing: FramePacing,
    touch: TouchInput,
    state: SessionState,
    /// Seconds since `start`, including skipped ticks.
    elapsed: f64,
    ticks: u64,
    /// Index of the loop the last tick fell in.
    loop_index: u32,
    frames: u64,
    last_audio: AudioReactiveSnapshot,
    last_timeline: Option<TimelineState>,
}

impl<B: RenderBackend> Visualizer<B> {
    /// `backend` must already be built for `settings`.
    pub fn new(backend: B, config: &SessionConfig, settings: RenderSettings, pacing: FramePacing) -> Self {
        let config = config.normalized();
        let preset = config.visual_preset();
        Self {
            backend,
            preset,
            config,
            settings: settings.sanitized(),
            director: TimelineDirector::standard(),
            pacing,
            touch: TouchInput::default(),
            state: SessionState::Idle,
            elapsed: 0.0,
            ticks: 0,
            loop_index: 0,
            frames: 0,
            last_audio: AudioReactiveSnapshot::SILENT,
            last_timeline: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn preset(&self) -> &'static VisualPreset {
        self.preset
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn pacing(&self) -> FramePacing {
        self.pacing
    }

    /// Seconds since `start`.
    pub fn time(&self) -> f64 {
        self.elapsed
    }

    /// Position inside the current loop, in `[0, loop_duration)`.
    pub fn loop_time(&self) -> f32 {
        self.elapsed.rem_euclid(self.loop_total()) as f32
    }

    fn loop_total(&self) -> f64 {
        f64::from(self.director.total_duration())
    }

    /// Completed loop wraparounds.
    pub fn loops(&self) -> u32 {
        self.loop_index
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn loop_duration(&self) -> f32 {
        self.director.total_duration()
    }

    pub fn last_audio(&self) -> AudioReactiveSnapshot {
        self.last_audio
    }

    pub fn last_timeline(&self) -> Option<TimelineState> {
        self.last_timeline
    }

    pub fn touch_mut(&mut self) -> &mut TouchInput {
        &mut self.touch
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// `Idle/Stopped → Running`. Restarting rewinds to the loop start.
    pub fn start(&mut self) {
        match self.state {
            SessionState::Running => {}
            SessionState::Idle | SessionState::Stopped => {
                self.elapsed = 0.0;
                self.ticks = 0;
                self.loop_index = 0;
                self.director.reset();
                self.state = SessionState::Running;
                log::info!(
                    "Session running: preset '{}', {} bpm, groove {:.2}, {} backend",
                    self.preset.key,
                    self.config.bpm,
                    self.config.groove,
                    self.backend.name()
                );
            }
        }
    }

    pub fn stop(&mut self) {
        if self.state == SessionState::Running {
            self.state = SessionState::Stopped;
            log::info!(
                "Session stopped after {} frames, {} loops",
                self.frames,
                self.loop_index
            );
        }
    }

    /// Run one tick. Audio is sampled first, then the timeline, then the
    /// stage list executes on the backend.
    pub fn tick(
        &mut self,
        wall_dt: f32,
        audio: &mut dyn ReactiveSource,
        capture: bool,
    ) -> Result<TickOutcome, BackendError> {
        if self.state != SessionState::Running {
            return Ok(TickOutcome::Skipped);
        }

        let dt = self.pacing.delta(wall_dt);
        let snapshot = audio.sample(dt);
        self.last_audio = snapshot;

        let loop_index = (self.elapsed / self.loop_total()).floor() as u32;
        if loop_index > self.loop_index {
            self.loop_index = loop_index;
            self.director.reset();
            log::debug!("Loop wrapped ({} completed)", self.loop_index);
        }
        let time = self.loop_time();
        let timeline = self.director.observe(time, snapshot.amplitude);
        self.last_timeline = Some(timeline);

        let params = FrameParams::build(&TickInputs {
            delta_time: dt,
            time,
            touch: self.touch.position(),
            audio: snapshot,
            timeline,
            preset: self.preset,
            settings: &self.settings,
        });

        // Loop time follows the audio clock even when a tick is dropped.
        self.ticks += 1;
        self.elapsed = self.pacing.advance(self.elapsed, self.ticks, dt);
        match execute(&mut self.backend, &params, capture) {
            Ok(frame) => {
                self.frames += 1;
                Ok(TickOutcome::Rendered(frame))
            }
            Err(e) if e.is_transient() => {
                log::warn!("Skipping tick: {e}");
                Ok(TickOutcome::Skipped)
            }
            Err(e) => {
                log::error!("Tick failed: {e}");
                Err(e)
            }
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        if width == 0 || height == 0 || (width, height) == self.backend.size() {
            return Ok(());
        }
        log::info!("Resizing to {width}x{height}");
        self.backend.resize(width, height)
    }

    /// Swap in a new session bundle. Returns true when the audio loop must
    /// be reconfigured (tempo, groove or drum kit changed).
    pub fn update_parameters(&mut self, config: &SessionConfig) -> bool {
        let config = config.normalized();
        let preset = config.visual_preset();
        let audio_changed = config.bpm != self.config.bpm
            || config.groove != self.config.groove
            || preset.drum_kit != self.preset.drum_kit;
        if preset.key != self.preset.key {
            log::info!("Preset changed: '{}' -> '{}'", self.preset.key, preset.key);
        }
        self.preset = preset;
        self.config = config;
        audio_changed
    }

    pub fn update_settings(&mut self, settings: &RenderSettings) -> Result<(), BackendError> {
        let settings = settings.sanitized();
        self.backend.apply_settings(&settings)?;
        self.settings = settings;
        Ok(())
    }

    /// Premultiplied overlay, typically the rasterized session text.
    /// Resampled to trail resolution when sizes differ; `None` removes it.
    pub fn set_overlay(&mut self, overlay: Option<&HdrImage>) -> Result<(), BackendError> {
        self.backend.set_overlay(overlay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ReactiveConfig, ReactiveCore, Silence};
    use crate::cpu::CpuBackend;
    use crate::pipeline::Stage;
    use crate::timeline::PhaseKind;

    fn settings() -> RenderSettings {
        RenderSettings {
            particle_capacity: 1024,
            active_particles: 1024,
            ..Default::default()
        }
    }

    fn visualizer(fps: u32) -> Visualizer<CpuBackend> {
        let settings = settings();
        Visualizer::new(
            CpuBackend::new(48, 32, &settings),
            &SessionConfig::default(),
            settings,
            FramePacing::Fixed { fps },
        )
    }

    #[test]
    fn pacing_deltas() {
        assert_eq!(FramePacing::Fixed { fps: 30 }.delta(1.0), 1.0 / 30.0);
        assert_eq!(FramePacing::Fixed { fps: 0 }.delta(0.5), 1.0);
        assert_eq!(FramePacing::Display.delta(0.016), 0.016);
        assert_eq!(FramePacing::Display.delta(2.0), MAX_DISPLAY_DT);
        assert_eq!(FramePacing::Display.delta(-1.0), 0.0);
        assert_eq!(FramePacing::Display.delta(f32::NAN), 0.0);
    }

    #[test]
    fn touch_maps_pixels_to_domain() {
        let mut t = TouchInput::default();
        t.set_pixel(0.0, 0.0, 200, 100);
        assert_eq!(t.position(), Some([-1.0, 1.0]));
        t.set_pixel(100.0, 50.0, 200, 100);
        assert_eq!(t.position(), Some([0.0, 0.0]));
        t.set_pixel(400.0, 100.0, 200, 100);
        assert_eq!(t.position(), Some([1.0, -1.0]));
        t.clear();
        assert_eq!(t.position(), None);
    }

    #[test]
    fn idle_session_does_not_tick() {
        let mut v = visualizer(30);
        let out = v.tick(0.0, &mut Silence, true).unwrap();
        assert_eq!(out, TickOutcome::Skipped);
        assert_eq!(v.frames(), 0);
        assert_eq!(v.time(), 0.0);
    }

    #[test]
    fn running_session_renders_captured_frames() {
        let mut v = visualizer(30);
        v.start();
        let TickOutcome::Rendered(Some(frame)) = v.tick(0.0, &mut Silence, true).unwrap() else {
            panic!("expected a captured frame");
        };
        assert_eq!((frame.width, frame.height), (48, 32));
        assert_eq!(v.frames(), 1);
        assert!((v.time() - 1.0 / 30.0).abs() < 1e-12);

        let out = v.tick(0.0, &mut Silence, false).unwrap();
        assert_eq!(out, TickOutcome::Rendered(None));
    }

    #[test]
    fn stop_halts_ticks_and_start_rewinds() {
        let mut v = visualizer(30);
        v.start();
        v.tick(0.0, &mut Silence, false).unwrap();
        v.stop();
        assert_eq!(v.state(), SessionState::Stopped);
        assert_eq!(v.tick(0.0, &mut Silence, false).unwrap(), TickOutcome::Skipped);
        v.start();
        assert_eq!(v.time(), 0.0);
        assert_eq!(v.state(), SessionState::Running);
    }

    #[test]
    fn loop_wrap_is_counted() {
        let mut v = visualizer(10);
        v.start();
        // 5 s loop at 10 fps: ticks past 50 fall in the second loop.
        for _ in 0..55 {
            v.tick(0.0, &mut Silence, false).unwrap();
        }
        assert_eq!(v.loops(), 1);
        assert_eq!(v.last_timeline().map(|s| s.kind), Some(PhaseKind::Chaos));
    }

    #[test]
    fn first_frame_of_each_loop_lands_on_the_seam() {
        for fps in [24, 30, 60] {
            let mut v = visualizer(fps);
            v.start();
            let per_loop = (v.loop_duration() * fps as f32).round() as u64;
            for _ in 0..per_loop {
                v.tick(0.0, &mut Silence, false).unwrap();
            }
            assert_eq!(v.loops(), 0, "fps {fps}");
            assert_eq!(v.time(), 5.0, "fps {fps}");

            v.tick(0.0, &mut Silence, false).unwrap();
            assert_eq!(v.loops(), 1, "fps {fps}");
            assert_eq!(
                v.last_timeline().map(|s| s.kind),
                Some(PhaseKind::Chaos),
                "fps {fps}"
            );
            // Second loop's first frame matches the first loop's first frame.
            assert_eq!(
                v.last_timeline(),
                Some(TimelineDirector::standard().state(0.0, 0.0))
            );
        }
    }

    #[test]
    fn display_clock_holds_precision_over_long_sessions() {
        let pacing = FramePacing::Display;
        let dt = 1.0f32 / 60.0;
        let mut elapsed = 0.0;
        // Four hours of 60 Hz frames.
        for tick in 1..=(4 * 3600 * 60) {
            elapsed = pacing.advance(elapsed, tick, dt);
        }
        let exact = 4.0 * 3600.0 * f64::from(dt) * 60.0;
        assert!((elapsed - exact).abs() < 1e-3, "elapsed {elapsed}");
    }

    #[test]
    fn loop_time_stays_inside_the_loop() {
        let mut v = visualizer(60);
        v.start();
        for _ in 0..(60 * 12) {
            v.tick(0.0, &mut Silence, false).unwrap();
            assert!((0.0..v.loop_duration()).contains(&v.loop_time()));
        }
        assert_eq!(v.loops(), 2);
        assert!((v.loop_time() - 2.0).abs() < 1e-4);
    }

    #[test]
    fn audio_is_sampled_with_tick_delta() {
        let mut v = visualizer(60);
        v.start();
        let mut core = ReactiveCore::prepare(ReactiveConfig {
            sample_rate: 22050,
            ..ReactiveConfig::for_session(v.config())
        });
        v.tick(0.0, &mut core, false).unwrap();
        assert_eq!(v.last_audio().kick_pulse, 1.0);
        assert_eq!(core.last_block().len(), 367);
    }

    #[test]
    fn update_parameters_reports_audio_changes() {
        let mut v = visualizer(30);
        let same = v.config().clone();
        assert!(!v.update_parameters(&same));

        let faster = SessionConfig {
            bpm: 150.0,
            ..same.clone()
        };
        assert!(v.update_parameters(&faster));
        assert_eq!(v.config().bpm, 150.0);

        let unknown = SessionConfig {
            preset: "no-such-preset".into(),
            ..faster
        };
        assert!(!v.update_parameters(&unknown));
        assert_eq!(v.preset().key, VisualPreset::default_preset().key);
    }

    #[test]
    fn resize_reallocates_backend() {
        let mut v = visualizer(30);
        v.resize(64, 40).unwrap();
        assert_eq!(v.backend().size(), (64, 40));
        v.resize(0, 10).unwrap();
        assert_eq!(v.backend().size(), (64, 40));
        v.start();
        let TickOutcome::Rendered(Some(frame)) = v.tick(0.0, &mut Silence, true).unwrap() else {
            panic!("expected a captured frame");
        };
        assert_eq!((frame.width, frame.height), (64, 40));
    }

    /// Backend whose frame acquisition fails with a chosen error.
    struct FailingBackend {
        error: fn() -> BackendError,
    }

    impl RenderBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn size(&self) -> (u32, u32) {
            (1, 1)
        }
        fn resize(&mut self, _: u32, _: u32) -> Result<(), BackendError> {
            Ok(())
        }
        fn apply_settings(&mut self, _: &RenderSettings) -> Result<(), BackendError> {
            Ok(())
        }
        fn set_overlay(&mut self, _: Option<&HdrImage>) -> Result<(), BackendError> {
            Ok(())
        }
        fn begin_frame(&mut self, _: &FrameParams) -> Result<(), BackendError> {
            Err((self.error)())
        }
        fn run_stage(&mut self, _: Stage, _: &FrameParams) -> Result<(), BackendError> {
            Ok(())
        }
        fn end_frame(&mut self, _: bool) -> Result<Option<Frame>, BackendError> {
            Ok(None)
        }
    }

    fn failing(error: fn() -> BackendError) -> Visualizer<FailingBackend> {
        let mut v = Visualizer::new(
            FailingBackend { error },
            &SessionConfig::default(),
            settings(),
            FramePacing::Fixed { fps: 30 },
        );
        v.start();
        v
    }

    #[test]
    fn transient_failure_skips_tick() {
        let mut v = failing(|| BackendError::Transient("surface lost".into()));
        assert_eq!(v.tick(0.0, &mut Silence, false).unwrap(), TickOutcome::Skipped);
        assert_eq!(v.frames(), 0);
        assert!(v.time() > 0.0);
    }

    #[test]
    fn setup_failure_is_fatal() {
        let mut v = failing(|| BackendError::Setup("no adapter".into()));
        assert!(matches!(
            v.tick(0.0, &mut Silence, false),
            Err(BackendError::Setup(_))
        ));
    }
}
