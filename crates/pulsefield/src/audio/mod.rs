pub mod envelope;
pub mod kit;
pub mod output;
pub mod pattern;
pub mod reactive;

pub use reactive::{ReactiveConfig, ReactiveCore};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;

use self::output::AudioOutput;

/// Per-tick reactive metrics. Everything except the indices is in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioReactiveSnapshot {
    pub amplitude: f32,
    pub kick_pulse: f32,
    pub snare_pulse: f32,
    pub beat_phase: f32,
    pub bar_index: u32,
    pub step_index: u32,
}

impl AudioReactiveSnapshot {
    /// Degraded default: no audio activity at all.
    pub const SILENT: Self = Self {
        amplitude: 0.0,
        kick_pulse: 0.0,
        snare_pulse: 0.0,
        beat_phase: 0.0,
        bar_index: 0,
        step_index: 0,
    };

    pub fn is_silent(&self) -> bool {
        *self == Self::SILENT
    }
}

/// Anything the render tick can pull reactive metrics from.
pub trait ReactiveSource {
    /// Metrics for a tick of `dt` seconds. Sources driven by their own clock
    /// ignore `dt`.
    fn sample(&mut self, dt: f32) -> AudioReactiveSnapshot;
}

/// A source that is always silent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silence;

impl ReactiveSource for Silence {
    fn sample(&mut self, _dt: f32) -> AudioReactiveSnapshot {
        AudioReactiveSnapshot::SILENT
    }
}

/// Scalars published by the timer thread and read by the render tick.
/// Each field is independently atomic; a reader may observe a mix of two
/// consecutive ticks, which is fine for slowly varying values.
#[derive(Default)]
struct SharedReactive {
    amplitude: AtomicU32,
    kick_pulse: AtomicU32,
    snare_pulse: AtomicU32,
    beat_phase: AtomicU32,
    bar_index: AtomicU32,
    step_index: AtomicU32,
}

impl SharedReactive {
    fn publish(&self, s: &AudioReactiveSnapshot) {
        self.amplitude.store(s.amplitude.to_bits(), Ordering::Relaxed);
        self.kick_pulse.store(s.kick_pulse.to_bits(), Ordering::Relaxed);
        self.snare_pulse.store(s.snare_pulse.to_bits(), Ordering::Relaxed);
        self.beat_phase.store(s.beat_phase.to_bits(), Ordering::Relaxed);
        self.bar_index.store(s.bar_index, Ordering::Relaxed);
        self.step_index.store(s.step_index, Ordering::Relaxed);
    }

    fn load(&self) -> AudioReactiveSnapshot {
        AudioReactiveSnapshot {
            amplitude: f32::from_bits(self.amplitude.load(Ordering::Relaxed)),
            kick_pulse: f32::from_bits(self.kick_pulse.load(Ordering::Relaxed)),
            snare_pulse: f32::from_bits(self.snare_pulse.load(Ordering::Relaxed)),
            beat_phase: f32::from_bits(self.beat_phase.load(Ordering::Relaxed)),
            bar_index: self.bar_index.load(Ordering::Relaxed),
            step_index: self.step_index.load(Ordering::Relaxed),
        }
    }
}

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Preparing,
    Running,
    Stopped,
}

/// Where the synthesized loop goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Play through the default output device.
    Device,
    /// Run synthesis and metrics without opening a device.
    Muted,
}

/// Interval between synthesis timer ticks.
const TIMER_INTERVAL: Duration = Duration::from_millis(5);
/// Audio queued ahead of the device before the timer thread stops pushing.
const MAX_QUEUED_SECONDS: f32 = 0.1;

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// One engine per session, owned by the host and passed by reference to the
/// tick. `start` builds the kit and spawns the timer thread; `stop` joins it.
pub struct AudioReactiveEngine {
    config: ReactiveConfig,
    mode: OutputMode,
    state: EngineState,
    /// Set when the audio subsystem could not be brought up.
    degraded: bool,
    shared: Arc<SharedReactive>,
    worker: Option<Worker>,
    output: Option<AudioOutput>,
}

impl AudioReactiveEngine {
    pub fn new(config: ReactiveConfig, mode: OutputMode) -> Self {
        Self {
            config,
            mode,
            state: EngineState::Idle,
            degraded: false,
            shared: Arc::new(SharedReactive::default()),
            worker: None,
            output: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// True when initialization failed and the engine only reports silence.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn config(&self) -> &ReactiveConfig {
        &self.config
    }

    pub fn device_name(&self) -> Option<&str> {
        self.output.as_ref().map(|o| o.device_name.as_str())
    }

    /// `Idle/Stopped → Preparing → Running`. Never fails: if the audio
    /// subsystem is unavailable the engine runs degraded and stays silent.
    pub fn start(&mut self) {
        let output = match self.mode {
            OutputMode::Device => AudioOutput::open().map(Some),
            OutputMode::Muted => Ok(None),
        };
        self.start_with_output(output);
    }

    fn start_with_output(&mut self, output: Result<Option<AudioOutput>>) {
        if self.state == EngineState::Running {
            return;
        }
        self.state = EngineState::Preparing;
        self.shared.publish(&AudioReactiveSnapshot::SILENT);

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                log::warn!("Audio output unavailable, continuing silent: {e}");
                self.degraded = true;
                self.state = EngineState::Running;
                return;
            }
        };
        self.degraded = false;

        let mut config = self.config;
        if let Some(out) = &output {
            config.sample_rate = out.sample_rate;
        }
        let core = ReactiveCore::prepare(config);
        let ring = output.as_ref().map(|o| o.ring.clone());
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        let shared = self.shared.clone();

        let spawned = thread::Builder::new()
            .name("pulsefield-audio".into())
            .spawn(move || timer_thread(core, ring, shared, stop_clone));

        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker { stop, handle });
                self.output = output;
                self.state = EngineState::Running;
                log::info!(
                    "Audio engine running ({:?}, {} BPM)",
                    self.mode,
                    self.config.bpm
                );
            }
            Err(e) => {
                log::warn!("Failed to spawn audio thread, continuing silent: {e}");
                self.degraded = true;
                self.state = EngineState::Running;
            }
        }
    }

    /// `Running → Stopped`. Joins the timer thread and closes the device.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Release);
            if worker.handle.join().is_err() {
                log::error!("Audio thread panicked");
            }
        }
        self.output = None;
        self.shared.publish(&AudioReactiveSnapshot::SILENT);
        if self.state != EngineState::Idle {
            self.state = EngineState::Stopped;
            log::info!("Audio engine stopped");
        }
    }

    /// Apply new tempo/groove/kit. Live changes are not supported, so a
    /// running engine goes through a full stop/prepare/start cycle.
    pub fn reconfigure(&mut self, config: ReactiveConfig) {
        let was_running = self.state == EngineState::Running;
        if was_running {
            self.stop();
        }
        self.config = config;
        if was_running {
            self.start();
        }
    }

    /// Latest published metrics, or `SILENT` when not running or degraded.
    pub fn snapshot(&self) -> AudioReactiveSnapshot {
        if self.state != EngineState::Running || self.degraded {
            return AudioReactiveSnapshot::SILENT;
        }
        self.shared.load()
    }
}

impl ReactiveSource for AudioReactiveEngine {
    fn sample(&mut self, _dt: f32) -> AudioReactiveSnapshot {
        self.snapshot()
    }
}

impl Drop for AudioReactiveEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn timer_thread(
    mut core: ReactiveCore,
    ring: Option<Arc<output::RingBuffer>>,
    shared: Arc<SharedReactive>,
    stop: Arc<AtomicBool>,
) {
    let max_queued = (core.config().sample_rate as f32 * MAX_QUEUED_SECONDS) as usize;
    let mut last = Instant::now();
    // Samples dropped since the queue last had room.
    let mut dropped = 0usize;

    while !stop.load(Ordering::Acquire) {
        thread::sleep(TIMER_INTERVAL);

        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f32();
        last = now;

        let snapshot = core.advance(dt);

        if let Some(ring) = &ring {
            let lost = queue_block(ring, core.last_block(), max_queued);
            if lost > 0 && dropped == 0 {
                log::debug!("Audio queue full, dropping synthesized samples");
            } else if lost == 0 && dropped > 0 {
                log::debug!("Audio queue drained after dropping {dropped} samples");
            }
            dropped = if lost > 0 { dropped + lost } else { 0 };
        }

        shared.publish(&snapshot);
    }
}

/// Push as much of `block` as keeps `ring` at or under `max_queued` samples.
/// Returns how many samples were dropped.
fn queue_block(ring: &output::RingBuffer, block: &[f32], max_queued: usize) -> usize {
    let room = max_queued.saturating_sub(ring.available());
    block.len() - ring.push(&block[..block.len().min(room)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn muted_engine() -> AudioReactiveEngine {
        AudioReactiveEngine::new(
            ReactiveConfig {
                bpm: 200.0,
                sample_rate: 8000,
                ..Default::default()
            },
            OutputMode::Muted,
        )
    }

    #[test]
    fn queue_keeps_the_part_of_a_block_that_fits() {
        let ring = output::RingBuffer::new();
        let block = [0.25f32; 100];
        assert_eq!(queue_block(&ring, &block, 250), 0);
        assert_eq!(queue_block(&ring, &block, 250), 0);
        assert_eq!(queue_block(&ring, &block, 250), 50);
        assert_eq!(ring.available(), 250);
        assert_eq!(queue_block(&ring, &block, 250), 100);

        let mut out = [0.0f32; 100];
        assert_eq!(ring.pop(&mut out), 100);
        assert_eq!(queue_block(&ring, &block, 250), 0);
        assert_eq!(ring.available(), 250);
    }

    #[test]
    fn silent_before_start() {
        let engine = muted_engine();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.snapshot().is_silent());
    }

    #[test]
    fn failed_output_degrades_to_silence() {
        let mut engine = AudioReactiveEngine::new(ReactiveConfig::default(), OutputMode::Device);
        engine.start_with_output(Err(anyhow::anyhow!("no device")));
        assert_eq!(engine.state(), EngineState::Running);
        assert!(engine.is_degraded());
        thread::sleep(Duration::from_millis(30));
        assert!(engine.snapshot().is_silent());
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn muted_engine_publishes_metrics() {
        let mut engine = muted_engine();
        engine.start();
        assert_eq!(engine.state(), EngineState::Running);
        assert!(!engine.is_degraded());

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut saw_activity = false;
        while Instant::now() < deadline {
            let snap = engine.snapshot();
            assert!((0.0..=1.0).contains(&snap.amplitude));
            assert!((0.0..=1.0).contains(&snap.kick_pulse));
            assert!((0.0..1.0).contains(&snap.beat_phase));
            if snap.amplitude > 0.0 {
                saw_activity = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(saw_activity);

        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.snapshot().is_silent());
    }

    #[test]
    fn reconfigure_restarts_running_engine() {
        let mut engine = muted_engine();
        engine.start();
        engine.reconfigure(ReactiveConfig {
            bpm: 90.0,
            sample_rate: 8000,
            ..Default::default()
        });
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.config().bpm, 90.0);
        engine.stop();
    }

    #[test]
    fn reconfigure_while_stopped_does_not_start() {
        let mut engine = muted_engine();
        engine.reconfigure(ReactiveConfig {
            groove: 0.5,
            ..*engine.config()
        });
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.config().groove, 0.5);
    }

    #[test]
    fn silence_source() {
        assert!(Silence.sample(0.016).is_silent());
    }
}
