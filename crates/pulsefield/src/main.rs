use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalPosition;
use winit::event::{ElementState, KeyEvent, MouseButton, TouchPhase, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use pulsefield::audio::{AudioReactiveEngine, OutputMode, ReactiveConfig};
use pulsefield::config::{RenderSettings, SessionConfig};
use pulsefield::cpu::CpuBackend;
use pulsefield::export::{ExportOutcome, ExportProgress, ExportSettings, Exporter, PngSequenceSink};
use pulsefield::gpu::{GpuBackend, GpuContext};
use pulsefield::preset::{DEFAULT_PRESET, VisualPreset};
use pulsefield::raster::HdrImage;
use pulsefield::session::{FramePacing, Visualizer};

#[derive(Parser)]
#[command(name = "pulsefield", version, about = "Audio-reactive particle trail loops")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Args, Clone)]
struct SessionArgs {
    /// Visual preset key
    #[arg(long, global = true, default_value = DEFAULT_PRESET)]
    preset: String,
    /// Loop tempo, 40-200
    #[arg(long, global = true, default_value_t = 110.0)]
    bpm: f32,
    /// Swing amount, 0-1
    #[arg(long, global = true, default_value_t = 0.0)]
    groove: f32,
    /// Session text, recorded in the session for hosts that rasterize it
    #[arg(long, global = true, default_value = "")]
    text: String,
    /// PNG drawn into the trails while the text phase is visible
    #[arg(long, global = true, value_name = "PNG")]
    overlay: Option<PathBuf>,
}

impl SessionArgs {
    fn to_config(&self) -> SessionConfig {
        SessionConfig {
            text: self.text.clone(),
            preset: self.preset.clone(),
            bpm: self.bpm,
            groove: self.groove,
        }
        .normalized()
    }

    fn load_overlay(&self) -> Result<Option<HdrImage>> {
        let Some(path) = &self.overlay else {
            return Ok(None);
        };
        let overlay = HdrImage::open_overlay(path)
            .with_context(|| format!("cannot load overlay {}", path.display()))?;
        log::info!(
            "Loaded overlay {} ({}x{})",
            path.display(),
            overlay.width(),
            overlay.height()
        );
        Ok(Some(overlay))
    }
}

#[derive(Subcommand)]
enum Command {
    /// Open a window and play the loop (default)
    Live {
        /// Run without opening an audio device
        #[arg(long)]
        muted: bool,
    },
    /// Render whole loops to a PNG sequence
    Export(ExportArgs),
    /// List the available presets
    Presets,
}

#[derive(Args)]
struct ExportArgs {
    /// Output directory (must not exist)
    #[arg(long, short)]
    out: PathBuf,
    #[arg(long, default_value_t = 30)]
    fps: u32,
    #[arg(long, default_value_t = 1)]
    loops: u32,
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    /// Render on the CPU instead of the GPU
    #[arg(long)]
    cpu: bool,
}

struct LiveSession {
    window: Arc<Window>,
    visualizer: Visualizer<GpuBackend>,
    audio: AudioReactiveEngine,
    last_frame: Instant,
    cursor: PhysicalPosition<f64>,
    pointer_down: bool,
}

impl LiveSession {
    fn new(
        window: Arc<Window>,
        config: &SessionConfig,
        overlay: Option<&HdrImage>,
        muted: bool,
    ) -> Result<Self> {
        let settings = RenderSettings::load();
        let size = window.inner_size();
        let ctx = GpuContext::new(window.clone()).context("GPU setup failed")?;
        let backend = GpuBackend::new(ctx, size.width, size.height, &settings)
            .context("render pipeline setup failed")?;
        let mut visualizer = Visualizer::new(backend, config, settings, FramePacing::Display);
        visualizer
            .set_overlay(overlay)
            .context("overlay upload failed")?;

        let mode = if muted {
            OutputMode::Muted
        } else {
            OutputMode::Device
        };
        let mut audio = AudioReactiveEngine::new(ReactiveConfig::for_session(visualizer.config()), mode);
        audio.start();
        if audio.is_degraded() {
            log::warn!("Audio unavailable; visuals run without audio reactivity");
        }
        visualizer.start();

        Ok(Self {
            window,
            visualizer,
            audio,
            last_frame: Instant::now(),
            cursor: PhysicalPosition::new(0.0, 0.0),
            pointer_down: false,
        })
    }

    fn touch_at(&mut self, position: PhysicalPosition<f64>) {
        let size = self.window.inner_size();
        self.visualizer.touch_mut().set_pixel(
            position.x as f32,
            position.y as f32,
            size.width,
            size.height,
        );
    }
}

struct Viewer {
    config: SessionConfig,
    overlay: Option<HdrImage>,
    muted: bool,
    session: Option<LiveSession>,
}

impl ApplicationHandler for Viewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_some() {
            return;
        }

        let attrs = WindowAttributes::default()
            .with_title("Pulsefield")
            .with_inner_size(winit::dpi::LogicalSize::new(720, 1280));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };

        match LiveSession::new(window, &self.config, self.overlay.as_ref(), self.muted) {
            Ok(session) => {
                session.window.request_redraw();
                self.session = Some(session);
            }
            Err(e) => {
                log::error!("{e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Err(e) = session.visualizer.resize(size.width, size.height) {
                    log::error!("Resize failed: {e}");
                    event_loop.exit();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => event_loop.exit(),
            WindowEvent::CursorMoved { position, .. } => {
                session.cursor = position;
                if session.pointer_down {
                    session.touch_at(position);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                session.pointer_down = state == ElementState::Pressed;
                if session.pointer_down {
                    session.touch_at(session.cursor);
                } else {
                    session.visualizer.touch_mut().clear();
                }
            }
            WindowEvent::Touch(touch) => match touch.phase {
                TouchPhase::Started | TouchPhase::Moved => session.touch_at(touch.location),
                TouchPhase::Ended | TouchPhase::Cancelled => session.visualizer.touch_mut().clear(),
            },
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = now.duration_since(session.last_frame).as_secs_f32();
                session.last_frame = now;

                if let Err(e) = session.visualizer.tick(dt, &mut session.audio, false) {
                    log::error!("Render failed: {e}");
                    event_loop.exit();
                    return;
                }
                session.window.request_redraw();
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(session) = self.session.as_mut() {
            session.visualizer.stop();
            session.audio.stop();
        }
    }
}

fn run_live(config: SessionConfig, overlay: Option<HdrImage>, muted: bool) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(winit::event_loop::ControlFlow::Poll);

    let mut viewer = Viewer {
        config,
        overlay,
        muted,
        session: None,
    };
    event_loop.run_app(&mut viewer)?;
    Ok(())
}

fn run_export(config: SessionConfig, overlay: Option<HdrImage>, args: ExportArgs) -> Result<()> {
    let render = RenderSettings::load();
    let fps = args.fps.max(1);
    let mut exporter = Exporter::new(ExportSettings {
        fps,
        loops: args.loops.max(1),
    });
    if let Some(overlay) = overlay {
        exporter = exporter.with_overlay(overlay);
    }
    let mut sink = PngSequenceSink::create(&args.out)
        .with_context(|| format!("cannot export to {}", args.out.display()))?;

    let progress = |p: ExportProgress| {
        if p.frame % fps == 0 || p.frame == p.total {
            log::info!("Exported {}/{} frames", p.frame, p.total);
        }
    };

    let gpu = if args.cpu {
        None
    } else {
        match GpuContext::headless()
            .and_then(|ctx| GpuBackend::new(ctx, args.width, args.height, &render))
        {
            Ok(backend) => Some(backend),
            Err(e) => {
                log::warn!("GPU unavailable ({e}), exporting on the CPU");
                None
            }
        }
    };

    let outcome = match gpu {
        Some(backend) => exporter.run(backend, &config, render, &mut sink, progress),
        None => {
            let backend = CpuBackend::new(args.width, args.height, &render);
            exporter.run(backend, &config, render, &mut sink, progress)
        }
    }
    .context("export failed")?;

    match outcome {
        ExportOutcome::Completed { frames, path } => {
            log::info!("Export complete: {frames} frames in {}", path.display());
        }
        ExportOutcome::Cancelled { frames_rendered } => {
            log::warn!("Export cancelled after {frames_rendered} frames");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config = cli.session.to_config();

    match cli.command.unwrap_or(Command::Live { muted: false }) {
        Command::Live { muted } => run_live(config, cli.session.load_overlay()?, muted),
        Command::Export(args) => run_export(config, cli.session.load_overlay()?, args),
        Command::Presets => {
            for key in VisualPreset::keys() {
                println!("{key}");
            }
            Ok(())
        }
    }
}
