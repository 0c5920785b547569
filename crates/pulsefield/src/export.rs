//! Offline export: the live tick driven at a fixed `1 / fps` step, each
//! frame read back and handed to a `FrameSink`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::audio::{ReactiveConfig, ReactiveCore};
use crate::config::{RenderSettings, SessionConfig};
use crate::pipeline::{BackendError, RenderBackend};
use crate::raster::{Frame, HdrImage};
use crate::session::{FramePacing, TickOutcome, Visualizer};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("PNG encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("output {} already exists", .0.display())]
    OutputExists(PathBuf),
    #[error("output path {} has no file name", .0.display())]
    InvalidOutput(PathBuf),
    #[error("frame {index} is not a {width}x{height} RGBA8 image")]
    InvalidFrame { index: u32, width: u32, height: u32 },
    #[error("frame {0} was not rendered")]
    FrameDropped(u32),
}

/// Destination for exported frames. Exactly one of `finish`/`discard` is
/// called at the end of a run.
pub trait FrameSink {
    fn write_frame(&mut self, index: u32, frame: &Frame) -> Result<(), ExportError>;

    /// Publish everything written; returns where it ended up.
    fn finish(&mut self) -> Result<PathBuf, ExportError>;

    /// Remove everything written so far.
    fn discard(&mut self) -> Result<(), ExportError>;
}

/// Numbered PNGs written into `<output>.partial`, renamed to `output` on
/// success and deleted on cancellation or error.
pub struct PngSequenceSink {
    output: PathBuf,
    staging: PathBuf,
    frames: u32,
}

impl PngSequenceSink {
    pub fn create(output: impl Into<PathBuf>) -> Result<Self, ExportError> {
        let output = output.into();
        if output.exists() {
            return Err(ExportError::OutputExists(output));
        }
        let staging = staging_path(&output).ok_or_else(|| ExportError::InvalidOutput(output.clone()))?;
        if staging.exists() {
            log::warn!("Removing stale {}", staging.display());
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        Ok(Self {
            output,
            staging,
            frames: 0,
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    pub fn frames_written(&self) -> u32 {
        self.frames
    }
}

/// `<output>.partial` next to `output`.
fn staging_path(output: &Path) -> Option<PathBuf> {
    let mut name = output.file_name()?.to_os_string();
    name.push(".partial");
    Some(output.with_file_name(name))
}

pub fn frame_file_name(index: u32) -> String {
    format!("frame_{index:05}.png")
}

impl FrameSink for PngSequenceSink {
    fn write_frame(&mut self, index: u32, frame: &Frame) -> Result<(), ExportError> {
        let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
            .ok_or(ExportError::InvalidFrame {
                index,
                width: frame.width,
                height: frame.height,
            })?;
        image.save_with_format(self.staging.join(frame_file_name(index)), image::ImageFormat::Png)?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<PathBuf, ExportError> {
        fs::rename(&self.staging, &self.output)?;
        log::info!("Wrote {} frames to {}", self.frames, self.output.display());
        Ok(self.output.clone())
    }

    fn discard(&mut self) -> Result<(), ExportError> {
        if self.staging.exists() {
            fs::remove_dir_all(&self.staging)?;
        }
        self.frames = 0;
        Ok(())
    }
}

/// Shared flag checked between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSettings {
    pub fps: u32,
    /// Whole loops to render.
    pub loops: u32,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self { fps: 30, loops: 1 }
    }
}

impl ExportSettings {
    pub fn frame_count(&self, loop_duration: f32) -> u32 {
        let per_loop = (loop_duration * self.fps.max(1) as f32).round() as u32;
        per_loop * self.loops
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportProgress {
    /// Frames handed to the sink so far.
    pub frame: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Completed { frames: u32, path: PathBuf },
    Cancelled { frames_rendered: u32 },
}

pub struct Exporter {
    settings: ExportSettings,
    cancel: CancelToken,
    overlay: Option<HdrImage>,
}

impl Exporter {
    pub fn new(settings: ExportSettings) -> Self {
        Self {
            settings,
            cancel: CancelToken::new(),
            overlay: None,
        }
    }

    /// Premultiplied overlay, resampled to the export size when it differs.
    pub fn with_overlay(mut self, overlay: HdrImage) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Token that stops the run before the next frame.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Render `loops` loops of `session` on `backend` into `sink`. Audio is
    /// synthesized from a fresh core so identical inputs give identical frames.
    pub fn run<B: RenderBackend>(
        &self,
        backend: B,
        session: &SessionConfig,
        render: RenderSettings,
        sink: &mut dyn FrameSink,
        mut progress: impl FnMut(ExportProgress),
    ) -> Result<ExportOutcome, ExportError> {
        let fps = self.settings.fps.max(1);
        let mut visualizer = Visualizer::new(backend, session, render, FramePacing::Fixed { fps });
        let mut audio = ReactiveCore::prepare(ReactiveConfig::for_session(visualizer.config()));
        let total = self.settings.frame_count(visualizer.loop_duration());

        if let Err(e) = visualizer.set_overlay(self.overlay.as_ref()) {
            return Err(abort(sink, e.into()));
        }

        log::info!(
            "Exporting {total} frames at {fps} fps ({} backend)",
            visualizer.backend().name()
        );
        visualizer.start();

        for index in 0..total {
            if self.cancel.is_cancelled() {
                sink.discard()?;
                log::info!("Export cancelled after {index} frames");
                return Ok(ExportOutcome::Cancelled {
                    frames_rendered: index,
                });
            }

            let frame = match visualizer.tick(0.0, &mut audio, true) {
                Ok(TickOutcome::Rendered(Some(frame))) => frame,
                Ok(_) => return Err(abort(sink, ExportError::FrameDropped(index))),
                Err(e) => return Err(abort(sink, e.into())),
            };
            if let Err(e) = sink.write_frame(index, &frame) {
                return Err(abort(sink, e));
            }
            progress(ExportProgress {
                frame: index + 1,
                total,
            });
        }

        visualizer.stop();
        match sink.finish() {
            Ok(path) => Ok(ExportOutcome::Completed {
                frames: total,
                path,
            }),
            Err(e) => Err(abort(sink, e)),
        }
    }
}

/// Discard partial output and pass `error` through.
fn abort(sink: &mut dyn FrameSink, error: ExportError) -> ExportError {
    log::error!("Export failed: {error}");
    if let Err(e) = sink.discard() {
        log::warn!("Failed to remove partial export: {e}");
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;

    fn render_settings() -> RenderSettings {
        RenderSettings {
            particle_capacity: 256,
            active_particles: 256,
            ..Default::default()
        }
    }

    fn export(
        exporter: &Exporter,
        output: &Path,
        progress: impl FnMut(ExportProgress),
    ) -> Result<ExportOutcome, ExportError> {
        let render = render_settings();
        let mut sink = PngSequenceSink::create(output)?;
        exporter.run(
            CpuBackend::new(16, 12, &render),
            &SessionConfig::default(),
            render,
            &mut sink,
            progress,
        )
    }

    fn png_count(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "png"))
            .count()
    }

    #[test]
    fn frame_count_covers_whole_loops() {
        let s = ExportSettings { fps: 30, loops: 2 };
        assert_eq!(s.frame_count(5.0), 300);
        assert_eq!(ExportSettings { fps: 24, loops: 1 }.frame_count(3.5), 84);
    }

    #[test]
    fn staging_sits_next_to_output() {
        assert_eq!(
            staging_path(Path::new("/tmp/out/frames")),
            Some(PathBuf::from("/tmp/out/frames.partial"))
        );
        assert_eq!(staging_path(Path::new("/")), None);
    }

    #[test]
    fn completed_export_publishes_numbered_pngs() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join("frames");
        let exporter = Exporter::new(ExportSettings { fps: 4, loops: 1 });

        let mut seen = Vec::new();
        let outcome = export(&exporter, &output, |p| seen.push(p)).unwrap();

        assert_eq!(
            outcome,
            ExportOutcome::Completed {
                frames: 20,
                path: output.clone()
            }
        );
        assert_eq!(png_count(&output), 20);
        assert!(!tmp.path().join("frames.partial").exists());
        assert_eq!(seen.len(), 20);
        assert_eq!(seen.last(), Some(&ExportProgress { frame: 20, total: 20 }));

        let first = image::open(output.join(frame_file_name(0))).unwrap();
        assert_eq!((first.width(), first.height()), (16, 12));
        assert!(output.join(frame_file_name(19)).exists());
    }

    #[test]
    fn cancel_before_start_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join("frames");
        let exporter = Exporter::new(ExportSettings { fps: 4, loops: 1 });
        exporter.cancel_token().cancel();

        let outcome = export(&exporter, &output, |_| {}).unwrap();
        assert_eq!(outcome, ExportOutcome::Cancelled { frames_rendered: 0 });
        assert!(!output.exists());
        assert!(!tmp.path().join("frames.partial").exists());
    }

    #[test]
    fn cancel_mid_run_discards_partial_output() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join("frames");
        let exporter = Exporter::new(ExportSettings { fps: 4, loops: 1 });
        let token = exporter.cancel_token();

        let outcome = export(&exporter, &output, |p| {
            if p.frame == 3 {
                token.cancel();
            }
        })
        .unwrap();
        assert_eq!(outcome, ExportOutcome::Cancelled { frames_rendered: 3 });
        assert!(!output.exists());
        assert!(!tmp.path().join("frames.partial").exists());
    }

    #[test]
    fn exports_are_reproducible() {
        let tmp = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(ExportSettings { fps: 4, loops: 1 });
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        export(&exporter, &a, |_| {}).unwrap();
        export(&exporter, &b, |_| {}).unwrap();

        for index in [0, 7, 19] {
            let name = frame_file_name(index);
            assert_eq!(fs::read(a.join(&name)).unwrap(), fs::read(b.join(&name)).unwrap());
        }
    }

    fn png_mean(path: &Path) -> f64 {
        let img = image::open(path).unwrap().into_rgb8();
        let sum: u64 = img.as_raw().iter().map(|&c| c as u64).sum();
        sum as f64 / img.as_raw().len() as f64
    }

    #[test]
    fn overlay_brightens_text_frames_only() {
        let tmp = tempfile::tempdir().unwrap();
        let plain = tmp.path().join("plain");
        let lit = tmp.path().join("lit");
        let settings = ExportSettings { fps: 4, loops: 1 };
        export(&Exporter::new(settings), &plain, |_| {}).unwrap();
        let overlay = HdrImage::filled(16, 12, [0.8, 0.8, 0.8, 1.0]);
        export(&Exporter::new(settings).with_overlay(overlay), &lit, |_| {}).unwrap();

        // t = 0.5 s: chaos, text hidden.
        let chaos = frame_file_name(2);
        assert_eq!(
            fs::read(plain.join(&chaos)).unwrap(),
            fs::read(lit.join(&chaos)).unwrap()
        );
        // t = 2.0 s forming, t = 3.5 s fully visible.
        for index in [8, 14] {
            let name = frame_file_name(index);
            assert!(
                png_mean(&lit.join(&name)) > png_mean(&plain.join(&name)) + 1.0,
                "frame {index}"
            );
        }
    }

    #[test]
    fn existing_output_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join("frames");
        fs::create_dir(&output).unwrap();
        assert!(matches!(
            PngSequenceSink::create(&output),
            Err(ExportError::OutputExists(_))
        ));
    }

    #[test]
    fn malformed_frame_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = PngSequenceSink::create(tmp.path().join("frames")).unwrap();
        let frame = Frame {
            width: 4,
            height: 4,
            rgba: vec![0; 10],
        };
        assert!(matches!(
            sink.write_frame(0, &frame),
            Err(ExportError::InvalidFrame { index: 0, .. })
        ));
        sink.discard().unwrap();
        assert!(!sink.staging_dir().exists());
    }
}
