use std::sync::Arc;

use wgpu::{
    Adapter, Device, DeviceDescriptor, ExperimentalFeatures, Instance, InstanceDescriptor,
    MemoryHints, PowerPreference, Queue, RequestAdapterOptions, Surface, SurfaceConfiguration,
    SurfaceTexture, TextureFormat, TextureUsages, Trace,
};
use winit::window::Window;

use crate::pipeline::BackendError;

/// Output format used when there is no surface (export, tests).
pub const CAPTURE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Presentation surface plus its configuration.
pub struct Presenter {
    pub surface: Surface<'static>,
    pub config: SurfaceConfiguration,
}

pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    pub presenter: Option<Presenter>,
    /// Format the composite pass writes to the presentable target.
    pub format: TextureFormat,
}

fn setup_err(e: impl std::fmt::Display) -> BackendError {
    BackendError::Setup(e.to_string())
}

fn request_device(adapter: &Adapter) -> Result<(Device, Queue), BackendError> {
    pollster::block_on(adapter.request_device(&DeviceDescriptor {
        label: Some("pulsefield-device"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        experimental_features: ExperimentalFeatures::default(),
        memory_hints: MemoryHints::Performance,
        trace: Trace::Off,
    }))
    .map_err(setup_err)
}

impl GpuContext {
    /// Device and surface for a window.
    pub fn new(window: Arc<Window>) -> Result<Self, BackendError> {
        let instance = Instance::new(&InstanceDescriptor::default());

        let surface = instance.create_surface(window.clone()).map_err(setup_err)?;

        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(setup_err)?;

        let (device, queue) = request_device(&adapter)?;

        let size = window.inner_size();
        let capabilities = surface.get_capabilities(&adapter);
        // The composite pass encodes gamma itself.
        let format = capabilities
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or(capabilities.formats.first())
            .copied()
            .ok_or_else(|| BackendError::Setup("surface reports no formats".into()))?;
        let alpha_mode = capabilities
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            desired_maximum_frame_latency: 2,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        log::info!(
            "GPU initialized: {} ({:?}), surface {format:?}",
            adapter.get_info().name,
            adapter.get_info().backend
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            presenter: Some(Presenter { surface, config }),
            format,
        })
    }

    /// Device without a surface, for offline export.
    pub fn headless() -> Result<Self, BackendError> {
        let instance = Instance::new(&InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(setup_err)?;

        let (device, queue) = request_device(&adapter)?;

        log::info!(
            "GPU initialized headless: {} ({:?})",
            adapter.get_info().name,
            adapter.get_info().backend
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            presenter: None,
            format: CAPTURE_FORMAT,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if let Some(p) = &mut self.presenter
            && width > 0
            && height > 0
        {
            p.config.width = width;
            p.config.height = height;
            p.surface.configure(&self.device, &p.config);
        }
    }

    /// Next swapchain image. Lost/outdated surfaces are reconfigured and the
    /// tick is reported as skippable.
    pub fn acquire(&self) -> Result<Option<SurfaceTexture>, BackendError> {
        let Some(p) = &self.presenter else {
            return Ok(None);
        };
        match p.surface.get_current_texture() {
            Ok(texture) => Ok(Some(texture)),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                p.surface.configure(&self.device, &p.config);
                Err(BackendError::Transient("surface lost, reconfigured".into()))
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                Err(BackendError::Setup("out of GPU memory".into()))
            }
            Err(e) => Err(BackendError::Transient(e.to_string())),
        }
    }

    /// Run `f` inside a validation error scope and turn any error into
    /// `BackendError::Setup`.
    pub fn checked<T>(&self, label: &str, f: impl FnOnce(&Device) -> T) -> Result<T, BackendError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = f(&self.device);
        let oom = pollster::block_on(self.device.pop_error_scope());
        let validation = pollster::block_on(self.device.pop_error_scope());
        match oom.or(validation) {
            Some(e) => {
                log::error!("Failed to create {label}: {e}");
                Err(BackendError::Setup(format!("{label}: {e}")))
            }
            None => Ok(value),
        }
    }
}
