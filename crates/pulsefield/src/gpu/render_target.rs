use wgpu::{Device, Sampler, Texture, TextureFormat, TextureUsages, TextureView};

/// An off-screen target with texture, view and a clamp-to-edge linear sampler.
pub struct RenderTarget {
    pub texture: Texture,
    pub view: TextureView,
    pub sampler: Sampler,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    label: &'static str,
}

impl RenderTarget {
    pub fn new(
        device: &Device,
        width: u32,
        height: u32,
        format: TextureFormat,
        label: &'static str,
    ) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: TextureUsages::RENDER_ATTACHMENT
                | TextureUsages::TEXTURE_BINDING
                | TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{label}-sampler")),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });

        Self {
            texture,
            view,
            sampler,
            format,
            width,
            height,
            label,
        }
    }

    pub fn resize(&mut self, device: &Device, width: u32, height: u32) {
        if width.max(1) == self.width && height.max(1) == self.height {
            return;
        }
        *self = Self::new(device, width, height, self.format, self.label);
    }
}

/// Two targets swapped every tick: the trail history and the frame being built.
pub struct PingPongTarget {
    pub targets: [RenderTarget; 2],
    pub current: usize,
}

impl PingPongTarget {
    pub fn new(device: &Device, width: u32, height: u32, format: TextureFormat) -> Self {
        let a = RenderTarget::new(device, width, height, format, "trail-a");
        let b = RenderTarget::new(device, width, height, format, "trail-b");
        Self {
            targets: [a, b],
            current: 0,
        }
    }

    /// The target this tick renders into.
    pub fn write_target(&self) -> &RenderTarget {
        &self.targets[self.current]
    }

    /// The previous tick's frame.
    pub fn read_target(&self) -> &RenderTarget {
        &self.targets[1 - self.current]
    }

    pub fn flip(&mut self) {
        self.current = 1 - self.current;
    }

    pub fn resize(&mut self, device: &Device, width: u32, height: u32) {
        self.targets[0].resize(device, width, height);
        self.targets[1].resize(device, width, height);
        self.current = 0;
    }
}
