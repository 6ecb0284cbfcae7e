/// Output resolution in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width.max(1),
            height: self.height.max(1),
            depth_or_array_layers: 1,
        }
    }
}

fn create_target(
    device: &wgpu::Device,
    size: Resolution,
    format: wgpu::TextureFormat,
    label: &'static str,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: size.extent(),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

/// The geometry passes write into a multi-render-target framebuffer: a
/// packed color target plus an integer per-fragment data target the
/// composition pass resolves block materials from.
pub struct RenderTargets {
    pub size: Resolution,
    pub color: wgpu::TextureView,
    pub fragment_data: wgpu::TextureView,
    pub depth: wgpu::TextureView,
    /// Composition output; also the input of the bloom chain.
    pub scene: wgpu::TextureView,
    _textures: [wgpu::Texture; 4],
}

impl RenderTargets {
    pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgb10a2Unorm;
    pub const FRAGMENT_DATA_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Sint;
    pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
    pub const SCENE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8UnormSrgb;

    pub fn new(device: &wgpu::Device, size: Resolution) -> Self {
        let (color_texture, color) =
            create_target(device, size, Self::COLOR_FORMAT, "Chunk color target");
        let (data_texture, fragment_data) = create_target(
            device,
            size,
            Self::FRAGMENT_DATA_FORMAT,
            "Chunk fragment data target",
        );
        let (depth_texture, depth) =
            create_target(device, size, Self::DEPTH_FORMAT, "Chunk depth target");
        let (scene_texture, scene) =
            create_target(device, size, Self::SCENE_FORMAT, "Scene target");

        RenderTargets {
            size,
            color,
            fragment_data,
            depth,
            scene,
            _textures: [color_texture, data_texture, depth_texture, scene_texture],
        }
    }

    pub fn resize(&mut self, device: &wgpu::Device, size: Resolution) {
        if size != self.size {
            *self = RenderTargets::new(device, size);
        }
    }
}
