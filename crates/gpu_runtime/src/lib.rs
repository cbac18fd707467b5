//! wgpu implementation of the tile texture allocator.
//!
//! Tile textures are fixed-size render-attachment targets the per-tile
//! scene renderer paints into and the draw pass samples from. The
//! allocator enforces a byte budget so exhaustion surfaces as a `None`
//! bind (the cache degrades to coarser tiles) instead of a device loss.

use surface_protocol::TileTextureAllocator;

/// One GPU tile texture: the resource plus its sampleable view.
#[derive(Debug)]
pub struct WgpuTileTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    edge_texels: u32,
}

impl WgpuTileTexture {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn edge_texels(&self) -> u32 {
        self.edge_texels
    }

    /// Binds the texture as the active render target, cleared to
    /// transparent black, viewport covering the full tile.
    pub fn begin_tile_render_pass<'encoder>(
        &self,
        encoder: &'encoder mut wgpu::CommandEncoder,
    ) -> wgpu::RenderPass<'encoder> {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("gpu_runtime.tile_target"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.view,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_viewport(
            0.0,
            0.0,
            self.edge_texels as f32,
            self.edge_texels as f32,
            0.0,
            1.0,
        );
        pass
    }
}

/// Byte accounting for outstanding tile textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBudget {
    max_bytes: u64,
    used_bytes: u64,
}

impl TextureBudget {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            used_bytes: 0,
        }
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub fn try_reserve(&mut self, bytes: u64) -> bool {
        let Some(next) = self.used_bytes.checked_add(bytes) else {
            return false;
        };
        if next > self.max_bytes {
            return false;
        }
        self.used_bytes = next;
        true
    }

    pub fn release(&mut self, bytes: u64) {
        self.used_bytes = self.used_bytes.saturating_sub(bytes);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WgpuAllocatorConfig {
    pub format: wgpu::TextureFormat,
    /// Upper bound on bytes held across all live tile textures.
    pub max_texture_bytes: u64,
}

impl Default for WgpuAllocatorConfig {
    fn default() -> Self {
        Self {
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            // 512 full-resolution 512x512 RGBA tiles
            max_texture_bytes: 512 * 512 * 512 * 4,
        }
    }
}

pub struct WgpuTileTextureAllocator {
    device: wgpu::Device,
    config: WgpuAllocatorConfig,
    budget: TextureBudget,
}

impl WgpuTileTextureAllocator {
    pub fn new(device: wgpu::Device, config: WgpuAllocatorConfig) -> Self {
        Self {
            device,
            config,
            budget: TextureBudget::new(config.max_texture_bytes),
        }
    }

    pub fn budget(&self) -> TextureBudget {
        self.budget
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn texture_descriptor(&self, edge_texels: u32) -> wgpu::TextureDescriptor<'static> {
        wgpu::TextureDescriptor {
            label: Some("gpu_runtime.tile_texture"),
            size: wgpu::Extent3d {
                width: edge_texels,
                height: edge_texels,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.config.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        }
    }
}

impl TileTextureAllocator for WgpuTileTextureAllocator {
    type Texture = WgpuTileTexture;

    fn create_texture(&mut self, edge_texels: u32) -> Option<WgpuTileTexture> {
        if edge_texels == 0 {
            return None;
        }
        if !self.budget.try_reserve(self.texture_bytes(edge_texels)) {
            return None;
        }
        let texture = self.device.create_texture(&self.texture_descriptor(edge_texels));
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Some(WgpuTileTexture {
            texture,
            view,
            edge_texels,
        })
    }

    fn destroy_texture(&mut self, texture: WgpuTileTexture) {
        self.budget.release(self.texture_bytes(texture.edge_texels));
        texture.texture.destroy();
    }
}

/// Blocking helpers for setup outside the frame loop.
#[cfg(feature = "blocking")]
pub mod blocking {
    use std::fmt;

    #[derive(Debug)]
    pub enum DeviceSetupError {
        NoAdapter,
        Device(wgpu::RequestDeviceError),
    }

    impl fmt::Display for DeviceSetupError {
        fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                DeviceSetupError::NoAdapter => write!(formatter, "no compatible gpu adapter"),
                DeviceSetupError::Device(error) => {
                    write!(formatter, "gpu device request failed: {error}")
                }
            }
        }
    }

    impl std::error::Error for DeviceSetupError {}

    /// Requests a device/queue pair from the first available adapter.
    pub fn request_device() -> Result<(wgpu::Device, wgpu::Queue), DeviceSetupError> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .map_err(|_| DeviceSetupError::NoAdapter)?;
        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default()))
            .map_err(DeviceSetupError::Device)
    }
}
