//! Application context.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use wenvk_gpu::{Instance, InstanceConfig, TextureCreateInfo, TextureId};
use winit::window::Window;

use crate::runner::AppConfig;

/// Format of the offscreen image applications render into.
pub const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Application context shared across all app methods.
pub struct AppContext {
    /// The window handle.
    pub window: Arc<Window>,
    /// The engine instance.
    pub instance: Instance,
    /// Offscreen image blitted to the swapchain every frame.
    pub draw_image: TextureId,
    /// Size of `draw_image`.
    pub render_extent: vk::Extent2D,
    pub(crate) last_frame_time: Instant,
}

impl AppContext {
    pub(crate) fn new(window: Arc<Window>, config: &AppConfig) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let instance_config = InstanceConfig::new(&config.title)
            .with_size(size.width.max(1), size.height.max(1))
            .with_vsync(config.vsync)
            .with_validation(config.validation);

        let mut instance = Instance::new(window.as_ref(), instance_config)?;

        let render_extent = vk::Extent2D {
            width: config.render_width,
            height: config.render_height,
        };
        let draw_info = TextureCreateInfo::new_2d(
            DRAW_IMAGE_FORMAT,
            render_extent.width,
            render_extent.height,
        )
        .with_usage(
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
        );
        let draw_image = instance.make_texture(&draw_info, "draw image")?;

        tracing::info!(
            "Rendering at {}x{} into a {}x{} window",
            render_extent.width,
            render_extent.height,
            instance.swapchain_extent().width,
            instance.swapchain_extent().height
        );

        Ok(Self {
            window,
            instance,
            draw_image,
            render_extent,
            last_frame_time: Instant::now(),
        })
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.instance.swapchain_extent()
    }

    /// Aspect ratio of the render target (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        self.render_extent.width as f32 / self.render_extent.height.max(1) as f32
    }

    /// Raw image handle of the draw image.
    pub fn draw_image_handle(&self) -> vk::Image {
        self.instance
            .get_texture(self.draw_image)
            .map_or(vk::Image::null(), wenvk_gpu::Texture::image)
    }

    pub(crate) fn cleanup(&mut self) -> anyhow::Result<()> {
        self.instance.cleanup()?;
        Ok(())
    }
}
