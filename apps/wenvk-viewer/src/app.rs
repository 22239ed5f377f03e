//! Viewer application.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use tracing::info;
use winit::event::ElementState;
use winit::keyboard::{KeyCode, PhysicalKey};

use wenvk_app::{AppContext, FrameContext, WenApp, WindowEvent};
use wenvk_gpu::barrier::transition_image;
use wenvk_gpu::command::{blit_image, clear_color_image};
use wenvk_gpu::NBuffer;

/// Per-frame values streamed to the GPU.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct FrameUniforms {
    pub time: f32,
    pub delta: f32,
    pub resolution: [f32; 2],
    pub frame: u32,
    pub white_texture: u32,
    pub error_texture: u32,
    pub _pad: u32,
}

/// Cycle through hues over time.
fn animated_color(time: f32) -> Vec4 {
    let phase = time * 0.5;
    Vec4::new(
        0.5 + 0.5 * phase.sin(),
        0.5 + 0.5 * (phase + 2.094).sin(),
        0.5 + 0.5 * (phase + 4.188).sin(),
        1.0,
    )
}

pub struct Viewer {
    uniforms: Option<NBuffer>,
    time: f32,
    show_error_texture: bool,
    nearest_blit: bool,
}

impl WenApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let instance = &ctx.instance;
        info!(
            "Default textures: white {:?}, error {:?}",
            instance.white_texture_id(),
            instance.error_texture_id()
        );
        info!(
            "Swapchain {:?} {}x{}, max MSAA {:?}",
            instance.swapchain_format(),
            instance.swapchain_extent().width,
            instance.swapchain_extent().height,
            instance.max_sample_count()
        );

        let uniforms = instance.make_nbuffer(
            std::mem::size_of::<FrameUniforms>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER,
            "frame uniforms",
        )?;
        info!(
            "Frame uniforms at {:#x}",
            instance.buffer_device_address(uniforms.buffer())
        );

        Ok(Self {
            uniforms: Some(uniforms),
            time: 0.0,
            show_error_texture: false,
            nearest_blit: false,
        })
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        self.time += dt;
    }

    fn render(&mut self, ctx: &mut AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
        let cmd = frame.command_buffer;
        let instance = &ctx.instance;
        let device = instance.device();
        let draw_image = ctx.draw_image_handle();
        let extent = ctx.render_extent;

        if let Some(uniforms) = &self.uniforms {
            let data = FrameUniforms {
                time: self.time,
                delta: frame.dt,
                resolution: [extent.width as f32, extent.height as f32],
                frame: frame.frame_number as u32,
                white_texture: instance.white_texture_id().index(),
                error_texture: instance.error_texture_id().index(),
                _pad: 0,
            };
            unsafe {
                instance.upload_nbuffer(cmd, uniforms, bytemuck::bytes_of(&data), 0, true);
            }
        }

        unsafe {
            transition_image(
                device,
                cmd,
                draw_image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
            );
            clear_color_image(device, cmd, draw_image, animated_color(self.time).to_array());
        }
        let mut draw_layout = vk::ImageLayout::GENERAL;

        if self.show_error_texture {
            if let Some(error) = instance.get_texture(instance.error_texture_id()) {
                let color = vk::ImageAspectFlags::COLOR;
                unsafe {
                    transition_image(
                        device,
                        cmd,
                        draw_image,
                        color,
                        vk::ImageLayout::GENERAL,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    );
                    transition_image(
                        device,
                        cmd,
                        error.image(),
                        color,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    );
                    blit_image(
                        device,
                        cmd,
                        error.image(),
                        draw_image,
                        vk::Rect2D {
                            offset: vk::Offset2D::default(),
                            extent: error.extent_2d(),
                        },
                        extent,
                        vk::Filter::NEAREST,
                    );
                    transition_image(
                        device,
                        cmd,
                        error.image(),
                        color,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    );
                }
                draw_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
            }
        }

        frame.end_params = frame
            .end_params
            .with_draw_image_layout(draw_layout)
            .with_linear_blit(!self.nearest_blit)
            .with_ui(false);
        Ok(())
    }

    fn on_resize(&mut self, _ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        info!("Swapchain resized to {width}x{height}");
        Ok(())
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        let WindowEvent::KeyboardInput { event, .. } = event else {
            return false;
        };
        if event.state != ElementState::Pressed || event.repeat {
            return false;
        }

        match event.physical_key {
            PhysicalKey::Code(KeyCode::KeyE) => {
                self.show_error_texture = !self.show_error_texture;
                info!("Error texture overlay: {}", self.show_error_texture);
                true
            }
            PhysicalKey::Code(KeyCode::KeyN) => {
                self.nearest_blit = !self.nearest_blit;
                info!("Nearest blit: {}", self.nearest_blit);
                true
            }
            _ => false,
        }
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        if let Some(uniforms) = self.uniforms.take() {
            ctx.instance.destroy_nbuffer(uniforms);
        }
    }
}
