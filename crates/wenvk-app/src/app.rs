//! `WenApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use winit::event::{DeviceEvent, DeviceId, WindowEvent};

/// Trait for wenvk applications.
///
/// The framework owns the window and the [`Instance`](wenvk_gpu::Instance), drives
/// `begin_frame`/`end_frame`, recreates the swapchain when it goes out of date and blits the
/// application's draw image to the screen.
pub trait WenApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window, the instance and the draw image exist.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before rendering.
    ///
    /// # Arguments
    /// * `ctx` - Application context with instance and window access
    /// * `dt` - Delta time in seconds since last frame
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record the frame into `frame.command_buffer`.
    ///
    /// The framework handles:
    /// - Waiting for the frame slot and beginning the command buffer
    /// - Acquiring the swapchain image, blitting `frame.draw_image` into it
    /// - Submitting and presenting
    ///
    /// Adjust `frame.end_params` to change how the draw image reaches the screen.
    fn render(&mut self, ctx: &mut AppContext, frame: &mut FrameContext) -> anyhow::Result<()>;

    /// Called after the swapchain was recreated for a new window size.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed further.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Handle device events (raw input).
    #[allow(unused_variables)]
    fn on_device_event(&mut self, device_id: DeviceId, event: &DeviceEvent) {}

    /// Release the application's GPU resources.
    ///
    /// The device is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
