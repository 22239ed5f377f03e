//! Per-frame context for rendering.

use ash::vk;
use wenvk_gpu::{EndFrameParams, TextureId};

/// The frame being recorded.
pub struct FrameContext {
    /// Command buffer returned by `begin_frame`, recording.
    pub command_buffer: vk::CommandBuffer,
    /// Image blitted to the swapchain at the end of the frame.
    pub draw_image: TextureId,
    /// How the draw image reaches the screen.
    pub end_params: EndFrameParams,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Frames submitted before this one.
    pub frame_number: u64,
    /// Frame slot, `frame_number % FRAME_OVERLAP`.
    pub frame_index: usize,
}

impl FrameContext {
    pub(crate) fn new(
        command_buffer: vk::CommandBuffer,
        draw_image: TextureId,
        dt: f32,
        frame_number: u64,
        frame_index: usize,
    ) -> Self {
        Self {
            command_buffer,
            draw_image,
            end_params: EndFrameParams::default(),
            dt,
            frame_number,
            frame_index,
        }
    }
}
