//! Frame pacing: slot indexing, per-slot command recording and end-of-frame parameters.

use crate::command::CommandPool;
use crate::context::GpuContext;
use crate::error::Result;
use ash::vk;
use glam::Vec4;

/// Number of frames the CPU may record ahead of the GPU.
pub const FRAME_OVERLAP: usize = 3;

/// Monotonic frame counter.
///
/// Frame `n` uses slot `n % FRAME_OVERLAP`, so a slot is reused by frame `n + FRAME_OVERLAP` only
/// after that slot's fence has signaled for frame `n`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounter {
    frame_number: u64,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames submitted so far.
    pub fn frame_number(self) -> u64 {
        self.frame_number
    }

    /// Slot of the frame being recorded.
    pub fn index(self) -> usize {
        Self::slot_of(self.frame_number)
    }

    /// Slot used by frame `frame_number`.
    pub fn slot_of(frame_number: u64) -> usize {
        (frame_number % FRAME_OVERLAP as u64) as usize
    }

    /// Move on after a successful submission.
    pub fn advance(&mut self) {
        self.frame_number += 1;
    }
}

/// Command recording resources of one frame slot.
pub struct FrameData {
    pool: CommandPool,
    command_buffer: vk::CommandBuffer,
}

impl FrameData {
    /// Create a resettable pool and its primary command buffer.
    pub fn new(gpu: &GpuContext, slot: usize) -> Result<Self> {
        let device = gpu.device();
        let pool = unsafe {
            CommandPool::new(
                device,
                gpu.graphics_queue_family(),
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )?
        };
        let command_buffer = match unsafe { pool.allocate_command_buffer(device) } {
            Ok(cmd) => cmd,
            Err(e) => {
                unsafe { pool.destroy(device) };
                return Err(e);
            }
        };

        gpu.set_object_name(pool.handle(), &format!("frame {slot} pool"));
        gpu.set_object_name(command_buffer, &format!("frame {slot} commands"));
        Ok(Self {
            pool,
            command_buffer,
        })
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Destroy the pool and its command buffer.
    ///
    /// # Safety
    /// The command buffer must not be pending.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        self.pool.destroy(device);
    }
}

/// What `end_frame` does with the swapchain image.
#[derive(Debug, Clone, Copy)]
pub struct EndFrameParams {
    /// Color the swapchain image is cleared to first
    pub clear_color: Vec4,
    /// Blit the draw image into the swapchain image
    pub blit_into_swapchain: bool,
    /// Source rectangle of the blit, the whole draw image when `None`
    pub blit_rect: Option<vk::Rect2D>,
    /// Linear filtering for the blit instead of nearest
    pub linear_blit: bool,
    /// Let the UI overlay draw on top
    pub draw_ui: bool,
    /// Layout the draw image is left in by the frame's rendering
    pub draw_image_layout: vk::ImageLayout,
}

impl Default for EndFrameParams {
    fn default() -> Self {
        Self {
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            blit_into_swapchain: true,
            blit_rect: None,
            linear_blit: true,
            draw_ui: true,
            draw_image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    }
}

impl EndFrameParams {
    pub fn with_clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_blit(mut self, blit: bool) -> Self {
        self.blit_into_swapchain = blit;
        self
    }

    pub fn with_blit_rect(mut self, rect: vk::Rect2D) -> Self {
        self.blit_rect = Some(rect);
        self
    }

    pub fn with_linear_blit(mut self, linear: bool) -> Self {
        self.linear_blit = linear;
        self
    }

    pub fn with_ui(mut self, draw_ui: bool) -> Self {
        self.draw_ui = draw_ui;
        self
    }

    pub fn with_draw_image_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.draw_image_layout = layout;
        self
    }

    /// Filter used for the blit.
    pub fn blit_filter(&self) -> vk::Filter {
        if self.linear_blit {
            vk::Filter::LINEAR
        } else {
            vk::Filter::NEAREST
        }
    }

    /// Source rectangle for a draw image of `extent`.
    pub fn source_rect(&self, extent: vk::Extent2D) -> vk::Rect2D {
        self.blit_rect.unwrap_or(vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cycle_through_overlap() {
        let mut counter = FrameCounter::new();
        let slots: Vec<_> = (0..7)
            .map(|_| {
                let slot = counter.index();
                counter.advance();
                slot
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(counter.frame_number(), 7);
    }

    /// Per-slot fence model: a slot's fence belongs to the last submission made with it.
    #[test]
    fn frame_waits_for_submission_three_frames_back() {
        let mut fence_owner: [Option<u64>; FRAME_OVERLAP] = [None; FRAME_OVERLAP];
        let mut counter = FrameCounter::new();

        for _ in 0..20 {
            let n = counter.frame_number();
            let slot = counter.index();

            // begin_frame waits on whatever last signaled this slot
            let waited_on = fence_owner[slot];
            let expected = n.checked_sub(FRAME_OVERLAP as u64);
            assert_eq!(waited_on, expected);

            fence_owner[slot] = Some(n);
            counter.advance();
        }
    }

    #[test]
    fn end_frame_defaults() {
        let params = EndFrameParams::default();
        assert!(params.blit_into_swapchain);
        assert!(params.draw_ui);
        assert_eq!(params.blit_filter(), vk::Filter::LINEAR);
        assert_eq!(params.clear_color, Vec4::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn blit_source_defaults_to_full_image() {
        let extent = vk::Extent2D {
            width: 640,
            height: 360,
        };
        let full = EndFrameParams::default().source_rect(extent);
        assert_eq!(full.extent, extent);
        assert_eq!(full.offset, vk::Offset2D::default());

        let rect = vk::Rect2D {
            offset: vk::Offset2D { x: 8, y: 8 },
            extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
        };
        let params = EndFrameParams::default()
            .with_blit_rect(rect)
            .with_linear_blit(false);
        assert_eq!(params.source_rect(extent), rect);
        assert_eq!(params.blit_filter(), vk::Filter::NEAREST);
    }
}
