//! Command buffer management and the transfer commands the frame loop records.

use crate::error::Result;
use ash::vk;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a single primary command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffer(&self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = device.allocate_command_buffers(&alloc_info)?;
        Ok(buffers[0])
    }

    /// Destroy the command pool, freeing its command buffers.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Reset and begin recording a one-time-submit command buffer.
///
/// # Safety
/// The command buffer must not be pending and its pool must allow individual resets.
pub unsafe fn begin_one_time(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Semaphore wait or signal for [`submit2`].
#[derive(Debug, Clone, Copy)]
pub struct SemaphoreStage {
    pub semaphore: vk::Semaphore,
    pub stage: vk::PipelineStageFlags2,
}

/// Submit one command buffer with `vkQueueSubmit2`.
///
/// # Safety
/// All handles must be valid and the command buffer must be executable.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn submit2(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    wait: Option<SemaphoreStage>,
    signal: Option<SemaphoreStage>,
    fence: vk::Fence,
) -> Result<()> {
    let cmd_info = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];

    let wait_info: Vec<_> = wait
        .iter()
        .map(|w| {
            vk::SemaphoreSubmitInfo::default()
                .semaphore(w.semaphore)
                .stage_mask(w.stage)
        })
        .collect();
    let signal_info: Vec<_> = signal
        .iter()
        .map(|s| {
            vk::SemaphoreSubmitInfo::default()
                .semaphore(s.semaphore)
                .stage_mask(s.stage)
        })
        .collect();

    let submit = vk::SubmitInfo2::default()
        .command_buffer_infos(&cmd_info)
        .wait_semaphore_infos(&wait_info)
        .signal_semaphore_infos(&signal_info);

    device.queue_submit2(queue, &[submit], fence)?;
    Ok(())
}

fn extent_to_offset(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: i32::try_from(extent.width).unwrap_or(i32::MAX),
        y: i32::try_from(extent.height).unwrap_or(i32::MAX),
        z: 1,
    }
}

/// Source and destination corners of a blit from `src` into the full `dst_extent`.
pub fn blit_region(src: vk::Rect2D, dst_extent: vk::Extent2D) -> vk::ImageBlit2<'static> {
    let src_min = vk::Offset3D {
        x: src.offset.x,
        y: src.offset.y,
        z: 0,
    };
    let mut src_max = extent_to_offset(src.extent);
    src_max.x = src_max.x.saturating_add(src.offset.x);
    src_max.y = src_max.y.saturating_add(src.offset.y);

    let color_layer = vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1);

    vk::ImageBlit2::default()
        .src_offsets([src_min, src_max])
        .dst_offsets([vk::Offset3D::default(), extent_to_offset(dst_extent)])
        .src_subresource(color_layer)
        .dst_subresource(color_layer)
}

/// Record a scaled blit from a TRANSFER_SRC image into a TRANSFER_DST image.
///
/// # Safety
/// The command buffer must be recording and the images must be in the stated layouts.
pub unsafe fn blit_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: vk::Image,
    dst: vk::Image,
    src_rect: vk::Rect2D,
    dst_extent: vk::Extent2D,
    filter: vk::Filter,
) {
    let regions = [blit_region(src_rect, dst_extent)];
    let blit_info = vk::BlitImageInfo2::default()
        .src_image(src)
        .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .dst_image(dst)
        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .regions(&regions)
        .filter(filter);

    device.cmd_blit_image2(cmd, &blit_info);
}

/// Clear a color image in GENERAL layout.
///
/// # Safety
/// The command buffer must be recording and the image must be in GENERAL layout.
pub unsafe fn clear_color_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    color: [f32; 4],
) {
    let clear = vk::ClearColorValue { float32: color };
    let range = vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .layer_count(vk::REMAINING_ARRAY_LAYERS);

    device.cmd_clear_color_image(cmd, image, vk::ImageLayout::GENERAL, &clear, &[range]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blit_region_spans_source_rect_and_full_destination() {
        let src = vk::Rect2D {
            offset: vk::Offset2D { x: 10, y: 20 },
            extent: vk::Extent2D {
                width: 100,
                height: 50,
            },
        };
        let dst = vk::Extent2D {
            width: 1920,
            height: 1080,
        };

        let region = blit_region(src, dst);
        assert_eq!(region.src_offsets[0], vk::Offset3D { x: 10, y: 20, z: 0 });
        assert_eq!(region.src_offsets[1], vk::Offset3D { x: 110, y: 70, z: 1 });
        assert_eq!(region.dst_offsets[0], vk::Offset3D { x: 0, y: 0, z: 0 });
        assert_eq!(
            region.dst_offsets[1],
            vk::Offset3D {
                x: 1920,
                y: 1080,
                z: 1
            }
        );
        assert_eq!(region.src_subresource.layer_count, 1);
    }
}
