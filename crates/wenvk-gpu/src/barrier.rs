//! Synchronization2 barrier builders and image layout transitions.

use ash::vk;

/// Barrier placed before a transfer writes into `buffer`.
///
/// Earlier reads of the buffer from any stage must finish before the copy writes it.
pub fn before_transfer_write(buffer: vk::Buffer) -> vk::BufferMemoryBarrier2<'static> {
    vk::BufferMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_READ)
        .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
        .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

/// Barrier placed after a copy into `buffer`.
///
/// Later reads and writes from any stage wait for the copy.
pub fn after_transfer_write(buffer: vk::Buffer) -> vk::BufferMemoryBarrier2<'static> {
    vk::BufferMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::COPY)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

/// Record a single buffer barrier.
///
/// # Safety
/// The command buffer must be recording.
pub unsafe fn record_buffer_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    barrier: &vk::BufferMemoryBarrier2<'_>,
) {
    let dependency_info =
        vk::DependencyInfo::default().buffer_memory_barriers(std::slice::from_ref(barrier));
    device.cmd_pipeline_barrier2(cmd, &dependency_info);
}

/// Full-resource subresource range for `aspect`.
pub fn full_subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .base_array_layer(0)
        .layer_count(vk::REMAINING_ARRAY_LAYERS)
}

/// Layout transition covering every mip and layer of `image`.
pub fn image_transition(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(full_subresource_range(aspect))
}

/// Record a layout transition of every mip and layer of `image`.
///
/// # Safety
/// The command buffer must be recording and `old_layout` must match the image's current layout
/// (or be `UNDEFINED`).
pub unsafe fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let barrier = image_transition(image, aspect, old_layout, new_layout);
    let dependency_info =
        vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
    device.cmd_pipeline_barrier2(cmd, &dependency_info);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn transfer_bracket_orders_reads_and_writes() {
        let buffer = vk::Buffer::from_raw(7);

        let before = before_transfer_write(buffer);
        assert_eq!(before.buffer, buffer);
        assert_eq!(before.src_access_mask, vk::AccessFlags2::MEMORY_READ);
        assert_eq!(before.dst_stage_mask, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(before.size, vk::WHOLE_SIZE);

        let after = after_transfer_write(buffer);
        assert_eq!(after.src_stage_mask, vk::PipelineStageFlags2::COPY);
        assert!(after
            .dst_access_mask
            .contains(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE));
    }

    #[test]
    fn image_transition_covers_all_subresources() {
        let barrier = image_transition(
            vk::Image::from_raw(3),
            vk::ImageAspectFlags::DEPTH,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        let range = barrier.subresource_range;
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(range.layer_count, vk::REMAINING_ARRAY_LAYERS);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }
}
