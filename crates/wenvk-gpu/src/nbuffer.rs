//! N-buffered uploads into one shared device-local buffer.
//!
//! Each frame slot writes its own host-visible staging buffer, then copies into the single
//! device buffer. Because every slot targets the same destination, ordering between frames
//! comes from the barriers around each copy, not from the per-frame fences.

use crate::buffer::{Buffer, TransferPlan};
use crate::context::GpuContext;
use crate::error::{all_or_first_error, Result};
use crate::memory::{GpuAllocator, MemoryPolicy};
use ash::vk;

/// Handles and capacity of an upload ring, enough to plan copies.
#[derive(Debug, Clone)]
pub struct UploadRing {
    capacity: u64,
    device: vk::Buffer,
    staging: Vec<vk::Buffer>,
}

impl UploadRing {
    /// Describe a ring of `staging` buffers feeding `device`, all `capacity` bytes.
    pub fn new(capacity: u64, device: vk::Buffer, staging: Vec<vk::Buffer>) -> Self {
        assert!(!staging.is_empty(), "upload ring needs at least one staging buffer");
        Self {
            capacity,
            device,
            staging,
        }
    }

    /// Number of frame slots.
    pub fn frames(&self) -> usize {
        self.staging.len()
    }

    /// Capacity of every buffer in the ring.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Whether `len` bytes at `offset` fit.
    pub fn fits(&self, offset: u64, len: u64) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.capacity)
    }

    /// Plan the copy of `[offset, offset + len)` from the slot's staging buffer into the device
    /// buffer at the same range.
    ///
    /// # Panics
    /// If `frame_index` is out of range or the range does not fit.
    pub fn plan(&self, frame_index: usize, offset: u64, len: u64, sync: bool) -> TransferPlan {
        assert!(
            frame_index < self.frames(),
            "frame index {frame_index} out of range for {} frames",
            self.frames()
        );
        assert!(
            self.fits(offset, len),
            "upload of {len} bytes at offset {offset} overflows ring of {} bytes",
            self.capacity
        );

        TransferPlan {
            src: self.staging[frame_index],
            dst: self.device,
            region: vk::BufferCopy {
                src_offset: offset,
                dst_offset: offset,
                size: len,
            },
            sync,
        }
    }
}

/// One logical buffer backed by a device-local buffer and one staging buffer per frame.
pub struct NBuffer {
    device_buffer: Buffer,
    staging: Vec<Buffer>,
    ring: UploadRing,
    name: String,
}

impl NBuffer {
    /// Allocate a `size`-byte device buffer and `frames_in_flight` staging buffers.
    pub fn new(
        gpu: &GpuContext,
        size: u64,
        usage: vk::BufferUsageFlags,
        frames_in_flight: usize,
        name: &str,
    ) -> Result<Self> {
        assert!(size > 0, "nbuffer '{name}' must not be empty");
        assert!(frames_in_flight > 0, "nbuffer '{name}' needs at least one frame");

        let device_buffer = Buffer::new(gpu, size, usage, MemoryPolicy::GpuOnly, name)?;

        let mut staging = Vec::with_capacity(frames_in_flight);
        for frame in 0..frames_in_flight {
            let staging_name = format!("{name} staging {frame}");
            staging.push(Buffer::new(
                gpu,
                size,
                vk::BufferUsageFlags::empty(),
                MemoryPolicy::Staging,
                &staging_name,
            )?);
        }

        let ring = UploadRing::new(
            size,
            device_buffer.handle(),
            staging.iter().map(Buffer::handle).collect(),
        );

        Ok(Self {
            device_buffer,
            staging,
            ring,
            name: name.to_string(),
        })
    }

    /// Capacity in bytes.
    pub fn size(&self) -> u64 {
        self.ring.capacity()
    }

    /// Number of staging buffers.
    pub fn frames_in_flight(&self) -> usize {
        self.ring.frames()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared device-local buffer shaders read from.
    pub fn buffer(&self) -> &Buffer {
        &self.device_buffer
    }

    /// Device address of the shared device-local buffer.
    pub fn device_address(&self, device: &ash::Device) -> vk::DeviceAddress {
        self.device_buffer.device_address(device)
    }

    /// Write `data` into the slot's staging buffer at `offset` and record a copy of exactly
    /// those bytes into the device buffer.
    ///
    /// # Safety
    /// `cmd` must be recording, and the slot's previous submission must have completed.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn upload(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        frame_index: usize,
        data: &[u8],
        offset: u64,
        sync: bool,
    ) {
        let plan = self.ring.plan(frame_index, offset, data.len() as u64, sync);
        self.staging[frame_index].copy_data_to_buffer(data, offset);
        plan.record(device, cmd);
    }

    /// Like [`NBuffer::upload`], but skips with a warning when `data` does not fit.
    ///
    /// Returns whether the upload was recorded.
    ///
    /// # Safety
    /// Same as [`NBuffer::upload`].
    pub unsafe fn try_upload(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        frame_index: usize,
        data: &[u8],
        offset: u64,
        sync: bool,
    ) -> bool {
        if !self.ring.fits(offset, data.len() as u64) {
            tracing::warn!(
                "Skipping upload of {} bytes at offset {offset} into '{}' ({} bytes)",
                data.len(),
                self.name,
                self.size()
            );
            return false;
        }
        self.upload(device, cmd, frame_index, data, offset, sync);
        true
    }

    /// Free the device buffer and every staging buffer.
    ///
    /// A failure on one buffer does not stop the others from being released.
    pub fn cleanup(&mut self, allocator: &mut GpuAllocator) -> Result<()> {
        let buffers = std::iter::once(&mut self.device_buffer).chain(self.staging.iter_mut());
        all_or_first_error(buffers.map(|buffer| buffer.cleanup(allocator)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::HostMapping;
    use ash::vk::Handle;
    use std::collections::HashMap;
    use std::ptr::NonNull;

    #[derive(Debug, PartialEq)]
    enum Op {
        Barrier(vk::Buffer),
        Copy(vk::Buffer, vk::Buffer),
    }

    /// Executes transfer plans one after another against host memory.
    struct SerialQueue {
        memory: HashMap<vk::Buffer, Vec<u8>>,
        log: Vec<Op>,
    }

    impl SerialQueue {
        fn new(ring: &UploadRing, staging: &[vk::Buffer], device: vk::Buffer) -> Self {
            let size = ring.capacity() as usize;
            let mut memory = HashMap::new();
            memory.insert(device, vec![0u8; size]);
            for &buffer in staging {
                memory.insert(buffer, vec![0u8; size]);
            }
            Self {
                memory,
                log: Vec::new(),
            }
        }

        /// Host write through the same bounds-checked mapping real buffers use.
        fn stage(&mut self, buffer: vk::Buffer, data: &[u8], offset: u64) {
            let bytes = self.memory.get_mut(&buffer).unwrap();
            let mapping =
                unsafe { HostMapping::new(NonNull::new(bytes.as_mut_ptr()).unwrap(), bytes.len()) };
            mapping.copy_from(data, offset as usize);
        }

        fn execute(&mut self, plan: &TransferPlan) {
            if let Some(barrier) = plan.pre_barrier() {
                self.log.push(Op::Barrier(barrier.buffer));
            }

            let region = plan.region;
            let src = self.memory[&plan.src].clone();
            let range = region.src_offset as usize..(region.src_offset + region.size) as usize;
            let chunk = src.get(range).expect("copy reads past source");
            let dst = self.memory.get_mut(&plan.dst).unwrap();
            let start = region.dst_offset as usize;
            dst.get_mut(start..start + chunk.len())
                .expect("copy writes past destination")
                .copy_from_slice(chunk);
            self.log.push(Op::Copy(plan.src, plan.dst));

            if let Some(barrier) = plan.post_barrier() {
                self.log.push(Op::Barrier(barrier.buffer));
            }
        }

        fn device(&self, device: vk::Buffer) -> &[u8] {
            &self.memory[&device]
        }
    }

    fn ring(capacity: u64, frames: u64) -> (UploadRing, Vec<vk::Buffer>, vk::Buffer) {
        let device = vk::Buffer::from_raw(100);
        let staging: Vec<_> = (0..frames).map(|i| vk::Buffer::from_raw(i + 1)).collect();
        (UploadRing::new(capacity, device, staging.clone()), staging, device)
    }

    fn upload(queue: &mut SerialQueue, ring: &UploadRing, frame: usize, data: &[u8], offset: u64) {
        let plan = ring.plan(frame, offset, data.len() as u64, true);
        queue.stage(plan.src, data, offset);
        queue.execute(&plan);
    }

    #[test]
    fn plan_copies_exactly_the_requested_range() {
        let (ring, staging, device) = ring(256, 3);
        let plan = ring.plan(2, 64, 32, true);

        assert_eq!(plan.src, staging[2]);
        assert_eq!(plan.dst, device);
        assert_eq!(plan.region.src_offset, 64);
        assert_eq!(plan.region.dst_offset, 64);
        assert_eq!(plan.region.size, 32);
    }

    #[test]
    fn later_frame_wins_at_same_offset() {
        let (ring, staging, device) = ring(256, 3);
        let mut queue = SerialQueue::new(&ring, &staging, device);

        let first = [0x11u8; 64];
        let second = [0x22u8; 64];
        upload(&mut queue, &ring, 0, &first, 0);
        upload(&mut queue, &ring, 1, &second, 0);

        let contents = queue.device(device);
        assert_eq!(&contents[..64], &second);
        assert!(contents[64..].iter().all(|&b| b == 0));
    }

    #[test]
    fn partial_upload_leaves_other_ranges_intact() {
        let (ring, staging, device) = ring(256, 3);
        let mut queue = SerialQueue::new(&ring, &staging, device);

        let tail = [0xAAu8; 64];
        let head = [0xBBu8; 64];
        upload(&mut queue, &ring, 0, &tail, 64);
        upload(&mut queue, &ring, 1, &head, 0);

        let contents = queue.device(device);
        assert_eq!(&contents[..64], &head);
        assert_eq!(&contents[64..128], &tail);
        assert!(contents[128..].iter().all(|&b| b == 0));
    }

    #[test]
    fn payload_round_trips_at_offset() {
        let (ring, staging, device) = ring(128, 2);
        let mut queue = SerialQueue::new(&ring, &staging, device);

        let payload: Vec<u8> = (0..40).collect();
        upload(&mut queue, &ring, 1, &payload, 88);

        assert_eq!(&queue.device(device)[88..128], payload.as_slice());
    }

    #[test]
    fn synchronized_copies_are_bracketed() {
        let (ring, staging, device) = ring(64, 3);
        let mut queue = SerialQueue::new(&ring, &staging, device);

        upload(&mut queue, &ring, 0, &[1; 8], 0);
        upload(&mut queue, &ring, 1, &[2; 8], 0);

        assert_eq!(
            queue.log,
            vec![
                Op::Barrier(device),
                Op::Copy(staging[0], device),
                Op::Barrier(device),
                Op::Barrier(device),
                Op::Copy(staging[1], device),
                Op::Barrier(device),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn frame_index_is_checked() {
        let (ring, _, _) = ring(64, 3);
        ring.plan(3, 0, 8, true);
    }

    #[test]
    #[should_panic(expected = "overflows ring")]
    fn oversized_upload_is_rejected() {
        let (ring, _, _) = ring(64, 3);
        ring.plan(0, 60, 8, true);
    }

    #[test]
    fn fits_handles_overflowing_offsets() {
        let (ring, _, _) = ring(64, 1);
        assert!(ring.fits(0, 64));
        assert!(!ring.fits(1, 64));
        assert!(!ring.fits(u64::MAX, 1));
    }
}
