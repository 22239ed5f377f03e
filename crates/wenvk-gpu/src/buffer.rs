//! Single-allocation GPU buffers.
//!
//! A [`Buffer`] owns one `VkBuffer` and its memory. Host-visible buffers are mapped once at
//! creation and stay mapped until [`Buffer::cleanup`]. A buffer dropped without cleanup is
//! reported as a leak.

use crate::barrier::{after_transfer_write, before_transfer_write, record_buffer_barrier};
use crate::context::GpuContext;
use crate::error::Result;
use crate::memory::{GpuAllocator, MemoryPolicy};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use std::cell::OnceCell;
use std::ptr::NonNull;

/// A persistently mapped host range.
///
/// Every write is bounds-checked before any byte is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostMapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl HostMapping {
    /// Wrap `len` writable bytes starting at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be valid for writes of `len` bytes for as long as the mapping is used.
    pub unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Start of the mapped range.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length of the mapped range in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapped range is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `data` to `offset` bytes into the mapping.
    ///
    /// # Panics
    /// If `offset + data.len()` exceeds the mapping. Nothing is written in that case.
    pub fn copy_from(&self, data: &[u8], offset: usize) {
        let end = offset.checked_add(data.len());
        assert!(
            end.is_some_and(|end| end <= self.len),
            "copy of {} bytes at offset {offset} overflows mapping of {} bytes",
            data.len(),
            self.len
        );

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
    }
}

/// A recorded buffer-to-buffer copy, optionally bracketed by barriers on the destination.
#[derive(Debug, Clone, Copy)]
pub struct TransferPlan {
    pub src: vk::Buffer,
    pub dst: vk::Buffer,
    pub region: vk::BufferCopy,
    pub sync: bool,
}

impl TransferPlan {
    /// Barrier recorded before the copy when `sync` is set.
    pub fn pre_barrier(&self) -> Option<vk::BufferMemoryBarrier2<'static>> {
        self.sync.then(|| before_transfer_write(self.dst))
    }

    /// Barrier recorded after the copy when `sync` is set.
    pub fn post_barrier(&self) -> Option<vk::BufferMemoryBarrier2<'static>> {
        self.sync.then(|| after_transfer_write(self.dst))
    }

    /// Record barrier, copy, barrier into `cmd`.
    ///
    /// # Safety
    /// The command buffer must be recording and both buffers must be alive until it completes.
    pub unsafe fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if let Some(barrier) = self.pre_barrier() {
            record_buffer_barrier(device, cmd, &barrier);
        }

        device.cmd_copy_buffer(cmd, self.src, self.dst, std::slice::from_ref(&self.region));

        if let Some(barrier) = self.post_barrier() {
            record_buffer_barrier(device, cmd, &barrier);
        }
    }
}

struct Live {
    allocation: Allocation,
    mapping: Option<HostMapping>,
}

/// A GPU buffer with its allocation.
pub struct Buffer {
    handle: vk::Buffer,
    size: u64,
    usage: vk::BufferUsageFlags,
    policy: MemoryPolicy,
    live: Option<Live>,
    device_address: OnceCell<vk::DeviceAddress>,
    name: String,
}

impl Buffer {
    /// Allocate a buffer of `size` bytes.
    ///
    /// Host-visible policies are mapped immediately; the pointer is stable until cleanup.
    pub fn new(
        gpu: &GpuContext,
        size: u64,
        usage: vk::BufferUsageFlags,
        policy: MemoryPolicy,
        name: &str,
    ) -> Result<Self> {
        assert!(size > 0, "buffer '{name}' must not be empty");

        let usage = usage | policy.implied_usage() | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        let (handle, allocation) =
            gpu.allocator()
                .lock()
                .create_buffer(size, usage, policy.location(), name)?;

        let mapping = if policy.is_host_visible() {
            let Some(ptr) = allocation.mapped_ptr() else {
                panic!("host-visible buffer '{name}' was not mapped");
            };
            Some(unsafe { HostMapping::new(ptr.cast(), size as usize) })
        } else {
            None
        };

        gpu.set_object_name(handle, name);
        tracing::debug!("Created buffer '{name}' ({size} bytes, {policy:?})");

        Ok(Self {
            handle,
            size,
            usage,
            policy,
            live: Some(Live {
                allocation,
                mapping,
            }),
            device_address: OnceCell::new(),
            name: name.to_string(),
        })
    }

    fn live(&self) -> &Live {
        match &self.live {
            Some(live) => live,
            None => panic!("buffer '{}' used after cleanup", self.name),
        }
    }

    /// Raw handle.
    pub fn handle(&self) -> vk::Buffer {
        self.live();
        self.handle
    }

    /// Capacity in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Usage flags, including those implied by the memory policy.
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Memory policy the buffer was created with.
    pub fn policy(&self) -> MemoryPolicy {
        self.policy
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `cleanup` has not run yet.
    pub fn is_alive(&self) -> bool {
        self.live.is_some()
    }

    /// Mapped host range, `None` for device-local buffers.
    pub fn mapping(&self) -> Option<HostMapping> {
        self.live().mapping
    }

    /// Mapped host pointer, `None` for device-local buffers.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.mapping().map(|m| m.as_ptr())
    }

    /// Copy bytes into the mapped memory at `offset`.
    ///
    /// # Panics
    /// If the buffer is not host-visible or the range does not fit.
    pub fn copy_data_to_buffer(&self, data: &[u8], offset: u64) {
        let Some(mapping) = self.mapping() else {
            panic!("buffer '{}' is not host-mapped", self.name);
        };
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        mapping.copy_from(data, offset);
    }

    /// Copy a slice of plain values into the mapped memory at `offset`.
    pub fn copy_pod_to_buffer<T: bytemuck::Pod>(&self, data: &[T], offset: u64) {
        self.copy_data_to_buffer(bytemuck::cast_slice(data), offset);
    }

    /// Stage `data` in this buffer and record a copy of exactly `data.len()` bytes into
    /// `target` at `offset`.
    ///
    /// With `sync`, the copy waits for earlier reads of `target` and later commands wait for it.
    ///
    /// # Safety
    /// `cmd` must be recording and must complete before this buffer is written again.
    pub unsafe fn upload(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        target: &Buffer,
        data: &[u8],
        offset: u64,
        sync: bool,
    ) {
        let len = data.len() as u64;
        assert!(
            offset
                .checked_add(len)
                .is_some_and(|end| end <= target.size),
            "upload of {len} bytes at offset {offset} overflows '{}' ({} bytes)",
            target.name,
            target.size
        );

        self.copy_data_to_buffer(data, 0);

        let plan = TransferPlan {
            src: self.handle(),
            dst: target.handle(),
            region: vk::BufferCopy {
                src_offset: 0,
                dst_offset: offset,
                size: len,
            },
            sync,
        };
        plan.record(device, cmd);
    }

    /// GPU virtual address, queried once and cached.
    pub fn device_address(&self, device: &ash::Device) -> vk::DeviceAddress {
        let handle = self.handle();
        *self.device_address.get_or_init(|| {
            let info = vk::BufferDeviceAddressInfo::default().buffer(handle);
            unsafe { device.get_buffer_device_address(&info) }
        })
    }

    /// Free the memory and destroy the handle.
    ///
    /// # Panics
    /// If called twice.
    pub fn cleanup(&mut self, allocator: &mut GpuAllocator) -> Result<()> {
        let Some(live) = self.live.take() else {
            panic!("buffer '{}' cleaned up twice", self.name);
        };
        allocator.free_buffer(self.handle, live.allocation)?;
        tracing::trace!("Destroyed buffer '{}'", self.name);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.live.is_some() {
            tracing::warn!("Buffer '{}' dropped without cleanup", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn mapping_over(bytes: &mut [u8]) -> HostMapping {
        let ptr = NonNull::new(bytes.as_mut_ptr()).unwrap();
        unsafe { HostMapping::new(ptr, bytes.len()) }
    }

    #[test]
    fn copy_lands_at_offset() {
        let mut memory = vec![0u8; 16];
        let mapping = mapping_over(&mut memory);

        mapping.copy_from(&[1, 2, 3, 4], 6);

        assert_eq!(&memory[6..10], &[1, 2, 3, 4]);
        assert!(memory[..6].iter().all(|&b| b == 0));
        assert!(memory[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn copy_may_fill_exactly_to_capacity() {
        let mut memory = vec![0u8; 8];
        let mapping = mapping_over(&mut memory);
        mapping.copy_from(&[9; 4], 4);
        assert_eq!(&memory[4..], &[9; 4]);
    }

    #[test]
    #[should_panic(expected = "overflows mapping")]
    fn oversized_copy_panics() {
        let mut memory = vec![0u8; 8];
        let mapping = mapping_over(&mut memory);
        mapping.copy_from(&[0xAA; 4], 6);
    }

    #[test]
    fn oversized_copy_writes_nothing() {
        let mut memory = vec![0u8; 8];
        let mapping = mapping_over(&mut memory);

        let result = std::panic::catch_unwind(|| mapping.copy_from(&[0xAA; 9], 0));

        assert!(result.is_err());
        assert!(memory.iter().all(|&b| b == 0));
    }

    #[test]
    fn offset_overflow_is_rejected() {
        let mut memory = vec![0u8; 8];
        let mapping = mapping_over(&mut memory);
        let result = std::panic::catch_unwind(|| mapping.copy_from(&[1], usize::MAX));
        assert!(result.is_err());
    }

    #[test]
    fn mapping_pointer_is_stable() {
        let mut memory = vec![0u8; 32];
        let mapping = mapping_over(&mut memory);
        let first = mapping.as_ptr();
        mapping.copy_from(&[1; 8], 0);
        mapping.copy_from(&[2; 8], 24);
        assert!(!first.is_null());
        assert_eq!(mapping.as_ptr(), first);
        assert_eq!(mapping.len(), 32);
    }

    #[test]
    fn unsynchronized_plan_has_no_barriers() {
        let plan = TransferPlan {
            src: vk::Buffer::from_raw(1),
            dst: vk::Buffer::from_raw(2),
            region: vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 4,
            },
            sync: false,
        };
        assert!(plan.pre_barrier().is_none());
        assert!(plan.post_barrier().is_none());
    }

    #[test]
    fn synchronized_plan_guards_destination() {
        let plan = TransferPlan {
            src: vk::Buffer::from_raw(1),
            dst: vk::Buffer::from_raw(2),
            region: vk::BufferCopy {
                src_offset: 0,
                dst_offset: 16,
                size: 4,
            },
            sync: true,
        };
        assert_eq!(plan.pre_barrier().unwrap().buffer, plan.dst);
        assert_eq!(plan.post_barrier().unwrap().buffer, plan.dst);
    }
}
