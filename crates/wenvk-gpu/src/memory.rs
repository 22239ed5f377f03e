//! GPU memory management.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Where a buffer lives and how the CPU reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPolicy {
    /// Device-local, never mapped. Filled through transfers.
    GpuOnly,
    /// Host-visible and persistently mapped for the buffer's lifetime.
    Persistent,
    /// Host-visible scratch memory used as a transfer source.
    Staging,
}

impl MemoryPolicy {
    /// Allocator location for this policy.
    pub fn location(self) -> MemoryLocation {
        match self {
            Self::GpuOnly => MemoryLocation::GpuOnly,
            Self::Persistent | Self::Staging => MemoryLocation::CpuToGpu,
        }
    }

    /// Whether buffers with this policy expose a mapped pointer.
    pub fn is_host_visible(self) -> bool {
        !matches!(self, Self::GpuOnly)
    }

    /// Usage bits implied by the policy on top of the caller's usage.
    pub fn implied_usage(self) -> vk::BufferUsageFlags {
        match self {
            Self::GpuOnly => vk::BufferUsageFlags::TRANSFER_DST,
            Self::Persistent | Self::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }
}

/// GPU memory allocator wrapper.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: cfg!(debug_assertions),
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator already shut down".to_string()))
    }

    fn allocate(&mut self, desc: &AllocationCreateDesc<'_>) -> Result<Allocation> {
        let name = desc.name;
        self.inner()?
            .allocate(desc)
            .map_err(|e| GpuError::AllocationFailed(format!("{name}: {e}")))
    }

    fn free(&mut self, allocation: Allocation) -> Result<()> {
        self.inner()?
            .free(allocation)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    /// Create a buffer and bind freshly allocated memory to it.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<(vk::Buffer, Allocation)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            self.device
                .create_buffer(&buffer_info, None)
                .map_err(GpuError::from)?
        };

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = self.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        let allocation = bind_or_release(bound, allocation, |allocation| {
            if let Err(e) = self.free_buffer(buffer, allocation) {
                tracing::warn!("Failed to release unbound buffer '{name}': {e}");
            }
        })?;

        Ok((buffer, allocation))
    }

    /// Destroy a buffer and free its allocation.
    ///
    /// The buffer is destroyed even when freeing the allocation fails.
    pub fn free_buffer(&mut self, buffer: vk::Buffer, allocation: Allocation) -> Result<()> {
        let freed = self.free(allocation);

        unsafe {
            self.device.destroy_buffer(buffer, None);
        }

        freed
    }

    /// Allocate an image.
    pub fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuImage> {
        let image = unsafe {
            self.device
                .create_image(create_info, None)
                .map_err(GpuError::from)?
        };

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = self.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: create_info.tiling == vk::ImageTiling::LINEAR,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        let allocation = bind_or_release(bound, allocation, |allocation| {
            if let Err(e) = self.free_image(GpuImage { image, allocation }) {
                tracing::warn!("Failed to release unbound image '{name}': {e}");
            }
        })?;

        Ok(GpuImage { image, allocation })
    }

    /// Destroy an image and free its allocation.
    ///
    /// The image is destroyed even when freeing the allocation fails.
    pub fn free_image(&mut self, image: GpuImage) -> Result<()> {
        let freed = self.free(image.allocation);

        unsafe {
            self.device.destroy_image(image.image, None);
        }

        freed
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// An image together with the memory bound to it.
pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Allocation,
}

/// Keep `allocation` if binding succeeded, otherwise hand it to `release` and report the error.
fn bind_or_release<A>(
    bound: std::result::Result<(), vk::Result>,
    allocation: A,
    release: impl FnOnce(A),
) -> Result<A> {
    match bound {
        Ok(()) => Ok(allocation),
        Err(e) => {
            release(allocation);
            Err(e.into())
        }
    }
}
