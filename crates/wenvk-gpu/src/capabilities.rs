//! GPU capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    // Vulkan 1.3 core features
    /// Dynamic rendering support (VK 1.3 core)
    pub supports_dynamic_rendering: bool,
    /// Synchronization2 support (VK 1.3 core)
    pub supports_synchronization2: bool,

    // Buffer and descriptor features
    /// Buffer device address support
    pub supports_buffer_device_address: bool,
    /// Runtime descriptor arrays with partially bound bindings
    pub supports_partially_bound: bool,
    /// Sampled images and samplers may be written after the set is bound
    pub supports_update_after_bind: bool,
    /// Non-uniform indexing into sampled image arrays
    pub supports_non_uniform_indexing: bool,
    /// Scalar block layout for uniform and storage buffers
    pub supports_scalar_block_layout: bool,
    /// Anisotropic filtering support
    pub supports_sampler_anisotropy: bool,

    // Sampling limits
    /// Maximum sampler anisotropy, used by the linear default sampler
    pub max_sampler_anisotropy: f32,
    /// Sample counts usable for both color and depth framebuffer attachments
    pub framebuffer_sample_counts: vk::SampleCountFlags,
    /// Upper bound on sampled images visible to one shader stage with update-after-bind
    pub max_update_after_bind_sampled_images: u32,

    // Memory info
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    // Available extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let mut descriptor_indexing = vk::PhysicalDeviceDescriptorIndexingProperties::default();
        let mut properties2 =
            vk::PhysicalDeviceProperties2::default().push_next(&mut descriptor_indexing);
        instance.get_physical_device_properties2(physical_device, &mut properties2);
        let properties = properties2.properties;

        let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 =
            vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_1_2_features);
        instance.get_physical_device_features2(physical_device, &mut features2);
        let base_features = features2.features;

        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let vendor = GpuVendor::from_vendor_id(properties.vendor_id);
        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        let api_version = properties.api_version;
        let has_vulkan_1_3 = api_at_least_1_3(api_version);

        let limits = &properties.limits;
        let framebuffer_sample_counts =
            limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;

        Self {
            vendor,
            device_name,
            api_version,
            driver_version: properties.driver_version,

            supports_dynamic_rendering: has_vulkan_1_3,
            supports_synchronization2: has_vulkan_1_3,

            supports_buffer_device_address: vulkan_1_2_features.buffer_device_address == vk::TRUE,
            supports_partially_bound: vulkan_1_2_features.descriptor_binding_partially_bound
                == vk::TRUE
                && vulkan_1_2_features.runtime_descriptor_array == vk::TRUE,
            supports_update_after_bind: vulkan_1_2_features
                .descriptor_binding_sampled_image_update_after_bind
                == vk::TRUE,
            supports_non_uniform_indexing: vulkan_1_2_features
                .shader_sampled_image_array_non_uniform_indexing
                == vk::TRUE,
            supports_scalar_block_layout: vulkan_1_2_features.scalar_block_layout == vk::TRUE,
            supports_sampler_anisotropy: base_features.sampler_anisotropy == vk::TRUE,

            max_sampler_anisotropy: limits.max_sampler_anisotropy,
            framebuffer_sample_counts,
            max_update_after_bind_sampled_images: descriptor_indexing
                .max_per_stage_descriptor_update_after_bind_sampled_images,

            device_local_memory_mb,

            available_extensions,
        }
    }

    /// Check if the GPU meets minimum requirements for the engine.
    pub fn meets_requirements(&self) -> bool {
        if !api_at_least_1_3(self.api_version) {
            return false;
        }

        // Every feature the logical device is created with
        self.supports_buffer_device_address
            && self.supports_partially_bound
            && self.supports_update_after_bind
            && self.supports_non_uniform_indexing
            && self.supports_scalar_block_layout
            && self.supports_sampler_anisotropy
    }

    /// Highest MSAA sample count usable for both color and depth attachments.
    pub fn max_sample_count(&self) -> vk::SampleCountFlags {
        highest_sample_count(self.framebuffer_sample_counts)
    }

    /// All sample counts usable for both color and depth attachments, lowest first.
    pub fn supported_sample_counts(&self) -> Vec<vk::SampleCountFlags> {
        SAMPLE_COUNTS
            .iter()
            .rev()
            .copied()
            .filter(|count| self.framebuffer_sample_counts.contains(*count))
            .collect()
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM - {:?} max MSAA",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
            self.max_sample_count(),
        )
    }
}

const SAMPLE_COUNTS: [vk::SampleCountFlags; 7] = [
    vk::SampleCountFlags::TYPE_64,
    vk::SampleCountFlags::TYPE_32,
    vk::SampleCountFlags::TYPE_16,
    vk::SampleCountFlags::TYPE_8,
    vk::SampleCountFlags::TYPE_4,
    vk::SampleCountFlags::TYPE_2,
    vk::SampleCountFlags::TYPE_1,
];

/// Pick the largest single sample count contained in `counts`.
pub fn highest_sample_count(counts: vk::SampleCountFlags) -> vk::SampleCountFlags {
    SAMPLE_COUNTS
        .iter()
        .copied()
        .find(|count| counts.contains(*count))
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

pub(crate) fn api_at_least_1_3(api_version: u32) -> bool {
    let major = vk::api_version_major(api_version);
    let minor = vk::api_version_minor(api_version);
    major > 1 || (major == 1 && minor >= 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn highest_sample_count_picks_largest_bit() {
        let counts = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4
            | vk::SampleCountFlags::TYPE_8;
        assert_eq!(highest_sample_count(counts), vk::SampleCountFlags::TYPE_8);
        assert_eq!(
            highest_sample_count(vk::SampleCountFlags::empty()),
            vk::SampleCountFlags::TYPE_1
        );
    }

    fn capable_device() -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Amd,
            device_name: "test device".to_string(),
            api_version: vk::make_api_version(0, 1, 3, 0),
            driver_version: 0,
            supports_dynamic_rendering: true,
            supports_synchronization2: true,
            supports_buffer_device_address: true,
            supports_partially_bound: true,
            supports_update_after_bind: true,
            supports_non_uniform_indexing: true,
            supports_scalar_block_layout: true,
            supports_sampler_anisotropy: true,
            max_sampler_anisotropy: 16.0,
            framebuffer_sample_counts: vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4,
            max_update_after_bind_sampled_images: 500_000,
            device_local_memory_mb: 8192,
            available_extensions: HashSet::new(),
        }
    }

    #[test]
    fn requirements_cover_every_enabled_feature() {
        assert!(capable_device().meets_requirements());

        let mut no_scalar = capable_device();
        no_scalar.supports_scalar_block_layout = false;
        assert!(!no_scalar.meets_requirements());

        let mut no_non_uniform = capable_device();
        no_non_uniform.supports_non_uniform_indexing = false;
        assert!(!no_non_uniform.meets_requirements());

        let mut old_api = capable_device();
        old_api.api_version = vk::make_api_version(0, 1, 2, 0);
        assert!(!old_api.meets_requirements());
    }

    #[test]
    fn api_version_gate() {
        assert!(api_at_least_1_3(vk::make_api_version(0, 1, 3, 0)));
        assert!(api_at_least_1_3(vk::make_api_version(0, 1, 4, 0)));
        assert!(!api_at_least_1_3(vk::make_api_version(0, 1, 2, 198)));
    }
}
