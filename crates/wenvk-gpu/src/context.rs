//! GPU context management.

use crate::bootstrap::{create_instance, select_physical_device, DebugMessenger};
use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::memory::GpuAllocator;
use crate::surface::SurfaceContext;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;
use std::time::Duration;

/// Default upper bound for any CPU-side fence wait.
pub const DEFAULT_FENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) debug_messenger: Option<DebugMessenger>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) debug_utils: Option<ash::ext::debug_utils::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,
    pub(crate) graphics_queue_family: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) fence_timeout: Duration,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get the graphics queue. It is also used for transfers and presentation.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Upper bound applied to every blocking fence wait.
    pub fn fence_timeout(&self) -> Duration {
        self.fence_timeout
    }

    /// Fence timeout in the nanoseconds Vulkan expects.
    pub fn fence_timeout_ns(&self) -> u64 {
        u64::try_from(self.fence_timeout.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Attach a debug label to a Vulkan object. No-op without validation.
    pub fn set_object_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };

        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);

        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            tracing::debug!("Failed to name {:?}: {e}", name);
        }
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            if let Some(messenger) = self.debug_messenger.take() {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    fence_timeout: Duration,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "wenvk".to_string(),
            enable_validation: cfg!(debug_assertions),
            fence_timeout: DEFAULT_FENCE_TIMEOUT,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Set the upper bound for blocking fence waits.
    pub fn fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }

    /// Build a headless GPU context without presentation support.
    pub fn build(self) -> Result<GpuContext> {
        let entry = load_entry()?;
        let (instance, debug_messenger) = self.create_instance(&entry, None)?;

        let physical_device = unsafe { select_physical_device(&instance, None) }?;

        self.finish(entry, instance, debug_messenger, physical_device, None)
    }

    /// Build a GPU context that can present to `window`, returning the surface alongside.
    pub fn build_for_window<W>(self, window: &W) -> Result<(GpuContext, SurfaceContext)>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let entry = load_entry()?;

        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();
        let (instance, debug_messenger) = self.create_instance(&entry, Some(display))?;

        let surface = unsafe { SurfaceContext::from_window(&entry, &instance, window) }?;

        let physical_device = unsafe {
            select_physical_device(&instance, Some((&surface.surface_loader, surface.surface)))
        }?;

        let gpu = self.finish(
            entry,
            instance,
            debug_messenger,
            physical_device,
            Some(&surface),
        )?;

        Ok((gpu, surface))
    }

    fn create_instance(
        &self,
        entry: &ash::Entry,
        display: Option<RawDisplayHandle>,
    ) -> Result<(ash::Instance, Option<DebugMessenger>)> {
        let instance =
            unsafe { create_instance(entry, &self.app_name, display, self.enable_validation) }?;

        let debug_messenger = if self.enable_validation {
            Some(unsafe { DebugMessenger::new(entry, &instance) }?)
        } else {
            None
        };

        Ok((instance, debug_messenger))
    }

    fn finish(
        self,
        entry: ash::Entry,
        instance: ash::Instance,
        debug_messenger: Option<DebugMessenger>,
        physical_device: vk::PhysicalDevice,
        surface: Option<&SurfaceContext>,
    ) -> Result<GpuContext> {
        let extensions: &[&CStr] = if surface.is_some() {
            &[ash::khr::swapchain::NAME]
        } else {
            &[]
        };

        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };

        if !capabilities.meets_requirements() {
            tracing::error!(
                "{} lacks bindless or buffer device address support",
                capabilities.device_name
            );
            return Err(GpuError::NoSuitableDevice);
        }

        for extension in extensions {
            let name = extension.to_string_lossy();
            if !capabilities.available_extensions.contains(name.as_ref()) {
                return Err(GpuError::ExtensionNotSupported(name.into_owned()));
            }
        }

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let graphics_queue_family =
            unsafe { find_graphics_queue_family(&instance, physical_device, surface) }?;

        let (device, graphics_queue) = unsafe {
            create_device(&instance, physical_device, graphics_queue_family, extensions)?
        };

        let device = Arc::new(device);

        let debug_utils = debug_messenger
            .is_some()
            .then(|| ash::ext::debug_utils::Device::new(&instance, &device));

        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;

        Ok(GpuContext {
            entry,
            instance,
            debug_messenger,
            physical_device,
            device,
            debug_utils,
            capabilities,
            allocator: Mutex::new(allocator),
            graphics_queue_family,
            graphics_queue,
            fence_timeout: self.fence_timeout,
        })
    }
}

fn load_entry() -> Result<ash::Entry> {
    unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loader(e.to_string()))
}

/// Find the first queue family with graphics support that can present to `surface`, if any.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: Option<&SurfaceContext>,
) -> Result<u32> {
    instance
        .get_physical_device_queue_family_properties(physical_device)
        .iter()
        .enumerate()
        .position(|(index, family)| {
            family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && surface.map_or(true, |surface| {
                    surface.supports_present(physical_device, index as u32)
                })
        })
        .map(|index| index as u32)
        .ok_or(GpuError::NoSuitableDevice)
}

/// Create the logical device and retrieve the graphics queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
    extensions: &[&CStr],
) -> Result<(ash::Device, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(graphics_queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority))];

    let extension_names: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true)
        .maintenance4(true);

    // Bindless descriptor table and buffer references
    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .buffer_device_address(true)
        .descriptor_indexing(true)
        .scalar_block_layout(true)
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_sampled_image_update_after_bind(true)
        .shader_sampled_image_array_non_uniform_indexing(true);

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut vulkan_1_2_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    let graphics_queue = device.get_device_queue(graphics_queue_family, 0);

    Ok((device, graphics_queue))
}
