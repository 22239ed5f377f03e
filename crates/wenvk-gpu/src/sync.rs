//! Synchronization primitives.

use crate::error::{GpuError, Result};
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait for a fence to be signaled, giving up after `timeout_ns`.
///
/// Expiry maps to [`GpuError::Timeout`] and a lost device to [`GpuError::DeviceLost`].
///
/// # Safety
/// The device and fence must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout_ns: u64,
    what: &'static str,
) -> Result<()> {
    match device.wait_for_fences(&[fence], true, timeout_ns) {
        Ok(()) => Ok(()),
        Err(result) => Err(wait_error(result, what, timeout_ns)),
    }
}

fn wait_error(result: vk::Result, what: &'static str, timeout_ns: u64) -> GpuError {
    match result {
        vk::Result::TIMEOUT => {
            tracing::error!("GPU did not signal {what} within {timeout_ns} ns");
            GpuError::Timeout { what, timeout_ns }
        }
        other => GpuError::from(other),
    }
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

/// Per-frame-slot synchronization: one fence and two semaphores.
pub struct FrameSync {
    /// Signaled by the presentation engine when the acquired image is ready
    pub image_available: vk::Semaphore,
    /// Signaled by the frame's submission, waited on by present
    pub render_finished: vk::Semaphore,
    /// Signaled when the frame's submission completes on the GPU
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create frame synchronization resources. The fence starts signaled.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        Ok(Self {
            image_available: create_semaphore(device)?,
            render_finished: create_semaphore(device)?,
            in_flight: create_fence(device, true)?,
        })
    }

    /// Block until the slot's previous submission has completed.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait(&self, device: &ash::Device, timeout_ns: u64) -> Result<()> {
        wait_for_fence(device, self.in_flight, timeout_ns, "frame fence")
    }

    /// Reset the fence for the next submission.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        reset_fence(device, self.in_flight)
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_fence(self.in_flight, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_result_becomes_timeout_error() {
        let err = wait_error(vk::Result::TIMEOUT, "immediate fence", 5);
        assert!(matches!(
            err,
            GpuError::Timeout {
                what: "immediate fence",
                timeout_ns: 5
            }
        ));
    }

    #[test]
    fn lost_device_during_wait_is_reported() {
        let err = wait_error(vk::Result::ERROR_DEVICE_LOST, "frame fence", 5);
        assert!(matches!(err, GpuError::DeviceLost));
    }
}
