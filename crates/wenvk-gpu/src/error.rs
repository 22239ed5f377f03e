//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),

    /// Failed to load the Vulkan loader library.
    #[error("Failed to load Vulkan: {0}")]
    Loader(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// A bounded fence wait expired before the GPU signaled.
    #[error("Timed out after {timeout_ns} ns waiting for {what}")]
    Timeout { what: &'static str, timeout_ns: u64 },

    /// The logical device was lost; every further GPU call will fail.
    #[error("Device lost")]
    DeviceLost,

    /// Image decoding failed.
    #[error("Failed to load image {path}: {reason}")]
    ImageLoad { path: String, reason: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<vk::Result> for GpuError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Vulkan(other),
        }
    }
}

impl GpuError {
    /// Whether this error means the device can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost | Self::Timeout { .. })
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Run every release step, returning the first failure.
///
/// Later failures are logged so one bad handle does not leak the rest.
pub fn all_or_first_error<I>(results: I) -> Result<()>
where
    I: IntoIterator<Item = Result<()>>,
{
    let mut first = None;
    for result in results {
        if let Err(e) = result {
            if first.is_none() {
                first = Some(e);
            } else {
                tracing::warn!("Additional release failure: {e}");
            }
        }
    }
    first.map_or(Ok(()), Err)
}

/// Build `count` values in order. If one fails, the ones already built are handed to `undo`
/// before the error is returned.
pub fn build_all<T>(
    count: usize,
    mut make: impl FnMut(usize) -> Result<T>,
    mut undo: impl FnMut(T),
) -> Result<Vec<T>> {
    let mut built = Vec::with_capacity(count);
    for index in 0..count {
        match make(index) {
            Ok(value) => built.push(value),
            Err(e) => {
                built.drain(..).rev().for_each(&mut undo);
                return Err(e);
            }
        }
    }
    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_maps_to_dedicated_variant() {
        let err = GpuError::from(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(err, GpuError::DeviceLost));
        assert!(err.is_fatal());
    }

    #[test]
    fn other_results_stay_vulkan_errors() {
        let err = GpuError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(matches!(
            err,
            GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn release_steps_continue_after_a_failure() {
        let mut ran = 0;
        let steps = (0..4).map(|i| {
            ran += 1;
            match i {
                1 => Err(GpuError::InvalidState("first".to_string())),
                2 => Err(GpuError::InvalidState("second".to_string())),
                _ => Ok(()),
            }
        });
        let result = all_or_first_error(steps);

        assert_eq!(ran, 4);
        assert!(matches!(result, Err(GpuError::InvalidState(msg)) if msg == "first"));
        assert!(all_or_first_error(std::iter::empty()).is_ok());
    }

    #[test]
    fn partial_build_is_undone() {
        let mut undone = Vec::new();
        let result = build_all(
            4,
            |i| {
                if i == 2 {
                    Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY))
                } else {
                    Ok(i * 10)
                }
            },
            |value| undone.push(value),
        );

        assert!(matches!(
            result,
            Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY))
        ));
        assert_eq!(undone, vec![10, 0]);
    }

    #[test]
    fn complete_build_keeps_everything() {
        let mut undone = 0;
        let built = build_all(3, |i| Ok(i + 1), |_: usize| undone += 1).unwrap();
        assert_eq!(built, vec![1, 2, 3]);
        assert_eq!(undone, 0);
    }

    #[test]
    fn timeout_message_names_the_wait() {
        let err = GpuError::Timeout {
            what: "frame fence",
            timeout_ns: 10,
        };
        assert_eq!(err.to_string(), "Timed out after 10 ns waiting for frame fence");
    }
}
