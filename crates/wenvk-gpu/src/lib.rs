//! Vulkan resource and frame lifecycle core of the wenvk engine.
//!
//! This crate provides:
//! - Vulkan instance, device and surface bring-up
//! - Buffers, N-buffered streaming uploads and textures over gpu-allocator
//! - A global bindless descriptor set addressed by generational texture ids
//! - Swapchain handling with a sticky out-of-date state
//! - The [`Instance`] frame loop tying it all together

pub mod barrier;
pub mod bindless;
pub mod bootstrap;
pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod deferred;
pub mod descriptors;
pub mod error;
pub mod format;
pub mod frame;
pub mod immediate;
pub mod instance;
pub mod memory;
pub mod nbuffer;
pub mod sampler;
pub mod slots;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod texture_cache;

pub use bindless::{BindlessSetManager, MAX_BINDLESS_RESOURCES, MAX_SAMPLERS};
pub use buffer::Buffer;
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{GpuContext, GpuContextBuilder, DEFAULT_FENCE_TIMEOUT};
pub use deferred::{DeferredDeletionQueue, PendingResource};
pub use error::{GpuError, Result};
pub use frame::{EndFrameParams, FrameCounter, FRAME_OVERLAP};
pub use immediate::ImmediateCommandQueue;
pub use instance::{Instance, InstanceConfig, UiOverlay};
pub use memory::{GpuAllocator, GpuImage, MemoryPolicy};
pub use nbuffer::NBuffer;
pub use sampler::{Sampler, SamplerPreset};
pub use slots::{SlotPool, TextureId};
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::{AcquiredImage, Swapchain, SwapchainState};
pub use texture::{Texture, TextureCreateInfo};
pub use texture_cache::TextureCache;
