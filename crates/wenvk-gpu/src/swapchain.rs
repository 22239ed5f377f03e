//! Swapchain management.
//!
//! Owns the presentation images (wrapped as borrowed textures) and the per-frame-slot sync objects.
//! Out-of-date and suboptimal results never fail a frame: they set a sticky dirty flag that the
//! owner polls through [`Swapchain::required_reinit`] and clears with [`Swapchain::reinit`].

use crate::command::{submit2, SemaphoreStage};
use crate::context::GpuContext;
use crate::error::{all_or_first_error, build_all, GpuError, Result};
use crate::frame::FRAME_OVERLAP;
use crate::surface::{calculate_extent, select_present_mode, select_surface_format, SurfaceContext};
use crate::sync::FrameSync;
use crate::texture::Texture;
use ash::vk;

/// Lifecycle of a swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Uninitialized,
    Ready,
    /// Needs recreation before it matches the surface again
    Dirty,
    Destroyed,
}

/// Things that happen to a swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainEvent {
    Created,
    Acquired,
    Presented,
    Suboptimal,
    OutOfDate,
    PresentFailed,
    Reinitialized,
    Destroyed,
}

impl SwapchainState {
    /// State after `event`.
    ///
    /// # Panics
    /// On events that make no sense in the current state, such as acquiring before creation.
    pub fn on(self, event: SwapchainEvent) -> Self {
        use SwapchainEvent as E;

        match (self, event) {
            (Self::Uninitialized, E::Created) => Self::Ready,
            (Self::Ready, E::Acquired | E::Presented) => Self::Ready,
            (Self::Dirty, E::Acquired | E::Presented) => Self::Dirty,
            (Self::Ready | Self::Dirty, E::Suboptimal | E::OutOfDate | E::PresentFailed) => {
                Self::Dirty
            }
            (Self::Ready | Self::Dirty, E::Reinitialized) => Self::Ready,
            (Self::Ready | Self::Dirty, E::Destroyed) => Self::Destroyed,
            (state, event) => panic!("swapchain cannot handle {event:?} while {state:?}"),
        }
    }

    /// Whether the swapchain must be recreated.
    pub fn requires_reinit(self) -> bool {
        self == Self::Dirty
    }

    /// Whether the swapchain holds live Vulkan objects.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Ready | Self::Dirty)
    }
}

/// Outcome of `vkAcquireNextImageKHR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(u32),
    Suboptimal(u32),
    OutOfDate,
}

impl AcquireOutcome {
    /// Classify the raw acquire result. Timeouts and hard failures become errors.
    pub fn classify(
        result: std::result::Result<(u32, bool), vk::Result>,
        timeout_ns: u64,
    ) -> Result<Self> {
        match result {
            Ok((index, false)) => Ok(Self::Acquired(index)),
            Ok((index, true)) => Ok(Self::Suboptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(GpuError::Timeout {
                what: "swapchain image",
                timeout_ns,
            }),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// State event for this outcome.
    pub fn event(self) -> SwapchainEvent {
        match self {
            Self::Acquired(_) => SwapchainEvent::Acquired,
            Self::Suboptimal(_) => SwapchainEvent::Suboptimal,
            Self::OutOfDate => SwapchainEvent::OutOfDate,
        }
    }

    /// Acquired image index, `None` when out of date.
    pub fn image_index(self) -> Option<u32> {
        match self {
            Self::Acquired(index) | Self::Suboptimal(index) => Some(index),
            Self::OutOfDate => None,
        }
    }
}

/// Classify the raw present result. Only a lost device is an error; everything else that is not
/// plain success marks the swapchain dirty.
pub fn present_event(result: std::result::Result<bool, vk::Result>) -> Result<SwapchainEvent> {
    match result {
        Ok(false) => Ok(SwapchainEvent::Presented),
        Ok(true) => Ok(SwapchainEvent::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapchainEvent::OutOfDate),
        Err(vk::Result::ERROR_DEVICE_LOST) => Err(GpuError::DeviceLost),
        Err(e) => {
            tracing::error!("Failed to present: {e}");
            Ok(SwapchainEvent::PresentFailed)
        }
    }
}

/// An image handed out by [`Swapchain::acquire_image`].
#[derive(Debug, Clone, Copy)]
pub struct AcquiredImage {
    pub index: u32,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
}

/// Usage of every swapchain image.
pub const SWAPCHAIN_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// Swapchain wrapper.
pub struct Swapchain {
    loader: ash::khr::swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<Texture>,
    frames: Vec<FrameSync>,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    vsync: bool,
    state: SwapchainState,
    name: String,
}

impl Swapchain {
    /// Create a swapchain on `surface` with one set of sync objects per frame slot.
    pub fn new(
        gpu: &GpuContext,
        surface: &SurfaceContext,
        format: vk::Format,
        width: u32,
        height: u32,
        vsync: bool,
        name: &str,
    ) -> Result<Self> {
        let loader = ash::khr::swapchain::Device::new(gpu.instance(), gpu.device());

        let mut frames = Vec::with_capacity(FRAME_OVERLAP);
        for i in 0..FRAME_OVERLAP {
            let sync = unsafe { FrameSync::new(gpu.device())? };
            gpu.set_object_name(sync.in_flight, &format!("render fence {i} {name}"));
            gpu.set_object_name(sync.image_available, &format!("swapchain semaphore {i} {name}"));
            gpu.set_object_name(sync.render_finished, &format!("render semaphore {i} {name}"));
            frames.push(sync);
        }

        let mut swapchain = Self {
            loader,
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            frames,
            surface_format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            vsync,
            state: SwapchainState::Uninitialized,
            name: name.to_string(),
        };
        swapchain.build(gpu, surface, format, width, height)?;
        swapchain.state = swapchain.state.on(SwapchainEvent::Created);

        tracing::info!(
            "Swapchain '{name}' created: {}x{}, {} images, {:?}",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len(),
            swapchain.surface_format.format
        );
        Ok(swapchain)
    }

    /// Create the presentation engine object, seeded with the current one if any, and wrap its
    /// images. The previous swapchain and views are released afterwards.
    fn build(
        &mut self,
        gpu: &GpuContext,
        surface: &SurfaceContext,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let support = surface.capabilities(gpu.physical_device())?;
        let surface_format = select_surface_format(&support.formats, format)?;
        if surface_format.format != format {
            tracing::warn!(
                "Surface does not support {format:?}, using {:?}",
                surface_format.format
            );
        }
        let present_mode = select_present_mode(&support.present_modes, self.vsync);
        let extent = calculate_extent(&support.capabilities, width, height);

        let queue_families = [gpu.graphics_queue_family()];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.surface)
            .min_image_count(support.image_count())
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(SWAPCHAIN_IMAGE_USAGE)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(self.handle);

        let handle = unsafe {
            self.loader
                .create_swapchain(&create_info, None)
                .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?
        };
        gpu.set_object_name(handle, &self.name);

        let raw_images = match unsafe { self.loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { self.loader.destroy_swapchain(handle, None) };
                return Err(e.into());
            }
        };

        let image_extent = vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        };
        let images = build_all(
            raw_images.len(),
            |i| {
                Texture::from_existing_image(
                    gpu.device(),
                    raw_images[i],
                    surface_format.format,
                    image_extent,
                    1,
                    1,
                    &format!("image {i} {}", self.name),
                )
            },
            |mut texture| {
                if let Err(e) = texture.cleanup(gpu.device(), &mut gpu.allocator().lock()) {
                    tracing::warn!("Failed to release swapchain view: {e}");
                }
            },
        );
        let images = match images {
            Ok(images) => images,
            Err(e) => {
                unsafe { self.loader.destroy_swapchain(handle, None) };
                return Err(e);
            }
        };

        // The old views are gone even if one of them failed to release.
        let released = self.release_images(gpu);
        if self.handle != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.handle, None) };
        }

        self.handle = handle;
        self.images = images;
        self.surface_format = surface_format;
        self.extent = extent;
        tracing::debug!("Swapchain '{}' using {present_mode:?}", self.name);
        released
    }

    fn release_images(&mut self, gpu: &GpuContext) -> Result<()> {
        let mut allocator = gpu.allocator().lock();
        all_or_first_error(
            self.images
                .drain(..)
                .map(|mut texture| texture.cleanup(gpu.device(), &mut allocator)),
        )
    }

    fn check_live(&self) {
        assert!(
            self.state.is_live(),
            "swapchain '{}' used while {:?}",
            self.name,
            self.state
        );
    }

    /// Recreate for a new size. Sync objects are kept.
    ///
    /// The device must be idle.
    pub fn reinit(
        &mut self,
        gpu: &GpuContext,
        surface: &SurfaceContext,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.check_live();
        self.build(gpu, surface, format, width, height)?;
        self.state = self.state.on(SwapchainEvent::Reinitialized);
        tracing::info!(
            "Swapchain '{}' recreated: {}x{}",
            self.name,
            self.extent.width,
            self.extent.height
        );
        Ok(())
    }

    /// Wait until the slot's previous submission has completed.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn begin_frame(&self, device: &ash::Device, frame_index: usize, timeout_ns: u64) -> Result<()> {
        self.check_live();
        unsafe { self.frames[frame_index].wait(device, timeout_ns) }
    }

    /// Unsignal the slot's fence ahead of the submission that will signal it.
    pub fn reset_fence(&self, device: &ash::Device, frame_index: usize) -> Result<()> {
        self.check_live();
        unsafe { self.frames[frame_index].reset(device) }
    }

    /// Acquire the next image, signaling the slot's acquire semaphore.
    ///
    /// Returns `None` when the swapchain is out of date; nothing was acquired and the frame should
    /// be dropped.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn acquire_image(
        &mut self,
        frame_index: usize,
        timeout_ns: u64,
    ) -> Result<Option<AcquiredImage>> {
        self.check_live();
        let result = unsafe {
            self.loader.acquire_next_image(
                self.handle,
                timeout_ns,
                self.frames[frame_index].image_available,
                vk::Fence::null(),
            )
        };

        let outcome = AcquireOutcome::classify(result, timeout_ns)?;
        self.state = self.state.on(outcome.event());

        Ok(outcome.image_index().map(|index| {
            let texture = &self.images[index as usize];
            AcquiredImage {
                index,
                image: texture.image(),
                view: texture.view().unwrap_or_default(),
                extent: self.extent,
            }
        }))
    }

    /// Submit `cmd` for the slot and present `image_index`.
    ///
    /// The submission waits for the acquire semaphore, signals the render semaphore and the slot's
    /// fence; presentation waits for the render semaphore.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn submit_and_present(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        queue: vk::Queue,
        frame_index: usize,
        image_index: u32,
    ) -> Result<()> {
        self.check_live();
        let frame = &self.frames[frame_index];

        unsafe {
            submit2(
                device,
                queue,
                cmd,
                Some(SemaphoreStage {
                    semaphore: frame.image_available,
                    stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags2::ALL_TRANSFER,
                }),
                Some(SemaphoreStage {
                    semaphore: frame.render_finished,
                    stage: vk::PipelineStageFlags2::ALL_COMMANDS,
                }),
                frame.in_flight,
            )?;
        }

        let wait = [frame.render_finished];
        let swapchains = [self.handle];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };
        self.state = self.state.on(present_event(result)?);
        Ok(())
    }

    /// Whether the swapchain no longer matches the surface.
    pub fn required_reinit(&self) -> bool {
        self.state.requires_reinit()
    }

    /// Mark the swapchain for recreation, e.g. after a window resize.
    pub fn mark_dirty(&mut self) {
        self.state = self.state.on(SwapchainEvent::OutOfDate);
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Wrapped image `index`.
    pub fn texture(&self, index: usize) -> &Texture {
        &self.images[index]
    }

    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.images[index].view().unwrap_or_default()
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Destroy image views, sync objects and the swapchain. The device must be idle.
    ///
    /// # Panics
    /// If called twice.
    pub fn cleanup(&mut self, gpu: &GpuContext) -> Result<()> {
        assert!(
            self.state.is_live(),
            "swapchain '{}' cleaned up while {:?}",
            self.name,
            self.state
        );

        self.release_images(gpu)?;
        unsafe {
            for frame in &self.frames {
                frame.destroy(gpu.device());
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
        self.frames.clear();
        self.handle = vk::SwapchainKHR::null();
        self.state = self.state.on(SwapchainEvent::Destroyed);
        tracing::debug!("Destroyed swapchain '{}'", self.name);
        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if self.state.is_live() {
            tracing::warn!("Swapchain '{}' dropped without cleanup", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> SwapchainState {
        SwapchainState::Uninitialized.on(SwapchainEvent::Created)
    }

    #[test]
    fn creation_makes_ready() {
        let state = ready();
        assert_eq!(state, SwapchainState::Ready);
        assert!(!state.requires_reinit());
    }

    #[test]
    fn dirty_is_sticky_until_reinit() {
        let mut state = ready().on(SwapchainEvent::Suboptimal);
        assert!(state.requires_reinit());

        for event in [
            SwapchainEvent::Acquired,
            SwapchainEvent::Presented,
            SwapchainEvent::Acquired,
        ] {
            state = state.on(event);
            assert!(state.requires_reinit());
        }

        state = state.on(SwapchainEvent::Reinitialized);
        assert!(!state.requires_reinit());
    }

    #[test]
    fn repeated_out_of_date_needs_one_reinit() {
        let mut state = ready();
        for _ in 0..3 {
            state = state.on(AcquireOutcome::OutOfDate.event());
            assert!(state.requires_reinit());
        }
        state = state.on(SwapchainEvent::Reinitialized);
        assert_eq!(state, SwapchainState::Ready);
        assert!(!state.requires_reinit());
    }

    #[test]
    fn present_failures_mark_dirty() {
        for event in [SwapchainEvent::PresentFailed, SwapchainEvent::OutOfDate] {
            assert!(ready().on(event).requires_reinit());
        }
    }

    #[test]
    #[should_panic(expected = "cannot handle")]
    fn acquire_before_creation_panics() {
        SwapchainState::Uninitialized.on(SwapchainEvent::Acquired);
    }

    #[test]
    #[should_panic(expected = "cannot handle")]
    fn destroyed_swapchain_rejects_events() {
        ready()
            .on(SwapchainEvent::Destroyed)
            .on(SwapchainEvent::Destroyed);
    }

    #[test]
    fn acquire_results_classify() {
        assert_eq!(
            AcquireOutcome::classify(Ok((2, false)), 0).unwrap(),
            AcquireOutcome::Acquired(2)
        );
        assert_eq!(
            AcquireOutcome::classify(Ok((1, true)), 0).unwrap(),
            AcquireOutcome::Suboptimal(1)
        );
        assert_eq!(
            AcquireOutcome::classify(Err(vk::Result::ERROR_OUT_OF_DATE_KHR), 0).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert!(matches!(
            AcquireOutcome::classify(Err(vk::Result::TIMEOUT), 7),
            Err(GpuError::Timeout { timeout_ns: 7, .. })
        ));
        assert!(matches!(
            AcquireOutcome::classify(Err(vk::Result::ERROR_DEVICE_LOST), 0),
            Err(GpuError::DeviceLost)
        ));
    }

    #[test]
    fn suboptimal_acquire_still_yields_image() {
        let outcome = AcquireOutcome::Suboptimal(3);
        assert_eq!(outcome.image_index(), Some(3));
        assert!(ready().on(outcome.event()).requires_reinit());
        assert_eq!(AcquireOutcome::OutOfDate.image_index(), None);
    }

    #[test]
    fn present_results_classify() {
        assert_eq!(present_event(Ok(false)).unwrap(), SwapchainEvent::Presented);
        assert_eq!(present_event(Ok(true)).unwrap(), SwapchainEvent::Suboptimal);
        assert_eq!(
            present_event(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            SwapchainEvent::OutOfDate
        );
        assert_eq!(
            present_event(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).unwrap(),
            SwapchainEvent::PresentFailed
        );
        assert!(matches!(
            present_event(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(GpuError::DeviceLost)
        ));
    }

    #[test]
    fn images_support_clear_and_blit() {
        assert!(SWAPCHAIN_IMAGE_USAGE.contains(
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
        ));
    }
}
