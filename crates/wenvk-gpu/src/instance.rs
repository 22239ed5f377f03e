//! The engine instance: owns the device, the swapchain and every shared GPU resource, and drives
//! the frame loop.
//!
//! A frame is recorded between [`Instance::begin_frame`] and [`Instance::end_frame`]. Frame `n`
//! records into slot `n % FRAME_OVERLAP`; `begin_frame` blocks until the slot's previous
//! submission has finished, so per-slot resources are never overwritten while the GPU reads them.

use crate::barrier::transition_image;
use crate::bindless::BindlessSetManager;
use crate::buffer::Buffer;
use crate::command::{begin_one_time, blit_image, clear_color_image, end_command_buffer};
use crate::context::{GpuContext, GpuContextBuilder, DEFAULT_FENCE_TIMEOUT};
use crate::deferred::{DeferredDeletionQueue, PendingResource};
use crate::error::{GpuError, Result};
use crate::format;
use crate::frame::{EndFrameParams, FrameCounter, FrameData, FRAME_OVERLAP};
use crate::immediate::ImmediateCommandQueue;
use crate::memory::MemoryPolicy;
use crate::nbuffer::NBuffer;
use crate::slots::TextureId;
use crate::surface::SurfaceContext;
use crate::swapchain::{AcquiredImage, Swapchain};
use crate::texture::{decode_rgba8, Texture, TextureCreateInfo};
use crate::texture_cache::{
    create_default_textures, create_texture_with_pixels, BindlessSlot, TextureCache,
};
use ash::vk;
use gpu_allocator::MemoryLocation;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::Path;
use std::time::Duration;

/// Draws on top of the swapchain image at the end of a frame.
pub trait UiOverlay {
    /// Record draw commands into `cmd`.
    ///
    /// `target` is in COLOR_ATTACHMENT_OPTIMAL layout and must be left in it.
    fn draw(&mut self, gpu: &GpuContext, cmd: vk::CommandBuffer, target: &AcquiredImage)
        -> Result<()>;

    /// Release the overlay's GPU resources. The device is idle.
    #[allow(unused_variables)]
    fn cleanup(&mut self, gpu: &GpuContext) {}
}

/// Parameters for [`Instance::new`].
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub app_name: String,
    /// Initial swapchain width
    pub width: u32,
    /// Initial swapchain height
    pub height: u32,
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only)
    pub validation: bool,
    /// Preferred swapchain format; the surface's first format is used if unsupported
    pub swapchain_format: vk::Format,
    /// Upper bound for every blocking fence wait
    pub fence_timeout: Duration,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app_name: "wenvk".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            validation: cfg!(debug_assertions),
            swapchain_format: vk::Format::B8G8R8A8_SRGB,
            fence_timeout: DEFAULT_FENCE_TIMEOUT,
        }
    }
}

impl InstanceConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_swapchain_format(mut self, format: vk::Format) -> Self {
        self.swapchain_format = format;
        self
    }

    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }
}

/// Layout transitions the swapchain image goes through in [`Instance::end_frame`].
///
/// The clear needs GENERAL, the blit TRANSFER_DST_OPTIMAL and the overlay
/// COLOR_ATTACHMENT_OPTIMAL; presentation always ends in PRESENT_SRC_KHR.
pub fn swapchain_layout_sequence(draw_ui: bool) -> Vec<(vk::ImageLayout, vk::ImageLayout)> {
    let mut sequence = vec![
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL),
        (
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ),
    ];
    let mut current = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
    if draw_ui {
        sequence.push((current, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        current = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
    }
    sequence.push((current, vk::ImageLayout::PRESENT_SRC_KHR));
    sequence
}

/// Engine instance.
///
/// Call [`cleanup`](Self::cleanup) before dropping; dropping without it cleans up with a warning.
pub struct Instance {
    surface: SurfaceContext,
    swapchain: Swapchain,
    immediate: ImmediateCommandQueue,
    bindless: BindlessSetManager,
    textures: TextureCache,
    deferred: DeferredDeletionQueue,
    frames: Vec<FrameData>,
    counter: FrameCounter,
    overlay: Option<Box<dyn UiOverlay>>,
    config: InstanceConfig,
    cleaned_up: bool,
    // Dropped last: destroys the device and the Vulkan instance
    gpu: GpuContext,
}

impl Instance {
    /// Bring up Vulkan for `window`: device, swapchain, bindless set, default textures and the
    /// per-frame command buffers.
    pub fn new<W>(window: &W, config: InstanceConfig) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        assert!(
            config.width > 0 && config.height > 0,
            "instance '{}' needs a non-zero initial size",
            config.app_name
        );

        let (gpu, surface) = GpuContextBuilder::new()
            .app_name(&config.app_name)
            .validation(config.validation)
            .fence_timeout(config.fence_timeout)
            .build_for_window(window)?;

        let capabilities = gpu.capabilities();
        tracing::info!(
            "Max anisotropy {:.1}, MSAA up to {:?}",
            capabilities.max_sampler_anisotropy,
            capabilities.max_sample_count()
        );

        let swapchain = Swapchain::new(
            &gpu,
            &surface,
            config.swapchain_format,
            config.width,
            config.height,
            config.vsync,
            &config.app_name,
        )?;
        let immediate = ImmediateCommandQueue::new(&gpu, &format!("{} immediate", config.app_name))?;
        let bindless = BindlessSetManager::new(
            &gpu,
            capabilities.max_sampler_anisotropy,
            &format!("{} bindless", config.app_name),
        )?;

        let mut textures = TextureCache::new(bindless.max_images());
        let (white, error) = create_default_textures(&gpu, &immediate)?;
        let white = register(&gpu, &bindless, &mut textures, white)?;
        let error = register(&gpu, &bindless, &mut textures, error)?;
        textures.set_defaults(white, error);

        let frames = (0..FRAME_OVERLAP)
            .map(|slot| FrameData::new(&gpu, slot))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("Instance '{}' initialized", config.app_name);

        Ok(Self {
            surface,
            swapchain,
            immediate,
            bindless,
            textures,
            deferred: DeferredDeletionQueue::new(FRAME_OVERLAP),
            frames,
            counter: FrameCounter::new(),
            overlay: None,
            config,
            cleaned_up: false,
            gpu,
        })
    }

    fn check_live(&self) {
        assert_live(self.cleaned_up, &self.config.app_name);
    }

    // ---- frame loop ----

    /// Wait for the current slot, release resources no frame can still use, and start recording.
    ///
    /// Returns the slot's command buffer, in the recording state.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn begin_frame(&mut self) -> Result<vk::CommandBuffer> {
        self.check_live();
        let slot = self.counter.index();
        self.swapchain
            .begin_frame(self.gpu.device(), slot, self.gpu.fence_timeout_ns())?;
        self.collect_garbage()?;

        let device = self.gpu.device();
        let cmd = self.frames[slot].command_buffer();
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            begin_one_time(device, cmd)?;
        }
        Ok(cmd)
    }

    fn collect_garbage(&mut self) -> Result<()> {
        let Self {
            ref gpu,
            ref bindless,
            ref mut textures,
            ref mut deferred,
            ref counter,
            ..
        } = *self;
        deferred.process(counter.frame_number(), |resource| {
            release(gpu, bindless, textures, resource)
        })
    }

    /// Finish the frame: clear the swapchain image, blit `draw_image` into it, let the overlay draw,
    /// then submit and present.
    ///
    /// When the swapchain is out of date the command buffer is closed without being submitted, the
    /// frame is dropped and the frame number stays where it is. A missing draw image is reported
    /// before anything is acquired, so the slot stays usable for the next frame.
    ///
    /// # Panics
    /// If `cmd` is not the command buffer returned by `begin_frame`.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn end_frame(
        &mut self,
        cmd: vk::CommandBuffer,
        draw_image: TextureId,
        params: &EndFrameParams,
    ) -> Result<()> {
        self.check_live();
        let slot = self.counter.index();
        assert_eq!(
            cmd,
            self.frames[slot].command_buffer(),
            "end_frame called with a foreign command buffer"
        );
        let device = self.gpu.device();

        // Everything that can fail on the caller's input is checked before the slot's
        // acquire semaphore and fence are touched.
        let draw = resolve_blit_source(&self.textures, draw_image, params, |texture| {
            (texture.image(), texture.aspect_flags(), texture.extent_2d())
        })?;

        let Some(target) = self
            .swapchain
            .acquire_image(slot, self.gpu.fence_timeout_ns())?
        else {
            unsafe { end_command_buffer(device, cmd)? };
            tracing::debug!(
                "Swapchain out of date, dropped frame {}",
                self.counter.frame_number()
            );
            return Ok(());
        };

        let draw_ui = params.draw_ui && self.overlay.is_some();
        let color = vk::ImageAspectFlags::COLOR;
        let mut layouts = swapchain_layout_sequence(draw_ui).into_iter();
        let mut next_transition = || -> Result<()> {
            let (old, new) = layouts.next().ok_or_else(|| {
                GpuError::InvalidState("swapchain layout sequence exhausted".to_string())
            })?;
            unsafe { transition_image(device, cmd, target.image, color, old, new) };
            Ok(())
        };

        next_transition()?;
        unsafe { clear_color_image(device, cmd, target.image, params.clear_color.to_array()) };
        next_transition()?;

        if let Some((image, aspect, extent)) = draw {
            unsafe {
                transition_image(
                    device,
                    cmd,
                    image,
                    aspect,
                    params.draw_image_layout,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                );
                blit_image(
                    device,
                    cmd,
                    image,
                    target.image,
                    params.source_rect(extent),
                    target.extent,
                    params.blit_filter(),
                );
            }
        }

        // An overlay failure still presents the frame so the acquired image and its semaphore
        // are consumed; the error is returned afterwards.
        let mut overlay_result = Ok(());
        if draw_ui {
            next_transition()?;
            if let Some(overlay) = self.overlay.as_mut() {
                overlay_result = overlay.draw(&self.gpu, cmd, &target);
            }
        }
        next_transition()?;

        unsafe { end_command_buffer(device, cmd)? };
        // Reset only once a submission is certain to signal the fence again.
        self.swapchain.reset_fence(device, slot)?;
        self.swapchain
            .submit_and_present(device, cmd, self.gpu.graphics_queue(), slot, target.index)?;
        self.counter.advance();

        if let Err(e) = &overlay_result {
            tracing::warn!("UI overlay failed: {e}");
        }
        overlay_result
    }

    /// Whether the swapchain must be recreated before the next frame.
    pub fn required_swapchain_reinit(&self) -> bool {
        self.swapchain.required_reinit()
    }

    /// Flag the swapchain for recreation, e.g. on window resize.
    pub fn mark_swapchain_dirty(&mut self) {
        self.swapchain.mark_dirty();
    }

    /// Recreate the swapchain at `width`×`height`. Waits for the device to go idle first.
    ///
    /// # Panics
    /// If either dimension is zero.
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.check_live();
        assert!(
            width > 0 && height > 0,
            "cannot recreate swapchain at {width}x{height}"
        );
        self.gpu.wait_idle()?;
        self.swapchain.reinit(
            &self.gpu,
            &self.surface,
            self.config.swapchain_format,
            width,
            height,
        )
    }

    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain.format()
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.gpu.wait_idle()
    }

    /// Install the overlay drawn at the end of each frame, replacing any previous one.
    pub fn set_ui_overlay(&mut self, overlay: Box<dyn UiOverlay>) -> Result<()> {
        if let Some(mut previous) = self.overlay.take() {
            self.gpu.wait_idle()?;
            previous.cleanup(&self.gpu);
        }
        self.overlay = Some(overlay);
        Ok(())
    }

    // ---- textures ----

    /// Create a texture and register it in the bindless set.
    pub fn make_texture(&mut self, info: &TextureCreateInfo, name: &str) -> Result<TextureId> {
        self.check_live();
        let texture = Texture::new(&self.gpu, info, MemoryLocation::GpuOnly, name)?;
        register(&self.gpu, &self.bindless, &mut self.textures, texture)
    }

    /// Create a 2D texture filled with `pixels` and register it.
    ///
    /// Blocks until the upload has finished.
    pub fn make_texture_with_pixels(
        &mut self,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        extent: vk::Extent2D,
        pixels: &[u8],
        name: &str,
    ) -> Result<TextureId> {
        self.check_live();
        let info = TextureCreateInfo::new_2d(format, extent.width, extent.height).with_usage(usage);
        let texture = create_texture_with_pixels(&self.gpu, &self.immediate, &info, pixels, name)?;
        register(&self.gpu, &self.bindless, &mut self.textures, texture)
    }

    /// Decode an image file to RGBA8 and upload it as a 2D texture.
    ///
    /// # Panics
    /// If `format` is not a four-byte-per-texel format.
    pub fn make_texture_with_path(
        &mut self,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        path: &Path,
        name: &str,
    ) -> Result<TextureId> {
        self.check_live();
        assert_eq!(
            format::bytes_per_pixel(format),
            4,
            "decoded images are RGBA8, {format:?} cannot hold them"
        );
        let decoded = decode_rgba8(path)?;
        tracing::debug!(
            "Decoded {} ({}x{})",
            path.display(),
            decoded.width,
            decoded.height
        );
        self.make_texture_with_pixels(
            format,
            usage,
            vk::Extent2D {
                width: decoded.width,
                height: decoded.height,
            },
            &decoded.rgba,
            name,
        )
    }

    /// Live texture for `id`.
    pub fn get_texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id)
    }

    /// Texture registered under `rel_path`.
    pub fn get_texture_by_path(&self, rel_path: &str) -> Option<&Texture> {
        self.textures.get_by_path(rel_path)
    }

    /// Make `id` findable by `rel_path`.
    pub fn register_texture_path(&mut self, rel_path: &str, id: TextureId) {
        self.textures.register_path(rel_path, id);
    }

    /// 1×1 opaque white texture.
    pub fn white_texture_id(&self) -> TextureId {
        self.textures.white_id()
    }

    /// 2×2 black and magenta checker.
    pub fn error_texture_id(&self) -> TextureId {
        self.textures.error_id()
    }

    /// Destroy `id` once no frame in flight can reference it.
    ///
    /// Lookups fail immediately; the index is reused only after the texture is destroyed. Returns
    /// `false` for unknown ids and for the default textures.
    pub fn destroy_texture(&mut self, id: TextureId) -> bool {
        self.check_live();
        if !self.textures.retire(id) {
            tracing::warn!("Ignoring destroy of texture {id:?}");
            return false;
        }
        self.deferred
            .queue(PendingResource::Texture(id), self.counter.frame_number());
        true
    }

    // ---- buffers ----

    /// Host-visible buffer, mapped for its whole lifetime.
    pub fn make_persistent_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Buffer> {
        self.check_live();
        Buffer::new(&self.gpu, size, usage, MemoryPolicy::Persistent, name)
    }

    /// Device-local buffer, filled through transfers.
    pub fn make_gpu_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Buffer> {
        self.check_live();
        Buffer::new(&self.gpu, size, usage, MemoryPolicy::GpuOnly, name)
    }

    /// Host-visible transfer source.
    pub fn make_staging_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Buffer> {
        self.check_live();
        Buffer::new(&self.gpu, size, usage, MemoryPolicy::Staging, name)
    }

    /// Device-local buffer with one staging buffer per frame slot.
    pub fn make_nbuffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<NBuffer> {
        self.check_live();
        NBuffer::new(&self.gpu, size, usage, FRAME_OVERLAP, name)
    }

    /// Copy `data` into `target` at `offset` through a temporary staging buffer.
    ///
    /// Blocks until the copy has finished.
    pub fn upload_buffer_to_gpu(&self, target: &Buffer, data: &[u8], offset: u64) -> Result<()> {
        self.check_live();
        assert!(!data.is_empty(), "nothing to upload into '{}'", target.name());

        let mut staging = Buffer::new(
            &self.gpu,
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryPolicy::Staging,
            &format!("{} upload", target.name()),
        )?;
        let uploaded = self.immediate.submit(&self.gpu, |device, cmd| unsafe {
            staging.upload(device, cmd, target, data, offset, true);
        });
        staging.cleanup(&mut self.gpu.allocator().lock())?;
        uploaded
    }

    /// Stream `data` into `nbuffer` at `offset` through the current slot's staging buffer.
    ///
    /// # Safety
    /// `cmd` must be the command buffer returned by the current `begin_frame`.
    pub unsafe fn upload_nbuffer(
        &self,
        cmd: vk::CommandBuffer,
        nbuffer: &NBuffer,
        data: &[u8],
        offset: u64,
        sync: bool,
    ) -> bool {
        nbuffer.try_upload(
            self.gpu.device(),
            cmd,
            self.counter.index(),
            data,
            offset,
            sync,
        )
    }

    pub fn buffer_device_address(&self, buffer: &Buffer) -> vk::DeviceAddress {
        buffer.device_address(self.gpu.device())
    }

    /// Free `buffer` once no frame in flight can reference it.
    pub fn destroy_buffer(&mut self, buffer: Buffer) {
        self.deferred
            .queue(PendingResource::Buffer(buffer), self.counter.frame_number());
    }

    /// Free `nbuffer` once no frame in flight can reference it.
    pub fn destroy_nbuffer(&mut self, nbuffer: NBuffer) {
        self.deferred
            .queue(PendingResource::NBuffer(nbuffer), self.counter.frame_number());
    }

    // ---- bindless ----

    pub fn bindless_set_layout(&self) -> vk::DescriptorSetLayout {
        self.bindless.layout()
    }

    pub fn bindless_set(&self) -> vk::DescriptorSet {
        self.bindless.set()
    }

    /// Bind the bindless set at set 0.
    ///
    /// # Safety
    /// `cmd` must be recording and `layout` must declare the bindless layout at set 0.
    pub unsafe fn bind_bindless_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
    ) {
        self.bindless.bind(self.gpu.device(), cmd, bind_point, layout);
    }

    // ---- accessors ----

    /// Slot of the frame being recorded.
    pub fn current_frame_index(&self) -> usize {
        self.counter.index()
    }

    /// Frames submitted so far.
    pub fn frame_number(&self) -> u64 {
        self.counter.frame_number()
    }

    pub fn device(&self) -> &ash::Device {
        self.gpu.device()
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// Highest MSAA sample count usable for color and depth together.
    pub fn max_sample_count(&self) -> vk::SampleCountFlags {
        self.gpu.capabilities().max_sample_count()
    }

    pub fn supported_sample_counts(&self) -> Vec<vk::SampleCountFlags> {
        self.gpu.capabilities().supported_sample_counts()
    }

    /// Tear everything down in reverse creation order. The Vulkan device itself goes with the
    /// instance's drop.
    ///
    /// # Panics
    /// If called twice.
    pub fn cleanup(&mut self) -> Result<()> {
        assert!(
            !self.cleaned_up,
            "instance '{}' cleaned up twice",
            self.config.app_name
        );
        self.cleaned_up = true;
        self.gpu.wait_idle()?;

        {
            let mut allocator = self.gpu.allocator().lock();
            for mut texture in self.textures.drain() {
                texture.cleanup(self.gpu.device(), &mut allocator)?;
            }
        }

        let Self {
            ref gpu,
            ref bindless,
            ref mut textures,
            ref mut deferred,
            ..
        } = *self;
        deferred.flush(|resource| release(gpu, bindless, textures, resource))?;

        let device = self.gpu.device();

        if let Some(mut overlay) = self.overlay.take() {
            overlay.cleanup(&self.gpu);
        }

        for frame in &self.frames {
            unsafe { frame.destroy(device) };
        }
        self.frames.clear();

        self.immediate.cleanup(device);
        self.bindless.cleanup(device);
        self.swapchain.cleanup(&self.gpu)?;
        unsafe { self.surface.destroy() };

        tracing::info!("Instance '{}' cleaned up", self.config.app_name);
        Ok(())
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if !self.cleaned_up {
            tracing::warn!(
                "Instance '{}' dropped without cleanup",
                self.config.app_name
            );
            if let Err(e) = self.cleanup() {
                tracing::error!("Cleanup on drop failed: {e}");
            }
        }
    }
}

/// The draw image `end_frame` blits from, `None` when the blit is disabled.
///
/// A stale or destroyed id is an error.
fn resolve_blit_source<T: BindlessSlot, S>(
    textures: &TextureCache<T>,
    id: TextureId,
    params: &EndFrameParams,
    describe: impl FnOnce(&T) -> S,
) -> Result<Option<S>> {
    if !params.blit_into_swapchain {
        return Ok(None);
    }
    textures
        .get(id)
        .map(describe)
        .map(Some)
        .ok_or_else(|| GpuError::ResourceNotFound(format!("draw image {id:?}")))
}

/// Put `texture` in the cache and point its bindless slot at its view.
fn register(
    gpu: &GpuContext,
    bindless: &BindlessSetManager,
    textures: &mut TextureCache,
    texture: Texture,
) -> Result<TextureId> {
    let view = sampled_view(texture.usage(), texture.view());
    match textures.try_insert(texture) {
        Ok(id) => {
            if let Some(view) = view {
                bindless.add_image(gpu.device(), id.index(), view);
            }
            Ok(id)
        }
        Err(mut texture) => {
            tracing::warn!(
                "No free bindless slot for texture '{}' ({} in use)",
                texture.name(),
                textures.len()
            );
            texture.cleanup(gpu.device(), &mut gpu.allocator().lock())?;
            Err(GpuError::AllocationFailed(
                "bindless texture slots exhausted".to_string(),
            ))
        }
    }
}

/// The view to expose through the sampled-image binding, if the image may be sampled at all.
fn assert_live(cleaned_up: bool, name: &str) {
    assert!(!cleaned_up, "instance '{name}' used after cleanup");
}

fn sampled_view(usage: vk::ImageUsageFlags, view: Option<vk::ImageView>) -> Option<vk::ImageView> {
    view.filter(|_| usage.contains(vk::ImageUsageFlags::SAMPLED))
}

/// Free a resource whose last frame has retired.
///
/// A destroyed texture's slot is pointed at the error texture before the index becomes reusable.
fn release(
    gpu: &GpuContext,
    bindless: &BindlessSetManager,
    textures: &mut TextureCache,
    resource: PendingResource,
) -> Result<()> {
    let device = gpu.device();
    match resource {
        PendingResource::Texture(id) => {
            let Some(mut texture) = textures.remove(id) else {
                return Ok(());
            };
            texture.cleanup(device, &mut gpu.allocator().lock())?;
            if let Some(view) = textures.get(textures.error_id()).and_then(Texture::view) {
                bindless.add_image(device, id.index(), view);
            }
        }
        PendingResource::Buffer(mut buffer) => buffer.cleanup(&mut gpu.allocator().lock())?,
        PendingResource::NBuffer(mut nbuffer) => nbuffer.cleanup(&mut gpu.allocator().lock())?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapchain_image_ends_presentable() {
        for draw_ui in [false, true] {
            let sequence = swapchain_layout_sequence(draw_ui);
            assert_eq!(sequence[0].0, vk::ImageLayout::UNDEFINED);
            assert_eq!(
                sequence.last().map(|t| t.1),
                Some(vk::ImageLayout::PRESENT_SRC_KHR)
            );
            for pair in sequence.windows(2) {
                assert_eq!(pair[0].1, pair[1].0, "transitions must chain");
            }
        }
    }

    #[test]
    fn overlay_draws_into_color_attachment() {
        let sequence = swapchain_layout_sequence(true);
        assert!(sequence
            .iter()
            .any(|(_, new)| *new == vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        assert_eq!(sequence.len(), 4);
        assert_eq!(swapchain_layout_sequence(false).len(), 3);
    }

    #[test]
    fn live_instance_passes_the_check() {
        assert_live(false, "viewer");
    }

    #[test]
    #[should_panic(expected = "instance 'viewer' used after cleanup")]
    fn factories_reject_a_cleaned_up_instance() {
        assert_live(true, "viewer");
    }

    struct Slot(TextureId);

    impl BindlessSlot for Slot {
        fn assign_bindless_id(&mut self, id: TextureId) {
            self.0 = id;
        }
    }

    #[test]
    fn blit_source_resolves_live_draw_image() {
        let mut textures = TextureCache::new(4);
        let id = textures.insert(Slot(TextureId::NULL));
        let params = EndFrameParams::default();
        let source = resolve_blit_source(&textures, id, &params, |slot| slot.0).unwrap();
        assert_eq!(source, Some(id));
    }

    #[test]
    fn stale_draw_image_fails_before_acquire() {
        let mut textures = TextureCache::new(4);
        let id = textures.insert(Slot(TextureId::NULL));
        assert!(textures.retire(id));

        // The lookup is the only caller-dependent failure and runs before the swapchain is
        // touched, so an error here leaves the frame slot's fence signaled.
        let params = EndFrameParams::default();
        let result = resolve_blit_source(&textures, id, &params, |slot| slot.0);
        assert!(matches!(result, Err(GpuError::ResourceNotFound(_))));

        assert!(matches!(
            resolve_blit_source(&textures, TextureId::NULL, &params, |slot| slot.0),
            Err(GpuError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn disabled_blit_ignores_the_draw_image() {
        let textures = TextureCache::<Slot>::new(4);
        let params = EndFrameParams::default().with_blit(false);
        let source = resolve_blit_source(&textures, TextureId::NULL, &params, |slot| slot.0);
        assert_eq!(source.unwrap(), None);
    }

    #[test]
    fn only_sampled_images_reach_the_bindless_set() {
        use ash::vk::Handle;
        let view = vk::ImageView::from_raw(7);
        assert_eq!(
            sampled_view(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST, Some(view)),
            Some(view)
        );
        assert_eq!(
            sampled_view(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::COLOR_ATTACHMENT, Some(view)),
            None
        );
        assert_eq!(sampled_view(vk::ImageUsageFlags::SAMPLED, None), None);
    }

    #[test]
    fn config_builder() {
        let config = InstanceConfig::new("viewer")
            .with_size(800, 600)
            .with_vsync(false)
            .with_validation(true)
            .with_swapchain_format(vk::Format::B8G8R8A8_UNORM)
            .with_fence_timeout(Duration::from_secs(2));
        assert_eq!(config.app_name, "viewer");
        assert_eq!((config.width, config.height), (800, 600));
        assert!(!config.vsync);
        assert!(config.validation);
        assert_eq!(config.swapchain_format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(config.fence_timeout, Duration::from_secs(2));
    }

    #[test]
    fn config_defaults() {
        let config = InstanceConfig::default();
        assert_eq!(config.swapchain_format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(config.fence_timeout, DEFAULT_FENCE_TIMEOUT);
        assert!(config.vsync);
    }
}
