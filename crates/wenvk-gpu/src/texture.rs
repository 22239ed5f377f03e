//! Images with their views.
//!
//! A texture either owns its image and memory, or wraps an image owned elsewhere (swapchain images).
//! Wrapped textures only ever destroy their view.

use crate::barrier::transition_image;
use crate::buffer::Buffer;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::format;
use crate::memory::{GpuAllocator, GpuImage};
use crate::slots::TextureId;
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;

/// Parameters for [`Texture::new`].
#[derive(Debug, Clone, Copy)]
pub struct TextureCreateInfo {
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
    pub extent: vk::Extent3D,
    /// Layers per face group; cube maps multiply this by six
    pub array_layers: u32,
    /// First layer covered by the view and written by uploads
    pub base_array_layer: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub mip_mapped: bool,
    pub cube_map: bool,
}

impl Default for TextureCreateInfo {
    fn default() -> Self {
        Self {
            format: vk::Format::B8G8R8A8_SRGB,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
            flags: vk::ImageCreateFlags::empty(),
            extent: vk::Extent3D {
                width: 0,
                height: 0,
                depth: 1,
            },
            array_layers: 1,
            base_array_layer: 0,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            mip_mapped: false,
            cube_map: false,
        }
    }
}

impl TextureCreateInfo {
    /// 2D texture of `width`×`height`.
    pub fn new_2d(format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_flags(mut self, flags: vk::ImageCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_array_layers(mut self, layers: u32) -> Self {
        self.array_layers = layers;
        self
    }

    pub fn with_base_array_layer(mut self, layer: u32) -> Self {
        self.base_array_layer = layer;
        self
    }

    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_tiling(mut self, tiling: vk::ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    pub fn with_mip_mapped(mut self, mip_mapped: bool) -> Self {
        self.mip_mapped = mip_mapped;
        self
    }

    /// Six layers per face group and a cube view.
    pub fn with_cube_map(mut self, cube_map: bool) -> Self {
        self.cube_map = cube_map;
        self
    }

    /// Mip levels the image is created with.
    pub fn mip_levels(&self) -> u32 {
        if self.mip_mapped {
            format::full_mip_levels(self.extent.width, self.extent.height)
        } else {
            1
        }
    }

    /// Array layers the image is created with.
    pub fn layer_count(&self) -> u32 {
        let groups = self.array_layers.max(1);
        if self.cube_map {
            groups * 6
        } else {
            groups
        }
    }

    fn image_type(&self) -> vk::ImageType {
        if self.extent.depth > 1 {
            vk::ImageType::TYPE_3D
        } else {
            vk::ImageType::TYPE_2D
        }
    }

    /// View type matching the image shape.
    pub fn view_type(&self) -> vk::ImageViewType {
        let layers = self.layer_count();
        if self.cube_map {
            if layers > 6 {
                vk::ImageViewType::CUBE_ARRAY
            } else {
                vk::ImageViewType::CUBE
            }
        } else if self.extent.depth > 1 {
            vk::ImageViewType::TYPE_3D
        } else if layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        }
    }

    /// Image create info for this description.
    pub fn image_create_info(&self) -> vk::ImageCreateInfo<'static> {
        let mut flags = self.flags;
        if self.cube_map {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }

        vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(self.image_type())
            .format(self.format)
            .extent(self.extent)
            .mip_levels(self.mip_levels())
            .array_layers(self.layer_count())
            .samples(self.samples)
            .tiling(self.tiling)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
    }
}

/// Whether images with `usage` get a view.
pub fn needs_view(usage: vk::ImageUsageFlags) -> bool {
    usage.intersects(
        vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::STORAGE
            | vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

enum Backing {
    Owned(Allocation),
    Borrowed,
}

/// A GPU image with an optional view.
pub struct Texture {
    image: vk::Image,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent3D,
    usage: vk::ImageUsageFlags,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
    layer_count: u32,
    base_array_layer: u32,
    cube_map: bool,
    bindless_id: TextureId,
    live: Option<Backing>,
    name: String,
}

unsafe fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    view_type: vk::ImageViewType,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
    base_array_layer: u32,
    layer_count: u32,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer,
            layer_count,
        });

    let view = device.create_image_view(&view_info, None)?;
    Ok(view)
}

impl Texture {
    /// Allocate an image and create a view when its usage needs one.
    pub fn new(
        gpu: &GpuContext,
        info: &TextureCreateInfo,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        assert!(
            info.extent.width > 0 && info.extent.height > 0 && info.extent.depth > 0,
            "texture '{name}' must not have a zero extent"
        );
        let layer_count = info.layer_count();
        assert!(
            info.base_array_layer < layer_count,
            "texture '{name}' base layer {} out of range for {layer_count} layers",
            info.base_array_layer
        );

        let device = gpu.device();
        let image_info = info.image_create_info();
        let GpuImage { image, allocation } =
            gpu.allocator()
                .lock()
                .create_image(&image_info, location, name)?;

        let aspect = format::aspect_flags(info.format);
        let mip_levels = info.mip_levels();

        let view = if needs_view(info.usage) {
            let view_layers = layer_count - info.base_array_layer;
            let created = unsafe {
                create_view(
                    device,
                    image,
                    info.format,
                    info.view_type(),
                    aspect,
                    mip_levels,
                    info.base_array_layer,
                    view_layers,
                )
            };
            match created {
                Ok(view) => view,
                Err(e) => {
                    gpu.allocator()
                        .lock()
                        .free_image(GpuImage { image, allocation })?;
                    return Err(e);
                }
            }
        } else {
            vk::ImageView::null()
        };

        gpu.set_object_name(image, name);
        if view != vk::ImageView::null() {
            gpu.set_object_name(view, name);
        }
        tracing::debug!(
            "Created texture '{name}' ({}x{}x{}, {:?}, {mip_levels} mips, {layer_count} layers)",
            info.extent.width,
            info.extent.height,
            info.extent.depth,
            info.format
        );

        Ok(Self {
            image,
            view,
            format: info.format,
            extent: info.extent,
            usage: info.usage,
            aspect,
            mip_levels,
            layer_count,
            base_array_layer: info.base_array_layer,
            cube_map: info.cube_map,
            bindless_id: TextureId::NULL,
            live: Some(Backing::Owned(allocation)),
            name: name.to_string(),
        })
    }

    /// Wrap an image owned elsewhere. Only the view is created and later destroyed.
    pub fn from_existing_image(
        device: &ash::Device,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent3D,
        mip_levels: u32,
        layer_count: u32,
        name: &str,
    ) -> Result<Self> {
        let aspect = format::aspect_flags(format);
        let view_type = if layer_count > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let view = unsafe {
            create_view(
                device,
                image,
                format,
                view_type,
                aspect,
                mip_levels,
                0,
                layer_count,
            )?
        };

        Ok(Self {
            image,
            view,
            format,
            extent,
            usage: vk::ImageUsageFlags::empty(),
            aspect,
            mip_levels,
            layer_count,
            base_array_layer: 0,
            cube_map: false,
            bindless_id: TextureId::NULL,
            live: Some(Backing::Borrowed),
            name: name.to_string(),
        })
    }

    fn check_live(&self) {
        if self.live.is_none() {
            panic!("texture '{}' used after cleanup", self.name);
        }
    }

    /// Raw image handle.
    pub fn image(&self) -> vk::Image {
        self.check_live();
        self.image
    }

    /// View handle, `None` when the usage did not require one.
    pub fn view(&self) -> Option<vk::ImageView> {
        self.check_live();
        (self.view != vk::ImageView::null()).then_some(self.view)
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    /// Width and height.
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    pub fn aspect_flags(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }

    pub fn base_array_layer(&self) -> u32 {
        self.base_array_layer
    }

    pub fn is_cube_map(&self) -> bool {
        self.cube_map
    }

    pub fn is_depth(&self) -> bool {
        format::is_depth(self.format)
    }

    pub fn is_stencil(&self) -> bool {
        format::is_stencil(self.format)
    }

    /// Whether the image is freed with this texture.
    pub fn owns_image(&self) -> bool {
        matches!(self.live, Some(Backing::Owned(_)))
    }

    pub fn is_alive(&self) -> bool {
        self.live.is_some()
    }

    /// Tightly packed size of one layer at mip 0.
    pub fn image_size(&self) -> u64 {
        format::image_size(self.format, self.extent)
    }

    /// Slot in the bindless image array, [`TextureId::NULL`] until registered.
    pub fn bindless_id(&self) -> TextureId {
        self.bindless_id
    }

    pub(crate) fn set_bindless_id(&mut self, id: TextureId) {
        self.bindless_id = id;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy region writing the full extent of mip 0 at the base layer.
    pub fn upload_region(&self) -> vk::BufferImageCopy {
        vk::BufferImageCopy::default()
            .buffer_offset(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(self.aspect)
                    .mip_level(0)
                    .base_array_layer(self.base_array_layer)
                    .layer_count(1),
            )
            .image_extent(self.extent)
    }

    /// Record a copy of `staging` into mip 0 and leave the image shader-readable.
    ///
    /// # Safety
    /// `cmd` must be recording; `staging` must stay alive until it executes.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn upload(&self, device: &ash::Device, cmd: vk::CommandBuffer, staging: &Buffer) {
        assert!(
            self.usage.contains(vk::ImageUsageFlags::TRANSFER_DST),
            "texture '{}' needs TRANSFER_DST usage to be uploaded",
            self.name
        );
        assert!(
            staging.size() >= self.image_size(),
            "staging buffer '{}' ({} bytes) too small for texture '{}' ({} bytes)",
            staging.name(),
            staging.size(),
            self.name,
            self.image_size()
        );

        let image = self.image();
        transition_image(
            device,
            cmd,
            image,
            self.aspect,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        device.cmd_copy_buffer_to_image(
            cmd,
            staging.handle(),
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[self.upload_region()],
        );

        transition_image(
            device,
            cmd,
            image,
            self.aspect,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
    }

    /// Destroy the view, and the image if owned.
    ///
    /// # Panics
    /// If called twice.
    pub fn cleanup(&mut self, device: &ash::Device, allocator: &mut GpuAllocator) -> Result<()> {
        let Some(backing) = self.live.take() else {
            panic!("texture '{}' cleaned up twice", self.name);
        };

        if self.view != vk::ImageView::null() {
            unsafe { device.destroy_image_view(self.view, None) };
        }

        if let Backing::Owned(allocation) = backing {
            allocator.free_image(GpuImage {
                image: self.image,
                allocation,
            })?;
        }

        tracing::trace!("Destroyed texture '{}'", self.name);
        Ok(())
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if self.live.is_some() {
            tracing::warn!("Texture '{}' dropped without cleanup", self.name);
        }
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("extent", &self.extent)
            .field("bindless_id", &self.bindless_id)
            .field("owned", &self.owns_image())
            .finish()
    }
}

/// Pixels decoded from an image file, ready for [`Texture::upload`].
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Decode an image file into tightly packed RGBA8.
pub fn decode_rgba8(path: &std::path::Path) -> Result<DecodedImage> {
    let decoded = image::open(path).map_err(|e| GpuError::ImageLoad {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let rgba = decoded.into_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(DecodedImage {
        width,
        height,
        rgba: rgba.into_raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_a_color_target() {
        let info = TextureCreateInfo::default();
        assert_eq!(info.format, vk::Format::B8G8R8A8_SRGB);
        assert!(info.usage.contains(
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
        ));
        assert_eq!(info.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(info.tiling, vk::ImageTiling::OPTIMAL);
    }

    #[test]
    fn mip_mapped_gets_full_chain() {
        let info = TextureCreateInfo::new_2d(vk::Format::R8G8B8A8_UNORM, 512, 128);
        assert_eq!(info.mip_levels(), 1);
        assert_eq!(info.with_mip_mapped(true).mip_levels(), 10);
        assert_eq!(info.with_mip_mapped(true).image_create_info().mip_levels, 10);
    }

    #[test]
    fn cube_maps_have_six_layers_and_cube_view() {
        let info = TextureCreateInfo::new_2d(vk::Format::R16G16B16A16_SFLOAT, 64, 64)
            .with_cube_map(true);
        let create = info.image_create_info();

        assert_eq!(create.array_layers, 6);
        assert!(create.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
        assert_eq!(info.view_type(), vk::ImageViewType::CUBE);
        assert_eq!(
            info.with_array_layers(2).view_type(),
            vk::ImageViewType::CUBE_ARRAY
        );
    }

    #[test]
    fn layered_and_volume_view_types() {
        let layered =
            TextureCreateInfo::new_2d(vk::Format::D32_SFLOAT, 1024, 1024).with_array_layers(4);
        assert_eq!(layered.view_type(), vk::ImageViewType::TYPE_2D_ARRAY);

        let mut volume = TextureCreateInfo::new_2d(vk::Format::R8_UNORM, 32, 32);
        volume.extent.depth = 32;
        assert_eq!(volume.view_type(), vk::ImageViewType::TYPE_3D);
        assert_eq!(volume.image_create_info().image_type, vk::ImageType::TYPE_3D);
    }

    #[test]
    fn views_follow_usage() {
        assert!(needs_view(vk::ImageUsageFlags::SAMPLED));
        assert!(needs_view(vk::ImageUsageFlags::STORAGE));
        assert!(needs_view(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(needs_view(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(!needs_view(
            vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST
        ));
    }

    #[test]
    fn builder_sets_fields() {
        let info = TextureCreateInfo::new_2d(vk::Format::R8G8B8A8_UNORM, 4, 4)
            .with_usage(vk::ImageUsageFlags::SAMPLED)
            .with_samples(vk::SampleCountFlags::TYPE_4)
            .with_tiling(vk::ImageTiling::LINEAR)
            .with_array_layers(3)
            .with_base_array_layer(2);
        let create = info.image_create_info();
        assert_eq!(create.usage, vk::ImageUsageFlags::SAMPLED);
        assert_eq!(create.samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(create.tiling, vk::ImageTiling::LINEAR);
        assert_eq!(create.array_layers, 3);
        assert_eq!(info.base_array_layer, 2);
    }

    #[test]
    fn missing_image_file_is_reported() {
        let err = decode_rgba8(std::path::Path::new("does/not/exist.png"))
            .err()
            .expect("decoding a missing file must fail");
        assert!(matches!(err, GpuError::ImageLoad { .. }));
    }
}
