//! Image format classification.

use ash::vk;

/// Whether `format` has a depth component.
pub fn is_depth(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT
            | vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::X8_D24_UNORM_PACK32
    )
}

/// Whether `format` has a stencil component.
pub fn is_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect used for views and copies. Combined depth-stencil formats resolve to depth.
pub fn aspect_flags(format: vk::Format) -> vk::ImageAspectFlags {
    if is_depth(format) {
        vk::ImageAspectFlags::DEPTH
    } else if is_stencil(format) {
        vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Size of one texel in bytes, or 0 for block-compressed and unknown formats.
pub fn bytes_per_pixel(format: vk::Format) -> u32 {
    use vk::Format as F;

    match format {
        F::R4G4_UNORM_PACK8
        | F::R8_UNORM
        | F::R8_SNORM
        | F::R8_USCALED
        | F::R8_SSCALED
        | F::R8_UINT
        | F::R8_SINT
        | F::R8_SRGB
        | F::S8_UINT => 1,

        F::R5G6B5_UNORM_PACK16
        | F::B5G6R5_UNORM_PACK16
        | F::R4G4B4A4_UNORM_PACK16
        | F::B4G4R4A4_UNORM_PACK16
        | F::R5G5B5A1_UNORM_PACK16
        | F::B5G5R5A1_UNORM_PACK16
        | F::A1R5G5B5_UNORM_PACK16
        | F::R8G8_UNORM
        | F::R8G8_SNORM
        | F::R8G8_USCALED
        | F::R8G8_SSCALED
        | F::R8G8_UINT
        | F::R8G8_SINT
        | F::R8G8_SRGB
        | F::R16_UNORM
        | F::R16_SNORM
        | F::R16_USCALED
        | F::R16_SSCALED
        | F::R16_UINT
        | F::R16_SINT
        | F::R16_SFLOAT
        | F::D16_UNORM => 2,

        F::R8G8B8_UNORM
        | F::R8G8B8_SNORM
        | F::R8G8B8_USCALED
        | F::R8G8B8_SSCALED
        | F::R8G8B8_UINT
        | F::R8G8B8_SINT
        | F::R8G8B8_SRGB
        | F::B8G8R8_UNORM
        | F::B8G8R8_SNORM
        | F::B8G8R8_USCALED
        | F::B8G8R8_SSCALED
        | F::B8G8R8_UINT
        | F::B8G8R8_SINT
        | F::B8G8R8_SRGB
        | F::D16_UNORM_S8_UINT => 3,

        F::R8G8B8A8_UNORM
        | F::R8G8B8A8_SNORM
        | F::R8G8B8A8_USCALED
        | F::R8G8B8A8_SSCALED
        | F::R8G8B8A8_UINT
        | F::R8G8B8A8_SINT
        | F::R8G8B8A8_SRGB
        | F::B8G8R8A8_UNORM
        | F::B8G8R8A8_SNORM
        | F::B8G8R8A8_USCALED
        | F::B8G8R8A8_SSCALED
        | F::B8G8R8A8_UINT
        | F::B8G8R8A8_SINT
        | F::B8G8R8A8_SRGB
        | F::A8B8G8R8_UNORM_PACK32
        | F::A8B8G8R8_SNORM_PACK32
        | F::A8B8G8R8_USCALED_PACK32
        | F::A8B8G8R8_SSCALED_PACK32
        | F::A8B8G8R8_UINT_PACK32
        | F::A8B8G8R8_SINT_PACK32
        | F::A8B8G8R8_SRGB_PACK32
        | F::A2R10G10B10_UNORM_PACK32
        | F::A2R10G10B10_SNORM_PACK32
        | F::A2R10G10B10_USCALED_PACK32
        | F::A2R10G10B10_SSCALED_PACK32
        | F::A2R10G10B10_UINT_PACK32
        | F::A2R10G10B10_SINT_PACK32
        | F::A2B10G10R10_UNORM_PACK32
        | F::A2B10G10R10_SNORM_PACK32
        | F::A2B10G10R10_USCALED_PACK32
        | F::A2B10G10R10_SSCALED_PACK32
        | F::A2B10G10R10_UINT_PACK32
        | F::A2B10G10R10_SINT_PACK32
        | F::R16G16_UNORM
        | F::R16G16_SNORM
        | F::R16G16_USCALED
        | F::R16G16_SSCALED
        | F::R16G16_UINT
        | F::R16G16_SINT
        | F::R16G16_SFLOAT
        | F::R32_UINT
        | F::R32_SINT
        | F::R32_SFLOAT
        | F::B10G11R11_UFLOAT_PACK32
        | F::E5B9G9R9_UFLOAT_PACK32
        | F::D24_UNORM_S8_UINT
        | F::X8_D24_UNORM_PACK32
        | F::D32_SFLOAT => 4,

        F::R16G16B16_UNORM
        | F::R16G16B16_SNORM
        | F::R16G16B16_USCALED
        | F::R16G16B16_SSCALED
        | F::R16G16B16_UINT
        | F::R16G16B16_SINT
        | F::R16G16B16_SFLOAT => 6,

        F::R16G16B16A16_UNORM
        | F::R16G16B16A16_SNORM
        | F::R16G16B16A16_USCALED
        | F::R16G16B16A16_SSCALED
        | F::R16G16B16A16_UINT
        | F::R16G16B16A16_SINT
        | F::R16G16B16A16_SFLOAT
        | F::R32G32_UINT
        | F::R32G32_SINT
        | F::R32G32_SFLOAT
        | F::R64_UINT
        | F::R64_SINT
        | F::R64_SFLOAT
        | F::D32_SFLOAT_S8_UINT => 8,

        F::R32G32B32_UINT | F::R32G32B32_SINT | F::R32G32B32_SFLOAT => 12,

        F::R32G32B32A32_UINT
        | F::R32G32B32A32_SINT
        | F::R32G32B32A32_SFLOAT
        | F::R64G64_UINT
        | F::R64G64_SINT
        | F::R64G64_SFLOAT => 16,

        F::R64G64B64_UINT | F::R64G64B64_SINT | F::R64G64B64_SFLOAT => 24,

        F::R64G64B64A64_UINT | F::R64G64B64A64_SINT | F::R64G64B64A64_SFLOAT => 32,

        _ => 0,
    }
}

/// Bytes needed for one tightly packed mip-0 layer of `extent`.
pub fn image_size(format: vk::Format, extent: vk::Extent3D) -> u64 {
    u64::from(bytes_per_pixel(format))
        * u64::from(extent.width)
        * u64::from(extent.height)
        * u64::from(extent.depth)
}

/// Length of a full mip chain down to 1×1.
pub fn full_mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_stencil_classification() {
        assert!(is_depth(vk::Format::D32_SFLOAT));
        assert!(!is_stencil(vk::Format::D32_SFLOAT));
        assert!(is_depth(vk::Format::D24_UNORM_S8_UINT));
        assert!(is_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(is_stencil(vk::Format::S8_UINT));
        assert!(!is_depth(vk::Format::S8_UINT));
        assert!(!is_depth(vk::Format::R8G8B8A8_UNORM));
    }

    #[test]
    fn aspect_prefers_depth() {
        assert_eq!(
            aspect_flags(vk::Format::D32_SFLOAT_S8_UINT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(aspect_flags(vk::Format::S8_UINT), vk::ImageAspectFlags::STENCIL);
        assert_eq!(
            aspect_flags(vk::Format::B8G8R8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn texel_sizes() {
        assert_eq!(bytes_per_pixel(vk::Format::R8_UNORM), 1);
        assert_eq!(bytes_per_pixel(vk::Format::R16_SFLOAT), 2);
        assert_eq!(bytes_per_pixel(vk::Format::R8G8B8A8_UNORM), 4);
        assert_eq!(bytes_per_pixel(vk::Format::R32_SFLOAT), 4);
        assert_eq!(bytes_per_pixel(vk::Format::R32G32_SFLOAT), 8);
        assert_eq!(bytes_per_pixel(vk::Format::R32G32B32A32_SFLOAT), 16);
        assert_eq!(bytes_per_pixel(vk::Format::BC7_UNORM_BLOCK), 0);
        assert_eq!(bytes_per_pixel(vk::Format::UNDEFINED), 0);
    }

    #[test]
    fn image_size_covers_depth() {
        let extent = vk::Extent3D {
            width: 4,
            height: 2,
            depth: 3,
        };
        assert_eq!(image_size(vk::Format::R8G8B8A8_UNORM, extent), 96);
    }

    #[test]
    fn mip_chain_lengths() {
        assert_eq!(full_mip_levels(1, 1), 1);
        assert_eq!(full_mip_levels(2, 1), 2);
        assert_eq!(full_mip_levels(256, 256), 9);
        assert_eq!(full_mip_levels(300, 17), 9);
        assert_eq!(full_mip_levels(0, 0), 1);
    }
}
