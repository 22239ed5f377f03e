//! Samplers and the default presets shared through the bindless set.

use crate::context::GpuContext;
use crate::error::Result;
use ash::vk;

/// Built-in samplers registered at fixed bindless sampler slots.
///
/// Shaders index the sampler array with these values directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerPreset {
    Nearest = 0,
    Linear = 1,
    ShadowCompare = 2,
}

impl SamplerPreset {
    /// Every preset in slot order.
    pub const ALL: [Self; 3] = [Self::Nearest, Self::Linear, Self::ShadowCompare];

    /// Bindless sampler slot.
    pub fn slot(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nearest => "default nearest",
            Self::Linear => "default linear",
            Self::ShadowCompare => "default shadow map",
        }
    }

    /// Create info for the preset. Anisotropy applies to the linear sampler only.
    pub fn create_info(self, max_anisotropy: f32) -> vk::SamplerCreateInfo<'static> {
        let base = vk::SamplerCreateInfo::default()
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE);

        match self {
            Self::Nearest => base
                .mag_filter(vk::Filter::NEAREST)
                .min_filter(vk::Filter::NEAREST)
                .mipmap_mode(vk::SamplerMipmapMode::NEAREST),
            Self::Linear => base
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                .anisotropy_enable(max_anisotropy > 1.0)
                .max_anisotropy(max_anisotropy.max(1.0)),
            Self::ShadowCompare => base
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .compare_enable(true)
                .compare_op(vk::CompareOp::GREATER_OR_EQUAL),
        }
    }
}

/// Owned sampler handle.
pub struct Sampler {
    handle: vk::Sampler,
    name: String,
    destroyed: bool,
}

impl Sampler {
    pub fn new(gpu: &GpuContext, info: &vk::SamplerCreateInfo<'_>, name: &str) -> Result<Self> {
        let handle = unsafe { gpu.device().create_sampler(info, None)? };
        gpu.set_object_name(handle, name);
        Ok(Self {
            handle,
            name: name.to_string(),
            destroyed: false,
        })
    }

    pub fn handle(&self) -> vk::Sampler {
        assert!(!self.destroyed, "sampler '{}' used after cleanup", self.name);
        self.handle
    }

    /// Destroy the sampler.
    ///
    /// # Safety
    /// No pending command buffer may reference it.
    pub unsafe fn cleanup(&mut self, device: &ash::Device) {
        assert!(!self.destroyed, "sampler '{}' cleaned up twice", self.name);
        device.destroy_sampler(self.handle, None);
        self.destroyed = true;
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if !self.destroyed {
            tracing::warn!("Sampler '{}' dropped without cleanup", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_occupy_reserved_slots() {
        let slots: Vec<_> = SamplerPreset::ALL.iter().map(|p| p.slot()).collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[test]
    fn nearest_has_no_filtering() {
        let info = SamplerPreset::Nearest.create_info(16.0);
        assert_eq!(info.mag_filter, vk::Filter::NEAREST);
        assert_eq!(info.min_filter, vk::Filter::NEAREST);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
    }

    #[test]
    fn linear_uses_device_anisotropy() {
        let info = SamplerPreset::Linear.create_info(16.0);
        assert_eq!(info.min_filter, vk::Filter::LINEAR);
        assert_eq!(info.mipmap_mode, vk::SamplerMipmapMode::LINEAR);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(info.max_anisotropy, 16.0);

        let without = SamplerPreset::Linear.create_info(1.0);
        assert_eq!(without.anisotropy_enable, vk::FALSE);
    }

    #[test]
    fn shadow_sampler_compares_greater_or_equal() {
        let info = SamplerPreset::ShadowCompare.create_info(16.0);
        assert_eq!(info.compare_enable, vk::TRUE);
        assert_eq!(info.compare_op, vk::CompareOp::GREATER_OR_EQUAL);
    }
}
