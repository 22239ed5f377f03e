//! The global bindless descriptor set.
//!
//! Binding 0 is an array of sampled images indexed by [`TextureId::index`](crate::TextureId::index),
//! binding 1 an array of samplers whose first slots hold the [`SamplerPreset`]s. Both arrays are
//! partially bound and update-after-bind, so registering a texture never disturbs command buffers
//! that are already recording or in flight.

use crate::context::GpuContext;
use crate::descriptors::{write_sampled_image, write_sampler, DescriptorPool, DescriptorSetLayoutBuilder};
use crate::error::Result;
use crate::sampler::{Sampler, SamplerPreset};
use ash::vk;

/// Capacity of the sampled-image array.
pub const MAX_BINDLESS_RESOURCES: u32 = 16536;
/// Capacity of the sampler array.
pub const MAX_SAMPLERS: u32 = 32;

pub const TEXTURE_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;

/// Layout builder for the bindless set.
pub fn layout_builder<'a>(max_images: u32) -> DescriptorSetLayoutBuilder<'a> {
    DescriptorSetLayoutBuilder::new()
        .bindless_array(
            TEXTURE_BINDING,
            vk::DescriptorType::SAMPLED_IMAGE,
            max_images,
            vk::ShaderStageFlags::ALL,
        )
        .bindless_array(
            SAMPLER_BINDING,
            vk::DescriptorType::SAMPLER,
            MAX_SAMPLERS,
            vk::ShaderStageFlags::ALL,
        )
}

/// Pool sizes for one bindless set.
pub fn pool_sizes(max_images: u32) -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::SAMPLED_IMAGE)
            .descriptor_count(max_images),
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::SAMPLER)
            .descriptor_count(MAX_SAMPLERS),
    ]
}

struct Live {
    pool: DescriptorPool,
    layout: vk::DescriptorSetLayout,
    set: vk::DescriptorSet,
    samplers: Vec<Sampler>,
}

/// Owner of the bindless descriptor set and the default samplers.
pub struct BindlessSetManager {
    live: Option<Live>,
    max_images: u32,
    name: String,
}

impl BindlessSetManager {
    /// Create the pool, layout and set, then register the default samplers.
    ///
    /// The image array is clamped to what the device supports for update-after-bind.
    pub fn new(gpu: &GpuContext, max_anisotropy: f32, name: &str) -> Result<Self> {
        let device = gpu.device();
        let device_limit = gpu.capabilities().max_update_after_bind_sampled_images;
        let max_images = if device_limit == 0 {
            MAX_BINDLESS_RESOURCES
        } else {
            MAX_BINDLESS_RESOURCES.min(device_limit)
        };
        if max_images < MAX_BINDLESS_RESOURCES {
            tracing::warn!(
                "Device limits bindless images to {max_images} (wanted {MAX_BINDLESS_RESOURCES})"
            );
        }

        let (pool, layout, set) = unsafe {
            let pool = DescriptorPool::new(
                device,
                1,
                &pool_sizes(max_images),
                vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND,
            )?;
            let layout = layout_builder(max_images).build(device)?;
            let set = pool.allocate(device, &[layout])?[0];
            (pool, layout, set)
        };

        gpu.set_object_name(pool.handle(), name);
        gpu.set_object_name(layout, name);
        gpu.set_object_name(set, name);

        let mut manager = Self {
            live: Some(Live {
                pool,
                layout,
                set,
                samplers: Vec::with_capacity(SamplerPreset::ALL.len()),
            }),
            max_images,
            name: name.to_string(),
        };

        for preset in SamplerPreset::ALL {
            let sampler = Sampler::new(gpu, &preset.create_info(max_anisotropy), preset.name())?;
            manager.add_sampler(device, preset.slot(), sampler.handle());
            manager.live_mut().samplers.push(sampler);
        }

        tracing::info!(
            "Bindless set '{name}' ready ({max_images} images, {MAX_SAMPLERS} samplers)"
        );
        Ok(manager)
    }

    fn live(&self) -> &Live {
        match &self.live {
            Some(live) => live,
            None => panic!("bindless set '{}' used after cleanup", self.name),
        }
    }

    fn live_mut(&mut self) -> &mut Live {
        match &mut self.live {
            Some(live) => live,
            None => panic!("bindless set '{}' used after cleanup", self.name),
        }
    }

    /// Number of image slots.
    pub fn max_images(&self) -> u32 {
        self.max_images
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.live().layout
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.live().set
    }

    /// Point image slot `id` at `view`.
    pub fn add_image(&self, device: &ash::Device, id: u32, view: vk::ImageView) {
        assert!(view != vk::ImageView::null(), "bindless image view must be valid");
        assert!(
            id < self.max_images,
            "bindless image id {id} out of range ({} slots)",
            self.max_images
        );

        unsafe {
            write_sampled_image(
                device,
                self.set(),
                TEXTURE_BINDING,
                id,
                view,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        }
    }

    /// Point sampler slot `id` at `sampler`.
    pub fn add_sampler(&self, device: &ash::Device, id: u32, sampler: vk::Sampler) {
        assert!(
            id < MAX_SAMPLERS,
            "bindless sampler id {id} out of range ({MAX_SAMPLERS} slots)"
        );

        unsafe {
            write_sampler(device, self.set(), SAMPLER_BINDING, id, sampler);
        }
    }

    /// Bind the set at set index 0.
    ///
    /// # Safety
    /// `cmd` must be recording and `layout` must be compatible with [`Self::layout`] at set 0.
    pub unsafe fn bind(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
    ) {
        device.cmd_bind_descriptor_sets(cmd, bind_point, layout, 0, &[self.set()], &[]);
    }

    /// Destroy the default samplers, the layout and the pool.
    ///
    /// # Panics
    /// If called twice.
    pub fn cleanup(&mut self, device: &ash::Device) {
        let Some(mut live) = self.live.take() else {
            panic!("bindless set '{}' cleaned up twice", self.name);
        };

        unsafe {
            for sampler in &mut live.samplers {
                sampler.cleanup(device);
            }
            device.destroy_descriptor_set_layout(live.layout, None);
            live.pool.destroy(device);
        }
        tracing::debug!("Destroyed bindless set '{}'", self.name);
    }
}

impl Drop for BindlessSetManager {
    fn drop(&mut self) {
        if self.live.is_some() {
            tracing::warn!("Bindless set '{}' dropped without cleanup", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_has_image_and_sampler_arrays() {
        let builder = layout_builder(MAX_BINDLESS_RESOURCES);
        assert_eq!(builder.binding_flags().len(), 2);
        assert!(builder.binding_flags().iter().all(|f| f.contains(
            vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
        )));
        assert!(builder.requires_update_after_bind());
    }

    #[test]
    fn pool_matches_layout_capacity() {
        let sizes = pool_sizes(MAX_BINDLESS_RESOURCES);
        assert_eq!(sizes[0].ty, vk::DescriptorType::SAMPLED_IMAGE);
        assert_eq!(sizes[0].descriptor_count, 16536);
        assert_eq!(sizes[1].ty, vk::DescriptorType::SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 32);
    }

    #[test]
    fn default_samplers_fit_sampler_array() {
        assert!(SamplerPreset::ALL
            .iter()
            .all(|preset| preset.slot() < MAX_SAMPLERS));
    }
}
