//! Headless GPU harness and image comparison.
//!
//! Everything here runs without a window: a GPU context built without a surface, an immediate
//! queue for blocking work and readback helpers that copy GPU data into host memory.

use ash::vk;
use image::{ImageBuffer, Rgba};
use std::path::Path;

use wenvk_gpu::barrier::transition_image;
use wenvk_gpu::{
    BindlessSetManager, Buffer, GpuContext, GpuContextBuilder, ImmediateCommandQueue,
    MemoryPolicy, Texture,
};

use crate::{Result, TestError, VisualTestConfig};

/// RGBA8 image read back from the GPU.
pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// GPU context without a surface, plus what tests need to drive it.
pub struct HeadlessGpu {
    immediate: ImmediateCommandQueue,
    bindless: Option<BindlessSetManager>,
    context: GpuContext,
}

impl HeadlessGpu {
    /// Create a headless context with validation enabled.
    pub fn new() -> Result<Self> {
        let context = GpuContextBuilder::new()
            .app_name("wenvk-test")
            .validation(true)
            .build()?;
        let immediate = ImmediateCommandQueue::new(&context, "test immediate")?;

        Ok(Self {
            immediate,
            bindless: None,
            context,
        })
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.context
    }

    pub fn device(&self) -> &ash::Device {
        self.context.device()
    }

    pub fn immediate(&self) -> &ImmediateCommandQueue {
        &self.immediate
    }

    /// The bindless set, created on first use.
    pub fn bindless(&mut self) -> Result<&BindlessSetManager> {
        if self.bindless.is_none() {
            let anisotropy = self.context.capabilities().max_sampler_anisotropy;
            self.bindless = Some(BindlessSetManager::new(
                &self.context,
                anisotropy,
                "test bindless",
            )?);
        }
        self.bindless
            .as_ref()
            .ok_or_else(|| TestError::Harness("bindless set missing".to_string()))
    }

    /// Record with `record` and block until the GPU has executed it.
    pub fn run<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        self.immediate.submit(&self.context, record)?;
        Ok(())
    }

    /// Copy the whole of `buffer` into host memory.
    pub fn read_buffer(&self, buffer: &Buffer) -> Result<Vec<u8>> {
        let mut readback = Buffer::new(
            &self.context,
            buffer.size(),
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryPolicy::Staging,
            "test readback",
        )?;

        let copied = self.run(|device, cmd| unsafe {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: buffer.size(),
            };
            device.cmd_copy_buffer(cmd, buffer.handle(), readback.handle(), &[region]);
        });

        let bytes = readback
            .mapping()
            .map(|mapping| unsafe {
                std::slice::from_raw_parts(mapping.as_ptr(), mapping.len()).to_vec()
            })
            .ok_or_else(|| TestError::Harness("readback buffer is not mapped".to_string()));

        readback.cleanup(&mut self.context.allocator().lock())?;
        copied?;
        bytes
    }

    /// Read mip 0 of an uploaded RGBA8 texture.
    ///
    /// The texture must be in SHADER_READ_ONLY_OPTIMAL layout, as left by an upload; it is
    /// returned to that layout.
    pub fn read_texture_rgba8(&self, texture: &Texture) -> Result<RgbaImage> {
        if wenvk_gpu::format::bytes_per_pixel(texture.format()) != 4 {
            return Err(TestError::Harness(format!(
                "cannot read {:?} as RGBA8",
                texture.format()
            )));
        }

        let extent = texture.extent_2d();
        let mut readback = Buffer::new(
            &self.context,
            texture.image_size(),
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryPolicy::Staging,
            "test texture readback",
        )?;

        let copied = self.run(|device, cmd| unsafe {
            let image = texture.image();
            let aspect = texture.aspect_flags();
            transition_image(
                device,
                cmd,
                image,
                aspect,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            );
            device.cmd_copy_image_to_buffer(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                readback.handle(),
                &[texture.upload_region()],
            );
            transition_image(
                device,
                cmd,
                image,
                aspect,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        });

        let bytes = readback.mapping().map(|mapping| unsafe {
            std::slice::from_raw_parts(mapping.as_ptr(), mapping.len()).to_vec()
        });

        readback.cleanup(&mut self.context.allocator().lock())?;
        copied?;

        bytes
            .and_then(|data| ImageBuffer::from_raw(extent.width, extent.height, data))
            .ok_or_else(|| TestError::Harness("Failed to create image from raw data".to_string()))
    }

    /// Free `texture` through the shared allocator.
    pub fn destroy_texture(&self, texture: &mut Texture) -> Result<()> {
        texture.cleanup(self.context.device(), &mut self.context.allocator().lock())?;
        Ok(())
    }

    /// Free `buffer` through the shared allocator.
    pub fn destroy_buffer(&self, buffer: &mut Buffer) -> Result<()> {
        buffer.cleanup(&mut self.context.allocator().lock())?;
        Ok(())
    }
}

impl Drop for HeadlessGpu {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            let _ = device.device_wait_idle();
        }
        if let Some(bindless) = self.bindless.as_mut() {
            bindless.cleanup(device);
        }
        self.immediate.cleanup(device);
    }
}

/// Compare two images and return the normalized difference (0.0-1.0).
pub fn compare_images(a: &RgbaImage, b: &RgbaImage) -> Result<f64> {
    if a.dimensions() != b.dimensions() {
        return Err(TestError::ImageComparison(format!(
            "Image dimensions don't match: {:?} vs {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }

    let total_diff: u64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| {
            pa.0.iter()
                .zip(pb.0.iter())
                .map(|(x, y)| u64::from(x.abs_diff(*y)))
                .sum::<u64>()
        })
        .sum();

    let max_diff = (u64::from(a.width()) * u64::from(a.height()) * 4 * 255) as f64;
    if max_diff == 0.0 {
        return Ok(0.0);
    }
    Ok(total_diff as f64 / max_diff)
}

/// Visual diff: differing pixels in red, matching ones dimmed.
pub fn create_diff_image(a: &RgbaImage, b: &RgbaImage) -> RgbaImage {
    let (width, height) = a.dimensions();
    let mut diff = ImageBuffer::new(width, height);

    for (x, y, pixel) in diff.enumerate_pixels_mut() {
        let pa = a.get_pixel(x, y);
        let pb = b.get_pixel(x, y);

        let max_diff = pa
            .0
            .iter()
            .zip(pb.0.iter())
            .map(|(x, y)| x.abs_diff(*y))
            .max()
            .unwrap_or(0);
        if max_diff > 10 {
            *pixel = Rgba([255, 0, 0, 255]);
        } else {
            *pixel = Rgba([pa[0] / 2, pa[1] / 2, pa[2] / 2, 255]);
        }
    }

    diff
}

/// Compares images against stored baselines.
pub struct VisualRegressionTest {
    config: VisualTestConfig,
}

impl VisualRegressionTest {
    pub fn new(config: VisualTestConfig) -> Self {
        Self { config }
    }

    /// Save `image` as `name` and compare it with the baseline, creating the baseline if missing.
    pub fn check(&self, name: &str, image: &RgbaImage) -> Result<()> {
        std::fs::create_dir_all(&self.config.baseline_dir)?;
        std::fs::create_dir_all(&self.config.output_dir)?;

        let baseline_path = format!("{}/{}.png", self.config.baseline_dir, name);
        let output_path = format!("{}/{}.png", self.config.output_dir, name);

        image.save(&output_path)?;

        if Path::new(&baseline_path).exists() {
            let baseline = image::open(&baseline_path)?.to_rgba8();

            let diff = compare_images(&baseline, image)?;
            if diff > self.config.threshold {
                let diff_path = format!("{}/{}_diff.png", self.config.output_dir, name);
                create_diff_image(&baseline, image).save(&diff_path)?;

                return Err(TestError::ImageComparison(format!(
                    "Image difference {:.4} exceeds threshold {:.4} (see {})",
                    diff, self.config.threshold, diff_path
                )));
            }
        } else {
            image.save(&baseline_path)?;
            tracing::info!("Created new baseline: {}", baseline_path);
        }

        Ok(())
    }
}
