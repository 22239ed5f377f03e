//! End-to-end resource tests against a real device.

use ash::vk;
use image::Rgba;
use wenvk_gpu::texture_cache::{
    create_default_textures, create_texture_with_pixels, error_checker_pixels,
    DEFAULT_TEXTURE_USAGE, MAGENTA_PIXEL, WHITE_PIXEL,
};
use wenvk_gpu::{
    Buffer, DeferredDeletionQueue, MemoryPolicy, NBuffer, TextureCache, TextureCreateInfo,
    TextureId, FRAME_OVERLAP,
};

use crate::HeadlessGpu;

fn rgba_info(width: u32, height: u32) -> TextureCreateInfo {
    TextureCreateInfo::new_2d(vk::Format::R8G8B8A8_UNORM, width, height)
        .with_usage(DEFAULT_TEXTURE_USAGE)
}

#[test]
#[ignore = "Requires GPU hardware"]
fn white_texture_reads_back_white() {
    let mut gpu = HeadlessGpu::new().unwrap();
    let capacity = gpu.bindless().unwrap().max_images();

    let texture = create_texture_with_pixels(
        gpu.gpu(),
        gpu.immediate(),
        &rgba_info(1, 1),
        &WHITE_PIXEL,
        "white",
    )
    .unwrap();

    assert_eq!(texture.extent_2d(), vk::Extent2D { width: 1, height: 1 });
    assert_eq!(texture.format(), vk::Format::R8G8B8A8_UNORM);
    assert!(texture.view().is_some());

    let image = gpu.read_texture_rgba8(&texture).unwrap();
    assert_eq!(image.get_pixel(0, 0), &Rgba(WHITE_PIXEL));

    let mut cache = TextureCache::new(capacity);
    let id = cache.insert(texture);
    assert!(!id.is_null());
    assert_eq!(cache.get(id).unwrap().bindless_id(), id);

    for mut texture in cache.drain() {
        gpu.destroy_texture(&mut texture).unwrap();
    }
}

#[test]
#[ignore = "Requires GPU hardware"]
fn persistent_mapping_is_stable() {
    let gpu = HeadlessGpu::new().unwrap();
    let mut buffer = Buffer::new(
        gpu.gpu(),
        256,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        MemoryPolicy::Persistent,
        "uniforms",
    )
    .unwrap();

    let first = buffer.mapped_ptr().unwrap();
    assert!(!first.is_null());
    buffer.copy_data_to_buffer(&[7u8; 64], 128);
    assert_eq!(buffer.mapped_ptr(), Some(first));

    let device_local = Buffer::new(
        gpu.gpu(),
        256,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        MemoryPolicy::GpuOnly,
        "device local",
    );
    let mut device_local = device_local.unwrap();
    assert!(device_local.mapped_ptr().is_none());

    gpu.destroy_buffer(&mut buffer).unwrap();
    gpu.destroy_buffer(&mut device_local).unwrap();
}

#[test]
#[ignore = "Requires GPU hardware"]
fn staging_upload_lands_at_offset() {
    let gpu = HeadlessGpu::new().unwrap();
    let mut target = Buffer::new(
        gpu.gpu(),
        64,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryPolicy::GpuOnly,
        "target",
    )
    .unwrap();
    let mut staging = Buffer::new(
        gpu.gpu(),
        16,
        vk::BufferUsageFlags::empty(),
        MemoryPolicy::Staging,
        "staging",
    )
    .unwrap();

    let data: Vec<u8> = (1..=16).collect();
    gpu.run(|device, cmd| unsafe {
        device.cmd_fill_buffer(cmd, target.handle(), 0, vk::WHOLE_SIZE, 0);
        staging.upload(device, cmd, &target, &data, 32, true);
    })
    .unwrap();

    let bytes = gpu.read_buffer(&target).unwrap();
    assert_eq!(&bytes[32..48], data.as_slice());
    assert!(bytes[..32].iter().all(|&b| b == 0));
    assert!(bytes[48..].iter().all(|&b| b == 0));

    gpu.destroy_buffer(&mut staging).unwrap();
    gpu.destroy_buffer(&mut target).unwrap();
}

#[test]
#[ignore = "Requires GPU hardware"]
fn nbuffer_uploads_only_the_written_range() {
    let gpu = HeadlessGpu::new().unwrap();
    let mut nbuffer = NBuffer::new(
        gpu.gpu(),
        128,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
        FRAME_OVERLAP,
        "per-frame data",
    )
    .unwrap();

    gpu.run(|device, cmd| unsafe {
        device.cmd_fill_buffer(cmd, nbuffer.buffer().handle(), 0, vk::WHOLE_SIZE, 0);
    })
    .unwrap();

    for frame in 0..FRAME_OVERLAP {
        let value = frame as u8 + 1;
        gpu.run(|device, cmd| unsafe {
            nbuffer.upload(device, cmd, frame, &[value; 8], 16 * frame as u64, true);
        })
        .unwrap();
    }

    let bytes = gpu.read_buffer(nbuffer.buffer()).unwrap();
    for frame in 0..FRAME_OVERLAP {
        let start = 16 * frame;
        assert!(bytes[start..start + 8].iter().all(|&b| b == frame as u8 + 1));
        assert!(bytes[start + 8..start + 16].iter().all(|&b| b == 0));
    }

    let rejected = gpu.run(|device, cmd| unsafe {
        assert!(!nbuffer.try_upload(device, cmd, 0, &[0xff; 16], 120, true));
    });
    rejected.unwrap();

    nbuffer.cleanup(&mut gpu.gpu().allocator().lock()).unwrap();
}

#[test]
#[ignore = "Requires GPU hardware"]
fn default_textures_are_distinct_and_correct() {
    let gpu = HeadlessGpu::new().unwrap();
    let (white, error) = create_default_textures(gpu.gpu(), gpu.immediate()).unwrap();

    assert_eq!(error.extent_2d(), vk::Extent2D { width: 2, height: 2 });
    let checker = gpu.read_texture_rgba8(&error).unwrap();
    assert_eq!(checker.as_raw().as_slice(), error_checker_pixels().as_slice());
    assert_eq!(checker.get_pixel(1, 0), &Rgba(MAGENTA_PIXEL));

    let mut cache = TextureCache::new(16);
    let white_id = cache.insert(white);
    let error_id = cache.insert(error);
    cache.set_defaults(white_id, error_id);

    assert_ne!(cache.white_id(), cache.error_id());
    assert!(!cache.retire(white_id));
    assert!(!cache.retire(error_id));

    for mut texture in cache.drain() {
        gpu.destroy_texture(&mut texture).unwrap();
    }
}

#[test]
#[ignore = "Requires GPU hardware"]
fn destroyed_texture_index_is_reused_after_frames_retire() {
    let mut gpu = HeadlessGpu::new().unwrap();
    let capacity = gpu.bindless().unwrap().max_images();
    let mut cache = TextureCache::new(capacity);
    let mut deferred = DeferredDeletionQueue::<TextureId>::new(FRAME_OVERLAP);

    let make = |name: &str| {
        create_texture_with_pixels(gpu.gpu(), gpu.immediate(), &rgba_info(1, 1), &WHITE_PIXEL, name)
            .unwrap()
    };

    let first = cache.insert(make("first"));
    assert!(cache.retire(first));
    deferred.queue(first, 0);

    // Still reserved while frames may reference it.
    let second = cache.insert(make("second"));
    assert_ne!(second.index(), first.index());

    let mut released = Vec::new();
    for frame in 1..=FRAME_OVERLAP as u64 + 1 {
        deferred
            .process(frame, |id| {
                released.push(cache.remove(id));
                Ok(())
            })
            .unwrap();
    }
    assert_eq!(released.len(), 1);
    for texture in released.iter_mut().flatten() {
        gpu.destroy_texture(texture).unwrap();
    }

    let third = cache.insert(make("third"));
    assert_eq!(third.index(), first.index());
    assert_ne!(third, first);
    assert!(cache.get(first).is_none());

    for mut texture in cache.drain() {
        gpu.destroy_texture(&mut texture).unwrap();
    }
}
