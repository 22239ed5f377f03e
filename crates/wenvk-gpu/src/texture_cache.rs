//! Texture registry: bindless ids, path lookups and the default textures.

use crate::buffer::Buffer;
use crate::context::GpuContext;
use crate::error::Result;
use crate::format;
use crate::immediate::ImmediateCommandQueue;
use crate::memory::MemoryPolicy;
use crate::slots::{SlotPool, TextureId};
use crate::texture::{Texture, TextureCreateInfo};
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::collections::{HashMap, HashSet};

pub const WHITE_PIXEL: [u8; 4] = [255, 255, 255, 255];
pub const BLACK_PIXEL: [u8; 4] = [0, 0, 0, 255];
pub const MAGENTA_PIXEL: [u8; 4] = [255, 0, 255, 255];

/// 2×2 black/magenta checker shown in place of missing textures.
pub fn error_checker_pixels() -> [u8; 16] {
    let mut pixels = [0u8; 16];
    for (i, texel) in [BLACK_PIXEL, MAGENTA_PIXEL, MAGENTA_PIXEL, BLACK_PIXEL]
        .iter()
        .enumerate()
    {
        pixels[i * 4..i * 4 + 4].copy_from_slice(texel);
    }
    pixels
}

/// Values that remember the bindless slot they were registered under.
pub trait BindlessSlot {
    fn assign_bindless_id(&mut self, id: TextureId);
}

impl BindlessSlot for Texture {
    fn assign_bindless_id(&mut self, id: TextureId) {
        self.set_bindless_id(id);
    }
}

/// Textures addressed by [`TextureId`].
///
/// Destroying a texture is two-step: [`retire`](Self::retire) hides it from lookups while frames
/// in flight may still sample it, and [`remove`](Self::remove) hands it back for cleanup and only
/// then frees its index for reuse.
pub struct TextureCache<T = Texture> {
    pool: SlotPool<T>,
    paths: HashMap<String, TextureId>,
    retired: HashSet<TextureId>,
    white: TextureId,
    error: TextureId,
}

impl<T: BindlessSlot> TextureCache<T> {
    /// Cache holding at most `capacity` textures.
    pub fn new(capacity: u32) -> Self {
        Self {
            pool: SlotPool::new(capacity),
            paths: HashMap::new(),
            retired: HashSet::new(),
            white: TextureId::NULL,
            error: TextureId::NULL,
        }
    }

    /// Number of textures held, retired ones included.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn capacity(&self) -> u32 {
        self.pool.limit()
    }

    /// Register `texture` under a fresh id, or give it back when every slot is taken.
    pub fn try_insert(&mut self, texture: T) -> std::result::Result<TextureId, T> {
        if self.pool.len() >= self.pool.limit() as usize {
            return Err(texture);
        }
        Ok(self.pool.insert_with(|id| {
            let mut texture = texture;
            texture.assign_bindless_id(id);
            texture
        }))
    }

    /// Register `texture` under a fresh id.
    ///
    /// # Panics
    /// If the cache is full.
    pub fn insert(&mut self, texture: T) -> TextureId {
        match self.try_insert(texture) {
            Ok(id) => id,
            Err(_) => panic!("texture cache exhausted ({} slots)", self.capacity()),
        }
    }

    /// Live texture for `id`; `None` for null, stale, freed or retired ids.
    pub fn get(&self, id: TextureId) -> Option<&T> {
        if self.retired.contains(&id) {
            return None;
        }
        self.pool.get(id)
    }

    pub fn get_mut(&mut self, id: TextureId) -> Option<&mut T> {
        if self.retired.contains(&id) {
            return None;
        }
        self.pool.get_mut(id)
    }

    pub fn contains(&self, id: TextureId) -> bool {
        self.get(id).is_some()
    }

    /// Map `rel_path` to `id`, replacing any previous mapping.
    pub fn register_path(&mut self, rel_path: &str, id: TextureId) {
        assert!(!id.is_null(), "cannot register '{rel_path}' to the null texture");
        self.paths.insert(rel_path.to_string(), id);
    }

    /// Id registered for `rel_path`, if it still names a live texture.
    pub fn id_by_path(&self, rel_path: &str) -> Option<TextureId> {
        self.paths
            .get(rel_path)
            .copied()
            .filter(|id| self.contains(*id))
    }

    /// Texture registered for `rel_path`.
    pub fn get_by_path(&self, rel_path: &str) -> Option<&T> {
        self.id_by_path(rel_path).and_then(|id| self.pool.get(id))
    }

    /// Record the default textures. They stay registered for the cache's lifetime.
    ///
    /// # Panics
    /// If defaults were already set or either id is not live.
    pub fn set_defaults(&mut self, white: TextureId, error: TextureId) {
        assert!(
            self.white.is_null() && self.error.is_null(),
            "default textures already set"
        );
        assert!(
            self.contains(white) && self.contains(error),
            "default textures must be registered first"
        );
        assert_ne!(white, error, "white and error textures must differ");
        self.white = white;
        self.error = error;
    }

    pub fn white_id(&self) -> TextureId {
        self.white
    }

    pub fn error_id(&self) -> TextureId {
        self.error
    }

    /// Whether `id` is one of the default textures.
    pub fn is_default(&self, id: TextureId) -> bool {
        !id.is_null() && (id == self.white || id == self.error)
    }

    /// Hide `id` from lookups ahead of its destruction.
    ///
    /// Returns `false` for ids that are not live or name a default texture.
    pub fn retire(&mut self, id: TextureId) -> bool {
        if self.is_default(id) || !self.contains(id) {
            return false;
        }
        self.paths.retain(|_, mapped| *mapped != id);
        self.retired.insert(id);
        true
    }

    /// Take the texture out and release its index.
    pub fn remove(&mut self, id: TextureId) -> Option<T> {
        self.retired.remove(&id);
        self.paths.retain(|_, mapped| *mapped != id);
        if id == self.white {
            self.white = TextureId::NULL;
        }
        if id == self.error {
            self.error = TextureId::NULL;
        }
        self.pool.remove(id)
    }

    /// Live textures in index order.
    pub fn iter(&self) -> impl Iterator<Item = (TextureId, &T)> {
        self.pool
            .iter()
            .filter(|(id, _)| !self.retired.contains(id))
    }

    /// Remove every texture, retired ones included.
    pub fn drain(&mut self) -> Vec<T> {
        self.paths.clear();
        self.retired.clear();
        self.white = TextureId::NULL;
        self.error = TextureId::NULL;
        self.pool.drain()
    }
}

/// Create a device-local texture and fill mip 0 of its base layer with `pixels`.
///
/// Blocks on `immediate` until the copy has executed.
///
/// # Panics
/// If `pixels` is not exactly one tightly packed layer of `info`.
pub fn create_texture_with_pixels(
    gpu: &GpuContext,
    immediate: &ImmediateCommandQueue,
    info: &TextureCreateInfo,
    pixels: &[u8],
    name: &str,
) -> Result<Texture> {
    let size = format::image_size(info.format, info.extent);
    assert_eq!(
        pixels.len() as u64,
        size,
        "pixel data for texture '{name}' must be exactly {size} bytes"
    );

    let info = info.with_usage(info.usage | vk::ImageUsageFlags::TRANSFER_DST);
    let mut texture = Texture::new(gpu, &info, MemoryLocation::GpuOnly, name)?;

    let mut staging = match Buffer::new(
        gpu,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryPolicy::Staging,
        &format!("{name} staging"),
    ) {
        Ok(staging) => staging,
        Err(e) => {
            texture.cleanup(gpu.device(), &mut gpu.allocator().lock())?;
            return Err(e);
        }
    };
    staging.copy_data_to_buffer(pixels, 0);

    let uploaded = immediate.submit(gpu, |device, cmd| unsafe {
        texture.upload(device, cmd, &staging);
    });

    let mut allocator = gpu.allocator().lock();
    staging.cleanup(&mut allocator)?;
    if let Err(e) = uploaded {
        texture.cleanup(gpu.device(), &mut allocator)?;
        return Err(e);
    }
    Ok(texture)
}

/// Usage of the default textures.
pub const DEFAULT_TEXTURE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::SAMPLED.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw()
        | vk::ImageUsageFlags::TRANSFER_SRC.as_raw(),
);

/// Build the white and error textures, in that order.
pub fn create_default_textures(
    gpu: &GpuContext,
    immediate: &ImmediateCommandQueue,
) -> Result<(Texture, Texture)> {
    let white_info =
        TextureCreateInfo::new_2d(vk::Format::R8G8B8A8_UNORM, 1, 1).with_usage(DEFAULT_TEXTURE_USAGE);
    let mut white = create_texture_with_pixels(gpu, immediate, &white_info, &WHITE_PIXEL, "white")?;

    let error_info =
        TextureCreateInfo::new_2d(vk::Format::R8G8B8A8_UNORM, 2, 2).with_usage(DEFAULT_TEXTURE_USAGE);
    match create_texture_with_pixels(gpu, immediate, &error_info, &error_checker_pixels(), "error") {
        Ok(error) => Ok((white, error)),
        Err(e) => {
            white.cleanup(gpu.device(), &mut gpu.allocator().lock())?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct FakeTexture {
        name: &'static str,
        id: TextureId,
    }

    impl FakeTexture {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                id: TextureId::NULL,
            }
        }
    }

    impl BindlessSlot for FakeTexture {
        fn assign_bindless_id(&mut self, id: TextureId) {
            self.id = id;
        }
    }

    fn cache_with_defaults() -> TextureCache<FakeTexture> {
        let mut cache = TextureCache::new(8);
        let white = cache.insert(FakeTexture::new("white"));
        let error = cache.insert(FakeTexture::new("error"));
        cache.set_defaults(white, error);
        cache
    }

    #[test]
    fn insert_assigns_the_id_to_the_texture() {
        let mut cache = TextureCache::new(4);
        let id = cache.insert(FakeTexture::new("grass"));
        assert_eq!(cache.get(id).map(|t| t.id), Some(id));
        assert_eq!(id.index(), 0);
    }

    #[test]
    fn defaults_are_stable_and_distinct() {
        let mut cache = cache_with_defaults();
        let white = cache.white_id();
        let error = cache.error_id();
        assert!(!white.is_null());
        assert!(!error.is_null());
        assert_ne!(white, error);

        for i in 0..4 {
            let id = cache.insert(FakeTexture::new("tmp"));
            if i % 2 == 0 {
                assert!(cache.retire(id));
                cache.remove(id);
            }
        }
        assert!(!cache.retire(white));
        assert!(!cache.retire(error));
        assert_eq!(cache.white_id(), white);
        assert_eq!(cache.error_id(), error);
        assert_eq!(cache.get(white).map(|t| t.name), Some("white"));
    }

    #[test]
    #[should_panic(expected = "already set")]
    fn defaults_are_set_once() {
        let mut cache = cache_with_defaults();
        let (white, error) = (cache.white_id(), cache.error_id());
        cache.set_defaults(white, error);
    }

    #[test]
    fn retired_texture_keeps_its_index_until_removed() {
        let mut cache = cache_with_defaults();
        let doomed = cache.insert(FakeTexture::new("doomed"));
        assert!(cache.retire(doomed));
        assert!(cache.get(doomed).is_none());
        assert!(!cache.retire(doomed));

        let other = cache.insert(FakeTexture::new("other"));
        assert_ne!(other.index(), doomed.index());

        let removed = cache.remove(doomed);
        assert_eq!(removed.map(|t| t.name), Some("doomed"));

        let reused = cache.insert(FakeTexture::new("reused"));
        assert_eq!(reused.index(), doomed.index());
        assert_ne!(reused, doomed);
        assert!(cache.get(doomed).is_none());
    }

    #[test]
    fn live_ids_never_collide() {
        let mut cache = TextureCache::new(64);
        let white = cache.insert(FakeTexture::new("white"));
        let error = cache.insert(FakeTexture::new("error"));
        cache.set_defaults(white, error);
        let mut live = vec![white, error];
        for step in 0..40 {
            if step % 3 == 2 {
                let id = live.remove(2);
                assert!(cache.retire(id));
                cache.remove(id);
            } else {
                live.push(cache.insert(FakeTexture::new("t")));
            }
            let mut indices: Vec<_> = live.iter().map(|id| id.index()).collect();
            indices.sort_unstable();
            indices.dedup();
            assert_eq!(indices.len(), live.len());
        }
    }

    #[test]
    fn path_lookup_follows_texture_lifetime() {
        let mut cache = cache_with_defaults();
        let id = cache.insert(FakeTexture::new("tiles"));
        cache.register_path("tiles/forest.png", id);
        assert_eq!(cache.id_by_path("tiles/forest.png"), Some(id));
        assert_eq!(
            cache.get_by_path("tiles/forest.png").map(|t| t.name),
            Some("tiles")
        );
        assert!(cache.get_by_path("tiles/desert.png").is_none());

        cache.retire(id);
        assert!(cache.get_by_path("tiles/forest.png").is_none());
    }

    #[test]
    fn full_cache_returns_the_texture() {
        let mut cache = TextureCache::new(1);
        cache.insert(FakeTexture::new("only"));
        let rejected = cache.try_insert(FakeTexture::new("extra"));
        assert_eq!(rejected.err().map(|t| t.name), Some("extra"));
    }

    #[test]
    fn drain_includes_retired() {
        let mut cache = cache_with_defaults();
        let id = cache.insert(FakeTexture::new("a"));
        cache.retire(id);
        assert_eq!(cache.iter().count(), 2);
        assert_eq!(cache.drain().len(), 3);
        assert!(cache.white_id().is_null());
        assert!(cache.is_empty());
    }

    #[test]
    fn error_checker_layout() {
        let pixels = error_checker_pixels();
        assert_eq!(&pixels[0..4], &BLACK_PIXEL);
        assert_eq!(&pixels[4..8], &MAGENTA_PIXEL);
        assert_eq!(&pixels[8..12], &MAGENTA_PIXEL);
        assert_eq!(&pixels[12..16], &BLACK_PIXEL);
    }
}
