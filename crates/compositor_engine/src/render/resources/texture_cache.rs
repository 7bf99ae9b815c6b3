//! Texture cache
//!
//! Window textures are pooled by exact size once their surface lets go of
//! them. Resized and remapped windows usually come back at a size seen
//! before, so a pooled texture is handed out again without a new
//! allocation. Pooled textures are destroyed once they are both out of the
//! frames-in-flight window and idle for a wall-clock threshold.

use std::time::{Duration, Instant};

use crate::foundation::geometry::Extent;
use crate::render::backend::GpuBackend;
use crate::render::error::RenderResult;
use crate::render::resources::retirement::RetirementList;

/// Identity of one texture allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl TextureId {
    /// Raw id value
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Texture owned by a surface or parked in the cache
#[derive(Debug)]
pub struct Texture<B: GpuBackend> {
    id: TextureId,
    extent: Extent,
    raw: B::Texture,
    last_upload: Option<u64>,
}

impl<B: GpuBackend> Texture<B> {
    /// Allocation identity, stable across reuse
    pub const fn id(&self) -> TextureId {
        self.id
    }

    /// Size in pixels
    pub const fn extent(&self) -> Extent {
        self.extent
    }

    /// Backend texture
    pub const fn raw(&self) -> &B::Texture {
        &self.raw
    }

    /// Mutable backend texture
    pub fn raw_mut(&mut self) -> &mut B::Texture {
        &mut self.raw
    }

    /// Frame that last recorded an upload into this texture
    ///
    /// Survives pooling, so a reacquired texture still knows when its
    /// staging data was last read.
    pub const fn last_upload(&self) -> Option<u64> {
        self.last_upload
    }

    /// True if the host may overwrite the staging data while recording `frame_tag`
    ///
    /// That holds when no upload was ever recorded, when the last one belongs
    /// to the frame still being recorded, or when its frame has completed.
    pub fn staging_writable(&self, frame_tag: u64, completed: Option<u64>) -> bool {
        match self.last_upload {
            None => true,
            Some(tag) => tag == frame_tag || completed.is_some_and(|done| tag <= done),
        }
    }

    pub(crate) fn mark_uploaded(&mut self, frame_tag: u64) {
        self.last_upload = Some(frame_tag);
    }
}

/// Exact-size texture pool with deferred destruction
#[derive(Debug)]
pub struct TextureCache<B: GpuBackend> {
    pool: RetirementList<Texture<B>>,
    idle_threshold: Duration,
    next_id: u64,
}

impl<B: GpuBackend> TextureCache<B> {
    /// Create an empty cache
    pub const fn new(idle_threshold: Duration) -> Self {
        Self {
            pool: RetirementList::new(),
            idle_threshold,
            next_id: 0,
        }
    }

    /// Get a texture of exactly `extent`, reusing a pooled one if possible
    pub fn acquire(&mut self, backend: &mut B, extent: Extent) -> RenderResult<Texture<B>> {
        if let Some(texture) = self.pool.take_first(|texture| texture.extent == extent) {
            log::trace!("Reusing pooled texture {:?} ({}x{})", texture.id, extent.width, extent.height);
            return Ok(texture);
        }

        let raw = backend.create_texture(extent)?;
        let id = TextureId(self.next_id);
        self.next_id += 1;
        log::debug!("Allocated texture {:?} ({}x{})", id, extent.width, extent.height);

        Ok(Texture {
            id,
            extent,
            raw,
            last_upload: None,
        })
    }

    /// Pool a texture no longer owned by any surface
    pub fn release(&mut self, texture: Texture<B>, frame_tag: u64, now: Instant) {
        self.pool.push(texture, frame_tag, Some(now));
    }

    /// Destroy pooled textures past both the frame deadline and the idle threshold
    pub fn sweep(&mut self, backend: &mut B, frame_tag: u64, ring_size: u64, now: Instant) -> usize {
        let expired = self
            .pool
            .drain_expired(frame_tag, ring_size, now, Some(self.idle_threshold));
        let count = expired.len();
        for entry in expired {
            log::debug!(
                "Destroying idle texture {:?} released at frame {}",
                entry.resource.id,
                entry.release_tag
            );
            backend.destroy_texture(entry.resource.raw);
        }
        count
    }

    /// Number of pooled textures
    pub fn pooled_count(&self) -> usize {
        self.pool.len()
    }

    /// Ids of pooled textures
    pub fn pooled_ids(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.pool.iter().map(|entry| entry.resource.id)
    }

    /// Idle threshold applied by [`sweep`](Self::sweep)
    pub const fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    /// Destroy every pooled texture; only valid once the device is idle
    pub fn destroy_all(&mut self, backend: &mut B) {
        for entry in self.pool.drain_all() {
            backend.destroy_texture(entry.resource.raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessBackend, HeadlessConfig};

    fn setup(idle: Duration) -> (HeadlessBackend, TextureCache<HeadlessBackend>) {
        (HeadlessBackend::new(HeadlessConfig::default()), TextureCache::new(idle))
    }

    #[test]
    fn test_cache_hit_returns_same_texture() {
        let (mut backend, mut cache) = setup(Duration::ZERO);
        let texture = cache.acquire(&mut backend, Extent::new(64, 64)).unwrap();
        let id = texture.id();
        cache.release(texture, 5, Instant::now());

        let again = cache.acquire(&mut backend, Extent::new(64, 64)).unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(backend.stats().textures_created, 1);
        assert_eq!(cache.pooled_count(), 0);
    }

    #[test]
    fn test_pooled_texture_keeps_upload_frame() {
        let (mut backend, mut cache) = setup(Duration::ZERO);
        let mut texture = cache.acquire(&mut backend, Extent::new(16, 16)).unwrap();
        assert!(texture.staging_writable(0, None));

        texture.mark_uploaded(4);
        assert!(texture.staging_writable(4, None));
        assert!(!texture.staging_writable(5, Some(3)));
        cache.release(texture, 5, Instant::now());

        let again = cache.acquire(&mut backend, Extent::new(16, 16)).unwrap();
        assert_eq!(again.last_upload(), Some(4));
        assert!(!again.staging_writable(6, Some(3)));
        assert!(again.staging_writable(6, Some(4)));
    }

    #[test]
    fn test_cache_miss_on_different_size() {
        let (mut backend, mut cache) = setup(Duration::ZERO);
        let texture = cache.acquire(&mut backend, Extent::new(64, 64)).unwrap();
        let id = texture.id();
        cache.release(texture, 0, Instant::now());

        let other = cache.acquire(&mut backend, Extent::new(64, 65)).unwrap();
        assert_ne!(other.id(), id);
        assert_eq!(backend.stats().textures_created, 2);
        assert_eq!(cache.pooled_count(), 1);
    }

    #[test]
    fn test_sweep_needs_frames_and_idle_time() {
        let (mut backend, mut cache) = setup(Duration::from_secs(5));
        let released = Instant::now();
        let texture = cache.acquire(&mut backend, Extent::new(8, 8)).unwrap();
        cache.release(texture, 10, released);

        // old enough in frames, too recent in time
        assert_eq!(cache.sweep(&mut backend, 20, 3, released + Duration::from_secs(1)), 0);
        // idle long enough, still inside the frame window
        assert_eq!(cache.sweep(&mut backend, 13, 3, released + Duration::from_secs(10)), 0);
        // both satisfied
        assert_eq!(cache.sweep(&mut backend, 14, 3, released + Duration::from_secs(10)), 1);
        assert_eq!(backend.stats().textures_destroyed, 1);
        assert_eq!(cache.pooled_count(), 0);
    }
}
