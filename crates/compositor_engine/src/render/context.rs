//! Shared render state
//!
//! The backend, the three resource caches and the frame counter travel
//! together: every operation that may allocate or retire a resource needs
//! all of them, so they are passed around as one `&mut RenderContext`.

use std::time::Instant;

use crate::config::EngineConfig;
use crate::render::backend::GpuBackend;
use crate::render::resources::{BindingTablePool, PipelineCache, TextureCache};

/// Backend, caches and the monotonic frame counter
#[derive(Debug)]
pub struct RenderContext<B: GpuBackend> {
    pub(crate) backend: B,
    pub(crate) textures: TextureCache<B>,
    pub(crate) pipelines: PipelineCache<B>,
    pub(crate) tables: BindingTablePool<B>,
    pub(crate) frame_tag: u64,
    pub(crate) completed_frame: Option<u64>,
    pub(crate) frame_time: Instant,
    pub(crate) ring_size: u64,
}

impl<B: GpuBackend> RenderContext<B> {
    /// Wrap a backend with empty caches
    pub fn new(backend: B, config: &EngineConfig) -> Self {
        let ring_size = backend.image_count() as u64;
        Self {
            backend,
            textures: TextureCache::new(config.texture_idle_threshold()),
            pipelines: PipelineCache::new(),
            tables: BindingTablePool::new(config.arena),
            frame_tag: 0,
            completed_frame: None,
            frame_time: Instant::now(),
            ring_size,
        }
    }

    /// The GPU backend
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable GPU backend
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Texture cache
    pub const fn textures(&self) -> &TextureCache<B> {
        &self.textures
    }

    /// Pipeline cache
    pub const fn pipelines(&self) -> &PipelineCache<B> {
        &self.pipelines
    }

    /// Binding table pool
    pub const fn tables(&self) -> &BindingTablePool<B> {
        &self.tables
    }

    /// Tag of the frame currently being recorded
    pub const fn frame_tag(&self) -> u64 {
        self.frame_tag
    }

    /// Newest frame known to have finished on the GPU
    ///
    /// Every earlier frame has finished too.
    pub const fn completed_frame(&self) -> Option<u64> {
        self.completed_frame
    }

    /// Number of frames in flight
    pub const fn ring_size(&self) -> u64 {
        self.ring_size
    }

    /// Time the current frame started recording
    pub const fn frame_time(&self) -> Instant {
        self.frame_time
    }

    /// Destroy every cached resource; only valid once the device is idle
    pub(crate) fn destroy_caches(&mut self) {
        self.textures.destroy_all(&mut self.backend);
        self.tables.destroy_all(&mut self.backend);
        self.pipelines.destroy_all(&mut self.backend);
    }

    #[cfg(test)]
    pub(crate) fn advance_frames(&mut self, frames: u64) {
        self.frame_tag += frames;
    }
}
