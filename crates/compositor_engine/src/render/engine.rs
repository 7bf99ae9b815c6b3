//! Render engine
//!
//! Owns the render context, the frame pacer and every registered surface.
//! The window-system layer creates, resizes, damages and destroys surfaces
//! through it; the container tree hands it the ordered list of items to
//! draw once per frame.

use std::path::Path;

use slotmap::SlotMap;

use crate::config::{read_spirv, Config, EngineConfig, ShaderManifest, ShaderSet};
use crate::foundation::geometry::{Extent, Rect};
use crate::render::backend::{GpuBackend, ShaderSource};
use crate::render::context::RenderContext;
use crate::render::error::{RenderError, RenderResult};
use crate::render::frame_pacer::{FramePacer, FrameStatus};
use crate::render::resources::{PipelineId, ShaderId};
use crate::render::surface::{ClientFrame, ContentSource, SurfaceId, SurfaceKind};
use crate::render::types::DrawFlags;

/// One surface to draw, in back-to-front order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderItem {
    /// Surface to draw
    pub surface: SurfaceId,
    /// Placement on the output in pixels
    pub rect: Rect,
    /// Border width passed to the shaders
    pub border_width: [f32; 2],
    /// Whether the surface holds the input focus
    pub focused: bool,
}

impl RenderItem {
    /// Unfocused item without border
    pub const fn new(surface: SurfaceId, rect: Rect) -> Self {
        Self {
            surface,
            rect,
            border_width: [0.0, 0.0],
            focused: false,
        }
    }

    /// Set the border width
    pub const fn with_border(mut self, border_width: [f32; 2]) -> Self {
        self.border_width = border_width;
        self
    }

    /// Set the focus flag
    pub const fn with_focus(mut self, focused: bool) -> Self {
        self.focused = focused;
        self
    }
}

/// The compositor render engine
#[derive(Debug)]
pub struct RenderEngine<B: GpuBackend> {
    config: EngineConfig,
    pacer: FramePacer<B>,
    surfaces: SlotMap<SurfaceId, ClientFrame<B>>,
    update_queue: Vec<SurfaceId>,
    background: Option<SurfaceId>,
    shut_down: bool,
    ctx: RenderContext<B>,
}

impl<B: GpuBackend> RenderEngine<B> {
    /// Create an engine on top of a backend
    ///
    /// Loads the configured shader manifest, if any.
    pub fn new(mut backend: B, config: EngineConfig) -> RenderResult<Self> {
        config.validate()?;
        let pacer = FramePacer::new(&mut backend, config.sync_strategy)?;
        let ctx = RenderContext::new(backend, &config);
        log::info!(
            "Render engine: {} frames in flight, {:?}, textures idle after {:?}",
            ctx.ring_size,
            config.sync_strategy,
            config.texture_idle_threshold()
        );

        let manifest = config.shader_manifest.clone();
        let mut engine = Self {
            config,
            pacer,
            surfaces: SlotMap::with_key(),
            update_queue: Vec::new(),
            background: None,
            shut_down: false,
            ctx,
        };
        if let Some(path) = manifest {
            engine.load_shader_manifest(path)?;
        }
        Ok(engine)
    }

    /// Engine configuration
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Render context with the backend and caches
    pub const fn context(&self) -> &RenderContext<B> {
        &self.ctx
    }

    /// The GPU backend
    pub const fn backend(&self) -> &B {
        &self.ctx.backend
    }

    /// Mutable GPU backend
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.ctx.backend
    }

    /// Frame pacer
    pub const fn pacer(&self) -> &FramePacer<B> {
        &self.pacer
    }

    /// Tag of the next frame to be recorded
    pub const fn frame_tag(&self) -> u64 {
        self.ctx.frame_tag
    }

    /// Number of frames in flight
    pub const fn ring_size(&self) -> u64 {
        self.ctx.ring_size
    }

    /// Semaphores the capture context signals, one per ring slot
    pub fn capture_semaphores(&self) -> impl Iterator<Item = &B::Semaphore> {
        self.pacer.slots().iter().map(|slot| slot.capture_ready())
    }

    /// Register a compiled shader stage
    pub fn add_shader(&mut self, source: &ShaderSource<'_>) -> RenderResult<ShaderId> {
        self.ctx.pipelines.add_shader(&mut self.ctx.backend, source)
    }

    /// Register every stage listed in a shader manifest
    pub fn load_shader_manifest(&mut self, path: impl AsRef<Path>) -> RenderResult<usize> {
        let path = path.as_ref();
        let manifest = ShaderManifest::load_from_file(path)?;
        for entry in &manifest.shaders {
            let code = read_spirv(&ShaderManifest::resolve(path, entry))?;
            self.add_shader(&ShaderSource {
                name: &entry.name,
                stage: entry.stage,
                code: &code,
                bindings: &entry.bindings,
            })?;
        }
        log::info!("Loaded {} shaders from {}", manifest.shaders.len(), path.display());
        Ok(manifest.shaders.len())
    }

    /// Get or build the pipeline for a shader set
    pub fn load_pipeline(&mut self, shaders: &ShaderSet) -> RenderResult<PipelineId> {
        self.ctx.pipelines.load(&mut self.ctx.backend, shaders.names())
    }

    /// Register a surface
    ///
    /// `shaders` defaults to the configured default set. The surface is
    /// queued for a full content update.
    pub fn create_surface(&mut self, kind: SurfaceKind, extent: Extent, shaders: Option<&ShaderSet>) -> RenderResult<SurfaceId> {
        let shaders = shaders.unwrap_or(&self.config.default_shaders).clone();
        let pipeline = self.load_pipeline(&shaders)?;
        let frame = ClientFrame::new(&mut self.ctx, kind, extent, pipeline)?;
        let id = self.surfaces.insert(frame);
        self.update_queue.push(id);
        log::debug!("Created surface {:?} ({:?}, {}x{})", id, kind, extent.width, extent.height);
        Ok(id)
    }

    /// Register a client window drawn with the configured frame shaders
    pub fn create_framed_surface(&mut self, window: u32, extent: Extent) -> RenderResult<SurfaceId> {
        let shaders = self.config.frame_shaders.clone();
        self.create_surface(SurfaceKind::Window { window }, extent, Some(&shaders))
    }

    /// Unregister a surface, retiring its texture and binding tables
    pub fn destroy_surface(&mut self, id: SurfaceId) -> RenderResult<()> {
        let frame = self.surfaces.remove(id).ok_or_else(|| unknown(id))?;
        self.update_queue.retain(|queued| *queued != id);
        if self.background == Some(id) {
            self.background = None;
        }
        frame.destroy(&mut self.ctx);
        log::debug!("Destroyed surface {:?} at frame {}", id, self.ctx.frame_tag);
        Ok(())
    }

    /// Resize a surface
    pub fn adjust_surface(&mut self, id: SurfaceId, extent: Extent) -> RenderResult<()> {
        let frame = self.surfaces.get_mut(id).ok_or_else(|| unknown(id))?;
        let result = frame.adjust_surface(&mut self.ctx, extent);
        enqueue(&mut self.update_queue, id);
        result
    }

    /// Record damage on a surface
    ///
    /// Returns `false` if the rectangle is outside the surface's current
    /// bounds, which happens when damage races a shrink; it is dropped.
    pub fn notify_damage(&mut self, id: SurfaceId, rect: Rect) -> RenderResult<bool> {
        let frame = self.surfaces.get_mut(id).ok_or_else(|| unknown(id))?;
        if !frame.add_damage(rect) {
            log::debug!("Discarding stale damage {:?} on surface {:?}", rect, id);
            return Ok(false);
        }
        enqueue(&mut self.update_queue, id);
        Ok(true)
    }

    /// Select the shaders used to draw a surface
    pub fn set_shaders(&mut self, id: SurfaceId, shaders: &ShaderSet) -> RenderResult<()> {
        if !self.surfaces.contains_key(id) {
            return Err(unknown(id));
        }
        let pipeline = self.load_pipeline(shaders)?;
        self.assign_pipeline(id, pipeline)
    }

    /// Assign an already loaded pipeline to a surface
    ///
    /// Also the way to retry after a binding table allocation failure.
    pub fn assign_pipeline(&mut self, id: SurfaceId, pipeline: PipelineId) -> RenderResult<()> {
        let frame = self.surfaces.get_mut(id).ok_or_else(|| unknown(id))?;
        frame.set_pipeline(&mut self.ctx, pipeline)
    }

    /// Set per-surface shading flags, OR'd with the focus bit at draw time
    pub fn set_user_flags(&mut self, id: SurfaceId, flags: u32) -> RenderResult<()> {
        let frame = self.surfaces.get_mut(id).ok_or_else(|| unknown(id))?;
        frame.set_user_flags(flags);
        Ok(())
    }

    /// Replace the background with a pixmap of `extent`
    ///
    /// The previous background goes through retirement like any surface.
    pub fn set_background(&mut self, pixmap: u32, extent: Extent) -> RenderResult<SurfaceId> {
        let id = self.create_surface(SurfaceKind::Background { pixmap }, extent, None)?;
        if let Some(previous) = self.background.replace(id) {
            self.destroy_surface(previous)?;
        }
        Ok(id)
    }

    /// Current background surface
    pub const fn background(&self) -> Option<SurfaceId> {
        self.background
    }

    /// Render state of a surface
    pub fn surface(&self, id: SurfaceId) -> Option<&ClientFrame<B>> {
        self.surfaces.get(id)
    }

    /// Number of registered surfaces
    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Surfaces waiting for a content update
    pub fn pending_updates(&self) -> &[SurfaceId] {
        &self.update_queue
    }

    /// Run one frame
    ///
    /// Returns [`FrameStatus::Deferred`] without touching anything when the
    /// ring slot is still in flight. Surfaces without binding tables are
    /// skipped; unknown surfaces in `items` are ignored.
    ///
    /// An error leaves the engine usable: the frame is abandoned, surfaces
    /// whose uploads never reached the GPU are queued for a full refresh and
    /// the next call starts over on the same slot.
    pub fn render_frame(&mut self, items: &[RenderItem], source: &mut dyn ContentSource) -> RenderResult<FrameStatus> {
        if self.shut_down {
            return Err(RenderError::invalid("render_frame after shutdown"));
        }
        let Some(image_index) = self.pacer.begin_frame(&mut self.ctx)? else {
            return Ok(FrameStatus::Deferred);
        };

        let mut uploaded = Vec::new();
        if let Err(err) = self.record_frame(items, source, image_index, &mut uploaded) {
            log::warn!("Recording frame {} failed: {}", self.ctx.frame_tag, err);
            self.pacer.abandon_or_log(&mut self.ctx);
            self.redo_uploads(&uploaded);
            return Err(err);
        }

        let frame_tag = self.ctx.frame_tag;
        let status = self.pacer.submit_and_present(&mut self.ctx, image_index);
        if status.is_err() && self.ctx.frame_tag == frame_tag {
            self.redo_uploads(&uploaded);
        }
        status
    }

    fn record_frame(
        &mut self,
        items: &[RenderItem],
        source: &mut dyn ContentSource,
        image_index: u32,
        uploaded: &mut Vec<SurfaceId>,
    ) -> RenderResult<()> {
        let commands = self.pacer.current_slot().commands();

        // Capture stage: damaged client content into staging
        self.ctx.backend.begin_commands(commands.capture)?;
        let mut queue = std::mem::take(&mut self.update_queue).into_iter();
        while let Some(id) = queue.next() {
            if Some(id) == self.background {
                continue;
            }
            let Some(frame) = self.surfaces.get_mut(id) else {
                continue;
            };
            match frame.update_contents(id, &mut self.ctx, commands.capture, source) {
                Ok(written) => {
                    if written {
                        uploaded.push(id);
                    }
                    if frame.has_pending_update() {
                        enqueue(&mut self.update_queue, id);
                    }
                }
                Err(err) => {
                    // The failing surface and everything behind it stay queued
                    for pending in std::iter::once(id).chain(queue.by_ref()) {
                        enqueue(&mut self.update_queue, pending);
                    }
                    return Err(err);
                }
            }
        }
        self.ctx.backend.end_commands(commands.capture)?;

        // Copy stage: background
        self.ctx.backend.begin_commands(commands.copy)?;
        if let Some(id) = self.background {
            if let Some(frame) = self.surfaces.get_mut(id) {
                if frame.update_contents(id, &mut self.ctx, commands.copy, source)? {
                    uploaded.push(id);
                }
            }
        }
        self.ctx.backend.end_commands(commands.copy)?;

        // Draw stage
        self.ctx.backend.begin_commands(commands.draw)?;
        self.ctx
            .backend
            .begin_output_pass(commands.draw, image_index, self.config.clear_color);

        let output = self.ctx.backend.output_extent().full_rect();
        if let Some(id) = self.background {
            self.ctx.backend.set_scissor(commands.draw, output);
            self.draw_surface(id, commands.draw, output, [0.0, 0.0], DrawFlags::empty())?;
        }
        for item in items {
            let Some(frame) = self.surfaces.get(item.surface) else {
                log::debug!("Skipping unknown surface {:?}", item.surface);
                continue;
            };
            let flags = DrawFlags::for_surface(item.focused, frame.user_flags());
            self.draw_surface(item.surface, commands.draw, item.rect, item.border_width, flags)?;
        }

        self.ctx.backend.end_output_pass(commands.draw);
        self.ctx.backend.end_commands(commands.draw)
    }

    // Uploads recorded into a frame that never ran must be redone in full
    fn redo_uploads(&mut self, uploaded: &[SurfaceId]) {
        for &id in uploaded {
            let Some(frame) = self.surfaces.get_mut(id) else {
                continue;
            };
            frame.request_full_update();
            if Some(id) != self.background {
                enqueue(&mut self.update_queue, id);
            }
        }
    }

    fn draw_surface(
        &mut self,
        id: SurfaceId,
        commands: B::CommandList,
        rect: Rect,
        border_width: [f32; 2],
        flags: DrawFlags,
    ) -> RenderResult<()> {
        let Some(frame) = self.surfaces.get_mut(id) else {
            return Ok(());
        };
        if !frame.is_drawable() {
            log::trace!("Surface {:?} has no binding tables, skipping draw", id);
            return Ok(());
        }
        let pipeline = self.ctx.pipelines.pipeline(frame.pipeline())?.raw();
        self.ctx.backend.bind_pipeline(commands, pipeline);
        frame.draw(&mut self.ctx, commands, rect, border_width, flags)
    }

    /// Wait for the device and destroy every GPU resource
    ///
    /// The engine is unusable afterwards. Also run on drop.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.ctx.backend.wait_idle()?;

        let surfaces: Vec<_> = self.surfaces.drain().map(|(_, frame)| frame).collect();
        for frame in surfaces {
            frame.destroy(&mut self.ctx);
        }
        self.update_queue.clear();
        self.background = None;

        self.ctx.destroy_caches();
        self.pacer.destroy(&mut self.ctx.backend);
        log::info!("Render engine shut down at frame {}", self.ctx.frame_tag);
        Ok(())
    }
}

impl<B: GpuBackend> Drop for RenderEngine<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Render engine shutdown failed: {}", e);
        }
    }
}

fn unknown(id: SurfaceId) -> RenderError {
    RenderError::UnknownSurface(format!("{id:?}"))
}

fn enqueue(queue: &mut Vec<SurfaceId>, id: SurfaceId) {
    if !queue.contains(&id) {
        queue.push(id);
    }
}
