//! Client frames
//!
//! A [`ClientFrame`] couples one drawable surface to its texture, its
//! pipeline and the binding tables pointing the pipeline at the texture.
//! The frame pacer asks it once per frame to refresh damaged content and to
//! record its draw.

use std::time::Instant;

use rand::Rng;

use crate::foundation::geometry::{Extent, Rect};
use crate::render::backend::{GpuBackend, TableWrite};
use crate::render::context::RenderContext;
use crate::render::error::{RenderError, RenderResult};
use crate::render::resources::{is_reusable, BindingTableArray, BindingTablePool, PipelineId, Texture};
use crate::render::types::{BindingKind, CapturedPixels, DrawFlags, PushConstants, STAGE_COUNT};

slotmap::new_key_type! {
    /// Handle of a surface registered with the engine
    pub struct SurfaceId;
}

/// What a surface shows and where its pixels come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// Client window content captured from the window system
    Window {
        /// Window system id of the client window
        window: u32,
    },
    /// Root background pixmap, refreshed only on full updates
    Background {
        /// Window system id of the pixmap
        pixmap: u32,
    },
    /// Placeholder filled with a random color
    Debug,
}

/// Request for surface pixels passed to a [`ContentSource`]
#[derive(Debug, Clone, Copy)]
pub struct CaptureRequest<'a> {
    /// Surface being refreshed
    pub surface: SurfaceId,
    /// Kind of the surface
    pub kind: SurfaceKind,
    /// Current texture extent; the returned pixels must match it
    pub extent: Extent,
    /// Regions that will be uploaded
    pub regions: &'a [Rect],
}

/// Supplier of raw surface content, implemented by the window-system layer
pub trait ContentSource {
    /// Capture the current pixels of a surface
    ///
    /// Returning `None` leaves the surface's damage pending.
    fn capture(&mut self, request: &CaptureRequest<'_>) -> Option<CapturedPixels>;
}

/// Binding tables of one surface for one pipeline
#[derive(Debug)]
pub struct BindingTableSet<B: GpuBackend> {
    pipeline: PipelineId,
    tables: [Option<BindingTableArray<B>>; STAGE_COUNT],
    fence_tag: u64,
}

impl<B: GpuBackend> BindingTableSet<B> {
    /// Pipeline the tables were laid out for
    pub const fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    /// Frame tag of the last submission referencing the tables
    pub const fn fence_tag(&self) -> u64 {
        self.fence_tag
    }

    /// Tables of one stage, `None` for stages without bindings
    pub fn stage_tables(&self, stage: usize) -> Option<&[B::BindingTable]> {
        self.tables.get(stage)?.as_ref().map(BindingTableArray::tables)
    }

    fn retire(self, pool: &mut BindingTablePool<B>, frame_tag: u64) {
        for array in self.tables.into_iter().flatten() {
            pool.release(array, frame_tag);
        }
    }
}

/// Render state of one drawable surface
#[derive(Debug)]
pub struct ClientFrame<B: GpuBackend> {
    kind: SurfaceKind,
    texture: Texture<B>,
    pipeline: PipelineId,
    binding_sets: Vec<BindingTableSet<B>>,
    active: Option<usize>,
    damage: Vec<Rect>,
    full_update: bool,
    user_flags: u32,
    created_at: Instant,
}

impl<B: GpuBackend> ClientFrame<B> {
    /// Create the render state for a newly mapped surface
    ///
    /// Binding table exhaustion leaves the frame without an active set; it
    /// is then skipped at draw time until a later assignment succeeds.
    pub fn new(ctx: &mut RenderContext<B>, kind: SurfaceKind, extent: Extent, pipeline: PipelineId) -> RenderResult<Self> {
        let texture = ctx.textures.acquire(&mut ctx.backend, extent.at_least_one())?;
        let mut frame = Self {
            kind,
            texture,
            pipeline,
            binding_sets: Vec::new(),
            active: None,
            damage: Vec::new(),
            full_update: true,
            user_flags: 0,
            created_at: Instant::now(),
        };

        match frame.set_pipeline(ctx, pipeline) {
            Ok(()) => Ok(frame),
            Err(e) if e.is_surface_local() => {
                log::warn!("Surface {:?} created without binding tables: {}", kind, e);
                Ok(frame)
            }
            Err(e) => {
                frame.destroy(ctx);
                Err(e)
            }
        }
    }

    /// Assign a pipeline and point its tables at the current texture
    pub fn set_pipeline(&mut self, ctx: &mut RenderContext<B>, pipeline: PipelineId) -> RenderResult<()> {
        self.assign_pipeline(ctx, pipeline)?;
        self.update_bindings(ctx)
    }

    /// Make a binding table set for `pipeline` active
    ///
    /// A set already held for the pipeline is reused once the last frame
    /// that referenced it is out of flight. Otherwise a fresh set is
    /// allocated and the stale one retired, keeping one set per pipeline.
    pub fn assign_pipeline(&mut self, ctx: &mut RenderContext<B>, pipeline: PipelineId) -> RenderResult<()> {
        let modules = ctx.pipelines.stage_modules(pipeline)?;
        self.pipeline = pipeline;
        self.active = None;

        if let Some(index) = self.binding_sets.iter().position(|set| {
            set.pipeline == pipeline && is_reusable(set.fence_tag, ctx.frame_tag, ctx.ring_size)
        }) {
            log::trace!("Reusing binding tables for {:?} (last used at frame {})", pipeline, self.binding_sets[index].fence_tag);
            self.active = Some(index);
            return Ok(());
        }

        let mut tables: [Option<BindingTableArray<B>>; STAGE_COUNT] = Default::default();
        for (slot, module) in modules.iter().enumerate() {
            if module.set_count() == 0 {
                continue;
            }
            match ctx.tables.allocate(&mut ctx.backend, module.set_layouts()) {
                Ok(array) => tables[slot] = Some(array),
                Err(e) => {
                    for array in tables.into_iter().flatten() {
                        ctx.tables.release(array, ctx.frame_tag);
                    }
                    return Err(e);
                }
            }
        }

        if let Some(stale) = self.binding_sets.iter().position(|set| set.pipeline == pipeline) {
            self.binding_sets.swap_remove(stale).retire(&mut ctx.tables, ctx.frame_tag);
        }
        self.binding_sets.push(BindingTableSet {
            pipeline,
            tables,
            fence_tag: ctx.frame_tag,
        });
        self.active = Some(self.binding_sets.len() - 1);
        Ok(())
    }

    /// Write the content image and point sampler into the active set
    pub fn update_bindings(&self, ctx: &mut RenderContext<B>) -> RenderResult<()> {
        let set = self.active_set().ok_or_else(|| RenderError::invalid("no binding tables assigned"))?;
        let modules = ctx.pipelines.stage_modules(set.pipeline)?;

        let mut writes = Vec::new();
        for (module, tables) in modules.iter().zip(&set.tables) {
            let Some(tables) = tables else {
                continue;
            };
            let slots = module
                .content_binding()
                .map(|decl| (decl, BindingKind::SampledImage))
                .into_iter()
                .chain(module.sampler_binding().map(|decl| (decl, BindingKind::Sampler)));
            for (decl, kind) in slots {
                if let Some(&table) = tables.tables().get(decl.set as usize) {
                    writes.push(TableWrite {
                        table,
                        binding: decl.binding,
                        kind,
                    });
                }
            }
        }

        ctx.backend.write_content_bindings(self.texture.raw(), &writes);
        Ok(())
    }

    /// Resize the surface: new texture, full redraw, fresh binding tables
    pub fn adjust_surface(&mut self, ctx: &mut RenderContext<B>, extent: Extent) -> RenderResult<()> {
        let texture = ctx.textures.acquire(&mut ctx.backend, extent.at_least_one())?;
        let old = std::mem::replace(&mut self.texture, texture);
        ctx.textures.release(old, ctx.frame_tag, Instant::now());

        self.full_update = true;
        self.damage.clear();

        // Every set still points at the old texture
        self.active = None;
        for set in self.binding_sets.drain(..) {
            set.retire(&mut ctx.tables, ctx.frame_tag);
        }
        self.set_pipeline(ctx, self.pipeline)
    }

    /// Record damage; rectangles outside the current texture are stale and dropped
    ///
    /// Backgrounds only refresh on full updates and never take damage.
    pub fn add_damage(&mut self, rect: Rect) -> bool {
        if matches!(self.kind, SurfaceKind::Background { .. })
            || rect.is_empty()
            || !rect.fits_within(self.texture.extent())
        {
            return false;
        }
        self.damage.push(rect);
        true
    }

    /// Force the whole surface to be refreshed
    pub fn request_full_update(&mut self) {
        self.full_update = true;
    }

    /// True if damage or a full update request is waiting to be uploaded
    pub fn has_pending_update(&self) -> bool {
        match self.kind {
            SurfaceKind::Background { .. } => self.full_update,
            SurfaceKind::Window { .. } | SurfaceKind::Debug => self.full_update || !self.damage.is_empty(),
        }
    }

    /// Upload pending content into the texture
    ///
    /// Returns whether a write was recorded. Without pending damage or a
    /// full update request nothing is written. While an earlier frame that
    /// copies from this texture's staging data is still in flight the write
    /// is postponed and the damage kept.
    pub fn update_contents(
        &mut self,
        id: SurfaceId,
        ctx: &mut RenderContext<B>,
        commands: B::CommandList,
        source: &mut dyn ContentSource,
    ) -> RenderResult<bool> {
        if !self.has_pending_update() {
            return Ok(false);
        }
        if !self.texture.staging_writable(ctx.frame_tag, ctx.completed_frame) {
            log::trace!(
                "Surface {:?} staging still read by frame {:?}, postponing upload",
                id,
                self.texture.last_upload()
            );
            return Ok(false);
        }

        let extent = self.texture.extent();
        let regions = if self.full_update {
            vec![extent.full_rect()]
        } else {
            self.damage.clone()
        };

        let pixels = match self.kind {
            SurfaceKind::Debug => {
                let mut rng = rand::thread_rng();
                let color = [rng.gen_range(0..190), rng.gen_range(0..190), rng.gen_range(0..190), 190];
                CapturedPixels::solid(extent, 32, color)
            }
            SurfaceKind::Window { .. } | SurfaceKind::Background { .. } => {
                let request = CaptureRequest {
                    surface: id,
                    kind: self.kind,
                    extent,
                    regions: &regions,
                };
                let Some(pixels) = source.capture(&request) else {
                    log::debug!("No content for surface {:?}, keeping damage", id);
                    return Ok(false);
                };
                if pixels.extent != extent || !pixels.is_complete() {
                    log::debug!(
                        "Stale capture for surface {:?}: {}x{} against {}x{} texture",
                        id,
                        pixels.extent.width,
                        pixels.extent.height,
                        extent.width,
                        extent.height
                    );
                    return Ok(false);
                }
                pixels
            }
        };

        ctx.backend
            .write_texture(commands, self.texture.raw_mut(), &pixels, &regions)?;
        self.texture.mark_uploaded(ctx.frame_tag);
        self.damage.clear();
        self.full_update = false;
        Ok(true)
    }

    /// True if the frame holds an active binding table set
    pub const fn is_drawable(&self) -> bool {
        self.active.is_some()
    }

    /// Record the draw of this surface at `rect`
    ///
    /// The pipeline must already be bound. Stamps the active set with the
    /// current frame tag.
    pub fn draw(
        &mut self,
        ctx: &mut RenderContext<B>,
        commands: B::CommandList,
        rect: Rect,
        border_width: [f32; 2],
        flags: DrawFlags,
    ) -> RenderResult<()> {
        let index = self.active.ok_or_else(|| RenderError::invalid("draw without binding tables"))?;
        let set = &mut self.binding_sets[index];
        let pipeline = ctx.pipelines.pipeline(set.pipeline)?.raw();

        let mut first_table = 0;
        for tables in set.tables.iter().flatten() {
            ctx.backend.bind_tables(commands, pipeline, first_table, tables.tables());
            first_table += tables.tables().len() as u32;
        }

        let time = ctx.frame_time.saturating_duration_since(self.created_at).as_secs_f32();
        let constants = PushConstants::new(rect, ctx.backend.output_extent(), border_width, flags, time);
        ctx.backend.push_constants(commands, pipeline, &constants);
        ctx.backend.draw_point(commands);

        set.fence_tag = ctx.frame_tag;
        Ok(())
    }

    /// Hand the texture and every binding table set to the reclaimer
    pub fn destroy(self, ctx: &mut RenderContext<B>) {
        ctx.textures.release(self.texture, ctx.frame_tag, Instant::now());
        for set in self.binding_sets {
            set.retire(&mut ctx.tables, ctx.frame_tag);
        }
    }

    /// Surface kind
    pub const fn kind(&self) -> SurfaceKind {
        self.kind
    }

    /// Current texture
    pub const fn texture(&self) -> &Texture<B> {
        &self.texture
    }

    /// Selected pipeline
    pub const fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    /// Active binding table set
    pub fn active_set(&self) -> Option<&BindingTableSet<B>> {
        self.binding_sets.get(self.active?)
    }

    /// All binding table sets held by the surface
    pub fn binding_sets(&self) -> &[BindingTableSet<B>] {
        &self.binding_sets
    }

    /// Pending damage rectangles
    pub fn damage(&self) -> &[Rect] {
        &self.damage
    }

    /// True if the next update rewrites the whole texture
    pub const fn needs_full_update(&self) -> bool {
        self.full_update
    }

    /// Per-surface shading flags
    pub const fn user_flags(&self) -> u32 {
        self.user_flags
    }

    /// Set per-surface shading flags
    pub fn set_user_flags(&mut self, flags: u32) {
        self.user_flags = flags;
    }

    /// Creation time, the origin of the `time` push constant
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }
}
