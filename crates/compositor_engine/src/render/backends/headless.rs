//! Headless backend
//!
//! Implements [`GpuBackend`] without a device. Resources are plain handles,
//! texture uploads land in CPU-side buffers and submissions complete
//! immediately unless the simulated GPU is stalled. Every call is counted in
//! [`HeadlessStats`] so the engine's lifecycle rules can be checked from
//! tests. With the default configuration it also serves as the null
//! compositor: no output, extent 0x0.
//!
//! A host write into a texture whose staging data is still read by an
//! unfinished submission is rejected, as are calls failed on purpose through
//! the `set_fail_*` switches.

use std::collections::{HashMap, HashSet};

use crate::config::ArenaConfig;
use crate::foundation::geometry::{Extent, Rect};
use crate::render::backend::{
    BackendResult, GpuBackend, PipelineStage, ShaderSource, Submission, TableWrite,
};
use crate::render::error::RenderError;
use crate::render::types::{
    copy_regions, table_count, BindingKind, CapturedPixels, PushConstants, ShaderStage,
};

/// Headless backend settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessConfig {
    /// Simulated output extent
    pub extent: Extent,
    /// Simulated presentation image count
    pub image_count: usize,
    /// Make every arena creation fail
    pub fail_arena_creation: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            extent: Extent::new(0, 0),
            image_count: 3,
            fail_arena_creation: false,
        }
    }
}

impl HeadlessConfig {
    /// Offscreen output of the given size
    pub fn with_extent(extent: Extent) -> Self {
        Self {
            extent,
            ..Self::default()
        }
    }
}

/// Opaque handle of a simulated object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeadlessHandle(u64);

impl HeadlessHandle {
    /// Raw handle value
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Simulated texture whose contents live in host memory
#[derive(Debug)]
pub struct HeadlessTexture {
    handle: HeadlessHandle,
    extent: Extent,
    pixels: Vec<u8>,
}

impl HeadlessTexture {
    /// Texture handle
    pub const fn handle(&self) -> HeadlessHandle {
        self.handle
    }

    /// Size in pixels
    pub const fn extent(&self) -> Extent {
        self.extent
    }

    /// Uploaded BGRA pixels
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// BGRA value of one pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let offset = (y as usize * self.extent.width as usize + x as usize) * 4;
        let bytes = self.pixels.get(offset..offset + 4)?;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Descriptor counts of one simulated set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessSetLayout {
    handle: HeadlessHandle,
    samplers: u32,
    sampled_images: u32,
}

/// Simulated descriptor arena enforcing its capacity
#[derive(Debug)]
pub struct HeadlessArena {
    handle: HeadlessHandle,
    capacity: ArenaConfig,
    samplers: u32,
    sampled_images: u32,
    live: HashMap<HeadlessHandle, HeadlessSetLayout>,
}

impl HeadlessArena {
    /// Number of tables currently allocated
    pub fn allocated(&self) -> usize {
        self.live.len()
    }
}

/// Simulated shader stage
#[derive(Debug)]
pub struct HeadlessShader {
    handle: HeadlessHandle,
    stage: ShaderStage,
}

/// Simulated pipeline
#[derive(Debug)]
pub struct HeadlessPipeline {
    handle: HeadlessHandle,
    table_count: usize,
}

impl HeadlessPipeline {
    /// Pipeline handle
    pub const fn handle(&self) -> HeadlessHandle {
        self.handle
    }
}

/// One recorded point draw with the state bound at the time
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    /// Bound pipeline
    pub pipeline: Option<HeadlessHandle>,
    /// Bound tables as (first table index, tables)
    pub tables: Vec<(u32, Vec<HeadlessHandle>)>,
    /// Pushed constants
    pub constants: Option<PushConstants>,
    /// Active scissor
    pub scissor: Option<Rect>,
}

/// Call counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Textures created
    pub textures_created: usize,
    /// Textures destroyed
    pub textures_destroyed: usize,
    /// Recorded texture uploads
    pub texture_writes: usize,
    /// Regions across all texture uploads
    pub regions_written: usize,
    /// Shader stages created
    pub shaders_created: usize,
    /// Pipelines created
    pub pipelines_created: usize,
    /// Arenas created
    pub arenas_created: usize,
    /// Arenas destroyed
    pub arenas_destroyed: usize,
    /// Binding tables allocated
    pub tables_allocated: usize,
    /// Binding tables returned to an arena
    pub tables_freed: usize,
    /// Binding slots written
    pub binding_writes: usize,
    /// Point draws recorded
    pub draws: usize,
    /// Queue submissions
    pub submissions: usize,
    /// Images acquired
    pub acquires: usize,
    /// Images presented
    pub presents: usize,
    /// Device idle waits
    pub wait_idles: usize,
    /// Fences created
    pub fences_created: usize,
    /// Fences destroyed
    pub fences_destroyed: usize,
    /// Semaphores created
    pub semaphores_created: usize,
    /// Semaphores created as exportable
    pub exportable_semaphores: usize,
    /// Semaphores destroyed
    pub semaphores_destroyed: usize,
}

#[derive(Debug, Default)]
struct FenceState {
    signaled: bool,
    pending: Option<u64>,
}

#[derive(Debug, Default)]
struct BoundState {
    pipeline: Option<HeadlessHandle>,
    tables: Vec<(u32, Vec<HeadlessHandle>)>,
    constants: Option<PushConstants>,
    scissor: Option<Rect>,
}

/// Device-less [`GpuBackend`]
#[derive(Debug)]
pub struct HeadlessBackend {
    config: HeadlessConfig,
    next_handle: u64,
    next_image: u32,
    submitted: u64,
    completed: u64,
    stalled: bool,
    fail_acquire: bool,
    fail_submit: bool,
    fail_texture_writes: bool,
    fences: HashMap<HeadlessHandle, FenceState>,
    semaphores: HashSet<HeadlessHandle>,
    command_lists: HashSet<HeadlessHandle>,
    recording: HashSet<HeadlessHandle>,
    live_textures: HashSet<HeadlessHandle>,
    table_contents: HashMap<HeadlessHandle, HeadlessHandle>,
    // Textures uploaded by each command list since it began recording
    recorded_uploads: HashMap<HeadlessHandle, Vec<HeadlessHandle>>,
    // Submission that last reads each texture's staging data
    staging_reads: HashMap<HeadlessHandle, u64>,
    bound: BoundState,
    frame_draws: Vec<DrawRecord>,
    stats: HeadlessStats,
}

impl HeadlessBackend {
    /// Create a headless backend
    pub fn new(config: HeadlessConfig) -> Self {
        log::info!(
            "Headless backend: {}x{} output, {} images",
            config.extent.width,
            config.extent.height,
            config.image_count
        );
        Self {
            config,
            next_handle: 1,
            next_image: 0,
            submitted: 0,
            completed: 0,
            stalled: false,
            fail_acquire: false,
            fail_submit: false,
            fail_texture_writes: false,
            fences: HashMap::new(),
            semaphores: HashSet::new(),
            command_lists: HashSet::new(),
            recording: HashSet::new(),
            live_textures: HashSet::new(),
            table_contents: HashMap::new(),
            recorded_uploads: HashMap::new(),
            staging_reads: HashMap::new(),
            bound: BoundState::default(),
            frame_draws: Vec::new(),
            stats: HeadlessStats::default(),
        }
    }

    fn handle(&mut self) -> HeadlessHandle {
        let handle = HeadlessHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn require_recording(&self, commands: HeadlessHandle) -> BackendResult<()> {
        if self.recording.contains(&commands) {
            Ok(())
        } else {
            Err(RenderError::invalid(format!("command list {commands:?} is not recording")))
        }
    }

    /// Call counters
    pub const fn stats(&self) -> &HeadlessStats {
        &self.stats
    }

    /// Stop completing submitted work, as if the GPU were busy
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
        if !stalled {
            self.completed = self.submitted;
        }
    }

    /// Fail every image acquisition as if the output were out of date
    pub fn set_fail_acquire(&mut self, fail: bool) {
        self.fail_acquire = fail;
    }

    /// Fail every queue submission as if the device were lost
    pub fn set_fail_submit(&mut self, fail: bool) {
        self.fail_submit = fail;
    }

    /// Fail every texture upload as if staging memory were exhausted
    pub fn set_fail_texture_writes(&mut self, fail: bool) {
        self.fail_texture_writes = fail;
    }

    /// True while a submitted copy still reads the texture's staging data
    pub fn staging_in_flight(&self, texture: &HeadlessTexture) -> bool {
        self.staging_reads
            .get(&texture.handle)
            .is_some_and(|&seq| seq > self.completed)
    }

    /// Submissions made so far
    pub const fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Textures created and not yet destroyed
    pub fn live_texture_count(&self) -> usize {
        self.live_textures.len()
    }

    /// Texture whose image was last written into `table`
    pub fn table_content(&self, table: HeadlessHandle) -> Option<HeadlessHandle> {
        self.table_contents.get(&table).copied()
    }

    /// Draws recorded inside the most recent output pass
    pub fn frame_draws(&self) -> &[DrawRecord] {
        &self.frame_draws
    }
}

impl GpuBackend for HeadlessBackend {
    type Texture = HeadlessTexture;
    type Arena = HeadlessArena;
    type BindingTable = HeadlessHandle;
    type SetLayout = HeadlessSetLayout;
    type Shader = HeadlessShader;
    type Pipeline = HeadlessPipeline;
    type CommandList = HeadlessHandle;
    type Fence = HeadlessHandle;
    type Semaphore = HeadlessHandle;

    fn image_count(&self) -> usize {
        self.config.image_count
    }

    fn output_extent(&self) -> Extent {
        self.config.extent
    }

    fn create_texture(&mut self, extent: Extent) -> BackendResult<HeadlessTexture> {
        if extent.is_empty() {
            return Err(RenderError::invalid("zero-sized texture"));
        }
        let handle = self.handle();
        self.live_textures.insert(handle);
        self.stats.textures_created += 1;
        Ok(HeadlessTexture {
            handle,
            extent,
            pixels: vec![0; extent.byte_size()],
        })
    }

    fn write_texture(
        &mut self,
        commands: HeadlessHandle,
        texture: &mut HeadlessTexture,
        pixels: &CapturedPixels,
        regions: &[Rect],
    ) -> BackendResult<()> {
        self.require_recording(commands)?;
        if self.fail_texture_writes {
            return Err(RenderError::Api(ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        }
        if self.staging_in_flight(texture) {
            return Err(RenderError::invalid(format!(
                "texture {:?} written while its staging data is in flight",
                texture.handle
            )));
        }
        if pixels.extent != texture.extent || !pixels.is_complete() {
            return Err(RenderError::invalid(format!(
                "captured {}x{} pixels do not match {}x{} texture",
                pixels.extent.width, pixels.extent.height, texture.extent.width, texture.extent.height
            )));
        }
        copy_regions(&mut texture.pixels, pixels, regions);
        self.recorded_uploads.entry(commands).or_default().push(texture.handle);
        self.stats.texture_writes += 1;
        self.stats.regions_written += regions.len();
        Ok(())
    }

    fn destroy_texture(&mut self, texture: HeadlessTexture) {
        self.live_textures.remove(&texture.handle);
        self.staging_reads.remove(&texture.handle);
        self.stats.textures_destroyed += 1;
    }

    fn create_shader(
        &mut self,
        source: &ShaderSource<'_>,
    ) -> BackendResult<(HeadlessShader, Vec<HeadlessSetLayout>)> {
        if source.code.is_empty() {
            return Err(RenderError::invalid(format!("shader {} has no code", source.name)));
        }
        let layouts = (0..table_count(source.bindings))
            .map(|set| {
                let in_set = source.bindings.iter().filter(|decl| decl.set as usize == set);
                let (samplers, sampled_images) =
                    in_set.fold((0, 0), |(samplers, images), decl| match decl.kind {
                        BindingKind::Sampler => (samplers + 1, images),
                        BindingKind::SampledImage => (samplers, images + 1),
                    });
                HeadlessSetLayout {
                    handle: self.handle(),
                    samplers,
                    sampled_images,
                }
            })
            .collect();
        self.stats.shaders_created += 1;
        Ok((
            HeadlessShader {
                handle: self.handle(),
                stage: source.stage,
            },
            layouts,
        ))
    }

    fn destroy_shader(&mut self, shader: HeadlessShader, _set_layouts: Vec<HeadlessSetLayout>) {
        log::trace!("Destroying headless {:?} shader {:?}", shader.stage, shader.handle);
    }

    fn create_pipeline(&mut self, stages: &[PipelineStage<'_, Self>]) -> BackendResult<HeadlessPipeline> {
        for (stage, expected) in stages.iter().zip(ShaderStage::ALL) {
            if stage.stage != expected || stage.shader.stage != expected {
                return Err(RenderError::invalid(format!(
                    "pipeline stage {:?} in {:?} slot",
                    stage.stage, expected
                )));
            }
        }
        self.stats.pipelines_created += 1;
        Ok(HeadlessPipeline {
            handle: self.handle(),
            table_count: stages.iter().map(|stage| stage.set_layouts.len()).sum(),
        })
    }

    fn destroy_pipeline(&mut self, pipeline: HeadlessPipeline) {
        log::trace!("Destroying headless pipeline {:?}", pipeline.handle);
    }

    fn create_arena(&mut self, capacity: &ArenaConfig) -> BackendResult<HeadlessArena> {
        if self.config.fail_arena_creation {
            return Err(RenderError::Api(ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        self.stats.arenas_created += 1;
        Ok(HeadlessArena {
            handle: self.handle(),
            capacity: *capacity,
            samplers: 0,
            sampled_images: 0,
            live: HashMap::new(),
        })
    }

    fn allocate_tables(
        &mut self,
        arena: &mut HeadlessArena,
        layouts: &[HeadlessSetLayout],
    ) -> Option<Vec<HeadlessHandle>> {
        let samplers: u32 = layouts.iter().map(|layout| layout.samplers).sum();
        let sampled_images: u32 = layouts.iter().map(|layout| layout.sampled_images).sum();
        if arena.live.len() + layouts.len() > arena.capacity.max_tables as usize
            || arena.samplers + samplers > arena.capacity.samplers
            || arena.sampled_images + sampled_images > arena.capacity.sampled_images
        {
            return None;
        }

        arena.samplers += samplers;
        arena.sampled_images += sampled_images;
        let tables: Vec<_> = layouts
            .iter()
            .map(|layout| {
                let table = self.handle();
                arena.live.insert(table, *layout);
                table
            })
            .collect();
        self.stats.tables_allocated += tables.len();
        Some(tables)
    }

    fn free_tables(&mut self, arena: &mut HeadlessArena, tables: &[HeadlessHandle]) {
        for table in tables {
            if let Some(layout) = arena.live.remove(table) {
                arena.samplers -= layout.samplers;
                arena.sampled_images -= layout.sampled_images;
                self.table_contents.remove(table);
                self.stats.tables_freed += 1;
            } else {
                log::warn!("Table {:?} freed to arena {:?} it does not belong to", table, arena.handle);
            }
        }
    }

    fn destroy_arena(&mut self, arena: HeadlessArena) {
        for table in arena.live.keys() {
            self.table_contents.remove(table);
        }
        self.stats.arenas_destroyed += 1;
    }

    fn write_content_bindings(&mut self, texture: &HeadlessTexture, writes: &[TableWrite<HeadlessHandle>]) {
        for write in writes {
            if write.kind == BindingKind::SampledImage {
                self.table_contents.insert(write.table, texture.handle);
            }
        }
        self.stats.binding_writes += writes.len();
    }

    fn allocate_command_list(&mut self) -> BackendResult<HeadlessHandle> {
        let handle = self.handle();
        self.command_lists.insert(handle);
        Ok(handle)
    }

    fn free_command_list(&mut self, commands: HeadlessHandle) {
        self.command_lists.remove(&commands);
        self.recording.remove(&commands);
        self.recorded_uploads.remove(&commands);
    }

    fn begin_commands(&mut self, commands: HeadlessHandle) -> BackendResult<()> {
        if !self.command_lists.contains(&commands) {
            return Err(RenderError::invalid(format!("unknown command list {commands:?}")));
        }
        self.recording.insert(commands);
        self.recorded_uploads.remove(&commands);
        Ok(())
    }

    fn end_commands(&mut self, commands: HeadlessHandle) -> BackendResult<()> {
        if self.recording.remove(&commands) {
            Ok(())
        } else {
            Err(RenderError::invalid(format!("command list {commands:?} is not recording")))
        }
    }

    fn begin_output_pass(&mut self, _commands: HeadlessHandle, image_index: u32, _clear_color: [f32; 4]) {
        log::trace!("Headless output pass on image {}", image_index);
        self.bound = BoundState::default();
        self.frame_draws.clear();
    }

    fn end_output_pass(&mut self, _commands: HeadlessHandle) {
        self.bound = BoundState::default();
    }

    fn bind_pipeline(&mut self, _commands: HeadlessHandle, pipeline: &HeadlessPipeline) {
        self.bound.pipeline = Some(pipeline.handle);
        self.bound.tables.clear();
    }

    fn bind_tables(
        &mut self,
        _commands: HeadlessHandle,
        pipeline: &HeadlessPipeline,
        first_table: u32,
        tables: &[HeadlessHandle],
    ) {
        if first_table as usize + tables.len() > pipeline.table_count {
            log::warn!(
                "Binding tables {}..{} past pipeline layout of {}",
                first_table,
                first_table as usize + tables.len(),
                pipeline.table_count
            );
        }
        self.bound.tables.push((first_table, tables.to_vec()));
    }

    fn push_constants(&mut self, _commands: HeadlessHandle, _pipeline: &HeadlessPipeline, constants: &PushConstants) {
        self.bound.constants = Some(*constants);
    }

    fn set_scissor(&mut self, _commands: HeadlessHandle, rect: Rect) {
        self.bound.scissor = Some(rect);
    }

    fn draw_point(&mut self, _commands: HeadlessHandle) {
        self.frame_draws.push(DrawRecord {
            pipeline: self.bound.pipeline,
            tables: self.bound.tables.clone(),
            constants: self.bound.constants,
            scissor: self.bound.scissor,
        });
        self.stats.draws += 1;
    }

    fn create_fence(&mut self, signaled: bool) -> BackendResult<HeadlessHandle> {
        let handle = self.handle();
        self.fences.insert(
            handle,
            FenceState {
                signaled,
                pending: None,
            },
        );
        self.stats.fences_created += 1;
        Ok(handle)
    }

    fn destroy_fence(&mut self, fence: HeadlessHandle) {
        self.fences.remove(&fence);
        self.stats.fences_destroyed += 1;
    }

    fn create_semaphore(&mut self, exportable: bool) -> BackendResult<HeadlessHandle> {
        let handle = self.handle();
        self.semaphores.insert(handle);
        self.stats.semaphores_created += 1;
        if exportable {
            self.stats.exportable_semaphores += 1;
        }
        Ok(handle)
    }

    fn destroy_semaphore(&mut self, semaphore: HeadlessHandle) {
        self.semaphores.remove(&semaphore);
        self.stats.semaphores_destroyed += 1;
    }

    fn poll_fence(&mut self, fence: &HeadlessHandle) -> BackendResult<bool> {
        let completed = self.completed;
        let state = self
            .fences
            .get_mut(fence)
            .ok_or_else(|| RenderError::invalid(format!("unknown fence {fence:?}")))?;
        if state.pending.is_some_and(|seq| seq <= completed) {
            state.pending = None;
            state.signaled = true;
        }
        Ok(state.signaled)
    }

    fn reset_fence(&mut self, fence: &HeadlessHandle) -> BackendResult<()> {
        let state = self
            .fences
            .get_mut(fence)
            .ok_or_else(|| RenderError::invalid(format!("unknown fence {fence:?}")))?;
        state.signaled = false;
        Ok(())
    }

    fn acquire_image(&mut self, signal: &HeadlessHandle) -> BackendResult<u32> {
        if !self.semaphores.contains(signal) {
            return Err(RenderError::invalid(format!("unknown semaphore {signal:?}")));
        }
        if self.fail_acquire {
            return Err(RenderError::Api(ash::vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.config.image_count.max(1) as u32;
        self.stats.acquires += 1;
        Ok(image)
    }

    fn submit(&mut self, submission: &Submission<'_, Self>) -> BackendResult<()> {
        if let Some(commands) = submission.commands.iter().find(|commands| self.recording.contains(*commands)) {
            return Err(RenderError::invalid(format!("command list {commands:?} submitted while recording")));
        }
        if self.fail_submit {
            return Err(RenderError::Api(ash::vk::Result::ERROR_DEVICE_LOST));
        }
        self.submitted += 1;
        for commands in submission.commands {
            for texture in self.recorded_uploads.remove(commands).unwrap_or_default() {
                self.staging_reads.insert(texture, self.submitted);
            }
        }
        if let Some(fence) = submission.fence {
            let state = self.fences.entry(*fence).or_default();
            state.signaled = false;
            state.pending = Some(self.submitted);
        }
        if !self.stalled {
            self.completed = self.submitted;
        }
        self.stats.submissions += 1;
        Ok(())
    }

    fn present(&mut self, image_index: u32, _wait: &HeadlessHandle) -> BackendResult<()> {
        if image_index as usize >= self.config.image_count {
            return Err(RenderError::invalid(format!("image {image_index} out of range")));
        }
        self.stats.presents += 1;
        Ok(())
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        // A stalled device never drains, even on an idle wait
        if !self.stalled {
            self.completed = self.submitted;
        }
        self.stats.wait_idles += 1;
        Ok(())
    }
}
