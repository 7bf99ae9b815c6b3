//! Backend abstraction traits for the rendering system
//!
//! Every GPU call made by the caches, the client frames and the frame pacer
//! goes through [`GpuBackend`]. The Vulkan backend drives a real device; the
//! headless backend records the same calls against simulated resources.

use std::fmt;

use crate::config::ArenaConfig;
use crate::foundation::geometry::{Extent, Rect};
use crate::render::error::RenderResult;
use crate::render::types::{BindingDecl, BindingKind, CapturedPixels, PushConstants, ShaderStage};

/// Result type for backend operations
pub type BackendResult<T> = RenderResult<T>;

/// Source of one shader stage
#[derive(Debug, Clone, Copy)]
pub struct ShaderSource<'a> {
    /// Name pipelines refer to the stage by
    pub name: &'a str,
    /// Pipeline stage
    pub stage: ShaderStage,
    /// SPIR-V words
    pub code: &'a [u32],
    /// Declared bindings
    pub bindings: &'a [BindingDecl],
}

/// One stage handed to [`GpuBackend::create_pipeline`]
pub struct PipelineStage<'a, B: GpuBackend + ?Sized> {
    /// Pipeline stage
    pub stage: ShaderStage,
    /// Compiled module
    pub shader: &'a B::Shader,
    /// Set layouts of the stage, in table order
    pub set_layouts: &'a [B::SetLayout],
}

/// Binding update for the surface content texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableWrite<T> {
    /// Table to write
    pub table: T,
    /// Binding slot
    pub binding: u32,
    /// What to write into the slot: the content image or the point sampler
    pub kind: BindingKind,
}

/// Pipeline stage at which a submission waits for a semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStage {
    /// Wait before writing color attachments
    ColorOutput,
    /// Wait before any command of the submission
    AllCommands,
}

/// One queue submission
pub struct Submission<'a, B: GpuBackend + ?Sized> {
    /// Command lists, executed in order
    pub commands: &'a [B::CommandList],
    /// Semaphores to wait on before execution
    pub waits: &'a [(&'a B::Semaphore, WaitStage)],
    /// Semaphores signaled on completion
    pub signals: &'a [&'a B::Semaphore],
    /// Fence signaled on completion
    pub fence: Option<&'a B::Fence>,
}

/// GPU backend used by the engine
///
/// Handles are plain values owned by the engine; the backend only creates,
/// records with and destroys them. Destroy calls are only made once the
/// frame pacer has proven the GPU is done with a resource.
pub trait GpuBackend {
    /// Image, view and host-visible staging region of one texture
    type Texture: fmt::Debug;
    /// Fixed-capacity descriptor arena
    type Arena: fmt::Debug;
    /// One binding table (descriptor set)
    type BindingTable: Copy + fmt::Debug;
    /// Layout of one binding table
    type SetLayout: Copy + fmt::Debug;
    /// Compiled shader stage
    type Shader: fmt::Debug;
    /// Graphics pipeline and its layout
    type Pipeline: fmt::Debug;
    /// Command list handle
    type CommandList: Copy + fmt::Debug;
    /// CPU-visible completion fence
    type Fence: fmt::Debug;
    /// GPU-side semaphore
    type Semaphore: fmt::Debug;

    /// Number of presentation images, which is the frames-in-flight ring size
    fn image_count(&self) -> usize;

    /// Current output extent
    fn output_extent(&self) -> Extent;

    /// Create a texture with a host-visible staging path
    fn create_texture(&mut self, extent: Extent) -> BackendResult<Self::Texture>;

    /// Record an upload of `regions` of `pixels` into the texture
    fn write_texture(
        &mut self,
        commands: Self::CommandList,
        texture: &mut Self::Texture,
        pixels: &CapturedPixels,
        regions: &[Rect],
    ) -> BackendResult<()>;

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: Self::Texture);

    /// Compile a shader stage and derive one set layout per binding table
    fn create_shader(
        &mut self,
        source: &ShaderSource<'_>,
    ) -> BackendResult<(Self::Shader, Vec<Self::SetLayout>)>;

    /// Destroy a shader stage and its set layouts
    fn destroy_shader(&mut self, shader: Self::Shader, set_layouts: Vec<Self::SetLayout>);

    /// Build a graphics pipeline from vertex, geometry and fragment stages
    fn create_pipeline(&mut self, stages: &[PipelineStage<'_, Self>]) -> BackendResult<Self::Pipeline>;

    /// Destroy a pipeline
    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline);

    /// Create a descriptor arena
    fn create_arena(&mut self, capacity: &ArenaConfig) -> BackendResult<Self::Arena>;

    /// Allocate one table per layout, or `None` if the arena is exhausted
    fn allocate_tables(
        &mut self,
        arena: &mut Self::Arena,
        layouts: &[Self::SetLayout],
    ) -> Option<Vec<Self::BindingTable>>;

    /// Return tables to their arena
    fn free_tables(&mut self, arena: &mut Self::Arena, tables: &[Self::BindingTable]);

    /// Destroy an arena and every table still allocated from it
    fn destroy_arena(&mut self, arena: Self::Arena);

    /// Point content and sampler bindings at a texture
    fn write_content_bindings(&mut self, texture: &Self::Texture, writes: &[TableWrite<Self::BindingTable>]);

    /// Allocate a resettable command list
    fn allocate_command_list(&mut self) -> BackendResult<Self::CommandList>;

    /// Free a command list
    fn free_command_list(&mut self, commands: Self::CommandList);

    /// Reset and begin recording
    fn begin_commands(&mut self, commands: Self::CommandList) -> BackendResult<()>;

    /// Finish recording
    fn end_commands(&mut self, commands: Self::CommandList) -> BackendResult<()>;

    /// Begin the output render pass on a presentation image
    fn begin_output_pass(&mut self, commands: Self::CommandList, image_index: u32, clear_color: [f32; 4]);

    /// End the output render pass
    fn end_output_pass(&mut self, commands: Self::CommandList);

    /// Bind a graphics pipeline
    fn bind_pipeline(&mut self, commands: Self::CommandList, pipeline: &Self::Pipeline);

    /// Bind tables starting at table index `first_table`
    fn bind_tables(
        &mut self,
        commands: Self::CommandList,
        pipeline: &Self::Pipeline,
        first_table: u32,
        tables: &[Self::BindingTable],
    );

    /// Push the per-draw constant block
    fn push_constants(&mut self, commands: Self::CommandList, pipeline: &Self::Pipeline, constants: &PushConstants);

    /// Restrict rasterization to `rect`
    fn set_scissor(&mut self, commands: Self::CommandList, rect: Rect);

    /// Draw a single point, expanded to the surface quad by the geometry stage
    fn draw_point(&mut self, commands: Self::CommandList);

    /// Create a fence
    fn create_fence(&mut self, signaled: bool) -> BackendResult<Self::Fence>;

    /// Destroy a fence
    fn destroy_fence(&mut self, fence: Self::Fence);

    /// Create a semaphore, exportable to the capture context if requested
    fn create_semaphore(&mut self, exportable: bool) -> BackendResult<Self::Semaphore>;

    /// Destroy a semaphore
    fn destroy_semaphore(&mut self, semaphore: Self::Semaphore);

    /// Non-blocking check whether a fence is signaled
    fn poll_fence(&mut self, fence: &Self::Fence) -> BackendResult<bool>;

    /// Return a fence to the unsignaled state
    fn reset_fence(&mut self, fence: &Self::Fence) -> BackendResult<()>;

    /// Acquire the next presentation image, signaling `signal` when it is ready
    fn acquire_image(&mut self, signal: &Self::Semaphore) -> BackendResult<u32>;

    /// Submit command lists to the graphics queue
    fn submit(&mut self, submission: &Submission<'_, Self>) -> BackendResult<()>;

    /// Present an image once `wait` is signaled
    fn present(&mut self, image_index: u32, wait: &Self::Semaphore) -> BackendResult<()>;

    /// Block until the device has finished all submitted work
    fn wait_idle(&mut self) -> BackendResult<()>;
}
