//! Rendering system
//!
//! Backend-agnostic resource lifecycle and frame pacing, with a Vulkan
//! backend for real output and a headless backend for tests and offscreen
//! runs.

pub mod backend;
pub mod backends;
pub mod context;
pub mod engine;
pub mod error;
pub mod frame_pacer;
pub mod resources;
pub mod surface;
pub mod types;

pub use backend::{BackendResult, GpuBackend, PipelineStage, ShaderSource, Submission, TableWrite, WaitStage};
pub use context::RenderContext;
pub use engine::{RenderEngine, RenderItem};
pub use error::{RenderError, RenderResult};
pub use frame_pacer::{FrameCommands, FramePacer, FrameSlot, FrameStatus};
pub use surface::{BindingTableSet, CaptureRequest, ClientFrame, ContentSource, SurfaceId, SurfaceKind};
pub use types::{
    BindingDecl, BindingKind, CapturedPixels, DrawFlags, PushConstants, ShaderStage, CONTENT_BINDING,
    PUSH_CONSTANT_SIZE, STAGE_COUNT,
};
