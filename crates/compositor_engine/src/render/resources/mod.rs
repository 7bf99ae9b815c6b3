//! GPU resource caches
//!
//! Textures, binding tables and pipelines, plus the deferred free lists that
//! keep released resources alive until no frame in flight can reference them.

pub mod binding_pool;
pub mod pipeline_cache;
pub mod retirement;
pub mod texture_cache;

pub use binding_pool::{AllocationId, ArenaId, BindingTableArray, BindingTablePool};
pub use pipeline_cache::{Pipeline, PipelineCache, PipelineId, ShaderId, ShaderModule};
pub use retirement::{is_retired, is_reusable, retirement_deadline, Retired, RetirementList};
pub use texture_cache::{Texture, TextureCache, TextureId};
