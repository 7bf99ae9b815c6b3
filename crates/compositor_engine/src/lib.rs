//! # Compositor Engine
//!
//! GPU resource lifecycle and frame pacing for a compositing window manager.
//!
//! The engine owns every GPU-side resource used to draw client window
//! contents to screen and guarantees that none of them is written, rebound
//! or freed while a submitted frame may still reference it.
//!
//! ## Components
//!
//! - **Texture cache**: exact-size pooling of window textures
//! - **Pipeline cache**: interned shader stage combinations
//! - **Binding table pool**: growable descriptor arenas with deferred frees
//! - **Frame pacer**: ring of frames in flight and the per-slot sync chain
//! - **Client frames**: per-surface texture, pipeline and binding state
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use compositor_engine::prelude::*;
//!
//! struct Blank;
//!
//! impl ContentSource for Blank {
//!     fn capture(&mut self, request: &CaptureRequest<'_>) -> Option<CapturedPixels> {
//!         Some(CapturedPixels::blank(request.extent, 32))
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     compositor_engine::foundation::logging::init();
//!
//!     let config = EngineConfig::default();
//!     let backend = HeadlessBackend::new(HeadlessConfig::default());
//!     let mut engine = RenderEngine::new(backend, config)?;
//!     engine.load_shader_manifest("shaders/manifest.toml")?;
//!
//!     let window = engine.create_surface(
//!         SurfaceKind::Window { window: 0x40_0001 },
//!         Extent::new(640, 480),
//!         None,
//!     )?;
//!     let items = [RenderItem::new(window, Rect::new(0, 0, 640, 480))];
//!     engine.render_frame(&items, &mut Blank)?;
//!     engine.shutdown()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{
            ArenaConfig, Config, ConfigError, EngineConfig, PresentModePreference, ShaderManifest,
            ShaderSet, SyncStrategy,
        },
        foundation::geometry::{Extent, Rect},
        render::{
            backends::headless::{HeadlessBackend, HeadlessConfig},
            CaptureRequest, CapturedPixels, ContentSource, FrameStatus, GpuBackend, RenderEngine,
            RenderError, RenderItem, RenderResult, SurfaceId, SurfaceKind,
        },
    };
}
