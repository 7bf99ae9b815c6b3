//! Shared setup for the engine integration tests

#![allow(dead_code)]

use compositor_engine::prelude::*;
use compositor_engine::render::{BindingDecl, BindingKind, ShaderSource, ShaderStage, CONTENT_BINDING};

const SPIRV: [u32; 1] = [0x0723_0203];

/// Output size used by the tests
pub const OUTPUT: Extent = Extent::new(1280, 720);

/// Register the default and frame shader stages
pub fn register_shaders(engine: &mut RenderEngine<HeadlessBackend>) {
    let fragment = vec![
        BindingDecl::new(CONTENT_BINDING, BindingKind::SampledImage, 0, 0),
        BindingDecl::new("pointSampler", BindingKind::Sampler, 0, 1),
    ];
    let geometry = vec![BindingDecl::new(CONTENT_BINDING, BindingKind::SampledImage, 0, 0)];

    for prefix in ["default", "frame"] {
        for (stage, suffix, bindings) in [
            (ShaderStage::Vertex, "vertex", Vec::new()),
            (ShaderStage::Geometry, "geometry", geometry.clone()),
            (ShaderStage::Fragment, "fragment", fragment.clone()),
        ] {
            let name = format!("{prefix}_{suffix}.spv");
            engine
                .add_shader(&ShaderSource {
                    name: &name,
                    stage,
                    code: &SPIRV,
                    bindings: &bindings,
                })
                .expect("shader registration");
        }
    }
}

/// Engine on a headless backend with the test shaders loaded
pub fn engine_with(config: EngineConfig) -> RenderEngine<HeadlessBackend> {
    let backend = HeadlessBackend::new(HeadlessConfig::with_extent(OUTPUT));
    let mut engine = RenderEngine::new(backend, config).expect("engine");
    register_shaders(&mut engine);
    engine
}

/// Both synchronization strategies, default first
pub const STRATEGIES: [SyncStrategy; 2] = [SyncStrategy::WaitIdle, SyncStrategy::SemaphoreChain];

/// Engine with the default configuration
pub fn engine() -> RenderEngine<HeadlessBackend> {
    engine_with(EngineConfig::default())
}

/// Engine with defaults apart from the sync strategy
pub fn engine_for(strategy: SyncStrategy) -> RenderEngine<HeadlessBackend> {
    engine_with(EngineConfig::default().with_sync_strategy(strategy))
}

/// Engine relying on the semaphore chain alone, so frames overlap on the GPU
pub fn chained_engine() -> RenderEngine<HeadlessBackend> {
    engine_for(SyncStrategy::SemaphoreChain)
}

/// Content source returning a solid color and counting captures
#[derive(Debug, Default)]
pub struct SolidSource {
    pub color: [u8; 4],
    pub depth: u8,
    pub captures: usize,
    pub unavailable: bool,
}

impl SolidSource {
    pub fn new(color: [u8; 4]) -> Self {
        Self {
            color,
            depth: 32,
            ..Self::default()
        }
    }
}

impl ContentSource for SolidSource {
    fn capture(&mut self, request: &CaptureRequest<'_>) -> Option<CapturedPixels> {
        self.captures += 1;
        if self.unavailable {
            return None;
        }
        Some(CapturedPixels::solid(request.extent, self.depth, self.color))
    }
}

/// Run frames until `count` of them were presented
pub fn present_frames(
    engine: &mut RenderEngine<HeadlessBackend>,
    items: &[RenderItem],
    source: &mut SolidSource,
    count: usize,
) {
    for _ in 0..count {
        let status = engine.render_frame(items, source).expect("frame");
        assert!(status.is_presented(), "frame {} deferred", engine.frame_tag());
    }
}
