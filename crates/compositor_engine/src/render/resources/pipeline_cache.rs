//! Shader and pipeline cache
//!
//! Shader stages are registered once by name. Pipelines are interned by the
//! ordered tuple of their vertex, geometry and fragment stage names and live
//! until teardown.

use std::collections::HashMap;

use crate::render::backend::{GpuBackend, PipelineStage, ShaderSource};
use crate::render::error::{RenderError, RenderResult};
use crate::render::types::{BindingDecl, BindingKind, ShaderStage, CONTENT_BINDING, STAGE_COUNT};

/// Handle of a loaded shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(usize);

/// Handle of an interned pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(usize);

/// A compiled stage with its binding declarations and derived set layouts
#[derive(Debug)]
pub struct ShaderModule<B: GpuBackend> {
    name: String,
    stage: ShaderStage,
    bindings: Vec<BindingDecl>,
    raw: B::Shader,
    set_layouts: Vec<B::SetLayout>,
}

impl<B: GpuBackend> ShaderModule<B> {
    /// Stage name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipeline stage
    pub const fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Declared bindings
    pub fn bindings(&self) -> &[BindingDecl] {
        &self.bindings
    }

    /// Set layouts, one per binding table
    pub fn set_layouts(&self) -> &[B::SetLayout] {
        &self.set_layouts
    }

    /// Number of binding tables the stage uses
    pub fn set_count(&self) -> usize {
        self.set_layouts.len()
    }

    /// The sampled-image binding receiving the surface content
    pub fn content_binding(&self) -> Option<&BindingDecl> {
        self.bindings
            .iter()
            .find(|decl| decl.kind == BindingKind::SampledImage && decl.name == CONTENT_BINDING)
    }

    /// The sampler binding
    pub fn sampler_binding(&self) -> Option<&BindingDecl> {
        self.bindings.iter().find(|decl| decl.kind == BindingKind::Sampler)
    }
}

/// Interned vertex/geometry/fragment combination
#[derive(Debug)]
pub struct Pipeline<B: GpuBackend> {
    id: PipelineId,
    names: [String; STAGE_COUNT],
    stages: [ShaderId; STAGE_COUNT],
    raw: B::Pipeline,
}

impl<B: GpuBackend> Pipeline<B> {
    /// Pipeline handle
    pub const fn id(&self) -> PipelineId {
        self.id
    }

    /// Stage names in pipeline order
    pub const fn names(&self) -> &[String; STAGE_COUNT] {
        &self.names
    }

    /// Backend pipeline
    pub const fn raw(&self) -> &B::Pipeline {
        &self.raw
    }
}

/// Registry of shader stages and interned pipelines
#[derive(Debug)]
pub struct PipelineCache<B: GpuBackend> {
    shaders: Vec<ShaderModule<B>>,
    shader_index: HashMap<String, ShaderId>,
    pipelines: Vec<Pipeline<B>>,
}

impl<B: GpuBackend> Default for PipelineCache<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GpuBackend> PipelineCache<B> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            shaders: Vec::new(),
            shader_index: HashMap::new(),
            pipelines: Vec::new(),
        }
    }

    /// Compile and register a shader stage
    pub fn add_shader(&mut self, backend: &mut B, source: &ShaderSource<'_>) -> RenderResult<ShaderId> {
        if self.shader_index.contains_key(source.name) {
            return Err(RenderError::invalid(format!("shader {} already loaded", source.name)));
        }

        let (raw, set_layouts) = backend.create_shader(source)?;
        let id = ShaderId(self.shaders.len());
        log::info!(
            "Loaded {:?} shader {} ({} bindings, {} tables)",
            source.stage,
            source.name,
            source.bindings.len(),
            set_layouts.len()
        );

        self.shaders.push(ShaderModule {
            name: source.name.to_owned(),
            stage: source.stage,
            bindings: source.bindings.to_vec(),
            raw,
            set_layouts,
        });
        self.shader_index.insert(source.name.to_owned(), id);
        Ok(id)
    }

    /// Find a loaded shader stage by name
    pub fn find_shader(&self, name: &str) -> Option<ShaderId> {
        self.shader_index.get(name).copied()
    }

    /// Get or build the pipeline for a vertex/geometry/fragment name tuple
    pub fn load(&mut self, backend: &mut B, names: [&str; STAGE_COUNT]) -> RenderResult<PipelineId> {
        if let Some(pipeline) = self
            .pipelines
            .iter()
            .find(|pipeline| pipeline.names.iter().zip(names).all(|(have, want)| have == want))
        {
            return Ok(pipeline.id);
        }

        let mut stages = [ShaderId(0); STAGE_COUNT];
        for (slot, (name, expected)) in names.iter().zip(ShaderStage::ALL).enumerate() {
            let id = self.find_shader(name).ok_or_else(|| RenderError::ShaderNotFound {
                name: (*name).to_owned(),
            })?;
            let stage = self.shaders[id.0].stage;
            if stage != expected {
                return Err(RenderError::invalid(format!(
                    "shader {name} is a {stage:?} stage, expected {expected:?}"
                )));
            }
            stages[slot] = id;
        }

        let stage_descs: Vec<PipelineStage<'_, B>> = stages
            .iter()
            .map(|id| {
                let module = &self.shaders[id.0];
                PipelineStage {
                    stage: module.stage,
                    shader: &module.raw,
                    set_layouts: &module.set_layouts,
                }
            })
            .collect();
        let raw = backend.create_pipeline(&stage_descs)?;

        let id = PipelineId(self.pipelines.len());
        log::info!("Created pipeline {:?} [{}, {}, {}]", id, names[0], names[1], names[2]);
        self.pipelines.push(Pipeline {
            id,
            names: names.map(str::to_owned),
            stages,
            raw,
        });
        Ok(id)
    }

    /// Interned pipeline; ids loaded into another cache are rejected
    pub fn pipeline(&self, id: PipelineId) -> RenderResult<&Pipeline<B>> {
        self.pipelines
            .get(id.0)
            .ok_or_else(|| RenderError::invalid(format!("unknown pipeline {id:?}")))
    }

    /// Stage modules of a pipeline in pipeline order
    pub fn stage_modules(&self, id: PipelineId) -> RenderResult<[&ShaderModule<B>; STAGE_COUNT]> {
        let pipeline = self.pipeline(id)?;
        Ok(pipeline.stages.map(|shader| &self.shaders[shader.0]))
    }

    /// Number of interned pipelines
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Number of loaded shader stages
    pub fn shader_count(&self) -> usize {
        self.shaders.len()
    }

    /// Destroy every pipeline and shader stage; only valid once the device is idle
    pub fn destroy_all(&mut self, backend: &mut B) {
        for pipeline in self.pipelines.drain(..) {
            backend.destroy_pipeline(pipeline.raw);
        }
        for shader in self.shaders.drain(..) {
            backend.destroy_shader(shader.raw, shader.set_layouts);
        }
        self.shader_index.clear();
    }
}
