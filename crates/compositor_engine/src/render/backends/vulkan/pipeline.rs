//! Shader modules and the point-expanding graphics pipeline

use std::ffi::CStr;

use ash::{vk, Device};

use super::descriptor::stage_flags;
use crate::render::error::{RenderError, RenderResult};
use crate::render::types::{ShaderStage, PUSH_CONSTANT_SIZE};

const ENTRY_POINT: &[u8] = b"main\0";

/// Stages that read the push constant block
pub(super) const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags =
    vk::ShaderStageFlags::from_raw(vk::ShaderStageFlags::GEOMETRY.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw());

/// Compiled shader stage
#[derive(Debug)]
pub struct VulkanShader {
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl VulkanShader {
    pub(super) fn new(device: &Device, stage: ShaderStage, code: &[u32]) -> RenderResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        let module = unsafe { device.create_shader_module(&create_info, None) }.map_err(RenderError::Api)?;
        Ok(Self { module, stage })
    }

    pub(super) fn destroy(self, device: &Device) {
        unsafe { device.destroy_shader_module(self.module, None) };
    }
}

/// Graphics pipeline and its layout
#[derive(Debug)]
pub struct VulkanPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl VulkanPipeline {
    /// Build a pipeline drawing one point per surface, expanded by the geometry stage
    pub(super) fn new(
        device: &Device,
        render_pass: vk::RenderPass,
        shaders: &[&VulkanShader],
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> RenderResult<Self> {
        if let Some((shader, expected)) = shaders
            .iter()
            .zip(ShaderStage::ALL)
            .find(|(shader, expected)| shader.stage != *expected)
        {
            return Err(RenderError::invalid(format!(
                "pipeline stage {:?} in {:?} slot",
                shader.stage, expected
            )));
        }

        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: PUSH_CONSTANT_STAGES,
            offset: 0,
            size: PUSH_CONSTANT_SIZE,
        }];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }.map_err(RenderError::Api)?;

        // SAFETY: ENTRY_POINT is NUL-terminated without interior NULs
        let entry = unsafe { CStr::from_bytes_with_nul_unchecked(ENTRY_POINT) };
        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = shaders
            .iter()
            .map(|shader| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage_flags(shader.stage))
                    .module(shader.module)
                    .name(entry)
                    .build()
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::POINT_LIST)
            .primitive_restart_enable(false);
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1.0);
        let multisample =
            vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build()];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        match unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info.build()], None) } {
            Ok(pipelines) => Ok(Self {
                pipeline: pipelines[0],
                layout,
            }),
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(RenderError::Api(e))
            }
        }
    }

    pub(super) const fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub(super) const fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub(super) fn destroy(self, device: &Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
