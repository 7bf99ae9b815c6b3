//! Descriptor arenas and binding table layouts

use ash::{vk, Device};

use crate::config::ArenaConfig;
use crate::render::error::{RenderError, RenderResult};
use crate::render::types::{table_count, BindingDecl, BindingKind, ShaderStage};

pub(super) const fn stage_flags(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
    }
}

const fn descriptor_type(kind: BindingKind) -> vk::DescriptorType {
    match kind {
        BindingKind::Sampler => vk::DescriptorType::SAMPLER,
        BindingKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
    }
}

/// One set layout per table declared by a shader stage
pub(super) fn create_set_layouts(
    device: &Device,
    stage: ShaderStage,
    bindings: &[BindingDecl],
) -> RenderResult<Vec<vk::DescriptorSetLayout>> {
    let mut layouts = Vec::with_capacity(table_count(bindings));
    for set in 0..table_count(bindings) {
        let layout_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .filter(|decl| decl.set as usize == set)
            .map(|decl| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(decl.binding)
                    .descriptor_type(descriptor_type(decl.kind))
                    .descriptor_count(1)
                    .stage_flags(stage_flags(stage))
                    .build()
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
        match unsafe { device.create_descriptor_set_layout(&create_info, None) } {
            Ok(layout) => layouts.push(layout),
            Err(e) => {
                destroy_set_layouts(device, &layouts);
                return Err(RenderError::Api(e));
            }
        }
    }
    Ok(layouts)
}

pub(super) fn destroy_set_layouts(device: &Device, layouts: &[vk::DescriptorSetLayout]) {
    for &layout in layouts {
        unsafe { device.destroy_descriptor_set_layout(layout, None) };
    }
}

/// Descriptor pool with individually freeable sets
#[derive(Debug)]
pub struct VulkanArena {
    pool: vk::DescriptorPool,
}

impl VulkanArena {
    pub(super) fn new(device: &Device, capacity: &ArenaConfig) -> RenderResult<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: capacity.samplers,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: capacity.sampled_images,
            },
        ];
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(capacity.max_tables)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { device.create_descriptor_pool(&create_info, None) }.map_err(RenderError::Api)?;
        Ok(Self { pool })
    }

    /// Allocate one set per layout; `None` when the pool has no room left
    pub(super) fn allocate(&self, device: &Device, layouts: &[vk::DescriptorSetLayout]) -> Option<Vec<vk::DescriptorSet>> {
        if layouts.is_empty() {
            return Some(Vec::new());
        }
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);
        match unsafe { device.allocate_descriptor_sets(&allocate_info) } {
            Ok(sets) => Some(sets),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => None,
            Err(e) => {
                log::error!("Descriptor set allocation failed: {:?}", e);
                None
            }
        }
    }

    pub(super) fn free(&self, device: &Device, sets: &[vk::DescriptorSet]) {
        if sets.is_empty() {
            return;
        }
        if let Err(e) = unsafe { device.free_descriptor_sets(self.pool, sets) } {
            log::warn!("Failed to free {} descriptor sets: {:?}", sets.len(), e);
        }
    }

    pub(super) fn destroy(self, device: &Device) {
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
    }
}

/// Point content image and sampler bindings of `sets` at a texture view
pub(super) fn write_bindings(
    device: &Device,
    view: vk::ImageView,
    sampler: vk::Sampler,
    writes: &[(vk::DescriptorSet, u32, BindingKind)],
) {
    let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = writes
        .iter()
        .map(|&(_, _, kind)| match kind {
            BindingKind::SampledImage => [vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }],
            BindingKind::Sampler => [vk::DescriptorImageInfo {
                sampler,
                image_view: vk::ImageView::null(),
                image_layout: vk::ImageLayout::UNDEFINED,
            }],
        })
        .collect();

    let descriptor_writes: Vec<vk::WriteDescriptorSet> = writes
        .iter()
        .zip(&image_infos)
        .map(|(&(set, binding, kind), info)| {
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(binding)
                .dst_array_element(0)
                .descriptor_type(descriptor_type(kind))
                .image_info(info)
                .build()
        })
        .collect();

    if !descriptor_writes.is_empty() {
        unsafe { device.update_descriptor_sets(&descriptor_writes, &[]) };
    }
}
