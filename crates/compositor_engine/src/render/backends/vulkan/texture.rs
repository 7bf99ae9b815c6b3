//! Surface textures with a persistently mapped staging buffer

use std::ptr::NonNull;

use ash::{vk, Device};

use super::context::PhysicalDeviceInfo;
use super::swapchain::OUTPUT_FORMAT;
use crate::foundation::geometry::{Extent, Rect};
use crate::render::error::{RenderError, RenderResult};
use crate::render::types::{clip_to, copy_regions, CapturedPixels};

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Device-local image sampled by the surface shaders, fed from host memory
#[derive(Debug)]
pub struct VulkanTexture {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    staging: vk::Buffer,
    staging_memory: vk::DeviceMemory,
    mapped: Option<NonNull<u8>>,
    extent: Extent,
}

impl VulkanTexture {
    /// Create image, view and staging buffer; the image is left undefined
    pub(super) fn new(device: &Device, physical: &PhysicalDeviceInfo, extent: Extent) -> RenderResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(OUTPUT_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        let image = unsafe { device.create_image(&image_info, None) }.map_err(RenderError::Api)?;

        let mut texture = Self {
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            staging: vk::Buffer::null(),
            staging_memory: vk::DeviceMemory::null(),
            mapped: None,
            extent,
        };
        if let Err(e) = texture.allocate(device, physical) {
            texture.destroy(device);
            return Err(e);
        }
        Ok(texture)
    }

    fn allocate(&mut self, device: &Device, physical: &PhysicalDeviceInfo) -> RenderResult<()> {
        let requirements = unsafe { device.get_image_memory_requirements(self.image) };
        let memory_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(
                physical.find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?,
            );
        self.memory = unsafe { device.allocate_memory(&memory_info, None) }.map_err(RenderError::Api)?;
        unsafe { device.bind_image_memory(self.image, self.memory, 0) }.map_err(RenderError::Api)?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(OUTPUT_FORMAT)
            .subresource_range(COLOR_RANGE);
        self.view = unsafe { device.create_image_view(&view_info, None) }.map_err(RenderError::Api)?;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(self.extent.byte_size() as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        self.staging = unsafe { device.create_buffer(&buffer_info, None) }.map_err(RenderError::Api)?;

        let requirements = unsafe { device.get_buffer_memory_requirements(self.staging) };
        let memory_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(physical.find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?);
        self.staging_memory = unsafe { device.allocate_memory(&memory_info, None) }.map_err(RenderError::Api)?;
        unsafe { device.bind_buffer_memory(self.staging, self.staging_memory, 0) }.map_err(RenderError::Api)?;

        let mapped = unsafe {
            device.map_memory(self.staging_memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        }
        .map_err(RenderError::Api)?;
        self.mapped = NonNull::new(mapped.cast::<u8>());
        match self.staging_bytes() {
            Some(bytes) => {
                bytes.fill(0);
                Ok(())
            }
            None => Err(RenderError::Initialization("staging memory mapped to null".to_string())),
        }
    }

    fn staging_bytes(&mut self) -> Option<&mut [u8]> {
        let mapped = self.mapped?;
        // SAFETY: the mapping covers the whole staging buffer, which holds
        // byte_size() bytes, and lives until destroy()
        Some(unsafe { std::slice::from_raw_parts_mut(mapped.as_ptr(), self.extent.byte_size()) })
    }

    /// Size in pixels
    pub const fn extent(&self) -> Extent {
        self.extent
    }

    /// View bound as the content image
    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Record a layout transition of the whole image
    pub(super) fn record_transition(
        &self,
        device: &Device,
        commands: vk::CommandBuffer,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) {
        let (src_access, src_stage) = match from {
            vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::GEOMETRY_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            _ => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        };
        let (dst_access, dst_stage) = match to {
            vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
            _ => (
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::GEOMETRY_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
        };

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(from)
            .new_layout(to)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(COLOR_RANGE)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);
        unsafe {
            device.cmd_pipeline_barrier(
                commands,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier.build()],
            );
        }
    }

    /// Stage `regions` of `pixels` and record their copy into the image
    ///
    /// The image is expected in `SHADER_READ_ONLY_OPTIMAL` and returned to it.
    pub(super) fn record_upload(
        &mut self,
        device: &Device,
        commands: vk::CommandBuffer,
        pixels: &CapturedPixels,
        regions: &[Rect],
    ) -> RenderResult<()> {
        if pixels.extent != self.extent || !pixels.is_complete() {
            return Err(RenderError::invalid(format!(
                "captured {}x{} pixels do not match {}x{} texture",
                pixels.extent.width, pixels.extent.height, self.extent.width, self.extent.height
            )));
        }
        let staging = self
            .staging_bytes()
            .ok_or_else(|| RenderError::invalid("texture has no staging memory"))?;
        copy_regions(staging, pixels, regions);

        let copies: Vec<vk::BufferImageCopy> = regions
            .iter()
            .filter_map(|&region| clip_to(region, self.extent))
            .map(|region| {
                let offset = (region.y as u64 * u64::from(self.extent.width) + region.x as u64) * 4;
                vk::BufferImageCopy::builder()
                    .buffer_offset(offset)
                    .buffer_row_length(self.extent.width)
                    .buffer_image_height(self.extent.height)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_offset(vk::Offset3D {
                        x: region.x,
                        y: region.y,
                        z: 0,
                    })
                    .image_extent(vk::Extent3D {
                        width: region.width,
                        height: region.height,
                        depth: 1,
                    })
                    .build()
            })
            .collect();
        if copies.is_empty() {
            return Ok(());
        }

        self.record_transition(
            device,
            commands,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        unsafe {
            device.cmd_copy_buffer_to_image(
                commands,
                self.staging,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &copies,
            );
        }
        self.record_transition(
            device,
            commands,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        Ok(())
    }

    /// Free every handle; the GPU must be done with the texture
    pub(super) fn destroy(self, device: &Device) {
        unsafe {
            if self.mapped.is_some() {
                device.unmap_memory(self.staging_memory);
            }
            device.free_memory(self.staging_memory, None);
            device.destroy_buffer(self.staging, None);
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}
