//! Swapchain, output render pass and framebuffers

use ash::{vk, Device};

use super::context::{LogicalDevice, PhysicalDeviceInfo, PresentationSurface};
use crate::config::PresentModePreference;
use crate::foundation::geometry::Extent;
use crate::render::error::{RenderError, RenderResult};

/// Format of the output images and of every surface texture
pub(super) const OUTPUT_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

const OUTPUT_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

fn present_mode_for(preference: PresentModePreference) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

/// Clamp the requested image count to what the surface allows
pub(super) fn choose_image_count(preferred: u32, capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = preferred.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Surface extent, or the provider's size clamped to the surface limits
pub(super) fn choose_extent(requested: Extent, capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Presentation images with the render pass that draws into them
pub(super) struct Swapchain {
    device: Device,
    loader: ash::extensions::khr::Swapchain,
    handle: vk::SwapchainKHR,
    image_views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
}

impl Swapchain {
    pub fn new(
        physical: &PhysicalDeviceInfo,
        device: &LogicalDevice,
        surface: &PresentationSurface,
        requested: Extent,
        preferred_image_count: u32,
        present_mode: PresentModePreference,
    ) -> RenderResult<Self> {
        let capabilities = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(physical.device, surface.surface)
        }
        .map_err(RenderError::Api)?;

        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(physical.device, surface.surface)
        }
        .map_err(RenderError::Api)?;
        if !formats
            .iter()
            .any(|format| format.format == OUTPUT_FORMAT && format.color_space == OUTPUT_COLOR_SPACE)
        {
            return Err(RenderError::Initialization(format!(
                "Surface does not support {OUTPUT_FORMAT:?} with {OUTPUT_COLOR_SPACE:?}"
            )));
        }

        let modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(physical.device, surface.surface)
        }
        .map_err(RenderError::Api)?;
        let wanted = present_mode_for(present_mode);
        let mode = if modes.contains(&wanted) {
            wanted
        } else {
            log::warn!("Present mode {:?} unavailable, falling back to FIFO", wanted);
            vk::PresentModeKHR::FIFO
        };

        let extent = choose_extent(requested, &capabilities);
        let image_count = choose_image_count(preferred_image_count, &capabilities);

        let families = [device.graphics_family, device.present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(OUTPUT_FORMAT)
            .image_color_space(OUTPUT_COLOR_SPACE)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());
        create_info = if device.split_families() {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let loader = device.swapchain_loader.clone();
        let handle = unsafe { loader.create_swapchain(&create_info, None) }.map_err(RenderError::Api)?;

        // From here on every handle is owned by `swapchain`, whose Drop cleans up partial state
        let mut swapchain = Self {
            device: device.device.clone(),
            loader,
            handle,
            image_views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            extent,
        };

        let images = unsafe { swapchain.loader.get_swapchain_images(handle) }.map_err(RenderError::Api)?;
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(OUTPUT_FORMAT)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { swapchain.device.create_image_view(&view_info, None) }.map_err(RenderError::Api)?;
            swapchain.image_views.push(view);
        }

        swapchain.render_pass = Self::create_render_pass(&swapchain.device)?;
        for &view in &swapchain.image_views {
            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(swapchain.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer =
                unsafe { swapchain.device.create_framebuffer(&framebuffer_info, None) }.map_err(RenderError::Api)?;
            swapchain.framebuffers.push(framebuffer);
        }

        log::info!(
            "Swapchain created: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            images.len(),
            mode
        );
        Ok(swapchain)
    }

    fn create_render_pass(device: &Device) -> RenderResult<vk::RenderPass> {
        let attachments = [vk::AttachmentDescription::builder()
            .format(OUTPUT_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build()];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build()];

        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        unsafe { device.create_render_pass(&create_info, None) }.map_err(RenderError::Api)
    }

    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub const fn loader(&self) -> &ash::extensions::khr::Swapchain {
        &self.loader
    }

    pub const fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    pub fn image_count(&self) -> usize {
        self.image_views.len()
    }

    pub const fn extent(&self) -> Extent {
        Extent::new(self.extent.width, self.extent.height)
    }

    pub const fn vk_extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                self.device.destroy_render_pass(self.render_pass, None);
            }
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}
