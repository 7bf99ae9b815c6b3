//! Vulkan backend
//!
//! Drives a real device through ash. The window-system layer plugs in
//! through [`SurfaceProvider`]; everything else (instance, device,
//! swapchain, descriptor arenas, pipelines, textures and synchronization)
//! lives here.

use std::ffi::CStr;

use ash::{vk, Entry, Instance};

use crate::foundation::geometry::Extent;
use crate::render::error::RenderResult;

mod backend;
mod context;
mod descriptor;
mod pipeline;
mod swapchain;
mod sync;
mod texture;

pub use backend::VulkanBackend;
pub use descriptor::VulkanArena;
pub use pipeline::{VulkanPipeline, VulkanShader};
pub use texture::VulkanTexture;

/// Presentation target supplied by the window-system layer
pub trait SurfaceProvider {
    /// Instance extensions the surface needs, besides `VK_KHR_surface`
    fn required_instance_extensions(&self) -> Vec<&'static CStr>;

    /// Create the presentation surface on `instance`
    fn create_surface(&self, entry: &Entry, instance: &Instance) -> RenderResult<vk::SurfaceKHR>;

    /// Current size of the output
    fn extent(&self) -> Extent;

    /// Whether a queue family can present to the window system's display
    ///
    /// Checked in addition to the surface support query. Providers with no
    /// extra constraint keep the default.
    fn supports_presentation(
        &self,
        _instance: &Instance,
        _physical_device: vk::PhysicalDevice,
        _queue_family: u32,
    ) -> bool {
        true
    }
}
