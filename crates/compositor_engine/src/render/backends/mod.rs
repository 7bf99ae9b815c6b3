//! Rendering backend implementations

pub mod headless;
pub mod vulkan;

pub use headless::{HeadlessBackend, HeadlessConfig};
pub use vulkan::{SurfaceProvider, VulkanBackend};
