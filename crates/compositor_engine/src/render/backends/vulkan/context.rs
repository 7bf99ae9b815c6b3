//! Instance, physical device and logical device setup

use std::collections::BTreeSet;
use std::ffi::{CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{ExternalMemoryFd, ExternalSemaphoreFd, Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};

use super::SurfaceProvider;
use crate::render::error::{RenderError, RenderResult};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

fn has_extension(available: &[vk::ExtensionProperties], name: &CStr) -> bool {
    available.iter().any(|properties| {
        // SAFETY: extension_name is a NUL-terminated fixed array filled by the driver
        let available_name = unsafe { CStr::from_ptr(properties.extension_name.as_ptr()) };
        available_name == name
    })
}

/// Instance with an optional validation messenger
pub(super) struct VulkanInstance {
    pub entry: Entry,
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    pub fn new(provider: &dyn SurfaceProvider, enable_validation: bool) -> RenderResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::Initialization(format!("Failed to load Vulkan: {e}")))?;

        let mut required: Vec<&CStr> = vec![
            Surface::name(),
            vk::KhrGetPhysicalDeviceProperties2Fn::name(),
            vk::KhrExternalMemoryCapabilitiesFn::name(),
            vk::KhrExternalSemaphoreCapabilitiesFn::name(),
        ];
        required.extend(provider.required_instance_extensions());

        let available = entry
            .enumerate_instance_extension_properties(None)
            .map_err(RenderError::Api)?;
        if let Some(missing) = required.iter().find(|name| !has_extension(&available, name)) {
            return Err(RenderError::MissingExtension(missing.to_string_lossy().into_owned()));
        }

        let validation = enable_validation && {
            let layers = entry.enumerate_instance_layer_properties().map_err(RenderError::Api)?;
            let found = layers.iter().any(|layer| {
                // SAFETY: layer_name is a NUL-terminated fixed array filled by the loader
                let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                name.to_bytes() == VALIDATION_LAYER.as_bytes()
            });
            if !found {
                log::warn!("Validation requested but {} is not installed", VALIDATION_LAYER);
            }
            found && has_extension(&available, DebugUtils::name())
        };
        if validation {
            required.push(DebugUtils::name());
        }

        let app_name = CString::new("compositor")
            .map_err(|e| RenderError::Initialization(e.to_string()))?;
        let engine_name = CString::new("compositor_engine")
            .map_err(|e| RenderError::Initialization(e.to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let extension_ptrs: Vec<*const std::os::raw::c_char> = required.iter().map(|name| name.as_ptr()).collect();
        let layer_name = CString::new(VALIDATION_LAYER).map_err(|e| RenderError::Initialization(e.to_string()))?;
        let layer_ptrs: Vec<*const std::os::raw::c_char> = if validation {
            vec![layer_name.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);
        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(RenderError::Api)?;

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            match unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(RenderError::Api(e));
                }
            }
        } else {
            None
        };

        log::info!("Vulkan instance created (validation {})", if validation { "on" } else { "off" });
        Ok(Self { entry, instance, debug })
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Presentation surface and its loader
pub(super) struct PresentationSurface {
    pub loader: Surface,
    pub surface: vk::SurfaceKHR,
}

impl PresentationSurface {
    pub fn new(instance: &VulkanInstance, provider: &dyn SurfaceProvider) -> RenderResult<Self> {
        let surface = provider.create_surface(&instance.entry, &instance.instance)?;
        Ok(Self {
            loader: Surface::new(&instance.entry, &instance.instance),
            surface,
        })
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

/// Selected GPU and its queue families
pub(super) struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub graphics_family: u32,
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Device extensions the compositor cannot run without
    pub fn required_extensions() -> [&'static CStr; 5] {
        [
            SwapchainLoader::name(),
            vk::KhrExternalMemoryFn::name(),
            vk::KhrExternalSemaphoreFn::name(),
            ExternalMemoryFd::name(),
            ExternalSemaphoreFd::name(),
        ]
    }

    /// Pick the device at `gpu_index` and check that it can run the compositor
    pub fn select(
        instance: &Instance,
        surface: &PresentationSurface,
        provider: &dyn SurfaceProvider,
        gpu_index: usize,
    ) -> RenderResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }.map_err(RenderError::Api)?;
        for (index, &device) in devices.iter().enumerate() {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            // SAFETY: device_name is a NUL-terminated fixed array
            let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
            log::info!(
                "{} GPU {}: {} (vendor {:#x}, device {:#x}, max push constants {} bytes, max bound sets {})",
                if index == gpu_index { '*' } else { ' ' },
                index,
                name.to_string_lossy(),
                properties.vendor_id,
                properties.device_id,
                properties.limits.max_push_constants_size,
                properties.limits.max_bound_descriptor_sets
            );
        }

        let device = *devices.get(gpu_index).ok_or_else(|| {
            RenderError::Initialization(format!(
                "gpu_index {} exceeds the number of available devices ({})",
                gpu_index,
                devices.len()
            ))
        })?;

        let features = unsafe { instance.get_physical_device_features(device) };
        if features.geometry_shader == vk::FALSE {
            return Err(RenderError::Initialization(
                "Selected GPU does not support geometry shaders".to_string(),
            ));
        }

        let available = unsafe { instance.enumerate_device_extension_properties(device) }.map_err(RenderError::Api)?;
        if let Some(missing) = Self::required_extensions()
            .iter()
            .find(|name| !has_extension(&available, name))
        {
            return Err(RenderError::MissingExtension(missing.to_string_lossy().into_owned()));
        }

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let graphics_family = queue_families
            .iter()
            .position(|family| family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .ok_or_else(|| RenderError::Initialization("No graphics queue family available".to_string()))?
            as u32;

        let mut present_family = None;
        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;
            let surface_support = unsafe {
                surface
                    .loader
                    .get_physical_device_surface_support(device, index, surface.surface)
            }
            .map_err(RenderError::Api)?;
            if family.queue_count > 0 && surface_support && provider.supports_presentation(instance, device, index) {
                present_family = Some(index);
                break;
            }
        }
        let present_family =
            present_family.ok_or_else(|| RenderError::Initialization("No present queue family available".to_string()))?;

        Ok(Self {
            device,
            properties: unsafe { instance.get_physical_device_properties(device) },
            memory_properties: unsafe { instance.get_physical_device_memory_properties(device) },
            graphics_family,
            present_family,
        })
    }

    /// Index of a memory type allowed by `type_filter` with `properties`
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> RenderResult<u32> {
        (0..self.memory_properties.memory_type_count)
            .find(|&i| {
                type_filter & (1 << i) != 0
                    && self.memory_properties.memory_types[i as usize]
                        .property_flags
                        .contains(properties)
            })
            .ok_or_else(|| RenderError::Initialization("Failed to find suitable memory type".to_string()))
    }
}

/// Logical device, its queues and the extension loaders bound to it
pub(super) struct LogicalDevice {
    pub device: Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub graphics_family: u32,
    pub present_family: u32,
    pub swapchain_loader: SwapchainLoader,
    pub semaphore_fd: ExternalSemaphoreFd,
}

impl LogicalDevice {
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> RenderResult<Self> {
        let families: BTreeSet<u32> = [physical.graphics_family, physical.present_family].into_iter().collect();
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_ptrs: Vec<*const std::os::raw::c_char> = PhysicalDeviceInfo::required_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();
        let features = vk::PhysicalDeviceFeatures::builder().geometry_shader(true).build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features);
        let device =
            unsafe { instance.create_device(physical.device, &create_info, None) }.map_err(RenderError::Api)?;

        let graphics_queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical.present_family, 0) };
        log::debug!(
            "Logical device created: graphics family {}, present family {}",
            physical.graphics_family,
            physical.present_family
        );

        Ok(Self {
            swapchain_loader: SwapchainLoader::new(instance, &device),
            semaphore_fd: ExternalSemaphoreFd::new(instance, &device),
            device,
            graphics_queue,
            present_queue,
            graphics_family: physical.graphics_family,
            present_family: physical.present_family,
        })
    }

    /// True when graphics and presentation use different queue families
    pub const fn split_families(&self) -> bool {
        self.graphics_family != self.present_family
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}
