//! Fences and semaphores, including semaphores shared with the capture context

use std::os::unix::io::RawFd;

use ash::extensions::khr::ExternalSemaphoreFd;
use ash::{vk, Device};

use crate::render::error::{RenderError, RenderResult};

pub(super) fn create_fence(device: &Device, signaled: bool) -> RenderResult<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let create_info = vk::FenceCreateInfo::builder().flags(flags);
    unsafe { device.create_fence(&create_info, None) }.map_err(RenderError::Api)
}

/// Create a semaphore; exportable ones can be handed out as opaque file descriptors
pub(super) fn create_semaphore(device: &Device, exportable: bool) -> RenderResult<vk::Semaphore> {
    let mut export_info =
        vk::ExportSemaphoreCreateInfo::builder().handle_types(vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD);
    let mut create_info = vk::SemaphoreCreateInfo::builder();
    if exportable {
        create_info = create_info.push_next(&mut export_info);
    }
    unsafe { device.create_semaphore(&create_info, None) }.map_err(RenderError::Api)
}

/// Non-blocking fence query
pub(super) fn poll_fence(device: &Device, fence: vk::Fence) -> RenderResult<bool> {
    match unsafe { device.wait_for_fences(&[fence], true, 0) } {
        Ok(()) => Ok(true),
        Err(vk::Result::TIMEOUT) => Ok(false),
        Err(e) => Err(RenderError::Api(e)),
    }
}

/// Export a semaphore created with `exportable` as an opaque fd
pub(super) fn export_semaphore_fd(loader: &ExternalSemaphoreFd, semaphore: vk::Semaphore) -> RenderResult<RawFd> {
    let get_info = vk::SemaphoreGetFdInfoKHR::builder()
        .semaphore(semaphore)
        .handle_type(vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD);
    unsafe { loader.get_semaphore_fd(&get_info) }.map_err(RenderError::Api)
}
