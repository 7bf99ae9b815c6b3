//! [`GpuBackend`] implementation on a Vulkan device

use std::ffi::CStr;
use std::os::unix::io::RawFd;

use ash::vk;

use super::context::{LogicalDevice, PhysicalDeviceInfo, PresentationSurface, VulkanInstance};
use super::descriptor::{self, VulkanArena};
use super::pipeline::{VulkanPipeline, VulkanShader, PUSH_CONSTANT_STAGES};
use super::swapchain::Swapchain;
use super::sync;
use super::texture::VulkanTexture;
use super::SurfaceProvider;
use crate::config::{ArenaConfig, EngineConfig};
use crate::foundation::geometry::{Extent, Rect};
use crate::render::backend::{
    BackendResult, GpuBackend, PipelineStage, ShaderSource, Submission, TableWrite, WaitStage,
};
use crate::render::error::{RenderError, RenderResult};
use crate::render::types::{clip_to, CapturedPixels, PushConstants};

/// Vulkan device presenting to a window-system surface
///
/// Fields drop in declaration order: the swapchain before the device, the
/// device before the surface and the surface before the instance.
pub struct VulkanBackend {
    sampler: vk::Sampler,
    command_pool: vk::CommandPool,
    swapchain: Swapchain,
    device: LogicalDevice,
    physical: PhysicalDeviceInfo,
    surface: PresentationSurface,
    instance: VulkanInstance,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("device", &self.device_name())
            .field("surface", &self.surface.surface)
            .field("extent", &self.swapchain.extent())
            .field("images", &self.swapchain.image_count())
            .finish_non_exhaustive()
    }
}

impl VulkanBackend {
    /// Bring up instance, device and swapchain for the provider's surface
    pub fn new(config: &EngineConfig, provider: &dyn SurfaceProvider) -> RenderResult<Self> {
        config.validate()?;
        let instance = VulkanInstance::new(provider, config.validation_enabled())?;
        let surface = PresentationSurface::new(&instance, provider)?;
        let physical = PhysicalDeviceInfo::select(&instance.instance, &surface, provider, config.gpu_index)?;
        let device = LogicalDevice::new(&instance.instance, &physical)?;
        let swapchain = Swapchain::new(
            &physical,
            &device,
            &surface,
            provider.extent(),
            config.preferred_image_count,
            config.present_mode,
        )?;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);
        let sampler = unsafe { device.device.create_sampler(&sampler_info, None) }.map_err(RenderError::Api)?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = match unsafe { device.device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.device.destroy_sampler(sampler, None) };
                return Err(RenderError::Api(e));
            }
        };

        let backend = Self {
            sampler,
            command_pool,
            swapchain,
            device,
            physical,
            surface,
            instance,
        };
        log::info!("Vulkan backend ready: {:?}", backend);
        Ok(backend)
    }

    /// Name of the selected GPU
    pub fn device_name(&self) -> String {
        // SAFETY: device_name is a NUL-terminated fixed array
        unsafe { CStr::from_ptr(self.physical.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Raw instance, for the window-system layer's interop setup
    pub const fn raw_instance(&self) -> &ash::Instance {
        &self.instance.instance
    }

    /// Raw logical device, for importing exported handles on the capture side
    pub const fn raw_device(&self) -> &ash::Device {
        &self.device.device
    }

    /// Export a semaphore created as exportable, for the capture context to wait on or signal
    pub fn export_semaphore_fd(&self, semaphore: &vk::Semaphore) -> RenderResult<RawFd> {
        sync::export_semaphore_fd(&self.device.semaphore_fd, *semaphore)
    }

    /// Record and run a command buffer to completion on the graphics queue
    fn one_shot(&self, record: impl FnOnce(vk::CommandBuffer)) -> RenderResult<()> {
        let device = &self.device.device;
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.command_pool)
            .command_buffer_count(1);
        let commands = unsafe { device.allocate_command_buffers(&allocate_info) }
            .map_err(RenderError::Api)?
            .first()
            .copied()
            .ok_or_else(|| RenderError::invalid("no command buffer allocated"))?;

        let result = (|| {
            let begin_info =
                vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(commands, &begin_info) }?;
            record(commands);
            unsafe { device.end_command_buffer(commands) }?;

            let command_buffers = [commands];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            unsafe {
                device.queue_submit(self.device.graphics_queue, &[submit_info.build()], vk::Fence::null())?;
                device.queue_wait_idle(self.device.graphics_queue)
            }
        })();

        unsafe { device.free_command_buffers(self.command_pool, &[commands]) };
        result.map_err(RenderError::Api)
    }
}

const fn wait_stage_flags(stage: WaitStage) -> vk::PipelineStageFlags {
    match stage {
        WaitStage::ColorOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        WaitStage::AllCommands => vk::PipelineStageFlags::ALL_COMMANDS,
    }
}

impl GpuBackend for VulkanBackend {
    type Texture = VulkanTexture;
    type Arena = VulkanArena;
    type BindingTable = vk::DescriptorSet;
    type SetLayout = vk::DescriptorSetLayout;
    type Shader = VulkanShader;
    type Pipeline = VulkanPipeline;
    type CommandList = vk::CommandBuffer;
    type Fence = vk::Fence;
    type Semaphore = vk::Semaphore;

    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn output_extent(&self) -> Extent {
        self.swapchain.extent()
    }

    fn create_texture(&mut self, extent: Extent) -> BackendResult<VulkanTexture> {
        if extent.is_empty() {
            return Err(RenderError::invalid("zero-sized texture"));
        }
        let device = self.device.device.clone();
        let texture = VulkanTexture::new(&device, &self.physical, extent)?;

        // Textures are always sampleable, even before their first upload
        let transition = self.one_shot(|commands| {
            texture.record_transition(
                &device,
                commands,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        });
        match transition {
            Ok(()) => {
                log::trace!("Created {}x{} texture", extent.width, extent.height);
                Ok(texture)
            }
            Err(e) => {
                texture.destroy(&device);
                Err(e)
            }
        }
    }

    fn write_texture(
        &mut self,
        commands: vk::CommandBuffer,
        texture: &mut VulkanTexture,
        pixels: &CapturedPixels,
        regions: &[Rect],
    ) -> BackendResult<()> {
        texture.record_upload(&self.device.device, commands, pixels, regions)
    }

    fn destroy_texture(&mut self, texture: VulkanTexture) {
        texture.destroy(&self.device.device);
    }

    fn create_shader(
        &mut self,
        source: &ShaderSource<'_>,
    ) -> BackendResult<(VulkanShader, Vec<vk::DescriptorSetLayout>)> {
        let device = &self.device.device;
        let shader = VulkanShader::new(device, source.stage, source.code)?;
        match descriptor::create_set_layouts(device, source.stage, source.bindings) {
            Ok(layouts) => {
                log::debug!("Loaded {:?} shader {} ({} tables)", source.stage, source.name, layouts.len());
                Ok((shader, layouts))
            }
            Err(e) => {
                shader.destroy(device);
                Err(e)
            }
        }
    }

    fn destroy_shader(&mut self, shader: VulkanShader, set_layouts: Vec<vk::DescriptorSetLayout>) {
        descriptor::destroy_set_layouts(&self.device.device, &set_layouts);
        shader.destroy(&self.device.device);
    }

    fn create_pipeline(&mut self, stages: &[PipelineStage<'_, Self>]) -> BackendResult<VulkanPipeline> {
        let shaders: Vec<&VulkanShader> = stages.iter().map(|stage| stage.shader).collect();
        let set_layouts: Vec<vk::DescriptorSetLayout> = stages
            .iter()
            .flat_map(|stage| stage.set_layouts.iter().copied())
            .collect();
        VulkanPipeline::new(&self.device.device, self.swapchain.render_pass(), &shaders, &set_layouts)
    }

    fn destroy_pipeline(&mut self, pipeline: VulkanPipeline) {
        pipeline.destroy(&self.device.device);
    }

    fn create_arena(&mut self, capacity: &ArenaConfig) -> BackendResult<VulkanArena> {
        VulkanArena::new(&self.device.device, capacity)
    }

    fn allocate_tables(
        &mut self,
        arena: &mut VulkanArena,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Option<Vec<vk::DescriptorSet>> {
        arena.allocate(&self.device.device, layouts)
    }

    fn free_tables(&mut self, arena: &mut VulkanArena, tables: &[vk::DescriptorSet]) {
        arena.free(&self.device.device, tables);
    }

    fn destroy_arena(&mut self, arena: VulkanArena) {
        arena.destroy(&self.device.device);
    }

    fn write_content_bindings(&mut self, texture: &VulkanTexture, writes: &[TableWrite<vk::DescriptorSet>]) {
        let writes: Vec<_> = writes
            .iter()
            .map(|write| (write.table, write.binding, write.kind))
            .collect();
        descriptor::write_bindings(&self.device.device, texture.view(), self.sampler, &writes);
    }

    fn allocate_command_list(&mut self) -> BackendResult<vk::CommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.command_pool)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.device.allocate_command_buffers(&allocate_info) }.map_err(RenderError::Api)?;
        buffers
            .first()
            .copied()
            .ok_or_else(|| RenderError::invalid("no command buffer allocated"))
    }

    fn free_command_list(&mut self, commands: vk::CommandBuffer) {
        unsafe { self.device.device.free_command_buffers(self.command_pool, &[commands]) };
    }

    fn begin_commands(&mut self, commands: vk::CommandBuffer) -> BackendResult<()> {
        let device = &self.device.device;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .reset_command_buffer(commands, vk::CommandBufferResetFlags::empty())
                .and_then(|()| device.begin_command_buffer(commands, &begin_info))
        }
        .map_err(RenderError::Api)
    }

    fn end_commands(&mut self, commands: vk::CommandBuffer) -> BackendResult<()> {
        unsafe { self.device.device.end_command_buffer(commands) }.map_err(RenderError::Api)
    }

    fn begin_output_pass(&mut self, commands: vk::CommandBuffer, image_index: u32, clear_color: [f32; 4]) {
        let Some(framebuffer) = self.swapchain.framebuffer(image_index) else {
            log::error!("No framebuffer for presentation image {}", image_index);
            return;
        };
        let extent = self.swapchain.vk_extent();
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.swapchain.render_pass())
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let device = &self.device.device;
        unsafe {
            device.cmd_begin_render_pass(commands, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(commands, 0, &[viewport]);
            device.cmd_set_scissor(commands, 0, &[render_area]);
        }
    }

    fn end_output_pass(&mut self, commands: vk::CommandBuffer) {
        unsafe { self.device.device.cmd_end_render_pass(commands) };
    }

    fn bind_pipeline(&mut self, commands: vk::CommandBuffer, pipeline: &VulkanPipeline) {
        unsafe {
            self.device
                .device
                .cmd_bind_pipeline(commands, vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
        }
    }

    fn bind_tables(
        &mut self,
        commands: vk::CommandBuffer,
        pipeline: &VulkanPipeline,
        first_table: u32,
        tables: &[vk::DescriptorSet],
    ) {
        if tables.is_empty() {
            return;
        }
        unsafe {
            self.device.device.cmd_bind_descriptor_sets(
                commands,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout(),
                first_table,
                tables,
                &[],
            );
        }
    }

    fn push_constants(&mut self, commands: vk::CommandBuffer, pipeline: &VulkanPipeline, constants: &PushConstants) {
        unsafe {
            self.device.device.cmd_push_constants(
                commands,
                pipeline.layout(),
                PUSH_CONSTANT_STAGES,
                0,
                constants.as_bytes(),
            );
        }
    }

    fn set_scissor(&mut self, commands: vk::CommandBuffer, rect: Rect) {
        let clipped = clip_to(rect, self.swapchain.extent()).unwrap_or_default();
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: clipped.x,
                y: clipped.y,
            },
            extent: vk::Extent2D {
                width: clipped.width,
                height: clipped.height,
            },
        };
        unsafe { self.device.device.cmd_set_scissor(commands, 0, &[scissor]) };
    }

    fn draw_point(&mut self, commands: vk::CommandBuffer) {
        unsafe { self.device.device.cmd_draw(commands, 1, 1, 0, 0) };
    }

    fn create_fence(&mut self, signaled: bool) -> BackendResult<vk::Fence> {
        sync::create_fence(&self.device.device, signaled)
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        unsafe { self.device.device.destroy_fence(fence, None) };
    }

    fn create_semaphore(&mut self, exportable: bool) -> BackendResult<vk::Semaphore> {
        sync::create_semaphore(&self.device.device, exportable)
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        unsafe { self.device.device.destroy_semaphore(semaphore, None) };
    }

    fn poll_fence(&mut self, fence: &vk::Fence) -> BackendResult<bool> {
        sync::poll_fence(&self.device.device, *fence)
    }

    fn reset_fence(&mut self, fence: &vk::Fence) -> BackendResult<()> {
        unsafe { self.device.device.reset_fences(&[*fence]) }.map_err(RenderError::Api)
    }

    fn acquire_image(&mut self, signal: &vk::Semaphore) -> BackendResult<u32> {
        let (image_index, suboptimal) = unsafe {
            self.swapchain
                .loader()
                .acquire_next_image(self.swapchain.handle(), u64::MAX, *signal, vk::Fence::null())
        }
        .map_err(RenderError::Api)?;
        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }
        Ok(image_index)
    }

    fn submit(&mut self, submission: &Submission<'_, Self>) -> BackendResult<()> {
        let wait_semaphores: Vec<vk::Semaphore> = submission.waits.iter().map(|(semaphore, _)| **semaphore).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> =
            submission.waits.iter().map(|(_, stage)| wait_stage_flags(*stage)).collect();
        let signal_semaphores: Vec<vk::Semaphore> = submission.signals.iter().map(|semaphore| **semaphore).collect();

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(submission.commands)
            .signal_semaphores(&signal_semaphores);
        let fence = submission.fence.copied().unwrap_or_else(vk::Fence::null);

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info.build()], fence)
        }
        .map_err(RenderError::Api)
    }

    fn present(&mut self, image_index: u32, wait: &vk::Semaphore) -> BackendResult<()> {
        let wait_semaphores = [*wait];
        let swapchains = [self.swapchain.handle()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let suboptimal = unsafe {
            self.swapchain
                .loader()
                .queue_present(self.device.present_queue, &present_info)
        }
        .map_err(RenderError::Api)?;
        if suboptimal {
            log::debug!("Presented to a suboptimal swapchain");
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        unsafe { self.device.device.device_wait_idle() }.map_err(RenderError::Api)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device.device_wait_idle() {
                log::warn!("device_wait_idle failed during teardown: {:?}", e);
            }
            self.device.device.destroy_command_pool(self.command_pool, None);
            self.device.device.destroy_sampler(self.sampler, None);
        }
        log::debug!("Vulkan backend destroyed");
    }
}
