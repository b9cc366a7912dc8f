// SPDX-License-Identifier: CEPL-1.0
//! Three-phase loading of Vulkan entry points.
//!
//! 1. [`IcdApi::load`]: instance-independent entry points.
//! 2. [`IcdApi::load_instance`]: entry points that need a `VkInstance`.
//! 3. [`InstanceApi::load_device`]: entry points that need a `VkDevice`,
//!    exposed through the [`Driver`] capability set.

use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::info;

use crate::driver::Driver;

pub struct IcdApi {
    entry: Entry,
}

impl IcdApi {
    /// Entry points of the Vulkan loader this binary is linked against.
    pub fn load() -> Self {
        Self {
            entry: Entry::linked(),
        }
    }

    pub unsafe fn enumerate_layers(&self) -> VkResult<Vec<vk::LayerProperties>> {
        self.entry.enumerate_instance_layer_properties()
    }

    pub unsafe fn enumerate_instance_extensions(&self) -> VkResult<Vec<vk::ExtensionProperties>> {
        self.entry.enumerate_instance_extension_properties(None)
    }

    pub unsafe fn create_instance(&self, info: &vk::InstanceCreateInfo<'_>) -> VkResult<Instance> {
        self.entry.create_instance(info, None)
    }

    /// Takes ownership of `instance`; it is destroyed when the returned
    /// table is dropped.
    pub fn load_instance(self, instance: Instance) -> InstanceApi {
        let surface_fns = surface::Instance::new(&self.entry, &instance);
        InstanceApi {
            entry: self.entry,
            instance,
            surface_fns,
            surface: vk::SurfaceKHR::null(),
        }
    }
}

pub struct InstanceApi {
    entry: Entry,
    instance: Instance,
    surface_fns: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl InstanceApi {
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Creates the presentation surface for a native window. The surface is
    /// owned by this table.
    pub unsafe fn create_surface(
        &mut self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<vk::SurfaceKHR> {
        let surface = ash_window::create_surface(&self.entry, &self.instance, display, window, None)
            .context("create_surface")?;
        self.surface = surface;
        Ok(surface)
    }

    pub unsafe fn surface_support(
        &self,
        phys: vk::PhysicalDevice,
        queue_family: u32,
    ) -> VkResult<bool> {
        self.surface_fns
            .get_physical_device_surface_support(phys, queue_family, self.surface)
    }

    /// Takes ownership of `device`. It is destroyed through
    /// [`Driver::destroy_device`], never implicitly.
    pub fn load_device(self, device: ash::Device) -> AshDriver {
        let swapchain_fns = swapchain::Device::new(&self.instance, &device);
        AshDriver {
            device,
            swapchain_fns,
            instance: self,
        }
    }
}

impl Drop for InstanceApi {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_fns.destroy_surface(self.surface, None);
                self.surface = vk::SurfaceKHR::null();
            }
            self.instance.destroy_instance(None);
        }
        info!("vulkan instance destroyed");
    }
}

/// [`Driver`] backed by `ash` function tables.
pub struct AshDriver {
    device: ash::Device,
    swapchain_fns: swapchain::Device,
    // Dropped last: surface and instance outlive the device.
    instance: InstanceApi,
}

impl AshDriver {
    pub fn instance_api(&self) -> &InstanceApi {
        &self.instance
    }

    pub unsafe fn device_queue(&self, queue_family: u32) -> vk::Queue {
        self.device.get_device_queue(queue_family, 0)
    }
}

impl Driver for AshDriver {
    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        self.device.device_wait_idle()
    }

    unsafe fn surface_capabilities(
        &self,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        self.instance
            .surface_fns
            .get_physical_device_surface_capabilities(phys, surface)
    }

    unsafe fn surface_formats(
        &self,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        self.instance
            .surface_fns
            .get_physical_device_surface_formats(phys, surface)
    }

    unsafe fn surface_present_modes(
        &self,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        self.instance
            .surface_fns
            .get_physical_device_surface_present_modes(phys, surface)
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        self.swapchain_fns.create_swapchain(info, None)
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.swapchain_fns.destroy_swapchain(swapchain, None);
    }

    unsafe fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.swapchain_fns.get_swapchain_images(swapchain)
    }

    unsafe fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        self.device.create_image_view(info, None)
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        self.device.destroy_image_view(view, None);
    }

    unsafe fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass> {
        self.device.create_render_pass(info, None)
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.device.destroy_render_pass(render_pass, None);
    }

    unsafe fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        self.device.create_framebuffer(info, None)
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.device.destroy_framebuffer(framebuffer, None);
    }

    unsafe fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        self.device.create_pipeline_layout(info, None)
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.device.destroy_pipeline_layout(layout, None);
    }

    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        match self.device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(info),
            None,
        ) {
            Ok(p) => Ok(p[0]),
            Err((_, err)) => Err(err),
        }
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.device.destroy_pipeline(pipeline, None);
    }

    unsafe fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            p_code: code.as_ptr(),
            code_size: code.len() * 4,
            ..Default::default()
        };
        self.device.create_shader_module(&info, None)
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.device.destroy_shader_module(module, None);
    }

    unsafe fn create_command_pool(&self, queue_family: u32) -> VkResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            ..Default::default()
        };
        self.device.create_command_pool(&info, None)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.device.destroy_command_pool(pool, None);
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        self.device.allocate_command_buffers(info)
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        self.device.free_command_buffers(pool, buffers);
    }

    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        self.device.begin_command_buffer(cmd, info)
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    ) {
        self.device.cmd_begin_render_pass(cmd, info, contents);
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.device.cmd_bind_pipeline(cmd, bind_point, pipeline);
    }

    unsafe fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.device
            .cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance);
    }

    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.device.cmd_end_render_pass(cmd);
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.device.end_command_buffer(cmd)
    }

    unsafe fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        self.device
            .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.device.destroy_semaphore(semaphore, None);
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        self.swapchain_fns
            .acquire_next_image(swapchain, timeout_ns, semaphore, vk::Fence::null())
    }

    unsafe fn queue_submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo<'_>]) -> VkResult<()> {
        self.device.queue_submit(queue, submits, vk::Fence::null())
    }

    unsafe fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR<'_>) -> VkResult<bool> {
        self.swapchain_fns.queue_present(queue, info)
    }

    unsafe fn destroy_device(&self) {
        self.device.destroy_device(None);
        info!("logical device destroyed");
    }
}
