// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::ffi::CStr;
use tracing::info;

use crate::driver::Driver;

pub const SHADER_ENTRY_POINT: &CStr = c"main";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
}

impl ShaderStage {
    pub fn create_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: self.stage,
            module: self.module,
            p_name: SHADER_ENTRY_POINT.as_ptr(),
            ..Default::default()
        }
    }
}

/// Handles established once at startup and shared by every swapchain
/// generation.
#[derive(Debug)]
pub struct DeviceContext {
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub queue_family: u32,
    pub queue: vk::Queue,
    pub command_pool: vk::CommandPool,
    pub vertex: ShaderStage,
    pub fragment: ShaderStage,
    device_live: bool,
}

impl DeviceContext {
    /// A context for a freshly created logical device; the remaining
    /// handles start out null and are filled in by the caller.
    pub fn new(physical_device: vk::PhysicalDevice, surface: vk::SurfaceKHR, queue_family: u32) -> Self {
        Self {
            physical_device,
            surface,
            queue_family,
            queue: vk::Queue::null(),
            command_pool: vk::CommandPool::null(),
            vertex: ShaderStage {
                stage: vk::ShaderStageFlags::VERTEX,
                module: vk::ShaderModule::null(),
            },
            fragment: ShaderStage {
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: vk::ShaderModule::null(),
            },
            device_live: true,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.device_live
            && self.queue != vk::Queue::null()
            && self.command_pool != vk::CommandPool::null()
            && self.vertex.module != vk::ShaderModule::null()
            && self.fragment.module != vk::ShaderModule::null()
    }

    pub fn shader_stages(&self) -> [vk::PipelineShaderStageCreateInfo<'static>; 2] {
        [self.vertex.create_info(), self.fragment.create_info()]
    }

    /// Releases the pool, the shader modules and finally the logical device.
    /// Every swapchain-era object must already be gone. Safe to call twice.
    pub unsafe fn teardown<D: Driver + ?Sized>(&mut self, driver: &D) {
        if !self.device_live {
            return;
        }
        if self.command_pool != vk::CommandPool::null() {
            driver.destroy_command_pool(self.command_pool);
            self.command_pool = vk::CommandPool::null();
        }
        for stage in [&mut self.vertex, &mut self.fragment] {
            if stage.module != vk::ShaderModule::null() {
                driver.destroy_shader_module(stage.module);
                stage.module = vk::ShaderModule::null();
            }
        }
        self.queue = vk::Queue::null();
        driver.destroy_device();
        self.device_live = false;
        info!("device context torn down");
    }
}
