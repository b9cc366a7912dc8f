// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface and device creation for a native window.

use anyhow::{anyhow, Context, Result};
use ash::khr::swapchain;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, info};

use crate::context::DeviceContext;
use crate::driver::Driver;
use crate::loader::{AshDriver, IcdApi, InstanceApi};
use crate::shader::{load_spirv, ShaderPaths};

const APP_NAME: &std::ffi::CStr = c"trigon";

/// Brings up everything that lives for the whole run: instance, surface,
/// logical device, queue, shader modules and command pool.
///
/// The window must outlive the returned driver.
pub fn bootstrap<W>(window: &W, shaders: &ShaderPaths) -> Result<(AshDriver, DeviceContext)>
where
    W: HasWindowHandle + HasDisplayHandle + ?Sized,
{
    let display = window
        .display_handle()
        .map_err(|e| anyhow!("{e}"))?
        .as_raw();
    let handle = window
        .window_handle()
        .map_err(|e| anyhow!("{e}"))?
        .as_raw();

    // Fail on missing bytecode before any GPU object exists.
    let vertex = load_spirv(&shaders.vertex)?;
    let fragment = load_spirv(&shaders.fragment)?;

    unsafe {
        let icd = IcdApi::load();
        log_instance_support(&icd)?;
        let instance = create_instance(&icd, display)?;
        let mut api = icd.load_instance(instance);
        info!("vulkan instance created");

        // Present support is queried against the surface, so it comes first.
        api.create_surface(display, handle)?;
        info!("presentation surface created");

        let (phys, queue_family) = pick_device_and_queue(&api)?;
        let device = create_device(&api, phys, queue_family)?;
        let driver = api.load_device(device);
        info!("logical device created (queue family {queue_family})");

        let mut ctx = DeviceContext::new(phys, driver.instance_api().surface(), queue_family);
        if let Err(err) = init_context(&driver, &mut ctx, &vertex, &fragment) {
            ctx.teardown(&driver);
            return Err(err);
        }
        Ok((driver, ctx))
    }
}

unsafe fn log_instance_support(icd: &IcdApi) -> Result<()> {
    let layers = icd
        .enumerate_layers()
        .context("enumerate_instance_layer_properties")?;
    info!("{} instance layer(s) available", layers.len());
    for layer in &layers {
        debug!(
            "  layer {:?}",
            layer.layer_name_as_c_str().unwrap_or(c"<invalid>")
        );
    }

    let exts = icd
        .enumerate_instance_extensions()
        .context("enumerate_instance_extension_properties")?;
    info!("{} instance extension(s) available", exts.len());
    for ext in &exts {
        debug!(
            "  extension {:?}",
            ext.extension_name_as_c_str().unwrap_or(c"<invalid>")
        );
    }
    Ok(())
}

unsafe fn create_instance(icd: &IcdApi, display: RawDisplayHandle) -> Result<ash::Instance> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let ext_slice = ash_window::enumerate_required_extensions(display)
        .context("enumerate_required_extensions")?;

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_slice.len() as u32,
        pp_enabled_extension_names: ext_slice.as_ptr(),
        ..Default::default()
    };

    icd.create_instance(&create_info).context("create_instance")
}

/// First device with a queue family that does both graphics and present.
unsafe fn pick_device_and_queue(api: &InstanceApi) -> Result<(vk::PhysicalDevice, u32)> {
    let instance = api.instance();
    let devices = instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?;
    info!("{} physical device(s) found", devices.len());

    for phys in devices {
        let props = instance.get_physical_device_properties(phys);
        info!(
            "device {:?}: type {:?}, api {}.{}.{}",
            props.device_name_as_c_str().unwrap_or(c"<invalid>"),
            props.device_type,
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            vk::api_version_patch(props.api_version),
        );

        let exts = instance
            .enumerate_device_extension_properties(phys)
            .context("enumerate_device_extension_properties")?;
        debug!("  {} device extension(s)", exts.len());
        let has_swapchain = exts
            .iter()
            .any(|e| e.extension_name_as_c_str().map_or(false, |n| n == swapchain::NAME));
        if !has_swapchain {
            info!("  no {:?}, skipping", swapchain::NAME);
            continue;
        }

        let qprops = instance.get_physical_device_queue_family_properties(phys);
        for (i, q) in qprops.iter().enumerate() {
            let present = api.surface_support(phys, i as u32).unwrap_or(false);
            debug!(
                "  queue family {i}: {:?} x{}, present {present}",
                q.queue_flags, q.queue_count
            );
            if q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present {
                return Ok((phys, i as u32));
            }
        }
    }
    Err(anyhow!("no suitable physical device/queue family"))
}

unsafe fn create_device(
    api: &InstanceApi,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    api.instance()
        .create_device(phys, &dinfo, None)
        .context("create_device")
}

unsafe fn init_context(
    driver: &AshDriver,
    ctx: &mut DeviceContext,
    vertex: &[u32],
    fragment: &[u32],
) -> Result<()> {
    ctx.queue = driver.device_queue(ctx.queue_family);
    ctx.vertex.module = driver
        .create_shader_module(vertex)
        .context("create vertex shader module")?;
    ctx.fragment.module = driver
        .create_shader_module(fragment)
        .context("create fragment shader module")?;
    ctx.command_pool = driver
        .create_command_pool(ctx.queue_family)
        .context("create_command_pool")?;
    info!("shader modules and command pool ready");
    Ok(())
}
