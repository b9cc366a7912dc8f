// SPDX-License-Identifier: CEPL-1.0
//! Windowless GLES 3.1 compute on an EGL device display.

use anyhow::{anyhow, Context, Result};
use glow::HasContext as _;
use tracing::{debug, info};

use glutin::{
    api::egl::{device::Device, display::Display},
    config::{Api, ConfigSurfaceTypes, ConfigTemplateBuilder},
    context::{ContextApi, ContextAttributesBuilder, Version},
    prelude::*,
};

use crate::compile_program;

const NOOP_COMPUTE_SRC: &str = r#"#version 310 es
layout(local_size_x = 1, local_size_y = 1, local_size_z = 1) in;
void main() {
}"#;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComputeLimits {
    pub work_group_count: [i32; 3],
    pub work_group_size: [i32; 3],
    pub invocations: i32,
    pub shared_memory: i32,
}

impl ComputeLimits {
    fn query(gl: &glow::Context) -> Self {
        let mut limits = Self::default();
        unsafe {
            for i in 0..3 {
                limits.work_group_count[i] =
                    gl.get_parameter_indexed_i32(glow::MAX_COMPUTE_WORK_GROUP_COUNT, i as u32);
                limits.work_group_size[i] =
                    gl.get_parameter_indexed_i32(glow::MAX_COMPUTE_WORK_GROUP_SIZE, i as u32);
            }
            limits.invocations = gl.get_parameter_i32(glow::MAX_COMPUTE_WORK_GROUP_INVOCATIONS);
            limits.shared_memory = gl.get_parameter_i32(glow::MAX_COMPUTE_SHARED_MEMORY_SIZE);
        }
        limits
    }

    /// Fails unless a `(1,1,1)` dispatch of a 1x1x1 group fits.
    pub fn check_unit_dispatch(&self) -> Result<()> {
        let fits = self.work_group_count.iter().all(|&c| c >= 1)
            && self.work_group_size.iter().all(|&s| s >= 1)
            && self.invocations >= 1;
        if fits {
            Ok(())
        } else {
            Err(anyhow!("compute limits do not admit a unit dispatch: {self:?}"))
        }
    }

    fn log(&self) {
        let [cx, cy, cz] = self.work_group_count;
        let [sx, sy, sz] = self.work_group_size;
        info!("max compute work group count: {cx} x {cy} x {cz}");
        info!("max compute work group size: {sx} x {sy} x {sz}");
        info!("max compute work group invocations: {}", self.invocations);
        info!("max compute shared memory size: {} bytes", self.shared_memory);
    }
}

/// Opens the first EGL device, runs a no-op compute shader once and
/// returns the limits it reported.
pub fn run_compute_demo() -> Result<ComputeLimits> {
    let device = Device::query_devices()
        .context("query EGL devices")?
        .next()
        .ok_or_else(|| anyhow!("no EGL devices"))?;
    info!(
        "EGL device: vendor {:?}, node {:?}",
        device.vendor(),
        device.drm_device_node_path()
    );

    let display = unsafe { Display::with_device(&device, None) }.context("EGL display")?;

    let template = ConfigTemplateBuilder::new()
        .with_surface_type(ConfigSurfaceTypes::empty())
        .with_api(Api::GLES3)
        .build();
    let config = unsafe { display.find_configs(template) }
        .context("find_configs")?
        .next()
        .ok_or_else(|| anyhow!("no surfaceless GLES3 config"))?;

    let attrs = ContextAttributesBuilder::new()
        .with_context_api(ContextApi::Gles(Some(Version::new(3, 1))))
        .build(None);
    let context = unsafe { display.create_context(&config, &attrs) }
        .context("create GLES 3.1 context")?
        .make_current_surfaceless()
        .context("make_current_surfaceless")?;

    let gl =
        unsafe { glow::Context::from_loader_function_cstr(|s| display.get_proc_address(s).cast()) };
    info!("GL version: {}", unsafe { gl.get_parameter_string(glow::VERSION) });

    let limits = ComputeLimits::query(&gl);
    limits.log();
    limits.check_unit_dispatch()?;

    let program = compile_program(&gl, &[(glow::COMPUTE_SHADER, NOOP_COMPUTE_SRC)], &[])?;
    unsafe {
        gl.use_program(Some(program));
        gl.dispatch_compute(1, 1, 1);
        gl.finish();
        debug!("dispatch (1,1,1) finished");
        gl.use_program(None);
        gl.delete_program(program);
    }

    drop(context);
    info!("compute demo done");
    Ok(limits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_dispatch_needs_every_axis() {
        let mut limits = ComputeLimits {
            work_group_count: [65535, 65535, 65535],
            work_group_size: [128, 128, 64],
            invocations: 128,
            shared_memory: 16384,
        };
        assert!(limits.check_unit_dispatch().is_ok());
        limits.work_group_size[2] = 0;
        assert!(limits.check_unit_dispatch().is_err());
        // A context without compute support reports zeros everywhere.
        assert!(ComputeLimits::default().check_unit_dispatch().is_err());
    }

    #[test]
    fn noop_shader_declares_unit_group() {
        assert!(NOOP_COMPUTE_SRC.starts_with("#version 310 es"));
        assert!(NOOP_COMPUTE_SRC.contains("local_size_x = 1, local_size_y = 1, local_size_z = 1"));
    }
}
