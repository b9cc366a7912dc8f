// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;
use tracing::info;
use trigon_render::RenderSize;

use crate::context::DeviceContext;
use crate::driver::Driver;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("No supported surface formats were reported")]
    NoSupportedFormat,

    #[error("No supported present modes were reported")]
    NoSupportedPresentMode,

    #[error("Vulkan error querying surface {what}: {result}")]
    Query {
        what: &'static str,
        result: vk::Result,
    },
}

/// What the surface currently supports, re-read before every rebuild.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceConfig {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
}

/// Takes the first reported format. No ranking is attempted.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats.first().copied()
}

/// Takes the first reported present mode. No ranking is attempted.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> Option<vk::PresentModeKHR> {
    modes.first().copied()
}

/// The platform's current extent, or the window size clamped to the
/// supported range when the platform leaves it undefined.
pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

pub unsafe fn resolve_surface_config<D: Driver + ?Sized>(
    driver: &D,
    ctx: &DeviceContext,
) -> Result<SurfaceConfig, SurfaceError> {
    let caps = driver
        .surface_capabilities(ctx.physical_device, ctx.surface)
        .map_err(|result| SurfaceError::Query {
            what: "capabilities",
            result,
        })?;
    info!(
        "surface image count (min, max) = ({}, {}), current extent = {}x{}",
        caps.min_image_count,
        caps.max_image_count,
        caps.current_extent.width,
        caps.current_extent.height
    );

    let formats = driver
        .surface_formats(ctx.physical_device, ctx.surface)
        .map_err(|result| SurfaceError::Query {
            what: "formats",
            result,
        })?;
    let format = choose_surface_format(&formats).ok_or(SurfaceError::NoSupportedFormat)?;
    info!(
        "found {} surface format(s), choosing first ({:?}/{:?})",
        formats.len(),
        format.format,
        format.color_space
    );

    let modes = driver
        .surface_present_modes(ctx.physical_device, ctx.surface)
        .map_err(|result| SurfaceError::Query {
            what: "present modes",
            result,
        })?;
    let present_mode = choose_present_mode(&modes).ok_or(SurfaceError::NoSupportedPresentMode)?;
    info!(
        "found {} present mode(s), choosing first ({:?})",
        modes.len(),
        present_mode
    );

    Ok(SurfaceConfig {
        caps,
        format,
        present_mode,
    })
}
