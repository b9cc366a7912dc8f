// SPDX-License-Identifier: CEPL-1.0
//! Vulkan presentation core: a swapchain that survives resizes, driven by
//! a damage-tracking run loop.

mod bootstrap;
mod context;
mod driver;
mod frame;
mod loader;
mod session;
mod shader;
mod surface;
mod swapchain;

#[cfg(test)]
mod fake;

pub use bootstrap::bootstrap;
pub use context::{DeviceContext, ShaderStage, SHADER_ENTRY_POINT};
pub use driver::Driver;
pub use frame::{
    FrameDriver, FrameError, FrameOutcome, FramePhase, FrameSyncPair, DEFAULT_ACQUIRE_TIMEOUT_NS,
};
pub use loader::{AshDriver, IcdApi, InstanceApi};
pub use session::{RecreatePolicy, Session, SessionConfig, SessionError, StepReport};
pub use shader::{load_spirv, ShaderPaths, BUILTIN_SHADER_DIR};
pub use surface::{
    choose_present_mode, choose_surface_format, extent_from_caps, resolve_surface_config,
    SurfaceConfig, SurfaceError,
};
pub use swapchain::{
    ChainState, PresentChain, Recreated, RecreationError, SwapchainGeneration,
    MAX_SWAPCHAIN_IMAGES,
};
