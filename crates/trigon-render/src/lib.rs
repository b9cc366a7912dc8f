// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;

mod tracker;

pub use tracker::DamageTracker;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Receiver for the signals a windowing layer raises towards a renderer.
pub trait SurfaceEvents {
    /// The presentable surface changed (resize, expose, mode switch).
    fn surface_changed(&mut self, size: RenderSize);
    /// Something asked for the window contents to be drawn again.
    fn redraw_requested(&mut self);
}

/// Windowing-system collaborator used by the demo run loops.
///
/// Creation and teardown belong to the implementor (constructor and `Drop`).
pub trait Wsi {
    fn inner_size(&self) -> RenderSize;
    fn show(&mut self);
    fn toggle_fullscreen(&mut self);

    /// Blocks until the next batch of platform events arrives and forwards
    /// them to `events`. Returns `false` once the user asked to quit.
    fn wait_for_events(&mut self, events: &mut dyn SurfaceEvents) -> Result<bool>;
}
