// SPDX-License-Identifier: CEPL-1.0
use crate::{RenderSize, SurfaceEvents};

/// Edge-triggered damage bookkeeping between the window system and a
/// renderer's run loop. Each flag is cleared when it is taken.
#[derive(Debug, Default)]
pub struct DamageTracker {
    reconfigure: bool,
    redraw: bool,
    size: Option<RenderSize>,
}

impl DamageTracker {
    pub fn new(initial: RenderSize) -> Self {
        Self {
            reconfigure: false,
            redraw: false,
            size: Some(initial),
        }
    }

    /// Nothing pending: the loop may block on the platform.
    pub fn is_idle(&self) -> bool {
        !self.reconfigure && !self.redraw
    }

    pub fn needs_reconfigure(&self) -> bool {
        self.reconfigure
    }

    pub fn needs_redraw(&self) -> bool {
        self.redraw
    }

    /// Latest surface size reported by the window system, if any.
    pub fn size_hint(&self) -> Option<RenderSize> {
        self.size
    }

    /// Raised by the frame path when the driver reports the surface as stale.
    /// Only reconfiguration is requested; a successful rebuild requests the
    /// redraw.
    pub fn mark_stale(&mut self) {
        self.reconfigure = true;
    }

    pub fn request_redraw(&mut self) {
        self.redraw = true;
    }

    pub fn take_reconfigure(&mut self) -> bool {
        std::mem::take(&mut self.reconfigure)
    }

    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.redraw)
    }
}

impl SurfaceEvents for DamageTracker {
    fn surface_changed(&mut self, size: RenderSize) {
        self.size = Some(size);
        self.reconfigure = true;
        self.redraw = true;
    }

    fn redraw_requested(&mut self) {
        self.redraw = true;
    }
}
