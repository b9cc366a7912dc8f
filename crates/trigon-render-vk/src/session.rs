// SPDX-License-Identifier: CEPL-1.0
//! The single-threaded run loop tying the window system to the swapchain.

use anyhow::Context;
use ash::vk;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};
use trigon_render::{DamageTracker, RenderSize, Wsi};

use crate::context::DeviceContext;
use crate::driver::Driver;
use crate::frame::{FrameDriver, FrameError, FrameOutcome, FrameSyncPair, DEFAULT_ACQUIRE_TIMEOUT_NS};
use crate::swapchain::{PresentChain, Recreated, RecreationError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Recreation(#[from] RecreationError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("Failed to create frame semaphores: {0}")]
    Sync(vk::Result),

    #[error("Device context is missing its queue, command pool or shader modules")]
    ContextNotReady,
}

/// Whether surface changes after the first build rebuild the swapchain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecreatePolicy {
    #[default]
    OnDamage,
    /// Keep the initial swapchain forever; stale frames are dropped.
    Never,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    pub clear_color: [f32; 4],
    pub acquire_timeout_ns: u64,
    pub policy: RecreatePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.01, 0.01, 0.01, 1.0],
            acquire_timeout_ns: DEFAULT_ACQUIRE_TIMEOUT_NS,
            policy: RecreatePolicy::OnDamage,
        }
    }
}

/// What a single [`Session::step`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepReport {
    pub recreated: Option<Recreated>,
    pub frame: Option<FrameOutcome>,
}

/// Owns every Vulkan object of a running demo and tears them down in order.
pub struct Session<D: Driver> {
    driver: D,
    ctx: DeviceContext,
    chain: PresentChain,
    sync: FrameSyncPair,
    frames: FrameDriver,
    tracker: DamageTracker,
    policy: RecreatePolicy,
    torn_down: bool,
}

impl<D: Driver> Session<D> {
    /// Builds the first swapchain generation.
    ///
    /// On failure everything created so far, including the device, is
    /// released before returning. A context that is not fully initialized
    /// is rejected with [`SessionError::ContextNotReady`].
    ///
    /// # Safety
    ///
    /// Every handle in `ctx` must have been created through `driver` and
    /// not yet destroyed. The session takes over their destruction.
    pub unsafe fn new(
        driver: D,
        mut ctx: DeviceContext,
        size: RenderSize,
        cfg: SessionConfig,
    ) -> Result<Self, SessionError> {
        if !ctx.is_ready() {
            unsafe { ctx.teardown(&driver) };
            return Err(SessionError::ContextNotReady);
        }
        let mut session = Self {
            driver,
            ctx,
            chain: PresentChain::new(cfg.clear_color),
            sync: FrameSyncPair::null(),
            frames: FrameDriver::new(cfg.acquire_timeout_ns),
            tracker: DamageTracker::new(size),
            policy: cfg.policy,
            torn_down: false,
        };
        session.sync = unsafe { FrameSyncPair::new(&session.driver) }.map_err(SessionError::Sync)?;
        unsafe {
            session
                .chain
                .recreate(&session.driver, &session.ctx, size)?;
        }
        session.tracker.request_redraw();
        info!("session ready ({:?})", session.policy);
        Ok(session)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn chain(&self) -> &PresentChain {
        &self.chain
    }

    pub fn frames(&self) -> &FrameDriver {
        &self.frames
    }

    pub fn tracker(&self) -> &DamageTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut DamageTracker {
        &mut self.tracker
    }

    /// Services whatever the tracker has pending: first a rebuild, then a
    /// frame. A stale frame schedules a rebuild for the next step.
    pub fn step(&mut self) -> Result<StepReport, SessionError> {
        let mut report = StepReport::default();

        if self.tracker.take_reconfigure() {
            match self.policy {
                RecreatePolicy::OnDamage => {
                    let hint = self.tracker.size_hint().unwrap_or(RenderSize {
                        width: self.chain.generation().extent.width,
                        height: self.chain.generation().extent.height,
                    });
                    let out = unsafe { self.chain.recreate(&self.driver, &self.ctx, hint)? };
                    if matches!(out, Recreated::Rebuilt { .. }) {
                        self.tracker.request_redraw();
                    }
                    report.recreated = Some(out);
                }
                RecreatePolicy::Never => debug!("static swapchain, ignoring surface change"),
            }
        }

        if self.tracker.take_redraw() {
            let out = unsafe {
                self.frames
                    .draw(&self.driver, &self.ctx, &self.chain, &self.sync)?
            };
            if out == FrameOutcome::Stale {
                match self.policy {
                    RecreatePolicy::OnDamage => {
                        self.chain.mark_stale();
                        self.tracker.mark_stale();
                    }
                    RecreatePolicy::Never => warn!("surface is stale, frame dropped"),
                }
            }
            report.frame = Some(out);
        }

        Ok(report)
    }

    /// Runs until the window system reports a quit or `running` is cleared.
    pub fn run(&mut self, wsi: &mut dyn Wsi, running: &AtomicBool) -> anyhow::Result<()> {
        wsi.show();
        while running.load(Ordering::Relaxed) {
            if self.tracker.is_idle() && !wsi.wait_for_events(&mut self.tracker)? {
                info!("quit requested");
                break;
            }
            self.step().context("frame loop")?;
        }
        info!(
            "leaving run loop after {} frame(s)",
            self.frames.frames_presented()
        );
        Ok(())
    }

    /// Waits for the GPU, then releases the swapchain, the semaphores and
    /// the device context, in that order. Safe to call more than once.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        unsafe {
            if let Err(err) = self.driver.device_wait_idle() {
                warn!("device_wait_idle during teardown: {err:?}");
            }
            self.chain.teardown(&self.driver);
            self.sync.destroy(&self.driver);
            self.ctx.teardown(&self.driver);
        }
        self.torn_down = true;
    }
}

impl<D: Driver> Drop for Session<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Event, FakeDriver, ScriptedWsi};
    use crate::swapchain::ChainState;

    fn size(width: u32, height: u32) -> RenderSize {
        RenderSize { width, height }
    }

    fn session(driver: &FakeDriver, policy: RecreatePolicy) -> Session<FakeDriver> {
        let ctx = driver.context();
        unsafe {
            Session::new(
                driver.clone(),
                ctx,
                size(640, 480),
                SessionConfig {
                    policy,
                    ..Default::default()
                },
            )
        }
        .unwrap()
    }

    #[test]
    fn first_step_draws_the_initial_frame() {
        let driver = FakeDriver::new(640, 480);
        let mut s = session(&driver, RecreatePolicy::OnDamage);
        let report = s.step().unwrap();
        assert_eq!(report.recreated, None);
        assert!(matches!(report.frame, Some(FrameOutcome::Presented { .. })));
        assert!(s.tracker().is_idle());
    }

    #[test]
    fn stale_acquire_rebuilds_once_before_next_frame() {
        let driver = FakeDriver::new(640, 480);
        let mut s = session(&driver, RecreatePolicy::OnDamage);
        driver.push_acquire(Ok((0, true)));

        let report = s.step().unwrap();
        assert_eq!(report.frame, Some(FrameOutcome::Stale));
        assert_eq!(s.chain().state(), ChainState::Stale);
        assert_eq!(driver.present_count(), 0);
        assert!(driver.submitted().is_empty());

        driver.clear_events();
        let report = s.step().unwrap();
        assert!(matches!(
            report.recreated,
            Some(Recreated::Rebuilt { generation: 2, .. })
        ));
        assert!(matches!(report.frame, Some(FrameOutcome::Presented { .. })));

        let events = driver.events();
        let created = events
            .iter()
            .filter(|e| matches!(e, Event::CreateSwapchain(_)))
            .count();
        assert_eq!(created, 1);
        let first_create = events
            .iter()
            .position(|e| matches!(e, Event::CreateSwapchain(_)))
            .unwrap();
        let first_acquire = events
            .iter()
            .position(|e| matches!(e, Event::Acquire))
            .unwrap();
        assert!(first_create < first_acquire);
        assert!(s.tracker().is_idle());
    }

    #[test]
    fn stale_present_schedules_rebuild() {
        let driver = FakeDriver::new(640, 480);
        let mut s = session(&driver, RecreatePolicy::OnDamage);
        driver.push_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

        let report = s.step().unwrap();
        assert_eq!(report.frame, Some(FrameOutcome::Stale));
        assert!(s.tracker().needs_reconfigure());
        assert!(!s.tracker().needs_redraw());

        let report = s.step().unwrap();
        assert!(report.recreated.is_some());
        assert_eq!(driver.present_count(), 2);
    }

    #[test]
    fn static_policy_never_rebuilds() {
        let driver = FakeDriver::new(640, 480);
        let mut s = session(&driver, RecreatePolicy::Never);
        s.step().unwrap();

        driver.resize(800, 600);
        trigon_render::SurfaceEvents::surface_changed(s.tracker_mut(), size(800, 600));
        driver.push_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        let report = s.step().unwrap();
        assert_eq!(report.recreated, None);
        assert_eq!(report.frame, Some(FrameOutcome::Stale));
        assert!(s.tracker().is_idle());
        assert_eq!(driver.swapchains_created().len(), 1);
        assert!(s.chain().is_live());
    }

    #[test]
    fn resize_event_rebuilds_at_new_extent() {
        let driver = FakeDriver::new(640, 480);
        let mut s = session(&driver, RecreatePolicy::OnDamage);
        s.step().unwrap();

        driver.resize(800, 600);
        trigon_render::SurfaceEvents::surface_changed(s.tracker_mut(), size(800, 600));
        let report = s.step().unwrap();
        assert!(matches!(
            report.recreated,
            Some(Recreated::Rebuilt {
                extent: vk::Extent2D {
                    width: 800,
                    height: 600
                },
                ..
            })
        ));
        let created = driver.swapchains_created();
        assert_eq!(created.len(), 2);
        assert_eq!(created[1].old_swapchain, created[0].handle);
    }

    #[test]
    fn minimized_window_skips_frames_until_restored() {
        let driver = FakeDriver::new(640, 480);
        let mut s = session(&driver, RecreatePolicy::OnDamage);
        s.step().unwrap();

        driver.resize(0, 0);
        trigon_render::SurfaceEvents::surface_changed(s.tracker_mut(), size(0, 0));
        let report = s.step().unwrap();
        assert_eq!(report.recreated, Some(Recreated::Deferred));
        assert_eq!(report.frame, Some(FrameOutcome::Skipped));
        assert!(s.tracker().is_idle());

        driver.resize(640, 480);
        trigon_render::SurfaceEvents::surface_changed(s.tracker_mut(), size(640, 480));
        let report = s.step().unwrap();
        assert!(matches!(report.recreated, Some(Recreated::Rebuilt { .. })));
        assert!(matches!(report.frame, Some(FrameOutcome::Presented { .. })));
    }

    #[test]
    fn fatal_acquire_surfaces_as_error() {
        let driver = FakeDriver::new(640, 480);
        let mut s = session(&driver, RecreatePolicy::OnDamage);
        driver.push_acquire(Err(vk::Result::ERROR_DEVICE_LOST));
        let err = s.step().unwrap_err();
        assert!(matches!(
            err,
            SessionError::Frame(FrameError::Acquire(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn teardown_releases_everything_once() {
        let driver = FakeDriver::new(640, 480);
        let mut s = session(&driver, RecreatePolicy::OnDamage);
        s.step().unwrap();
        s.teardown();
        s.teardown();
        drop(s);
        assert_eq!(driver.live_total(), 0);
        assert!(driver.device_destroyed());
    }

    #[test]
    fn failed_initial_build_cleans_up() {
        let driver = FakeDriver::new(640, 480);
        driver.set_present_modes(Vec::new());
        let ctx = driver.context();
        let result =
            unsafe { Session::new(driver.clone(), ctx, size(640, 480), SessionConfig::default()) };
        assert!(matches!(
            result,
            Err(SessionError::Recreation(RecreationError::Surface(_)))
        ));
        assert_eq!(driver.live_total(), 0);
        assert!(driver.device_destroyed());
    }

    #[test]
    fn incomplete_context_is_rejected_and_released() {
        let driver = FakeDriver::new(640, 480);
        let mut ctx = driver.context();
        unsafe { driver.destroy_command_pool(ctx.command_pool) };
        ctx.command_pool = vk::CommandPool::null();

        let result =
            unsafe { Session::new(driver.clone(), ctx, size(640, 480), SessionConfig::default()) };
        assert!(matches!(result, Err(SessionError::ContextNotReady)));
        assert!(driver.swapchains_created().is_empty());
        assert_eq!(driver.live_total(), 0);
        assert!(driver.device_destroyed());
    }

    #[test]
    fn run_follows_scripted_window() {
        let driver = FakeDriver::new(640, 480);
        let mut s = session(&driver, RecreatePolicy::OnDamage);
        let mut wsi = ScriptedWsi::new(driver.clone(), size(640, 480));
        wsi.push_redraw();
        wsi.push_resize(800, 600);
        wsi.push_quit();

        let running = AtomicBool::new(true);
        s.run(&mut wsi, &running).unwrap();

        assert!(wsi.shown());
        // Initial frame, redraw, frame after the resize rebuild.
        assert_eq!(driver.present_count(), 3);
        assert_eq!(driver.swapchains_created().len(), 2);
    }

    #[test]
    fn cleared_run_flag_stops_immediately() {
        let driver = FakeDriver::new(640, 480);
        let mut s = session(&driver, RecreatePolicy::OnDamage);
        let mut wsi = ScriptedWsi::new(driver.clone(), size(640, 480));
        let running = AtomicBool::new(false);
        s.run(&mut wsi, &running).unwrap();
        assert_eq!(driver.present_count(), 0);
    }
}
