// SPDX-License-Identifier: CEPL-1.0
//! Acquire → submit → present for a single frame.

use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;
use tracing::{info, trace};

use crate::context::DeviceContext;
use crate::driver::Driver;
use crate::swapchain::PresentChain;

pub const DEFAULT_ACQUIRE_TIMEOUT_NS: u64 = 1_000_000;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Failed to acquire next swapchain image: {0}")]
    Acquire(vk::Result),

    #[error("Failed to submit draw commands: {0}")]
    Submit(vk::Result),

    #[error("Failed to present swapchain image: {0}")]
    Present(vk::Result),

    #[error("Acquired image {index} but only {count} command buffers are recorded")]
    ImageIndexOutOfRange { index: u32, count: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    /// The surface changed under the swapchain; rebuild before drawing again.
    Stale,
    /// The chain was not presentable; nothing was sent to the GPU.
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Acquiring,
    Submitting,
    Presenting,
}

fn is_stale(result: vk::Result) -> bool {
    matches!(
        result,
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR
    )
}

/// The two binary semaphores every frame is ordered by.
#[derive(Debug)]
pub struct FrameSyncPair {
    pub image_acquired: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

impl FrameSyncPair {
    pub fn null() -> Self {
        Self {
            image_acquired: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
        }
    }

    pub unsafe fn new<D: Driver + ?Sized>(driver: &D) -> VkResult<Self> {
        let mut pair = Self::null();
        pair.image_acquired = driver.create_semaphore()?;
        match driver.create_semaphore() {
            Ok(sem) => pair.render_finished = sem,
            Err(err) => {
                pair.destroy(driver);
                return Err(err);
            }
        }
        Ok(pair)
    }

    pub unsafe fn destroy<D: Driver + ?Sized>(&mut self, driver: &D) {
        for sem in [&mut self.image_acquired, &mut self.render_finished] {
            if *sem != vk::Semaphore::null() {
                driver.destroy_semaphore(*sem);
                *sem = vk::Semaphore::null();
            }
        }
    }
}

#[derive(Debug)]
pub struct FrameDriver {
    acquire_timeout_ns: u64,
    phase: FramePhase,
    frames_presented: u64,
}

impl Default for FrameDriver {
    fn default() -> Self {
        Self::new(DEFAULT_ACQUIRE_TIMEOUT_NS)
    }
}

impl FrameDriver {
    pub fn new(acquire_timeout_ns: u64) -> Self {
        Self {
            acquire_timeout_ns,
            phase: FramePhase::Idle,
            frames_presented: 0,
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Draws one frame with the commands recorded for the acquired image.
    ///
    /// Never rebuilds anything: a stale surface is only reported.
    pub unsafe fn draw<D: Driver + ?Sized>(
        &mut self,
        driver: &D,
        ctx: &DeviceContext,
        chain: &PresentChain,
        sync: &FrameSyncPair,
    ) -> Result<FrameOutcome, FrameError> {
        if !chain.is_live() {
            trace!("chain is {:?}, skipping frame", chain.state());
            return Ok(FrameOutcome::Skipped);
        }
        let outcome = self.run(driver, ctx, chain, sync);
        self.phase = FramePhase::Idle;
        outcome
    }

    unsafe fn run<D: Driver + ?Sized>(
        &mut self,
        driver: &D,
        ctx: &DeviceContext,
        chain: &PresentChain,
        sync: &FrameSyncPair,
    ) -> Result<FrameOutcome, FrameError> {
        let generation = chain.generation();

        self.phase = FramePhase::Acquiring;
        let image_index = match driver.acquire_next_image(
            generation.swapchain,
            self.acquire_timeout_ns,
            sync.image_acquired,
        ) {
            Ok((index, false)) => index,
            Ok((_, true)) => {
                info!("acquire reported a suboptimal swapchain");
                return Ok(FrameOutcome::Stale);
            }
            Err(err) if is_stale(err) => {
                info!("acquire reported {err:?}");
                return Ok(FrameOutcome::Stale);
            }
            Err(err) => return Err(FrameError::Acquire(err)),
        };

        let cmd = generation
            .command_buffers
            .get(image_index as usize)
            .copied()
            .ok_or(FrameError::ImageIndexOutOfRange {
                index: image_index,
                count: generation.command_buffers.len(),
            })?;

        self.phase = FramePhase::Submitting;
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.image_acquired,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &sync.render_finished,
            ..Default::default()
        };
        driver
            .queue_submit(ctx.queue, std::slice::from_ref(&submit))
            .map_err(FrameError::Submit)?;

        self.phase = FramePhase::Presenting;
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.render_finished,
            swapchain_count: 1,
            p_swapchains: &generation.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match driver.queue_present(ctx.queue, &present) {
            Ok(false) => {}
            Ok(true) => {
                info!("present reported a suboptimal swapchain");
                return Ok(FrameOutcome::Stale);
            }
            Err(err) if is_stale(err) => {
                info!("present reported {err:?}");
                return Ok(FrameOutcome::Stale);
            }
            Err(err) => return Err(FrameError::Present(err)),
        }

        self.frames_presented += 1;
        trace!("frame {} presented (image {image_index})", self.frames_presented);
        Ok(FrameOutcome::Presented { image_index })
    }
}
