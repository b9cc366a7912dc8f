// SPDX-License-Identifier: CEPL-1.0
//! In-memory [`Driver`] used by the unit tests.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use trigon_render::{RenderSize, SurfaceEvents, Wsi};

use crate::context::DeviceContext;
use crate::driver::Driver;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    WaitIdle,
    CreateSwapchain(vk::SwapchainKHR),
    DestroySwapchain(vk::SwapchainKHR),
    DestroyImageView(vk::ImageView),
    DestroyFramebuffer(vk::Framebuffer),
    Acquire,
    Submit,
    Present,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainRecord {
    pub handle: vk::SwapchainKHR,
    pub old_swapchain: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
}

struct State {
    next_handle: u64,
    live: HashMap<u64, &'static str>,
    device_destroyed: bool,

    caps: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    modes: Vec<vk::PresentModeKHR>,
    image_count: Option<usize>,
    images_per_swapchain: HashMap<u64, usize>,

    acquire_results: VecDeque<VkResult<(u32, bool)>>,
    present_results: VecDeque<VkResult<bool>>,
    submit_failure: Option<vk::Result>,
    next_image: u32,

    events: Vec<Event>,
    swapchains: Vec<SwapchainRecord>,
    draws: Vec<(u32, u32, u32, u32)>,
    submitted: Vec<vk::CommandBuffer>,
    acquire_timeouts: Vec<u64>,
    presents: usize,
}

impl State {
    fn mint(&mut self, kind: &'static str) -> u64 {
        self.next_handle += 1;
        let raw = self.next_handle;
        self.live.insert(raw, kind);
        raw
    }

    fn release(&mut self, kind: &'static str, raw: u64) {
        if raw == 0 {
            return;
        }
        match self.live.remove(&raw) {
            Some(k) if k == kind => {}
            Some(k) => panic!("destroying {kind} {raw:#x} which is a {k}"),
            None => panic!("double free of {kind} {raw:#x}"),
        }
    }
}

/// Mints opaque handles, tracks which are alive and panics on double frees.
/// Clones share state, so a test can keep one while a session owns another.
#[derive(Clone)]
pub struct FakeDriver {
    state: Rc<RefCell<State>>,
}

impl FakeDriver {
    /// A surface with a fixed `width`x`height` extent, three images, one
    /// BGRA8 format and FIFO.
    pub fn new(width: u32, height: u32) -> Self {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 8,
            current_extent: vk::Extent2D { width, height },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };
        let state = State {
            next_handle: 0x1000,
            live: HashMap::new(),
            device_destroyed: false,
            caps,
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            modes: vec![vk::PresentModeKHR::FIFO],
            image_count: None,
            images_per_swapchain: HashMap::new(),
            acquire_results: VecDeque::new(),
            present_results: VecDeque::new(),
            submit_failure: None,
            next_image: 0,
            events: Vec::new(),
            swapchains: Vec::new(),
            draws: Vec::new(),
            submitted: Vec::new(),
            acquire_timeouts: Vec::new(),
            presents: 0,
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// A fully initialized context whose pool and shader modules are tracked.
    pub fn context(&self) -> DeviceContext {
        let mut ctx = DeviceContext::new(
            vk::PhysicalDevice::from_raw(0x10),
            vk::SurfaceKHR::from_raw(0x20),
            0,
        );
        unsafe {
            ctx.queue = vk::Queue::from_raw(0x30);
            ctx.command_pool = self.create_command_pool(0).unwrap();
            ctx.vertex.module = self.create_shader_module(&[0x0723_0203]).unwrap();
            ctx.fragment.module = self.create_shader_module(&[0x0723_0203]).unwrap();
        }
        ctx
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.state.borrow_mut().caps.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state.borrow_mut().formats = formats;
    }

    pub fn set_present_modes(&self, modes: Vec<vk::PresentModeKHR>) {
        self.state.borrow_mut().modes = modes;
    }

    pub fn set_min_image_count(&self, count: u32) {
        self.state.borrow_mut().caps.min_image_count = count;
    }

    /// Forces the number of images handed out, ignoring `min_image_count`.
    pub fn set_image_count(&self, count: usize) {
        self.state.borrow_mut().image_count = Some(count);
    }

    pub fn push_acquire(&self, result: VkResult<(u32, bool)>) {
        self.state.borrow_mut().acquire_results.push_back(result);
    }

    pub fn push_present(&self, result: VkResult<bool>) {
        self.state.borrow_mut().present_results.push_back(result);
    }

    pub fn fail_next_submit(&self, result: vk::Result) {
        self.state.borrow_mut().submit_failure = Some(result);
    }

    pub fn live_count(&self, kind: &str) -> usize {
        self.state
            .borrow()
            .live
            .values()
            .filter(|k| **k == kind)
            .count()
    }

    pub fn live_total(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn is_live<H: Handle>(&self, handle: H) -> bool {
        self.state.borrow().live.contains_key(&handle.as_raw())
    }

    pub fn device_destroyed(&self) -> bool {
        self.state.borrow().device_destroyed
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    pub fn swapchains_created(&self) -> Vec<SwapchainRecord> {
        self.state.borrow().swapchains.clone()
    }

    pub fn draws(&self) -> Vec<(u32, u32, u32, u32)> {
        self.state.borrow().draws.clone()
    }

    pub fn submitted(&self) -> Vec<vk::CommandBuffer> {
        self.state.borrow().submitted.clone()
    }

    pub fn acquire_timeouts(&self) -> Vec<u64> {
        self.state.borrow().acquire_timeouts.clone()
    }

    pub fn present_count(&self) -> usize {
        self.state.borrow().presents
    }

    fn create<H: Handle>(&self, kind: &'static str) -> H {
        H::from_raw(self.state.borrow_mut().mint(kind))
    }

    fn destroy<H: Handle>(&self, kind: &'static str, handle: H) {
        self.state.borrow_mut().release(kind, handle.as_raw());
    }
}

impl Driver for FakeDriver {
    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        self.state.borrow_mut().events.push(Event::WaitIdle);
        Ok(())
    }

    unsafe fn surface_capabilities(
        &self,
        _phys: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.state.borrow().caps)
    }

    unsafe fn surface_formats(
        &self,
        _phys: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.borrow().formats.clone())
    }

    unsafe fn surface_present_modes(
        &self,
        _phys: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state.borrow().modes.clone())
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        let handle: vk::SwapchainKHR = self.create("swapchain");
        let mut s = self.state.borrow_mut();
        if info.old_swapchain != vk::SwapchainKHR::null() {
            assert!(
                s.live.contains_key(&info.old_swapchain.as_raw()),
                "old_swapchain must still be alive"
            );
        }
        let count = s
            .image_count
            .unwrap_or(info.min_image_count as usize);
        s.images_per_swapchain.insert(handle.as_raw(), count);
        s.swapchains.push(SwapchainRecord {
            handle,
            old_swapchain: info.old_swapchain,
            extent: info.image_extent,
            min_image_count: info.min_image_count,
        });
        s.events.push(Event::CreateSwapchain(handle));
        Ok(handle)
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.destroy("swapchain", swapchain);
        self.state
            .borrow_mut()
            .events
            .push(Event::DestroySwapchain(swapchain));
    }

    unsafe fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut s = self.state.borrow_mut();
        let count = s
            .images_per_swapchain
            .get(&swapchain.as_raw())
            .copied()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        // Images belong to the swapchain and are never destroyed on their own.
        let base = s.next_handle + 1;
        s.next_handle += count as u64;
        Ok((0..count as u64).map(|i| vk::Image::from_raw(base + i)).collect())
    }

    unsafe fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        assert_ne!(info.image, vk::Image::null());
        Ok(self.create("image_view"))
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy("image_view", view);
        self.state
            .borrow_mut()
            .events
            .push(Event::DestroyImageView(view));
    }

    unsafe fn create_render_pass(
        &self,
        _info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass> {
        Ok(self.create("render_pass"))
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy("render_pass", render_pass);
    }

    unsafe fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        assert!(self.is_live(info.render_pass), "framebuffer needs a live render pass");
        Ok(self.create("framebuffer"))
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy("framebuffer", framebuffer);
        self.state
            .borrow_mut()
            .events
            .push(Event::DestroyFramebuffer(framebuffer));
    }

    unsafe fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        Ok(self.create("pipeline_layout"))
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy("pipeline_layout", layout);
    }

    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        assert_eq!(info.stage_count, 2);
        assert!(self.is_live(info.layout));
        assert!(self.is_live(info.render_pass));
        Ok(self.create("pipeline"))
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy("pipeline", pipeline);
    }

    unsafe fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        assert!(!code.is_empty());
        Ok(self.create("shader_module"))
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy("shader_module", module);
    }

    unsafe fn create_command_pool(&self, _queue_family: u32) -> VkResult<vk::CommandPool> {
        Ok(self.create("command_pool"))
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.destroy("command_pool", pool);
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        assert!(self.is_live(info.command_pool));
        Ok((0..info.command_buffer_count)
            .map(|_| self.create("command_buffer"))
            .collect())
    }

    unsafe fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        for &cmd in buffers {
            self.destroy("command_buffer", cmd);
        }
    }

    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        assert!(self.is_live(cmd));
        Ok(())
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        _cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        _contents: vk::SubpassContents,
    ) {
        assert!(self.is_live(info.framebuffer));
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        _cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        assert!(self.is_live(pipeline));
    }

    unsafe fn cmd_draw(
        &self,
        _cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.state
            .borrow_mut()
            .draws
            .push((vertex_count, instance_count, first_vertex, first_instance));
    }

    unsafe fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {}

    unsafe fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    unsafe fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        Ok(self.create("semaphore"))
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy("semaphore", semaphore);
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        assert!(self.is_live(swapchain), "acquire on a dead swapchain");
        assert!(self.is_live(semaphore));
        let mut s = self.state.borrow_mut();
        s.events.push(Event::Acquire);
        s.acquire_timeouts.push(timeout_ns);
        if let Some(result) = s.acquire_results.pop_front() {
            return result;
        }
        let count = s
            .images_per_swapchain
            .get(&swapchain.as_raw())
            .copied()
            .unwrap_or(1) as u32;
        let index = s.next_image % count;
        s.next_image = s.next_image.wrapping_add(1);
        Ok((index, false))
    }

    unsafe fn queue_submit(&self, _queue: vk::Queue, submits: &[vk::SubmitInfo<'_>]) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.events.push(Event::Submit);
        if let Some(err) = s.submit_failure.take() {
            return Err(err);
        }
        for submit in submits {
            let cmds = std::slice::from_raw_parts(
                submit.p_command_buffers,
                submit.command_buffer_count as usize,
            );
            s.submitted.extend_from_slice(cmds);
        }
        Ok(())
    }

    unsafe fn queue_present(&self, _queue: vk::Queue, info: &vk::PresentInfoKHR<'_>) -> VkResult<bool> {
        assert_eq!(info.swapchain_count, 1);
        let mut s = self.state.borrow_mut();
        s.events.push(Event::Present);
        s.presents += 1;
        s.present_results.pop_front().unwrap_or(Ok(false))
    }

    unsafe fn destroy_device(&self) {
        let mut s = self.state.borrow_mut();
        assert!(!s.device_destroyed, "device destroyed twice");
        let leaked: Vec<_> = s.live.values().collect();
        assert!(leaked.is_empty(), "device destroyed with live objects: {leaked:?}");
        s.device_destroyed = true;
    }
}

enum Batch {
    Redraw,
    Resize(u32, u32),
    Quit,
}

/// A window system that replays a fixed list of event batches and resizes
/// the fake surface along with them.
pub struct ScriptedWsi {
    driver: FakeDriver,
    size: RenderSize,
    batches: VecDeque<Batch>,
    shown: bool,
}

impl ScriptedWsi {
    pub fn new(driver: FakeDriver, size: RenderSize) -> Self {
        Self {
            driver,
            size,
            batches: VecDeque::new(),
            shown: false,
        }
    }

    pub fn push_redraw(&mut self) {
        self.batches.push_back(Batch::Redraw);
    }

    pub fn push_resize(&mut self, width: u32, height: u32) {
        self.batches.push_back(Batch::Resize(width, height));
    }

    pub fn push_quit(&mut self) {
        self.batches.push_back(Batch::Quit);
    }

    pub fn shown(&self) -> bool {
        self.shown
    }
}

impl Wsi for ScriptedWsi {
    fn inner_size(&self) -> RenderSize {
        self.size
    }

    fn show(&mut self) {
        self.shown = true;
    }

    fn toggle_fullscreen(&mut self) {}

    fn wait_for_events(&mut self, events: &mut dyn SurfaceEvents) -> anyhow::Result<bool> {
        match self.batches.pop_front() {
            Some(Batch::Redraw) => {
                events.redraw_requested();
                Ok(true)
            }
            Some(Batch::Resize(width, height)) => {
                self.size = RenderSize { width, height };
                self.driver.resize(width, height);
                events.surface_changed(self.size);
                Ok(true)
            }
            Some(Batch::Quit) | None => Ok(false),
        }
    }
}
