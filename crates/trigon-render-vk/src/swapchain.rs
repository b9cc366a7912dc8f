// SPDX-License-Identifier: CEPL-1.0
//! Swapchain generations and the recreation pass that replaces them.

use ash::vk;
use thiserror::Error;
use tracing::{debug, info};
use trigon_render::RenderSize;

use crate::context::DeviceContext;
use crate::driver::Driver;
use crate::surface::{extent_from_caps, resolve_surface_config, SurfaceError};

/// Upper bound on the images a surface may hand out before we refuse it.
pub const MAX_SWAPCHAIN_IMAGES: usize = 8;

#[derive(Debug, Error)]
pub enum RecreationError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error("Swapchain reported {count} images, at most {max} are supported")]
    TooManyImages { count: usize, max: usize },

    #[error("Vulkan error during {step}: {result}")]
    Vulkan {
        step: &'static str,
        result: vk::Result,
    },

    #[error("Swapchain was already torn down")]
    TornDown,
}

fn vk_step(step: &'static str) -> impl FnOnce(vk::Result) -> RecreationError {
    move |result| RecreationError::Vulkan { step, result }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainState {
    Uninitialized,
    Live,
    Stale,
    Rebuilding,
    TornDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recreated {
    Rebuilt { generation: u64, extent: vk::Extent2D },
    /// The surface has no area right now; nothing was touched.
    Deferred,
}

/// Everything that is rebuilt on each recreation pass.
#[derive(Debug, Default)]
pub struct SwapchainGeneration {
    pub number: u64,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub render_pass: vk::RenderPass,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub command_pool: vk::CommandPool,
    pub command_buffers: Vec<vk::CommandBuffer>,
}

impl SwapchainGeneration {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

/// The presentable chain: the current generation plus the swapchain it
/// replaced, kept alive for exactly one more pass as the `old_swapchain`
/// link.
#[derive(Debug)]
pub struct PresentChain {
    state: ChainState,
    current: SwapchainGeneration,
    retired: vk::SwapchainKHR,
    clear_color: [f32; 4],
}

impl PresentChain {
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self {
            state: ChainState::Uninitialized,
            current: SwapchainGeneration::default(),
            retired: vk::SwapchainKHR::null(),
            clear_color,
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == ChainState::Live
    }

    pub fn generation(&self) -> &SwapchainGeneration {
        &self.current
    }

    pub fn retired(&self) -> vk::SwapchainKHR {
        self.retired
    }

    pub fn image_count(&self) -> usize {
        self.current.image_count()
    }

    /// Flags the live generation as unusable until the next pass.
    pub fn mark_stale(&mut self) {
        if self.state == ChainState::Live {
            info!("swapchain generation {} is stale", self.current.number);
            self.state = ChainState::Stale;
        }
    }

    /// Runs one full recreation pass against the current surface.
    ///
    /// On error the chain is left partially rebuilt; every handle it holds
    /// is still valid and [`PresentChain::teardown`] releases them.
    pub unsafe fn recreate<D: Driver + ?Sized>(
        &mut self,
        driver: &D,
        ctx: &DeviceContext,
        hint: RenderSize,
    ) -> Result<Recreated, RecreationError> {
        if self.state == ChainState::TornDown {
            return Err(RecreationError::TornDown);
        }

        driver
            .device_wait_idle()
            .map_err(vk_step("device_wait_idle"))?;

        let surface = resolve_surface_config(driver, ctx)?;
        let extent = extent_from_caps(&surface.caps, hint);
        if extent.width == 0 || extent.height == 0 {
            info!("surface has zero extent, deferring swapchain recreation");
            if self.state != ChainState::Uninitialized {
                self.state = ChainState::Stale;
            }
            return Ok(Recreated::Deferred);
        }

        self.state = ChainState::Rebuilding;
        let cur = &mut self.current;
        cur.extent = extent;
        cur.format = surface.format.format;

        // Retire the live swapchain. Only one generation is kept around.
        if self.retired != vk::SwapchainKHR::null() {
            driver.destroy_swapchain(self.retired);
        }
        self.retired = std::mem::replace(&mut cur.swapchain, vk::SwapchainKHR::null());

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface,
            min_image_count: surface.caps.min_image_count,
            image_format: surface.format.format,
            image_color_space: surface.format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: surface.caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: surface.present_mode,
            clipped: vk::TRUE,
            old_swapchain: self.retired,
            ..Default::default()
        };
        cur.swapchain = driver
            .create_swapchain(&swap_info)
            .map_err(vk_step("create_swapchain"))?;

        cur.images = driver
            .get_swapchain_images(cur.swapchain)
            .map_err(vk_step("get_swapchain_images"))?;
        if cur.images.len() > MAX_SWAPCHAIN_IMAGES {
            return Err(RecreationError::TooManyImages {
                count: cur.images.len(),
                max: MAX_SWAPCHAIN_IMAGES,
            });
        }
        info!(
            "swapchain created with {} image(s) at {}x{}",
            cur.images.len(),
            extent.width,
            extent.height
        );

        for view in cur.views.drain(..) {
            driver.destroy_image_view(view);
        }
        for &image in &cur.images {
            let view_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: cur.format,
                components: vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                },
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = driver
                .create_image_view(&view_info)
                .map_err(vk_step("create_image_view"))?;
            cur.views.push(view);
        }
        info!("{} image view(s) ready", cur.views.len());

        if cur.render_pass != vk::RenderPass::null() {
            driver.destroy_render_pass(cur.render_pass);
            cur.render_pass = vk::RenderPass::null();
        }
        cur.render_pass = create_render_pass(driver, cur.format)?;

        for framebuffer in cur.framebuffers.drain(..) {
            driver.destroy_framebuffer(framebuffer);
        }
        for view in &cur.views {
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: cur.render_pass,
                attachment_count: 1,
                p_attachments: view,
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            let framebuffer = driver
                .create_framebuffer(&fb_info)
                .map_err(vk_step("create_framebuffer"))?;
            cur.framebuffers.push(framebuffer);
        }
        info!("{} framebuffer(s) ready", cur.framebuffers.len());

        if cur.pipeline != vk::Pipeline::null() {
            driver.destroy_pipeline(cur.pipeline);
            cur.pipeline = vk::Pipeline::null();
        }
        if cur.pipeline_layout != vk::PipelineLayout::null() {
            driver.destroy_pipeline_layout(cur.pipeline_layout);
            cur.pipeline_layout = vk::PipelineLayout::null();
        }
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        cur.pipeline_layout = driver
            .create_pipeline_layout(&layout_info)
            .map_err(vk_step("create_pipeline_layout"))?;
        cur.pipeline = create_pipeline(driver, ctx, cur.render_pass, cur.pipeline_layout, extent)?;
        info!("graphics pipeline ready");

        if !cur.command_buffers.is_empty() {
            driver.free_command_buffers(cur.command_pool, &cur.command_buffers);
            cur.command_buffers.clear();
        }
        cur.command_pool = ctx.command_pool;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: ctx.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: cur.images.len() as u32,
            ..Default::default()
        };
        cur.command_buffers = driver
            .allocate_command_buffers(&alloc_info)
            .map_err(vk_step("allocate_command_buffers"))?;
        record_draw_commands(driver, cur, self.clear_color)?;
        info!("{} command buffer(s) recorded", cur.command_buffers.len());

        cur.number += 1;
        self.state = ChainState::Live;
        info!(
            "swapchain generation {} built ({}x{}, fmt {:?})",
            cur.number, extent.width, extent.height, cur.format
        );
        Ok(Recreated::Rebuilt {
            generation: cur.number,
            extent,
        })
    }

    /// Destroys every object the chain still owns. A second call does nothing.
    pub unsafe fn teardown<D: Driver + ?Sized>(&mut self, driver: &D) {
        if self.state == ChainState::TornDown {
            return;
        }
        let cur = &mut self.current;
        if cur.pipeline != vk::Pipeline::null() {
            driver.destroy_pipeline(cur.pipeline);
            cur.pipeline = vk::Pipeline::null();
        }
        if cur.pipeline_layout != vk::PipelineLayout::null() {
            driver.destroy_pipeline_layout(cur.pipeline_layout);
            cur.pipeline_layout = vk::PipelineLayout::null();
        }
        for framebuffer in cur.framebuffers.drain(..) {
            driver.destroy_framebuffer(framebuffer);
        }
        for view in cur.views.drain(..) {
            driver.destroy_image_view(view);
        }
        if cur.render_pass != vk::RenderPass::null() {
            driver.destroy_render_pass(cur.render_pass);
            cur.render_pass = vk::RenderPass::null();
        }
        if !cur.command_buffers.is_empty() {
            driver.free_command_buffers(cur.command_pool, &cur.command_buffers);
            cur.command_buffers.clear();
        }
        if self.retired != vk::SwapchainKHR::null() {
            driver.destroy_swapchain(self.retired);
            self.retired = vk::SwapchainKHR::null();
        }
        if cur.swapchain != vk::SwapchainKHR::null() {
            driver.destroy_swapchain(cur.swapchain);
            cur.swapchain = vk::SwapchainKHR::null();
        }
        cur.images.clear();
        self.state = ChainState::TornDown;
        info!("swapchain torn down after {} generation(s)", cur.number);
    }
}

unsafe fn create_render_pass<D: Driver + ?Sized>(
    driver: &D,
    format: vk::Format,
) -> Result<vk::RenderPass, RecreationError> {
    let color_att = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };
    // The presentation engine may still be reading the image when the
    // pass starts.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        src_access_mask: vk::AccessFlags::MEMORY_READ,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    driver
        .create_render_pass(&rp_info)
        .map_err(vk_step("create_render_pass"))
}

unsafe fn create_pipeline<D: Driver + ?Sized>(
    driver: &D,
    ctx: &DeviceContext,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
) -> Result<vk::Pipeline, RecreationError> {
    let stages = ctx.shader_stages();

    // No vertex buffers: the triangle lives in the vertex shader.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        min_sample_shading: 1.0,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        layout,
        render_pass,
        subpass: 0,
        base_pipeline_index: -1,
        ..Default::default()
    };
    driver
        .create_graphics_pipeline(&pipeline_info)
        .map_err(vk_step("create_graphics_pipeline"))
}

/// Records the fixed clear-and-draw sequence once into every buffer.
unsafe fn record_draw_commands<D: Driver + ?Sized>(
    driver: &D,
    cur: &SwapchainGeneration,
    clear_color: [f32; 4],
) -> Result<(), RecreationError> {
    let clears = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: clear_color,
        },
    }];
    for (&cmd, &framebuffer) in cur.command_buffers.iter().zip(&cur.framebuffers) {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
            ..Default::default()
        };
        driver
            .begin_command_buffer(cmd, &begin)
            .map_err(vk_step("begin_command_buffer"))?;

        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: cur.render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: cur.extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        driver.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
        driver.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, cur.pipeline);
        driver.cmd_draw(cmd, 3, 1, 0, 0);
        driver.cmd_end_render_pass(cmd);

        driver
            .end_command_buffer(cmd)
            .map_err(vk_step("end_command_buffer"))?;
    }
    debug!("recorded {} draw command buffer(s)", cur.command_buffers.len());
    Ok(())
}
