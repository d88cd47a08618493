//! Swapchain-backed presentation target.
//!
//! A [`RenderWindow`] moves through `Active -> (Resizing -> Active)*` until it
//! is dropped. Each generation owns one swapchain plus a view and framebuffer
//! per back buffer. The render pass survives resizes since the surface
//! format is fixed by the settings.

use crate::command_queue::CommandQueue;
use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::swapchain::{
    compute_extent, pick_present_mode, pick_surface_format, validate_back_buffer_count,
    BackBuffers, Swapchain,
};
use crate::sync::Fence;
use crate::window::WindowProvider;
use ash::vk;
use std::sync::Arc;

/// Result of acquiring a back buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredBackBuffer {
    /// Index of the acquired image; also the current frame index.
    pub index: u32,
    /// The swapchain still works but no longer matches the surface.
    pub suboptimal: bool,
    /// Tracked index before a desync was corrected, if one happened.
    pub resynced_from: Option<u32>,
}

/// Presentation surface for one OS window.
pub struct RenderWindow {
    swapchain: Swapchain,
    back_buffers: BackBuffers,
    render_pass: vk::RenderPass,
    ctx: Arc<DeviceContext>,
}

impl RenderWindow {
    /// Create the swapchain, views, render pass and framebuffers for `window`.
    pub fn new<W>(ctx: Arc<DeviceContext>, window: &W) -> Result<Self>
    where
        W: WindowProvider + ?Sized,
    {
        let (width, height) = window.inner_size();

        let mut swapchain = unsafe { create_swapchain(&ctx, width, height, None)? };

        let render_pass = match unsafe { create_render_pass(ctx.device(), swapchain.format.format) }
        {
            Ok(render_pass) => render_pass,
            Err(e) => {
                unsafe { swapchain.destroy(ctx.device(), ctx.swapchain_loader()) };
                return Err(e);
            }
        };

        let framebuffers = match unsafe {
            create_framebuffers(ctx.device(), render_pass, &swapchain.image_views, swapchain.extent)
        } {
            Ok(framebuffers) => framebuffers,
            Err(e) => unsafe {
                ctx.device().destroy_render_pass(render_pass, None);
                swapchain.destroy(ctx.device(), ctx.swapchain_loader());
                return Err(e);
            },
        };

        tracing::info!(
            "Swapchain created: {}x{} ({} images, {:?}, {:?})",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len(),
            swapchain.format.format,
            swapchain.present_mode
        );

        Ok(Self {
            swapchain,
            back_buffers: BackBuffers::new(framebuffers),
            render_pass,
            ctx,
        })
    }

    /// Acquire the next back buffer, signalling `fence.wait_semaphore`.
    ///
    /// Blocks until an image is available. If the driver hands out a
    /// different image than the tracked frame index, the mismatch is logged
    /// and tracking follows the driver, so the following present targets
    /// the image that was actually acquired.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn acquire_back_buffer(&mut self, fence: &Fence) -> Result<AcquiredBackBuffer> {
        let (index, suboptimal) = unsafe {
            self.ctx.swapchain_loader().acquire_next_image(
                self.swapchain.swapchain,
                u64::MAX,
                fence.wait_semaphore,
                vk::Fence::null(),
            )?
        };

        let resynced_from = self.back_buffers.acquired(index);

        Ok(AcquiredBackBuffer {
            index,
            suboptimal,
            resynced_from,
        })
    }

    /// Present the current back buffer once `fence.signal_semaphore` fires,
    /// then advance the frame index.
    ///
    /// Returns `true` when the swapchain should be resized.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn present(&mut self, queue: &CommandQueue, fence: &Fence) -> Result<bool> {
        let wait_semaphores = [fence.signal_semaphore];
        let swapchains = [self.swapchain.swapchain];
        let image_indices = [self.back_buffers.present_index()];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.ctx
                .swapchain_loader()
                .queue_present(queue.handle(), &present_info)
        };

        let stale = match result {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => return Err(GpuError::from(e)),
        };

        self.back_buffers.presented();
        Ok(stale)
    }

    /// Rebuild the swapchain, views and framebuffers for a new window size.
    ///
    /// The caller must drain all GPU work that references the current
    /// framebuffers first. A zero-sized window keeps the current generation.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            tracing::debug!("Skipping resize to an empty window");
            return Ok(());
        }

        let device = self.ctx.device();
        let loader = self.ctx.swapchain_loader();

        let mut swapchain =
            unsafe { create_swapchain(&self.ctx, width, height, Some(self.swapchain.swapchain))? };

        let framebuffers = match unsafe {
            create_framebuffers(device, self.render_pass, &swapchain.image_views, swapchain.extent)
        } {
            Ok(framebuffers) => framebuffers,
            Err(e) => {
                unsafe { swapchain.destroy(device, loader) };
                return Err(e);
            }
        };

        let retired = self.back_buffers.replace(framebuffers);
        unsafe {
            for framebuffer in retired {
                device.destroy_framebuffer(framebuffer, None);
            }
            self.swapchain.destroy(device, loader);
        }
        self.swapchain = swapchain;

        tracing::info!(
            generation = self.back_buffers.generation(),
            "Swapchain recreated: {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height
        );

        Ok(())
    }

    /// Tracked back buffer index.
    pub fn frame_index(&self) -> u32 {
        self.back_buffers.frame_index()
    }

    pub fn back_buffer_count(&self) -> u32 {
        self.back_buffers.count()
    }

    /// Number of swapchain recreations so far.
    pub fn generation(&self) -> u64 {
        self.back_buffers.generation()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.swapchain.format
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        self.back_buffers.framebuffers()
    }

    pub fn framebuffer(&self, index: u32) -> Option<vk::Framebuffer> {
        self.back_buffers.framebuffer(index)
    }

    /// Framebuffer for the tracked frame index, which after an acquire is
    /// the acquired image.
    pub fn current_framebuffer(&self) -> Option<vk::Framebuffer> {
        self.back_buffers.current()
    }

    pub fn image(&self, index: u32) -> Option<vk::Image> {
        self.swapchain.images.get(index as usize).copied()
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }
}

impl Drop for RenderWindow {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            tracing::warn!("Device wait before swapchain teardown failed: {e}");
        }

        let device = self.ctx.device();
        unsafe {
            for framebuffer in self.back_buffers.take() {
                device.destroy_framebuffer(framebuffer, None);
            }
            self.swapchain.destroy(device, self.ctx.swapchain_loader());
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Negotiate and create a swapchain for a `width` x `height` window.
///
/// # Safety
/// `old_swapchain`, if any, must belong to the same surface.
unsafe fn create_swapchain(
    ctx: &DeviceContext,
    width: u32,
    height: u32,
    old_swapchain: Option<vk::SwapchainKHR>,
) -> Result<Swapchain> {
    let settings = ctx.settings();
    let support = ctx.swapchain_support();

    // Extent bounds move with the window, so re-read them every time.
    let capabilities = ctx.surface_capabilities()?;

    let format = pick_surface_format(
        &support.formats,
        settings.swapchain_format,
        settings.swapchain_color_space,
    )?;
    let present_mode = pick_present_mode(&support.present_modes, settings.swapchain_present_mode)?;
    let extent = compute_extent(&capabilities, width, height);
    let image_count = validate_back_buffer_count(&capabilities, settings.num_back_buffers)?;

    unsafe {
        Swapchain::new(
            ctx.device(),
            ctx.swapchain_loader(),
            ctx.surface().handle,
            &capabilities,
            format,
            present_mode,
            extent,
            image_count,
            old_swapchain,
        )
    }
}

/// Single-subpass render pass that clears and presents one color attachment.
///
/// # Safety
/// The device must be valid.
unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_refs = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);

    // Wait for the presentation engine to release the image before writing.
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    let render_pass = unsafe { device.create_render_pass(&create_info, None)? };
    Ok(render_pass)
}

/// One framebuffer per image view.
///
/// # Safety
/// The device, render pass and views must be valid.
unsafe fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    image_views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());

    for view in image_views {
        let attachments = [*view];
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match unsafe { device.create_framebuffer(&create_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                for framebuffer in framebuffers {
                    unsafe { device.destroy_framebuffer(framebuffer, None) };
                }
                return Err(e.into());
            }
        }
    }

    Ok(framebuffers)
}
