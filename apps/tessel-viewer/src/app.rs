//! Window, event loop and frame loop.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tessel_gfx::{
    CommandQueue, DeviceContext, FenceRing, QueueRole, RenderWindow, RootSignature,
    RootSignatureDesc, WindowProvider,
};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowId};

use crate::config::ViewerConfig;
use crate::frame::{frames_in_flight_for, record_clear, FrameResources, FrameUniforms};

/// winit window as seen by the core.
#[derive(Clone)]
pub struct ViewerWindow(pub Arc<Window>);

impl HasDisplayHandle for ViewerWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.0.display_handle()
    }
}

impl HasWindowHandle for ViewerWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.0.window_handle()
    }
}

impl WindowProvider for ViewerWindow {
    fn inner_size(&self) -> (u32, u32) {
        let size = self.0.inner_size();
        (size.width, size.height)
    }
}

/// Event loop handler. The first fatal error is kept so `main` can exit
/// with it.
pub struct ViewerApp {
    config: ViewerConfig,
    state: Option<ViewerState>,
    pub failure: Option<anyhow::Error>,
}

impl ViewerApp {
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            config,
            state: None,
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, context: &str, e: anyhow::Error) {
        error!("{context}: {e:#}");
        self.state = None;
        if self.failure.is_none() {
            self.failure = Some(e);
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating viewer state...");

        match ViewerState::new(event_loop, &self.config) {
            Ok(state) => {
                self.state = Some(state);
                info!("Viewer ready");
            }
            Err(e) => self.fail(event_loop, "Failed to initialize viewer", e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.state = None;
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => match state.render_frame() {
                Ok(true) => {
                    info!(frames = state.frame_count, "Frame limit reached");
                    self.state = None;
                    event_loop.exit();
                }
                Ok(false) => state.window.0.request_redraw(),
                Err(e) => self.fail(event_loop, "Render error", e),
            },
            WindowEvent::Resized(size) => {
                if let Err(e) = state.handle_resize(size) {
                    self.fail(event_loop, "Resize error", e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.0.request_redraw();
        }
    }
}

/// Everything created once the window exists.
///
/// Field order is drop order: recording resources and layouts go before the
/// swapchain, the swapchain before the device, the device before the window.
struct ViewerState {
    frames: FrameResources,
    fences: FenceRing,
    root_signature: RootSignature,
    render_window: RenderWindow,
    queue: CommandQueue,
    ctx: Arc<DeviceContext>,
    window: ViewerWindow,
    max_frames: Option<u64>,
    frame_count: u64,
    needs_resize: bool,
    started: Instant,
}

impl ViewerState {
    fn new(event_loop: &ActiveEventLoop, config: &ViewerConfig) -> anyhow::Result<Self> {
        let window_attrs = Window::default_attributes()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height));
        let window = ViewerWindow(Arc::new(event_loop.create_window(window_attrs)?));

        let ctx = DeviceContext::new(config.gfx_settings(), &window)?;
        let queue = CommandQueue::new(ctx.clone(), QueueRole::Direct)?;
        let render_window = RenderWindow::new(ctx.clone(), &window)?;

        let root_signature = RootSignature::compile(
            ctx.clone(),
            &RootSignatureDesc::new()
                .uniform_buffer(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
        )?;

        let slot_count = render_window.back_buffer_count() as usize;
        // SAFETY: Device is valid
        let fences = unsafe { FenceRing::new(ctx.device(), slot_count)? };
        let frames = FrameResources::new(&ctx, &root_signature, fences.len())?;
        ctx.allocator()
            .lock()
            .set_frames_in_flight(frames_in_flight_for(fences.len()));

        for (feature, supported) in ctx.negotiated_features().report() {
            info!(feature, supported, "Optional feature");
        }

        Ok(Self {
            frames,
            fences,
            root_signature,
            render_window,
            queue,
            ctx,
            window,
            max_frames: config.max_frames,
            frame_count: 0,
            needs_resize: false,
            started: Instant::now(),
        })
    }

    /// Render one frame. Returns `true` once the frame limit is reached.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<bool> {
        let (width, height) = self.window.inner_size();
        if !has_area(width, height) {
            return Ok(false);
        }

        if self.needs_resize {
            self.recreate_swapchain(width, height)?;
        }

        let device = self.ctx.device();
        let slot_index = self.fences.current_index();
        let fence = self.fences.current();

        // SAFETY: Fence belongs to this device
        unsafe { fence.wait(device)? };
        self.ctx.allocator().lock().begin_frame()?;

        let acquired = match self.render_window.acquire_back_buffer(fence) {
            Ok(acquired) => acquired,
            Err(e) if e.is_out_of_date() => {
                self.needs_resize = true;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        // SAFETY: The wait above guarantees no submission still uses this fence
        unsafe { fence.reset(device)? };

        let framebuffer = self
            .render_window
            .current_framebuffer()
            .ok_or_else(|| anyhow::anyhow!("No framebuffer for back buffer {}", acquired.index))?;
        let extent = self.render_window.extent();

        let uniforms = FrameUniforms::at(
            self.started.elapsed().as_secs_f32(),
            self.frame_count,
            extent,
        );

        let slot = self.frames.slot_mut(slot_index);
        slot.uniforms.write(&[uniforms])?;

        // SAFETY: The slot's fence has signaled, so its command buffer is idle
        unsafe {
            record_clear(
                device,
                slot,
                &self.root_signature,
                self.render_window.render_pass(),
                framebuffer,
                extent,
                uniforms.clear_color,
            )?;
        }

        self.queue
            .execute(&[slot.command_buffer], fence, acquired.index)?;
        let stale = self.render_window.present(&self.queue, fence)?;
        self.fences.advance();

        self.needs_resize |= stale || acquired.suboptimal;
        self.frame_count += 1;

        if self.frame_count % 600 == 0 {
            let report = self.ctx.allocator().lock().report();
            info!(
                frames = self.frame_count,
                allocated = report.allocated_bytes,
                reserved = report.reserved_bytes,
                pending_frees = report.pending_frees,
                "GPU memory"
            );
        }

        Ok(self.max_frames.is_some_and(|max| self.frame_count >= max))
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) -> anyhow::Result<()> {
        self.recreate_swapchain(size.width, size.height)
    }

    /// Rebuild the swapchain. A minimized window leaves the resize pending.
    fn recreate_swapchain(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        if !has_area(width, height) {
            self.needs_resize = true;
            return Ok(());
        }

        // Nothing may still target the old framebuffers.
        self.queue.wait()?;
        self.render_window.resize(width, height)?;
        self.needs_resize = false;

        if self.render_window.back_buffer_count() as usize != self.fences.len() {
            warn!(
                back_buffers = self.render_window.back_buffer_count(),
                fences = self.fences.len(),
                "Back buffer count changed on resize"
            );
        }

        Ok(())
    }
}

impl Drop for ViewerState {
    fn drop(&mut self) {
        if let Err(e) = self.queue.wait() {
            warn!("Device wait on shutdown failed: {e}");
        }

        let device = self.ctx.device();
        // SAFETY: The device is idle
        unsafe {
            self.frames.destroy(&self.ctx);
            self.fences.destroy(device);
        }

        info!(frames = self.frame_count, "Viewer shut down");
    }
}

/// Minimized windows report a zero size and have nothing to present to.
fn has_area(width: u32, height: u32) -> bool {
    width > 0 && height > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimized_window_has_no_area() {
        assert!(!has_area(0, 0));
        assert!(!has_area(1280, 0));
        assert!(!has_area(0, 720));
        assert!(has_area(1, 1));
    }
}
