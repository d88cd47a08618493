//! Hardware queue submission.

use crate::context::DeviceContext;
use crate::error::Result;
use crate::queue_family::QueueRole;
use crate::sync::Fence;
use ash::vk;
use std::sync::Arc;

/// One hardware queue.
///
/// Owns nothing but the handle: command buffers and fences belong to the
/// frame loop and are passed in per submission.
pub struct CommandQueue {
    role: QueueRole,
    family: u32,
    queue: vk::Queue,
    ctx: Arc<DeviceContext>,
}

impl CommandQueue {
    /// Fetch the queue serving `role`.
    pub fn new(ctx: Arc<DeviceContext>, role: QueueRole) -> Result<Self> {
        let family = ctx.queue_family_for(role)?;
        let queue = unsafe { ctx.device().get_device_queue(family, 0) };

        tracing::debug!(?role, family, "Command queue created");

        Ok(Self {
            role,
            family,
            queue,
            ctx,
        })
    }

    /// Submit `command_buffers` as one batch.
    ///
    /// The batch waits on `fence.wait_semaphore` before color output,
    /// signals `fence.signal_semaphore`, and signals `fence.in_flight` on
    /// completion. The caller resets `in_flight` beforehand.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn execute(
        &self,
        command_buffers: &[vk::CommandBuffer],
        fence: &Fence,
        frame_index: u32,
    ) -> Result<()> {
        let wait_semaphores = [fence.wait_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [fence.signal_semaphore];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(&signal_semaphores);

        tracing::trace!(
            frame_index,
            count = command_buffers.len(),
            "Submitting command buffers"
        );

        unsafe {
            self.ctx
                .device()
                .queue_submit(self.queue, &[submit_info], fence.in_flight)?;
        }

        Ok(())
    }

    /// Block until the whole device is idle.
    ///
    /// This is a device-wide drain, not a queue wait; use it for teardown
    /// and resize, not frame pacing.
    pub fn wait(&self) -> Result<()> {
        self.ctx.wait_idle()
    }

    pub fn handle(&self) -> vk::Queue {
        self.queue
    }

    pub fn role(&self) -> QueueRole {
        self.role
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }
}
