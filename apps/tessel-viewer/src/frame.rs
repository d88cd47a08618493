//! Per-slot recording resources for the frame loop.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use tessel_gfx::{DeviceContext, GpuBuffer, MemoryLocation, RootSignature};

/// Uniform block bound at set 0, slot 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FrameUniforms {
    pub clear_color: [f32; 4],
    pub time: f32,
    pub frame: u32,
    pub extent: [u32; 2],
}

impl FrameUniforms {
    /// Slowly cycling clear color for `time` seconds since start.
    pub fn at(time: f32, frame: u64, extent: vk::Extent2D) -> Self {
        let phase = time * 0.5;
        Self {
            clear_color: [
                0.5 + 0.5 * phase.sin(),
                0.5 + 0.5 * (phase + 2.094).sin(),
                0.5 + 0.5 * (phase + 4.189).sin(),
                1.0,
            ],
            time,
            frame: frame as u32,
            extent: [extent.width, extent.height],
        }
    }
}

/// Frames that may still be executing while the CPU records into one of
/// `slot_count` fence slots.
pub fn frames_in_flight_for(slot_count: usize) -> u32 {
    u32::try_from(slot_count.saturating_sub(1)).unwrap_or(u32::MAX)
}

/// Command buffer, uniform buffer and descriptor set for one fence slot.
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub uniforms: GpuBuffer,
    pub descriptor_set: vk::DescriptorSet,
}

/// Recording resources, one slot per fence in the ring.
pub struct FrameResources {
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    slots: Vec<FrameSlot>,
}

impl FrameResources {
    pub fn new(
        ctx: &DeviceContext,
        root_signature: &RootSignature,
        slot_count: usize,
    ) -> anyhow::Result<Self> {
        let device = ctx.device();
        let slot_count_u32 = u32::try_from(slot_count)?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(ctx.direct_queue_family())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        // SAFETY: Device is valid
        let command_pool = unsafe { device.create_command_pool(&pool_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(slot_count_u32);
        // SAFETY: Device and command pool are valid
        let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info)? };

        let pool_sizes = root_signature.desc().pool_sizes(slot_count_u32);
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(slot_count_u32)
            .pool_sizes(&pool_sizes);
        // SAFETY: Device is valid
        let descriptor_pool = unsafe { device.create_descriptor_pool(&descriptor_pool_info, None)? };

        let set_layout = root_signature
            .set_layout(0)
            .ok_or_else(|| anyhow::anyhow!("Root signature has no descriptor set"))?;
        let layouts = vec![set_layout; slot_count];
        let set_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&layouts);
        // SAFETY: Device and pool are valid
        let descriptor_sets = unsafe { device.allocate_descriptor_sets(&set_info)? };

        let uniform_size = std::mem::size_of::<FrameUniforms>() as u64;
        let mut slots = Vec::with_capacity(slot_count);
        {
            let mut allocator = ctx.allocator().lock();
            for (index, (command_buffer, descriptor_set)) in
                command_buffers.into_iter().zip(descriptor_sets).enumerate()
            {
                let uniforms = allocator.create_buffer(
                    uniform_size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                    &format!("frame_uniforms_{index}"),
                )?;

                let buffer_info = vk::DescriptorBufferInfo::default()
                    .buffer(uniforms.buffer)
                    .offset(0)
                    .range(uniform_size);
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(&buffer_info));
                // SAFETY: Set and buffer are valid and not in use
                unsafe { device.update_descriptor_sets(&[write], &[]) };

                slots.push(FrameSlot {
                    command_buffer,
                    uniforms,
                    descriptor_set,
                });
            }
        }

        Ok(Self {
            command_pool,
            descriptor_pool,
            slots,
        })
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut FrameSlot {
        &mut self.slots[index]
    }

    /// Hand buffers back to the allocator and destroy the pools.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        let device = ctx.device();
        {
            let mut allocator = ctx.allocator().lock();
            for slot in self.slots.drain(..) {
                allocator.free_buffer_deferred(slot.uniforms);
            }
        }

        // SAFETY: Caller guarantees the device is idle
        unsafe {
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Record a render pass that only clears the framebuffer.
///
/// # Safety
/// All handles must be valid and the command buffer not in use.
pub unsafe fn record_clear(
    device: &ash::Device,
    slot: &FrameSlot,
    root_signature: &RootSignature,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    clear_color: [f32; 4],
) -> anyhow::Result<()> {
    let cmd = slot.command_buffer;

    unsafe {
        device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(cmd, &begin_info)?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        }];
        let pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            root_signature.pipeline_layout(),
            0,
            &[slot.descriptor_set],
            &[],
        );
        device.cmd_end_render_pass(cmd);

        device.end_command_buffer(cmd)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_are_tightly_packed() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 32);
        let binding = FrameUniforms::at(0.0, 0, vk::Extent2D::default());
        let bytes = bytemuck::bytes_of(&binding);
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn hold_time_trails_the_fence_ring() {
        assert_eq!(frames_in_flight_for(3), 2);
        assert_eq!(frames_in_flight_for(1), 0);
        assert_eq!(frames_in_flight_for(0), 0);
    }

    #[test]
    fn clear_color_stays_in_range() {
        for step in 0..100 {
            let uniforms = FrameUniforms::at(step as f32 * 0.37, step, vk::Extent2D::default());
            for channel in uniforms.clear_color {
                assert!((0.0..=1.0).contains(&channel), "{channel}");
            }
        }
    }
}
