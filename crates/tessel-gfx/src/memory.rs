//! GPU memory management.

use crate::deferred::DeferredQueue;
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;

/// Snapshot of allocator usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReport {
    pub allocation_count: usize,
    pub block_count: usize,
    pub allocated_bytes: u64,
    pub reserved_bytes: u64,
    /// Buffers freed by the caller but still held for in-flight frames.
    pub pending_frees: usize,
}

/// Allocator wrapper that recycles memory across in-flight frames.
///
/// Buffers handed to [`free_buffer_deferred`](Self::free_buffer_deferred) are
/// only released once `frames_in_flight` later frames have begun.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: ash::Device,
    deferred: DeferredQueue<GpuBuffer>,
    frame: u64,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        frames_in_flight: u32,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        tracing::debug!(frames_in_flight, "GPU allocator created");

        Ok(Self {
            allocator: Some(allocator),
            device: device.clone(),
            deferred: DeferredQueue::new(frames_in_flight),
            frame: 0,
        })
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator already shut down".to_string()))
    }

    /// Allocate and bind a buffer.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.inner().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };

        let mut gpu_buffer = GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        };

        if let Err(e) = bound {
            self.free_buffer(&mut gpu_buffer)?;
            return Err(e.into());
        }

        Ok(gpu_buffer)
    }

    /// Free a buffer immediately.
    ///
    /// The caller guarantees no submitted work still reads it.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            self.inner()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }

        if buffer.buffer != vk::Buffer::null() {
            unsafe { self.device.destroy_buffer(buffer.buffer, None) };
            buffer.buffer = vk::Buffer::null();
        }

        Ok(())
    }

    /// Free a buffer once every frame that may reference it has retired.
    pub fn free_buffer_deferred(&mut self, buffer: GpuBuffer) {
        self.deferred.push(buffer, self.frame);
    }

    /// Start a new frame, releasing buffers that are no longer in flight.
    pub fn begin_frame(&mut self) -> Result<()> {
        self.frame += 1;
        for mut buffer in self.deferred.drain_ready(self.frame) {
            self.free_buffer(&mut buffer)?;
        }
        Ok(())
    }

    /// Number of frames started so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn frames_in_flight(&self) -> u32 {
        self.deferred.frames_in_flight()
    }

    /// Match the hold time to the number of frames the caller actually keeps
    /// in flight. Already queued buffers follow the new hold time.
    pub fn set_frames_in_flight(&mut self, frames_in_flight: u32) {
        if frames_in_flight != self.deferred.frames_in_flight() {
            tracing::debug!(
                from = self.deferred.frames_in_flight(),
                to = frames_in_flight,
                "Deferred free hold time changed"
            );
            self.deferred.set_frames_in_flight(frames_in_flight);
        }
    }

    /// Current allocator usage.
    pub fn report(&self) -> MemoryReport {
        let pending_frees = self.deferred.len();
        self.allocator.as_ref().map_or(
            MemoryReport {
                pending_frees,
                ..MemoryReport::default()
            },
            |allocator| {
                let report = allocator.generate_report();
                MemoryReport {
                    allocation_count: report.allocations.len(),
                    block_count: report.blocks.len(),
                    allocated_bytes: report.total_allocated_bytes,
                    reserved_bytes: report.total_reserved_bytes,
                    pending_frees,
                }
            },
        )
    }

    /// Release all pending frees and the allocator itself.
    ///
    /// Must run after a device idle wait and before the device is destroyed.
    /// Allocations the caller still holds are reported as leaks.
    pub fn shutdown(&mut self) {
        if self.allocator.is_none() {
            return;
        }

        for mut buffer in self.deferred.flush() {
            if let Err(e) = self.free_buffer(&mut buffer) {
                tracing::warn!("Failed to free deferred buffer: {e}");
            }
        }

        self.allocator = None;
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A GPU buffer with its allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl GpuBuffer {
    /// Copy plain data to the start of a host-visible buffer.
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Copy raw bytes into a host-visible buffer at `offset`.
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= self.size)
            .ok_or_else(|| GpuError::InvalidState("Data range too large for buffer".to_string()))?;

        let mapped = self
            .allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }
}
