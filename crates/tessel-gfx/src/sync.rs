//! Frame synchronization objects.
//!
//! These are owned by the frame loop. The core only borrows them for the
//! duration of an acquire, submit or present call.

use crate::error::Result;
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = unsafe { device.create_semaphore(&create_info, None)? };
    Ok(semaphore)
}

/// Create a CPU-waitable fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = unsafe { device.create_fence(&create_info, None)? };
    Ok(fence)
}

/// The synchronization handed between acquire, execute and present.
///
/// Acquire signals `wait_semaphore`, execution waits on it and signals
/// `signal_semaphore`, present waits on that. `in_flight` lets the CPU
/// block until the submission that used this fence has finished.
pub struct Fence {
    pub wait_semaphore: vk::Semaphore,
    pub signal_semaphore: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl Fence {
    /// Create a fence whose CPU side starts signaled, so the first wait
    /// returns immediately.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        unsafe {
            Ok(Self {
                wait_semaphore: create_semaphore(device)?,
                signal_semaphore: create_semaphore(device)?,
                in_flight: create_fence(device, true)?,
            })
        }
    }

    /// Block until the last submission using this fence completes.
    ///
    /// # Safety
    /// The device must be valid.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.wait_for_fences(&[self.in_flight], true, u64::MAX)? };
        Ok(())
    }

    /// Return the CPU fence to the unsignaled state before resubmitting.
    ///
    /// # Safety
    /// The device must be valid and the fence not in use by a pending submission.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.reset_fences(&[self.in_flight])? };
        Ok(())
    }

    /// # Safety
    /// The device must be valid and no pending work may reference the fence.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.wait_semaphore, None);
            device.destroy_semaphore(self.signal_semaphore, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

/// One [`Fence`] per frame in flight, cycled in order.
pub struct FenceRing {
    fences: Vec<Fence>,
    current: usize,
}

impl FenceRing {
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, count: usize) -> Result<Self> {
        let mut fences = Vec::with_capacity(count.max(1));
        for _ in 0..count.max(1) {
            fences.push(unsafe { Fence::new(device)? });
        }

        Ok(Self { fences, current: 0 })
    }

    pub fn current(&self) -> &Fence {
        &self.fences[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    /// Move on to the next fence.
    pub fn advance(&mut self) {
        if !self.fences.is_empty() {
            self.current = (self.current + 1) % self.fences.len();
        }
    }

    /// # Safety
    /// The device must be valid and idle with respect to every fence.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for fence in self.fences.drain(..) {
            unsafe { fence.destroy(device) };
        }
        self.current = 0;
    }
}
