//! Swapchain creation and the negotiation rules behind it.

use crate::error::{GpuError, Result};
use ash::vk;

/// Find the configured (format, color space) pair among the supported ones.
pub fn pick_surface_format(
    available: &[vk::SurfaceFormatKHR],
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
) -> Result<vk::SurfaceFormatKHR> {
    available
        .iter()
        .copied()
        .find(|candidate| candidate.format == format && candidate.color_space == color_space)
        .ok_or_else(|| {
            GpuError::SwapchainCreation(format!(
                "Surface does not support {format:?} / {color_space:?}"
            ))
        })
}

/// Find the configured present mode among the supported ones.
pub fn pick_present_mode(
    available: &[vk::PresentModeKHR],
    mode: vk::PresentModeKHR,
) -> Result<vk::PresentModeKHR> {
    if available.contains(&mode) {
        Ok(mode)
    } else {
        Err(GpuError::SwapchainCreation(format!(
            "Surface does not support present mode {mode:?}"
        )))
    }
}

/// Swap extent for a window of `width` x `height` pixels.
///
/// The surface's current extent wins unless it is the `u32::MAX` sentinel,
/// in which case each dimension is clamped into the surface bounds.
pub fn compute_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: width.max(min.width).min(max.width),
        height: height.max(min.height).min(max.height),
    }
}

/// Check a back buffer count against the surface's image count bounds.
///
/// A `max_image_count` of zero means there is no upper bound.
pub fn validate_back_buffer_count(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    count: u32,
) -> Result<u32> {
    let min = capabilities.min_image_count;
    let max = capabilities.max_image_count;

    if count < min || (max != 0 && count > max) {
        let bound = if max == 0 {
            "unbounded".to_string()
        } else {
            max.to_string()
        };
        return Err(GpuError::InvalidConfig(format!(
            "{count} back buffers requested, surface allows {min}..={bound}"
        )));
    }

    Ok(count)
}

/// Locally tracked back buffer index.
///
/// Advances once per present and must agree with the index the driver hands
/// out on acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounter {
    index: u32,
    count: u32,
}

impl FrameCounter {
    pub fn new(count: u32) -> Self {
        Self {
            index: 0,
            count: count.max(1),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Step to the next back buffer, wrapping at the count.
    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.count;
    }

    /// Compare the tracked index with the one the driver acquired.
    pub fn verify(&self, acquired: u32) -> Result<()> {
        if acquired == self.index {
            Ok(())
        } else {
            Err(GpuError::FrameIndexDesync {
                tracked: self.index,
                acquired,
            })
        }
    }

    /// Adopt the driver's index after a desync.
    pub fn resync(&mut self, acquired: u32) {
        self.index = acquired % self.count;
    }

    /// Restart at zero for a new swapchain.
    pub fn reset(&mut self, count: u32) {
        *self = Self::new(count);
    }
}

impl Default for FrameCounter {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Framebuffers of the live swapchain generation and the frame index that
/// selects among them.
///
/// Replacing the set resets tracking to image 0 and bumps the generation, so
/// nothing handed out afterwards can come from a retired set.
#[derive(Debug, Default)]
pub struct BackBuffers {
    framebuffers: Vec<vk::Framebuffer>,
    frames: FrameCounter,
    generation: u64,
}

impl BackBuffers {
    pub fn new(framebuffers: Vec<vk::Framebuffer>) -> Self {
        Self {
            frames: FrameCounter::new(framebuffer_count(&framebuffers)),
            framebuffers,
            generation: 0,
        }
    }

    /// Record the image the driver acquired.
    ///
    /// On a mismatch the desync is logged, tracking follows the driver and
    /// the previously tracked index is returned.
    pub fn acquired(&mut self, index: u32) -> Option<u32> {
        match self.frames.verify(index) {
            Ok(()) => None,
            Err(e) => {
                tracing::error!("{e}");
                let tracked = self.frames.index();
                self.frames.resync(index);
                Some(tracked)
            }
        }
    }

    /// Image index the next present targets.
    pub fn present_index(&self) -> u32 {
        self.frames.index()
    }

    /// Step past the image that was just presented.
    pub fn presented(&mut self) {
        self.frames.advance();
    }

    /// Install the framebuffers of a new swapchain generation.
    ///
    /// Returns the retired set, which the caller destroys.
    pub fn replace(&mut self, framebuffers: Vec<vk::Framebuffer>) -> Vec<vk::Framebuffer> {
        self.frames.reset(framebuffer_count(&framebuffers));
        self.generation += 1;
        std::mem::replace(&mut self.framebuffers, framebuffers)
    }

    /// Hand out every framebuffer for teardown.
    pub fn take(&mut self) -> Vec<vk::Framebuffer> {
        std::mem::take(&mut self.framebuffers)
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn framebuffer(&self, index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index as usize).copied()
    }

    /// Framebuffer for the tracked frame index.
    pub fn current(&self) -> Option<vk::Framebuffer> {
        self.framebuffer(self.frames.index())
    }

    pub fn frame_index(&self) -> u32 {
        self.frames.index()
    }

    pub fn count(&self) -> u32 {
        self.frames.count()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

fn framebuffer_count(framebuffers: &[vk::Framebuffer]) -> u32 {
    u32::try_from(framebuffers.len()).unwrap_or(u32::MAX)
}

/// Swapchain handle, its images and one view per image.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain with exactly `image_count` requested images.
    ///
    /// # Safety
    /// All handles must be valid. `old_swapchain`, if any, must no longer
    /// be in use by pending work.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface: vk::SurfaceKHR,
        capabilities: &vk::SurfaceCapabilitiesKHR,
        format: vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        extent: vk::Extent2D,
        image_count: u32,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };

        if images.len() != image_count as usize {
            tracing::warn!(
                requested = image_count,
                created = images.len(),
                "Driver created a different number of swapchain images"
            );
        }

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            match unsafe { device.create_image_view(&view_info, None) } {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    unsafe {
                        for view in image_views {
                            device.destroy_image_view(view, None);
                        }
                        swapchain_loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(Self {
            swapchain,
            images,
            image_views,
            format,
            present_mode,
            extent,
        })
    }

    /// Destroy the views, then the swapchain.
    ///
    /// # Safety
    /// No pending work may reference the swapchain images.
    pub unsafe fn destroy(
        &mut self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        unsafe {
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn bounded_capabilities() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 4,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 256,
                height: 256,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn extent_clamps_each_dimension() {
        let caps = bounded_capabilities();

        let extent = compute_extent(&caps, 8000, 600);
        assert_eq!((extent.width, extent.height), (4096, 600));

        let extent = compute_extent(&caps, 10, 9000);
        assert_eq!((extent.width, extent.height), (256, 4096));
    }

    #[test]
    fn current_extent_wins_when_defined() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..bounded_capabilities()
        };

        let extent = compute_extent(&caps, 8000, 600);
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn back_buffer_count_bounds() {
        let caps = bounded_capabilities();
        assert!(validate_back_buffer_count(&caps, 1).is_err());
        assert_eq!(validate_back_buffer_count(&caps, 2).ok(), Some(2));
        assert_eq!(validate_back_buffer_count(&caps, 4).ok(), Some(4));
        assert!(validate_back_buffer_count(&caps, 5).is_err());
    }

    #[test]
    fn zero_max_image_count_is_unbounded() {
        let caps = vk::SurfaceCapabilitiesKHR {
            max_image_count: 0,
            ..bounded_capabilities()
        };
        assert_eq!(validate_back_buffer_count(&caps, 16).ok(), Some(16));
        assert!(validate_back_buffer_count(&caps, 1).is_err());
    }

    #[test]
    fn surface_format_must_match_exactly() {
        let available = [
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let picked = pick_surface_format(
            &available,
            vk::Format::B8G8R8A8_UNORM,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        );
        assert_eq!(picked.ok().map(|f| f.format), Some(vk::Format::B8G8R8A8_UNORM));

        assert!(pick_surface_format(
            &available,
            vk::Format::R8G8B8A8_UNORM,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )
        .is_err());
    }

    #[test]
    fn present_mode_must_be_supported() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert!(pick_present_mode(&available, vk::PresentModeKHR::MAILBOX).is_ok());
        assert!(pick_present_mode(&available, vk::PresentModeKHR::IMMEDIATE).is_err());
    }

    #[test]
    fn frame_index_after_n_cycles() {
        for back_buffers in 1..=4 {
            let mut counter = FrameCounter::new(back_buffers);
            for n in 1..=25u32 {
                assert!(counter.verify(counter.index()).is_ok());
                counter.advance();
                assert_eq!(counter.index(), n % back_buffers);
            }
        }
    }

    #[test]
    fn desync_is_reported_and_resynced() {
        let mut counter = FrameCounter::new(3);
        counter.advance();

        match counter.verify(2) {
            Err(GpuError::FrameIndexDesync { tracked, acquired }) => {
                assert_eq!((tracked, acquired), (1, 2));
            }
            other => panic!("expected desync, got {other:?}"),
        }

        counter.resync(2);
        assert_eq!(counter.index(), 2);
        counter.advance();
        assert_eq!(counter.index(), 0);
    }

    #[test]
    fn reset_starts_over() {
        let mut counter = FrameCounter::new(3);
        counter.advance();
        counter.advance();
        counter.reset(2);
        assert_eq!((counter.index(), counter.count()), (0, 2));
    }

    fn handles(raws: std::ops::Range<u64>) -> Vec<vk::Framebuffer> {
        raws.map(vk::Framebuffer::from_raw).collect()
    }

    #[test]
    fn resize_retires_the_old_framebuffer_set() {
        let mut back_buffers = BackBuffers::new(handles(1..4));
        back_buffers.acquired(0);
        back_buffers.presented();
        assert_eq!(back_buffers.frame_index(), 1);

        let retired = back_buffers.replace(handles(10..12));

        assert_eq!(retired, handles(1..4));
        assert_eq!(back_buffers.generation(), 1);
        assert_eq!((back_buffers.frame_index(), back_buffers.count()), (0, 2));
        for old in &retired {
            assert!(!back_buffers.framebuffers().contains(old));
        }
    }

    #[test]
    fn presents_after_resize_use_only_the_new_set() {
        let mut back_buffers = BackBuffers::new(handles(1..4));
        back_buffers.acquired(0);
        back_buffers.presented();
        let retired = back_buffers.replace(handles(10..12));

        for _ in 0..5 {
            let index = back_buffers.present_index();
            assert!(back_buffers.acquired(index).is_none());
            let framebuffer = back_buffers.current();
            assert!(framebuffer.is_some_and(|fb| !retired.contains(&fb)));
            assert_eq!(framebuffer, back_buffers.framebuffer(index));
            back_buffers.presented();
        }
    }

    #[test]
    fn desync_reports_tracked_index_and_presents_the_acquired_image() {
        let mut back_buffers = BackBuffers::new(handles(1..4));

        assert_eq!(back_buffers.acquired(2), Some(0));
        assert_eq!(back_buffers.present_index(), 2);
        assert_eq!(back_buffers.current(), Some(vk::Framebuffer::from_raw(3)));

        back_buffers.presented();
        assert_eq!(back_buffers.present_index(), 0);
        assert_eq!(back_buffers.acquired(0), None);
    }

    #[test]
    fn empty_set_hands_out_nothing() {
        let mut back_buffers = BackBuffers::default();
        assert_eq!(back_buffers.current(), None);
        assert!(back_buffers.take().is_empty());
    }
}
