//! Presentable surface and swapchain support queries.

use crate::error::{GpuError, Result};
use crate::window::WindowProvider;
use ash::vk;

/// A window surface and the extension loader that services it.
#[derive(Clone)]
pub struct Surface {
    /// The Vulkan surface handle.
    pub handle: vk::SurfaceKHR,
    /// Surface extension loader.
    pub loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Bind the platform window to a presentable surface.
    ///
    /// # Safety
    /// The instance must have been created with the window's required
    /// extensions, and the window must outlive the surface.
    pub unsafe fn new<W>(entry: &ash::Entry, instance: &ash::Instance, window: &W) -> Result<Self>
    where
        W: WindowProvider + ?Sized,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let loader = ash::khr::surface::Instance::new(entry, instance);

        Ok(Self { handle, loader })
    }

    /// Whether the given queue family can present to this surface.
    ///
    /// # Safety
    /// The physical device must be valid.
    pub unsafe fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        let supported = unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.handle,
            )?
        };
        Ok(supported)
    }

    /// Current surface capabilities (extent bounds change with the window).
    ///
    /// # Safety
    /// The physical device must be valid.
    pub unsafe fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR> {
        let capabilities = unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)?
        };
        Ok(capabilities)
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// No swapchain may still reference the surface.
    pub unsafe fn destroy(&self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

/// Swapchain support of one physical device for the bound surface.
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupportDetails {
    /// Image count and extent bounds, supported transforms.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported (format, color space) pairs.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Query support details.
    ///
    /// # Safety
    /// The physical device and surface must be valid.
    pub unsafe fn query(surface: &Surface, physical_device: vk::PhysicalDevice) -> Result<Self> {
        unsafe {
            let capabilities = surface.capabilities(physical_device)?;
            let formats = surface
                .loader
                .get_physical_device_surface_formats(physical_device, surface.handle)?;
            let present_modes = surface
                .loader
                .get_physical_device_surface_present_modes(physical_device, surface.handle)?;

            Ok(Self {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    /// A swapchain can be built only with at least one format and present mode.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adequacy_needs_formats_and_present_modes() {
        let mut details = SwapchainSupportDetails::default();
        assert!(!details.is_adequate());

        details.formats.push(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });
        assert!(!details.is_adequate());

        details.present_modes.push(vk::PresentModeKHR::FIFO);
        assert!(details.is_adequate());
    }
}
