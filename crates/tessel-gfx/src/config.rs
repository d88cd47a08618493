//! Static graphics settings.

use ash::vk;
use std::ffi::CStr;

/// Settings read by [`DeviceContext`](crate::DeviceContext) and
/// [`RenderWindow`](crate::RenderWindow) at creation time.
///
/// The core never mutates these; they are captured by value when the
/// context is built.
#[derive(Debug, Clone)]
pub struct GfxSettings {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Enable validation layers and the debug messenger.
    pub enable_validation_layers: bool,
    /// Layers requested when validation is enabled.
    pub validation_layer_names: Vec<&'static CStr>,
    /// Instance extensions appended after the window's presentation extensions.
    pub instance_extensions: Vec<&'static CStr>,
    /// Device extensions every candidate GPU must expose.
    pub device_extensions: Vec<&'static CStr>,
    /// Number of swapchain images.
    pub num_back_buffers: u32,
    /// Required swapchain format.
    pub swapchain_format: vk::Format,
    /// Required swapchain color space.
    pub swapchain_color_space: vk::ColorSpaceKHR,
    /// Required present mode.
    pub swapchain_present_mode: vk::PresentModeKHR,
}

impl Default for GfxSettings {
    fn default() -> Self {
        Self {
            app_name: "Tessel".to_string(),
            enable_validation_layers: cfg!(debug_assertions),
            validation_layer_names: vec![c"VK_LAYER_KHRONOS_validation"],
            instance_extensions: Vec::new(),
            device_extensions: vec![ash::khr::swapchain::NAME],
            num_back_buffers: 3,
            swapchain_format: vk::Format::B8G8R8A8_UNORM,
            swapchain_color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            swapchain_present_mode: vk::PresentModeKHR::FIFO,
        }
    }
}

impl GfxSettings {
    /// Create settings with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation_layers = enable;
        self
    }

    /// Request an additional instance extension.
    pub fn with_instance_extension(mut self, name: &'static CStr) -> Self {
        if !self.instance_extensions.contains(&name) {
            self.instance_extensions.push(name);
        }
        self
    }

    /// Require an additional device extension.
    pub fn with_device_extension(mut self, name: &'static CStr) -> Self {
        if !self.device_extensions.contains(&name) {
            self.device_extensions.push(name);
        }
        self
    }

    /// Set the number of back buffers.
    pub fn with_back_buffers(mut self, count: u32) -> Self {
        self.num_back_buffers = count;
        self
    }

    /// Set the required swapchain format and color space.
    pub fn with_swapchain_format(
        mut self,
        format: vk::Format,
        color_space: vk::ColorSpaceKHR,
    ) -> Self {
        self.swapchain_format = format;
        self.swapchain_color_space = color_space;
        self
    }

    /// Set the required present mode.
    pub fn with_present_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.swapchain_present_mode = mode;
        self
    }

    /// Frames the allocator must keep a freed resource alive for.
    pub fn frames_in_flight(&self) -> u32 {
        self.num_back_buffers.saturating_sub(1)
    }

    /// Whether `name` is in the configured device extension list.
    pub fn enables_device_extension(&self, name: &CStr) -> bool {
        self.device_extensions.iter().any(|ext| *ext == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_in_flight_is_one_less_than_back_buffers() {
        assert_eq!(GfxSettings::new().with_back_buffers(3).frames_in_flight(), 2);
        assert_eq!(GfxSettings::new().with_back_buffers(1).frames_in_flight(), 0);
        assert_eq!(GfxSettings::new().with_back_buffers(0).frames_in_flight(), 0);
    }

    #[test]
    fn device_extensions_are_deduplicated() {
        let settings = GfxSettings::new()
            .with_device_extension(ash::khr::swapchain::NAME)
            .with_device_extension(ash::nv::mesh_shader::NAME);

        assert_eq!(settings.device_extensions.len(), 2);
        assert!(settings.enables_device_extension(ash::nv::mesh_shader::NAME));
        assert!(!settings.enables_device_extension(ash::nv::ray_tracing::NAME));
    }
}
