//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Every creation call rejected by the driver surfaces as one of these
/// variants. None of them are recoverable below the device layer; callers
/// are expected to log and shut down.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be found or initialized.
    #[error("Failed to load Vulkan: {0}")]
    Loader(String),

    /// No physical device scored above zero.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Descriptor-set or pipeline layout creation failed.
    #[error("Layout creation failed: {0}")]
    LayoutCreation(String),

    /// Settings contain a value the driver can never accept.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The back buffer handed out by the driver is not the one the
    /// render window was tracking.
    #[error("Frame index out of sync with the swapchain: tracked {tracked}, acquired {acquired}")]
    FrameIndexDesync { tracked: u32, acquired: u32 },

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl GpuError {
    /// The swapchain no longer matches the surface and must be recreated.
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, Self::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR))
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
