//! Window collaborator interface.

use crate::error::{GpuError, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::c_char;

/// What the core needs from the windowing layer.
///
/// Implemented by the application for whatever window type it uses; the
/// core only reads handles and the current pixel size.
pub trait WindowProvider: HasDisplayHandle + HasWindowHandle {
    /// Current drawable size in pixels.
    fn inner_size(&self) -> (u32, u32);

    /// Platform presentation extensions the instance must enable.
    fn required_extensions(&self) -> Result<&'static [*const c_char]> {
        let display = self
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;

        ash_window::enumerate_required_extensions(display.as_raw()).map_err(GpuError::from)
    }
}
