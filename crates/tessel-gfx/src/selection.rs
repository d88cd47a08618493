//! Physical device scoring and selection.

use crate::capabilities::device_extension_names;
use crate::config::GfxSettings;
use crate::error::{GpuError, Result};
use crate::queue_family::QueueFamilyIndices;
use crate::surface::{Surface, SwapchainSupportDetails};
use ash::vk;

/// Bonus awarded to discrete GPUs.
pub const DISCRETE_GPU_BONUS: u32 = 1000;

/// Everything device scoring looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub has_direct_family: bool,
    pub has_required_extensions: bool,
    pub swapchain_adequate: bool,
    pub geometry_shader: bool,
    pub tessellation_shader: bool,
}

impl DeviceCandidate {
    /// Gather scoring inputs for one physical device.
    ///
    /// # Safety
    /// The instance, surface and physical device must be valid.
    pub unsafe fn query(
        instance: &ash::Instance,
        surface: &Surface,
        physical_device: vk::PhysicalDevice,
        settings: &GfxSettings,
    ) -> Result<Self> {
        unsafe {
            let properties = instance.get_physical_device_properties(physical_device);
            let features = instance.get_physical_device_features(physical_device);
            let queue_families = QueueFamilyIndices::query(instance, surface, physical_device)?;
            let swapchain_support = SwapchainSupportDetails::query(surface, physical_device)?;
            let available = device_extension_names(instance, physical_device)?;

            let has_required_extensions = settings
                .device_extensions
                .iter()
                .all(|ext| ext.to_str().is_ok_and(|name| available.contains(name)));

            Ok(Self {
                device_type: properties.device_type,
                max_image_dimension_2d: properties.limits.max_image_dimension2_d,
                has_direct_family: queue_families.has_direct_family(),
                has_required_extensions,
                swapchain_adequate: swapchain_support.is_adequate(),
                geometry_shader: features.geometry_shader == vk::TRUE,
                tessellation_shader: features.tessellation_shader == vk::TRUE,
            })
        }
    }

    /// Suitability score; zero means the device is disqualified.
    pub fn score(&self) -> u32 {
        if !self.has_direct_family
            || !self.has_required_extensions
            || !self.swapchain_adequate
            || !self.geometry_shader
            || !self.tessellation_shader
        {
            return 0;
        }

        let mut score = 0u32;

        if self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += DISCRETE_GPU_BONUS;
        }

        // Larger textures mean more capable hardware.
        score.saturating_add(self.max_image_dimension_2d)
    }
}

/// Score a queried candidate. A device whose capabilities could not be
/// queried is disqualified rather than failing the whole selection.
pub fn score_queried(candidate: &Result<DeviceCandidate>) -> u32 {
    match candidate {
        Ok(candidate) => candidate.score(),
        Err(e) => {
            tracing::warn!("Skipping physical device that could not be queried: {e}");
            0
        }
    }
}

/// Pick the highest-scoring item with a score above zero.
///
/// Equal scores keep the later item.
pub fn pick_best<T>(scored: impl IntoIterator<Item = (T, u32)>) -> Option<T> {
    let mut best: Option<(T, u32)> = None;

    for (item, score) in scored {
        if score == 0 {
            continue;
        }
        if best.as_ref().map_or(true, |(_, best_score)| score >= *best_score) {
            best = Some((item, score));
        }
    }

    best.map(|(item, _)| item)
}

/// Enumerate, score and select a physical device.
///
/// # Safety
/// The instance and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: &Surface,
    settings: &GfxSettings,
) -> Result<vk::PhysicalDevice> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        tracing::error!("No GPUs with Vulkan support found");
        return Err(GpuError::NoSuitableDevice);
    }

    let mut scored = Vec::with_capacity(devices.len());
    for device in devices {
        let candidate = unsafe { DeviceCandidate::query(instance, surface, device, settings) };
        let score = score_queried(&candidate);
        tracing::debug!(?candidate, score, "Scored physical device");
        scored.push((device, score));
    }

    pick_best(scored).ok_or(GpuError::NoSuitableDevice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capable_discrete() -> DeviceCandidate {
        DeviceCandidate {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            max_image_dimension_2d: 16384,
            has_direct_family: true,
            has_required_extensions: true,
            swapchain_adequate: true,
            geometry_shader: true,
            tessellation_shader: true,
        }
    }

    #[test]
    fn discrete_gpu_score() {
        assert_eq!(capable_discrete().score(), 17384);
    }

    #[test]
    fn integrated_gpu_gets_no_bonus() {
        let candidate = DeviceCandidate {
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            ..capable_discrete()
        };
        assert_eq!(candidate.score(), 16384);
    }

    #[test]
    fn missing_capabilities_disqualify() {
        let base = capable_discrete();
        let disqualified = [
            DeviceCandidate { tessellation_shader: false, ..base },
            DeviceCandidate { geometry_shader: false, ..base },
            DeviceCandidate { has_direct_family: false, ..base },
            DeviceCandidate { has_required_extensions: false, ..base },
            DeviceCandidate { swapchain_adequate: false, ..base },
        ];

        for candidate in disqualified {
            assert_eq!(candidate.score(), 0, "{candidate:?}");
        }
    }

    #[test]
    fn highest_score_wins() {
        assert_eq!(pick_best([("a", 100), ("b", 17384), ("c", 4096)]), Some("b"));
    }

    #[test]
    fn all_zero_scores_select_nothing() {
        assert_eq!(pick_best([("a", 0), ("b", 0)]), None);
        assert_eq!(pick_best(Vec::<(&str, u32)>::new()), None);
    }

    #[test]
    fn zero_score_never_beats_positive() {
        assert_eq!(pick_best([("a", 0), ("b", 1), ("c", 0)]), Some("b"));
    }

    #[test]
    fn failed_query_disqualifies_only_that_device() {
        let queried = [
            ("broken", Err(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))),
            ("capable", Ok(capable_discrete())),
            ("unqueryable", Err(GpuError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED))),
        ];

        let scored: Vec<_> = queried
            .iter()
            .map(|(name, candidate)| (*name, score_queried(candidate)))
            .collect();

        assert_eq!(scored[0].1, 0);
        assert_eq!(scored[1].1, 17384);
        assert_eq!(pick_best(scored), Some("capable"));
    }

    #[test]
    fn only_failed_queries_select_nothing() {
        let failed: Result<DeviceCandidate> = Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        assert_eq!(pick_best([("a", score_queried(&failed))]), None);
    }

    #[test]
    fn ties_keep_the_later_candidate() {
        assert_eq!(pick_best([("a", 500), ("b", 500)]), Some("b"));
    }
}
