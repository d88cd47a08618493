//! Queue family resolution.

use crate::surface::Surface;
use ash::vk;

/// Logical role of a hardware queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    /// Graphics work that can also present to the bound surface.
    Direct,
    /// Transfer-only work.
    Copy,
    /// Compute dispatches.
    Compute,
}

/// What a queue family offers, independent of the driver handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    pub present_support: bool,
}

/// Queue family assignment for the selected device.
///
/// Only a direct family is resolved. A graphics family always supports
/// compute and transfer, and the logical device creates its single queue
/// there, so the copy and compute roles map onto the same family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub direct_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Resolve families from their capabilities.
    ///
    /// Every family that is graphics-capable, presentable and has at least one
    /// queue qualifies; the last one wins.
    pub fn resolve(families: &[QueueFamilyInfo]) -> Self {
        let direct_family = families
            .iter()
            .enumerate()
            .filter(|(_, family)| {
                family.queue_count > 0
                    && family.flags.contains(vk::QueueFlags::GRAPHICS)
                    && family.present_support
            })
            .map(|(index, _)| index as u32)
            .last();

        Self { direct_family }
    }

    /// Query and resolve families for a physical device against a surface.
    ///
    /// # Safety
    /// The instance, physical device and surface must be valid.
    pub unsafe fn query(
        instance: &ash::Instance,
        surface: &Surface,
        physical_device: vk::PhysicalDevice,
    ) -> crate::Result<Self> {
        let properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let mut families = Vec::with_capacity(properties.len());
        for (index, family) in properties.iter().enumerate() {
            let present_support =
                unsafe { surface.supports_present(physical_device, index as u32)? };
            families.push(QueueFamilyInfo {
                flags: family.queue_flags,
                queue_count: family.queue_count,
                present_support,
            });
        }

        Ok(Self::resolve(&families))
    }

    /// Whether a graphics family with presentation support exists.
    pub fn has_direct_family(&self) -> bool {
        self.direct_family.is_some()
    }

    /// Family that serves the given role.
    pub fn family_for(&self, role: QueueRole) -> Option<u32> {
        match role {
            QueueRole::Direct | QueueRole::Copy | QueueRole::Compute => self.direct_family,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, present_support: bool) -> QueueFamilyInfo {
        QueueFamilyInfo {
            flags,
            queue_count: 1,
            present_support,
        }
    }

    #[test]
    fn single_graphics_present_family_is_direct() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true)];
        let indices = QueueFamilyIndices::resolve(&families);

        assert!(indices.has_direct_family());
        assert_eq!(indices.direct_family, Some(0));
    }

    #[test]
    fn no_direct_family_without_present_support() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, false),
            family(vk::QueueFlags::COMPUTE, true),
            family(vk::QueueFlags::TRANSFER, true),
        ];
        assert!(!QueueFamilyIndices::resolve(&families).has_direct_family());
        assert!(!QueueFamilyIndices::resolve(&[]).has_direct_family());
    }

    #[test]
    fn last_matching_family_wins() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, true),
            family(vk::QueueFlags::COMPUTE, true),
            family(vk::QueueFlags::GRAPHICS, true),
        ];
        assert_eq!(QueueFamilyIndices::resolve(&families).direct_family, Some(2));
    }

    #[test]
    fn empty_families_are_skipped() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, true),
            QueueFamilyInfo {
                flags: vk::QueueFlags::GRAPHICS,
                queue_count: 0,
                present_support: true,
            },
        ];
        assert_eq!(QueueFamilyIndices::resolve(&families).direct_family, Some(0));
    }

    #[test]
    fn every_role_maps_to_direct_family() {
        let indices = QueueFamilyIndices {
            direct_family: Some(3),
        };
        for role in [QueueRole::Direct, QueueRole::Copy, QueueRole::Compute] {
            assert_eq!(indices.family_for(role), Some(3));
        }
    }
}
