//! Optional extension entry points.
//!
//! Entry points are resolved once after device creation and owned by the
//! [`DeviceContext`](crate::DeviceContext). A group whose functions do not all
//! resolve is recorded as `None`; callers branch on that instead of calling
//! through a missing pointer.

use crate::config::GfxSettings;
use std::ffi::CStr;

const DEBUG_MARKER_FUNCTIONS: &[&CStr] = &[
    c"vkDebugMarkerSetObjectTagEXT",
    c"vkDebugMarkerSetObjectNameEXT",
    c"vkCmdDebugMarkerBeginEXT",
    c"vkCmdDebugMarkerEndEXT",
    c"vkCmdDebugMarkerInsertEXT",
];

const MESH_SHADING_FUNCTIONS: &[&CStr] = &[c"vkCmdDrawMeshTasksNV"];

const RAY_TRACING_FUNCTIONS: &[&CStr] = &[
    c"vkCreateAccelerationStructureNV",
    c"vkDestroyAccelerationStructureNV",
    c"vkBindAccelerationStructureMemoryNV",
    c"vkGetAccelerationStructureHandleNV",
    c"vkGetAccelerationStructureMemoryRequirementsNV",
    c"vkCmdBuildAccelerationStructureNV",
    c"vkCreateRayTracingPipelinesNV",
    c"vkGetRayTracingShaderGroupHandlesNV",
    c"vkCmdTraceRaysNV",
];

/// Whether every function in a group resolves, logging the ones that don't.
pub fn resolve_group(group: &str, functions: &[&CStr], resolves: impl Fn(&CStr) -> bool) -> bool {
    let missing: Vec<_> = functions
        .iter()
        .filter(|name| !resolves(name))
        .map(|name| name.to_string_lossy())
        .collect();

    if missing.is_empty() {
        return true;
    }

    tracing::warn!(group, ?missing, "Optional entry points unavailable");
    false
}

/// Loaders for optional device extensions, present only when resolved.
#[derive(Default)]
pub struct OptionalExtensions {
    pub debug_marker: Option<ash::ext::debug_marker::Device>,
    pub mesh_shading: Option<ash::nv::mesh_shader::Device>,
    pub ray_tracing: Option<ash::nv::ray_tracing::Device>,
}

impl OptionalExtensions {
    /// Resolve all optional groups.
    ///
    /// Debug markers are only loaded while validating. Groups whose
    /// extension is not enabled are skipped without probing.
    ///
    /// # Safety
    /// The device must have been created from `instance`.
    pub unsafe fn load(
        instance: &ash::Instance,
        device: &ash::Device,
        settings: &GfxSettings,
    ) -> Self {
        let resolves = |name: &CStr| unsafe {
            (instance.fp_v1_0().get_device_proc_addr)(device.handle(), name.as_ptr()).is_some()
        };

        let wanted = |extension: &CStr, group: &str, functions: &[&CStr]| {
            settings.enables_device_extension(extension)
                && resolve_group(group, functions, resolves)
        };

        let debug_marker = (settings.enable_validation_layers
            && wanted(ash::ext::debug_marker::NAME, "debug marker", DEBUG_MARKER_FUNCTIONS))
        .then(|| ash::ext::debug_marker::Device::new(instance, device));

        let mesh_shading = wanted(
            ash::nv::mesh_shader::NAME,
            "mesh shading",
            MESH_SHADING_FUNCTIONS,
        )
        .then(|| ash::nv::mesh_shader::Device::new(instance, device));

        let ray_tracing = wanted(ash::nv::ray_tracing::NAME, "ray tracing", RAY_TRACING_FUNCTIONS)
            .then(|| ash::nv::ray_tracing::Device::new(instance, device));

        Self {
            debug_marker,
            mesh_shading,
            ray_tracing,
        }
    }

    pub fn has_debug_marker(&self) -> bool {
        self.debug_marker.is_some()
    }

    pub fn has_mesh_shading(&self) -> bool {
        self.mesh_shading.is_some()
    }

    pub fn has_ray_tracing(&self) -> bool {
        self.ray_tracing.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_resolves_only_when_complete() {
        assert!(resolve_group("all", RAY_TRACING_FUNCTIONS, |_| true));
        assert!(!resolve_group("none", RAY_TRACING_FUNCTIONS, |_| false));
        assert!(!resolve_group("partial", DEBUG_MARKER_FUNCTIONS, |name| {
            name != c"vkCmdDebugMarkerInsertEXT"
        }));
    }

    #[test]
    fn empty_extensions_report_absent() {
        let extensions = OptionalExtensions::default();
        assert!(!extensions.has_debug_marker());
        assert!(!extensions.has_mesh_shading());
        assert!(!extensions.has_ray_tracing());
    }
}
