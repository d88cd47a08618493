//! Optional feature negotiation.
//!
//! Each optional capability is a [`CapabilityProbe`]: it decides whether the
//! selected device can use it and returns typed details. Probes are queried
//! one at a time in a fixed order, so adding a capability means adding a
//! probe and a field on [`NegotiatedFeatures`] without touching the others.
//!
//! A probe reports `supported` only when the capability is usable on the
//! logical device that will be created: core in the device's API version, or
//! exposed by the device *and* listed in the configured device extensions.

use crate::capabilities::DeviceInfo;
use crate::config::GfxSettings;
use ash::vk;
use std::ffi::CStr;
use std::fmt;

/// Result of one capability probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Probed<T> {
    pub supported: bool,
    pub details: T,
}

impl<T: Default> Probed<T> {
    /// An unsupported capability with default details.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            details: T::default(),
        }
    }
}

/// Inputs shared by all probes.
pub struct ProbeContext<'a> {
    pub instance: &'a ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub info: &'a DeviceInfo,
    pub settings: &'a GfxSettings,
}

impl ProbeContext<'_> {
    /// Extension exposed by the device and enabled by the settings.
    pub fn extension_usable(&self, name: &CStr) -> bool {
        self.info.supports_extension(name) && self.settings.enables_device_extension(name)
    }

    /// Core since `major.minor`, or available through `name`.
    pub fn core_or_extension(&self, major: u32, minor: u32, name: &CStr) -> bool {
        self.info.supports_api(major, minor) || self.extension_usable(name)
    }

    /// Fill a single feature structure.
    ///
    /// # Safety
    /// The structure's extension must be core or supported by the device.
    pub unsafe fn query_features<T>(&self, feature: &mut T)
    where
        T: vk::ExtendsPhysicalDeviceFeatures2 + ?Sized,
    {
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(feature);
        unsafe {
            self.instance
                .get_physical_device_features2(self.physical_device, &mut features2);
        }
    }

    /// Fill a single properties structure.
    ///
    /// # Safety
    /// The structure's extension must be core or supported by the device.
    pub unsafe fn query_properties<T>(&self, properties: &mut T)
    where
        T: vk::ExtendsPhysicalDeviceProperties2 + ?Sized,
    {
        let mut properties2 = vk::PhysicalDeviceProperties2::default().push_next(properties);
        unsafe {
            self.instance
                .get_physical_device_properties2(self.physical_device, &mut properties2);
        }
    }
}

/// An optional device capability.
pub trait CapabilityProbe {
    type Details: Clone + Default + fmt::Debug;

    /// Name used in logs.
    const NAME: &'static str;

    /// Query the capability.
    ///
    /// # Safety
    /// The instance and physical device in `cx` must be valid.
    unsafe fn probe(cx: &ProbeContext<'_>) -> Probed<Self::Details>;
}

/// 8-bit integer access in storage and uniform buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Storage8Bit {
    pub storage_buffer: bool,
    pub uniform_and_storage_buffer: bool,
    pub push_constant: bool,
}

/// 16-bit float and 8-bit integer shader arithmetic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Float16Int8 {
    pub shader_float16: bool,
    pub shader_int8: bool,
}

/// Task and mesh shader stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshShading {
    pub task_shader: bool,
    pub mesh_shader: bool,
}

/// Limits reported for ray tracing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RayTracingProperties {
    pub shader_group_handle_size: u32,
    pub max_recursion_depth: u32,
    pub max_shader_group_stride: u32,
    pub shader_group_base_alignment: u32,
    pub max_geometry_count: u64,
    pub max_instance_count: u64,
    pub max_triangle_count: u64,
    pub max_descriptor_set_acceleration_structures: u32,
}

pub struct Storage8BitProbe;

impl CapabilityProbe for Storage8BitProbe {
    type Details = Storage8Bit;
    const NAME: &'static str = "8-bit storage";

    unsafe fn probe(cx: &ProbeContext<'_>) -> Probed<Storage8Bit> {
        if !cx.core_or_extension(1, 2, c"VK_KHR_8bit_storage") {
            return Probed::unsupported();
        }

        let mut features = vk::PhysicalDevice8BitStorageFeatures::default();
        unsafe { cx.query_features(&mut features) };

        let details = Storage8Bit {
            storage_buffer: features.storage_buffer8_bit_access == vk::TRUE,
            uniform_and_storage_buffer: features.uniform_and_storage_buffer8_bit_access
                == vk::TRUE,
            push_constant: features.storage_push_constant8 == vk::TRUE,
        };

        Probed {
            supported: details.storage_buffer && details.uniform_and_storage_buffer,
            details,
        }
    }
}

pub struct Float16Int8Probe;

impl CapabilityProbe for Float16Int8Probe {
    type Details = Float16Int8;
    const NAME: &'static str = "float16/int8 arithmetic";

    unsafe fn probe(cx: &ProbeContext<'_>) -> Probed<Float16Int8> {
        if !cx.core_or_extension(1, 2, c"VK_KHR_shader_float16_int8") {
            return Probed::unsupported();
        }

        let mut features = vk::PhysicalDeviceShaderFloat16Int8Features::default();
        unsafe { cx.query_features(&mut features) };

        let details = Float16Int8 {
            shader_float16: features.shader_float16 == vk::TRUE,
            shader_int8: features.shader_int8 == vk::TRUE,
        };

        Probed {
            supported: details.shader_float16 || details.shader_int8,
            details,
        }
    }
}

pub struct MeshShadingProbe;

impl CapabilityProbe for MeshShadingProbe {
    type Details = MeshShading;
    const NAME: &'static str = "mesh shading";

    unsafe fn probe(cx: &ProbeContext<'_>) -> Probed<MeshShading> {
        if !cx.extension_usable(ash::nv::mesh_shader::NAME) {
            return Probed::unsupported();
        }

        let mut features = vk::PhysicalDeviceMeshShaderFeaturesNV::default();
        unsafe { cx.query_features(&mut features) };

        let details = MeshShading {
            task_shader: features.task_shader == vk::TRUE,
            mesh_shader: features.mesh_shader == vk::TRUE,
        };

        Probed {
            supported: details.task_shader && details.mesh_shader,
            details,
        }
    }
}

pub struct RayTracingProbe;

impl CapabilityProbe for RayTracingProbe {
    type Details = RayTracingProperties;
    const NAME: &'static str = "ray tracing";

    unsafe fn probe(cx: &ProbeContext<'_>) -> Probed<RayTracingProperties> {
        if !cx.extension_usable(ash::nv::ray_tracing::NAME) {
            return Probed::unsupported();
        }

        let mut properties = vk::PhysicalDeviceRayTracingPropertiesNV::default();
        unsafe { cx.query_properties(&mut properties) };

        Probed {
            supported: true,
            details: RayTracingProperties {
                shader_group_handle_size: properties.shader_group_handle_size,
                max_recursion_depth: properties.max_recursion_depth,
                max_shader_group_stride: properties.max_shader_group_stride,
                shader_group_base_alignment: properties.shader_group_base_alignment,
                max_geometry_count: properties.max_geometry_count,
                max_instance_count: properties.max_instance_count,
                max_triangle_count: properties.max_triangle_count,
                max_descriptor_set_acceleration_structures: properties
                    .max_descriptor_set_acceleration_structures,
            },
        }
    }
}

/// Outcome of every probe for the selected device.
#[derive(Debug, Clone, Default)]
pub struct NegotiatedFeatures {
    pub storage_8bit: Probed<Storage8Bit>,
    pub float16_int8: Probed<Float16Int8>,
    pub mesh_shading: Probed<MeshShading>,
    pub ray_tracing: Probed<RayTracingProperties>,
}

impl NegotiatedFeatures {
    /// Run every probe in order.
    ///
    /// # Safety
    /// The instance and physical device in `cx` must be valid.
    pub unsafe fn negotiate(cx: &ProbeContext<'_>) -> Self {
        if !cx.info.supports_api(1, 1) {
            tracing::warn!("Device predates Vulkan 1.1; optional features are unavailable");
            return Self::default();
        }

        let negotiated = unsafe {
            Self {
                storage_8bit: Storage8BitProbe::probe(cx),
                float16_int8: Float16Int8Probe::probe(cx),
                mesh_shading: MeshShadingProbe::probe(cx),
                ray_tracing: RayTracingProbe::probe(cx),
            }
        };

        for (name, supported) in negotiated.report() {
            tracing::debug!(feature = name, supported, "Negotiated optional feature");
        }

        negotiated
    }

    /// `(probe name, supported)` in probing order.
    pub fn report(&self) -> [(&'static str, bool); 4] {
        [
            (Storage8BitProbe::NAME, self.storage_8bit.supported),
            (Float16Int8Probe::NAME, self.float16_int8.supported),
            (MeshShadingProbe::NAME, self.mesh_shading.supported),
            (RayTracingProbe::NAME, self.ray_tracing.supported),
        ]
    }
}

/// Feature structures enabled at logical device creation.
///
/// Holds only the structures whose probe reported support.
pub struct DeviceFeatureChain {
    base: vk::PhysicalDeviceFeatures2<'static>,
    storage_8bit: Option<vk::PhysicalDevice8BitStorageFeatures<'static>>,
    float16_int8: Option<vk::PhysicalDeviceShaderFloat16Int8Features<'static>>,
    mesh_shading: Option<vk::PhysicalDeviceMeshShaderFeaturesNV<'static>>,
}

impl DeviceFeatureChain {
    /// Build the chain from the device's core features and the negotiation.
    pub fn new(base: vk::PhysicalDeviceFeatures, negotiated: &NegotiatedFeatures) -> Self {
        let storage_8bit = negotiated.storage_8bit.supported.then(|| {
            let details = negotiated.storage_8bit.details;
            vk::PhysicalDevice8BitStorageFeatures::default()
                .storage_buffer8_bit_access(details.storage_buffer)
                .uniform_and_storage_buffer8_bit_access(details.uniform_and_storage_buffer)
                .storage_push_constant8(details.push_constant)
        });

        let float16_int8 = negotiated.float16_int8.supported.then(|| {
            let details = negotiated.float16_int8.details;
            vk::PhysicalDeviceShaderFloat16Int8Features::default()
                .shader_float16(details.shader_float16)
                .shader_int8(details.shader_int8)
        });

        let mesh_shading = negotiated.mesh_shading.supported.then(|| {
            vk::PhysicalDeviceMeshShaderFeaturesNV::default()
                .task_shader(true)
                .mesh_shader(true)
        });

        Self {
            base: vk::PhysicalDeviceFeatures2::default().features(base),
            storage_8bit,
            float16_int8,
            mesh_shading,
        }
    }

    /// Number of structures that will be chained, including the base.
    pub fn enabled_count(&self) -> usize {
        1 + usize::from(self.storage_8bit.is_some())
            + usize::from(self.float16_int8.is_some())
            + usize::from(self.mesh_shading.is_some())
    }

    /// Chain the enabled structures onto a device create info.
    ///
    /// The chain links point into `self`, which must stay in place until the
    /// device is created. Attach once per chain.
    pub fn attach<'a>(&'a mut self, info: vk::DeviceCreateInfo<'a>) -> vk::DeviceCreateInfo<'a> {
        let mut info = info.push_next(&mut self.base);
        if let Some(features) = self.storage_8bit.as_mut() {
            info = info.push_next(features);
        }
        if let Some(features) = self.float16_int8.as_mut() {
            info = info.push_next(features);
        }
        if let Some(features) = self.mesh_shading.as_mut() {
            info = info.push_next(features);
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_follows_probe_order() {
        let negotiated = NegotiatedFeatures {
            mesh_shading: Probed {
                supported: true,
                details: MeshShading {
                    task_shader: true,
                    mesh_shader: true,
                },
            },
            ..Default::default()
        };

        let report = negotiated.report();
        let names: Vec<_> = report.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            ["8-bit storage", "float16/int8 arithmetic", "mesh shading", "ray tracing"]
        );
        assert_eq!(
            report.iter().map(|(_, s)| *s).collect::<Vec<_>>(),
            [false, false, true, false]
        );
    }

    #[test]
    fn chain_contains_only_supported_features() {
        let none = DeviceFeatureChain::new(vk::PhysicalDeviceFeatures::default(), &Default::default());
        assert_eq!(none.enabled_count(), 1);

        let negotiated = NegotiatedFeatures {
            storage_8bit: Probed {
                supported: true,
                details: Storage8Bit {
                    storage_buffer: true,
                    uniform_and_storage_buffer: true,
                    push_constant: false,
                },
            },
            ray_tracing: Probed {
                supported: true,
                details: RayTracingProperties::default(),
            },
            ..Default::default()
        };
        let chain = DeviceFeatureChain::new(vk::PhysicalDeviceFeatures::default(), &negotiated);
        // Ray tracing contributes properties only.
        assert_eq!(chain.enabled_count(), 2);
        let storage = chain.storage_8bit.expect("8-bit storage enabled");
        assert_eq!(storage.storage_buffer8_bit_access, vk::TRUE);
        assert_eq!(storage.storage_push_constant8, vk::FALSE);
    }

    #[test]
    fn unsupported_probe_has_default_details() {
        let probed = Probed::<Float16Int8>::unsupported();
        assert!(!probed.supported);
        assert_eq!(probed.details, Float16Int8::default());
    }
}
