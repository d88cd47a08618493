//! Descriptor-set and pipeline layouts.
//!
//! A [`RootSignatureDesc`] is plain data describing which resources a
//! pipeline binds at which slots. [`RootSignature::compile`] turns it into
//! driver layouts. The description is kept alongside the handles so the
//! binding contract can be inspected after compilation.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::features::NegotiatedFeatures;
use ash::vk;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Kind of resource bound at a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformTexelBuffer,
    StorageTexelBuffer,
    UniformBuffer,
    StorageBuffer,
    AccelerationStructure,
}

impl ResourceKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::Sampler => vk::DescriptorType::SAMPLER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            Self::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            Self::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_NV,
        }
    }
}

/// One shader-visible slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingDesc {
    pub slot: u32,
    pub kind: ResourceKind,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl BindingDesc {
    pub fn to_vk(self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.slot)
            .descriptor_type(self.kind.descriptor_type())
            .descriptor_count(self.count)
            .stage_flags(self.stages)
    }
}

/// Ordered descriptor sets plus push constant ranges.
///
/// Bindings are added to the last set; [`next_set`](Self::next_set) opens a
/// new one.
#[derive(Debug, Clone)]
pub struct RootSignatureDesc {
    sets: Vec<Vec<BindingDesc>>,
    push_constants: Vec<vk::PushConstantRange>,
}

impl Default for RootSignatureDesc {
    fn default() -> Self {
        Self::new()
    }
}

impl RootSignatureDesc {
    pub fn new() -> Self {
        Self {
            sets: vec![Vec::new()],
            push_constants: Vec::new(),
        }
    }

    /// Add a binding to the current set.
    pub fn binding(
        mut self,
        slot: u32,
        kind: ResourceKind,
        count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        if let Some(set) = self.sets.last_mut() {
            set.push(BindingDesc {
                slot,
                kind,
                count,
                stages,
            });
        }
        self
    }

    pub fn uniform_buffer(self, slot: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(slot, ResourceKind::UniformBuffer, 1, stages)
    }

    pub fn storage_buffer(self, slot: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(slot, ResourceKind::StorageBuffer, 1, stages)
    }

    pub fn storage_image(self, slot: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(slot, ResourceKind::StorageImage, 1, stages)
    }

    pub fn sampled_image(self, slot: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(slot, ResourceKind::CombinedImageSampler, 1, stages)
    }

    pub fn acceleration_structure(self, slot: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(slot, ResourceKind::AccelerationStructure, 1, stages)
    }

    /// Start a new descriptor set.
    pub fn next_set(mut self) -> Self {
        self.sets.push(Vec::new());
        self
    }

    /// Add a push constant range.
    pub fn push_constant(mut self, stages: vk::ShaderStageFlags, offset: u32, size: u32) -> Self {
        self.push_constants.push(
            vk::PushConstantRange::default()
                .stage_flags(stages)
                .offset(offset)
                .size(size),
        );
        self
    }

    pub fn sets(&self) -> &[Vec<BindingDesc>] {
        &self.sets
    }

    pub fn push_constants(&self) -> &[vk::PushConstantRange] {
        &self.push_constants
    }

    /// Reject slots declared twice within one set.
    pub fn validate(&self) -> Result<()> {
        for (set_index, set) in self.sets.iter().enumerate() {
            let mut seen = HashSet::with_capacity(set.len());
            for binding in set {
                if !seen.insert(binding.slot) {
                    return Err(GpuError::LayoutCreation(format!(
                        "Slot {} declared twice in set {set_index}",
                        binding.slot
                    )));
                }
            }
        }
        Ok(())
    }

    /// Reject bindings and push constant ranges that rely on a capability the
    /// device did not negotiate.
    pub fn check_capabilities(&self, negotiated: &NegotiatedFeatures) -> Result<()> {
        let stage_sets = self
            .sets
            .iter()
            .enumerate()
            .flat_map(|(set, bindings)| {
                bindings
                    .iter()
                    .map(move |b| (format!("set {set} slot {}", b.slot), b.stages))
            })
            .chain(
                self.push_constants
                    .iter()
                    .enumerate()
                    .map(|(i, range)| (format!("push constant range {i}"), range.stage_flags)),
            );

        for (location, stages) in stage_sets {
            if !negotiated.mesh_shading.supported && stages.intersects(mesh_stages()) {
                return Err(GpuError::LayoutCreation(format!(
                    "{location} is visible to mesh/task stages but mesh shading is unsupported"
                )));
            }
            if !negotiated.ray_tracing.supported && stages.intersects(ray_tracing_stages()) {
                return Err(GpuError::LayoutCreation(format!(
                    "{location} is visible to ray tracing stages but ray tracing is unsupported"
                )));
            }
        }

        if !negotiated.ray_tracing.supported {
            for (set, bindings) in self.sets.iter().enumerate() {
                if let Some(b) = bindings
                    .iter()
                    .find(|b| b.kind == ResourceKind::AccelerationStructure)
                {
                    return Err(GpuError::LayoutCreation(format!(
                        "Set {set} slot {} binds an acceleration structure but ray tracing is unsupported",
                        b.slot
                    )));
                }
            }
        }

        Ok(())
    }

    /// Driver binding structures for one set, in declaration order.
    pub fn layout_bindings(&self, set: usize) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.sets
            .get(set)
            .map(|bindings| bindings.iter().map(|b| b.to_vk()).collect())
            .unwrap_or_default()
    }

    /// Pool sizes that fit `copies` instances of every set.
    pub fn pool_sizes(&self, copies: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut totals: BTreeMap<ResourceKind, u32> = BTreeMap::new();
        for binding in self.sets.iter().flatten() {
            *totals.entry(binding.kind).or_default() += binding.count;
        }

        totals
            .into_iter()
            .map(|(kind, count)| vk::DescriptorPoolSize {
                ty: kind.descriptor_type(),
                descriptor_count: count.saturating_mul(copies),
            })
            .collect()
    }
}

fn mesh_stages() -> vk::ShaderStageFlags {
    vk::ShaderStageFlags::TASK_NV | vk::ShaderStageFlags::MESH_NV
}

fn ray_tracing_stages() -> vk::ShaderStageFlags {
    vk::ShaderStageFlags::RAYGEN_KHR
        | vk::ShaderStageFlags::ANY_HIT_KHR
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR
        | vk::ShaderStageFlags::MISS_KHR
        | vk::ShaderStageFlags::INTERSECTION_KHR
        | vk::ShaderStageFlags::CALLABLE_KHR
}

/// Compiled descriptor-set layouts and the pipeline layout built from them.
pub struct RootSignature {
    set_layouts: Vec<vk::DescriptorSetLayout>,
    pipeline_layout: vk::PipelineLayout,
    desc: RootSignatureDesc,
    ctx: Arc<DeviceContext>,
}

impl RootSignature {
    /// Create every set layout in order, then the pipeline layout.
    ///
    /// Mesh/task stages, ray tracing stages and acceleration structure
    /// bindings are rejected unless the device negotiated them.
    pub fn compile(ctx: Arc<DeviceContext>, desc: &RootSignatureDesc) -> Result<Self> {
        desc.validate()?;
        desc.check_capabilities(ctx.negotiated_features())?;

        let device = ctx.device();
        let destroy_sets = |layouts: &[vk::DescriptorSetLayout]| unsafe {
            for &layout in layouts {
                device.destroy_descriptor_set_layout(layout, None);
            }
        };

        let mut set_layouts = Vec::with_capacity(desc.sets.len());
        for set in 0..desc.sets.len() {
            let bindings = desc.layout_bindings(set);
            let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

            match unsafe { device.create_descriptor_set_layout(&layout_info, None) } {
                Ok(layout) => set_layouts.push(layout),
                Err(e) => {
                    destroy_sets(&set_layouts);
                    return Err(GpuError::LayoutCreation(format!(
                        "Descriptor set layout {set}: {e}"
                    )));
                }
            }
        }

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&desc.push_constants);

        let pipeline_layout = match unsafe { device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                destroy_sets(&set_layouts);
                return Err(GpuError::LayoutCreation(format!("Pipeline layout: {e}")));
            }
        };

        tracing::debug!(
            sets = set_layouts.len(),
            push_constants = desc.push_constants.len(),
            "Root signature compiled"
        );

        Ok(Self {
            set_layouts,
            pipeline_layout,
            desc: desc.clone(),
            ctx,
        })
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn set_layouts(&self) -> &[vk::DescriptorSetLayout] {
        &self.set_layouts
    }

    pub fn set_layout(&self, set: usize) -> Option<vk::DescriptorSetLayout> {
        self.set_layouts.get(set).copied()
    }

    /// The description this was compiled from.
    pub fn desc(&self) -> &RootSignatureDesc {
        &self.desc
    }
}

impl Drop for RootSignature {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            for &layout in &self.set_layouts {
                device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{MeshShading, Probed, RayTracingProperties};

    type Shape = (u32, vk::DescriptorType, u32, vk::ShaderStageFlags);

    fn shape(bindings: &[vk::DescriptorSetLayoutBinding<'_>]) -> Vec<Shape> {
        bindings
            .iter()
            .map(|b| (b.binding, b.descriptor_type, b.descriptor_count, b.stage_flags))
            .collect()
    }

    fn sample_desc() -> RootSignatureDesc {
        RootSignatureDesc::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .sampled_image(1, vk::ShaderStageFlags::FRAGMENT)
            .binding(
                2,
                ResourceKind::StorageBuffer,
                4,
                vk::ShaderStageFlags::MESH_NV | vk::ShaderStageFlags::TASK_NV,
            )
            .next_set()
            .storage_image(0, vk::ShaderStageFlags::COMPUTE)
            .push_constant(vk::ShaderStageFlags::VERTEX, 0, 64)
    }

    #[test]
    fn identical_input_compiles_to_identical_structure() {
        let first = sample_desc();
        let second = sample_desc();

        assert!(first.validate().is_ok());
        assert_eq!(first.sets().len(), 2);
        for set in 0..first.sets().len() {
            assert_eq!(
                shape(&first.layout_bindings(set)),
                shape(&second.layout_bindings(set))
            );
        }
    }

    #[test]
    fn bindings_keep_declaration_order() {
        let bindings = sample_desc().layout_bindings(0);
        let slots: Vec<_> = bindings.iter().map(|b| b.binding).collect();
        assert_eq!(slots, vec![0, 1, 2]);
        assert_eq!(bindings[2].descriptor_count, 4);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn duplicate_slot_in_one_set_is_rejected() {
        let desc = RootSignatureDesc::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .storage_buffer(0, vk::ShaderStageFlags::FRAGMENT);
        assert!(matches!(desc.validate(), Err(GpuError::LayoutCreation(_))));
    }

    #[test]
    fn same_slot_in_different_sets_is_fine() {
        assert!(sample_desc().validate().is_ok());
    }

    #[test]
    fn empty_description_has_one_empty_set() {
        let desc = RootSignatureDesc::default();
        assert_eq!(desc.sets().len(), 1);
        assert!(desc.layout_bindings(0).is_empty());
        assert!(desc.layout_bindings(5).is_empty());
        assert!(desc.push_constants().is_empty());
    }

    #[test]
    fn pool_sizes_scale_with_copies() {
        let sizes = RootSignatureDesc::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .uniform_buffer(1, vk::ShaderStageFlags::FRAGMENT)
            .binding(2, ResourceKind::StorageBuffer, 3, vk::ShaderStageFlags::COMPUTE)
            .pool_sizes(2);

        let lookup = |ty| {
            sizes
                .iter()
                .find(|size| size.ty == ty)
                .map(|size| size.descriptor_count)
        };
        assert_eq!(lookup(vk::DescriptorType::UNIFORM_BUFFER), Some(4));
        assert_eq!(lookup(vk::DescriptorType::STORAGE_BUFFER), Some(6));
        assert_eq!(sizes.len(), 2);
    }

    fn with_mesh_and_ray_tracing() -> NegotiatedFeatures {
        NegotiatedFeatures {
            mesh_shading: Probed {
                supported: true,
                details: MeshShading {
                    task_shader: true,
                    mesh_shader: true,
                },
            },
            ray_tracing: Probed {
                supported: true,
                details: RayTracingProperties::default(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn unnegotiated_capabilities_are_rejected() {
        let none = NegotiatedFeatures::default();

        let acceleration = RootSignatureDesc::new()
            .acceleration_structure(0, vk::ShaderStageFlags::COMPUTE);
        let raygen = RootSignatureDesc::new().storage_buffer(0, vk::ShaderStageFlags::RAYGEN_NV);
        let mesh = RootSignatureDesc::new()
            .storage_buffer(1, vk::ShaderStageFlags::MESH_NV | vk::ShaderStageFlags::TASK_NV);
        let mesh_push = RootSignatureDesc::new().push_constant(vk::ShaderStageFlags::TASK_NV, 0, 16);

        for desc in [&acceleration, &raygen, &mesh, &mesh_push] {
            assert!(desc.validate().is_ok());
            assert!(
                matches!(desc.check_capabilities(&none), Err(GpuError::LayoutCreation(_))),
                "{desc:?}"
            );
        }
    }

    #[test]
    fn negotiated_capabilities_are_allowed() {
        let negotiated = with_mesh_and_ray_tracing();
        let desc = RootSignatureDesc::new()
            .acceleration_structure(0, vk::ShaderStageFlags::RAYGEN_NV)
            .storage_buffer(1, vk::ShaderStageFlags::MESH_NV | vk::ShaderStageFlags::TASK_NV);

        assert!(desc.check_capabilities(&negotiated).is_ok());
        assert!(sample_desc().check_capabilities(&negotiated).is_ok());
    }

    #[test]
    fn one_missing_capability_is_enough_to_reject() {
        let mesh_only = NegotiatedFeatures {
            ray_tracing: Probed::unsupported(),
            ..with_mesh_and_ray_tracing()
        };

        assert!(sample_desc().check_capabilities(&mesh_only).is_ok());
        assert!(RootSignatureDesc::new()
            .acceleration_structure(0, vk::ShaderStageFlags::MESH_NV)
            .check_capabilities(&mesh_only)
            .is_err());
    }

    #[test]
    fn core_stages_need_nothing_negotiated() {
        let desc = RootSignatureDesc::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .storage_image(1, vk::ShaderStageFlags::COMPUTE)
            .push_constant(vk::ShaderStageFlags::ALL_GRAPHICS, 0, 64);
        assert!(desc.check_capabilities(&NegotiatedFeatures::default()).is_ok());
    }

    #[test]
    fn acceleration_structures_use_the_nv_descriptor() {
        assert_eq!(
            ResourceKind::AccelerationStructure.descriptor_type(),
            vk::DescriptorType::ACCELERATION_STRUCTURE_NV
        );
    }
}
