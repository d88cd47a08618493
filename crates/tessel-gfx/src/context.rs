//! Device context: instance, physical device selection and logical device.

use crate::capabilities::{self, DeviceInfo};
use crate::config::GfxSettings;
use crate::debug::DebugMessenger;
use crate::error::{GpuError, Result};
use crate::extensions::OptionalExtensions;
use crate::features::{DeviceFeatureChain, NegotiatedFeatures, ProbeContext};
use crate::instance::create_instance;
use crate::memory::GpuAllocator;
use crate::queue_family::{QueueFamilyIndices, QueueRole};
use crate::selection::select_physical_device;
use crate::surface::{Surface, SwapchainSupportDetails};
use crate::window::WindowProvider;
use ash::vk;
use parking_lot::Mutex;
use std::ffi::c_char;
use std::sync::Arc;

/// Root owner of the Vulkan instance and logical device.
///
/// Queues, render windows and root signatures hold an `Arc` to this and
/// release their own handles before it is dropped.
pub struct DeviceContext {
    // Keeps the loader library mapped for the lifetime of the context
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<DebugMessenger>,
    surface: Surface,
    physical_device: vk::PhysicalDevice,
    info: DeviceInfo,
    negotiated: NegotiatedFeatures,
    queue_families: QueueFamilyIndices,
    swapchain_support: SwapchainSupportDetails,
    device: ash::Device,
    extensions: OptionalExtensions,
    swapchain_loader: ash::khr::swapchain::Device,
    allocator: Mutex<GpuAllocator>,
    settings: GfxSettings,
}

impl DeviceContext {
    /// Bring up a rendering-ready device for `window`.
    ///
    /// Any driver rejection along the way is returned as an error; nothing
    /// here is retried.
    pub fn new<W>(settings: GfxSettings, window: &W) -> Result<Arc<Self>>
    where
        W: WindowProvider + ?Sized,
    {
        validate_settings(&settings)?;

        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Loader(e.to_string()))?;

        let window_extensions = window.required_extensions()?;
        let instance = unsafe { create_instance(&entry, &settings, window_extensions)? };

        let mut rollback = Rollback::default();
        {
            let instance = instance.clone();
            rollback.push(move || unsafe { instance.destroy_instance(None) });
        }

        let debug_messenger = if settings.enable_validation_layers {
            let messenger = unsafe { DebugMessenger::new(&entry, &instance)? };
            let undo = messenger.clone();
            rollback.push(move || unsafe { undo.destroy() });
            Some(messenger)
        } else {
            None
        };

        let surface = unsafe { Surface::new(&entry, &instance, window)? };
        {
            let surface = surface.clone();
            rollback.push(move || unsafe { surface.destroy() });
        }

        let physical_device = unsafe { select_physical_device(&instance, &surface, &settings)? };
        let info = unsafe { DeviceInfo::query(&instance, physical_device)? };
        tracing::info!("Selected GPU: {}", info.summary());

        let negotiated = unsafe {
            NegotiatedFeatures::negotiate(&ProbeContext {
                instance: &instance,
                physical_device,
                info: &info,
                settings: &settings,
            })
        };

        let queue_families = unsafe { QueueFamilyIndices::query(&instance, &surface, physical_device)? };
        let direct_family = queue_families
            .direct_family
            .ok_or(GpuError::NoSuitableDevice)?;

        let swapchain_support = unsafe { SwapchainSupportDetails::query(&surface, physical_device)? };

        let device = unsafe {
            create_logical_device(&instance, physical_device, direct_family, &settings, &negotiated)?
        };
        {
            let device = device.clone();
            rollback.push(move || unsafe { device.destroy_device(None) });
        }

        let extensions = unsafe { OptionalExtensions::load(&instance, &device, &settings) };
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let allocator = unsafe {
            GpuAllocator::new(&instance, &device, physical_device, settings.frames_in_flight())?
        };

        rollback.disarm();

        tracing::info!(
            direct_family,
            back_buffers = settings.num_back_buffers,
            validation = settings.enable_validation_layers,
            "Device context ready"
        );

        Ok(Arc::new(Self {
            entry,
            instance,
            debug_messenger,
            surface,
            physical_device,
            info,
            negotiated,
            queue_families,
            swapchain_support,
            device,
            extensions,
            swapchain_loader,
            allocator: Mutex::new(allocator),
            settings,
        }))
    }

    /// Get the logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the selected physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Properties, features and limits captured at selection time.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Memory heaps and types of the selected device.
    pub fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.info.memory_properties
    }

    /// Index of a memory type allowed by `type_filter` with all of `flags`.
    pub fn find_memory_type(&self, type_filter: u32, flags: vk::MemoryPropertyFlags) -> Result<u32> {
        capabilities::find_memory_type(&self.info.memory_properties, type_filter, flags).ok_or_else(
            || GpuError::AllocationFailed(format!("No memory type matches {flags:?}")),
        )
    }

    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// The graphics family that presents to the bound surface.
    pub fn direct_queue_family(&self) -> u32 {
        // Construction fails without one.
        self.queue_families.direct_family.unwrap_or_default()
    }

    /// Family serving `role`.
    pub fn queue_family_for(&self, role: QueueRole) -> Result<u32> {
        self.queue_families
            .family_for(role)
            .ok_or_else(|| GpuError::InvalidState(format!("No queue family for {role:?}")))
    }

    /// Swapchain support captured for the selected device.
    pub fn swapchain_support(&self) -> &SwapchainSupportDetails {
        &self.swapchain_support
    }

    /// Current surface capabilities; extent bounds follow the window.
    pub fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe { self.surface.capabilities(self.physical_device) }
    }

    /// Optional capabilities that the device actually supports.
    pub fn negotiated_features(&self) -> &NegotiatedFeatures {
        &self.negotiated
    }

    /// Optional extension loaders; `None` where the driver lacks them.
    pub fn extensions(&self) -> &OptionalExtensions {
        &self.extensions
    }

    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    pub fn settings(&self) -> &GfxSettings {
        &self.settings
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Extensions exposed by the selected device.
    pub fn supported_device_extensions(&self) -> impl Iterator<Item = &str> {
        self.info.available_extensions.iter().map(String::as_str)
    }

    /// Block until all work on the device has finished.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::warn!("Device wait before teardown failed: {e}");
            }

            // Allocations must go before the device that owns their memory.
            self.allocator.lock().shutdown();

            self.surface.destroy();
            if let Some(messenger) = self.debug_messenger.take() {
                messenger.destroy();
            }
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }

        tracing::debug!("Device context destroyed");
    }
}

/// Teardown steps for a partially built context, run newest first when
/// dropped unless disarmed.
#[derive(Default)]
struct Rollback {
    steps: Vec<Box<dyn FnOnce()>>,
}

impl Rollback {
    fn push(&mut self, step: impl FnOnce() + 'static) {
        self.steps.push(Box::new(step));
    }

    /// Keep everything; ownership moved into the finished context.
    fn disarm(mut self) {
        self.steps.clear();
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        if !self.steps.is_empty() {
            tracing::debug!(steps = self.steps.len(), "Rolling back device context creation");
        }
        while let Some(step) = self.steps.pop() {
            step();
        }
    }
}

/// Reject settings no driver could satisfy.
pub fn validate_settings(settings: &GfxSettings) -> Result<()> {
    if settings.num_back_buffers == 0 {
        return Err(GpuError::InvalidConfig(
            "At least one back buffer is required".to_string(),
        ));
    }

    if !settings.enables_device_extension(ash::khr::swapchain::NAME) {
        return Err(GpuError::InvalidConfig(format!(
            "{} must be listed in device_extensions",
            ash::khr::swapchain::NAME.to_string_lossy()
        )));
    }

    Ok(())
}

/// Create the logical device with one queue on the direct family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    direct_family: u32,
    settings: &GfxSettings,
    negotiated: &NegotiatedFeatures,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(direct_family)
        .queue_priorities(std::slice::from_ref(&queue_priority))];

    let extension_names: Vec<*const c_char> = settings
        .device_extensions
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    // Selection guarantees both stages.
    let base_features = vk::PhysicalDeviceFeatures::default()
        .geometry_shader(true)
        .tessellation_shader(true);

    let mut feature_chain = DeviceFeatureChain::new(base_features, negotiated);
    tracing::debug!(
        structures = feature_chain.enabled_count(),
        "Enabling device feature chain"
    );

    let device_create_info = feature_chain.attach(
        vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names),
    );

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None)? };

    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        assert!(validate_settings(&GfxSettings::default()).is_ok());
    }

    #[test]
    fn zero_back_buffers_rejected() {
        let settings = GfxSettings::default().with_back_buffers(0);
        assert!(matches!(
            validate_settings(&settings),
            Err(GpuError::InvalidConfig(_))
        ));
    }

    #[test]
    fn swapchain_extension_required() {
        let settings = GfxSettings {
            device_extensions: Vec::new(),
            ..GfxSettings::default()
        };
        assert!(matches!(
            validate_settings(&settings),
            Err(GpuError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rollback_undoes_newest_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut rollback = Rollback::default();
            for step in ["instance", "surface", "device"] {
                let log = Arc::clone(&log);
                rollback.push(move || log.lock().push(step));
            }
        }

        assert_eq!(*log.lock(), ["device", "surface", "instance"]);
    }

    #[test]
    fn disarmed_rollback_keeps_everything() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let runs = Arc::new(AtomicUsize::new(0));
        let mut rollback = Rollback::default();
        {
            let runs = Arc::clone(&runs);
            rollback.push(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        rollback.disarm();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
