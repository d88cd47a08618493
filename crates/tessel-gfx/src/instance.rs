//! Vulkan instance creation.

use crate::config::GfxSettings;
use crate::debug;
use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{c_char, CStr, CString};

/// Names of the extensions the loader reports for instance creation.
pub fn supported_instance_extensions(entry: &ash::Entry) -> Result<Vec<String>> {
    let extensions = unsafe { entry.enumerate_instance_extension_properties(None)? };

    Ok(extensions
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect())
}

/// Whether every configured validation layer is installed.
pub fn has_validation_layer_support(entry: &ash::Entry, layers: &[&CStr]) -> Result<bool> {
    let available = unsafe { entry.enumerate_instance_layer_properties()? };

    Ok(layers.iter().all(|layer| {
        available
            .iter()
            .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == *layer))
    }))
}

/// Instance extensions to enable: the window's presentation extensions,
/// then the configured ones, then debug utils when validating.
pub fn instance_extension_list(
    window_extensions: &[*const c_char],
    settings: &GfxSettings,
) -> Vec<*const c_char> {
    let mut extensions = window_extensions.to_vec();
    extensions.extend(settings.instance_extensions.iter().map(|ext| ext.as_ptr()));

    #[cfg(target_os = "macos")]
    extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());

    if settings.enable_validation_layers {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    extensions
}

/// Create a Vulkan instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point and `window_extensions`
/// must point to NUL-terminated strings that outlive the call.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    settings: &GfxSettings,
    window_extensions: &[*const c_char],
) -> Result<ash::Instance> {
    let app_name = CString::new(settings.app_name.as_str())
        .map_err(|e| GpuError::InvalidConfig(format!("Application name: {e}")))?;
    let app_version = vk::make_api_version(0, 1, 0, 0);

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(app_version)
        .engine_name(c"Tessel")
        .engine_version(app_version)
        .api_version(vk::API_VERSION_1_2);

    let extension_names = instance_extension_list(window_extensions, settings);

    let layers: &[&CStr] = if settings.enable_validation_layers {
        if !has_validation_layer_support(entry, &settings.validation_layer_names)? {
            tracing::warn!("Requested validation layers but the loader does not provide them");
        }
        &settings.validation_layer_names
    } else {
        &[]
    };
    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    // Chained so that instance creation and destruction are also reported.
    let mut debug_info = debug::messenger_create_info();

    let mut create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    if settings.enable_validation_layers {
        create_info = create_info.push_next(&mut debug_info);
    }

    let instance = unsafe { entry.create_instance(&create_info, None)? };

    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[*const c_char]) -> Vec<&CStr> {
        list.iter().map(|&p| unsafe { CStr::from_ptr(p) }).collect()
    }

    #[test]
    fn debug_utils_only_with_validation() {
        let window: [*const c_char; 1] = [ash::khr::surface::NAME.as_ptr()];

        let quiet = instance_extension_list(&window, &GfxSettings::new().with_validation(false));
        assert!(!names(&quiet).contains(&ash::ext::debug_utils::NAME));

        let loud = instance_extension_list(&window, &GfxSettings::new().with_validation(true));
        let loud = names(&loud);
        assert_eq!(loud.first(), Some(&ash::khr::surface::NAME));
        assert_eq!(loud.last(), Some(&ash::ext::debug_utils::NAME));
    }

    #[test]
    fn configured_extensions_follow_window_extensions() {
        let window: [*const c_char; 1] = [ash::khr::surface::NAME.as_ptr()];
        let settings = GfxSettings::new()
            .with_validation(false)
            .with_instance_extension(c"VK_KHR_get_surface_capabilities2");

        let list = instance_extension_list(&window, &settings);
        let list = names(&list);
        assert_eq!(list[0], ash::khr::surface::NAME);
        assert_eq!(list[1], c"VK_KHR_get_surface_capabilities2");
    }
}
