//! Driver diagnostics routed into `tracing`.
//!
//! The validation layers report through a single C callback. Each message is
//! first classified into a [`DebugCategory`] and [`DebugSeverity`]; messages
//! in the performance category are dropped by [`is_suppressed`] before any
//! formatting or logging takes place.

use ash::vk;
use std::ffi::{c_void, CStr};

/// Target used for every message forwarded from the validation layers.
pub const VALIDATION_TARGET: &str = "tessel_gfx::validation";

/// Category of a driver diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugCategory {
    /// Anything not tagged as validation or performance.
    General,
    /// A violation of the API usage rules.
    Validation,
    /// A potentially non-optimal use of the API.
    Performance,
}

impl DebugCategory {
    /// Short tag used in log output.
    pub fn tag(self) -> &'static str {
        match self {
            Self::General => "COMMON",
            Self::Validation => "SPEC",
            Self::Performance => "PERF",
        }
    }

    fn from_types(types: vk::DebugUtilsMessageTypeFlagsEXT) -> Self {
        if types == vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION {
            Self::Validation
        } else if types == vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE {
            Self::Performance
        } else {
            Self::General
        }
    }
}

/// Severity of a driver diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugSeverity {
    Info,
    Warning,
    Error,
}

impl DebugSeverity {
    fn from_flags(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if severity == vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
            Self::Info
        } else if severity == vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
            Self::Error
        } else {
            // Verbose and unknown bits are surfaced rather than hidden.
            Self::Warning
        }
    }
}

/// A classified driver message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub category: DebugCategory,
    pub severity: DebugSeverity,
}

/// Performance messages are never forwarded to the logger.
pub fn is_suppressed(category: DebugCategory) -> bool {
    category == DebugCategory::Performance
}

/// Classify a driver message, returning `None` when it must be dropped.
pub fn classify(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
) -> Option<Classified> {
    let category = DebugCategory::from_types(types);
    if is_suppressed(category) {
        return None;
    }

    Some(Classified {
        category,
        severity: DebugSeverity::from_flags(severity),
    })
}

fn emit(classified: Classified, message: &str) {
    let category = classified.category.tag();
    match classified.severity {
        DebugSeverity::Info => {
            tracing::info!(target: VALIDATION_TARGET, category, "{message}");
        }
        DebugSeverity::Warning => {
            tracing::warn!(target: VALIDATION_TARGET, category, "{message}");
        }
        DebugSeverity::Error => {
            tracing::error!(target: VALIDATION_TARGET, category, "{message}");
        }
    }
}

unsafe extern "system" fn validation_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let Some(classified) = classify(severity, types) else {
        return vk::FALSE;
    };

    // SAFETY: the layer passes either null or a valid callback data pointer
    // whose message is a NUL-terminated string for the duration of the call.
    let message = unsafe {
        callback_data
            .as_ref()
            .filter(|data| !data.p_message.is_null())
            .map(|data| CStr::from_ptr(data.p_message).to_string_lossy())
    };

    if let Some(message) = message {
        emit(classified, &message);
    }

    vk::FALSE
}

/// Messenger create info used both for instance creation and the
/// standalone messenger.
pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(validation_callback))
}

/// Installed debug messenger and its loader.
#[derive(Clone)]
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Install the validation callback.
    ///
    /// # Safety
    /// The instance must have been created with `VK_EXT_debug_utils` enabled.
    pub unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> crate::Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let messenger =
            unsafe { loader.create_debug_utils_messenger(&messenger_create_info(), None)? };

        Ok(Self { loader, messenger })
    }

    /// Remove the callback.
    ///
    /// # Safety
    /// Must run before the instance is destroyed.
    pub unsafe fn destroy(&self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Severity = vk::DebugUtilsMessageSeverityFlagsEXT;
    type Types = vk::DebugUtilsMessageTypeFlagsEXT;

    #[test]
    fn performance_messages_are_dropped() {
        for severity in [Severity::INFO, Severity::WARNING, Severity::ERROR] {
            assert_eq!(classify(severity, Types::PERFORMANCE), None);
        }
    }

    #[test]
    fn validation_errors_keep_category_and_severity() {
        let classified = classify(Severity::ERROR, Types::VALIDATION).unwrap();
        assert_eq!(classified.category, DebugCategory::Validation);
        assert_eq!(classified.severity, DebugSeverity::Error);
    }

    #[test]
    fn general_info_is_info() {
        let classified = classify(Severity::INFO, Types::GENERAL).unwrap();
        assert_eq!(classified.category, DebugCategory::General);
        assert_eq!(classified.severity, DebugSeverity::Info);
    }

    #[test]
    fn unknown_severity_defaults_to_warning() {
        let classified = classify(Severity::VERBOSE, Types::GENERAL).unwrap();
        assert_eq!(classified.severity, DebugSeverity::Warning);
    }

    #[test]
    fn mixed_type_bits_fall_back_to_general() {
        let classified = classify(Severity::WARNING, Types::VALIDATION | Types::PERFORMANCE).unwrap();
        assert_eq!(classified.category, DebugCategory::General);
        assert!(!is_suppressed(classified.category));
    }

    #[test]
    fn category_tags() {
        assert_eq!(DebugCategory::General.tag(), "COMMON");
        assert_eq!(DebugCategory::Validation.tag(), "SPEC");
        assert_eq!(DebugCategory::Performance.tag(), "PERF");
    }
}
