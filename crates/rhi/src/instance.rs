//! Vulkan instance management.
//!
//! Creates the `VkInstance` with the surface extensions the window system asks
//! for, plus the Khronos validation layer and a debug messenger that forwards
//! validation output to `tracing`.
//!
//! # Example
//!
//! ```no_run
//! use turt_rhi::instance::{Instance, InstanceDesc};
//!
//! # fn example(surface_extensions: &[*const std::ffi::c_char]) -> turt_rhi::RhiResult<()> {
//! let instance = Instance::new(&InstanceDesc {
//!     application_name: c"demo",
//!     enable_validation: cfg!(debug_assertions),
//!     surface_extensions,
//! })?;
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Parameters for [`Instance::new`].
#[derive(Debug, Clone, Copy)]
pub struct InstanceDesc<'a> {
    pub application_name: &'a CStr,
    /// Requires the validation layer. Creation fails if it is not installed.
    pub enable_validation: bool,
    /// Extensions the window system needs to create a surface.
    pub surface_extensions: &'a [*const c_char],
}

pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Loads the Vulkan library and creates an instance.
    ///
    /// # Errors
    ///
    /// - [`RhiError::LoadingError`] if no Vulkan loader is installed
    /// - [`RhiError::ValidationLayerMissing`] if validation was requested but
    ///   the layer is not available
    /// - [`RhiError::VulkanError`] if instance creation fails
    pub fn new(desc: &InstanceDesc<'_>) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        if desc.enable_validation && !Self::is_validation_layer_available(&entry)? {
            error!("Validation layer {:?} is not installed", VALIDATION_LAYER_NAME);
            return Err(RhiError::ValidationLayerMissing);
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(desc.application_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"turt")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extensions = desc.surface_extensions.to_vec();
        if desc.enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if desc.enable_validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        // Chained so that instance creation and destruction are covered too.
        let mut messenger_info = debug_messenger_create_info();

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        if desc.enable_validation {
            create_info = create_info.push_next(&mut messenger_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!(
            "Vulkan instance created ({} extension(s), validation {})",
            extensions.len(),
            if desc.enable_validation { "on" } else { "off" }
        );

        let (debug_utils, debug_messenger) = if desc.enable_validation {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = unsafe {
                debug_utils.create_debug_utils_messenger(&debug_messenger_create_info(), None)
            };
            match messenger {
                Ok(messenger) => {
                    debug!("Debug messenger created");
                    (Some(debug_utils), Some(messenger))
                }
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        Ok(available_layers.iter().any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        }))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let kind = message_kind(message_type);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!(target: "vulkan", "[{kind}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!(target: "vulkan", "[{kind}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!(target: "vulkan", "[{kind}] {message}"),
        _ => debug!(target: "vulkan", "[{kind}] {message}"),
    }

    vk::FALSE
}

fn message_kind(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_creation_without_validation() {
        // Needs a Vulkan loader; skipped when none is installed.
        let desc = InstanceDesc {
            application_name: c"instance-test",
            enable_validation: false,
            surface_extensions: &[],
        };
        match Instance::new(&desc) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(RhiError::LoadingError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(RhiError::VulkanError(e)) => {
                eprintln!("Skipping test: no usable Vulkan driver ({e})");
            }
            Err(e) => panic!("Unexpected error: {e:?}"),
        }
    }

    #[test]
    fn test_missing_validation_is_fatal_or_enabled() {
        let desc = InstanceDesc {
            application_name: c"instance-test",
            enable_validation: true,
            surface_extensions: &[],
        };
        match Instance::new(&desc) {
            Ok(instance) => assert!(instance.has_validation()),
            Err(RhiError::ValidationLayerMissing)
            | Err(RhiError::LoadingError(_))
            | Err(RhiError::VulkanError(_)) => {}
            Err(e) => panic!("Unexpected error: {e:?}"),
        }
    }

    #[test]
    fn test_message_kind_prefers_validation() {
        let both = vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
        assert_eq!(message_kind(both), "validation");
        assert_eq!(
            message_kind(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE),
            "performance"
        );
        assert_eq!(
            message_kind(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL),
            "general"
        );
    }
}
