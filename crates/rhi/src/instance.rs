//! VkInstance, configured layers, and the validation messenger.
//!
//! Layers come from the configuration and are filtered against what the
//! loader reports; validation output is forwarded to `tracing` at the
//! matching level.

use std::ffi::{CStr, CString, c_char};

use ash::{Entry, vk};
use tracing::{Level, debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

/// Everything instance creation needs from the application.
#[derive(Debug, Clone)]
pub struct InstanceDesc {
    pub application_name: String,
    /// `[major, minor, patch]`
    pub application_version: [u8; 3],
    /// Layers to try to enable; missing ones are skipped with a warning.
    pub layers: Vec<String>,
    /// Extensions the window system requires for surface creation.
    pub window_extensions: Vec<*const c_char>,
    /// Additional instance extensions by name.
    pub extensions: Vec<String>,
    pub enable_debug_messenger: bool,
}

impl Default for InstanceDesc {
    fn default() -> Self {
        Self {
            application_name: "lumen".to_string(),
            application_version: [0, 1, 0],
            layers: Vec::new(),
            window_extensions: Vec::new(),
            extensions: Vec::new(),
            enable_debug_messenger: false,
        }
    }
}

/// Instance plus the optional debug messenger, destroyed together.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    enabled_layers: Vec<String>,
}

impl Instance {
    /// Load the Vulkan library and create a 1.3 instance for `desc`.
    ///
    /// # Errors
    ///
    /// Returns an error if the loader is missing, a configured name contains
    /// a NUL byte, or instance or messenger creation fails.
    pub fn new(desc: &InstanceDesc) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let available = Self::available_layer_names(&entry)?;
        let (enabled_layers, missing) = partition_layers(&desc.layers, &available);
        for layer in &missing {
            warn!("Layer {} requested but not available, skipping", layer);
        }

        let app_name = to_cstring(&desc.application_name)?;
        let [major, minor, patch] = desc.application_version;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(
                0,
                major as u32,
                minor as u32,
                patch as u32,
            ))
            .engine_name(c"lumen")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let use_messenger = desc.enable_debug_messenger;

        let extra_extensions = desc
            .extensions
            .iter()
            .map(|name| to_cstring(name))
            .collect::<RhiResult<Vec<_>>>()?;
        let mut extensions = desc.window_extensions.clone();
        extensions.extend(extra_extensions.iter().map(|name| name.as_ptr()));
        if use_messenger
            && !extra_extensions
                .iter()
                .any(|name| name.as_c_str() == ash::ext::debug_utils::NAME)
        {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layer_names = enabled_layers
            .iter()
            .map(|name| to_cstring(name))
            .collect::<RhiResult<Vec<_>>>()?;
        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|l| l.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!(
            "Vulkan instance created for '{}' (API version 1.3, {} layers)",
            desc.application_name,
            enabled_layers.len()
        );

        let (debug_utils, debug_messenger) = if use_messenger {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => {
                    debug!("Debug messenger created");
                    (Some(debug_utils), Some(messenger))
                }
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
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
            enabled_layers,
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

    /// Returns whether validation output is routed to the log.
    #[inline]
    pub fn has_debug_messenger(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Layers that were actually enabled.
    pub fn enabled_layers(&self) -> &[String] {
        &self.enabled_layers
    }

    fn available_layer_names(entry: &Entry) -> RhiResult<Vec<String>> {
        let properties = unsafe { entry.enumerate_instance_layer_properties()? };
        Ok(properties
            .iter()
            .filter_map(|layer| {
                layer
                    .layer_name_as_c_str()
                    .ok()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .collect())
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };

        Ok(messenger)
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

/// Split requested layers into (available, missing), keeping request order
/// and dropping duplicates.
fn partition_layers(requested: &[String], available: &[String]) -> (Vec<String>, Vec<String>) {
    let mut enabled: Vec<String> = Vec::new();
    let mut missing = Vec::new();
    for layer in requested {
        if enabled.contains(layer) {
            continue;
        }
        if available.contains(layer) {
            enabled.push(layer.clone());
        } else {
            missing.push(layer.clone());
        }
    }
    (enabled, missing)
}

pub(crate) fn to_cstring(name: &str) -> RhiResult<CString> {
    CString::new(name)
        .map_err(|_| RhiError::InvalidArgument(format!("name contains a NUL byte: {name:?}")))
}

/// Forwards validation layer messages to `tracing`.
///
/// # Safety
///
/// Called by the Vulkan loader with either a null pointer or valid callback data.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
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
    let level = log_level(message_severity);
    if level == Level::ERROR {
        error!("[vulkan {kind}] {message}");
    } else if level == Level::WARN {
        warn!("[vulkan {kind}] {message}");
    } else {
        debug!("[vulkan {kind}] {message}");
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

/// Most severe bit wins.
fn log_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        Level::ERROR
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        Level::WARN
    } else {
        Level::DEBUG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_layers_are_split_out() {
        let requested = names(&["VK_LAYER_KHRONOS_validation", "VK_LAYER_LUNARG_monitor"]);
        let available = names(&["VK_LAYER_KHRONOS_validation", "VK_LAYER_MESA_overlay"]);

        let (enabled, missing) = partition_layers(&requested, &available);
        assert_eq!(enabled, names(&["VK_LAYER_KHRONOS_validation"]));
        assert_eq!(missing, names(&["VK_LAYER_LUNARG_monitor"]));
    }

    #[test]
    fn duplicate_layers_are_enabled_once() {
        let requested = names(&["A", "A", "B"]);
        let available = names(&["A", "B"]);
        let (enabled, missing) = partition_layers(&requested, &available);
        assert_eq!(enabled, names(&["A", "B"]));
        assert!(missing.is_empty());
    }

    #[test]
    fn interior_nul_is_invalid_argument() {
        assert!(matches!(
            to_cstring("bad\0name"),
            Err(RhiError::InvalidArgument(_))
        ));
        assert_eq!(to_cstring("ok").unwrap().as_bytes(), b"ok");
    }

    #[test]
    fn severity_maps_to_log_level() {
        type S = vk::DebugUtilsMessageSeverityFlagsEXT;
        assert_eq!(log_level(S::ERROR), Level::ERROR);
        assert_eq!(log_level(S::WARNING), Level::WARN);
        assert_eq!(log_level(S::WARNING | S::ERROR), Level::ERROR);
        assert_eq!(log_level(S::INFO), Level::DEBUG);
        assert_eq!(
            message_kind(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION),
            "validation"
        );
    }

    #[test]
    fn instance_without_layers() {
        // Requires a Vulkan loader; any failure to reach a driver skips the test.
        match Instance::new(&InstanceDesc::default()) {
            Ok(instance) => {
                assert!(!instance.has_debug_messenger());
                assert!(instance.enabled_layers().is_empty());
            }
            Err(e) => eprintln!("Skipping test: Vulkan not available ({e})"),
        }
    }
}
