// SPDX-License-Identifier: CEPL-1.0
use crate::error::{Result, StageExt};
use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;
use tracing::{debug, error, info, trace, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Names from `wanted` that do not appear in `available`.
pub(crate) fn missing_names<'a>(available: &[&CStr], wanted: &[&'a CStr]) -> Vec<&'a CStr> {
    wanted
        .iter()
        .copied()
        .filter(|w| !available.iter().any(|a| a == w))
        .collect()
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

/// Loader entry, instance and (debug builds) the validation messenger.
pub struct InstanceContext {
    entry: Entry,
    instance: ash::Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl InstanceContext {
    pub unsafe fn new(display: &dyn HasDisplayHandle) -> Result<Self> {
        let entry = Entry::load()?;
        let display_raw = display.display_handle()?.as_raw();

        let mut extensions: Vec<&CStr> = ash_window::enumerate_required_extensions(display_raw)
            .stage("enumerate required surface extensions")?
            .iter()
            .map(|&p| CStr::from_ptr(p))
            .collect();

        let want_validation = cfg!(debug_assertions) && validation_layer_available(&entry);
        if cfg!(debug_assertions) && !want_validation {
            warn!(
                "validation layers requested but {VALIDATION_LAYER:?} is not installed; \
                 continuing without"
            );
        }
        if want_validation {
            extensions.push(debug_utils::NAME);
        }

        let offered = entry
            .enumerate_instance_extension_properties(None)
            .stage("enumerate instance extensions")?;
        let offered_names: Vec<&CStr> = offered
            .iter()
            .filter_map(|e| e.extension_name_as_c_str().ok())
            .collect();
        let missing = missing_names(&offered_names, &extensions);
        if !missing.is_empty() {
            error!("instance extensions missing: {missing:?}");
            return Err(crate::RenderError::failed(
                "instance extension support",
                vk::Result::ERROR_EXTENSION_NOT_PRESENT,
            ));
        }

        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: c"Ember".as_ptr(),
            application_version: vk::make_api_version(0, 1, 0, 0),
            p_engine_name: c"Ember".as_ptr(),
            engine_version: vk::make_api_version(0, 1, 0, 0),
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };

        let ext_ptrs: Vec<*const std::os::raw::c_char> =
            extensions.iter().map(|e| e.as_ptr()).collect();
        let layers = [VALIDATION_LAYER.as_ptr()];
        let (layer_count, layer_ptr) = if want_validation {
            (layers.len() as u32, layers.as_ptr())
        } else {
            (0, std::ptr::null())
        };

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            enabled_layer_count: layer_count,
            pp_enabled_layer_names: layer_ptr,
            ..Default::default()
        };
        let instance = entry
            .create_instance(&create_info, None)
            .stage("create instance")?;

        let mut ctx = InstanceContext {
            entry,
            instance,
            debug: None,
        };
        if want_validation {
            ctx.debug = Some(ctx.create_debug_messenger()?);
        }
        info!(
            "vulkan instance created (extensions: {}, validation: {})",
            extensions.len(),
            want_validation
        );
        Ok(ctx)
    }

    unsafe fn create_debug_messenger(
        &self,
    ) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let loader = debug_utils::Instance::new(&self.entry, &self.instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let messenger = loader
            .create_debug_utils_messenger(&ci, None)
            .stage("create debug messenger")?;
        Ok((loader, messenger))
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn validation_layer_available(entry: &Entry) -> bool {
    let layers = entry.enumerate_instance_layer_properties().unwrap_or_default();
    let names: Vec<&CStr> = layers
        .iter()
        .filter_map(|l| l.layer_name_as_c_str().ok())
        .collect();
    missing_names(&names, &[VALIDATION_LAYER]).is_empty()
}

/// Presentation surface bound to the window.
pub struct Surface {
    loader: surface::Instance,
    handle: vk::SurfaceKHR,
}

impl Surface {
    pub unsafe fn new(
        instance: &InstanceContext,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<Self> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();
        let handle = ash_window::create_surface(instance.entry(), instance.raw(), dh, wh, None)
            .stage("create surface")?;
        let loader = surface::Instance::new(instance.entry(), instance.raw());
        Ok(Surface { loader, handle })
    }

    pub fn loader(&self) -> &surface::Instance {
        &self.loader
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_names_reports_only_absent() {
        let available = [c"VK_KHR_surface", c"VK_KHR_xcb_surface"];
        let wanted = [c"VK_KHR_surface", c"VK_EXT_debug_utils"];
        assert_eq!(missing_names(&available, &wanted), vec![c"VK_EXT_debug_utils"]);
    }

    #[test]
    fn missing_names_is_exact_match() {
        // A prefix of an available name is not a match.
        let available = [c"VK_KHR_swapchain_mutable_format"];
        assert_eq!(
            missing_names(&available, &[c"VK_KHR_swapchain"]),
            vec![c"VK_KHR_swapchain"]
        );
        assert!(missing_names(&available, &[]).is_empty());
    }
}
