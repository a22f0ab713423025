// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection and logical device creation.
//!
//! A device qualifies when it has a graphics family and a family that can
//! present to the surface, offers every extension in
//! [`REQUIRED_DEVICE_EXTENSIONS`], and reports at least one surface format
//! and one present mode. The first qualifying device in enumeration order
//! wins.
use crate::error::{RenderError, Result, StageExt};
use crate::instance::{missing_names, InstanceContext, Surface};
use ash::khr::swapchain;
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use tracing::{debug, info};

pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub presentation: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.presentation.is_some()
    }

    /// Distinct family indices, one queue-create-info each.
    pub fn unique(&self) -> BTreeSet<u32> {
        self.graphics.into_iter().chain(self.presentation).collect()
    }
}

/// Walks queue families in order; stops once both roles are filled.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if indices.graphics.is_none()
            && family.queue_count > 0
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics = Some(i);
        }
        if indices.presentation.is_none() && family.queue_count > 0 && supports_present(i) {
            indices.presentation = Some(i);
        }
        if indices.is_complete() {
            break;
        }
    }
    indices
}

/// What the renderer needs to know about one physical device.
#[derive(Clone, Debug, Default)]
pub struct DeviceProfile {
    pub name: String,
    pub queue_families: QueueFamilyIndices,
    pub extensions: Vec<CString>,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
}

impl DeviceProfile {
    pub unsafe fn query(
        instance: &ash::Instance,
        surface: &Surface,
        phys: vk::PhysicalDevice,
    ) -> Result<Self> {
        let props = instance.get_physical_device_properties(phys);
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_owned());

        let families = instance.get_physical_device_queue_family_properties(phys);
        let queue_families = find_queue_families(&families, |i| {
            surface
                .loader()
                .get_physical_device_surface_support(phys, i, surface.handle())
                .unwrap_or(false)
        });

        let extensions = instance
            .enumerate_device_extension_properties(phys)
            .stage("enumerate device extensions")?
            .iter()
            .filter_map(|e| e.extension_name_as_c_str().ok().map(CStr::to_owned))
            .collect();

        let loader = surface.loader();
        let formats = loader
            .get_physical_device_surface_formats(phys, surface.handle())
            .stage("query surface formats")?;
        let present_modes = loader
            .get_physical_device_surface_present_modes(phys, surface.handle())
            .stage("query surface present modes")?;
        let capabilities = loader
            .get_physical_device_surface_capabilities(phys, surface.handle())
            .stage("query surface capabilities")?;

        Ok(DeviceProfile {
            name,
            queue_families,
            extensions,
            formats,
            present_modes,
            capabilities,
        })
    }

    pub fn has_required_extensions(&self) -> bool {
        let offered: Vec<&CStr> = self.extensions.iter().map(CString::as_c_str).collect();
        missing_names(&offered, &REQUIRED_DEVICE_EXTENSIONS).is_empty()
    }

    /// First failed requirement, if any.
    pub fn unsuitable_reason(&self) -> Option<&'static str> {
        if self.queue_families.graphics.is_none() {
            Some("no graphics queue family")
        } else if self.queue_families.presentation.is_none() {
            Some("no queue family can present to the surface")
        } else if !self.has_required_extensions() {
            Some("missing required device extensions")
        } else if self.formats.is_empty() {
            Some("no surface formats")
        } else if self.present_modes.is_empty() {
            Some("no present modes")
        } else {
            None
        }
    }

    pub fn is_suitable(&self) -> bool {
        self.unsuitable_reason().is_none()
    }
}

/// Picks the first suitable device in enumeration order.
pub unsafe fn pick_physical_device(
    instance: &InstanceContext,
    surface: &Surface,
) -> Result<(vk::PhysicalDevice, DeviceProfile)> {
    let devices = instance
        .raw()
        .enumerate_physical_devices()
        .stage("enumerate physical devices")?;
    for phys in devices {
        let profile = match DeviceProfile::query(instance.raw(), surface, phys) {
            Ok(p) => p,
            Err(e) => {
                debug!("skipping device: {e}");
                continue;
            }
        };
        match profile.unsuitable_reason() {
            None => {
                info!(
                    "selected GPU '{}' (graphics family {:?}, present family {:?})",
                    profile.name,
                    profile.queue_families.graphics,
                    profile.queue_families.presentation
                );
                return Ok((phys, profile));
            }
            Some(reason) => debug!("skipping GPU '{}': {reason}", profile.name),
        }
    }
    Err(RenderError::NoSuitableDevice)
}

/// Logical device plus the graphics and presentation queues.
pub struct LogicalDevice {
    device: ash::Device,
    graphics_family: u32,
    present_family: u32,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl LogicalDevice {
    pub unsafe fn new(
        instance: &InstanceContext,
        phys: vk::PhysicalDevice,
        families: QueueFamilyIndices,
    ) -> Result<Self> {
        let (Some(graphics_family), Some(present_family)) =
            (families.graphics, families.presentation)
        else {
            return Err(RenderError::NoSuitableDevice);
        };

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let ext_ptrs: Vec<*const std::os::raw::c_char> =
            REQUIRED_DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        let device = instance
            .raw()
            .create_device(phys, &dinfo, None)
            .stage("create logical device")?;
        let graphics_queue = device.get_device_queue(graphics_family, 0);
        let present_queue = device.get_device_queue(present_family, 0);
        debug!("logical device created with {} queue family(ies)", queue_infos.len());

        Ok(LogicalDevice {
            device,
            graphics_family,
            present_family,
            graphics_queue,
            present_queue,
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    pub fn present_family(&self) -> u32 {
        self.present_family
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub unsafe fn wait_idle(&self) -> Result<()> {
        self.device.device_wait_idle().stage("wait for device idle")
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn suitable_profile() -> DeviceProfile {
        DeviceProfile {
            name: "test gpu".into(),
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                presentation: Some(0),
            },
            extensions: vec![c"VK_KHR_swapchain".to_owned(), c"VK_KHR_maintenance1".to_owned()],
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
        }
    }

    #[test]
    fn graphics_and_present_on_same_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1)];
        let idx = find_queue_families(&families, |_| true);
        assert_eq!(idx.graphics, Some(0));
        assert_eq!(idx.presentation, Some(0));
        assert_eq!(idx.unique().len(), 1);
    }

    #[test]
    fn separate_present_family_is_deduplicated_separately() {
        let families = [
            family(vk::QueueFlags::COMPUTE, 2),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let idx = find_queue_families(&families, |i| i == 2);
        assert_eq!(idx.graphics, Some(1));
        assert_eq!(idx.presentation, Some(2));
        assert_eq!(idx.unique().into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn empty_families_are_ignored() {
        let families = [family(vk::QueueFlags::GRAPHICS, 0), family(vk::QueueFlags::GRAPHICS, 1)];
        let idx = find_queue_families(&families, |_| true);
        assert_eq!(idx.graphics, Some(1));
        assert_eq!(idx.presentation, Some(1));
    }

    #[test]
    fn no_present_support_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let idx = find_queue_families(&families, |_| false);
        assert!(!idx.is_complete());
    }

    #[test]
    fn suitability_is_the_conjunction_of_all_requirements() {
        let base = suitable_profile();
        assert!(base.is_suitable());

        let mut p = base.clone();
        p.queue_families.graphics = None;
        assert!(!p.is_suitable());

        let mut p = base.clone();
        p.queue_families.presentation = None;
        assert!(!p.is_suitable());

        let mut p = base.clone();
        p.extensions.retain(|e| e.as_c_str() != c"VK_KHR_swapchain");
        assert!(!p.has_required_extensions());
        assert!(!p.is_suitable());

        let mut p = base.clone();
        p.formats.clear();
        assert!(!p.is_suitable());

        let mut p = base;
        p.present_modes.clear();
        assert_eq!(p.unsuitable_reason(), Some("no present modes"));
    }
}
