//! Physical device (GPU) selection.
//!
//! The selection process:
//! 1. Enumerate all available GPUs
//! 2. Resolve one graphics and one present queue family per GPU
//! 3. Verify Vulkan 1.3, required extensions and required features
//! 4. Select the most suitable GPU (preferring discrete GPUs)
//!
//! Queue families are resolved exactly once here and carried unchanged by
//! [`crate::device::Device`] for the rest of the program.

use std::ffi::{CStr, CString};

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Resolved graphics and present queue family indices.
///
/// Both indices may name the same family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// True when presentation happens on a different family than rendering,
    /// which forces concurrent sharing of swapchain images.
    #[inline]
    pub fn are_different(&self) -> bool {
        self.graphics != self.present
    }

    /// Unique family indices, for queue create infos and sharing lists.
    pub fn unique(&self) -> Vec<u32> {
        if self.are_different() {
            vec![self.graphics, self.present]
        } else {
            vec![self.graphics]
        }
    }
}

/// Pick graphics and present families.
///
/// The first graphics-capable family wins if it can also present. Otherwise a
/// family that does both is preferred, and only then a graphics/present pair
/// of distinct families.
///
/// # Arguments
///
/// * `families` - Queue flags for each family, in device order
/// * `supports_present` - Whether family `i` can present to the target surface
pub fn resolve_queue_families(
    families: &[vk::QueueFlags],
    supports_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilyIndices> {
    let is_graphics = |flags: &vk::QueueFlags| flags.contains(vk::QueueFlags::GRAPHICS);

    let graphics = families.iter().position(is_graphics)? as u32;
    if supports_present(graphics) {
        return Some(QueueFamilyIndices {
            graphics,
            present: graphics,
        });
    }

    if let Some(both) = (0..families.len() as u32)
        .find(|&i| is_graphics(&families[i as usize]) && supports_present(i))
    {
        return Some(QueueFamilyIndices {
            graphics: both,
            present: both,
        });
    }

    (0..families.len() as u32)
        .find(|&i| supports_present(i))
        .map(|present| QueueFamilyIndices { graphics, present })
}

/// Hardware vendor decoded from the PCI vendor id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Vendor {
    Amd,
    Nvidia,
    Intel,
    Unknown(u32),
}

impl Vendor {
    pub fn from_id(id: u32) -> Self {
        match id {
            0x1022 => Vendor::Amd,
            0x10DE => Vendor::Nvidia,
            0x8086 => Vendor::Intel,
            other => Vendor::Unknown(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Vendor::Amd => "AMD",
            Vendor::Nvidia => "NVidia",
            Vendor::Intel => "Intel",
            Vendor::Unknown(_) => "Unknown",
        }
    }
}

/// Split a packed driver version into (major, minor, patch).
pub fn decode_driver_version(version: u32) -> (u32, u32, u32) {
    (
        (version >> 22) & 0x3FF,
        (version >> 14) & 0xFF,
        (version >> 6) & 0xFF,
    )
}

/// What a GPU must offer to be considered.
#[derive(Clone, Debug, Default)]
pub struct DeviceRequirements {
    pub extensions: Vec<CString>,
    pub sampler_anisotropy: bool,
}

impl DeviceRequirements {
    /// Always-on extensions plus `extra` from configuration.
    pub fn with_extensions(extra: &[String], sampler_anisotropy: bool) -> RhiResult<Self> {
        let mut extensions: Vec<CString> = [
            ash::khr::swapchain::NAME,
            ash::khr::dynamic_rendering::NAME,
            ash::khr::synchronization2::NAME,
        ]
        .iter()
        .map(|name| CString::from(*name))
        .collect();

        for name in extra {
            let name = crate::instance::to_cstring(name)?;
            if !extensions.contains(&name) {
                extensions.push(name);
            }
        }

        Ok(Self {
            extensions,
            sampler_anisotropy,
        })
    }
}

/// Information about the selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> String {
        self.properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "Unknown Device".to_string())
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    pub fn vendor(&self) -> Vendor {
        Vendor::from_id(self.properties.vendor_id)
    }

    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    pub fn driver_version(&self) -> (u32, u32, u32) {
        decode_driver_version(self.properties.driver_version)
    }

    /// Returns the total device local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    /// Log the summary printed once at startup.
    pub fn log_summary(&self) {
        let (api_major, api_minor, api_patch) = self.api_version();
        let (drv_major, drv_minor, drv_patch) = self.driver_version();
        info!(
            "GPU: '{}' ({}), vendor {} [{:#06x}], Vulkan {}.{}.{}, driver {}.{}.{}, {} MiB local",
            self.device_name(),
            self.device_type_name(),
            self.vendor().name(),
            self.properties.vendor_id,
            api_major,
            api_minor,
            api_patch,
            drv_major,
            drv_minor,
            drv_patch,
            self.device_local_memory() / (1024 * 1024)
        );
        info!(
            "Queue families: graphics={}, present={}",
            self.queue_families.graphics, self.queue_families.present
        );
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("vendor", &self.vendor())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the most suitable physical device for rendering.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no GPU satisfies `requirements`
/// with both graphics and presentation to `surface`.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
    requirements: &DeviceRequirements,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut suitable: Vec<(PhysicalDeviceInfo, u32)> = devices
        .into_iter()
        .filter_map(|device| {
            check_device_suitability(instance, device, surface, surface_loader, requirements)
        })
        .map(|info| {
            let score = rate_device(&info);
            debug!(
                "GPU '{}' ({}) - Score: {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            (info, score)
        })
        .collect();

    if suitable.is_empty() {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    }

    suitable.sort_by(|a, b| b.1.cmp(&a.1));
    let (selected, _) = suitable.swap_remove(0);
    selected.log_summary();

    Ok(selected)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
    requirements: &DeviceRequirements,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    let device_name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if vk::api_version_major(properties.api_version) == 1
        && vk::api_version_minor(properties.api_version) < 3
    {
        debug!("GPU '{}' skipped: Vulkan 1.3 not supported", device_name);
        return None;
    }

    let family_flags: Vec<vk::QueueFlags> =
        unsafe { instance.get_physical_device_queue_family_properties(device) }
            .iter()
            .map(|family| {
                if family.queue_count == 0 {
                    vk::QueueFlags::empty()
                } else {
                    family.queue_flags
                }
            })
            .collect();

    let queue_families = resolve_queue_families(&family_flags, |i| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, i, surface)
            .unwrap_or(false)
    });
    let Some(queue_families) = queue_families else {
        debug!(
            "GPU '{}' skipped: no graphics/present queue families",
            device_name
        );
        return None;
    };

    let available = unsafe {
        instance
            .enumerate_device_extension_properties(device)
            .unwrap_or_default()
    };
    let available: Vec<&CStr> = available
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .collect();
    if let Some(missing) = requirements
        .extensions
        .iter()
        .find(|required| !available.contains(&required.as_c_str()))
    {
        debug!("GPU '{}' skipped: missing extension {:?}", device_name, missing);
        return None;
    }

    if requirements.sampler_anisotropy && features.sampler_anisotropy == vk::FALSE {
        debug!(
            "GPU '{}' skipped: sampler anisotropy not supported",
            device_name
        );
        return None;
    }

    if !supports_required_features(instance, device) {
        debug!(
            "GPU '{}' skipped: dynamic rendering, synchronization2 or separate depth/stencil layouts missing",
            device_name
        );
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
    })
}

fn supports_required_features(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut vulkan12)
        .push_next(&mut vulkan13);

    unsafe { instance.get_physical_device_features2(device, &mut features2) };

    vulkan13.dynamic_rendering == vk::TRUE
        && vulkan13.synchronization2 == vk::TRUE
        && vulkan12.separate_depth_stencil_layouts == vk::TRUE
}

/// Higher scores indicate more desirable devices.
fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let mut score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    score += info.properties.limits.max_image_dimension2_d;

    let vram_mb = (info.device_local_memory() / (1024 * 1024)) as u32;
    score += vram_mb.min(16000);

    // One family for both avoids concurrent sharing.
    if !info.queue_families.are_different() {
        score += 100;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: vk::QueueFlags = vk::QueueFlags::GRAPHICS;
    const C: vk::QueueFlags = vk::QueueFlags::COMPUTE;
    const T: vk::QueueFlags = vk::QueueFlags::TRANSFER;

    #[test]
    fn first_graphics_family_used_for_both_when_it_presents() {
        let families = [T, G | C | T, G | T];
        let indices = resolve_queue_families(&families, |_| true).unwrap();
        assert_eq!(
            indices,
            QueueFamilyIndices {
                graphics: 1,
                present: 1
            }
        );
        assert!(!indices.are_different());
        assert_eq!(indices.unique(), vec![1]);
    }

    #[test]
    fn later_family_with_both_beats_split_pair() {
        let families = [G, T, G | C];
        let indices = resolve_queue_families(&families, |i| i != 0).unwrap();
        assert_eq!(
            indices,
            QueueFamilyIndices {
                graphics: 2,
                present: 2
            }
        );
    }

    #[test]
    fn falls_back_to_distinct_present_family() {
        let families = [G | C, T];
        let indices = resolve_queue_families(&families, |i| i == 1).unwrap();
        assert_eq!(
            indices,
            QueueFamilyIndices {
                graphics: 0,
                present: 1
            }
        );
        assert!(indices.are_different());
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn no_present_family_fails() {
        assert!(resolve_queue_families(&[G, C], |_| false).is_none());
    }

    #[test]
    fn no_graphics_family_fails() {
        assert!(resolve_queue_families(&[C, T], |_| true).is_none());
    }

    #[test]
    fn vendor_ids_decode() {
        assert_eq!(Vendor::from_id(0x1022), Vendor::Amd);
        assert_eq!(Vendor::from_id(0x10DE), Vendor::Nvidia);
        assert_eq!(Vendor::from_id(0x8086).name(), "Intel");
        assert_eq!(Vendor::from_id(0x13B5).name(), "Unknown");
    }

    #[test]
    fn driver_version_decodes_bit_fields() {
        let packed = (535 << 22) | (113 << 14) | (1 << 6);
        assert_eq!(decode_driver_version(packed), (535, 113, 1));
    }

    #[test]
    fn requirements_always_include_swapchain() {
        let reqs = DeviceRequirements::with_extensions(
            &["VK_KHR_swapchain".to_string(), "VK_EXT_memory_budget".to_string()],
            true,
        )
        .unwrap();
        assert_eq!(reqs.extensions.len(), 4);
        assert_eq!(reqs.extensions[0].as_c_str(), ash::khr::swapchain::NAME);
        assert!(reqs.sampler_anisotropy);
    }
}
