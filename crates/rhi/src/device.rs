//! Logical device, its queues, and the format-capability seam.
//!
//! Queue family indices come from
//! [`crate::physical_device::select_physical_device`] and are never
//! re-queried. Every GPU object holds an `Arc<Device>`, so the device is the
//! last thing the renderer destroys before the surface and instance.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::error::RhiResult;
use crate::instance::Instance;
use crate::physical_device::{DeviceRequirements, PhysicalDeviceInfo, QueueFamilyIndices};

/// Source of per-format capability data.
///
/// Implemented by [`Device`]; tests substitute a table.
pub trait FormatSupport {
    /// Features available for `format` with `VK_IMAGE_TILING_OPTIMAL`.
    fn optimal_tiling_features(&self, format: vk::Format) -> vk::FormatFeatureFlags;
}

/// Logical device shared through `Arc`. Fixed after construction.
pub struct Device {
    device: ash::Device,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
}

impl Device {
    /// Create the device with one queue per unique family.
    ///
    /// Enables the extensions in `requirements`, separate depth/stencil
    /// layouts, dynamic rendering, synchronization2, and sampler anisotropy
    /// when configured.
    ///
    /// # Errors
    ///
    /// Returns an error if `vkCreateDevice` fails.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
        requirements: &DeviceRequirements,
    ) -> RhiResult<Arc<Self>> {
        let queue_families = physical_device_info.queue_families;

        let unique_families = queue_families.unique();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_2 =
            vk::PhysicalDeviceVulkan12Features::default().separate_depth_stencil_layouts(true);

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let features =
            vk::PhysicalDeviceFeatures::default().sampler_anisotropy(requirements.sampler_anisotropy);

        let extension_names: Vec<*const c_char> = requirements
            .extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s): {:?}",
            requirements.extensions.len(),
            requirements.extensions
        );

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };
        debug!(
            "Queues retrieved (graphics family {}, present family {})",
            queue_families.graphics, queue_families.present
        );

        Ok(Arc::new(Self {
            device,
            instance: instance.handle().clone(),
            physical_device: physical_device_info.device,
            memory_properties: physical_device_info.memory_properties,
            graphics_queue,
            present_queue,
            queue_families,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Memory types and heaps used by [`crate::memory::find_memory_type`].
    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Block until every queue is idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submit to the graphics queue, signaling `fence` on completion.
    ///
    /// # Safety
    ///
    /// Every command buffer must be fully recorded, and `fence` must be
    /// unsignaled and unused by any other pending submission.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl FormatSupport for Device {
    fn optimal_tiling_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        let properties = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        };
        properties.optimal_tiling_features
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Function tables, handles, and plain data fixed at construction.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}
