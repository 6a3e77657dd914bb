// Logical device - the device handle and its single queue
//
// One queue from the selected family serves both graphics and present.
// Only VK_KHR_swapchain is enabled and no optional features are requested.

use super::context::{first_missing, PresentationContext};
use super::error::{ExtensionKind, SetupError, VkResultExt};
use super::selector::PhysicalDeviceCandidate;
use ash::vk;
use std::ffi::{c_char, CStr};

const DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

/// Vulkan device wrapper with automatic cleanup
///
/// Everything built on top borrows this; nothing else destroys the device.
pub struct LogicalDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue: vk::Queue,
    pub queue_family_index: u32,
}

impl LogicalDevice {
    pub fn new(
        context: &PresentationContext,
        candidate: PhysicalDeviceCandidate,
    ) -> Result<Self, SetupError> {
        let instance = &context.instance;
        let PhysicalDeviceCandidate {
            physical_device,
            queue_family_index,
        } = candidate;

        let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .during("vkEnumerateDeviceExtensionProperties")?;
        let available: Vec<&CStr> = available
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok())
            .collect();
        if let Some(missing) = first_missing(&DEVICE_EXTENSIONS, &available) {
            return Err(SetupError::MissingExtension {
                kind: ExtensionKind::Device,
                name: missing.to_string_lossy().into_owned(),
            });
        }

        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities);

        let extensions: Vec<*const c_char> = DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .during("vkCreateDevice")?;

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        log::info!("Logical device created (queue family {})", queue_family_index);

        Ok(Self {
            device,
            physical_device,
            queue,
            queue_family_index,
        })
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> ash::prelude::VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = self.wait_idle() {
            log::warn!("vkDeviceWaitIdle before teardown failed: {}", e);
        }
        unsafe {
            self.device.destroy_device(None);
        }
    }
}
