// Synchronization primitives
//
// Frames never overlap, so one pair of semaphores is reused every frame
// and no fence is needed: the end-of-frame device idle wait retires both.

use super::error::{SetupError, VkResultExt};
use ash::vk;

pub struct FrameSync {
    /// Signalled by acquire, waited on by submit
    pub image_acquired: vk::Semaphore,
    /// Signalled by submit, waited on by present
    pub render_complete: vk::Semaphore,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self, SetupError> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();

        let image_acquired = unsafe { device.create_semaphore(&semaphore_info, None) }
            .during("vkCreateSemaphore")?;
        let render_complete = match unsafe { device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(result) => {
                unsafe { device.destroy_semaphore(image_acquired, None) };
                return Err(SetupError::Vulkan {
                    stage: "vkCreateSemaphore",
                    result,
                });
            }
        };

        Ok(Self {
            image_acquired,
            render_complete,
        })
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_acquired, None);
        device.destroy_semaphore(self.render_complete, None);
    }
}
