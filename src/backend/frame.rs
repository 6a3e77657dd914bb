// Per-frame submission loop
//
// Idle -> Acquire -> Record -> Submit -> Present -> Synchronize -> Idle
//
// Frames are strictly serialized: after presenting, the whole device is
// waited on before the frame's command buffer is freed. That keeps one
// semaphore pair and one transient command buffer sufficient.

use super::device::LogicalDevice;
use super::error::{FrameError, FrameStage, SetupError, VkResultExt};
use super::pipeline::PipelineResources;
use super::swapchain::Swapchain;
use super::sync::FrameSync;
use ash::prelude::VkResult;
use ash::vk;
use std::time::Duration;

/// How a successfully presented frame went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Presented, but the swapchain no longer matches the surface exactly
    Suboptimal,
}

pub struct FrameRenderer {
    command_pool: vk::CommandPool,
    sync: FrameSync,
    clear_color: [f32; 4],
    acquire_timeout: u64,
}

impl FrameRenderer {
    /// `acquire_timeout` of `None` waits for a presentable image forever
    pub fn new(
        device: &LogicalDevice,
        clear_color: [f32; 4],
        acquire_timeout: Option<Duration>,
    ) -> Result<Self, SetupError> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_family_index)
            // TRANSIENT: one short-lived buffer per frame
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .during("vkCreateCommandPool")?;

        let sync = match FrameSync::new(&device.device) {
            Ok(sync) => sync,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                return Err(e);
            }
        };

        Ok(Self {
            command_pool,
            sync,
            clear_color,
            acquire_timeout: timeout_nanos(acquire_timeout),
        })
    }

    /// Draw and present one frame, returning only once the device is idle
    pub fn render_frame(
        &self,
        device: &LogicalDevice,
        swapchain: &Swapchain,
        pipeline: &PipelineResources,
    ) -> Result<FrameStatus, FrameError> {
        let (image_index, acquire_suboptimal) = swapchain
            .acquire_next_image(self.acquire_timeout, self.sync.image_acquired)
            .map_err(|e| FrameError::from_vk(FrameStage::Acquire, e))?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| FrameError::from_vk(FrameStage::Record, e))?[0];

        let presented = self.record_submit_present(device, swapchain, pipeline, cmd, image_index);

        let present_suboptimal = retire(
            presented,
            || unsafe { device.device.device_wait_idle() },
            || unsafe { device.device.free_command_buffers(self.command_pool, &[cmd]) },
        )?;

        Ok(frame_status(acquire_suboptimal, present_suboptimal))
    }

    fn record_submit_present(
        &self,
        device: &LogicalDevice,
        swapchain: &Swapchain,
        pipeline: &PipelineResources,
        cmd: vk::CommandBuffer,
        image_index: u32,
    ) -> Result<bool, FrameError> {
        let framebuffer = framebuffer_for(&swapchain.framebuffers, image_index)?;

        self.record(&device.device, cmd, framebuffer, swapchain.extent, pipeline)
            .map_err(|e| FrameError::from_vk(FrameStage::Record, e))?;

        let wait_semaphores = [self.sync.image_acquired];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_complete];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .device
                .queue_submit(device.queue, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| FrameError::from_vk(FrameStage::Submit, e))?;

        swapchain
            .present(device.queue, image_index, &signal_semaphores)
            .map_err(|e| FrameError::from_vk(FrameStage::Present, e))
    }

    fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        pipeline: &PipelineResources,
    ) -> VkResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];
        let render_area = full_scissor(extent);

        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(pipeline.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        unsafe {
            device.begin_command_buffer(cmd, &begin_info)?;
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cmd, 0, &[full_viewport(extent)]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
            device.cmd_draw(cmd, 3, 1, 0, 0);
            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)
        }
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        self.sync.destroy(device);
        // Also frees any command buffer still allocated from it
        device.destroy_command_pool(self.command_pool, None);
    }
}

/// The framebuffer bound to an acquired image
fn framebuffer_for(
    framebuffers: &[vk::Framebuffer],
    image_index: u32,
) -> Result<vk::Framebuffer, FrameError> {
    framebuffers
        .get(image_index as usize)
        .copied()
        .ok_or(FrameError::Vulkan {
            stage: FrameStage::Record,
            result: vk::Result::ERROR_UNKNOWN,
        })
}

/// Wait for the device, then free the frame's command buffer
///
/// The wait happens even after a failure so the buffer is never freed while
/// pending. An earlier record/submit/present error wins over a wait error.
fn retire<W, F>(
    presented: Result<bool, FrameError>,
    wait_idle: W,
    free: F,
) -> Result<bool, FrameError>
where
    W: FnOnce() -> VkResult<()>,
    F: FnOnce(),
{
    let idle = wait_idle().map_err(|e| FrameError::from_vk(FrameStage::Synchronize, e));
    free();

    let suboptimal = presented?;
    idle?;
    Ok(suboptimal)
}

fn frame_status(acquire_suboptimal: bool, present_suboptimal: bool) -> FrameStatus {
    if acquire_suboptimal || present_suboptimal {
        FrameStatus::Suboptimal
    } else {
        FrameStatus::Presented
    }
}

fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

fn timeout_nanos(timeout: Option<Duration>) -> u64 {
    timeout
        .map(|t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(u64::MAX)
}
