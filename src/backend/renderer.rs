// Renderer - startup, per-frame entry point and ordered teardown
//
// Startup order: context -> surface -> device selection -> logical device
// -> swapchain (+ render pass, framebuffers) -> pipeline -> frame objects.
// Teardown runs the same list backwards.

use super::context::PresentationContext;
use super::debug::MessageSink;
use super::device::LogicalDevice;
use super::error::{FrameError, SetupError};
use super::frame::{FrameRenderer, FrameStatus};
use super::pipeline::PipelineResources;
use super::selector::select_device;
use super::swapchain::{SurfaceExtent, Swapchain};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;
use std::time::Duration;

/// Everything the renderer needs from its collaborators at startup
pub struct RendererDesc<'a> {
    pub app_name: &'a str,
    /// Instance extensions the windowing layer needs for surface creation
    pub required_extensions: &'a [&'a CStr],
    pub enable_validation: bool,
    pub message_sink: Box<dyn MessageSink>,
    pub present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
    pub acquire_timeout: Option<Duration>,
    pub vertex_shader: &'a [u8],
    pub fragment_shader: &'a [u8],
}

pub struct Renderer {
    frame: FrameRenderer,
    pipeline: PipelineResources,
    swapchain: Swapchain,
    // Dropped after the manual teardown in `Drop`, device before context.
    device: LogicalDevice,
    _context: PresentationContext,
    frames_presented: u64,
}

impl Renderer {
    pub fn new<W>(window: &W, desc: RendererDesc<'_>) -> Result<Self, SetupError>
    where
        W: HasWindowHandle + HasDisplayHandle + SurfaceExtent,
    {
        let mut context = PresentationContext::initialize(
            desc.app_name,
            desc.required_extensions,
            desc.enable_validation,
            desc.message_sink,
        )?;
        context.create_surface(window)?;

        let candidate = select_device(&context)?;
        let device = LogicalDevice::new(&context, candidate)?;

        let mut swapchain = Swapchain::new(&context, &device, window, desc.present_mode)?;

        let mut pipeline = match PipelineResources::new(
            &device,
            swapchain.render_pass,
            desc.vertex_shader,
            desc.fragment_shader,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { swapchain.destroy(&device.device) };
                return Err(e);
            }
        };

        let frame = match FrameRenderer::new(&device, desc.clear_color, desc.acquire_timeout) {
            Ok(frame) => frame,
            Err(e) => {
                unsafe {
                    pipeline.destroy(&device.device);
                    swapchain.destroy(&device.device);
                }
                return Err(e);
            }
        };

        log::info!("Renderer ready");

        Ok(Self {
            frame,
            pipeline,
            swapchain,
            device,
            _context: context,
            frames_presented: 0,
        })
    }

    /// Acquire, record, submit and present one frame
    pub fn render_frame(&mut self) -> Result<FrameStatus, FrameError> {
        let status = self
            .frame
            .render_frame(&self.device, &self.swapchain, &self.pipeline)?;
        self.frames_presented += 1;
        Ok(status)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn wait_idle(&self) {
        if let Err(e) = self.device.wait_idle() {
            log::warn!("vkDeviceWaitIdle failed: {}", e);
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!(
            "Cleaning up Vulkan resources after {} frames...",
            self.frames_presented
        );

        self.wait_idle();

        unsafe {
            let device = &self.device.device;
            self.frame.destroy(device);
            self.pipeline.destroy(device);
            self.swapchain.destroy(device);
        }
        // `device` then `_context` drop next, in field order.
    }
}
