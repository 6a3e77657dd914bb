// Swapchain - Window presentation
//
// Negotiates format, image count and extent with the surface, then builds
// the image chain, one view per image, the render pass and one framebuffer
// per view. Created once; there is no recreation path.

use super::context::PresentationContext;
use super::device::LogicalDevice;
use super::error::{SetupError, VkResultExt};
use ash::prelude::VkResult;
use ash::vk;

/// Preferred surface format: 8-bit BGRA, sRGB encoded
pub const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

/// Anything that can report the current back-buffer size in pixels
pub trait SurfaceExtent {
    fn pixel_extent(&self) -> vk::Extent2D;
}

impl SurfaceExtent for vk::Extent2D {
    fn pixel_extent(&self) -> vk::Extent2D {
        *self
    }
}

pub struct Swapchain {
    pub loader: ash::khr::swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
    pub fn new(
        context: &PresentationContext,
        device: &LogicalDevice,
        window: &dyn SurfaceExtent,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self, SetupError> {
        let mut chain = Self {
            loader: ash::khr::swapchain::Device::new(&context.instance, &device.device),
            swapchain: vk::SwapchainKHR::null(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            image_views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
        };

        match chain.build(context, device, window, preferred_present_mode) {
            Ok(()) => Ok(chain),
            Err(e) => {
                unsafe { chain.destroy(&device.device) };
                Err(e)
            }
        }
    }

    fn build(
        &mut self,
        context: &PresentationContext,
        device: &LogicalDevice,
        window: &dyn SurfaceExtent,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<(), SetupError> {
        let surface = context.surface();
        let loader = &context.surface_loader;
        let physical_device = device.physical_device;

        let formats =
            unsafe { loader.get_physical_device_surface_formats(physical_device, surface) }
                .during("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        let caps =
            unsafe { loader.get_physical_device_surface_capabilities(physical_device, surface) }
                .during("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let present_modes =
            unsafe { loader.get_physical_device_surface_present_modes(physical_device, surface) }
                .during("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

        self.format = choose_surface_format(&formats)?;
        self.extent = choose_extent(&caps, window.pixel_extent());
        let image_count = choose_image_count(&caps);
        let present_mode = choose_present_mode(&present_modes, preferred_present_mode);

        log::debug!(
            "Surface caps: images {}..{}, extent {:?}..{:?}, current {:?}",
            caps.min_image_count,
            caps.max_image_count,
            caps.min_image_extent,
            caps.max_image_extent,
            caps.current_extent
        );
        log::debug!("Present mode: {:?}", present_mode);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        self.swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }
            .during("vkCreateSwapchainKHR")?;

        self.images = unsafe { self.loader.get_swapchain_images(self.swapchain) }
            .during("vkGetSwapchainImagesKHR")?;
        check_image_count(self.images.len(), &caps)?;

        log::info!(
            "Created swapchain: {:?} {}x{}, {} images",
            self.format.format,
            self.extent.width,
            self.extent.height,
            self.images.len()
        );

        for &image in &self.images {
            let view = create_image_view(&device.device, image, self.format.format)?;
            self.image_views.push(view);
        }

        self.render_pass = create_render_pass(&device.device, self.format.format)?;

        for &view in &self.image_views {
            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
                .during("vkCreateFramebuffer")?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout, semaphore, vk::Fence::null())
        }
    }

    /// Present rendered image to screen. `Ok(true)` means suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> VkResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Destroy framebuffers, render pass, views and the swapchain, in that order.
    /// Null handles from a partial build are skipped by the driver.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer, None);
        }
        device.destroy_render_pass(self.render_pass, None);
        self.render_pass = vk::RenderPass::null();
        for view in self.image_views.drain(..) {
            device.destroy_image_view(view, None);
        }
        self.images.clear();
        self.loader.destroy_swapchain(self.swapchain, None);
        self.swapchain = vk::SwapchainKHR::null();
    }
}

fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView, SetupError> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }.during("vkCreateImageView")
}

/// Single colour attachment, cleared on load and left ready to present
fn create_render_pass(
    device: &ash::Device,
    format: vk::Format,
) -> Result<vk::RenderPass, SetupError> {
    let color_attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_attachment_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let color_refs = [color_attachment_ref];
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);

    // The layout transition must wait for the acquire semaphore's stage.
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None) }.during("vkCreateRenderPass")
}

/// Preferred BGRA sRGB format if offered, otherwise the first supported entry
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, SetupError> {
    formats
        .iter()
        .find(|f| f.format == PREFERRED_FORMAT)
        .or_else(|| formats.first())
        .copied()
        .ok_or(SetupError::NoSurfaceFormats)
}

/// One more than the minimum, capped by the maximum (0 means unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

/// The surface's fixed extent when it has one, else the window size clamped
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// FIFO is always available, so it is the fallback
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        if preferred != vk::PresentModeKHR::FIFO {
            log::warn!("Present mode {:?} unsupported, using FIFO", preferred);
        }
        vk::PresentModeKHR::FIFO
    }
}

fn check_image_count(count: usize, caps: &vk::SurfaceCapabilitiesKHR) -> Result<(), SetupError> {
    if caps.max_image_count > 0 && count > caps.max_image_count as usize {
        return Err(SetupError::ImageCountExceeded {
            count,
            max: caps.max_image_count,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_bgra_srgb_when_present() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn falls_back_to_first_supported_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(matches!(
            choose_surface_format(&[]),
            Err(SetupError::NoSurfaceFormats)
        ));
    }

    #[test]
    fn image_count_is_min_plus_one_within_bounds() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
        assert_eq!(choose_image_count(&caps(1, 1)), 1);
    }

    #[test]
    fn fixed_surface_extent_wins_over_window_size() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        let extent = choose_extent(
            &c,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!(
            extent,
            vk::Extent2D {
                width: 1024,
                height: 768
            }
        );
    }

    #[test]
    fn window_size_is_clamped_when_surface_extent_is_free() {
        let c = caps(2, 3);
        let window = vk::Extent2D {
            width: 8000,
            height: 0,
        };
        assert_eq!(
            choose_extent(&c, window),
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );
    }

    #[test]
    fn negotiated_values_stay_within_capabilities() {
        for (min, max) in [(1, 0), (2, 0), (2, 3), (3, 8), (4, 4)] {
            let c = caps(min, max);
            let count = choose_image_count(&c);
            assert!(count >= min);
            if max > 0 {
                assert!(count <= max);
            }
            for width in [1, 640, 800, 4096] {
                for height in [1, 480, 600, 4096] {
                    let window = vk::Extent2D { width, height };
                    assert_eq!(window.pixel_extent(), window);
                    assert_eq!(choose_extent(&c, window), window);
                }
            }
        }
    }

    #[test]
    fn image_count_above_surface_max_is_rejected() {
        assert!(check_image_count(3, &caps(2, 3)).is_ok());
        assert!(check_image_count(9, &caps(2, 0)).is_ok());
        assert!(matches!(
            check_image_count(4, &caps(2, 3)),
            Err(SetupError::ImageCountExceeded { count: 4, max: 3 })
        ));
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }
}
