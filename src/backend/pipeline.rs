// Graphics pipeline creation
//
// A single fixed pipeline: no vertex input (the vertex shader generates the
// triangle), dynamic viewport/scissor, back-face culling with clockwise
// front faces, opaque colour writes. The layout has no descriptor sets and
// no push constants.

use super::device::LogicalDevice;
use super::error::{SetupError, VkResultExt};
use super::shader::create_shader_module;
use ash::vk;

const ENTRY_POINT: &std::ffi::CStr = c"main";

const DYNAMIC_STATES: [vk::DynamicState; 2] =
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// Render pass handle plus the layout and pipeline built against it
pub struct PipelineResources {
    /// Borrowed from the swapchain, which owns and destroys it
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl PipelineResources {
    pub fn new(
        device: &LogicalDevice,
        render_pass: vk::RenderPass,
        vertex_shader: &[u8],
        fragment_shader: &[u8],
    ) -> Result<Self, SetupError> {
        let device = &device.device;

        let vert = create_shader_module(device, "vertex", vertex_shader)?;
        let frag = match create_shader_module(device, "fragment", fragment_shader) {
            Ok(frag) => frag,
            Err(e) => {
                unsafe { device.destroy_shader_module(vert, None) };
                return Err(e);
            }
        };

        let mut resources = Self {
            render_pass,
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
        };
        let built = resources.build(device, vert, frag);

        // Modules are only needed while the pipeline is compiled.
        unsafe {
            device.destroy_shader_module(vert, None);
            device.destroy_shader_module(frag, None);
        }

        match built {
            Ok(()) => {
                log::info!("Graphics pipeline created");
                Ok(resources)
            }
            Err(e) => {
                unsafe { resources.destroy(device) };
                Err(e)
            }
        }
    }

    fn build(
        &mut self,
        device: &ash::Device,
        vert: vk::ShaderModule,
        frag: vk::ShaderModule,
    ) -> Result<(), SetupError> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert)
                .name(ENTRY_POINT),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag)
                .name(ENTRY_POINT),
        ];

        // No bindings, no attributes
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Counts only; the rectangles are set per frame.
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = rasterization_state();

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [color_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

        let layout_info = vk::PipelineLayoutCreateInfo::default();
        self.layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .during("vkCreatePipelineLayout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(self.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| e)
        .during("vkCreateGraphicsPipelines")?;
        self.pipeline = pipelines[0];

        Ok(())
    }

    /// Does not touch the render pass; the swapchain owns it.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
        self.pipeline = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
    }
}

fn rasterization_state() -> vk::PipelineRasterizationStateCreateInfo<'static> {
    vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false)
}

fn color_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn culls_back_faces_wound_clockwise() {
        let raster = rasterization_state();
        assert_eq!(raster.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(raster.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(raster.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(raster.line_width, 1.0);
    }

    #[test]
    fn blending_is_off_with_all_channels_written() {
        let blend = color_blend_attachment();
        assert_eq!(blend.blend_enable, vk::FALSE);
        assert_eq!(blend.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn viewport_and_scissor_are_dynamic() {
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::VIEWPORT));
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::SCISSOR));
    }
}
