// SPDX-License-Identifier: CEPL-1.0
use crate::error::{RenderError, Result, StageExt};
use ash::util::read_spv;
use ash::vk;
use ember_render::Vertex;
use std::path::Path;
use tracing::{debug, info};

/// Reads a SPIR-V blob (magic number and word alignment are checked).
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let shader_err = |source| RenderError::ShaderLoadFailed {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::open(path).map_err(shader_err)?;
    read_spv(&mut file).map_err(shader_err)
}

/// Shader module destroyed when it goes out of scope.
struct ShaderModule<'a> {
    device: &'a ash::Device,
    handle: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    unsafe fn from_file(device: &'a ash::Device, path: &Path) -> Result<Self> {
        let code = load_spirv(path)?;
        let info = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: code.len() * 4,
            p_code: code.as_ptr(),
            ..Default::default()
        };
        let handle = device
            .create_shader_module(&info, None)
            .stage("create shader module")?;
        debug!("shader module from {} ({} words)", path.display(), code.len());
        Ok(ShaderModule { device, handle })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.handle, None) };
    }
}

pub struct RenderPass {
    device: ash::Device,
    handle: vk::RenderPass,
}

impl RenderPass {
    /// Single color attachment: cleared on load, stored, handed to present.
    pub unsafe fn new(device: &ash::Device, color_format: vk::Format) -> Result<Self> {
        let color = vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        };
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            ..Default::default()
        };
        let dependencies = subpass_dependencies();
        let info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color,
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: dependencies.len() as u32,
            p_dependencies: dependencies.as_ptr(),
            ..Default::default()
        };
        let handle = device
            .create_render_pass(&info, None)
            .stage("create render pass")?;
        Ok(RenderPass {
            device: device.clone(),
            handle,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.handle, None) };
    }
}

/// Layout transitions around the subpass: wait for the presentation engine's
/// reads before writing color, and finish writing before it reads again.
fn subpass_dependencies() -> [vk::SubpassDependency; 2] {
    let color_rw =
        vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::MEMORY_READ,
            dst_access_mask: color_rw,
            dependency_flags: vk::DependencyFlags::empty(),
        },
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            src_access_mask: color_rw,
            dst_access_mask: vk::AccessFlags::MEMORY_READ,
            dependency_flags: vk::DependencyFlags::empty(),
        },
    ]
}

/// One framebuffer per swapchain image view.
pub struct Framebuffers {
    device: ash::Device,
    handles: Vec<vk::Framebuffer>,
}

impl Framebuffers {
    pub unsafe fn new(
        device: &ash::Device,
        render_pass: &RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut out = Framebuffers {
            device: device.clone(),
            handles: Vec::with_capacity(views.len()),
        };
        for view in views {
            let info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: render_pass.handle(),
                attachment_count: 1,
                p_attachments: view,
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            out.handles.push(
                device
                    .create_framebuffer(&info, None)
                    .stage("create framebuffer")?,
            );
        }
        Ok(out)
    }

    pub fn handles(&self) -> &[vk::Framebuffer] {
        &self.handles
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for &fb in &self.handles {
                self.device.destroy_framebuffer(fb, None);
            }
        }
    }
}

/// Where the graphics pipeline gets its shaders and fixed-function inputs.
pub struct PipelineDesc<'a> {
    pub vertex_shader: &'a Path,
    pub fragment_shader: &'a Path,
    pub extent: vk::Extent2D,
    pub set_layout: vk::DescriptorSetLayout,
}

fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 2] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, pos) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, color) as u32,
        },
    ]
}

/// Straight alpha over the destination; alpha itself is taken from the source.
fn alpha_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::RGBA,
    }
}

pub struct GraphicsPipeline {
    device: ash::Device,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    pub unsafe fn new(
        device: &ash::Device,
        render_pass: &RenderPass,
        desc: &PipelineDesc<'_>,
    ) -> Result<Self> {
        // Modules only need to outlive pipeline creation.
        let vs = ShaderModule::from_file(device, desc.vertex_shader)?;
        let fs = ShaderModule::from_file(device, desc.fragment_shader)?;
        let entry = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs.handle,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs.handle,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        let binding = vertex_binding();
        let attributes = vertex_attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &binding,
            vertex_attribute_description_count: attributes.len() as u32,
            p_vertex_attribute_descriptions: attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart_enable: vk::FALSE,
            ..Default::default()
        };

        // Fixed-size swapchain, so viewport and scissor are baked in.
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: desc.extent.width as f32,
            height: desc.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: desc.extent,
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            p_viewports: &viewport,
            scissor_count: 1,
            p_scissors: &scissor,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            depth_clamp_enable: vk::FALSE,
            rasterizer_discard_enable: vk::FALSE,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias_enable: vk::FALSE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            sample_shading_enable: vk::FALSE,
            ..Default::default()
        };
        let blend_attachment = alpha_blend_attachment();
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            logic_op_enable: vk::FALSE,
            attachment_count: 1,
            p_attachments: &blend_attachment,
            ..Default::default()
        };

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &desc.set_layout,
            push_constant_range_count: 0,
            ..Default::default()
        };
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .stage("create pipeline layout")?;
        let mut out = GraphicsPipeline {
            device: device.clone(),
            layout,
            pipeline: vk::Pipeline::null(),
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            layout,
            render_pass: render_pass.handle(),
            subpass: 0,
            base_pipeline_handle: vk::Pipeline::null(),
            base_pipeline_index: -1,
            ..Default::default()
        };
        let pipelines = device
            .create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
            .map_err(|(_, result)| RenderError::failed("create graphics pipeline", result))?;
        out.pipeline = pipelines[0];
        info!(
            "graphics pipeline ready ({}x{}, alpha blend, back-face cull)",
            desc.extent.width, desc.extent.height
        );
        Ok(out)
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.device.destroy_pipeline(self.pipeline, None);
            }
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ember-{}-{name}", std::process::id()))
    }

    #[test]
    fn missing_shader_reports_its_path() {
        let path = Path::new("definitely/not/here/vert.spv");
        match load_spirv(path) {
            Err(RenderError::ShaderLoadFailed { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected ShaderLoadFailed, got {other:?}"),
        }
    }

    #[test]
    fn non_spirv_bytes_are_rejected() {
        let path = temp_path("garbage.spv");
        std::fs::File::create(&path)
            .and_then(|mut f| f.write_all(b"not a shader"))
            .unwrap();
        let err = load_spirv(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, RenderError::ShaderLoadFailed { .. }));
    }

    #[test]
    fn valid_header_is_read_as_words() {
        let path = temp_path("min.spv");
        let words: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();
        let code = load_spirv(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(code, words);
    }

    #[test]
    fn vertex_layout_matches_vertex_struct() {
        let b = vertex_binding();
        assert_eq!(b.stride, 24);
        assert_eq!(b.input_rate, vk::VertexInputRate::VERTEX);
        let a = vertex_attributes();
        assert_eq!((a[0].location, a[0].offset), (0, 0));
        assert_eq!((a[1].location, a[1].offset), (1, 12));
        assert!(a.iter().all(|x| x.format == vk::Format::R32G32B32_SFLOAT));
    }

    #[test]
    fn blending_is_source_alpha_over() {
        let s = alpha_blend_attachment();
        assert_eq!(s.blend_enable, vk::TRUE);
        assert_eq!(s.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(s.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(s.src_alpha_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(s.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
    }

    #[test]
    fn dependencies_bracket_the_subpass() {
        let [inbound, outbound] = subpass_dependencies();
        assert_eq!(inbound.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(inbound.dst_subpass, 0);
        assert_eq!(inbound.dst_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(outbound.src_subpass, 0);
        assert_eq!(outbound.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(outbound.dst_access_mask, vk::AccessFlags::MEMORY_READ);
    }
}
