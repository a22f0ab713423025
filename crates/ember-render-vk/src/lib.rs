// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend for [`ember_render::Renderer`].
//!
//! Everything lives in [`VkRenderer`]; each piece is a scoped handle that
//! releases its Vulkan objects on drop, so field order below is teardown
//! order.
pub mod commands;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod instance;
pub mod memory;
pub mod mesh;
pub mod pipeline;
pub mod swapchain;
pub mod sync;

pub use error::{RenderError, Result};

use anyhow::Context;
use commands::{CommandRecorder, DrawPlan, MeshDraw, PassTargets};
use descriptors::UniformSet;
use device::LogicalDevice;
use ember_math::glam::Mat4;
use ember_render::{MeshData, MeshId, RenderSize, Renderer, RendererDesc, Transform};
use instance::{InstanceContext, Surface};
use memory::Allocator;
use mesh::Mesh;
use pipeline::{Framebuffers, GraphicsPipeline, PipelineDesc, RenderPass};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;
use swapchain::Swapchain;
use sync::FrameSynchronizer;
use tracing::{debug, info, warn};

/// Directory holding `mesh.vert.spv` and `mesh.frag.spv`, as compiled by
/// the build script.
pub fn default_shader_dir() -> PathBuf {
    PathBuf::from(env!("EMBER_SHADER_DIR"))
}

/// Vertex and fragment shader paths inside [`default_shader_dir`].
pub fn default_shader_paths() -> (PathBuf, PathBuf) {
    let dir = default_shader_dir();
    (dir.join("mesh.vert.spv"), dir.join("mesh.frag.spv"))
}

pub struct VkRenderer {
    sync: FrameSynchronizer,
    commands: CommandRecorder,
    pipeline: GraphicsPipeline,
    framebuffers: Framebuffers,
    render_pass: RenderPass,
    uniforms: UniformSet,
    meshes: Vec<Mesh>,
    swapchain: Swapchain,
    allocator: Allocator,
    device: LogicalDevice,
    _surface: Surface,
    _instance: InstanceContext,

    transform: Transform,
    clear_color: [f32; 4],
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    desc: &RendererDesc,
) -> Result<VkRenderer> {
    // 1) Instance, surface, device
    let instance = InstanceContext::new(display)?;
    let surface = Surface::new(&instance, window, display)?;
    let (phys, profile) = device::pick_physical_device(&instance, &surface)?;
    let device = LogicalDevice::new(&instance, phys, profile.queue_families)?;
    let allocator = Allocator::new(instance.raw(), phys, device.raw());

    // 2) Presentation targets
    let swapchain = Swapchain::new(instance.raw(), &device, &surface, &profile, size)?;
    let extent = swapchain.extent();
    let image_count = swapchain.image_count();

    // 3) Per-image uniforms and the pipeline that reads them
    let uniforms = UniformSet::new(&allocator, image_count)?;
    let render_pass = RenderPass::new(device.raw(), swapchain.format())?;
    let framebuffers = Framebuffers::new(
        device.raw(),
        &render_pass,
        swapchain.image_views(),
        extent,
    )?;
    let pipeline = GraphicsPipeline::new(
        device.raw(),
        &render_pass,
        &PipelineDesc {
            vertex_shader: &desc.vertex_shader,
            fragment_shader: &desc.fragment_shader,
            extent,
            set_layout: uniforms.layout(),
        },
    )?;

    // 4) Commands and frame pacing
    let commands = CommandRecorder::new(
        device.raw(),
        device.graphics_family(),
        device.graphics_queue(),
        framebuffers.handles().len(),
    )?;
    let sync = FrameSynchronizer::new(device.raw())?;

    let aspect = ember_math::aspect_ratio(extent.width, extent.height);
    let (projection, view) = desc.camera.matrices(aspect);
    let transform = Transform {
        projection,
        view,
        model: Mat4::IDENTITY,
    };

    let r = VkRenderer {
        sync,
        commands,
        pipeline,
        framebuffers,
        render_pass,
        uniforms,
        meshes: Vec::new(),
        swapchain,
        allocator,
        device,
        _surface: surface,
        _instance: instance,
        transform,
        clear_color: desc.clear_color,
    };
    r.record_commands()?;
    info!(
        "vulkan renderer ready on '{}' ({}x{}, {} images)",
        profile.name, extent.width, extent.height, image_count
    );
    Ok(r)
}

impl VkRenderer {
    /// Rebuilds the draw plan from the current meshes and clear color and
    /// records it into every command buffer. The device must be idle.
    unsafe fn record_commands(&self) -> Result<()> {
        let draws: Vec<MeshDraw> = self
            .meshes
            .iter()
            .map(|m| MeshDraw {
                vertex_buffer: m.vertex_buffer(),
                index_buffer: m.index_buffer(),
                index_count: m.index_count(),
            })
            .collect();
        let targets = PassTargets {
            render_pass: self.render_pass.handle(),
            pipeline: self.pipeline.handle(),
            pipeline_layout: self.pipeline.layout(),
            extent: self.swapchain.extent(),
            framebuffers: self.framebuffers.handles(),
            descriptor_sets: self.uniforms.sets(),
        };
        let plan = DrawPlan::build(&targets, &draws, self.clear_color);
        self.commands.record_all(&plan)
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        desc: &RendererDesc,
    ) -> anyhow::Result<Self> {
        let renderer = unsafe { build_renderer(window, display, size, desc) };
        renderer.context("initialise Vulkan renderer")
    }

    fn load_mesh(&mut self, mesh: &MeshData) -> anyhow::Result<MeshId> {
        unsafe {
            // Command buffers and staging copies share the graphics queue.
            self.device.wait_idle()?;
            let uploaded = Mesh::new(
                &self.allocator,
                self.commands.transfer(),
                &mesh.vertices,
                &mesh.indices,
            )
            .context("upload mesh")?;
            self.meshes.push(uploaded);
            self.record_commands().context("re-record after mesh load")?;
        }
        let id = MeshId(self.meshes.len() - 1);
        debug!("mesh {} registered", id.0);
        Ok(id)
    }

    fn update_model(&mut self, model: Mat4) {
        self.transform.model = model;
    }

    fn draw(&mut self) -> anyhow::Result<()> {
        let transform = self.transform;
        let uniforms = &self.uniforms;
        let drawn = unsafe {
            self.sync.draw_frame(
                &self.device,
                &self.swapchain,
                &self.commands,
                |image| uniforms.update_uniform_buffer(image, &transform),
            )
        };
        drawn.context("draw frame")
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) -> anyhow::Result<()> {
        self.clear_color = rgba;
        unsafe {
            self.device.wait_idle()?;
            self.record_commands()?;
        }
        Ok(())
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.wait_idle() {
                warn!("teardown without idle device: {e}");
            }
            for mesh in &mut self.meshes {
                mesh.destroy_buffers();
            }
        }
        debug!("vulkan renderer released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_paths_share_a_directory() {
        let (vert, frag) = default_shader_paths();
        assert_eq!(vert.parent(), frag.parent());
        assert_eq!(vert.file_name().unwrap(), "mesh.vert.spv");
        assert_eq!(frag.file_name().unwrap(), "mesh.frag.spv");
    }

    #[test]
    fn default_shaders_are_built_and_loadable() {
        let (vert, frag) = default_shader_paths();
        assert!(vert.is_absolute());
        for path in [vert, frag] {
            let code = pipeline::load_spirv(&path).unwrap();
            assert_eq!(code[0], 0x0723_0203);
        }
    }

    #[test]
    fn initial_transform_flips_clip_y() {
        let camera = ember_render::CameraDesc::default();
        let (projection, _) = camera.matrices(ember_math::aspect_ratio(800, 600));
        assert!(projection.y_axis.y < 0.0);
        assert!(projection.x_axis.x > 0.0);
    }
}
