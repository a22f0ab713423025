// SPDX-License-Identifier: CEPL-1.0
//! Command pool, per-framebuffer command buffers, and the draw plan they are
//! recorded from.
//!
//! Recording is split in two: [`DrawPlan::build`] decides *what* goes into
//! each buffer as plain data, and [`CommandRecorder::record_all`] replays that
//! data into Vulkan. The plan is what the tests look at.
use crate::error::{Result, StageExt};
use crate::memory::TransferContext;
use ash::vk;
use tracing::debug;

/// Handles a single mesh draw needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshDraw {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

/// Render targets and pipeline state shared by every recorded buffer.
#[derive(Clone, Copy, Debug)]
pub struct PassTargets<'a> {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub extent: vk::Extent2D,
    pub framebuffers: &'a [vk::Framebuffer],
    /// One per framebuffer, same order (both follow swapchain image order).
    pub descriptor_sets: &'a [vk::DescriptorSet],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DrawCommand {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    },
    BindPipeline(vk::Pipeline),
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    BindDescriptorSet {
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    },
    DrawIndexed {
        index_count: u32,
    },
    EndRenderPass,
}

/// Command sequence for every framebuffer, in framebuffer order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawPlan {
    buffers: Vec<Vec<DrawCommand>>,
}

impl DrawPlan {
    pub fn build(targets: &PassTargets<'_>, meshes: &[MeshDraw], clear_color: [f32; 4]) -> Self {
        let buffers = targets
            .framebuffers
            .iter()
            .zip(targets.descriptor_sets)
            .map(|(&framebuffer, &set)| {
                let mut cmds = Vec::with_capacity(3 + meshes.len() * 4);
                cmds.push(DrawCommand::BeginRenderPass {
                    render_pass: targets.render_pass,
                    framebuffer,
                    extent: targets.extent,
                    clear_color,
                });
                cmds.push(DrawCommand::BindPipeline(targets.pipeline));
                for mesh in meshes {
                    cmds.push(DrawCommand::BindVertexBuffer(mesh.vertex_buffer));
                    cmds.push(DrawCommand::BindIndexBuffer(mesh.index_buffer));
                    cmds.push(DrawCommand::BindDescriptorSet {
                        layout: targets.pipeline_layout,
                        set,
                    });
                    cmds.push(DrawCommand::DrawIndexed {
                        index_count: mesh.index_count,
                    });
                }
                cmds.push(DrawCommand::EndRenderPass);
                cmds
            })
            .collect();
        DrawPlan { buffers }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn commands(&self, framebuffer_index: usize) -> &[DrawCommand] {
        self.buffers
            .get(framebuffer_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

unsafe fn replay(device: &ash::Device, cmd: vk::CommandBuffer, commands: &[DrawCommand]) {
    for command in commands {
        match *command {
            DrawCommand::BeginRenderPass {
                render_pass,
                framebuffer,
                extent,
                clear_color,
            } => {
                let clear = vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: clear_color,
                    },
                };
                let begin = vk::RenderPassBeginInfo {
                    s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                    render_pass,
                    framebuffer,
                    render_area: vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    },
                    clear_value_count: 1,
                    p_clear_values: &clear,
                    ..Default::default()
                };
                device.cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE);
            }
            DrawCommand::BindPipeline(pipeline) => {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            }
            DrawCommand::BindVertexBuffer(buffer) => {
                device.cmd_bind_vertex_buffers(cmd, 0, std::slice::from_ref(&buffer), &[0]);
            }
            DrawCommand::BindIndexBuffer(buffer) => {
                device.cmd_bind_index_buffer(cmd, buffer, 0, vk::IndexType::UINT32);
            }
            DrawCommand::BindDescriptorSet { layout, set } => {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    0,
                    std::slice::from_ref(&set),
                    &[],
                );
            }
            DrawCommand::DrawIndexed { index_count } => {
                device.cmd_draw_indexed(cmd, index_count, 1, 0, 0, 0);
            }
            DrawCommand::EndRenderPass => device.cmd_end_render_pass(cmd),
        }
    }
}

/// Graphics-family command pool and one primary buffer per framebuffer.
pub struct CommandRecorder {
    device: ash::Device,
    queue: vk::Queue,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandRecorder {
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        queue: vk::Queue,
        buffer_count: usize,
    ) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = device
            .create_command_pool(&pool_info, None)
            .stage("create command pool")?;
        let mut out = CommandRecorder {
            device: device.clone(),
            queue,
            pool,
            buffers: Vec::new(),
        };

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: buffer_count as u32,
            ..Default::default()
        };
        out.buffers = device
            .allocate_command_buffers(&alloc_info)
            .stage("allocate command buffers")?;
        Ok(out)
    }

    /// The graphics queue and this pool, for blocking uploads.
    pub fn transfer(&self) -> TransferContext {
        TransferContext {
            queue: self.queue,
            pool: self.pool,
        }
    }

    pub fn buffer(&self, image_index: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(image_index).copied()
    }

    /// Resets and re-records every buffer from `plan`.
    ///
    /// None of the buffers may be pending execution.
    pub unsafe fn record_all(&self, plan: &DrawPlan) -> Result<()> {
        let d = &self.device;
        for (i, &cmd) in self.buffers.iter().enumerate() {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .stage("reset command buffer")?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)
                .stage("begin command buffer")?;
            replay(d, cmd, plan.commands(i));
            d.end_command_buffer(cmd).stage("end command buffer")?;
        }
        debug!("recorded {} command buffers", self.buffers.len());
        Ok(())
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        // Buffers go with the pool.
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::Handle;

    fn handles<T: Handle>(base: u64, n: usize) -> Vec<T> {
        (0..n as u64).map(|i| T::from_raw(base + i)).collect()
    }

    fn quad(base: u64) -> MeshDraw {
        MeshDraw {
            vertex_buffer: vk::Buffer::from_raw(base),
            index_buffer: vk::Buffer::from_raw(base + 1),
            index_count: 6,
        }
    }

    #[test]
    fn two_quads_drawn_in_every_buffer_with_own_set() {
        let framebuffers: Vec<vk::Framebuffer> = handles(0x100, 3);
        let sets: Vec<vk::DescriptorSet> = handles(0x200, 3);
        let targets = PassTargets {
            render_pass: vk::RenderPass::from_raw(0x10),
            pipeline: vk::Pipeline::from_raw(0x20),
            pipeline_layout: vk::PipelineLayout::from_raw(0x30),
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            framebuffers: &framebuffers,
            descriptor_sets: &sets,
        };
        let meshes = [quad(0x1000), quad(0x2000)];
        let clear = [0.2, 0.1, 0.4, 1.0];
        let plan = DrawPlan::build(&targets, &meshes, clear);
        assert_eq!(plan.len(), 3);

        for i in 0..3 {
            let cmds = plan.commands(i);
            let set = DrawCommand::BindDescriptorSet {
                layout: targets.pipeline_layout,
                set: sets[i],
            };
            let expected = vec![
                DrawCommand::BeginRenderPass {
                    render_pass: targets.render_pass,
                    framebuffer: framebuffers[i],
                    extent: targets.extent,
                    clear_color: clear,
                },
                DrawCommand::BindPipeline(targets.pipeline),
                DrawCommand::BindVertexBuffer(meshes[0].vertex_buffer),
                DrawCommand::BindIndexBuffer(meshes[0].index_buffer),
                set,
                DrawCommand::DrawIndexed { index_count: 6 },
                DrawCommand::BindVertexBuffer(meshes[1].vertex_buffer),
                DrawCommand::BindIndexBuffer(meshes[1].index_buffer),
                set,
                DrawCommand::DrawIndexed { index_count: 6 },
                DrawCommand::EndRenderPass,
            ];
            assert_eq!(cmds, expected.as_slice());
        }
    }

    #[test]
    fn no_meshes_still_clears() {
        let framebuffers: Vec<vk::Framebuffer> = handles(1, 2);
        let sets: Vec<vk::DescriptorSet> = handles(10, 2);
        let targets = PassTargets {
            render_pass: vk::RenderPass::from_raw(5),
            pipeline: vk::Pipeline::from_raw(6),
            pipeline_layout: vk::PipelineLayout::from_raw(7),
            extent: vk::Extent2D::default(),
            framebuffers: &framebuffers,
            descriptor_sets: &sets,
        };
        let plan = DrawPlan::build(&targets, &[], [0.0; 4]);
        for i in 0..plan.len() {
            let cmds = plan.commands(i);
            assert_eq!(cmds.len(), 3);
            assert!(matches!(cmds[0], DrawCommand::BeginRenderPass { .. }));
            assert_eq!(cmds[2], DrawCommand::EndRenderPass);
        }
        assert!(plan.commands(7).is_empty());
    }
}
