// SPDX-License-Identifier: CEPL-1.0
//! Per-image transform uniforms and the descriptor sets that expose them to
//! the vertex shader at set 0, binding 0.
use crate::error::{RenderError, Result, StageExt};
use crate::memory::{Allocator, GpuBuffer};
use ash::vk;
use ember_render::Transform;
use tracing::debug;

pub const TRANSFORM_SIZE: vk::DeviceSize = std::mem::size_of::<Transform>() as vk::DeviceSize;

/// The bytes the vertex shader sees for `transform`.
pub fn transform_bytes(transform: &Transform) -> &[u8] {
    bytemuck::bytes_of(transform)
}

pub unsafe fn create_transform_set_layout(
    device: &ash::Device,
) -> Result<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::VERTEX,
        ..Default::default()
    };
    let info = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: 1,
        p_bindings: &binding,
        ..Default::default()
    };
    device
        .create_descriptor_set_layout(&info, None)
        .stage("create descriptor set layout")
}

/// Layout, pool, and one (buffer, set) pair per swapchain image.
pub struct UniformSet {
    device: ash::Device,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    buffers: Vec<GpuBuffer>,
    sets: Vec<vk::DescriptorSet>,
}

impl UniformSet {
    pub unsafe fn new(alloc: &Allocator, image_count: usize) -> Result<Self> {
        let device = alloc.device().clone();
        let layout = create_transform_set_layout(&device)?;
        let mut out = UniformSet {
            device,
            layout,
            pool: vk::DescriptorPool::null(),
            buffers: Vec::with_capacity(image_count),
            sets: Vec::new(),
        };

        for _ in 0..image_count {
            out.buffers.push(
                alloc.create_host_visible(TRANSFORM_SIZE, vk::BufferUsageFlags::UNIFORM_BUFFER)?,
            );
        }

        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: image_count as u32,
        };
        let pool_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: image_count as u32,
            pool_size_count: 1,
            p_pool_sizes: &pool_size,
            ..Default::default()
        };
        out.pool = out
            .device
            .create_descriptor_pool(&pool_info, None)
            .stage("create descriptor pool")?;

        let layouts = vec![layout; image_count];
        let alloc_info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: out.pool,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        out.sets = out
            .device
            .allocate_descriptor_sets(&alloc_info)
            .stage("allocate descriptor sets")?;

        for (set, buffer) in out.sets.iter().zip(&out.buffers) {
            let info = vk::DescriptorBufferInfo {
                buffer: buffer.handle(),
                offset: 0,
                range: TRANSFORM_SIZE,
            };
            let write = vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: *set,
                dst_binding: 0,
                dst_array_element: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &info,
                ..Default::default()
            };
            out.device
                .update_descriptor_sets(std::slice::from_ref(&write), &[]);
        }
        debug!("{} transform uniform sets ready", out.sets.len());
        Ok(out)
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn sets(&self) -> &[vk::DescriptorSet] {
        &self.sets
    }

    /// Copies `transform` into the buffer of `image_index`.
    pub unsafe fn update_uniform_buffer(
        &self,
        image_index: usize,
        transform: &Transform,
    ) -> Result<()> {
        let buffer = self.buffers.get(image_index).ok_or(RenderError::failed(
            "update uniform buffer",
            vk::Result::ERROR_UNKNOWN,
        ))?;
        buffer.write(transform_bytes(transform))
    }
}

impl Drop for UniformSet {
    fn drop(&mut self) {
        unsafe {
            // Sets are freed with the pool.
            if self.pool != vk::DescriptorPool::null() {
                self.device.destroy_descriptor_pool(self.pool, None);
            }
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_math::glam::{Mat4, Vec3};

    #[test]
    fn transform_bytes_are_column_major_in_field_order() {
        let t = Transform {
            projection: Mat4::from_scale(Vec3::splat(2.0)),
            view: Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
            model: Mat4::IDENTITY,
        };
        let floats: Vec<f32> = transform_bytes(&t)
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(floats[0], 2.0);
        // view translation sits in column 3 of the second matrix
        assert_eq!(&floats[16 + 12..16 + 15], &[1.0, 2.0, 3.0]);
        assert_eq!(floats[32], 1.0);
        assert_eq!(floats[47], 1.0);
    }

    #[test]
    fn transform_bytes_fill_exactly_one_uniform_buffer() {
        let t = Transform {
            model: Mat4::from_rotation_z(0.5),
            ..Transform::default()
        };
        assert_eq!(transform_bytes(&t).len() as vk::DeviceSize, TRANSFORM_SIZE);
        assert_eq!(transform_bytes(&t), transform_bytes(&t));
    }

    #[test]
    fn uniform_size_matches_three_matrices() {
        assert_eq!(TRANSFORM_SIZE, 192);
    }
}
