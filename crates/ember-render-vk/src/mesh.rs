// SPDX-License-Identifier: CEPL-1.0
use crate::error::{RenderError, Result};
use crate::memory::{Allocator, GpuBuffer, TransferContext};
use ash::vk;
use ember_render::Vertex;
use tracing::debug;

/// Both arrays must be non-empty.
fn check_geometry(vertices: &[Vertex], indices: &[u32]) -> Result<()> {
    if vertices.is_empty() || indices.is_empty() {
        return Err(RenderError::failed(
            "create mesh",
            vk::Result::ERROR_INITIALIZATION_FAILED,
        ));
    }
    Ok(())
}

/// Indexed geometry resident in device-local memory.
pub struct Mesh {
    vertex_count: u32,
    index_count: u32,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
}

impl Mesh {
    pub unsafe fn new(
        alloc: &Allocator,
        transfer: TransferContext,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<Self> {
        check_geometry(vertices, indices)?;
        let vertex_buffer = alloc.create_device_local_with_data(
            transfer,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = alloc.create_device_local_with_data(
            transfer,
            bytemuck::cast_slice(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        debug!("mesh uploaded: {} vertices, {} indices", vertices.len(), indices.len());
        Ok(Mesh {
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
            vertex_buffer,
            index_buffer,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    /// Frees both buffers now. The GPU must no longer be using them.
    pub unsafe fn destroy_buffers(&mut self) {
        self.vertex_buffer.destroy();
        self.index_buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_geometry_is_rejected() {
        let v = [Vertex::new([0.0; 3], [1.0; 3])];
        for (verts, idx) in [(&v[..0], &[0u32][..]), (&v[..], &[][..])] {
            let err = check_geometry(verts, idx).unwrap_err();
            assert!(matches!(
                err,
                RenderError::OperationFailed {
                    stage: "create mesh",
                    result: vk::Result::ERROR_INITIALIZATION_FAILED
                }
            ));
        }
        assert!(check_geometry(&v, &[0, 0, 0]).is_ok());
    }
}
