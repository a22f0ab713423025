// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use ember_math::glam::{Mat4, Vec3};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

/// One vertex record as laid out in the vertex buffer (binding 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3]) -> Self {
        Self { pos, color }
    }
}

/// Raw geometry handed to a backend for upload.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Axis-aligned quad in the z = 0 plane, wound counter-clockwise.
    pub fn quad(min: [f32; 2], max: [f32; 2], colors: [[f32; 3]; 4]) -> Self {
        let vertices = vec![
            Vertex::new([min[0], min[1], 0.0], colors[0]),
            Vertex::new([max[0], min[1], 0.0], colors[1]),
            Vertex::new([max[0], max[1], 0.0], colors[2]),
            Vertex::new([min[0], max[1], 0.0], colors[3]),
        ];
        Self::new(vertices, vec![0, 1, 2, 2, 3, 0])
    }
}

/// Index into a backend's mesh list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshId(pub usize);

/// Per-frame uniform data. Field order matches the vertex shader's block.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Transform {
    pub projection: Mat4,
    pub view: Mat4,
    pub model: Mat4,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            model: Mat4::IDENTITY,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CameraDesc {
    pub fov_y_degrees: f32,
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraDesc {
    fn default() -> Self {
        Self {
            fov_y_degrees: 45.0,
            eye: Vec3::new(1.0, 1.0, 4.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl CameraDesc {
    /// Projection (Vulkan clip conventions) and view for a target aspect.
    pub fn matrices(&self, aspect: f32) -> (Mat4, Mat4) {
        let proj = ember_math::vulkan_perspective(
            self.fov_y_degrees.to_radians(),
            aspect,
            self.near,
            self.far,
        );
        let view = ember_math::look_at(self.eye, self.target, self.up);
        (proj, view)
    }
}

/// Everything a backend needs at construction besides the window.
#[derive(Clone, Debug)]
pub struct RendererDesc {
    pub clear_color: [f32; 4],
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub camera: CameraDesc,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        desc: &RendererDesc,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Uploads geometry and makes it part of every subsequent frame.
    fn load_mesh(&mut self, mesh: &MeshData) -> Result<MeshId>;
    fn update_model(&mut self, model: Mat4);
    fn draw(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        assert_eq!(std::mem::offset_of!(Vertex, color), 12);
    }

    #[test]
    fn transform_is_three_column_major_matrices() {
        assert_eq!(std::mem::size_of::<Transform>(), 3 * 64);
        let t = Transform::default();
        let bytes: &[u8] = bytemuck::bytes_of(&t);
        assert_eq!(bytes.len(), 192);
    }

    #[test]
    fn quad_has_two_ccw_triangles() {
        let q = MeshData::quad([-0.1, -0.1], [0.1, 0.1], [[1.0, 0.0, 0.0]; 4]);
        assert_eq!(q.vertices.len(), 4);
        assert_eq!(q.indices, vec![0, 1, 2, 2, 3, 0]);

        let p = |i: usize| q.vertices[q.indices[i] as usize].pos;
        let (a, b, c) = (p(0), p(1), p(2));
        let cross = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
        assert!(cross > 0.0);
    }
}
