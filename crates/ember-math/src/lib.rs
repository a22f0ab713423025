// SPDX-License-Identifier: CEPL-1.0
//! Camera math in Vulkan conventions.
//!
//! Vulkan clip space has +Y pointing down and depth in `[0, 1]`, so the
//! projection built here is glam's right-handed zero-to-one perspective with
//! the Y scale negated.
pub use glam;
use glam::{Mat4, Vec3};

/// Perspective projection for Vulkan clip space.
///
/// `aspect` is width / height of the target extent.
pub fn vulkan_perspective(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(fov_y_radians, aspect, near, far);
    proj.y_axis.y *= -1.0;
    proj
}

pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
    Mat4::look_at_rh(eye, target, up)
}

/// Aspect ratio of a pixel extent; a zero height yields 1.0.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_flips_y() {
        let gl_style = Mat4::perspective_rh(45f32.to_radians(), 4.0 / 3.0, 0.1, 100.0);
        let vk_style = vulkan_perspective(45f32.to_radians(), 4.0 / 3.0, 0.1, 100.0);
        assert_eq!(vk_style.y_axis.y, -gl_style.y_axis.y);
        assert_eq!(vk_style.x_axis, gl_style.x_axis);
        assert_eq!(vk_style.z_axis, gl_style.z_axis);
        assert_eq!(vk_style.w_axis, gl_style.w_axis);
    }

    #[test]
    fn point_above_origin_lands_in_upper_half() {
        let proj = vulkan_perspective(45f32.to_radians(), 1.0, 0.1, 100.0);
        let view = look_at(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, Vec3::Y);
        let clip = proj * view * glam::Vec4::new(0.0, 1.0, 0.0, 1.0);
        // Vulkan's framebuffer origin is top-left, so "up" is negative clip Y.
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn aspect_ratio_handles_zero_height() {
        assert_eq!(aspect_ratio(800, 600), 800.0 / 600.0);
        assert_eq!(aspect_ratio(800, 0), 1.0);
    }
}
