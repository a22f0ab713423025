// SPDX-License-Identifier: CEPL-1.0
use ember_math::glam::Mat4;
use ember_render::MeshData;

/// Two small quads: one centred on the origin, one up and to the right.
pub fn demo_meshes() -> [MeshData; 2] {
    [
        MeshData::quad(
            [-0.1, -0.1],
            [0.1, 0.1],
            [
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [1.0, 0.0, 1.0],
                [0.5, 0.5, 0.35],
            ],
        ),
        MeshData::quad(
            [0.40, 0.40],
            [0.50, 0.50],
            [
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.7],
                [0.5, 0.2, 0.35],
            ],
        ),
    ]
}

/// Model matrix after `elapsed_secs` of spinning about +Z.
pub fn spin(elapsed_secs: f32, degrees_per_second: f32) -> Mat4 {
    let degrees = (elapsed_secs * degrees_per_second) % 360.0;
    Mat4::from_rotation_z(degrees.to_radians())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_math::glam::Vec3;

    #[test]
    fn demo_quads_are_indexed_pairs_of_triangles() {
        for mesh in demo_meshes() {
            assert_eq!(mesh.vertices.len(), 4);
            assert_eq!(mesh.indices, vec![0, 1, 2, 2, 3, 0]);
        }
        let [a, b] = demo_meshes();
        assert_eq!(a.vertices[0].pos, [-0.1, -0.1, 0.0]);
        assert_eq!(b.vertices[2].pos, [0.50, 0.50, 0.0]);
        assert_eq!(b.vertices[2].color, [0.0, 1.0, 0.7]);
    }

    #[test]
    fn zero_spin_is_identity() {
        assert_eq!(spin(12.5, 0.0), Mat4::IDENTITY);
    }

    #[test]
    fn quarter_turn_maps_x_to_y() {
        let p = spin(9.0, 10.0).transform_point3(Vec3::X);
        assert!((p - Vec3::Y).length() < 1e-5);
    }
}
