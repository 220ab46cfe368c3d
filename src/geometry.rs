//! CPU-side plane geometry.
//!
//! A plane is a grid of `width_segments x height_segments` quads spanning
//! `[-1, 1]` on both axes in plane-local space, the way an HTML element maps
//! onto clip space. Texture coordinates put (0, 0) at the element's top-left
//! corner so they line up with the DOM image the plane replaces.
//!
//! ```
//! use drape::RawGeometry;
//!
//! let grid = RawGeometry::plane(30, 20);
//! assert_eq!(grid.vertices.len(), 31 * 21);
//! assert_eq!(grid.indices.len(), 30 * 20 * 6);
//! ```

use glam::Vec3;

use crate::mesh::Vertex3d;

/// Raw geometry data before GPU upload.
#[derive(Clone, Debug)]
pub struct RawGeometry {
    pub vertices: Vec<Vertex3d>,
    /// Triangle indices.
    pub indices: Vec<u32>,
}

impl RawGeometry {
    /// Tessellated unit plane facing +z.
    ///
    /// Segment counts of zero are treated as one.
    pub fn plane(width_segments: u32, height_segments: u32) -> Self {
        let ws = width_segments.max(1);
        let hs = height_segments.max(1);

        let mut vertices = Vec::with_capacity(((ws + 1) * (hs + 1)) as usize);
        for row in 0..=hs {
            let v = row as f32 / hs as f32;
            for col in 0..=ws {
                let u = col as f32 / ws as f32;
                vertices.push(Vertex3d::new(
                    [u * 2.0 - 1.0, 1.0 - v * 2.0, 0.0],
                    [0.0, 0.0, 1.0],
                    [u, v],
                ));
            }
        }

        let stride = ws + 1;
        let mut indices = Vec::with_capacity((ws * hs * 6) as usize);
        for row in 0..hs {
            for col in 0..ws {
                let top_left = row * stride + col;
                let top_right = top_left + 1;
                let bottom_left = top_left + stride;
                let bottom_right = bottom_left + 1;
                indices.extend_from_slice(&[
                    top_left,
                    bottom_left,
                    top_right,
                    top_right,
                    bottom_left,
                    bottom_right,
                ]);
            }
        }

        Self { vertices, indices }
    }
}

/// Convert a transform origin expressed in element space into plane-local
/// coordinates.
///
/// (0, 0) is the element's top-left corner and (1, 1) its bottom-right; values
/// outside that range are allowed and place the pivot outside the element.
pub fn origin_to_local(origin: Vec3) -> Vec3 {
    Vec3::new(origin.x * 2.0 - 1.0, 1.0 - origin.y * 2.0, origin.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_spans_clip_square() {
        let geom = RawGeometry::plane(4, 2);
        let xs = geom.vertices.iter().map(|v| v.position[0]);
        let ys = geom.vertices.iter().map(|v| v.position[1]);
        assert_eq!(xs.clone().fold(f32::INFINITY, f32::min), -1.0);
        assert_eq!(xs.fold(f32::NEG_INFINITY, f32::max), 1.0);
        assert_eq!(ys.clone().fold(f32::INFINITY, f32::min), -1.0);
        assert_eq!(ys.fold(f32::NEG_INFINITY, f32::max), 1.0);
        assert!(geom.vertices.iter().all(|v| v.position[2] == 0.0));
    }

    #[test]
    fn top_left_vertex_has_zero_uv() {
        let geom = RawGeometry::plane(3, 3);
        assert_eq!(geom.vertices[0].uv, [0.0, 0.0]);
        assert_eq!(geom.vertices[0].position, [-1.0, 1.0, 0.0]);
        assert_eq!(geom.vertices.last().unwrap().uv, [1.0, 1.0]);
    }

    #[test]
    fn indices_stay_in_range() {
        let geom = RawGeometry::plane(7, 5);
        let count = geom.vertices.len() as u32;
        assert!(geom.indices.iter().all(|&i| i < count));
    }

    #[test]
    fn zero_segments_fall_back_to_one() {
        let geom = RawGeometry::plane(0, 0);
        assert_eq!(geom.vertices.len(), 4);
        assert_eq!(geom.indices.len(), 6);
    }

    #[test]
    fn origin_mapping_matches_element_corners() {
        assert_eq!(origin_to_local(Vec3::new(0.5, 0.5, 0.0)), Vec3::ZERO);
        assert_eq!(origin_to_local(Vec3::new(1.0, 1.0, 0.0)), Vec3::new(1.0, -1.0, 0.0));
    }
}
