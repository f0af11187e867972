//! Cube geometry for the capture pass and the skybox.

use std::fmt;

#[derive(Debug)]
pub enum MeshError {
    EmptyMesh,
    IndexOutOfBounds { index: u32, vertex_count: u32 },
    SizeOverflow,
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshError::EmptyMesh => write!(f, "mesh is empty"),
            MeshError::IndexOutOfBounds {
                index,
                vertex_count,
            } => write!(
                f,
                "mesh index out of bounds: {} (vertex count {})",
                index, vertex_count
            ),
            MeshError::SizeOverflow => write!(f, "mesh size overflow"),
        }
    }
}

impl std::error::Error for MeshError {}

/// Interleaved vertex layout: position, normal, uv (32 bytes).
#[derive(Debug, Clone, Copy)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

pub const MESH_VERTEX_STRIDE: u64 = 32;

#[derive(Debug, Clone)]
pub struct MeshData {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Result<Self, MeshError> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(MeshError::EmptyMesh);
        }
        let vertex_count = u32::try_from(vertices.len()).map_err(|_| MeshError::SizeOverflow)?;
        for &index in &indices {
            if index >= vertex_count {
                return Err(MeshError::IndexOutOfBounds {
                    index,
                    vertex_count,
                });
            }
        }
        Ok(Self { vertices, indices })
    }

    pub fn vertex_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.vertices.len() * MESH_VERTEX_STRIDE as usize);
        for vertex in &self.vertices {
            for value in vertex.position {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
            for value in vertex.normal {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
            for value in vertex.uv {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes
    }

    pub fn index_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.indices.len() * 4);
        for index in &self.indices {
            bytes.extend_from_slice(&index.to_le_bytes());
        }
        bytes
    }

    pub fn index_count(&self) -> Result<u32, MeshError> {
        u32::try_from(self.indices.len()).map_err(|_| MeshError::SizeOverflow)
    }
}

// Outward-facing cube faces in +X, -X, +Y, -Y, +Z, -Z order. Corners are
// listed counter-clockwise seen from outside, uv origin at the top left.
const FACE_CORNERS: [[[f32; 3]; 4]; 6] = [
    [
        [1.0, 1.0, 1.0],
        [1.0, 1.0, -1.0],
        [1.0, -1.0, -1.0],
        [1.0, -1.0, 1.0],
    ],
    [
        [-1.0, 1.0, -1.0],
        [-1.0, 1.0, 1.0],
        [-1.0, -1.0, 1.0],
        [-1.0, -1.0, -1.0],
    ],
    [
        [-1.0, 1.0, -1.0],
        [1.0, 1.0, -1.0],
        [1.0, 1.0, 1.0],
        [-1.0, 1.0, 1.0],
    ],
    [
        [-1.0, -1.0, 1.0],
        [1.0, -1.0, 1.0],
        [1.0, -1.0, -1.0],
        [-1.0, -1.0, -1.0],
    ],
    [
        [-1.0, 1.0, 1.0],
        [1.0, 1.0, 1.0],
        [1.0, -1.0, 1.0],
        [-1.0, -1.0, 1.0],
    ],
    [
        [1.0, 1.0, -1.0],
        [-1.0, 1.0, -1.0],
        [-1.0, -1.0, -1.0],
        [1.0, -1.0, -1.0],
    ],
];

const FACE_NORMALS: [[f32; 3]; 6] = [
    [1.0, 0.0, 0.0],
    [-1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, -1.0, 0.0],
    [0.0, 0.0, 1.0],
    [0.0, 0.0, -1.0],
];

const FACE_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

/// Build a cube of the given edge length, one segment per face, centred
/// on the origin. Inward-facing cubes flip both winding and normals so
/// the faces are visible from inside.
pub fn build_cube(edge_length: f32, inward_facing: bool) -> MeshData {
    let half = edge_length * 0.5;
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (face, corners) in FACE_CORNERS.iter().enumerate() {
        let base = vertices.len() as u32;
        let normal = FACE_NORMALS[face];
        let normal = if inward_facing {
            [-normal[0], -normal[1], -normal[2]]
        } else {
            normal
        };
        for (corner, uv) in corners.iter().zip(FACE_UVS) {
            vertices.push(MeshVertex {
                position: [corner[0] * half, corner[1] * half, corner[2] * half],
                normal,
                uv,
            });
        }
        let quad: [u32; 6] = if inward_facing {
            [0, 2, 1, 0, 3, 2]
        } else {
            [0, 1, 2, 0, 2, 3]
        };
        for offset in quad {
            indices.push(base + offset);
        }
    }
    MeshData { vertices, indices }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_four_vertices_per_face() {
        let cube = build_cube(2.0, true);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert_eq!(cube.index_count().expect("count"), 36);
    }

    #[test]
    fn cube_positions_sit_on_the_half_edge() {
        let cube = build_cube(3.0, false);
        for vertex in &cube.vertices {
            let max = vertex
                .position
                .iter()
                .fold(0.0f32, |acc, value| acc.max(value.abs()));
            assert!((max - 1.5).abs() < 1e-6);
        }
    }

    #[test]
    fn inward_normals_point_at_the_centre() {
        let cube = build_cube(2.0, true);
        for vertex in &cube.vertices {
            let dot = vertex.position[0] * vertex.normal[0]
                + vertex.position[1] * vertex.normal[1]
                + vertex.position[2] * vertex.normal[2];
            assert!(dot < 0.0);
        }
    }

    #[test]
    fn inward_winding_is_reversed() {
        let outward = build_cube(2.0, false);
        let inward = build_cube(2.0, true);
        assert_eq!(&outward.indices[..3], &[0, 1, 2]);
        assert_eq!(&inward.indices[..3], &[0, 2, 1]);
    }

    #[test]
    fn cube_indices_pass_validation() {
        let cube = build_cube(2.0, true);
        MeshData::new(cube.vertices, cube.indices).expect("valid cube");
    }

    #[test]
    fn vertex_bytes_use_the_documented_stride() {
        let cube = build_cube(2.0, true);
        assert_eq!(
            cube.vertex_bytes().len(),
            cube.vertices.len() * MESH_VERTEX_STRIDE as usize
        );
        assert_eq!(cube.index_bytes().len(), cube.indices.len() * 4);
    }

    #[test]
    fn out_of_bounds_index_is_rejected() {
        let cube = build_cube(2.0, true);
        let err = MeshData::new(cube.vertices, vec![0, 1, 99]).expect_err("bad index");
        assert!(matches!(
            err,
            MeshError::IndexOutOfBounds { index: 99, .. }
        ));
    }

    #[test]
    fn empty_mesh_is_rejected() {
        let err = MeshData::new(Vec::new(), Vec::new()).expect_err("empty");
        assert!(matches!(err, MeshError::EmptyMesh));
    }
}
