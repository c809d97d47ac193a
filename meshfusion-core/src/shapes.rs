//! Procedural test shapes
//!
//! All shapes are centered at the origin with outward-facing triangles.

use crate::mesh::TriangleMesh;
use crate::point::Point3f;
use std::collections::HashMap;

/// Icosahedron subdivided `subdivisions` times and projected onto a sphere
pub fn icosphere(radius: f32, subdivisions: u32) -> TriangleMesh {
    let t = (1.0 + 5.0_f32.sqrt()) / 2.0;
    let mut vertices: Vec<Point3f> = [
        [-1.0, t, 0.0],
        [1.0, t, 0.0],
        [-1.0, -t, 0.0],
        [1.0, -t, 0.0],
        [0.0, -1.0, t],
        [0.0, 1.0, t],
        [0.0, -1.0, -t],
        [0.0, 1.0, -t],
        [t, 0.0, -1.0],
        [t, 0.0, 1.0],
        [-t, 0.0, -1.0],
        [-t, 0.0, 1.0],
    ]
    .iter()
    .map(|&[x, y, z]| Point3f::new(x, y, z))
    .collect();

    let mut faces: Vec<[usize; 3]> = vec![
        [0, 11, 5], [0, 5, 1], [0, 1, 7], [0, 7, 10], [0, 10, 11],
        [1, 5, 9], [5, 11, 4], [11, 10, 2], [10, 7, 6], [7, 1, 8],
        [3, 9, 4], [3, 4, 2], [3, 2, 6], [3, 6, 8], [3, 8, 9],
        [4, 9, 5], [2, 4, 11], [6, 2, 10], [8, 6, 7], [9, 8, 1],
    ];

    for _ in 0..subdivisions {
        let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
        let mut midpoint = |a: usize, b: usize, vertices: &mut Vec<Point3f>| -> usize {
            *midpoints.entry((a.min(b), a.max(b))).or_insert_with(|| {
                let mid = nalgebra::center(&vertices[a], &vertices[b]);
                vertices.push(mid);
                vertices.len() - 1
            })
        };

        let mut next = Vec::with_capacity(faces.len() * 4);
        for &[a, b, c] in &faces {
            let ab = midpoint(a, b, &mut vertices);
            let bc = midpoint(b, c, &mut vertices);
            let ca = midpoint(c, a, &mut vertices);
            next.push([a, ab, ca]);
            next.push([b, bc, ab]);
            next.push([c, ca, bc]);
            next.push([ab, bc, ca]);
        }
        faces = next;
    }

    for v in &mut vertices {
        *v = Point3f::from(v.coords.normalize() * radius);
    }

    TriangleMesh::from_vertices_and_faces(vertices, faces)
}

/// Axis-aligned cube with side length `size`
pub fn cube(size: f32) -> TriangleMesh {
    let mut mesh = box_corners(size);
    mesh.faces = vec![
        [0, 2, 1], [1, 2, 3], // -z
        [4, 5, 6], [5, 7, 6], // +z
        [0, 1, 4], [1, 5, 4], // -y
        [2, 6, 3], [3, 6, 7], // +y
        [0, 4, 2], [2, 4, 6], // -x
        [1, 3, 5], [3, 7, 5], // +x
    ];
    mesh
}

/// Cube with the +y side missing
pub fn open_box(size: f32) -> TriangleMesh {
    let mut mesh = cube(size);
    mesh.faces.retain(|face| !face.iter().all(|&i| i & 2 != 0));
    mesh
}

// corner i has x, y, z taken from bits 0, 1, 2
fn box_corners(size: f32) -> TriangleMesh {
    let h = size / 2.0;
    let vertices = (0..8)
        .map(|i| {
            let pick = |bit: usize| if i & (1 << bit) != 0 { h } else { -h };
            Point3f::new(pick(0), pick(1), pick(2))
        })
        .collect();
    TriangleMesh::from_vertices_and_faces(vertices, Vec::new())
}
