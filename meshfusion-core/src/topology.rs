//! Mesh topology checks
//!
//! Counts the defects that decide whether a triangle mesh is watertight:
//! boundary edges (used by one face), non-manifold edges (used by more than
//! two), inconsistently wound edges and zero-area faces.

use crate::mesh::TriangleMesh;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Summary of the topology of a triangle mesh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshReport {
    pub vertex_count: usize,
    pub face_count: usize,
    pub edge_count: usize,
    /// Edges referenced by exactly one face
    pub boundary_edges: usize,
    /// Edges referenced by more than two faces
    pub non_manifold_edges: usize,
    /// Manifold edges whose two faces traverse them in the same direction
    pub inconsistent_edges: usize,
    /// Faces with repeated indices or zero area
    pub degenerate_faces: usize,
    /// Face-connected components
    pub components: usize,
}

impl MeshReport {
    /// Analyze a mesh
    pub fn analyze(mesh: &TriangleMesh) -> Self {
        // undirected edge -> (uses, uses in min->max direction)
        let mut edges: HashMap<(usize, usize), (usize, usize)> = HashMap::new();
        let mut degenerate_faces = 0;

        for (f, face) in mesh.faces.iter().enumerate() {
            let in_range = face.iter().all(|&i| i < mesh.vertex_count());
            let repeated = face[0] == face[1] || face[1] == face[2] || face[0] == face[2];
            if repeated || !in_range || mesh.face_area(f) <= 0.0 {
                degenerate_faces += 1;
            }
            for k in 0..3 {
                let a = face[k];
                let b = face[(k + 1) % 3];
                let entry = edges.entry((a.min(b), a.max(b))).or_insert((0, 0));
                entry.0 += 1;
                if a < b {
                    entry.1 += 1;
                }
            }
        }

        let mut report = Self {
            vertex_count: mesh.vertex_count(),
            face_count: mesh.face_count(),
            edge_count: edges.len(),
            degenerate_faces,
            components: count_components(mesh),
            ..Default::default()
        };

        for &(uses, forward) in edges.values() {
            match uses {
                1 => report.boundary_edges += 1,
                2 if forward != 1 => report.inconsistent_edges += 1,
                2 => {}
                _ => report.non_manifold_edges += 1,
            }
        }

        report
    }

    /// Closed and edge-manifold
    pub fn is_watertight(&self) -> bool {
        self.face_count > 0 && self.boundary_edges == 0 && self.non_manifold_edges == 0
    }

    /// Watertight, consistently wound and free of degenerate faces
    pub fn is_clean(&self) -> bool {
        self.is_watertight() && self.inconsistent_edges == 0 && self.degenerate_faces == 0
    }

    /// V - E + F over the referenced topology
    pub fn euler_characteristic(&self) -> i64 {
        self.vertex_count as i64 - self.edge_count as i64 + self.face_count as i64
    }
}

/// Signed volume enclosed by a closed mesh; positive when faces point outward
pub fn signed_volume(mesh: &TriangleMesh) -> f32 {
    (0..mesh.face_count())
        .map(|f| {
            let [a, b, c] = mesh.triangle(f);
            a.coords.dot(&b.coords.cross(&c.coords))
        })
        .sum::<f32>()
        / 6.0
}

/// Face-connected component of every face, numbered in order of first
/// appearance. Faces with out-of-range indices get `usize::MAX`.
pub fn face_components(mesh: &TriangleMesh) -> Vec<usize> {
    let n = mesh.vertex_count();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let valid = |face: &[usize; 3]| face.iter().all(|&i| i < n);
    for face in mesh.faces.iter().filter(|face| valid(face)) {
        let root = find(&mut parent, face[0]);
        for &v in &face[1..] {
            let r = find(&mut parent, v);
            parent[r] = root;
        }
    }

    let mut label_of_root = HashMap::new();
    mesh.faces
        .iter()
        .map(|face| {
            if !valid(face) {
                return usize::MAX;
            }
            let root = find(&mut parent, face[0]);
            let next = label_of_root.len();
            *label_of_root.entry(root).or_insert(next)
        })
        .collect()
}

fn count_components(mesh: &TriangleMesh) -> usize {
    face_components(mesh)
        .into_iter()
        .filter(|&label| label != usize::MAX)
        .max()
        .map_or(0, |max| max + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Point3f;
    use approx::assert_relative_eq;

    fn tetrahedron() -> TriangleMesh {
        TriangleMesh::from_vertices_and_faces(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
                Point3f::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
    }

    #[test]
    fn test_closed_tetrahedron() {
        let mesh = tetrahedron();
        let report = MeshReport::analyze(&mesh);

        assert!(report.is_watertight());
        assert!(report.is_clean());
        assert_eq!(report.edge_count, 6);
        assert_eq!(report.components, 1);
        assert_eq!(report.euler_characteristic(), 2);
        assert_relative_eq!(signed_volume(&mesh), 1.0 / 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_open_and_flipped() {
        let mut mesh = tetrahedron();
        mesh.faces.pop();
        let report = MeshReport::analyze(&mesh);
        assert!(!report.is_watertight());
        assert_eq!(report.boundary_edges, 3);

        let mut flipped = tetrahedron();
        flipped.faces[0].swap(1, 2);
        let report = MeshReport::analyze(&flipped);
        assert!(report.is_watertight());
        assert_eq!(report.inconsistent_edges, 3);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_non_manifold_and_components() {
        let mut mesh = tetrahedron();
        let extra = mesh.add_vertex(Point3f::new(1.0, 1.0, 0.0));
        mesh.add_face([0, 1, extra]);

        let report = MeshReport::analyze(&mesh);
        assert_eq!(report.non_manifold_edges, 1);
        assert!(!report.is_watertight());

        let mut two = tetrahedron();
        let offset = two.vertex_count();
        let copy = tetrahedron();
        two.vertices.extend(copy.vertices.iter().map(|v| v + crate::point::Vector3f::new(5.0, 0.0, 0.0)));
        two.faces.extend(copy.faces.iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]));
        assert_eq!(MeshReport::analyze(&two).components, 2);
    }
}
