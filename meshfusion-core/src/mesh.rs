//! Mesh data structures and functionality

use crate::error::{Error, Result};
use crate::point::*;
use serde::{Deserialize, Serialize};

/// A triangle mesh with vertices and faces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3f>,
    pub faces: Vec<[usize; 3]>,
}

impl TriangleMesh {
    /// Create a new empty mesh
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Create a mesh from vertices and faces
    pub fn from_vertices_and_faces(vertices: Vec<Point3f>, faces: Vec<[usize; 3]>) -> Self {
        Self { vertices, faces }
    }

    /// Get the number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Get the number of faces
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if the mesh is empty
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Add a vertex to the mesh
    pub fn add_vertex(&mut self, vertex: Point3f) -> usize {
        let index = self.vertices.len();
        self.vertices.push(vertex);
        index
    }

    /// Add a face to the mesh
    pub fn add_face(&mut self, face: [usize; 3]) {
        self.faces.push(face);
    }

    /// Corner positions of a face
    pub fn triangle(&self, face: usize) -> [Point3f; 3] {
        let [a, b, c] = self.faces[face];
        [self.vertices[a], self.vertices[b], self.vertices[c]]
    }

    /// Area of a face
    pub fn face_area(&self, face: usize) -> f32 {
        let [v0, v1, v2] = self.triangle(face);
        0.5 * (v1 - v0).cross(&(v2 - v0)).norm()
    }

    /// Calculate face normals
    pub fn calculate_face_normals(&self) -> Vec<Vector3f> {
        (0..self.faces.len())
            .map(|face| {
                let [v0, v1, v2] = self.triangle(face);
                (v1 - v0).cross(&(v2 - v0)).normalize()
            })
            .collect()
    }

    /// Check that the mesh can be processed: non-empty, finite vertices and
    /// face indices within bounds
    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() {
            return Err(Error::InvalidMesh("mesh has no vertices".to_string()));
        }
        if self.faces.is_empty() {
            return Err(Error::InvalidMesh("mesh has no faces".to_string()));
        }
        if let Some(v) = self.vertices.iter().position(|v| !v.coords.iter().all(|c| c.is_finite())) {
            return Err(Error::InvalidMesh(format!("vertex {} is not finite", v)));
        }
        let n = self.vertices.len();
        if let Some(f) = self.faces.iter().position(|face| face.iter().any(|&i| i >= n)) {
            return Err(Error::InvalidMesh(format!(
                "face {} references a vertex outside 0..{}",
                f, n
            )));
        }
        Ok(())
    }

    /// Apply a function to every vertex in place
    pub fn map_vertices<F>(&mut self, f: F)
    where
        F: Fn(&Point3f) -> Point3f,
    {
        for vertex in &mut self.vertices {
            *vertex = f(vertex);
        }
    }

    /// Reverse the winding of every face
    pub fn flip_faces(&mut self) {
        for face in &mut self.faces {
            face.swap(1, 2);
        }
    }

    /// Clear the mesh
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.faces.clear();
    }
}

impl Default for TriangleMesh {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_triangle() -> TriangleMesh {
        TriangleMesh::from_vertices_and_faces(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn test_mesh_creation() {
        let mut mesh = TriangleMesh::new();
        assert!(mesh.is_empty());

        let a = mesh.add_vertex(Point3f::origin());
        let b = mesh.add_vertex(Point3f::new(1.0, 0.0, 0.0));
        let c = mesh.add_vertex(Point3f::new(0.0, 0.0, 1.0));
        mesh.add_face([a, b, c]);

        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.face_count(), 1);
        assert!(!mesh.is_empty());
    }

    #[test]
    fn test_face_area_and_normal() {
        let mesh = unit_triangle();
        assert_relative_eq!(mesh.face_area(0), 0.5);

        let normals = mesh.calculate_face_normals();
        assert_relative_eq!(normals[0], Vector3f::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_validate() {
        assert!(unit_triangle().validate().is_ok());

        let empty = TriangleMesh::new();
        assert!(matches!(empty.validate(), Err(Error::InvalidMesh(_))));

        let mut bad_index = unit_triangle();
        bad_index.add_face([0, 1, 7]);
        assert!(matches!(bad_index.validate(), Err(Error::InvalidMesh(_))));

        let mut nan = unit_triangle();
        nan.vertices[1].x = f32::NAN;
        assert!(matches!(nan.validate(), Err(Error::InvalidMesh(_))));
    }

    #[test]
    fn test_flip_faces() {
        let mut mesh = unit_triangle();
        mesh.flip_faces();
        assert_eq!(mesh.faces[0], [0, 2, 1]);
        assert_relative_eq!(mesh.calculate_face_normals()[0], Vector3f::new(0.0, 0.0, -1.0));
    }
}
