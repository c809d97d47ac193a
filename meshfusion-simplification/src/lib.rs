//! Mesh simplification for meshfusion
//!
//! Fused surfaces carry one vertex per crossed lattice edge, far more than
//! most consumers need. This crate decimates them with quadric-error edge
//! collapses that keep a closed, edge-manifold mesh closed and edge-manifold.

pub mod edge_collapse;
pub mod quadric;

pub use edge_collapse::*;

use meshfusion_core::{Result, TriangleMesh};

/// Simplify a mesh by reducing the number of faces/vertices
pub trait MeshSimplifier {
    /// Simplify mesh with target reduction ratio (0.0 = no reduction, 1.0 = maximum reduction)
    fn simplify(&self, mesh: &TriangleMesh, reduction_ratio: f32) -> Result<TriangleMesh>;
}
