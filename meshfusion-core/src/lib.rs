//! Core data structures and traits for meshfusion
//!
//! This crate provides the fundamental types shared by the fusion pipeline:
//! triangle meshes, bounding boxes, transforms, the error type and a
//! topology report used to verify watertightness.

pub mod point;
pub mod mesh;
pub mod traits;
pub mod transform;
pub mod topology;
pub mod shapes;
pub mod error;

pub use point::*;
pub use mesh::*;
pub use traits::*;
pub use transform::*;
pub use topology::*;
pub use error::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Point3, Vector3, Matrix3, Matrix4, Isometry3, UnitQuaternion};

// Type aliases for easier imports
pub type Point = Point3f;
pub type Mesh = TriangleMesh;
