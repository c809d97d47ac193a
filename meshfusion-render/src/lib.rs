//! Depth rendering for meshfusion
//!
//! Places pinhole cameras around a mesh, rasterizes the mesh into depth maps
//! on the CPU and stores those maps between the render and fuse phases.

pub mod camera;
pub mod depth;
pub mod rasterizer;
pub mod store;

pub use camera::*;
pub use depth::*;
pub use rasterizer::*;
pub use store::*;
