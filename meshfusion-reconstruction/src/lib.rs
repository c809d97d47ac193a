//! # MeshFusion Reconstruction
//!
//! Volumetric fusion of depth maps and watertight surface extraction.
//!
//! Depth maps rendered around a mesh are integrated into a truncated
//! signed-distance volume ([`TsdfVolumizer`]), and the zero level set of that
//! volume is polygonized into a closed triangle mesh ([`SurfaceExtractor`]).

pub mod extraction;
pub mod parallel;
pub mod tsdf;

// Re-export commonly used items
pub use extraction::*;
pub use parallel::{init_thread_pool, ThreadPoolConfig};
pub use tsdf::*;
