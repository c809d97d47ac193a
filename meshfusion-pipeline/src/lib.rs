//! # MeshFusion Pipeline
//!
//! Batch conversion of arbitrary triangle meshes into watertight meshes.
//!
//! The [`FusionDriver`] runs one of two modes over a directory of meshes:
//! `render` writes depth maps from many viewpoints, `fuse` integrates them into
//! a TSDF volume and extracts a closed surface. [`run_pipeline`] chains the
//! scale, render, fuse, fix-frame and simplify steps end to end.

pub mod batch;
pub mod config;
pub mod driver;
pub mod fix_frame;
pub mod pipeline;
pub mod scale;
pub mod simplify;

// Re-export commonly used items
pub use batch::*;
pub use config::*;
pub use driver::*;
pub use fix_frame::*;
pub use pipeline::*;
pub use scale::*;
pub use simplify::*;
