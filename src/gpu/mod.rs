//! GPU plumbing using wgpu
//!
//! Device setup, resource allocation, per-level state tracking, dispatch
//! sizing and readback. The bloom stages themselves live in `crate::stages`.

pub mod arena;
pub mod batch;
pub mod context;
pub mod image;
pub mod kernel;
pub mod readback;
pub mod state;
pub mod workgroups;

pub use context::GpuContext;
pub use state::{ImageLayout, ResourceState, ResourceStateTracker};
pub use workgroups::{Extent2d, TileSize, plan};
