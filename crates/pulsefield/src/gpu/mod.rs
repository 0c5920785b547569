//! wgpu backend: particles step in a compute pass, trails and bloom are
//! fullscreen passes over `Rgba16Float` targets.

pub mod backend;
pub mod bloom;
pub mod capture;
pub mod composite;
pub mod context;
pub mod particles;
pub mod pass;
pub mod render_target;
pub mod trail;

pub use backend::GpuBackend;
pub use context::GpuContext;
