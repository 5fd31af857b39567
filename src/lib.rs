pub mod grid;
pub mod integrator;
pub mod kernel;
pub mod math;
pub mod renderer;
pub mod scene;
pub mod sh;

mod gpu;

pub use grid::{Plenoxel, PlenoxelGrid};
pub use gpu::GpuRenderer;
pub use integrator::FogConfig;
pub use renderer::{CpuRenderer, Renderer};
pub use scene::{BoundingBox, SceneState};

/// Number of spherical-harmonic coefficients per color channel (order 2).
pub const SH_WIDTH: usize = 9;

/// Scalars per voxel record: density plus three SH coefficient vectors.
pub const PLENOXEL_SIZE: usize = 1 + 3 * SH_WIDTH;
