use std::sync::Arc;

use anyhow::{anyhow, Result};
use cgmath::{Deg, Matrix4, Point3, SquareMatrix, Vector3};

use crate::grid::PlenoxelGrid;
use crate::integrator::FogConfig;

/// Axis-aligned world-space box the grid occupies; rays outside it
/// contribute no color.
#[derive(Copy, Clone, Debug)]
pub struct BoundingBox {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

/// Everything a render call reads: the grid, the camera inverses, the
/// bounding box and the fog tunables. Renderers clone this into each
/// frame, so the state a frame sees never changes mid-render.
///
/// Only the inverse matrices are stored; inversion happens once per
/// setter call, not per ray.
#[derive(Clone)]
pub struct SceneState {
    pub grid: Arc<PlenoxelGrid>,
    pub bounding_box: BoundingBox,
    pub world_view_inv: Matrix4<f32>,
    pub world_view_proj_inv: Matrix4<f32>,
    pub fog: FogConfig,
}

impl SceneState {
    /// New scene over `grid` with the unit-cube bounding box and the
    /// stock camera (eye at (0, 1.5, -3) looking at the origin, 90-degree
    /// square perspective).
    pub fn new(grid: Arc<PlenoxelGrid>) -> Self {
        let view = Matrix4::look_at_rh(
            Point3::new(0.0, 1.5, -3.0),
            Point3::new(0.0, 0.0, 0.0),
            Vector3::unit_y(),
        );
        let proj = cgmath::perspective(Deg(90.0), 1.0, 0.1, 100.0);

        SceneState {
            grid,
            bounding_box: BoundingBox {
                min: Vector3::new(0.0, 0.0, 0.0),
                max: Vector3::new(1.0, 1.0, 1.0),
            },
            world_view_inv: view
                .invert()
                .expect("stock view matrix is invertible"),
            world_view_proj_inv: proj
                .invert()
                .expect("stock projection matrix is invertible"),
            fog: FogConfig::default(),
        }
    }

    pub fn set_world_view_matrix(&mut self, mat: Matrix4<f32>) -> Result<()> {
        self.world_view_inv = invert(mat)?;
        Ok(())
    }

    pub fn set_world_view_proj_matrix(&mut self, mat: Matrix4<f32>) -> Result<()> {
        self.world_view_proj_inv = invert(mat)?;
        Ok(())
    }

    pub fn set_bounding_box(&mut self, min: Vector3<f32>, max: Vector3<f32>) {
        self.bounding_box = BoundingBox { min, max };
    }

    pub fn set_fog_config(&mut self, fog: FogConfig) {
        self.fog = fog;
    }
}

fn invert(mat: Matrix4<f32>) -> Result<Matrix4<f32>> {
    mat.invert()
        .ok_or_else(|| anyhow!("camera matrix is not invertible"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scene() -> SceneState {
        SceneState::new(Arc::new(PlenoxelGrid::new(2)))
    }

    #[test]
    fn setting_the_same_matrix_twice_stores_the_same_inverse() {
        let mut scene = scene();
        let view = Matrix4::look_at_rh(
            Point3::new(0.3, -1.0, 2.5),
            Point3::new(0.0, 0.5, 0.0),
            Vector3::unit_y(),
        );

        scene.set_world_view_matrix(view).unwrap();
        let first = scene.world_view_inv;
        scene.set_world_view_matrix(view).unwrap();
        let second = scene.world_view_inv;

        assert_relative_eq!(first, second);
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let mut scene = scene();
        assert!(scene.set_world_view_matrix(Matrix4::from_scale(0.0)).is_err());
        assert!(scene
            .set_world_view_proj_matrix(Matrix4::from_scale(0.0))
            .is_err());
    }

    #[test]
    fn stored_inverse_actually_inverts() {
        let mut scene = scene();
        let view = Matrix4::from_translation(Vector3::new(1.0, -2.0, 3.0));
        scene.set_world_view_matrix(view).unwrap();

        assert_relative_eq!(scene.world_view_inv * view, Matrix4::identity(), epsilon = 1e-6);
    }
}
