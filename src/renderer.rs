use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use cgmath::{Matrix4, Vector3};
use rayon::prelude::*;

use crate::grid::PlenoxelGrid;
use crate::integrator::FogConfig;
use crate::kernel;
use crate::scene::SceneState;

/// A plenoxel renderer: CPU and GPU variants implement the same contract
/// and produce numerically equivalent images (up to float evaluation
/// order on the device).
pub trait Renderer {
    /// Inverts and stores the world-view matrix. Fails on a singular
    /// matrix.
    fn set_world_view_matrix(&mut self, mat: Matrix4<f32>) -> Result<()>;

    /// Inverts and stores the world-view-projection matrix. Fails on a
    /// singular matrix.
    fn set_world_view_proj_matrix(&mut self, mat: Matrix4<f32>) -> Result<()>;

    fn set_bounding_box(&mut self, min: Vector3<f32>, max: Vector3<f32>);

    fn set_fog_config(&mut self, fog: FogConfig);

    /// Renders the SH/grid emission-absorption model, one packed RGBA
    /// pixel per entry in row-major order.
    fn forward(&mut self, width: u32, height: u32) -> Result<Vec<u32>>;

    /// Renders the constant-fog reference model.
    fn ray_march(&mut self, width: u32, height: u32) -> Result<Vec<u32>>;

    /// Wall-clock timings of the last run of the named entry point
    /// ("Forward" or "RayMarch"): `[render_ms, upload_ms, readback_ms, 0]`.
    /// All zeros when the entry point has not run yet.
    fn execution_time(&self, name: &str) -> [f32; 4];
}

/// Last-run timings keyed by entry-point name.
pub(crate) struct ExecutionTimes {
    entries: Vec<(&'static str, [f32; 4])>,
}

impl ExecutionTimes {
    pub(crate) fn new() -> Self {
        ExecutionTimes {
            entries: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, name: &'static str, times: [f32; 4]) {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = times;
        } else {
            self.entries.push((name, times));
        }
    }

    pub(crate) fn get(&self, name: &str) -> [f32; 4] {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, t)| *t)
            .unwrap_or([0.0; 4])
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> f32 {
    start.elapsed().as_secs_f32() * 1000.0
}

/// Runs a per-pixel kernel over the image, rows in parallel. Every pixel
/// reads the same immutable scene and writes a disjoint output slot.
pub(crate) fn render_rows(
    scene: &SceneState,
    width: u32,
    height: u32,
    pixel_fn: fn(&SceneState, u32, u32, u32, u32) -> u32,
) -> Vec<u32> {
    let mut out_color = vec![0u32; (width * height) as usize];

    out_color
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, pixel) in row.iter_mut().enumerate() {
                *pixel = pixel_fn(scene, x as u32, y as u32, width, height);
            }
        });

    out_color
}

pub struct CpuRenderer {
    scene: SceneState,
    times: ExecutionTimes,
}

impl CpuRenderer {
    pub fn new(grid: Arc<PlenoxelGrid>) -> Self {
        CpuRenderer {
            scene: SceneState::new(grid),
            times: ExecutionTimes::new(),
        }
    }

    fn render(
        &mut self,
        name: &'static str,
        width: u32,
        height: u32,
        pixel_fn: fn(&SceneState, u32, u32, u32, u32) -> u32,
    ) -> Vec<u32> {
        let scene = self.scene.clone();
        let start = Instant::now();
        let out_color = render_rows(&scene, width, height, pixel_fn);
        self.times.record(name, [elapsed_ms(start), 0.0, 0.0, 0.0]);
        out_color
    }
}

impl Renderer for CpuRenderer {
    fn set_world_view_matrix(&mut self, mat: Matrix4<f32>) -> Result<()> {
        self.scene.set_world_view_matrix(mat)
    }

    fn set_world_view_proj_matrix(&mut self, mat: Matrix4<f32>) -> Result<()> {
        self.scene.set_world_view_proj_matrix(mat)
    }

    fn set_bounding_box(&mut self, min: Vector3<f32>, max: Vector3<f32>) {
        self.scene.set_bounding_box(min, max);
    }

    fn set_fog_config(&mut self, fog: FogConfig) {
        self.scene.set_fog_config(fog);
    }

    fn forward(&mut self, width: u32, height: u32) -> Result<Vec<u32>> {
        Ok(self.render("Forward", width, height, kernel::forward_pixel))
    }

    fn ray_march(&mut self, width: u32, height: u32) -> Result<Vec<u32>> {
        Ok(self.render("RayMarch", width, height, kernel::fog_pixel))
    }

    fn execution_time(&self, name: &str) -> [f32; 4] {
        self.times.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SH_WIDTH;
    use cgmath::{Deg, Point3};

    /// 2^3 grid of fully dense voxels with flat 0.1 SH coefficients, the
    /// camera on the +z side looking straight at the box center.
    fn head_on_renderer() -> CpuRenderer {
        let size = 2;
        let mut grid = PlenoxelGrid::new(size);
        for z in 0..size {
            for y in 0..size {
                for x in 0..size {
                    let voxel = grid.voxel_mut(x, y, z);
                    voxel.density = 1.0;
                    voxel.sh_r = [0.1; SH_WIDTH];
                    voxel.sh_g = [0.1; SH_WIDTH];
                    voxel.sh_b = [0.1; SH_WIDTH];
                }
            }
        }

        let mut renderer = CpuRenderer::new(Arc::new(grid));
        renderer
            .set_world_view_matrix(Matrix4::look_at_rh(
                Point3::new(0.5, 0.5, 2.0),
                Point3::new(0.5, 0.5, 0.5),
                Vector3::unit_y(),
            ))
            .unwrap();
        renderer
            .set_world_view_proj_matrix(cgmath::perspective(Deg(90.0), 1.0, 0.1, 100.0))
            .unwrap();
        renderer.set_bounding_box(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
        renderer
    }

    #[test]
    fn central_pixel_hits_and_corners_are_background() {
        let mut renderer = head_on_renderer();
        let (width, height) = (9u32, 9u32);

        let pixels = renderer.forward(width, height).unwrap();
        assert_eq!(pixels.len(), (width * height) as usize);

        let center = pixels[(height / 2 * width + width / 2) as usize];
        assert_eq!(center >> 24, 255, "central pixel should be opaque");
        assert_ne!(center & 0x00ff_ffff, 0, "central pixel should have color");

        for corner in [
            pixels[0],
            pixels[(width - 1) as usize],
            pixels[((height - 1) * width) as usize],
            pixels[(height * width - 1) as usize],
        ] {
            assert_eq!(corner, 0, "rays missing the box must stay background");
        }
    }

    #[test]
    fn ray_march_lights_the_center_with_fog() {
        let mut renderer = head_on_renderer();
        renderer.set_fog_config(FogConfig {
            step_size: 0.01,
            opacity: 0.01,
        });

        let (width, height) = (9u32, 9u32);
        let pixels = renderer.ray_march(width, height).unwrap();

        let center = pixels[(height / 2 * width + width / 2) as usize];
        // Yellow fog: red and green match, blue and alpha stay empty.
        assert_ne!(center & 0xff, 0);
        assert_eq!(center & 0xff, (center >> 8) & 0xff);
        assert_eq!(center >> 16, 0);

        assert_eq!(pixels[0], 0);
    }

    #[test]
    fn execution_time_is_recorded_per_entry_point() {
        let mut renderer = head_on_renderer();
        assert_eq!(renderer.execution_time("Forward"), [0.0; 4]);

        renderer.forward(4, 4).unwrap();
        assert!(renderer.execution_time("Forward")[0] >= 0.0);
        assert_eq!(renderer.execution_time("RayMarch"), [0.0; 4]);

        renderer.ray_march(4, 4).unwrap();
        assert!(renderer.execution_time("RayMarch")[0] >= 0.0);
    }
}
