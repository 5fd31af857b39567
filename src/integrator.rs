use cgmath::{Vector3, Vector4};

use crate::grid::PlenoxelGrid;
use crate::sh::eval_sh;

/// March stops once this little light would still make it through.
pub const TRANSMITTANCE_FLOOR: f32 = 0.1;

const ALPHA_FLOOR: f32 = 0.01;

/// Tunables for the constant-fog reference path. The source variants
/// disagree on both values (0.005-0.025 opacity, fixed or 1/gridSize
/// step), so they are configuration rather than constants.
#[derive(Copy, Clone, Debug)]
pub struct FogConfig {
    pub step_size: f32,
    pub opacity: f32,
}

impl Default for FogConfig {
    fn default() -> Self {
        FogConfig {
            step_size: 0.01,
            opacity: 0.01,
        }
    }
}

/// Emission/absorption integral along `[t_near, t_far]` in fixed steps of
/// `1/gridSize`. Transmittance starts at 1 and decays by `exp(-sigma*dt)`
/// per step; each step contributes the SH color weighted by the light
/// absorbed in that step. The result is clamped to `[0,1]` per channel.
pub fn volumetric_rendering(
    grid: &PlenoxelGrid,
    origin: Vector3<f32>,
    dir: Vector3<f32>,
    t_near: f32,
    t_far: f32,
) -> Vector3<f32> {
    let mut color = Vector3::new(0.0, 0.0, 0.0);
    let mut transmittance = 1.0f32;
    let mut t = t_near;

    let delta = 1.0 / grid.size() as f32;

    while t < t_far && transmittance > TRANSMITTANCE_FLOOR {
        let sample = grid.sample(origin + dir * t);

        let sigma = sample.density.max(0.0);

        let r = eval_sh(&sample.sh_r, dir).clamp(0.0, 1.0);
        let g = eval_sh(&sample.sh_g, dir).clamp(0.0, 1.0);
        let b = eval_sh(&sample.sh_b, dir).clamp(0.0, 1.0);

        let absorbed = (-sigma * delta).exp();
        color += Vector3::new(r, g, b) * (transmittance * (1.0 - absorbed));
        transmittance *= absorbed;

        t += delta;
    }

    Vector3::new(
        color.x.clamp(0.0, 1.0),
        color.y.clamp(0.0, 1.0),
        color.z.clamp(0.0, 1.0),
    )
}

/// Grid-free reference path: uniform yellow fog with a fixed per-step
/// opacity. Exists to validate the ray/box/compositing plumbing
/// independently of SH and grid sampling.
pub fn ray_march_constant_fog(fog: FogConfig, t_near: f32, t_far: f32) -> Vector4<f32> {
    let mut color = Vector4::new(0.0, 0.0, 0.0, 0.0);
    let mut alpha = 1.0f32;
    let mut t = t_near;

    while t < t_far && alpha > ALPHA_FLOOR {
        let a = fog.opacity;
        color += Vector4::new(1.0, 1.0, 0.0, 0.0) * (a * alpha);
        alpha *= 1.0 - a;
        t += fog.step_size;
    }

    color
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cgmath::InnerSpace;

    fn uniform_grid(size: usize, density: f32) -> PlenoxelGrid {
        let mut grid = PlenoxelGrid::new(size);
        for z in 0..size {
            for y in 0..size {
                for x in 0..size {
                    grid.voxel_mut(x, y, z).density = density;
                }
            }
        }
        grid
    }

    #[test]
    fn color_grows_with_the_integration_interval() {
        let grid = uniform_grid(4, 0.5);
        let origin = Vector3::new(0.5, 0.5, 2.0);
        let dir = Vector3::new(0.0, 0.0, -1.0);

        let short = volumetric_rendering(&grid, origin, dir, 1.0, 1.5);
        let long = volumetric_rendering(&grid, origin, dir, 1.0, 2.0);

        assert!(long.x >= short.x && long.y >= short.y && long.z >= short.z);
        for c in [long.x, long.y, long.z, short.x, short.y, short.z] {
            assert!((0.0..=1.0).contains(&c));
        }
    }

    #[test]
    fn negative_density_contributes_nothing() {
        let grid = uniform_grid(4, -5.0);
        let origin = Vector3::new(0.5, 0.5, 2.0);
        let dir = Vector3::new(0.0, 0.0, -1.0);

        let color = volumetric_rendering(&grid, origin, dir, 1.0, 2.0);
        assert_relative_eq!(color.x, 0.0);
        assert_relative_eq!(color.y, 0.0);
        assert_relative_eq!(color.z, 0.0);
    }

    #[test]
    fn opaque_grid_saturates_and_terminates_early() {
        let grid = uniform_grid(8, 1.0e4);
        let origin = Vector3::new(0.5, 0.5, 2.0);
        let dir = Vector3::new(0.1, 0.05, -1.0).normalize();

        let color = volumetric_rendering(&grid, origin, dir, 1.0, 100.0);
        // One fully absorbing step: the color is the SH color of the first
        // sample, already inside [0,1].
        for c in [color.x, color.y, color.z] {
            assert!((0.0..=1.0).contains(&c));
        }
        assert!(color.x > 0.0);
    }

    #[test]
    fn fog_matches_the_geometric_series_closed_form() {
        let fog = FogConfig {
            step_size: 0.05,
            opacity: 0.01,
        };

        // 12 steps over [0.2, 0.8): R = 1 - (1 - a)^12.
        let color = ray_march_constant_fog(fog, 0.2, 0.8);
        assert_relative_eq!(color.x, 0.113615, epsilon = 1e-4);
        assert_relative_eq!(color.y, color.x);
        assert_relative_eq!(color.z, 0.0);
        assert_relative_eq!(color.w, 0.0);
    }

    #[test]
    fn fog_stops_at_the_alpha_floor() {
        let fog = FogConfig {
            step_size: 0.01,
            opacity: 0.5,
        };

        // Alpha halves per step and the loop exits once it reaches 2^-7,
        // so the accumulated color is 1 - 2^-7 regardless of t_far.
        let color = ray_march_constant_fog(fog, 0.0, 1.0e6);
        assert_relative_eq!(color.x, 1.0 - 0.5f32.powi(7), epsilon = 1e-6);
    }
}
