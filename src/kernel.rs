use cgmath::{Vector3, Vector4};

use crate::integrator::{ray_march_constant_fog, volumetric_rendering};
use crate::math::{eye_ray_dir, ray_box_intersection, transform_ray};
use crate::scene::SceneState;

/// Packs normalized RGBA into `R | G<<8 | B<<16 | A<<24`, truncating each
/// channel. Assumes channels were clamped upstream; unclamped input maps
/// through Rust's saturating float-to-int cast instead of wrapping.
pub fn pack_color(color: Vector4<f32>) -> u32 {
    let r = (color.x * 255.0) as u32;
    let g = (color.y * 255.0) as u32;
    let b = (color.z * 255.0) as u32;
    let a = (color.w * 255.0) as u32;

    r | (g << 8) | (b << 16) | (a << 24)
}

fn primary_ray(scene: &SceneState, x: u32, y: u32, width: u32, height: u32) -> (Vector3<f32>, Vector3<f32>) {
    let u = (x as f32 + 0.5) / width as f32;
    let v = (y as f32 + 0.5) / height as f32;

    let mut ray_dir = eye_ray_dir(u, v, scene.world_view_proj_inv);
    let mut ray_pos = Vector3::new(0.0, 0.0, 0.0);
    transform_ray(scene.world_view_inv, &mut ray_pos, &mut ray_dir);

    (ray_pos, ray_dir)
}

/// One pixel of the SH/grid model: build the ray, clip it against the
/// scene bounding box, integrate if it hits, pack. Misses are transparent
/// black; hits are fully opaque.
pub fn forward_pixel(scene: &SceneState, x: u32, y: u32, width: u32, height: u32) -> u32 {
    let (ray_pos, ray_dir) = primary_ray(scene, x, y, width, height);

    let (t_near, t_far) = ray_box_intersection(
        ray_pos,
        ray_dir,
        scene.bounding_box.min,
        scene.bounding_box.max,
    );

    let mut color = Vector4::new(0.0, 0.0, 0.0, 0.0);
    if t_near < t_far && t_near > 0.0 {
        color = volumetric_rendering(&scene.grid, ray_pos, ray_dir, t_near, t_far).extend(1.0);
    }

    pack_color(color)
}

/// One pixel of the constant-fog reference model; same plumbing, no grid.
pub fn fog_pixel(scene: &SceneState, x: u32, y: u32, width: u32, height: u32) -> u32 {
    let (ray_pos, ray_dir) = primary_ray(scene, x, y, width, height);

    let (t_near, t_far) = ray_box_intersection(
        ray_pos,
        ray_dir,
        scene.bounding_box.min,
        scene.bounding_box.max,
    );

    let mut color = Vector4::new(0.0, 0.0, 0.0, 0.0);
    if t_near < t_far && t_near > 0.0 {
        color = ray_march_constant_fog(scene.fog, t_near, t_far);
    }

    pack_color(color)
}
