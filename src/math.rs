use cgmath::{InnerSpace, Matrix4, Vector3, Vector4};

/// World-space direction of the eye ray through a normalized pixel center
/// `(u, v)`, via the inverse view-projection matrix. Degenerate matrices
/// produce NaN directions; callers get what they asked for.
pub fn eye_ray_dir(u: f32, v: f32, view_proj_inv: Matrix4<f32>) -> Vector3<f32> {
    let pos = Vector4::new(2.0 * u - 1.0, 2.0 * v - 1.0, 0.0, 1.0);
    let pos = view_proj_inv * pos;
    let pos = pos / pos.w;
    pos.truncate().normalize()
}

/// Moves a camera-local ray into world space: positions transform with
/// `w = 1`, directions with `w = 0` (no translation) and are renormalized.
pub fn transform_ray(
    world_view_inv: Matrix4<f32>,
    ray_pos: &mut Vector3<f32>,
    ray_dir: &mut Vector3<f32>,
) {
    let pos = world_view_inv * ray_pos.extend(1.0);
    let dir = world_view_inv * ray_dir.extend(0.0);

    *ray_pos = pos.truncate();
    *ray_dir = dir.truncate().normalize();
}

/// Slab-method ray/AABB intersection, returning `(t_near, t_far)`.
///
/// Zero direction components divide to +-inf, which the running min/max
/// handles per IEEE-754. The ray misses when `t_near >= t_far`; the box
/// lies behind the origin when `t_near <= 0`. Callers check both.
pub fn ray_box_intersection(
    ray_pos: Vector3<f32>,
    ray_dir: Vector3<f32>,
    box_min: Vector3<f32>,
    box_max: Vector3<f32>,
) -> (f32, f32) {
    let inv_dir = Vector3::new(1.0 / ray_dir.x, 1.0 / ray_dir.y, 1.0 / ray_dir.z);

    let lo = inv_dir.x * (box_min.x - ray_pos.x);
    let hi = inv_dir.x * (box_max.x - ray_pos.x);

    let mut t_min = lo.min(hi);
    let mut t_max = lo.max(hi);

    let lo = inv_dir.y * (box_min.y - ray_pos.y);
    let hi = inv_dir.y * (box_max.y - ray_pos.y);

    t_min = t_min.max(lo.min(hi));
    t_max = t_max.min(lo.max(hi));

    let lo = inv_dir.z * (box_min.z - ray_pos.z);
    let hi = inv_dir.z * (box_max.z - ray_pos.z);

    t_min = t_min.max(lo.min(hi));
    t_max = t_max.min(lo.max(hi));

    (t_min, t_max)
}
