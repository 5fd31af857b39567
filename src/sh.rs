use cgmath::Vector3;

use crate::SH_WIDTH;

/// Order-2 real spherical harmonic basis evaluated at a unit direction.
/// Closed-form expansion with constants from Mitsuba 3.
pub fn sh_eval_2(d: Vector3<f32>) -> [f32; SH_WIDTH] {
    let (x, y, z) = (d.x, d.y, d.z);
    let z2 = z * z;

    let mut out = [0.0f32; SH_WIDTH];
    out[0] = 0.28209479177387814;
    out[2] = z * 0.48860251190291992;
    out[6] = z2 * 0.94617469575756008 - 0.31539156525252005;

    let c0 = x;
    let s0 = y;

    let tmp_a = -0.48860251190291998;
    out[3] = tmp_a * c0;
    out[1] = tmp_a * s0;

    let tmp_b = z * -1.09254843059207896;
    out[7] = tmp_b * c0;
    out[5] = tmp_b * s0;

    let c1 = x * c0 - y * s0;
    let s1 = x * s0 + y * c0;

    let tmp_c = 0.54627421529603948;
    out[8] = tmp_c * c1;
    out[4] = tmp_c * s1;

    out
}

/// Radiance for one color channel: dot product of the stored coefficients
/// with the basis evaluated at the ray direction.
pub fn eval_sh(coeffs: &[f32; SH_WIDTH], ray_dir: Vector3<f32>) -> f32 {
    let basis = sh_eval_2(ray_dir);

    let mut sum = 0.0f32;
    for i in 0..SH_WIDTH {
        sum += coeffs[i] * basis[i];
    }
    sum
}
