use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use bytemuck::{Pod, Zeroable};
use cgmath::Vector3;

use crate::SH_WIDTH;

const DEFAULT_DENSITY: f32 = 0.01;
const DEFAULT_SH_COEFF: f32 = 0.1;

/// One voxel record: density plus per-channel spherical-harmonic
/// coefficients. The field order matches the flat on-disk layout
/// `[density, R_sh[0..9), G_sh[0..9), B_sh[0..9)]`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Plenoxel {
    pub density: f32,
    pub sh_r: [f32; SH_WIDTH],
    pub sh_g: [f32; SH_WIDTH],
    pub sh_b: [f32; SH_WIDTH],
}

impl Default for Plenoxel {
    fn default() -> Self {
        Plenoxel {
            density: DEFAULT_DENSITY,
            sh_r: [DEFAULT_SH_COEFF; SH_WIDTH],
            sh_g: [DEFAULT_SH_COEFF; SH_WIDTH],
            sh_b: [DEFAULT_SH_COEFF; SH_WIDTH],
        }
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + t * (b - a)
}

impl Plenoxel {
    /// Component-wise linear blend; density and every SH coefficient
    /// interpolate identically and independently.
    fn lerp(a: &Plenoxel, b: &Plenoxel, t: f32) -> Plenoxel {
        let mut out = Plenoxel {
            density: lerp(a.density, b.density, t),
            sh_r: [0.0; SH_WIDTH],
            sh_g: [0.0; SH_WIDTH],
            sh_b: [0.0; SH_WIDTH],
        };
        for i in 0..SH_WIDTH {
            out.sh_r[i] = lerp(a.sh_r[i], b.sh_r[i], t);
            out.sh_g[i] = lerp(a.sh_g[i], b.sh_g[i], t);
            out.sh_b[i] = lerp(a.sh_b[i], b.sh_b[i], t);
        }
        out
    }
}

/// Dense cubic voxel grid over the unit cube, `size^3` records in
/// row-major order with index `x + size*(y + size*z)`.
pub struct PlenoxelGrid {
    voxels: Vec<Plenoxel>,
    size: usize,
}

impl PlenoxelGrid {
    /// Allocates a `size^3` grid filled with the default record (a faint
    /// uniform haze, so an unloaded grid still renders something).
    pub fn new(size: usize) -> Self {
        PlenoxelGrid {
            voxels: vec![Plenoxel::default(); size * size * size],
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn voxels(&self) -> &[Plenoxel] {
        &self.voxels
    }

    pub fn voxel(&self, x: usize, y: usize, z: usize) -> &Plenoxel {
        &self.voxels[x + self.size * (y + self.size * z)]
    }

    pub fn voxel_mut(&mut self, x: usize, y: usize, z: usize) -> &mut Plenoxel {
        &mut self.voxels[x + self.size * (y + self.size * z)]
    }

    /// Bulk-loads a headerless little-endian binary blob of exactly
    /// `size^3 * 28` f32. A mis-sized file is an error rather than a
    /// silent partial load.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read grid file {}", path.display()))?;

        let expected = self.voxels.len() * std::mem::size_of::<Plenoxel>();
        ensure!(
            bytes.len() == expected,
            "grid file {} is {} bytes, expected {} ({}^3 records of {} floats)",
            path.display(),
            bytes.len(),
            expected,
            self.size,
            crate::PLENOXEL_SIZE,
        );

        let scalars: &mut [f32] = bytemuck::cast_slice_mut(&mut self.voxels);
        for (dst, chunk) in scalars.iter_mut().zip(bytes.chunks_exact(4)) {
            *dst = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(())
    }

    /// Trilinear interpolation at a point in `[0,1]^3`. Queries on or past
    /// the boundary clamp to the nearest valid voxel (clamp-to-edge), so
    /// out-of-domain points degrade instead of failing.
    pub fn sample(&self, point: Vector3<f32>) -> Plenoxel {
        let max = self.size as i32 - 1;
        let xyz = point * max as f32;

        let xyz0 = Vector3::new(xyz.x as i32, xyz.y as i32, xyz.z as i32);
        let xyz1 = xyz0 + Vector3::new(1, 1, 1);

        let xyz0 = Vector3::new(
            xyz0.x.clamp(0, max),
            xyz0.y.clamp(0, max),
            xyz0.z.clamp(0, max),
        );
        let xyz1 = Vector3::new(
            xyz1.x.clamp(0, max),
            xyz1.y.clamp(0, max),
            xyz1.z.clamp(0, max),
        );

        let w = Vector3::new(
            xyz.x - xyz0.x as f32,
            xyz.y - xyz0.y as f32,
            xyz.z - xyz0.z as f32,
        );

        let (x0, y0, z0) = (xyz0.x as usize, xyz0.y as usize, xyz0.z as usize);
        let (x1, y1, z1) = (xyz1.x as usize, xyz1.y as usize, xyz1.z as usize);

        let c000 = self.voxel(x0, y0, z0);
        let c100 = self.voxel(x1, y0, z0);
        let c010 = self.voxel(x0, y1, z0);
        let c110 = self.voxel(x1, y1, z0);
        let c001 = self.voxel(x0, y0, z1);
        let c101 = self.voxel(x1, y0, z1);
        let c011 = self.voxel(x0, y1, z1);
        let c111 = self.voxel(x1, y1, z1);

        let c00 = Plenoxel::lerp(c000, c100, w.x);
        let c10 = Plenoxel::lerp(c010, c110, w.x);
        let c01 = Plenoxel::lerp(c001, c101, w.x);
        let c11 = Plenoxel::lerp(c011, c111, w.x);

        let c0 = Plenoxel::lerp(&c00, &c10, w.y);
        let c1 = Plenoxel::lerp(&c01, &c11, w.y);

        Plenoxel::lerp(&c0, &c1, w.z)
    }
}
