use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cgmath::{Deg, Matrix4, Point3, Vector3};

use plenoxels::{CpuRenderer, GpuRenderer, PlenoxelGrid, Renderer};

const IMAGE_DIM: u32 = 256;
const NUM_CAMERAS: u32 = 7;

struct Options {
    use_gpu: bool,
    fog: bool,
    grid_size: usize,
    grid_file: Option<String>,
}

fn parse_args() -> Result<Options> {
    let mut options = Options {
        use_gpu: false,
        fog: false,
        grid_size: 128,
        grid_file: None,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--gpu" => options.use_gpu = true,
            "--fog" => options.fog = true,
            "--grid-size" => {
                let value = args.next().context("--grid-size needs a value")?;
                options.grid_size = value
                    .parse()
                    .with_context(|| format!("bad grid size {value:?}"))?;
            }
            _ if arg.starts_with('-') => bail!("unknown option {arg:?}"),
            _ if options.grid_file.is_none() => options.grid_file = Some(arg),
            _ => bail!("unexpected argument {arg:?}"),
        }
    }
    Ok(options)
}

/// Orbit camera `i` of `n`: the eye circles the grid at a fixed elevation,
/// with the grid recentered on the origin.
fn orbit_view(i: u32, n: u32) -> Matrix4<f32> {
    let look_at = Matrix4::look_at_rh(
        Point3::new(0.0, 0.0, 1.3),
        Point3::new(0.0, 0.0, 0.0),
        Vector3::unit_y(),
    );
    let spin = Matrix4::from_angle_y(Deg(-360.0 / n as f32 * i as f32));
    let recenter = Matrix4::from_translation(Vector3::new(-0.5, -0.5, -0.5));

    look_at * spin * recenter
}

fn main() -> Result<()> {
    env_logger::init();
    let options = parse_args()?;

    let mut grid = PlenoxelGrid::new(options.grid_size);
    if let Some(path) = &options.grid_file {
        grid.load(path)?;
        log::info!("loaded {}^3 grid from {path}", options.grid_size);
    }
    let grid = Arc::new(grid);

    let (mut renderer, tag): (Box<dyn Renderer>, &str) = if options.use_gpu {
        (Box::new(GpuRenderer::new(grid)?), "gpu")
    } else {
        (Box::new(CpuRenderer::new(grid)), "cpu")
    };

    renderer.set_bounding_box(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
    renderer.set_world_view_proj_matrix(cgmath::perspective(Deg(45.0), 1.0, 0.1, 100.0))?;

    let entry = if options.fog { "RayMarch" } else { "Forward" };
    for i in 0..NUM_CAMERAS {
        renderer.set_world_view_matrix(orbit_view(i, NUM_CAMERAS))?;

        let pixels = if options.fog {
            renderer.ray_march(IMAGE_DIM, IMAGE_DIM)?
        } else {
            renderer.forward(IMAGE_DIM, IMAGE_DIM)?
        };

        let path = format!("out_{tag}_{i}.png");
        image::save_buffer(
            &path,
            bytemuck::cast_slice(&pixels),
            IMAGE_DIM,
            IMAGE_DIM,
            image::ExtendedColorType::Rgba8,
        )
        .with_context(|| format!("failed to write {path}"))?;

        let times = renderer.execution_time(entry);
        log::info!(
            "img no. = {i}, timeRender = {} ms, timeCopy = {} ms, saved {path}",
            times[0],
            times[2],
        );
    }

    Ok(())
}
