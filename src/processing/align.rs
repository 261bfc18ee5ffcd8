// SPDX-License-Identifier: GPL-3.0-only

//! Depth-to-stream alignment
//!
//! Reprojects each depth pixel into a target stream's image so the output
//! has the target's resolution with depth values in the original units.
//! Both corners of every depth pixel are projected and the covered target
//! rectangle is filled; where several depth pixels land on the same target
//! pixel the nearest one wins.

use crate::backends::camera::types::{Extrinsics, Intrinsics, image_len};
use crate::processing::geometry::{
    deproject_pixel_to_point, project_point_to_pixel, transform_point,
};

/// Align a Z16 depth image to a target stream
///
/// `depth` is row-major `depth_intrinsics.width × height`; the result is
/// row-major `target.width × target.height`, zero where no depth landed.
pub fn align_depth_to_stream(
    depth: &[u16],
    depth_intrinsics: &Intrinsics,
    depth_scale: f32,
    target: &Intrinsics,
    depth_to_target: &Extrinsics,
) -> Vec<u16> {
    let tw = target.width as i64;
    let th = target.height as i64;
    let mut aligned = vec![0u16; image_len(target.width, target.height, 1).unwrap_or(0)];
    let width = depth_intrinsics.width as usize;

    let project = |x: f32, y: f32, meters: f32| -> [i64; 2] {
        let point = deproject_pixel_to_point(depth_intrinsics, [x, y], meters);
        let pixel = project_point_to_pixel(target, transform_point(depth_to_target, point));
        // Truncation toward zero, so corners just left of the image still land on it
        [(pixel[0] + 0.5) as i64, (pixel[1] + 0.5) as i64]
    };

    for (i, &raw) in depth.iter().enumerate() {
        if raw == 0 || width == 0 {
            continue;
        }
        let x = (i % width) as f32;
        let y = (i / width) as f32;
        let meters = f32::from(raw) * depth_scale;

        let [x0, y0] = project(x - 0.5, y - 0.5, meters);
        let [x1, y1] = project(x + 0.5, y + 0.5, meters);
        if x0 < 0 || y0 < 0 || x1 >= tw || y1 >= th {
            continue;
        }

        for ty in y0..=y1 {
            for tx in x0..=x1 {
                let slot = &mut aligned[(ty * tw + tx) as usize];
                *slot = if *slot == 0 { raw } else { (*slot).min(raw) };
            }
        }
    }

    aligned
}
