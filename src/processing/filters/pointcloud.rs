// SPDX-License-Identifier: GPL-3.0-only

//! Point-cloud generation
//!
//! Deprojects the raw depth frame into 3-D vertices and maps each vertex
//! into the texture stream to get its (u, v) coordinate. The resulting
//! points frame is appended to the set under the DEPTH key.

use super::{FilterContext, FrameFilter, malformed};
use crate::backends::camera::format_converters::z16_from_bytes;
use crate::backends::camera::types::{
    DEPTH, Extrinsics, Frame, FrameData, FrameSet, Intrinsics, PixelFormat, PointSet, StreamKey,
    image_len,
};
use crate::errors::ProcessingError;
use crate::processing::geometry::{
    deproject_pixel_to_point, project_point_to_pixel, transform_point,
};
use std::sync::Arc;
use tracing::debug;

/// Texture coordinate given to vertices without depth
pub const INVALID_TEX_COORD: [f32; 2] = [-1.0, -1.0];

#[derive(Debug, Clone)]
pub struct PointCloudFilter {
    depth_scale: f32,
    depth_intrinsics: Option<Intrinsics>,
    texture: Option<(StreamKey, Intrinsics, Extrinsics)>,
}

impl PointCloudFilter {
    pub fn new(context: &FilterContext) -> Self {
        let texture = match (
            context.texture,
            context.texture_intrinsics,
            context.depth_to_texture,
        ) {
            (Some(key), Some(intrinsics), Some(extrinsics)) => Some((key, intrinsics, extrinsics)),
            _ => None,
        };
        Self {
            depth_scale: context.depth_scale,
            depth_intrinsics: context.depth_intrinsics,
            texture,
        }
    }

    fn compute(&self, depth: &Frame, frames: &FrameSet) -> Result<PointSet, ProcessingError> {
        let intrinsics = self
            .depth_intrinsics
            .ok_or(ProcessingError::MissingCalibration(depth.key))?
            .scaled_to(depth.width, depth.height);
        let pixels = depth
            .pixels()
            .ok_or_else(|| malformed(depth, "no pixel payload"))?;
        let samples = z16_from_bytes(pixels);
        let count = image_len(depth.width, depth.height, 1)
            .ok_or_else(|| malformed(depth, "frame size overflows"))?;
        if samples.len() < count {
            return Err(malformed(depth, "depth buffer shorter than frame"));
        }

        // The texture frame in this set decides the (u, v) normalization
        let texture = self.texture.map(|(key, intr, ext)| {
            let (w, h) = frames
                .get(key)
                .filter(|f| !f.is_points())
                .map(|f| (f.width, f.height))
                .unwrap_or((intr.width, intr.height));
            (intr.scaled_to(w, h), ext)
        });

        let mut points = PointSet {
            vertices: Vec::with_capacity(count),
            tex_coords: Vec::with_capacity(count),
        };
        for (i, &raw) in samples.iter().take(count).enumerate() {
            if raw == 0 {
                points.vertices.push([0.0; 3]);
                points.tex_coords.push(INVALID_TEX_COORD);
                continue;
            }
            let x = (i % depth.width as usize) as f32;
            let y = (i / depth.width as usize) as f32;
            let vertex =
                deproject_pixel_to_point(&intrinsics, [x, y], f32::from(raw) * self.depth_scale);
            let uv = match &texture {
                Some((tex, ext)) => {
                    let pixel = project_point_to_pixel(tex, transform_point(ext, vertex));
                    [pixel[0] / tex.width as f32, pixel[1] / tex.height as f32]
                }
                None => [0.0, 0.0],
            };
            points.vertices.push(vertex);
            points.tex_coords.push(uv);
        }
        Ok(points)
    }
}

impl FrameFilter for PointCloudFilter {
    fn process(&mut self, mut frames: FrameSet) -> Result<FrameSet, ProcessingError> {
        let Some(depth) = frames.raw_depth() else {
            debug!("No raw depth in frame set, skipping point cloud");
            return Ok(frames);
        };
        let points = self.compute(depth, &frames)?;
        let cloud = Frame {
            key: DEPTH,
            format: PixelFormat::Xyz32f,
            width: depth.width,
            height: depth.height,
            data: FrameData::Points(Arc::new(points)),
            ..depth.clone()
        };
        frames.push(cloud);
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::format_converters::z16_to_bytes;
    use crate::backends::camera::types::{COLOR, DistortionModel};

    fn intrinsics(width: u32, height: u32) -> Intrinsics {
        Intrinsics {
            width,
            height,
            ppx: width as f32 / 2.0,
            ppy: height as f32 / 2.0,
            fx: 100.0,
            fy: 100.0,
            model: DistortionModel::None,
            coeffs: [0.0; 5],
        }
    }

    fn context(texture: bool) -> FilterContext {
        let mut ctx = FilterContext::new(0.001);
        ctx.enable_pointcloud = true;
        ctx.depth_intrinsics = Some(intrinsics(2, 2));
        if texture {
            ctx.texture = Some(COLOR);
            ctx.texture_intrinsics = Some(intrinsics(2, 2));
            ctx.depth_to_texture = Some(Extrinsics::IDENTITY);
        }
        ctx
    }

    fn depth_set() -> FrameSet {
        FrameSet::new(vec![Frame::video(
            DEPTH,
            PixelFormat::Z16,
            2,
            2,
            z16_to_bytes(&[1000, 0, 2000, 1000]),
            12.0,
            4,
        )])
    }

    #[test]
    fn test_appends_points_frame() {
        let mut filter = PointCloudFilter::new(&context(true));
        let out = filter.process(depth_set()).expect("process");
        assert_eq!(out.len(), 2);
        let cloud = out.iter().find(|f| f.is_points()).expect("points frame");
        assert_eq!(cloud.key, DEPTH);
        assert_eq!(cloud.timestamp_ms, 12.0);
        let points = cloud.points().expect("points");
        assert_eq!(points.len(), 4);
        assert_eq!(points.vertices[1], [0.0; 3]);
        assert_eq!(points.tex_coords[1], INVALID_TEX_COORD);
        // Pixel (0, 0) at 1 m: one pixel left/up of the principal point
        assert!((points.vertices[0][0] + 0.01).abs() < 1e-6);
        assert!((points.vertices[0][2] - 1.0).abs() < 1e-6);
        // Identity extrinsics map each pixel onto itself
        assert!(points.tex_coords[0][0].abs() < 1e-6);
        assert!((points.tex_coords[3][0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_untextured_points_get_origin_uv() {
        let mut filter = PointCloudFilter::new(&context(false));
        let out = filter.process(depth_set()).expect("process");
        let points = out.iter().find_map(|f| f.points()).expect("points");
        assert_eq!(points.tex_coords[0], [0.0, 0.0]);
        assert_eq!(points.tex_coords[1], INVALID_TEX_COORD);
    }

    #[test]
    fn test_colorized_depth_is_skipped() {
        let colorized = Frame::video(DEPTH, PixelFormat::Rgb8, 1, 1, vec![1u8, 2, 3], 0.0, 1);
        let mut filter = PointCloudFilter::new(&context(true));
        let out = filter
            .process(FrameSet::new(vec![colorized]))
            .expect("process");
        assert_eq!(out.len(), 1);
        assert!(!out.iter().any(|f| f.is_points()));
    }
}
