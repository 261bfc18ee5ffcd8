// SPDX-License-Identifier: GPL-3.0-only

//! Depth ⇄ disparity transform
//!
//! `disparity_px = focal_px * baseline_m / (raw * depth_units)`. Going back
//! is the same reciprocal: `raw = focal_px * baseline_m / (disparity_px * depth_units)`.
//! Zero stays zero in both directions.

use super::{FrameFilter, depth_samples, is_depth_domain, with_depth_samples};
use crate::backends::camera::types::{FrameSet, PixelFormat};
use crate::errors::ProcessingError;

#[derive(Debug, Clone, Copy)]
pub struct DisparityTransform {
    source: PixelFormat,
    target: PixelFormat,
    focal_baseline: f32,
    depth_units: f32,
}

impl DisparityTransform {
    /// Z16 depth → 32-bit disparity
    pub fn to_disparity(focal_baseline: f32, depth_units: f32) -> Self {
        Self {
            source: PixelFormat::Z16,
            target: PixelFormat::Disparity32,
            focal_baseline,
            depth_units,
        }
    }

    /// 32-bit disparity → Z16 depth
    pub fn to_depth(focal_baseline: f32, depth_units: f32) -> Self {
        Self {
            source: PixelFormat::Disparity32,
            target: PixelFormat::Z16,
            focal_baseline,
            depth_units,
        }
    }

    fn convert(&self, value: f32) -> f32 {
        if value <= 0.0 || self.depth_units <= 0.0 {
            return 0.0;
        }
        self.focal_baseline / (value * self.depth_units)
    }
}

impl FrameFilter for DisparityTransform {
    fn process(&mut self, frames: FrameSet) -> Result<FrameSet, ProcessingError> {
        let mut out = Vec::with_capacity(frames.len());
        for frame in frames.into_frames() {
            if !is_depth_domain(&frame) || frame.format != self.source {
                out.push(frame);
                continue;
            }
            let converted: Vec<f32> = depth_samples(&frame)?
                .into_iter()
                .map(|v| self.convert(v))
                .collect();
            out.push(with_depth_samples(
                &frame,
                self.target,
                frame.width,
                frame.height,
                &converted,
            ));
        }
        Ok(FrameSet::new(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::format_converters::{f32_from_bytes, z16_from_bytes, z16_to_bytes};
    use crate::backends::camera::types::{DEPTH, Frame, INFRA1};

    #[test]
    fn test_depth_to_disparity_and_back() {
        // 600 px focal, 5 cm baseline, millimeter units
        let focal_baseline = 600.0 * 0.05;
        let depth = Frame::video(
            DEPTH,
            PixelFormat::Z16,
            3,
            1,
            z16_to_bytes(&[0, 1000, 2000]),
            0.0,
            1,
        );
        let mut forward = DisparityTransform::to_disparity(focal_baseline, 0.001);
        let set = forward.process(FrameSet::new(vec![depth])).expect("forward");
        let disparity = set.get(DEPTH).expect("depth frame");
        assert_eq!(disparity.format, PixelFormat::Disparity32);
        let values = f32_from_bytes(disparity.pixels().expect("pixels"));
        assert_eq!(values[0], 0.0);
        assert!((values[1] - 30.0).abs() < 1e-4);
        assert!((values[2] - 15.0).abs() < 1e-4);

        let mut backward = DisparityTransform::to_depth(focal_baseline, 0.001);
        let set = backward.process(set).expect("backward");
        let depth = set.get(DEPTH).expect("depth frame");
        assert_eq!(depth.format, PixelFormat::Z16);
        assert_eq!(z16_from_bytes(depth.pixels().expect("pixels")), vec![0, 1000, 2000]);
    }

    #[test]
    fn test_other_streams_untouched() {
        let ir = Frame::video(INFRA1, PixelFormat::Y8, 2, 1, vec![7u8, 9], 0.0, 1);
        let mut forward = DisparityTransform::to_disparity(30.0, 0.001);
        let set = forward.process(FrameSet::new(vec![ir])).expect("process");
        let frame = set.get(INFRA1).expect("infra1");
        assert_eq!(frame.format, PixelFormat::Y8);
        assert_eq!(frame.pixels(), Some(&[7u8, 9][..]));
    }
}
