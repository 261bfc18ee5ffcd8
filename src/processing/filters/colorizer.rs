// SPDX-License-Identifier: GPL-3.0-only

//! Depth colorization
//!
//! Replaces raw depth with an RGB rendering. The frame keeps its DEPTH key,
//! so downstream it publishes on the depth topic with the color encoding.

use super::{FrameFilter, malformed};
use crate::backends::camera::format_converters::{ColorizerOptions, depth_to_rgb, z16_from_bytes};
use crate::backends::camera::types::{FrameSet, PixelFormat, StreamType};
use crate::errors::ProcessingError;

#[derive(Debug, Clone, Copy, Default)]
pub struct Colorizer {
    pub options: ColorizerOptions,
}

impl FrameFilter for Colorizer {
    fn process(&mut self, frames: FrameSet) -> Result<FrameSet, ProcessingError> {
        let mut out = Vec::with_capacity(frames.len());
        for frame in frames.into_frames() {
            if frame.key.stream != StreamType::Depth || frame.format != PixelFormat::Z16 {
                out.push(frame);
                continue;
            }
            let pixels = frame
                .pixels()
                .ok_or_else(|| malformed(&frame, "no pixel payload"))?;
            let rgb = depth_to_rgb(&z16_from_bytes(pixels), &self.options);
            out.push(frame.with_pixels(PixelFormat::Rgb8, frame.width, frame.height, rgb));
        }
        Ok(FrameSet::new(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::format_converters::z16_to_bytes;
    use crate::backends::camera::types::{DEPTH, Frame};

    #[test]
    fn test_replaces_depth_with_rgb() {
        let frame = Frame::video(DEPTH, PixelFormat::Z16, 2, 1, z16_to_bytes(&[0, 1000]), 3.0, 9);
        let out = Colorizer::default()
            .process(FrameSet::new(vec![frame]))
            .expect("process");
        assert_eq!(out.len(), 1);
        let frame = out.get(DEPTH).expect("depth");
        assert_eq!(frame.format, PixelFormat::Rgb8);
        assert_eq!(frame.frame_number, 9);
        let rgb = frame.pixels().expect("pixels");
        assert_eq!(rgb.len(), 6);
        assert_eq!(&rgb[..3], &[0, 0, 0]);
        assert!(out.raw_depth().is_none());
    }
}
