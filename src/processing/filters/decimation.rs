// SPDX-License-Identifier: GPL-3.0-only

//! Resolution reduction by block median

use super::{FrameFilter, depth_samples, is_depth_domain, with_depth_samples};
use crate::backends::camera::types::FrameSet;
use crate::constants::filters;
use crate::errors::ProcessingError;

#[derive(Debug, Clone, Copy)]
pub struct DecimationFilter {
    pub factor: u32,
}

impl Default for DecimationFilter {
    fn default() -> Self {
        Self {
            factor: filters::DECIMATION_FACTOR,
        }
    }
}

impl DecimationFilter {
    /// Downsample `values` (width × height); each output pixel is the median
    /// of the non-zero samples in its block, or zero if there are none
    pub(crate) fn decimate(&self, values: &[f32], width: u32, height: u32) -> (Vec<f32>, u32, u32) {
        let factor = self.factor.max(1);
        let out_w = (width / factor).max(1);
        let out_h = (height / factor).max(1);
        let mut out = Vec::with_capacity((out_w * out_h) as usize);
        let mut block = Vec::with_capacity((factor * factor) as usize);

        for oy in 0..out_h {
            for ox in 0..out_w {
                block.clear();
                for y in (oy * factor)..((oy + 1) * factor).min(height) {
                    for x in (ox * factor)..((ox + 1) * factor).min(width) {
                        let v = values[(y * width + x) as usize];
                        if v > 0.0 {
                            block.push(v);
                        }
                    }
                }
                if block.is_empty() {
                    out.push(0.0);
                } else {
                    block.sort_by(|a, b| a.total_cmp(b));
                    out.push(block[block.len() / 2]);
                }
            }
        }
        (out, out_w, out_h)
    }
}

impl FrameFilter for DecimationFilter {
    fn process(&mut self, frames: FrameSet) -> Result<FrameSet, ProcessingError> {
        let mut out = Vec::with_capacity(frames.len());
        for frame in frames.into_frames() {
            if !is_depth_domain(&frame) || self.factor <= 1 {
                out.push(frame);
                continue;
            }
            let values = depth_samples(&frame)?;
            let (decimated, width, height) = self.decimate(&values, frame.width, frame.height);
            out.push(with_depth_samples(
                &frame,
                frame.format,
                width,
                height,
                &decimated,
            ));
        }
        Ok(FrameSet::new(out))
    }
}
