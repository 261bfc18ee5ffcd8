// SPDX-License-Identifier: GPL-3.0-only

//! Edge-preserving spatial smoothing
//!
//! A recursive exponential filter run along rows (both directions) and then
//! along columns (both directions). Neighbors further apart than the edge
//! threshold are not blended, and holes (zero) are never filled.

use super::{FrameFilter, delta_for, depth_samples, is_depth_domain, with_depth_samples};
use crate::backends::camera::types::FrameSet;
use crate::constants::filters;
use crate::errors::ProcessingError;

#[derive(Debug, Clone, Copy)]
pub struct SpatialFilter {
    pub alpha: f32,
    pub delta: f32,
    pub iterations: u32,
}

impl Default for SpatialFilter {
    fn default() -> Self {
        Self {
            alpha: filters::SPATIAL_ALPHA,
            delta: filters::SPATIAL_DELTA,
            iterations: filters::SPATIAL_ITERATIONS,
        }
    }
}

/// One recursive pass over `len` samples spaced `stride` apart
fn smooth_line(values: &mut [f32], start: usize, stride: usize, len: usize, alpha: f32, delta: f32) {
    let idx = |i: usize| start + i * stride;
    for i in 1..len {
        let prev = values[idx(i - 1)];
        let cur = values[idx(i)];
        if prev > 0.0 && cur > 0.0 && (cur - prev).abs() < delta {
            values[idx(i)] = alpha * cur + (1.0 - alpha) * prev;
        }
    }
    for i in (0..len.saturating_sub(1)).rev() {
        let next = values[idx(i + 1)];
        let cur = values[idx(i)];
        if next > 0.0 && cur > 0.0 && (cur - next).abs() < delta {
            values[idx(i)] = alpha * cur + (1.0 - alpha) * next;
        }
    }
}

impl SpatialFilter {
    pub(crate) fn smooth(&self, values: &mut [f32], width: usize, height: usize, delta: f32) {
        for _ in 0..self.iterations {
            for row in 0..height {
                smooth_line(values, row * width, 1, width, self.alpha, delta);
            }
            for col in 0..width {
                smooth_line(values, col, width, height, self.alpha, delta);
            }
        }
    }
}

impl FrameFilter for SpatialFilter {
    fn process(&mut self, frames: FrameSet) -> Result<FrameSet, ProcessingError> {
        let mut out = Vec::with_capacity(frames.len());
        for frame in frames.into_frames() {
            if !is_depth_domain(&frame) {
                out.push(frame);
                continue;
            }
            let mut values = depth_samples(&frame)?;
            self.smooth(
                &mut values,
                frame.width as usize,
                frame.height as usize,
                delta_for(frame.format, self.delta),
            );
            out.push(with_depth_samples(
                &frame,
                frame.format,
                frame.width,
                frame.height,
                &values,
            ));
        }
        Ok(FrameSet::new(out))
    }
}
