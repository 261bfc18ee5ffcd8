// SPDX-License-Identifier: GPL-3.0-only

//! Temporal smoothing against the previous filtered frame

use super::{FrameFilter, delta_for, depth_samples, is_depth_domain, with_depth_samples};
use crate::backends::camera::types::{FrameSet, PixelFormat};
use crate::constants::filters;
use crate::errors::ProcessingError;

/// Last filtered output, reset when geometry or format changes
#[derive(Debug, Clone)]
struct History {
    width: u32,
    height: u32,
    format: PixelFormat,
    values: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct TemporalFilter {
    pub alpha: f32,
    pub delta: f32,
    history: Option<History>,
}

impl Default for TemporalFilter {
    fn default() -> Self {
        Self {
            alpha: filters::TEMPORAL_ALPHA,
            delta: filters::TEMPORAL_DELTA,
            history: None,
        }
    }
}

impl TemporalFilter {
    fn blend(&self, current: &mut [f32], previous: &[f32], delta: f32) {
        for (cur, &prev) in current.iter_mut().zip(previous) {
            if *cur > 0.0 && prev > 0.0 && (*cur - prev).abs() < delta {
                *cur = self.alpha * *cur + (1.0 - self.alpha) * prev;
            }
        }
    }
}

impl FrameFilter for TemporalFilter {
    fn process(&mut self, frames: FrameSet) -> Result<FrameSet, ProcessingError> {
        let mut out = Vec::with_capacity(frames.len());
        for frame in frames.into_frames() {
            if !is_depth_domain(&frame) {
                out.push(frame);
                continue;
            }
            let mut values = depth_samples(&frame)?;
            if let Some(history) = self.history.as_ref().filter(|h| {
                h.width == frame.width && h.height == frame.height && h.format == frame.format
            }) {
                self.blend(
                    &mut values,
                    &history.values,
                    delta_for(frame.format, self.delta),
                );
            }
            out.push(with_depth_samples(
                &frame,
                frame.format,
                frame.width,
                frame.height,
                &values,
            ));
            self.history = Some(History {
                width: frame.width,
                height: frame.height,
                format: frame.format,
                values,
            });
        }
        Ok(FrameSet::new(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::format_converters::{z16_from_bytes, z16_to_bytes};
    use crate::backends::camera::types::{DEPTH, Frame};

    fn depth(values: &[u16]) -> FrameSet {
        FrameSet::new(vec![Frame::video(
            DEPTH,
            PixelFormat::Z16,
            values.len() as u32,
            1,
            z16_to_bytes(values),
            0.0,
            1,
        )])
    }

    fn output(set: &FrameSet) -> Vec<u16> {
        z16_from_bytes(set.get(DEPTH).and_then(|f| f.pixels()).expect("depth pixels"))
    }

    #[test]
    fn test_first_frame_passes_through() {
        let mut filter = TemporalFilter::default();
        let out = filter.process(depth(&[1000, 0])).expect("process");
        assert_eq!(output(&out), vec![1000, 0]);
    }

    #[test]
    fn test_blends_with_previous() {
        let mut filter = TemporalFilter::default();
        filter.process(depth(&[1000, 1000])).expect("first");
        // 1010 is within delta and blends; 2000 is an edge and is kept
        let out = filter.process(depth(&[1010, 2000])).expect("second");
        assert_eq!(output(&out), vec![1004, 2000]);
    }

    #[test]
    fn test_resolution_change_resets_history() {
        let mut filter = TemporalFilter::default();
        filter.process(depth(&[1000, 1000])).expect("first");
        let out = filter.process(depth(&[1010, 1010, 1010])).expect("second");
        assert_eq!(output(&out), vec![1010, 1010, 1010]);
    }
}
