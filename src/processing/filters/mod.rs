// SPDX-License-Identifier: GPL-3.0-only

//! Post-processing filter pipeline
//!
//! Filters are configured once from the comma-separated `filters` request
//! and applied in order to every incoming frame set. Execution order is
//! canonical regardless of request order:
//!
//! ```text
//! disparity_start → spatial/temporal/decimation (as requested) → disparity_end → colorizer → pointcloud
//! ```

mod colorizer;
mod decimation;
mod disparity;
mod pointcloud;
mod spatial;
mod temporal;

pub use colorizer::Colorizer;
pub use decimation::DecimationFilter;
pub use disparity::DisparityTransform;
pub use pointcloud::PointCloudFilter;
pub use spatial::SpatialFilter;
pub use temporal::TemporalFilter;

use crate::backends::camera::catalog::StreamCatalog;
use crate::backends::camera::format_converters::{
    f32_from_bytes, f32_to_bytes, z16_from_bytes, z16_to_bytes,
};
use crate::backends::camera::types::{
    Extrinsics, Frame, FrameSet, Intrinsics, PixelFormat, StreamKey, StreamType, image_len,
};
use crate::constants::{FilterKind, filters};
use crate::errors::{ConfigError, ProcessingError};
use tracing::{debug, info};

/// A transform from one frame set to the next
pub trait FrameFilter: Send {
    fn process(&mut self, frames: FrameSet) -> Result<FrameSet, ProcessingError>;
}

/// A filter stage with its log name
pub struct NamedFilter {
    pub name: &'static str,
    pub filter: Box<dyn FrameFilter>,
}

impl NamedFilter {
    fn new(name: &'static str, filter: impl FrameFilter + 'static) -> Self {
        Self {
            name,
            filter: Box::new(filter),
        }
    }
}

impl std::fmt::Debug for NamedFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NamedFilter({})", self.name)
    }
}

/// Calibration and settings the filters are built from
#[derive(Debug, Clone, Default)]
pub struct FilterContext {
    /// Meters per depth unit
    pub depth_scale: f32,
    pub depth_intrinsics: Option<Intrinsics>,
    /// Stereo baseline used by the disparity transform
    pub baseline_m: f32,
    pub enable_pointcloud: bool,
    /// Point-cloud texture source, `None` for untextured clouds
    pub texture: Option<StreamKey>,
    pub texture_intrinsics: Option<Intrinsics>,
    pub depth_to_texture: Option<Extrinsics>,
}

impl FilterContext {
    pub fn new(depth_scale: f32) -> Self {
        Self {
            depth_scale,
            baseline_m: filters::DEFAULT_BASELINE_M,
            ..Default::default()
        }
    }
}

/// Ordered filter stages
#[derive(Debug, Default)]
pub struct FilterPipeline {
    stages: Vec<NamedFilter>,
}

impl FilterPipeline {
    /// Build the pipeline from a comma-separated request
    ///
    /// Requesting `colorizer` switches the DEPTH descriptor to the color
    /// publish format. `pointcloud` is appended whenever point clouds are
    /// enabled, and may only be requested when they are.
    pub fn build(
        request: &str,
        context: &FilterContext,
        catalog: &mut StreamCatalog,
    ) -> Result<Self, ConfigError> {
        let mut stages = Vec::new();
        let mut use_disparity = false;
        let mut use_colorizer = false;

        for token in request.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let kind = FilterKind::from_token(token)
                .ok_or_else(|| ConfigError::UnknownFilter(token.to_string()))?;
            match kind {
                FilterKind::Disparity => use_disparity = true,
                FilterKind::Colorizer => use_colorizer = true,
                FilterKind::Spatial => {
                    info!("Add Filter: spatial");
                    stages.push(NamedFilter::new("spatial", SpatialFilter::default()));
                }
                FilterKind::Temporal => {
                    info!("Add Filter: temporal");
                    stages.push(NamedFilter::new("temporal", TemporalFilter::default()));
                }
                FilterKind::Decimation => {
                    info!("Add Filter: decimation");
                    stages.push(NamedFilter::new("decimation", DecimationFilter::default()));
                }
                FilterKind::PointCloud => {
                    if !context.enable_pointcloud {
                        return Err(ConfigError::PointCloudDisabled);
                    }
                }
            }
        }

        if use_disparity {
            info!("Add Filter: disparity");
            let focal = context.depth_intrinsics.map(|i| i.fx).unwrap_or(1.0);
            let focal_baseline = focal * context.baseline_m;
            stages.insert(
                0,
                NamedFilter::new(
                    "disparity_start",
                    DisparityTransform::to_disparity(focal_baseline, context.depth_scale),
                ),
            );
            stages.push(NamedFilter::new(
                "disparity_end",
                DisparityTransform::to_depth(focal_baseline, context.depth_scale),
            ));
        }

        if use_colorizer {
            info!("Add Filter: colorizer");
            stages.push(NamedFilter::new("colorizer", Colorizer::default()));
            catalog.adopt_color_format();
        }

        if context.enable_pointcloud {
            info!("Add Filter: pointcloud");
            stages.push(NamedFilter::new("pointcloud", PointCloudFilter::new(context)));
        }

        info!(num_filters = stages.len(), "Filters configured");
        Ok(Self { stages })
    }

    /// Stage names in execution order
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order
    pub fn apply(&mut self, mut frames: FrameSet) -> Result<FrameSet, ProcessingError> {
        for stage in &mut self.stages {
            debug!(filter = stage.name, "Applying filter");
            frames = stage.filter.process(frames)?;
        }
        Ok(frames)
    }
}

/// Check if a frame carries depth-domain pixels (raw depth or disparity)
pub(crate) fn is_depth_domain(frame: &Frame) -> bool {
    frame.key.stream == StreamType::Depth && frame.format.is_depth_domain() && !frame.is_points()
}

/// Depth-domain samples of a frame as floats
pub(crate) fn depth_samples(frame: &Frame) -> Result<Vec<f32>, ProcessingError> {
    let pixels = frame.pixels().ok_or_else(|| malformed(frame, "no pixel payload"))?;
    let expected = image_len(frame.width, frame.height, frame.bytes_per_pixel())
        .ok_or_else(|| malformed(frame, "frame size overflows"))?;
    if pixels.len() < expected {
        return Err(malformed(
            frame,
            &format!("{} bytes, expected {}", pixels.len(), expected),
        ));
    }
    Ok(match frame.format {
        PixelFormat::Z16 => z16_from_bytes(pixels).into_iter().map(f32::from).collect(),
        PixelFormat::Disparity32 => f32_from_bytes(pixels),
        _ => return Err(malformed(frame, "not a depth-domain format")),
    })
}

/// Rebuild a depth-domain frame from float samples, keeping its format
pub(crate) fn with_depth_samples(
    frame: &Frame,
    format: PixelFormat,
    width: u32,
    height: u32,
    samples: &[f32],
) -> Frame {
    let bytes = match format {
        PixelFormat::Z16 => {
            let depth: Vec<u16> = samples
                .iter()
                .map(|v| v.round().clamp(0.0, f32::from(u16::MAX)) as u16)
                .collect();
            z16_to_bytes(&depth)
        }
        _ => f32_to_bytes(samples),
    };
    frame.with_pixels(format, width, height, bytes)
}

pub(crate) fn malformed(frame: &Frame, reason: &str) -> ProcessingError {
    ProcessingError::MalformedFrame {
        key: frame.key,
        reason: reason.to_string(),
    }
}

/// Edge threshold for a depth-domain format
///
/// Thresholds are given in depth units; disparity is stored in pixels, so
/// the threshold shrinks by the sub-pixel scale.
pub(crate) fn delta_for(format: PixelFormat, delta: f32) -> f32 {
    match format {
        PixelFormat::Disparity32 => delta / filters::DISPARITY_SCALE,
        _ => delta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{COLOR, DEPTH};

    fn context() -> FilterContext {
        FilterContext::new(0.001)
    }

    #[test]
    fn test_canonical_order() {
        let mut catalog = StreamCatalog::new();
        let pipeline =
            FilterPipeline::build("temporal,disparity,spatial", &context(), &mut catalog)
                .expect("valid request");
        assert_eq!(
            pipeline.names(),
            vec!["disparity_start", "temporal", "spatial", "disparity_end"]
        );
    }

    #[test]
    fn test_terminal_stages_go_last() {
        let mut catalog = StreamCatalog::new();
        let mut ctx = context();
        ctx.enable_pointcloud = true;
        let pipeline = FilterPipeline::build(
            "pointcloud,colorizer,decimation,disparity",
            &ctx,
            &mut catalog,
        )
        .expect("valid request");
        assert_eq!(
            pipeline.names(),
            vec![
                "disparity_start",
                "decimation",
                "disparity_end",
                "colorizer",
                "pointcloud"
            ]
        );
    }

    #[test]
    fn test_unknown_token_is_error() {
        let mut catalog = StreamCatalog::new();
        let result = FilterPipeline::build("spatial,sharpen", &context(), &mut catalog);
        assert!(matches!(result, Err(ConfigError::UnknownFilter(t)) if t == "sharpen"));
    }

    #[test]
    fn test_pointcloud_token_requires_flag() {
        let mut catalog = StreamCatalog::new();
        let result = FilterPipeline::build("pointcloud", &context(), &mut catalog);
        assert!(matches!(result, Err(ConfigError::PointCloudDisabled)));
    }

    #[test]
    fn test_pointcloud_flag_alone_appends_stage() {
        let mut catalog = StreamCatalog::new();
        let mut ctx = context();
        ctx.enable_pointcloud = true;
        let pipeline = FilterPipeline::build("", &ctx, &mut catalog).expect("valid request");
        assert_eq!(pipeline.names(), vec!["pointcloud"]);
    }

    #[test]
    fn test_colorizer_switches_depth_descriptor() {
        let mut catalog = StreamCatalog::new();
        FilterPipeline::build("colorizer", &context(), &mut catalog).expect("valid request");
        let depth = catalog.get(DEPTH).expect("depth");
        let color = catalog.get(COLOR).expect("color");
        assert_eq!(depth.format, color.format);
        assert_eq!(depth.encoding, color.encoding);
        assert_eq!(depth.unit_step, 3);
    }

    #[test]
    fn test_empty_pipeline_passes_through() {
        let mut catalog = StreamCatalog::new();
        let mut pipeline = FilterPipeline::build(" , ", &context(), &mut catalog).expect("valid");
        assert!(pipeline.is_empty());
        let frame = Frame::video(DEPTH, PixelFormat::Z16, 1, 1, vec![1u8, 0], 0.0, 1);
        let out = pipeline
            .apply(FrameSet::new(vec![frame]))
            .expect("apply");
        assert_eq!(out.len(), 1);
    }
}
