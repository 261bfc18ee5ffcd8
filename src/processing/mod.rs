// SPDX-License-Identifier: GPL-3.0-only

//! Frame processing
//!
//! Hardware-independent image math: the filter pipeline, depth alignment,
//! point-cloud assembly, camera geometry and timestamp reconciliation.

pub mod align;
pub mod filters;
pub mod geometry;
pub mod point_cloud;
pub mod time_base;

pub use align::align_depth_to_stream;
pub use filters::{FilterContext, FilterPipeline, FrameFilter};
pub use point_cloud::{PointXyzRgb, Texture, build_point_cloud};
pub use time_base::{Clock, ManualClock, Stamp, SystemClock, TimeBase};
