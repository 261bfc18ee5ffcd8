// SPDX-License-Identifier: GPL-3.0-only

//! Depth Bridge - frame-stream core for multi-sensor depth cameras
//!
//! Takes frames from a depth camera's sensor modules (depth, infrared,
//! color, fisheye, gyro, accel), reconciles their hardware timestamps with
//! wall-clock time, runs the requested post-processing filters, and publishes
//! images, camera calibration, depth aligned to the other streams, colored
//! point clouds, inertial samples and static transforms.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Hardware boundary (device and sensor traits, stream
//!   catalog, profile negotiation, software synchronizer, simulated device)
//! - [`processing`]: Time-base reconciliation, filters, alignment, point clouds
//! - [`publish`]: Publisher trait, message records and diagnostics
//! - [`node`]: The driver node tying it all together
//! - [`config`]: Driver configuration handling
//!
//! # Example
//!
//! ```no_run
//! use depth_bridge::backends::camera::SimulatedDevice;
//! use depth_bridge::processing::SystemClock;
//! use depth_bridge::publish::MemoryPublisher;
//! use depth_bridge::{DepthCameraNode, DriverConfig};
//! use std::sync::Arc;
//!
//! let mut node = DepthCameraNode::new(
//!     DriverConfig::default(),
//!     Arc::new(SimulatedDevice::d435i()),
//!     Arc::new(MemoryPublisher::subscribed()),
//!     Arc::new(SystemClock),
//! );
//! node.setup()?;
//! # Ok::<(), depth_bridge::DriverError>(())
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod node;
pub mod processing;
pub mod publish;

// Re-export commonly used types
pub use config::DriverConfig;
pub use errors::{ConfigError, DriverError, DriverResult, ProcessingError};
pub use node::DepthCameraNode;
