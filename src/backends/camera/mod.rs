// SPDX-License-Identifier: GPL-3.0-only

//! Depth camera backend abstraction
//!
//! The driver node talks to hardware only through the [`CameraDevice`] and
//! [`Sensor`] traits. A device is a bag of sensor modules; each module opens
//! a set of stream profiles and delivers frames on its own thread through a
//! [`FrameCallback`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   DepthCameraNode   │
//! └──────────┬──────────┘
//!            │ negotiate / open / start
//!            ▼
//! ┌─────────────────────┐
//! │ CameraDevice trait  │  ← info, sensors, extrinsics
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    Sensor trait     │  ← profiles, open, start(callback), stop
//! └──────────┬──────────┘
//!            │
//!            ▼
//!      ┌──────────┐
//!      │Simulated │  ← Concrete implementation
//!      └──────────┘
//! ```

pub mod catalog;
pub mod format_converters;
pub mod frame_loop;
pub mod negotiator;
pub mod simulated;
pub mod syncer;
pub mod types;

pub use catalog::{StreamCatalog, StreamDescriptor};
pub use negotiator::NegotiatedStreams;
pub use simulated::{SimulatedDevice, SimulatedSensor};
pub use syncer::Synchronizer;
pub use types::*;

use std::sync::Arc;

/// Callback invoked by a sensor for every delivered frame or frame set
///
/// Called from the sensor's own delivery thread.
pub type FrameCallback = Arc<dyn Fn(FrameEvent) + Send + Sync>;

/// A physical depth camera
pub trait CameraDevice: Send + Sync {
    /// Identification strings (name, serial, firmware, product id)
    fn info(&self) -> DeviceInfo;

    /// Sensor modules in device order
    fn sensors(&self) -> Vec<Arc<dyn Sensor>>;

    /// Rigid transform mapping points in `from`'s frame into `to`'s frame
    fn extrinsics(&self, from: &StreamProfile, to: &StreamProfile) -> BackendResult<Extrinsics>;
}

/// One sensor module of a device (stereo module, RGB camera, motion module)
pub trait Sensor: Send + Sync {
    // ===== Identity =====

    /// Module name as reported by the firmware ("Stereo Module", ...)
    fn name(&self) -> String;

    /// Every stream configuration the module offers, in hardware order
    fn stream_profiles(&self) -> Vec<StreamProfile>;

    /// Depth units in meters, `None` for non-depth modules
    fn depth_scale(&self) -> Option<f32>;

    // ===== Lifecycle =====

    /// Reserve the given profiles
    ///
    /// # Errors
    /// `FormatNotSupported` if a profile is not offered by this module,
    /// `WrongState` if the module is already open.
    fn open(&self, profiles: &[StreamProfile]) -> BackendResult<()>;

    /// Begin delivering frames of the opened profiles to `callback`
    ///
    /// # Errors
    /// `WrongState` if not opened or already streaming.
    fn start(&self, callback: FrameCallback) -> BackendResult<()>;

    /// Stop delivery
    ///
    /// In-flight callbacks complete before this returns.
    ///
    /// # Errors
    /// `WrongState` if not streaming.
    fn stop(&self) -> BackendResult<()>;

    // ===== Options =====

    fn set_option(&self, option: SensorOption, value: f32) -> BackendResult<()>;
}
