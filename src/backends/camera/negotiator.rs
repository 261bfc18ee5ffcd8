// SPDX-License-Identifier: GPL-3.0-only

//! Profile negotiation
//!
//! Picks one hardware stream configuration per requested stream. Selection is
//! first-match in the order the sensor reports its profiles, not best-fit:
//! the same profile list and request always give the same answer.

use super::Sensor;
use super::catalog::{StreamCatalog, StreamDescriptor};
use super::types::{DEPTH, HID_STREAMS, StreamKey, StreamProfile, image_len, image_streams};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reusable pixel buffer holding the last image of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub unit_step: u32,
    pub data: Vec<u8>,
}

impl ImageBuffer {
    /// Zero-filled buffer
    pub fn new(width: u32, height: u32, unit_step: u32) -> Self {
        Self {
            width,
            height,
            unit_step,
            data: vec![0; image_len(width, height, unit_step).unwrap_or(0)],
        }
    }

    /// Copy a frame's pixels in, reallocating only when the geometry changed
    pub fn fill_from(&mut self, width: u32, height: u32, unit_step: u32, pixels: &[u8]) {
        if self.width != width || self.height != height || self.unit_step != unit_step {
            self.width = width;
            self.height = height;
            self.unit_step = unit_step;
        }
        self.data.clear();
        self.data.extend_from_slice(pixels);
    }

    /// Row size in bytes
    pub fn step(&self) -> u32 {
        self.width.saturating_mul(self.unit_step)
    }
}

/// Outcome of negotiation
#[derive(Debug, Clone, Default)]
pub struct NegotiatedStreams {
    /// Selected profile per stream (image and inertial)
    pub profiles: BTreeMap<StreamKey, StreamProfile>,
    /// Last-image buffer per enabled image stream, sized to the negotiated mode
    pub image_buffers: BTreeMap<StreamKey, ImageBuffer>,
    /// Alignment target buffer per other enabled image stream, sized to depth
    pub aligned_buffers: BTreeMap<StreamKey, ImageBuffer>,
    /// Streams that were requested but had no matching profile
    pub rejected: Vec<StreamKey>,
    /// Depth units in meters
    pub depth_scale: Option<f32>,
}

impl NegotiatedStreams {
    pub fn profile(&self, key: StreamKey) -> Option<&StreamProfile> {
        self.profiles.get(&key)
    }

    pub fn depth_profile(&self) -> Option<&StreamProfile> {
        self.profiles.get(&DEPTH)
    }
}

/// First available video profile satisfying a descriptor
///
/// Format and index must match exactly; width, height and fps match when
/// equal to the request or when the request is 0 ("any").
pub fn select_profile<'a>(
    descriptor: &StreamDescriptor,
    available: &'a [StreamProfile],
) -> Option<&'a StreamProfile> {
    available.iter().find(|profile| {
        debug!(profile = %profile, "Sensor profile");
        profile.key == descriptor.key
            && profile.format == descriptor.format
            && (descriptor.width == 0 || profile.width == descriptor.width)
            && (descriptor.height == 0 || profile.height == descriptor.height)
            && (descriptor.fps == 0 || profile.fps == descriptor.fps)
    })
}

/// First available inertial profile with the requested rate and format
pub fn select_motion_profile<'a>(
    descriptor: &StreamDescriptor,
    available: &'a [StreamProfile],
) -> Option<&'a StreamProfile> {
    available.iter().find(|profile| {
        profile.key == descriptor.key
            && profile.fps == descriptor.fps
            && profile.format == descriptor.format
    })
}

/// Negotiate every enabled image stream
///
/// Unmatched streams are disabled in the catalog and reported with a
/// warning; negotiation itself never fails.
pub fn negotiate_image_streams(
    catalog: &mut StreamCatalog,
    sensors: &BTreeMap<StreamKey, Arc<dyn Sensor>>,
    align_depth: bool,
) -> NegotiatedStreams {
    let mut negotiated = NegotiatedStreams::default();

    for key in image_streams() {
        if !catalog.is_enabled(key) {
            continue;
        }
        let Some(sensor) = sensors.get(&key) else {
            continue;
        };
        let available = sensor.stream_profiles();
        let Some(descriptor) = catalog.get_mut(key) else {
            continue;
        };

        match select_profile(descriptor, &available) {
            Some(profile) => {
                descriptor.width = profile.width;
                descriptor.height = profile.height;
                descriptor.fps = profile.fps;
                negotiated.image_buffers.insert(
                    key,
                    ImageBuffer::new(profile.width, profile.height, descriptor.unit_step),
                );
                negotiated.profiles.insert(key, profile.clone());
                info!(
                    stream = descriptor.name,
                    width = profile.width,
                    height = profile.height,
                    fps = profile.fps,
                    "Stream is enabled"
                );
            }
            None => {
                warn!(
                    stream = %key,
                    format = %descriptor.format,
                    width = descriptor.width,
                    height = descriptor.height,
                    fps = descriptor.fps,
                    "Given stream configuration is not supported by the device"
                );
                descriptor.enabled = false;
                negotiated.rejected.push(key);
            }
        }
    }

    if catalog.is_enabled(DEPTH) {
        negotiated.depth_scale = sensors.get(&DEPTH).and_then(|s| s.depth_scale());
    }

    if align_depth {
        if let Some(depth) = catalog.get(DEPTH).filter(|d| d.enabled).cloned() {
            for key in negotiated.profiles.keys().copied().filter(|k| *k != DEPTH) {
                negotiated.aligned_buffers.insert(
                    key,
                    ImageBuffer::new(depth.width, depth.height, depth.unit_step),
                );
            }
        }
    }

    negotiated
}

/// Negotiate gyro and accel on their sensor
pub fn negotiate_motion_streams(
    negotiated: &mut NegotiatedStreams,
    catalog: &mut StreamCatalog,
    sensors: &BTreeMap<StreamKey, Arc<dyn Sensor>>,
) {
    for key in HID_STREAMS {
        if !catalog.is_enabled(key) {
            continue;
        }
        let Some(sensor) = sensors.get(&key) else {
            continue;
        };
        let available = sensor.stream_profiles();
        let Some(descriptor) = catalog.get_mut(key) else {
            continue;
        };
        match select_motion_profile(descriptor, &available) {
            Some(profile) => {
                info!(stream = descriptor.name, fps = profile.fps, "Stream is enabled");
                negotiated.profiles.insert(key, profile.clone());
            }
            None => {
                warn!(
                    stream = %key,
                    fps = descriptor.fps,
                    "Given inertial rate is not supported by the device"
                );
                descriptor.enabled = false;
                negotiated.rejected.push(key);
            }
        }
    }
}
