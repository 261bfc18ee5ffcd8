// SPDX-License-Identifier: GPL-3.0-only

//! Stream catalog
//!
//! Static registry of every logical stream the node knows about: required
//! hardware format, output encoding, row unit size, topic name and the
//! requested mode. Negotiation writes the resolved mode back; afterwards only
//! the `enabled` flag (and the colorizer's format swap) ever change.

use super::types::{
    ACCEL, COLOR, DEPTH, FISHEYE, GYRO, INFRA1, INFRA2, PixelFormat, StreamKey, StreamType,
};
use crate::config::DriverConfig;
use std::collections::BTreeMap;

/// Output encoding tags carried by image messages
pub mod encoding {
    pub const MONO16: &str = "16UC1";
    pub const MONO8: &str = "8UC1";
    pub const RGB8: &str = "rgb8";
}

/// Everything known about one logical stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub key: StreamKey,
    /// Hardware format negotiation must match exactly
    pub format: PixelFormat,
    /// Encoding tag written into published images
    pub encoding: &'static str,
    /// Bytes per pixel unit of the published image
    pub unit_step: u32,
    /// Topic / frame name ("depth", "infra1", ...)
    pub name: &'static str,
    /// Encoding used for depth aligned to this stream
    pub aligned_encoding: &'static str,
    pub enabled: bool,
    /// Requested width, 0 = any. Overwritten with the negotiated value.
    pub width: u32,
    /// Requested height, 0 = any. Overwritten with the negotiated value.
    pub height: u32,
    /// Requested rate, 0 = any. Overwritten with the negotiated value.
    pub fps: u32,
}

impl StreamDescriptor {
    fn new(
        key: StreamKey,
        format: PixelFormat,
        encoding: &'static str,
        unit_step: u32,
        name: &'static str,
    ) -> Self {
        Self {
            key,
            format,
            encoding,
            unit_step,
            name,
            aligned_encoding: encoding::MONO16,
            enabled: false,
            width: 0,
            height: 0,
            fps: 0,
        }
    }
}

/// Registry of stream descriptors keyed by [`StreamKey`]
#[derive(Debug, Clone)]
pub struct StreamCatalog {
    streams: BTreeMap<StreamKey, StreamDescriptor>,
}

impl Default for StreamCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamCatalog {
    /// Catalog with the built-in descriptors, all streams disabled
    pub fn new() -> Self {
        let descriptors = [
            StreamDescriptor::new(DEPTH, PixelFormat::Z16, encoding::MONO16, 2, "depth"),
            StreamDescriptor::new(INFRA1, PixelFormat::Y8, encoding::MONO8, 1, "infra1"),
            StreamDescriptor::new(INFRA2, PixelFormat::Y8, encoding::MONO8, 1, "infra2"),
            StreamDescriptor::new(COLOR, PixelFormat::Rgb8, encoding::RGB8, 3, "color"),
            StreamDescriptor::new(FISHEYE, PixelFormat::Raw8, encoding::MONO8, 1, "fisheye"),
            StreamDescriptor::new(GYRO, PixelFormat::MotionXyz32f, encoding::MONO8, 1, "gyro"),
            StreamDescriptor::new(ACCEL, PixelFormat::MotionXyz32f, encoding::MONO8, 1, "accel"),
        ];
        Self {
            streams: descriptors.into_iter().map(|d| (d.key, d)).collect(),
        }
    }

    /// Catalog with requested modes and enable flags taken from the config
    pub fn from_config(config: &DriverConfig) -> Self {
        let mut catalog = Self::new();
        for (key, request) in config.stream_requests() {
            if let Some(desc) = catalog.streams.get_mut(&key) {
                desc.enabled = request.enabled;
                desc.width = request.width;
                desc.height = request.height;
                desc.fps = request.fps;
            }
        }
        catalog
    }

    pub fn get(&self, key: StreamKey) -> Option<&StreamDescriptor> {
        self.streams.get(&key)
    }

    pub fn get_mut(&mut self, key: StreamKey) -> Option<&mut StreamDescriptor> {
        self.streams.get_mut(&key)
    }

    /// Topic / frame name of a stream ("unknown" for keys outside the catalog)
    pub fn name(&self, key: StreamKey) -> &'static str {
        self.streams.get(&key).map(|d| d.name).unwrap_or("unknown")
    }

    pub fn is_enabled(&self, key: StreamKey) -> bool {
        self.streams.get(&key).is_some_and(|d| d.enabled)
    }

    pub fn set_enabled(&mut self, key: StreamKey, enabled: bool) {
        if let Some(desc) = self.streams.get_mut(&key) {
            desc.enabled = enabled;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.values()
    }

    /// Enabled keys in catalog order
    pub fn enabled_keys(&self) -> Vec<StreamKey> {
        self.streams
            .values()
            .filter(|d| d.enabled)
            .map(|d| d.key)
            .collect()
    }

    /// Make DEPTH publish through the color pathway
    ///
    /// Colorized depth is a 3-channel image, so the depth descriptor takes
    /// over COLOR's format, encoding and unit step.
    pub fn adopt_color_format(&mut self) {
        let Some(color) = self.streams.get(&COLOR).cloned() else {
            return;
        };
        if let Some(depth) = self.streams.get_mut(&DEPTH) {
            depth.format = color.format;
            depth.encoding = color.encoding;
            depth.unit_step = color.unit_step;
        }
    }

    /// Keys of enabled image (non-inertial) streams
    pub fn enabled_image_keys(&self) -> Vec<StreamKey> {
        self.streams
            .values()
            .filter(|d| d.enabled && !d.key.stream.is_motion())
            .map(|d| d.key)
            .collect()
    }

    /// Find the key for a stream type + index pair as given in the config
    pub fn lookup(&self, stream: StreamType, index: u8) -> Option<StreamKey> {
        let key = StreamKey::new(stream, index);
        self.streams.contains_key(&key).then_some(key)
    }
}
