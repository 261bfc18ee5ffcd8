// SPDX-License-Identifier: GPL-3.0-only
// Shared types for the depth camera backend boundary

//! Shared types for depth camera backends
//!
//! Everything that crosses the hardware boundary lives here: stream
//! identities, negotiated profiles, calibration records and the frames
//! themselves.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Physical signal produced by a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StreamType {
    /// Wildcard used when selecting "no particular stream"
    Any,
    Depth,
    Color,
    Infrared,
    Fisheye,
    Gyro,
    Accel,
}

impl StreamType {
    /// Parse the configuration spelling (`RS2_STREAM_COLOR`, ...)
    ///
    /// Only the values accepted as point-cloud texture sources are recognized.
    pub fn from_config_str(value: &str) -> Option<Self> {
        match value {
            "RS2_STREAM_ANY" => Some(Self::Any),
            "RS2_STREAM_COLOR" => Some(Self::Color),
            "RS2_STREAM_INFRARED" => Some(Self::Infrared),
            "RS2_STREAM_FISHEYE" => Some(Self::Fisheye),
            _ => None,
        }
    }

    /// Check if this is an inertial (HID) signal
    pub fn is_motion(&self) -> bool {
        matches!(self, Self::Gyro | Self::Accel)
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StreamType::Any => "Any",
            StreamType::Depth => "Depth",
            StreamType::Color => "Color",
            StreamType::Infrared => "Infrared",
            StreamType::Fisheye => "Fisheye",
            StreamType::Gyro => "Gyro",
            StreamType::Accel => "Accel",
        };
        write!(f, "{}", name)
    }
}

/// Logical stream identity: (signal type, index)
///
/// Used as the lookup key for every per-stream table in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub stream: StreamType,
    pub index: u8,
}

impl StreamKey {
    pub const fn new(stream: StreamType, index: u8) -> Self {
        Self { stream, index }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.stream, self.index)
    }
}

pub const DEPTH: StreamKey = StreamKey::new(StreamType::Depth, 0);
pub const INFRA1: StreamKey = StreamKey::new(StreamType::Infrared, 1);
pub const INFRA2: StreamKey = StreamKey::new(StreamType::Infrared, 2);
pub const COLOR: StreamKey = StreamKey::new(StreamType::Color, 0);
pub const FISHEYE: StreamKey = StreamKey::new(StreamType::Fisheye, 0);
pub const GYRO: StreamKey = StreamKey::new(StreamType::Gyro, 0);
pub const ACCEL: StreamKey = StreamKey::new(StreamType::Accel, 0);

/// Image streams grouped by the sensor module that opens them together
pub const IMAGE_STREAM_GROUPS: [&[StreamKey]; 3] = [&[DEPTH, INFRA1, INFRA2], &[COLOR], &[FISHEYE]];

/// Inertial streams, delivered on their own callback
pub const HID_STREAMS: [StreamKey; 2] = [GYRO, ACCEL];

/// Iterate all image stream keys in group order
pub fn image_streams() -> impl Iterator<Item = StreamKey> {
    IMAGE_STREAM_GROUPS.iter().flat_map(|group| group.iter().copied())
}

/// Hardware pixel format of a stream or frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 16-bit depth in device units
    Z16,
    /// 32-bit float disparity (filter-internal domain)
    Disparity32,
    /// 8-bit luminance (infrared)
    Y8,
    /// 8-bit raw sensor data (fisheye)
    Raw8,
    /// 24-bit RGB
    Rgb8,
    /// Three f32 axes (gyro / accel samples)
    MotionXyz32f,
    /// Three f32 coordinates per vertex (point clouds)
    Xyz32f,
}

impl PixelFormat {
    /// Bytes per pixel of the decoded image (1 for non-image payloads)
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Self::Z16 => 2,
            Self::Disparity32 => 4,
            Self::Y8 | Self::Raw8 => 1,
            Self::Rgb8 => 3,
            Self::MotionXyz32f | Self::Xyz32f => 1,
        }
    }

    /// Check if this is a depth-domain format (raw depth or disparity)
    pub fn is_depth_domain(&self) -> bool {
        matches!(self, Self::Z16 | Self::Disparity32)
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PixelFormat::Z16 => "Z16",
            PixelFormat::Disparity32 => "DISPARITY32",
            PixelFormat::Y8 => "Y8",
            PixelFormat::Raw8 => "RAW8",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::MotionXyz32f => "MOTION_XYZ32F",
            PixelFormat::Xyz32f => "XYZ32F",
        };
        write!(f, "{}", name)
    }
}

/// Lens distortion model reported with the intrinsics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistortionModel {
    #[default]
    None,
    /// Brown-Conrady applied to the already-projected pixel (color sensors)
    ModifiedBrownConrady,
    /// Brown-Conrady inverse, used when deprojecting
    InverseBrownConrady,
    BrownConrady,
}

/// Pinhole intrinsics of a video stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    /// Principal point X (pixels)
    pub ppx: f32,
    /// Principal point Y (pixels)
    pub ppy: f32,
    /// Focal length X (pixels)
    pub fx: f32,
    /// Focal length Y (pixels)
    pub fy: f32,
    pub model: DistortionModel,
    pub coeffs: [f32; 5],
}

impl Intrinsics {
    /// Rescale the calibration to a different resolution of the same sensor
    ///
    /// Decimated frames keep their field of view, so focal lengths and the
    /// principal point scale with the image.
    pub fn scaled_to(&self, width: u32, height: u32) -> Self {
        if width == self.width && height == self.height {
            return *self;
        }
        let sx = width as f32 / self.width.max(1) as f32;
        let sy = height as f32 / self.height.max(1) as f32;
        Self {
            width,
            height,
            ppx: self.ppx * sx,
            ppy: self.ppy * sy,
            fx: self.fx * sx,
            fy: self.fy * sy,
            model: self.model,
            coeffs: self.coeffs,
        }
    }
}

/// Rigid transform between two streams
///
/// `rotation` is stored column-major, exactly as the hardware reports it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    pub rotation: [f32; 9],
    pub translation: [f32; 3],
}

impl Extrinsics {
    pub const IDENTITY: Self = Self {
        rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        translation: [0.0; 3],
    };

    /// Pure translation, no rotation
    pub fn from_translation(translation: [f32; 3]) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// Apply `self` first, then `next`
    pub fn then(&self, next: &Extrinsics) -> Self {
        let a = &self.rotation;
        let b = &next.rotation;
        let mut rotation = [0.0f32; 9];
        for col in 0..3 {
            for row in 0..3 {
                rotation[col * 3 + row] = (0..3).map(|k| b[k * 3 + row] * a[col * 3 + k]).sum();
            }
        }
        let t = &self.translation;
        let mut translation = next.translation;
        for (row, out) in translation.iter_mut().enumerate() {
            *out += b[row] * t[0] + b[3 + row] * t[1] + b[6 + row] * t[2];
        }
        Self {
            rotation,
            translation,
        }
    }

    /// Inverse transform (R^T, -R^T t)
    pub fn inverse(&self) -> Self {
        let r = &self.rotation;
        // Transposing a column-major matrix swaps the off-diagonal pairs
        let rt = [r[0], r[3], r[6], r[1], r[4], r[7], r[2], r[5], r[8]];
        let t = &self.translation;
        let translation = [
            -(rt[0] * t[0] + rt[3] * t[1] + rt[6] * t[2]),
            -(rt[1] * t[0] + rt[4] * t[1] + rt[7] * t[2]),
            -(rt[2] * t[0] + rt[5] * t[1] + rt[8] * t[2]),
        ];
        Self {
            rotation: rt,
            translation,
        }
    }
}

/// Calibration of an inertial stream
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionIntrinsics {
    /// Scale / bias matrix, 3 rows of (scale_x, scale_y, scale_z, bias)
    pub data: [[f32; 4]; 3],
    pub noise_variances: [f32; 3],
    pub bias_variances: [f32; 3],
}

/// A concrete stream configuration offered (or opened) by a sensor
#[derive(Debug, Clone, PartialEq)]
pub struct StreamProfile {
    pub key: StreamKey,
    pub format: PixelFormat,
    /// 0 for inertial profiles
    pub width: u32,
    /// 0 for inertial profiles
    pub height: u32,
    pub fps: u32,
    /// Unique id assigned by the device, used by extrinsics lookups
    pub unique_id: u32,
    pub intrinsics: Option<Intrinsics>,
    pub motion_intrinsics: Option<MotionIntrinsics>,
}

impl std::fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.key.stream.is_motion() {
            write!(f, "{} {} @ {}Hz", self.key, self.format, self.fps)
        } else {
            write!(
                f,
                "{} {} {}x{} @ {}fps",
                self.key, self.format, self.width, self.height, self.fps
            )
        }
    }
}

/// Clock domain the hardware timestamp was taken in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampDomain {
    /// Device clock, monotonic and synchronized
    #[default]
    HardwareClock,
    /// Device clock converted to the host's global time
    GlobalTime,
    /// Host arrival time: frame metadata is missing, timing is degraded
    SystemTime,
}

/// Per-frame metadata reported by the device
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameMetadata {
    /// Actual exposure applied (microseconds), if the device reports it
    pub actual_exposure: Option<u32>,
}

/// Geometric payload produced by the point-cloud filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    /// (x, y, z) in meters, depth optical frame
    pub vertices: Vec<[f32; 3]>,
    /// (u, v) texture coordinates, one per vertex
    pub tex_coords: Vec<[f32; 2]>,
}

impl PointSet {
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Frame payload
///
/// Pixel buffers are reference counted so frames can move between filter
/// stages and the publish path without copying.
#[derive(Clone)]
pub enum FrameData {
    /// Row-major pixel bytes (little-endian for multi-byte formats)
    Pixels(Arc<[u8]>),
    /// One inertial sample: three axes
    Motion([f32; 3]),
    /// Vertices + texture coordinates
    Points(Arc<PointSet>),
}

impl FrameData {
    /// Get the length of the payload in bytes (or points)
    pub fn len(&self) -> usize {
        match self {
            FrameData::Pixels(data) => data.len(),
            FrameData::Motion(_) => 12,
            FrameData::Points(points) => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Pixels(data) => write!(f, "FrameData::Pixels({} bytes)", data.len()),
            FrameData::Motion(axes) => write!(f, "FrameData::Motion({:?})", axes),
            FrameData::Points(points) => write!(f, "FrameData::Points({} points)", points.len()),
        }
    }
}

/// Byte length of a `width`×`height` image at `unit` bytes per pixel
///
/// `None` when the product does not fit in `usize`.
pub fn image_len(width: u32, height: u32, unit: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(unit as usize)
}

/// A single frame from one stream
#[derive(Debug, Clone)]
pub struct Frame {
    pub key: StreamKey,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub data: FrameData,
    /// Hardware timestamp in milliseconds
    pub timestamp_ms: f64,
    pub frame_number: u64,
    pub domain: TimestampDomain,
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Build a video frame from raw pixel bytes
    pub fn video(
        key: StreamKey,
        format: PixelFormat,
        width: u32,
        height: u32,
        pixels: impl Into<Arc<[u8]>>,
        timestamp_ms: f64,
        frame_number: u64,
    ) -> Self {
        Self {
            key,
            format,
            width,
            height,
            data: FrameData::Pixels(pixels.into()),
            timestamp_ms,
            frame_number,
            domain: TimestampDomain::default(),
            metadata: FrameMetadata::default(),
        }
    }

    /// Build an inertial sample frame
    pub fn motion(key: StreamKey, axes: [f32; 3], timestamp_ms: f64, frame_number: u64) -> Self {
        Self {
            key,
            format: PixelFormat::MotionXyz32f,
            width: 0,
            height: 0,
            data: FrameData::Motion(axes),
            timestamp_ms,
            frame_number,
            domain: TimestampDomain::default(),
            metadata: FrameMetadata::default(),
        }
    }

    /// Pixel bytes, if this is a video frame
    pub fn pixels(&self) -> Option<&[u8]> {
        match &self.data {
            FrameData::Pixels(data) => Some(data),
            _ => None,
        }
    }

    /// Geometric payload, if this frame carries a point cloud
    pub fn points(&self) -> Option<&PointSet> {
        match &self.data {
            FrameData::Points(points) => Some(points),
            _ => None,
        }
    }

    pub fn is_points(&self) -> bool {
        matches!(self.data, FrameData::Points(_))
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.format.bytes_per_pixel()
    }

    /// Same frame identity and timing with a different payload
    pub fn with_pixels(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
        pixels: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            format,
            width,
            height,
            data: FrameData::Pixels(pixels.into()),
            ..self.clone()
        }
    }
}

/// A time-coherent bundle of frames captured at one instant
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    frames: Vec<Frame>,
}

impl FrameSet {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// First frame with the given key
    pub fn get(&self, key: StreamKey) -> Option<&Frame> {
        self.frames.iter().find(|f| f.key == key)
    }

    /// First depth frame still carrying raw 16-bit depth
    pub fn raw_depth(&self) -> Option<&Frame> {
        self.frames
            .iter()
            .find(|f| f.key.stream == StreamType::Depth && f.format == PixelFormat::Z16)
    }

    /// Hardware timestamp of the set (taken from its first frame)
    pub fn timestamp_ms(&self) -> Option<f64> {
        self.frames.first().map(|f| f.timestamp_ms)
    }

    /// Replace every frame through `f`, keeping positions
    pub fn map_frames<F>(self, f: F) -> Self
    where
        F: FnMut(Frame) -> Frame,
    {
        Self {
            frames: self.frames.into_iter().map(f).collect(),
        }
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

impl<'a> IntoIterator for &'a FrameSet {
    type Item = &'a Frame;
    type IntoIter = std::slice::Iter<'a, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// One delivery from a sensor callback
#[derive(Debug, Clone)]
pub enum FrameEvent {
    Single(Frame),
    Set(FrameSet),
}

impl FrameEvent {
    /// The frame that drives time-base initialization
    pub fn first_frame(&self) -> Option<&Frame> {
        match self {
            FrameEvent::Single(frame) => Some(frame),
            FrameEvent::Set(set) => set.iter().next(),
        }
    }
}

/// Sensor options the node writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorOption {
    InterCamSyncMode,
}

/// Device identification strings
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub name: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub product_id: String,
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone)]
pub enum BackendError {
    /// Device or sensor not found
    DeviceNotFound(String),
    /// Requested profile was rejected by the sensor
    FormatNotSupported(String),
    /// Operation not valid in the current sensor state (e.g. start twice)
    WrongState(String),
    /// Calibration data unavailable for the requested streams
    CalibrationUnavailable(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::WrongState(msg) => write!(f, "Wrong API call sequence: {}", msg),
            BackendError::CalibrationUnavailable(msg) => {
                write!(f, "Calibration unavailable: {}", msg)
            }
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_len_overflow() {
        assert_eq!(image_len(640, 480, 2), Some(614_400));
        assert_eq!(image_len(0, 480, 3), Some(0));
        assert_eq!(image_len(u32::MAX, u32::MAX, 4), None);
    }

    #[test]
    fn test_stream_key_ordering() {
        // Keys order by stream type first, then by index
        assert!(DEPTH < COLOR);
        assert!(INFRA1 < INFRA2);
        let mut keys = vec![ACCEL, INFRA2, DEPTH, INFRA1];
        keys.sort();
        assert_eq!(keys, vec![DEPTH, INFRA1, INFRA2, ACCEL]);
    }

    #[test]
    fn test_texture_stream_parsing() {
        assert_eq!(
            StreamType::from_config_str("RS2_STREAM_COLOR"),
            Some(StreamType::Color)
        );
        assert_eq!(StreamType::from_config_str("RS2_STREAM_ANY"), Some(StreamType::Any));
        assert_eq!(StreamType::from_config_str("RS2_STREAM_DEPTH"), None);
    }

    #[test]
    fn test_intrinsics_scaling() {
        let intr = Intrinsics {
            width: 640,
            height: 480,
            ppx: 320.0,
            ppy: 240.0,
            fx: 600.0,
            fy: 600.0,
            model: DistortionModel::None,
            coeffs: [0.0; 5],
        };
        let half = intr.scaled_to(320, 240);
        assert_eq!(half.fx, 300.0);
        assert_eq!(half.ppy, 120.0);
        assert_eq!(intr.scaled_to(640, 480), intr);
    }

    #[test]
    fn test_extrinsics_inverse_roundtrip() {
        // 90 degrees about Z, column-major
        let ext = Extrinsics {
            rotation: [0.0, 1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            translation: [0.1, 0.2, 0.3],
        };
        let inv = ext.inverse();
        // R^T applied to -t: R^T = [[0,1,0],[-1,0,0],[0,0,1]] (row form)
        assert!((inv.translation[0] + 0.2).abs() < 1e-6);
        assert!((inv.translation[1] - 0.1).abs() < 1e-6);
        assert!((inv.translation[2] + 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_frameset_raw_depth_skips_colorized() {
        let colorized = Frame::video(DEPTH, PixelFormat::Rgb8, 1, 1, vec![1u8, 2, 3], 0.0, 1);
        let raw = Frame::video(DEPTH, PixelFormat::Z16, 1, 1, vec![0u8, 1], 0.0, 1);
        let set = FrameSet::new(vec![colorized, raw]);
        assert_eq!(set.raw_depth().map(|f| f.format), Some(PixelFormat::Z16));
        assert_eq!(set.get(DEPTH).map(|f| f.format), Some(PixelFormat::Rgb8));
    }
}
