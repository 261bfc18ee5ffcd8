// SPDX-License-Identifier: GPL-3.0-only

//! Logical output records
//!
//! These carry the fields consumers rely on; the wire encoding is up to the
//! [`Publisher`](super::Publisher) implementation.

use crate::backends::camera::types::{Extrinsics, Intrinsics, MotionIntrinsics};
use crate::processing::point_cloud::PointXyzRgb;
use crate::processing::time_base::Stamp;
use serde::Serialize;
use std::sync::Arc;

/// Distortion model name written into every camera info
pub const DISTORTION_MODEL: &str = "plumb_bob";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    pub frame_id: String,
    pub stamp: Stamp,
    pub seq: u64,
}

impl Header {
    pub fn new(frame_id: impl Into<String>, stamp: Stamp, seq: u64) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp,
            seq,
        }
    }
}

/// Image payload
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMessage {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    pub encoding: String,
    /// Row length in bytes
    pub step: u32,
    pub data: Arc<[u8]>,
}

/// Calibration published next to every image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraInfo {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    pub distortion_model: String,
    pub d: Vec<f64>,
    /// Row-major 3×3 camera matrix
    pub k: [f64; 9],
    /// Rectification matrix, identity for a monocular view
    pub r: [f64; 9],
    /// Row-major 3×4 projection matrix
    pub p: [f64; 12],
}

impl CameraInfo {
    pub fn from_intrinsics(intrinsics: &Intrinsics, frame_id: impl Into<String>) -> Self {
        let fx = f64::from(intrinsics.fx);
        let fy = f64::from(intrinsics.fy);
        let cx = f64::from(intrinsics.ppx);
        let cy = f64::from(intrinsics.ppy);
        Self {
            header: Header::new(frame_id, Stamp::default(), 0),
            width: intrinsics.width,
            height: intrinsics.height,
            distortion_model: DISTORTION_MODEL.to_string(),
            d: intrinsics.coeffs.iter().map(|&c| f64::from(c)).collect(),
            k: [fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0],
            r: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            p: [fx, 0.0, cx, 0.0, 0.0, fy, cy, 0.0, 0.0, 0.0, 1.0, 0.0],
        }
    }
}

/// One inertial sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImuMessage {
    pub header: Header,
    /// Quaternion (x, y, z, w), always zero
    pub orientation: [f64; 4],
    /// First element -1 marks the orientation as unavailable
    pub orientation_covariance: [f64; 9],
    pub angular_velocity: [f64; 3],
    pub linear_acceleration: [f64; 3],
}

impl ImuMessage {
    pub fn new(header: Header) -> Self {
        let mut orientation_covariance = [0.0; 9];
        orientation_covariance[0] = -1.0;
        Self {
            header,
            orientation: [0.0; 4],
            orientation_covariance,
            angular_velocity: [0.0; 3],
            linear_acceleration: [0.0; 3],
        }
    }
}

/// Inertial calibration, published once
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImuInfo {
    pub header: Header,
    /// Row-major 3×4 scale/bias matrix
    pub data: [f64; 12],
    pub noise_variances: [f64; 3],
    pub bias_variances: [f64; 3],
}

impl ImuInfo {
    pub fn from_intrinsics(intrinsics: &MotionIntrinsics, frame_id: impl Into<String>) -> Self {
        let mut data = [0.0; 12];
        for (row, values) in intrinsics.data.iter().enumerate() {
            for (col, value) in values.iter().enumerate() {
                data[row * 4 + col] = f64::from(*value);
            }
        }
        Self {
            header: Header::new(frame_id, Stamp::default(), 0),
            data,
            noise_variances: intrinsics.noise_variances.map(f64::from),
            bias_variances: intrinsics.bias_variances.map(f64::from),
        }
    }
}

/// In-memory layout of one cloud point: xyz then rgb packed as b, g, r, pad
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PackedPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub bgr0: [u8; 4],
}

impl From<&PointXyzRgb> for PackedPoint {
    fn from(p: &PointXyzRgb) -> Self {
        Self {
            x: p.x,
            y: p.y,
            z: p.z,
            bgr0: [p.b, p.g, p.r, 0],
        }
    }
}

/// Field layout of [`PackedPoint`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PointField {
    pub name: &'static str,
    pub offset: u32,
    pub datatype: PointDatatype,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PointDatatype {
    Float32,
}

pub const POINT_FIELDS: [PointField; 4] = [
    PointField { name: "x", offset: 0, datatype: PointDatatype::Float32, count: 1 },
    PointField { name: "y", offset: 4, datatype: PointDatatype::Float32, count: 1 },
    PointField { name: "z", offset: 8, datatype: PointDatatype::Float32, count: 1 },
    PointField { name: "rgb", offset: 12, datatype: PointDatatype::Float32, count: 1 },
];

/// Unordered colored point cloud (height 1)
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloudMessage {
    pub header: Header,
    pub points: Vec<PackedPoint>,
}

impl PointCloudMessage {
    pub fn new(header: Header, points: &[PointXyzRgb]) -> Self {
        Self {
            header,
            points: points.iter().map(PackedPoint::from).collect(),
        }
    }

    pub fn height(&self) -> u32 {
        1
    }

    pub fn width(&self) -> u32 {
        self.points.len() as u32
    }

    pub fn point_step(&self) -> u32 {
        std::mem::size_of::<PackedPoint>() as u32
    }

    pub fn fields(&self) -> &'static [PointField] {
        &POINT_FIELDS
    }

    /// Serialized point buffer
    pub fn data(&self) -> &[u8] {
        bytemuck::cast_slice(&self.points)
    }

    /// Decode back to (x, y, z, r, g, b) records
    pub fn to_points(&self) -> Vec<PointXyzRgb> {
        self.points
            .iter()
            .map(|p| PointXyzRgb {
                x: p.x,
                y: p.y,
                z: p.z,
                r: p.bgr0[2],
                g: p.bgr0[1],
                b: p.bgr0[0],
            })
            .collect()
    }
}

/// Rigid transform between two streams, published latched
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtrinsicsMessage {
    pub header: Header,
    /// Column-major, as reported by the hardware
    pub rotation: [f64; 9],
    pub translation: [f64; 3],
}

impl ExtrinsicsMessage {
    pub fn new(extrinsics: &Extrinsics, frame_id: impl Into<String>) -> Self {
        Self {
            header: Header::new(frame_id, Stamp::default(), 0),
            rotation: extrinsics.rotation.map(f64::from),
            translation: extrinsics.translation.map(f64::from),
        }
    }
}

/// One static parent → child transform
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformStamped {
    /// `frame_id` is the parent
    pub header: Header,
    pub child_frame_id: String,
    pub translation: [f64; 3],
    /// Quaternion (x, y, z, w)
    pub rotation: [f64; 4],
}

/// Frames published by the last callback
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CounterMessage {
    pub stamp: Stamp,
    pub counter: u64,
}

/// Everything a publisher may be handed
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Image(ImageMessage),
    CameraInfo(CameraInfo),
    Imu(ImuMessage),
    ImuInfo(ImuInfo),
    PointCloud(PointCloudMessage),
    Extrinsics(ExtrinsicsMessage),
    StaticTransforms(Vec<TransformStamped>),
    Counter(CounterMessage),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Image(_) => "image",
            Message::CameraInfo(_) => "camera_info",
            Message::Imu(_) => "imu",
            Message::ImuInfo(_) => "imu_info",
            Message::PointCloud(_) => "point_cloud",
            Message::Extrinsics(_) => "extrinsics",
            Message::StaticTransforms(_) => "static_transforms",
            Message::Counter(_) => "counter",
        }
    }

    pub fn header(&self) -> Option<&Header> {
        match self {
            Message::Image(m) => Some(&m.header),
            Message::CameraInfo(m) => Some(&m.header),
            Message::Imu(m) => Some(&m.header),
            Message::ImuInfo(m) => Some(&m.header),
            Message::PointCloud(m) => Some(&m.header),
            Message::Extrinsics(m) => Some(&m.header),
            Message::StaticTransforms(_) | Message::Counter(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::DistortionModel;

    #[test]
    fn test_camera_info_matrices() {
        let intr = Intrinsics {
            width: 640,
            height: 480,
            ppx: 321.5,
            ppy: 239.5,
            fx: 610.0,
            fy: 611.0,
            model: DistortionModel::BrownConrady,
            coeffs: [0.1, 0.2, 0.0, 0.0, 0.3],
        };
        let info = CameraInfo::from_intrinsics(&intr, "camera_color_optical_frame");
        assert_eq!(info.k, [610.0, 0.0, 321.5, 0.0, 611.0, 239.5, 0.0, 0.0, 1.0]);
        assert_eq!(info.p[3], 0.0);
        assert_eq!(info.p[7], 0.0);
        assert_eq!(info.p[10], 1.0);
        assert_eq!(info.d.len(), 5);
        assert_eq!(info.distortion_model, "plumb_bob");
    }

    #[test]
    fn test_imu_orientation_marked_invalid() {
        let msg = ImuMessage::new(Header::new("imu", Stamp(0), 1));
        assert_eq!(msg.orientation_covariance[0], -1.0);
        assert_eq!(msg.orientation, [0.0; 4]);
    }

    #[test]
    fn test_point_cloud_layout() {
        let points = [PointXyzRgb {
            x: 1.0,
            y: 2.0,
            z: 3.0,
            r: 10,
            g: 20,
            b: 30,
        }];
        let msg = PointCloudMessage::new(Header::new("depth", Stamp(0), 0), &points);
        assert_eq!(msg.point_step(), 16);
        assert_eq!(msg.data().len(), 16);
        assert_eq!(&msg.data()[12..15], &[30, 20, 10]);
        assert_eq!(msg.to_points(), points.to_vec());
    }
}
