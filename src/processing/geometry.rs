// SPDX-License-Identifier: GPL-3.0-only

//! Camera geometry
//!
//! Pixel/point projection with the device's distortion models, rigid
//! transforms and the optical-to-body rotation used for static transforms.

use crate::backends::camera::types::{DistortionModel, Extrinsics, Intrinsics};
use glam::{Mat3, Quat, Vec3};
use std::f32::consts::FRAC_PI_2;

/// Back-project a pixel at `depth` meters into a 3-D point (camera optical frame)
pub fn deproject_pixel_to_point(intrinsics: &Intrinsics, pixel: [f32; 2], depth: f32) -> [f32; 3] {
    let mut x = (pixel[0] - intrinsics.ppx) / intrinsics.fx;
    let mut y = (pixel[1] - intrinsics.ppy) / intrinsics.fy;

    if intrinsics.model == DistortionModel::InverseBrownConrady {
        let c = &intrinsics.coeffs;
        let r2 = x * x + y * y;
        let f = 1.0 + c[0] * r2 + c[1] * r2 * r2 + c[4] * r2 * r2 * r2;
        let ux = x * f + 2.0 * c[2] * x * y + c[3] * (r2 + 2.0 * x * x);
        let uy = y * f + 2.0 * c[3] * x * y + c[2] * (r2 + 2.0 * y * y);
        x = ux;
        y = uy;
    }

    [depth * x, depth * y, depth]
}

/// Project a 3-D point (camera optical frame) onto the image plane
pub fn project_point_to_pixel(intrinsics: &Intrinsics, point: [f32; 3]) -> [f32; 2] {
    let mut x = point[0] / point[2];
    let mut y = point[1] / point[2];

    if intrinsics.model == DistortionModel::ModifiedBrownConrady {
        let c = &intrinsics.coeffs;
        let r2 = x * x + y * y;
        let f = 1.0 + c[0] * r2 + c[1] * r2 * r2 + c[4] * r2 * r2 * r2;
        x *= f;
        y *= f;
        let dx = x + 2.0 * c[2] * x * y + c[3] * (r2 + 2.0 * x * x);
        let dy = y + 2.0 * c[3] * x * y + c[2] * (r2 + 2.0 * y * y);
        x = dx;
        y = dy;
    }

    [x * intrinsics.fx + intrinsics.ppx, y * intrinsics.fy + intrinsics.ppy]
}

/// Apply a rigid transform to a point
pub fn transform_point(extrinsics: &Extrinsics, point: [f32; 3]) -> [f32; 3] {
    let rotation = Mat3::from_cols_array(&extrinsics.rotation);
    let p = rotation * Vec3::from_array(point) + Vec3::from_array(extrinsics.translation);
    p.to_array()
}

/// Quaternion of a hardware rotation matrix
///
/// The device reports rotations column-major.
pub fn rotation_matrix_to_quaternion(rotation: &[f32; 9]) -> Quat {
    Quat::from_mat3(&Mat3::from_cols_array(rotation)).normalize()
}

/// Rotation from the camera optical convention (x right, y down, z forward)
/// to the body convention (x forward, y left, z up)
///
/// Roll -90°, pitch 0, yaw -90°.
pub fn optical_rotation() -> Quat {
    Quat::from_rotation_z(-FRAC_PI_2) * Quat::from_rotation_x(-FRAC_PI_2)
}

/// Express an optical-frame rotation in the body convention
pub fn body_rotation(extrinsics: &Extrinsics) -> Quat {
    let optical = optical_rotation();
    (optical * rotation_matrix_to_quaternion(&extrinsics.rotation) * optical.inverse()).normalize()
}

/// Optical-frame translation expressed on body axes
pub fn body_translation(translation: [f32; 3]) -> [f32; 3] {
    [translation[2], -translation[0], -translation[1]]
}
