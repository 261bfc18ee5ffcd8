// SPDX-License-Identifier: GPL-3.0-only

//! Static transforms between the base frame and each stream
//!
//! Every enabled image stream gets a body frame hanging off the base frame
//! and an optical frame hanging off its body frame. Translations arrive in
//! optical axes and are permuted onto body axes when emitted.

use crate::backends::camera::types::Extrinsics;
use crate::processing::geometry::{body_rotation, body_translation, optical_rotation};
use crate::processing::time_base::Stamp;
use crate::publish::messages::{Header, TransformStamped};
use glam::Quat;

/// Frame ids of one stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrames {
    pub frame_id: String,
    pub optical_frame_id: String,
    /// Set when depth is aligned to this stream
    pub aligned_frame_id: Option<String>,
}

/// One static transform; `translation` is in optical axes
pub fn static_transform(
    stamp: Stamp,
    translation: [f32; 3],
    rotation: Quat,
    parent: &str,
    child: &str,
) -> TransformStamped {
    TransformStamped {
        header: Header::new(parent, stamp, 0),
        child_frame_id: child.to_string(),
        translation: body_translation(translation).map(f64::from),
        rotation: rotation.to_array().map(f64::from),
    }
}

/// base → depth (identity) and depth → depth optical
pub fn depth_transforms(stamp: Stamp, base_frame_id: &str, depth: &StreamFrames) -> Vec<TransformStamped> {
    vec![
        static_transform(stamp, [0.0; 3], Quat::IDENTITY, base_frame_id, &depth.frame_id),
        static_transform(
            stamp,
            [0.0; 3],
            optical_rotation(),
            &depth.frame_id,
            &depth.optical_frame_id,
        ),
    ]
}

/// base → stream and stream → optical, plus the aligned pair when aligning
///
/// `stream_to_depth` maps points of the stream into the depth frame, which
/// is the stream's pose relative to the base.
pub fn stream_transforms(
    stamp: Stamp,
    base_frame_id: &str,
    frames: &StreamFrames,
    stream_to_depth: &Extrinsics,
) -> Vec<TransformStamped> {
    let rotation = body_rotation(stream_to_depth);
    let translation = stream_to_depth.translation;
    let optical = optical_rotation();

    let mut transforms = vec![
        static_transform(stamp, translation, rotation, base_frame_id, &frames.frame_id),
        static_transform(
            stamp,
            [0.0; 3],
            optical,
            &frames.frame_id,
            &frames.optical_frame_id,
        ),
    ];
    if let Some(aligned) = &frames.aligned_frame_id {
        transforms.push(static_transform(
            stamp,
            translation,
            rotation,
            base_frame_id,
            aligned,
        ));
        transforms.push(static_transform(
            stamp,
            [0.0; 3],
            optical,
            aligned,
            &frames.optical_frame_id,
        ));
    }
    transforms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_frames(aligned: bool) -> StreamFrames {
        StreamFrames {
            frame_id: "camera_color_frame".to_string(),
            optical_frame_id: "camera_color_optical_frame".to_string(),
            aligned_frame_id: aligned.then(|| "camera_aligned_depth_to_color_frame".to_string()),
        }
    }

    #[test]
    fn test_translation_permuted_to_body_axes() {
        let ext = Extrinsics::from_translation([0.015, 0.002, 0.003]);
        let transforms = stream_transforms(Stamp(0), "camera_link", &color_frames(false), &ext);
        assert_eq!(transforms.len(), 2);
        let base = &transforms[0];
        assert_eq!(base.header.frame_id, "camera_link");
        assert_eq!(base.child_frame_id, "camera_color_frame");
        assert!((base.translation[0] - 0.003).abs() < 1e-6);
        assert!((base.translation[1] + 0.015).abs() < 1e-6);
        assert!((base.translation[2] + 0.002).abs() < 1e-6);
        // Pure translation keeps an identity body rotation
        assert!((base.rotation[3].abs() - 1.0).abs() < 1e-6);
        assert_eq!(transforms[1].translation, [0.0; 3]);
    }

    #[test]
    fn test_aligned_pair_added() {
        let transforms = stream_transforms(
            Stamp(0),
            "camera_link",
            &color_frames(true),
            &Extrinsics::IDENTITY,
        );
        assert_eq!(transforms.len(), 4);
        assert_eq!(transforms[2].child_frame_id, "camera_aligned_depth_to_color_frame");
        assert_eq!(transforms[3].header.frame_id, "camera_aligned_depth_to_color_frame");
        assert_eq!(transforms[3].child_frame_id, "camera_color_optical_frame");
    }

    #[test]
    fn test_depth_optical_rotation() {
        let depth = StreamFrames {
            frame_id: "camera_depth_frame".to_string(),
            optical_frame_id: "camera_depth_optical_frame".to_string(),
            aligned_frame_id: None,
        };
        let transforms = depth_transforms(Stamp(0), "camera_link", &depth);
        assert_eq!(transforms[0].rotation, [0.0, 0.0, 0.0, 1.0]);
        let q = transforms[1].rotation;
        let expected = [-0.5, 0.5, -0.5, 0.5];
        let same = q.iter().zip(expected).all(|(a, b)| (a - b).abs() < 1e-6);
        let negated = q.iter().zip(expected).all(|(a, b)| (a + b).abs() < 1e-6);
        assert!(same || negated);
    }
}
