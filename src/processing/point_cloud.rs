// SPDX-License-Identifier: GPL-3.0-only

//! Colored point-cloud assembly
//!
//! Turns the point-cloud filter's vertices and texture coordinates into
//! publishable XYZ+RGB points. Only vertices whose texture coordinate lies
//! inside [0, 1] on both axes are kept.

use crate::backends::camera::types::{Frame, PointSet, image_len};

/// One published point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointXyzRgb {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Texture image the colors are sampled from
#[derive(Debug, Clone, Copy)]
pub struct Texture<'a> {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub data: &'a [u8],
}

impl<'a> Texture<'a> {
    /// Borrow a video frame as a texture
    ///
    /// `None` unless the frame is 8-bit grey or RGB and its buffer covers
    /// the whole image.
    pub fn from_frame(frame: &'a Frame) -> Option<Self> {
        let data = frame.pixels()?;
        let bytes_per_pixel = frame.bytes_per_pixel();
        if !matches!(bytes_per_pixel, 1 | 3) || frame.width == 0 || frame.height == 0 {
            return None;
        }
        let needed = image_len(frame.width, frame.height, bytes_per_pixel)?;
        (data.len() >= needed).then_some(Self {
            width: frame.width,
            height: frame.height,
            bytes_per_pixel,
            data,
        })
    }

    fn sample(&self, uv: [f32; 2]) -> [u8; 3] {
        let px = ((uv[0] * self.width as f32) as usize).min(self.width as usize - 1);
        let py = ((uv[1] * self.height as f32) as usize).min(self.height as usize - 1);
        let offset = (py * self.width as usize + px) * self.bytes_per_pixel as usize;
        if self.bytes_per_pixel >= 3 {
            [self.data[offset], self.data[offset + 1], self.data[offset + 2]]
        } else {
            let gray = self.data[offset];
            [gray, gray, gray]
        }
    }
}

/// Check if a vertex is published: both texture coordinates in [0, 1]
pub fn is_valid_point(uv: &[f32; 2]) -> bool {
    (0.0..=1.0).contains(&uv[0]) && (0.0..=1.0).contains(&uv[1])
}

/// Build the colored cloud
///
/// Without a texture every valid point is white.
pub fn build_point_cloud(points: &PointSet, texture: Option<&Texture<'_>>) -> Vec<PointXyzRgb> {
    let valid = points
        .vertices
        .iter()
        .zip(&points.tex_coords)
        .filter(|(_, uv)| is_valid_point(uv))
        .count();

    let mut cloud = Vec::with_capacity(valid);
    for (vertex, uv) in points.vertices.iter().zip(&points.tex_coords) {
        if !is_valid_point(uv) {
            continue;
        }
        let [r, g, b] = texture.map_or([255, 255, 255], |t| t.sample(*uv));
        cloud.push(PointXyzRgb {
            x: vertex[0],
            y: vertex[1],
            z: vertex[2],
            r,
            g,
            b,
        });
    }
    cloud
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{COLOR, PixelFormat};

    fn corner_texture() -> Vec<u8> {
        // 2x2 RGB: red, green / blue, white
        vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255]
    }

    #[test]
    fn test_filters_and_samples() {
        let data = corner_texture();
        let texture = Texture {
            width: 2,
            height: 2,
            bytes_per_pixel: 3,
            data: &data,
        };
        let points = PointSet {
            vertices: vec![[0.0, 0.0, 1.0], [0.1, 0.1, 1.0], [0.2, 0.2, 1.0]],
            tex_coords: vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]],
        };
        let cloud = build_point_cloud(&points, Some(&texture));
        assert_eq!(cloud.len(), 2);
        assert_eq!((cloud[0].r, cloud[0].g, cloud[0].b), (255, 0, 0));
        // u = v = 1 clamps to the last pixel
        assert_eq!((cloud[1].r, cloud[1].g, cloud[1].b), (255, 255, 255));
        assert_eq!(cloud[1].x, 0.1);
    }

    #[test]
    fn test_gray_texture() {
        let data = [10u8, 20, 30, 40];
        let texture = Texture {
            width: 2,
            height: 2,
            bytes_per_pixel: 1,
            data: &data,
        };
        let points = PointSet {
            vertices: vec![[0.0, 0.0, 1.0]],
            tex_coords: vec![[0.6, 0.6]],
        };
        let cloud = build_point_cloud(&points, Some(&texture));
        assert_eq!((cloud[0].r, cloud[0].g, cloud[0].b), (40, 40, 40));
    }

    #[test]
    fn test_validity_depends_on_uv_only() {
        let points = PointSet {
            vertices: vec![[0.0, 0.0, 0.0], [0.3, 0.3, -1.0], [0.0, 0.0, 1.0]],
            tex_coords: vec![[0.5, 0.5], [0.0, 1.0], [1.01, 0.5]],
        };
        let cloud = build_point_cloud(&points, None);
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud[0].z, 0.0);
        assert_eq!(cloud[1].z, -1.0);
    }

    #[test]
    fn test_texture_rejects_16_bit_frames() {
        let y16 = Frame::video(COLOR, PixelFormat::Z16, 2, 2, vec![0u8; 8], 0.0, 1);
        assert!(Texture::from_frame(&y16).is_none());

        let rgb = Frame::video(COLOR, PixelFormat::Rgb8, 2, 2, corner_texture(), 0.0, 1);
        assert_eq!(Texture::from_frame(&rgb).map(|t| t.bytes_per_pixel), Some(3));

        let short = Frame::video(COLOR, PixelFormat::Rgb8, 2, 2, vec![0u8; 6], 0.0, 1);
        assert!(Texture::from_frame(&short).is_none());
    }

    #[test]
    fn test_untextured_cloud_is_white() {
        let points = PointSet {
            vertices: vec![[0.0, 0.0, 2.0], [0.0, 0.0, 0.0]],
            tex_coords: vec![[0.0, 0.0], [-1.0, -1.0]],
        };
        let cloud = build_point_cloud(&points, None);
        assert_eq!(cloud.len(), 1);
        assert_eq!((cloud[0].r, cloud[0].g, cloud[0].b), (255, 255, 255));
    }
}
