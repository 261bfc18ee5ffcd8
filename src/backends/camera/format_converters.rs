// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion utilities
//!
//! Frame payloads travel as little-endian byte buffers. The filters work on
//! typed samples, so everything that reads or writes Z16 depth or 32-bit
//! disparity goes through the helpers here.

/// Decode a Z16 byte buffer into depth units
pub fn z16_from_bytes(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Encode depth units as a Z16 byte buffer
pub fn z16_to_bytes(depth: &[u16]) -> Vec<u8> {
    bytemuck::cast_slice(depth).to_vec()
}

/// Decode a 32-bit float buffer (disparity)
pub fn f32_from_bytes(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Encode 32-bit floats as bytes
pub fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

/// Depth colorization options
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorizerOptions {
    /// Use grayscale instead of the colormap (near=bright, far=dark)
    pub grayscale: bool,
    /// Quantize into bands
    pub quantize_bands: Option<u32>,
    /// Fixed range in depth units, `None` to auto-range per frame
    pub range: Option<(u16, u16)>,
}

/// Turbo colormap: perceptually uniform rainbow (blue=near, red=far)
///
/// Based on the Google Turbo colormap.
fn turbo(t: f32) -> [u8; 3] {
    let r = (0.13572138
        + t * (4.6153926 + t * (-42.66032 + t * (132.13108 + t * (-152.54825 + t * 59.28144)))))
        .clamp(0.0, 1.0);
    let g = (0.09140261
        + t * (2.19418 + t * (4.84296 + t * (-14.18503 + t * (4.27805 + t * 2.53377)))))
        .clamp(0.0, 1.0);
    let b = (0.1066733
        + t * (12.64194 + t * (-60.58204 + t * (109.99648 + t * (-82.52904 + t * 20.43388)))))
        .clamp(0.0, 1.0);
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

/// Valid (non-zero) depth range of a frame, `None` when it holds no depth
fn auto_range(depth: &[u16]) -> Option<(u16, u16)> {
    let mut valid = depth.iter().copied().filter(|&d| d != 0);
    let first = valid.next()?;
    let (min, max) = valid.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d)));
    Some((min, max))
}

/// Convert depth units to an RGB8 image
///
/// Zero depth (no data) is rendered black.
pub fn depth_to_rgb(depth: &[u16], options: &ColorizerOptions) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(depth.len() * 3);
    let Some((min_depth, max_depth)) = options.range.or_else(|| auto_range(depth)) else {
        rgb.resize(depth.len() * 3, 0);
        return rgb;
    };
    let range = f32::from(max_depth.saturating_sub(min_depth)).max(1.0);

    for &d in depth {
        if d == 0 {
            rgb.extend_from_slice(&[0, 0, 0]);
            continue;
        }
        let mut t = (f32::from(d.saturating_sub(min_depth)) / range).clamp(0.0, 1.0);
        if let Some(bands) = options.quantize_bands.filter(|b| *b > 0) {
            let bands = bands as f32;
            t = (t * bands).floor() / bands;
        }
        if options.grayscale {
            let gray = ((1.0 - t) * 255.0) as u8;
            rgb.extend_from_slice(&[gray, gray, gray]);
        } else {
            rgb.extend_from_slice(&turbo(t));
        }
    }

    rgb
}

/// Expand 8-bit luminance to RGB
pub fn y8_to_rgb(data: &[u8]) -> Vec<u8> {
    data.iter().flat_map(|&gray| [gray, gray, gray]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_z16_byte_order() {
        let bytes = z16_to_bytes(&[0x0102, 1000]);
        assert_eq!(&bytes[..2], &[0x02, 0x01]);
        assert_eq!(z16_from_bytes(&bytes), vec![0x0102, 1000]);
    }

    #[test]
    fn test_depth_to_rgb_zero_is_black() {
        let rgb = depth_to_rgb(&[0, 500, 1000], &ColorizerOptions::default());
        assert_eq!(rgb.len(), 9);
        assert_eq!(&rgb[0..3], &[0, 0, 0]);
        // Far end of the range is red-ish
        assert_ne!(&rgb[3..6], &rgb[6..9]);
        assert!(rgb[6] > rgb[8]);
    }

    #[test]
    fn test_depth_to_rgb_grayscale_fixed_range() {
        let options = ColorizerOptions {
            grayscale: true,
            range: Some((0, 1000)),
            ..Default::default()
        };
        let rgb = depth_to_rgb(&[1000], &options);
        assert_eq!(rgb, vec![0, 0, 0]);
    }

    #[test]
    fn test_empty_frame_is_all_black() {
        let rgb = depth_to_rgb(&[0, 0], &ColorizerOptions::default());
        assert_eq!(rgb, vec![0; 6]);
    }

    #[test]
    fn test_turbo_colormap() {
        let start = turbo(0.0);
        let mid = turbo(0.5);
        let end = turbo(1.0);
        assert_ne!(start, mid);
        assert_ne!(mid, end);
        assert!(end[0] > start[0]);
    }
}
