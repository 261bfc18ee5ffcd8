// SPDX-License-Identifier: GPL-3.0-only

//! Driver-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Post-processing stages that can be requested in the `filters` list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterKind {
    /// Depth to disparity and back, bracketing the smoothing stages
    Disparity,
    /// Edge-preserving spatial smoothing
    Spatial,
    /// Smoothing against previous frames
    Temporal,
    /// Resolution reduction
    Decimation,
    /// Depth to RGB visualization
    Colorizer,
    /// Vertex + texture coordinate generation
    PointCloud,
}

impl FilterKind {
    /// Get all filter kinds
    pub const ALL: [FilterKind; 6] = [
        FilterKind::Disparity,
        FilterKind::Spatial,
        FilterKind::Temporal,
        FilterKind::Decimation,
        FilterKind::Colorizer,
        FilterKind::PointCloud,
    ];

    /// Token used in the comma-separated `filters` list
    pub fn token(&self) -> &'static str {
        match self {
            FilterKind::Disparity => "disparity",
            FilterKind::Spatial => "spatial",
            FilterKind::Temporal => "temporal",
            FilterKind::Decimation => "decimation",
            FilterKind::Colorizer => "colorizer",
            FilterKind::PointCloud => "pointcloud",
        }
    }

    /// Parse a filter token (exact, case-sensitive)
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.token() == token)
    }
}

/// Hardware trigger role for multi-camera rigs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterCamSyncMode {
    /// Master without trigger output
    Default,
    /// Master, emits the trigger signal
    Master,
    /// Listens to an external trigger
    Slave,
    /// Leave the sensor option untouched
    #[default]
    None,
}

impl InterCamSyncMode {
    pub const ALL: [InterCamSyncMode; 4] = [
        InterCamSyncMode::Default,
        InterCamSyncMode::Master,
        InterCamSyncMode::Slave,
        InterCamSyncMode::None,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            InterCamSyncMode::Default => "default",
            InterCamSyncMode::Master => "master",
            InterCamSyncMode::Slave => "slave",
            InterCamSyncMode::None => "none",
        }
    }

    /// Parse a mode name, ignoring case
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.display_name() == value)
    }

    /// Value written to the depth sensor option, `None` for [`InterCamSyncMode::None`]
    pub fn option_value(&self) -> Option<f32> {
        match self {
            InterCamSyncMode::Default => Some(0.0),
            InterCamSyncMode::Master => Some(1.0),
            InterCamSyncMode::Slave => Some(2.0),
            InterCamSyncMode::None => None,
        }
    }
}

/// Stream defaults
pub mod streams {
    pub const IMAGE_WIDTH: u32 = 640;
    pub const IMAGE_HEIGHT: u32 = 480;
    pub const IMAGE_FPS: u32 = 30;
    pub const GYRO_FPS: u32 = 200;
    pub const ACCEL_FPS: u32 = 250;
}

/// Coordinate frame defaults
pub mod frames {
    pub const BASE_FRAME_ID: &str = "camera_link";
    pub const IMU_GYRO_FRAME_ID: &str = "imu_gyro";
    pub const IMU_ACCEL_FRAME_ID: &str = "imu_accel";
}

/// Topic names that do not depend on a stream name
pub mod topics {
    pub const POINT_CLOUD: &str = "depth/color/points";
    pub const COUNTER: &str = "depth/counter";
    pub const STATIC_TF: &str = "/tf_static";
}

/// Filter tuning
pub mod filters {
    /// Stereo baseline used by the disparity transform when the device has none
    pub const DEFAULT_BASELINE_M: f32 = 0.05;
    pub const SPATIAL_ALPHA: f32 = 0.5;
    pub const SPATIAL_DELTA: f32 = 20.0;
    pub const SPATIAL_ITERATIONS: u32 = 2;
    pub const TEMPORAL_ALPHA: f32 = 0.4;
    pub const TEMPORAL_DELTA: f32 = 20.0;
    pub const DECIMATION_FACTOR: u32 = 2;
    /// Disparity values are stored with this many fractional units per pixel
    pub const DISPARITY_SCALE: f32 = 32.0;
}

/// Sensor module names reported by the firmware
pub mod modules {
    pub const STEREO: &str = "Stereo Module";
    pub const CODED_LIGHT: &str = "Coded-Light Depth Sensor";
    pub const RGB: &str = "RGB Camera";
    pub const WIDE_FOV: &str = "Wide FOV Camera";
    pub const MOTION: &str = "Motion Module";
}

/// Depth units assumed when the depth sensor reports none (1 mm)
pub const DEFAULT_DEPTH_SCALE: f32 = 0.001;

/// Frequency diagnostics window (number of publish events)
pub const DIAGNOSTICS_WINDOW: usize = 10;

/// Accepted deviation from the expected publish rate
pub const DIAGNOSTICS_TOLERANCE: f64 = 0.1;

/// Synchronizer receive timeout when no stream rate is known
pub const SYNC_FALLBACK_TIMEOUT: Duration = Duration::from_millis(100);

/// Capacity of the bounded message channel used by the CLI consumer
pub const MESSAGE_CHANNEL_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_tokens_roundtrip() {
        for kind in FilterKind::ALL {
            assert_eq!(FilterKind::from_token(kind.token()), Some(kind));
        }
        assert_eq!(FilterKind::from_token("Spatial"), None);
    }

    #[test]
    fn test_sync_mode_option_values() {
        assert_eq!(InterCamSyncMode::parse("MASTER"), Some(InterCamSyncMode::Master));
        assert_eq!(InterCamSyncMode::Slave.option_value(), Some(2.0));
        assert_eq!(InterCamSyncMode::None.option_value(), None);
        assert_eq!(InterCamSyncMode::parse("leader"), None);
    }
}
