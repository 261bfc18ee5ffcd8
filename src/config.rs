// SPDX-License-Identifier: GPL-3.0-only

//! Driver configuration
//!
//! Everything the node reads at startup. Loaded from JSON; every field has a
//! default so a partial file (or no file at all) is valid.

use crate::backends::camera::types::{
    ACCEL, COLOR, DEPTH, FISHEYE, GYRO, INFRA1, INFRA2, StreamKey, StreamType,
};
use crate::constants::{FilterKind, InterCamSyncMode, frames, streams};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Requested mode and frame ids of one image stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub enabled: bool,
    /// 0 = any
    pub width: u32,
    /// 0 = any
    pub height: u32,
    /// 0 = any
    pub fps: u32,
    /// Defaults to `camera_<name>_frame`
    pub frame_id: Option<String>,
    /// Defaults to `camera_<name>_optical_frame`
    pub optical_frame_id: Option<String>,
    /// Defaults to `camera_aligned_depth_to_<name>_frame`
    pub aligned_frame_id: Option<String>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            width: streams::IMAGE_WIDTH,
            height: streams::IMAGE_HEIGHT,
            fps: streams::IMAGE_FPS,
            frame_id: None,
            optical_frame_id: None,
            aligned_frame_id: None,
        }
    }
}

/// Requested mode of one stream, as handed to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub depth: StreamSettings,
    pub infra1: StreamSettings,
    pub infra2: StreamSettings,
    pub color: StreamSettings,
    pub fisheye: StreamSettings,
    /// Enables both gyro and accel
    pub enable_imu: bool,
    pub gyro_fps: u32,
    pub accel_fps: u32,
    /// Publish depth reprojected into every other image stream
    pub align_depth: bool,
    pub enable_pointcloud: bool,
    /// RS2_STREAM_ANY | RS2_STREAM_COLOR | RS2_STREAM_INFRARED | RS2_STREAM_FISHEYE
    pub pointcloud_texture_stream: String,
    pub pointcloud_texture_index: u8,
    /// Comma-separated filter list ("disparity,spatial,temporal,...")
    pub filters: String,
    /// Merge sensor callbacks into frame sets and stamp with host time
    pub enable_sync: bool,
    /// Added to host time in synchronized mode
    pub time_offset_secs: f64,
    /// default | master | slave | none
    pub inter_cam_sync_mode: String,
    pub base_frame_id: String,
    pub imu_gyro_frame_id: String,
    pub imu_accel_frame_id: String,
    pub gyro_optical_frame_id: String,
    pub accel_optical_frame_id: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            depth: StreamSettings::default(),
            infra1: StreamSettings::default(),
            infra2: StreamSettings::default(),
            color: StreamSettings::default(),
            fisheye: StreamSettings::default(),
            enable_imu: true,
            gyro_fps: streams::GYRO_FPS,
            accel_fps: streams::ACCEL_FPS,
            align_depth: false,
            enable_pointcloud: false,
            pointcloud_texture_stream: "RS2_STREAM_COLOR".to_string(),
            pointcloud_texture_index: 0,
            filters: String::new(),
            enable_sync: false,
            time_offset_secs: 0.0,
            inter_cam_sync_mode: InterCamSyncMode::None.display_name().to_string(),
            base_frame_id: frames::BASE_FRAME_ID.to_string(),
            imu_gyro_frame_id: "camera_imu_frame".to_string(),
            imu_accel_frame_id: "camera_imu_frame".to_string(),
            gyro_optical_frame_id: "camera_gyro_optical_frame".to_string(),
            accel_optical_frame_id: "camera_accel_optical_frame".to_string(),
        }
    }
}

impl DriverConfig {
    /// Default config file location (`<config dir>/depth-bridge/config.json`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("depth-bridge").join("config.json"))
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: DriverConfig = serde_json::from_str(&contents)?;
        debug!(path = %path.display(), "Loaded driver config");
        Ok(config)
    }

    /// Load the file at `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply the cross-field rules
    ///
    /// A `pointcloud` token turns point clouds on; point clouds, alignment
    /// and any filter at all need synchronized frame sets.
    pub fn resolve(mut self) -> Self {
        if self.filter_tokens().any(|t| t == FilterKind::PointCloud.token()) {
            self.enable_pointcloud = true;
        }
        if self.enable_pointcloud || self.align_depth || !self.filters.is_empty() {
            self.enable_sync = true;
        }
        self
    }

    /// Non-empty tokens of the filter list, in request order
    pub fn filter_tokens(&self) -> impl Iterator<Item = &str> {
        self.filters
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Point-cloud texture source, `None` when RS2_STREAM_ANY (no texture)
    pub fn texture_stream(&self) -> Result<Option<StreamKey>, ConfigError> {
        let stream = StreamType::from_config_str(&self.pointcloud_texture_stream)
            .ok_or_else(|| ConfigError::UnknownStream(self.pointcloud_texture_stream.clone()))?;
        if stream == StreamType::Any {
            return Ok(None);
        }
        Ok(Some(StreamKey::new(stream, self.pointcloud_texture_index)))
    }

    /// Parsed inter-camera sync mode, invalid values fall back to `none`
    pub fn sync_mode(&self) -> InterCamSyncMode {
        InterCamSyncMode::parse(&self.inter_cam_sync_mode).unwrap_or_else(|| {
            warn!(
                mode = %self.inter_cam_sync_mode,
                "Invalid inter cam sync mode! Not using inter cam sync mode."
            );
            InterCamSyncMode::None
        })
    }

    /// Settings block of an image stream
    pub fn stream_settings(&self, key: StreamKey) -> Option<&StreamSettings> {
        match key {
            DEPTH => Some(&self.depth),
            INFRA1 => Some(&self.infra1),
            INFRA2 => Some(&self.infra2),
            COLOR => Some(&self.color),
            FISHEYE => Some(&self.fisheye),
            _ => None,
        }
    }

    /// Requested mode of every stream, inertial ones included
    pub fn stream_requests(&self) -> Vec<(StreamKey, StreamRequest)> {
        let mut requests: Vec<(StreamKey, StreamRequest)> = [DEPTH, INFRA1, INFRA2, COLOR, FISHEYE]
            .into_iter()
            .filter_map(|key| {
                self.stream_settings(key).map(|s| {
                    (
                        key,
                        StreamRequest {
                            enabled: s.enabled,
                            width: s.width,
                            height: s.height,
                            fps: s.fps,
                        },
                    )
                })
            })
            .collect();
        for (key, fps) in [(GYRO, self.gyro_fps), (ACCEL, self.accel_fps)] {
            requests.push((
                key,
                StreamRequest {
                    enabled: self.enable_imu,
                    width: 0,
                    height: 0,
                    fps,
                },
            ));
        }
        requests
    }

    /// Body frame id of a stream
    pub fn frame_id(&self, key: StreamKey, name: &str) -> String {
        match key {
            GYRO => self.imu_gyro_frame_id.clone(),
            ACCEL => self.imu_accel_frame_id.clone(),
            _ => self
                .stream_settings(key)
                .and_then(|s| s.frame_id.clone())
                .unwrap_or_else(|| format!("camera_{}_frame", name)),
        }
    }

    /// Optical frame id of a stream
    pub fn optical_frame_id(&self, key: StreamKey, name: &str) -> String {
        match key {
            GYRO => self.gyro_optical_frame_id.clone(),
            ACCEL => self.accel_optical_frame_id.clone(),
            _ => self
                .stream_settings(key)
                .and_then(|s| s.optical_frame_id.clone())
                .unwrap_or_else(|| format!("camera_{}_optical_frame", name)),
        }
    }

    /// Frame id of depth aligned to a stream
    pub fn aligned_frame_id(&self, key: StreamKey, name: &str) -> String {
        self.stream_settings(key)
            .and_then(|s| s.aligned_frame_id.clone())
            .unwrap_or_else(|| format!("camera_aligned_depth_to_{}_frame", name))
    }
}
