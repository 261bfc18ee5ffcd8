// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the driver

use crate::backends::camera::types::{BackendError, StreamKey};
use std::fmt;

/// Result type alias using DriverError
pub type DriverResult<T> = Result<T, DriverError>;

/// Setup-time driver error
///
/// Every variant is fatal: the node refuses to start streaming.
#[derive(Debug, Clone)]
pub enum DriverError {
    /// Invalid configuration
    Config(ConfigError),
    /// Hardware collaborator failure
    Backend(BackendError),
    /// Device exposes a sensor module this driver cannot handle
    UnsupportedModule(String),
    /// No depth profile was negotiated but the setup needs one
    MissingDepthProfile,
    /// Node operation called in the wrong state
    NotRunning,
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Unknown token in the filter list
    UnknownFilter(String),
    /// `pointcloud` filter requested while point clouds are disabled
    PointCloudDisabled,
    /// Unknown point-cloud texture stream string
    UnknownStream(String),
    /// Config file could not be read or written
    Io(String),
    /// Config file is not valid JSON for this schema
    Parse(String),
}

/// Per-frame processing errors
///
/// Raised inside the frame callback, logged and the offending frame set dropped.
#[derive(Debug, Clone)]
pub enum ProcessingError {
    /// Payload does not match the advertised format or size
    MalformedFrame { key: StreamKey, reason: String },
    /// Calibration for a stream is missing
    MissingCalibration(StreamKey),
    /// Frame arrived for a stream without an output slot
    UnknownStream(StreamKey),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Config(e) => write!(f, "Configuration error: {}", e),
            DriverError::Backend(e) => write!(f, "Backend error: {}", e),
            DriverError::UnsupportedModule(name) => {
                write!(f, "Module name \"{}\" isn't supported", name)
            }
            DriverError::MissingDepthProfile => {
                write!(f, "Given depth profile is not supported by current device")
            }
            DriverError::NotRunning => write!(f, "Node is not running"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownFilter(token) => write!(f, "Unknown filter: {}", token),
            ConfigError::PointCloudDisabled => {
                write!(f, "pointcloud filter requires enable_pointcloud")
            }
            ConfigError::UnknownStream(value) => write!(f, "Unknown stream string {}", value),
            ConfigError::Io(msg) => write!(f, "I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingError::MalformedFrame { key, reason } => {
                write!(f, "Malformed frame on {}: {}", key, reason)
            }
            ProcessingError::MissingCalibration(key) => {
                write!(f, "No calibration for stream {}", key)
            }
            ProcessingError::UnknownStream(key) => {
                write!(f, "Stream type is not supported! {}", key)
            }
        }
    }
}

impl std::error::Error for DriverError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for ProcessingError {}

impl From<ConfigError> for DriverError {
    fn from(err: ConfigError) -> Self {
        DriverError::Config(err)
    }
}

impl From<BackendError> for DriverError {
    fn from(err: BackendError) -> Self {
        DriverError::Backend(err)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
