// SPDX-License-Identifier: GPL-3.0-only

//! Depth camera driver node
//!
//! [`DepthCameraNode::setup`] runs the whole bring-up sequence against a
//! [`CameraDevice`]: classify the sensor modules, negotiate profiles, build
//! the filter pipeline, advertise every topic, publish the latched
//! calibration (extrinsics, IMU info, static transforms) and finally open and
//! start the sensors. Any failure before the last step leaves every sensor
//! closed.
//!
//! ```text
//! sensors ─▶ [Synchronizer] ─▶ FrameProcessor ─▶ Publisher
//! motion  ─────────────────▶ ImuProcessor   ─▶ Publisher
//! ```

pub mod demux;
pub mod imu;
pub mod static_tf;

pub use demux::{FrameProcessor, ProcessorOutputs, demultiplex};
pub use imu::{ImuOutput, ImuProcessor};

use crate::backends::camera::catalog::StreamCatalog;
use crate::backends::camera::negotiator::{
    NegotiatedStreams, negotiate_image_streams, negotiate_motion_streams,
};
use crate::backends::camera::types::{
    ACCEL, BackendError, COLOR, DEPTH, Extrinsics, FISHEYE, GYRO, HID_STREAMS,
    IMAGE_STREAM_GROUPS, INFRA1, INFRA2, SensorOption, StreamKey, StreamProfile, StreamType,
};
use crate::backends::camera::{CameraDevice, FrameCallback, Sensor, Synchronizer};
use crate::config::DriverConfig;
use crate::constants::{DEFAULT_DEPTH_SCALE, frames, modules, topics};
use crate::errors::{DriverError, DriverResult};
use crate::processing::filters::{FilterContext, FilterPipeline};
use crate::processing::time_base::{Clock, TimeBase};
use crate::publish::diagnostics::FrequencyDiagnostics;
use crate::publish::messages::{CameraInfo, ExtrinsicsMessage, ImuInfo, Message};
use crate::publish::Publisher;
use demux::{AlignedOutput, ImageOutput, PointCloudOutput};
use static_tf::{StreamFrames, depth_transforms, stream_transforms};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Streams served by each supported sensor module
pub fn module_streams(name: &str) -> Option<&'static [StreamKey]> {
    match name {
        modules::STEREO => Some(&[DEPTH, INFRA1, INFRA2]),
        modules::CODED_LIGHT => Some(&[DEPTH, INFRA1]),
        modules::RGB => Some(&[COLOR]),
        modules::WIDE_FOV => Some(&[FISHEYE]),
        modules::MOTION => Some(&[GYRO, ACCEL]),
        _ => None,
    }
}

/// Map every stream to the sensor module that serves it
///
/// # Errors
/// `UnsupportedModule` for a module this driver does not know.
pub fn classify_sensors(
    sensors: Vec<Arc<dyn Sensor>>,
) -> DriverResult<BTreeMap<StreamKey, Arc<dyn Sensor>>> {
    let mut by_stream = BTreeMap::new();
    for sensor in sensors {
        let name = sensor.name();
        let streams = module_streams(&name).ok_or_else(|| DriverError::UnsupportedModule(name.clone()))?;
        debug!(sensor = %name, streams = streams.len(), "Sensor module found");
        for key in streams {
            by_stream.insert(*key, Arc::clone(&sensor));
        }
    }
    Ok(by_stream)
}

/// A started sensor and the callback it was started with
struct ActiveSensor {
    sensor: Arc<dyn Sensor>,
    callback: FrameCallback,
}

pub struct DepthCameraNode {
    config: DriverConfig,
    device: Arc<dyn CameraDevice>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    catalog: StreamCatalog,
    negotiated: NegotiatedStreams,
    time_base: Arc<TimeBase>,
    /// depth → stream, cached for the session
    extrinsics: BTreeMap<StreamKey, Extrinsics>,
    processor: Option<Arc<FrameProcessor>>,
    imu: Option<Arc<ImuProcessor>>,
    synchronizer: Option<Arc<Synchronizer>>,
    active: Vec<ActiveSensor>,
    streaming: bool,
}

impl DepthCameraNode {
    /// Node for `device`; the config's cross-field rules are applied here
    pub fn new(
        config: DriverConfig,
        device: Arc<dyn CameraDevice>,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = config.resolve();
        let catalog = StreamCatalog::from_config(&config);
        let time_base = Arc::new(TimeBase::new(
            Arc::clone(&clock),
            config.enable_sync,
            config.time_offset_secs,
        ));
        Self {
            config,
            device,
            publisher,
            clock,
            catalog,
            negotiated: NegotiatedStreams::default(),
            time_base,
            extrinsics: BTreeMap::new(),
            processor: None,
            imu: None,
            synchronizer: None,
            active: Vec::new(),
            streaming: false,
        }
    }

    /// Bring the node up and start streaming
    pub fn setup(&mut self) -> DriverResult<()> {
        if self.streaming || !self.active.is_empty() {
            return Err(BackendError::WrongState("node is already set up".to_string()).into());
        }

        let device_info = self.device.info();
        info!(
            device = %device_info.name,
            serial = %device_info.serial_number,
            firmware = %device_info.firmware_version,
            "Device found"
        );

        let sensors = classify_sensors(self.device.sensors())?;
        self.disable_unbacked_streams(&sensors);
        self.apply_sync_mode(&sensors)?;

        let mut negotiated =
            negotiate_image_streams(&mut self.catalog, &sensors, self.config.align_depth);
        negotiate_motion_streams(&mut negotiated, &mut self.catalog, &sensors);
        let depth_profile = negotiated
            .depth_profile()
            .cloned()
            .ok_or(DriverError::MissingDepthProfile)?;
        self.negotiated = negotiated;

        let depth_scale = self.negotiated.depth_scale.unwrap_or_else(|| {
            warn!(scale = DEFAULT_DEPTH_SCALE, "Depth sensor reports no depth units, assuming default");
            DEFAULT_DEPTH_SCALE
        });
        let texture = self.texture_source()?;
        let context = self.filter_context(&depth_profile, depth_scale, texture)?;
        let pipeline = FilterPipeline::build(&self.config.filters, &context, &mut self.catalog)?;

        let outputs = self.advertise_image_outputs(&depth_profile, depth_scale, texture)?;
        let imu_outputs = self.advertise_imu_outputs();
        self.publish_extrinsics(&depth_profile)?;
        self.publish_static_transforms(&depth_profile)?;

        let processor = Arc::new(FrameProcessor::new(
            Arc::clone(&self.publisher),
            Arc::clone(&self.time_base),
            outputs,
            pipeline,
            self.negotiated.image_buffers.clone(),
            self.negotiated.aligned_buffers.clone(),
        ));
        self.processor = Some(Arc::clone(&processor));
        self.start_image_sensors(&sensors, &processor)?;

        if !imu_outputs.is_empty() {
            let imu = Arc::new(ImuProcessor::new(
                Arc::clone(&self.publisher),
                Arc::clone(&self.time_base),
                imu_outputs,
            ));
            self.imu = Some(Arc::clone(&imu));
            self.start_motion_sensor(&sensors, &imu)?;
        }

        self.streaming = true;
        info!(
            streams = self.negotiated.profiles.len(),
            filters = self.filter_names().len(),
            synchronized = self.config.enable_sync,
            "Depth camera node started"
        );
        Ok(())
    }

    fn disable_unbacked_streams(&mut self, sensors: &BTreeMap<StreamKey, Arc<dyn Sensor>>) {
        for key in self.catalog.enabled_keys() {
            if !sensors.contains_key(&key) {
                info!(
                    stream = self.catalog.name(key),
                    "Sensor isn't supported by current device! -- Skipping..."
                );
                self.catalog.set_enabled(key, false);
            }
        }
    }

    fn apply_sync_mode(&self, sensors: &BTreeMap<StreamKey, Arc<dyn Sensor>>) -> DriverResult<()> {
        let mode = self.config.sync_mode();
        let Some(value) = mode.option_value() else {
            return Ok(());
        };
        if let Some(depth_sensor) = sensors.get(&DEPTH) {
            depth_sensor.set_option(SensorOption::InterCamSyncMode, value)?;
            info!(mode = mode.display_name(), "Inter cam sync mode set");
        }
        Ok(())
    }

    /// Texture stream of the point cloud, if it is configured and streaming
    fn texture_source(&self) -> DriverResult<Option<StreamKey>> {
        if !self.config.enable_pointcloud {
            return Ok(None);
        }
        let Some(key) = self.config.texture_stream()? else {
            return Ok(None);
        };
        if self.negotiated.profile(key).is_none() {
            warn!(
                stream = %key,
                "Point cloud texture stream is not enabled, publishing untextured points"
            );
            return Ok(None);
        }
        Ok(Some(key))
    }

    fn filter_context(
        &self,
        depth_profile: &StreamProfile,
        depth_scale: f32,
        texture: Option<StreamKey>,
    ) -> DriverResult<FilterContext> {
        let mut context = FilterContext::new(depth_scale);
        context.depth_intrinsics = depth_profile.intrinsics;
        context.enable_pointcloud = self.config.enable_pointcloud;
        if let Some(baseline) = self.stereo_baseline() {
            context.baseline_m = baseline;
        }
        if let Some(key) = texture
            && let Some(profile) = self.negotiated.profile(key)
        {
            context.texture = Some(key);
            context.texture_intrinsics = profile.intrinsics;
            context.depth_to_texture = Some(self.device.extrinsics(depth_profile, profile)?);
        }
        Ok(context)
    }

    /// Distance between the two infrared imagers, when both stream
    fn stereo_baseline(&self) -> Option<f32> {
        let left = self.negotiated.profile(INFRA1)?;
        let right = self.negotiated.profile(INFRA2)?;
        let extrinsics = self.device.extrinsics(left, right).ok()?;
        let baseline = extrinsics.translation[0].abs();
        (baseline > 0.0).then_some(baseline)
    }

    fn advertise_image_outputs(
        &self,
        depth_profile: &StreamProfile,
        depth_scale: f32,
        texture: Option<StreamKey>,
    ) -> DriverResult<ProcessorOutputs> {
        let mut outputs = ProcessorOutputs {
            depth_scale,
            depth_intrinsics: depth_profile.intrinsics,
            ..Default::default()
        };

        let image_keys: Vec<StreamKey> = self
            .catalog
            .enabled_image_keys()
            .into_iter()
            .filter(|key| self.negotiated.profile(*key).is_some())
            .collect();

        for &key in &image_keys {
            let (Some(descriptor), Some(profile)) =
                (self.catalog.get(key), self.negotiated.profile(key))
            else {
                continue;
            };
            let intrinsics = profile.intrinsics.ok_or_else(|| {
                BackendError::CalibrationUnavailable(format!("no intrinsics for {}", descriptor.name))
            })?;
            let suffix = match key.stream {
                StreamType::Depth | StreamType::Infrared => "image_rect_raw",
                _ => "image_raw",
            };
            let image_topic = format!("{}/{}", descriptor.name, suffix);
            let info_topic = format!("{}/camera_info", descriptor.name);
            self.publisher.advertise(&image_topic, false);
            self.publisher.advertise(&info_topic, false);

            let frame_id = self.config.optical_frame_id(key, descriptor.name);
            outputs.images.insert(
                key,
                ImageOutput {
                    diagnostics: Arc::new(FrequencyDiagnostics::new(
                        image_topic.clone(),
                        f64::from(profile.fps),
                    )),
                    image_topic,
                    info_topic,
                    camera_info: CameraInfo::from_intrinsics(&intrinsics, frame_id.clone()),
                    frame_id,
                    encoding: descriptor.encoding,
                    unit_step: descriptor.unit_step,
                    intrinsics,
                },
            );
        }

        if self.config.align_depth {
            for &key in image_keys.iter().filter(|key| **key != DEPTH) {
                let (Some(descriptor), Some(profile), Some(target)) = (
                    self.catalog.get(key),
                    self.negotiated.profile(key),
                    outputs.images.get(&key),
                ) else {
                    continue;
                };
                let depth_to_target = self.device.extrinsics(depth_profile, profile)?;
                let image_topic = format!("aligned_depth_to_{}/image_raw", descriptor.name);
                let info_topic = format!("aligned_depth_to_{}/camera_info", descriptor.name);
                self.publisher.advertise(&image_topic, false);
                self.publisher.advertise(&info_topic, false);
                let aligned = AlignedOutput {
                    image_topic,
                    info_topic,
                    frame_id: target.frame_id.clone(),
                    encoding: descriptor.aligned_encoding,
                    target_intrinsics: target.intrinsics,
                    camera_info: target.camera_info.clone(),
                    depth_to_target,
                };
                outputs.aligned.insert(key, aligned);
            }
        }

        if self.config.enable_pointcloud {
            self.publisher.advertise(topics::POINT_CLOUD, false);
            outputs.point_cloud = Some(PointCloudOutput {
                topic: topics::POINT_CLOUD.to_string(),
                frame_id: self.config.optical_frame_id(DEPTH, self.catalog.name(DEPTH)),
                texture,
            });
        }

        if !image_keys.is_empty() {
            self.publisher.advertise(topics::COUNTER, false);
            outputs.counter_topic = Some(topics::COUNTER.to_string());
        }
        Ok(outputs)
    }

    /// Advertise the inertial topics and publish their latched calibration
    fn advertise_imu_outputs(&self) -> BTreeMap<StreamKey, ImuOutput> {
        let mut outputs = BTreeMap::new();
        for key in HID_STREAMS {
            let Some(profile) = self.negotiated.profile(key) else {
                continue;
            };
            let name = self.catalog.name(key);
            let output = ImuOutput {
                sample_topic: format!("{}/sample", name),
                info_topic: format!("{}/imu_info", name),
                frame_id: self.config.optical_frame_id(key, name),
            };
            self.publisher.advertise(&output.sample_topic, false);
            self.publisher.advertise(&output.info_topic, true);

            let info_frame_id = if key == GYRO {
                frames::IMU_GYRO_FRAME_ID
            } else {
                frames::IMU_ACCEL_FRAME_ID
            };
            let intrinsics = profile.motion_intrinsics.unwrap_or_default();
            self.publisher.publish(
                &output.info_topic,
                Message::ImuInfo(ImuInfo::from_intrinsics(&intrinsics, info_frame_id)),
            );
            outputs.insert(key, output);
        }
        outputs
    }

    fn publish_extrinsics(&mut self, depth_profile: &StreamProfile) -> DriverResult<()> {
        for key in [FISHEYE, COLOR, INFRA1, INFRA2] {
            let Some(profile) = self.negotiated.profile(key) else {
                continue;
            };
            let extrinsics = self.device.extrinsics(depth_profile, profile)?;
            let name = self.catalog.name(key);
            let topic = format!("extrinsics/depth_to_{}", name);
            self.publisher.advertise(&topic, true);
            self.publisher.publish(
                &topic,
                Message::Extrinsics(ExtrinsicsMessage::new(
                    &extrinsics,
                    format!("depth_to_{}_extrinsics", name),
                )),
            );
            self.extrinsics.insert(key, extrinsics);
        }
        Ok(())
    }

    fn publish_static_transforms(&self, depth_profile: &StreamProfile) -> DriverResult<()> {
        let stamp = self.clock.now();
        let base = self.config.base_frame_id.as_str();
        let depth_name = self.catalog.name(DEPTH);
        let depth_frames = StreamFrames {
            frame_id: self.config.frame_id(DEPTH, depth_name),
            optical_frame_id: self.config.optical_frame_id(DEPTH, depth_name),
            aligned_frame_id: None,
        };
        let mut transforms = depth_transforms(stamp, base, &depth_frames);

        for key in [COLOR, INFRA1, INFRA2, FISHEYE] {
            let Some(profile) = self.negotiated.profile(key) else {
                continue;
            };
            let stream_to_depth = self.device.extrinsics(profile, depth_profile)?;
            let name = self.catalog.name(key);
            let stream_frames = StreamFrames {
                frame_id: self.config.frame_id(key, name),
                optical_frame_id: self.config.optical_frame_id(key, name),
                aligned_frame_id: self
                    .config
                    .align_depth
                    .then(|| self.config.aligned_frame_id(key, name)),
            };
            transforms.extend(stream_transforms(stamp, base, &stream_frames, &stream_to_depth));
        }

        debug!(count = transforms.len(), "Publishing static transforms");
        self.publisher.advertise(topics::STATIC_TF, true);
        self.publisher
            .publish(topics::STATIC_TF, Message::StaticTransforms(transforms));
        Ok(())
    }

    fn start_image_sensors(
        &mut self,
        sensors: &BTreeMap<StreamKey, Arc<dyn Sensor>>,
        processor: &Arc<FrameProcessor>,
    ) -> DriverResult<()> {
        let callback: FrameCallback = {
            let processor = Arc::clone(processor);
            Arc::new(move |event| processor.process_event(event))
        };

        let sensor_callback = if self.config.enable_sync {
            let image_profiles = self
                .negotiated
                .profiles
                .values()
                .filter(|profile| !profile.key.stream.is_motion());
            let expected: BTreeSet<StreamKey> = image_profiles.clone().map(|p| p.key).collect();
            let max_fps = image_profiles.map(|p| p.fps).max().unwrap_or(0);
            let synchronizer = Arc::new(Synchronizer::new(expected, max_fps));
            synchronizer.start(callback)?;
            let sink = synchronizer.sink();
            self.synchronizer = Some(synchronizer);
            sink
        } else {
            callback
        };

        for group in IMAGE_STREAM_GROUPS {
            let profiles: Vec<StreamProfile> = group
                .iter()
                .filter_map(|key| self.negotiated.profile(*key))
                .cloned()
                .collect();
            let Some(sensor) = profiles.first().and_then(|p| sensors.get(&p.key)) else {
                continue;
            };
            self.open_and_start(sensor, &profiles, &sensor_callback)?;
        }
        Ok(())
    }

    fn start_motion_sensor(
        &mut self,
        sensors: &BTreeMap<StreamKey, Arc<dyn Sensor>>,
        imu: &Arc<ImuProcessor>,
    ) -> DriverResult<()> {
        let profiles: Vec<StreamProfile> = HID_STREAMS
            .iter()
            .filter_map(|key| self.negotiated.profile(*key))
            .cloned()
            .collect();
        let Some(sensor) = profiles.first().and_then(|p| sensors.get(&p.key)) else {
            return Ok(());
        };
        let callback: FrameCallback = {
            let imu = Arc::clone(imu);
            Arc::new(move |event| imu.process_event(event))
        };
        self.open_and_start(sensor, &profiles, &callback)
    }

    fn open_and_start(
        &mut self,
        sensor: &Arc<dyn Sensor>,
        profiles: &[StreamProfile],
        callback: &FrameCallback,
    ) -> DriverResult<()> {
        sensor.open(profiles)?;
        sensor.start(Arc::clone(callback))?;
        info!(sensor = %sensor.name(), streams = profiles.len(), "Sensor started");
        self.active.push(ActiveSensor {
            sensor: Arc::clone(sensor),
            callback: Arc::clone(callback),
        });
        Ok(())
    }

    /// Start or stop every opened sensor
    ///
    /// Sensors already in the requested state are skipped.
    pub fn toggle_sensors(&mut self, enabled: bool) -> DriverResult<()> {
        if self.active.is_empty() {
            return Err(DriverError::NotRunning);
        }
        for active in &self.active {
            let result = if enabled {
                active.sensor.start(Arc::clone(&active.callback))
            } else {
                active.sensor.stop()
            };
            match result {
                Ok(()) => {}
                Err(BackendError::WrongState(msg)) => {
                    debug!(sensor = %active.sensor.name(), %msg, "Sensor toggle skipped");
                }
                Err(err) => warn!(sensor = %active.sensor.name(), error = %err, "Sensor toggle failed"),
            }
        }
        self.streaming = enabled;
        Ok(())
    }

    /// Stop every sensor and the synchronizer
    pub fn shutdown(&mut self) {
        for active in self.active.drain(..) {
            if let Err(err) = active.sensor.stop() {
                debug!(sensor = %active.sensor.name(), error = %err, "Sensor stop skipped");
            }
        }
        if let Some(synchronizer) = self.synchronizer.take() {
            synchronizer.stop();
        }
        if self.streaming {
            info!("Depth camera node stopped");
        }
        self.streaming = false;
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Effective configuration, after the cross-field rules
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn catalog(&self) -> &StreamCatalog {
        &self.catalog
    }

    pub fn negotiated(&self) -> &NegotiatedStreams {
        &self.negotiated
    }

    pub fn time_base(&self) -> &Arc<TimeBase> {
        &self.time_base
    }

    pub fn processor(&self) -> Option<&Arc<FrameProcessor>> {
        self.processor.as_ref()
    }

    pub fn imu(&self) -> Option<&Arc<ImuProcessor>> {
        self.imu.as_ref()
    }

    /// Filter stage names in execution order
    pub fn filter_names(&self) -> Vec<&'static str> {
        self.processor
            .as_ref()
            .map(|p| p.filter_names())
            .unwrap_or_default()
    }

    /// Publish-rate tracker of an image stream
    pub fn diagnostics(&self, key: StreamKey) -> Option<Arc<FrequencyDiagnostics>> {
        let processor = self.processor.as_ref()?;
        processor
            .outputs()
            .images
            .get(&key)
            .map(|output| Arc::clone(&output.diagnostics))
    }

    /// Cached depth → stream extrinsics
    pub fn extrinsics(&self, key: StreamKey) -> Option<Extrinsics> {
        self.extrinsics.get(&key).copied()
    }
}

impl Drop for DepthCameraNode {
    fn drop(&mut self) {
        if !self.active.is_empty() || self.synchronizer.is_some() {
            self.shutdown();
        }
    }
}
