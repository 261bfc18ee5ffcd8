// SPDX-License-Identifier: GPL-3.0-only

//! Simulated depth camera
//!
//! A D435i-class device with a stereo module (depth + two infrared
//! imagers), an RGB camera and a motion module. Started sensors generate
//! synthetic frames on their own delivery thread at the negotiated rates;
//! sensors built with [`SimulatedSensor::manual`] generate nothing and are
//! driven through [`SimulatedSensor::deliver`] instead.

use super::format_converters::z16_to_bytes;
use super::frame_loop::{DeliveryLoop, LoopAction};
use super::types::{
    ACCEL, BackendError, BackendResult, COLOR, DEPTH, DeviceInfo, DistortionModel, Extrinsics,
    Frame, FrameEvent, GYRO, INFRA1, INFRA2, Intrinsics, MotionIntrinsics, PixelFormat,
    SensorOption, StreamKey, StreamProfile,
};
use super::{CameraDevice, FrameCallback, Sensor};
use crate::constants::modules;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Device clock value at the moment a sensor starts streaming
const DEVICE_CLOCK_START_MS: f64 = 5000.0;

/// Depth units of the simulated stereo module (1 mm)
pub const SIMULATED_DEPTH_SCALE: f32 = 0.001;

static NEXT_UNIQUE_ID: AtomicU32 = AtomicU32::new(1);

fn video_profile(key: StreamKey, format: PixelFormat, width: u32, height: u32, fps: u32) -> StreamProfile {
    let model = if key == COLOR {
        DistortionModel::ModifiedBrownConrady
    } else {
        DistortionModel::BrownConrady
    };
    let focal = 0.75 * width as f32;
    StreamProfile {
        key,
        format,
        width,
        height,
        fps,
        unique_id: NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed),
        intrinsics: Some(Intrinsics {
            width,
            height,
            ppx: width as f32 / 2.0,
            ppy: height as f32 / 2.0,
            fx: focal,
            fy: focal,
            model,
            coeffs: [0.0; 5],
        }),
        motion_intrinsics: None,
    }
}

fn motion_profile(key: StreamKey, fps: u32) -> StreamProfile {
    StreamProfile {
        key,
        format: PixelFormat::MotionXyz32f,
        width: 0,
        height: 0,
        fps,
        unique_id: NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed),
        intrinsics: None,
        motion_intrinsics: Some(MotionIntrinsics {
            data: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
            noise_variances: [1e-4; 3],
            bias_variances: [1e-6; 3],
        }),
    }
}

/// Build a profile with pinhole intrinsics centered in the image
pub fn simulated_video_profile(
    key: StreamKey,
    format: PixelFormat,
    width: u32,
    height: u32,
    fps: u32,
) -> StreamProfile {
    video_profile(key, format, width, height, fps)
}

/// Profiles of the stereo module, in the order the hardware lists them
pub fn stereo_module_profiles() -> Vec<StreamProfile> {
    let modes: [(u32, u32, &[u32]); 4] = [
        (1280, 720, &[30, 15, 6]),
        (848, 480, &[90, 60, 30, 15, 6]),
        (640, 480, &[90, 60, 30, 15, 6]),
        (480, 270, &[90, 60, 30, 15, 6]),
    ];
    let mut profiles = Vec::new();
    for (width, height, rates) in modes {
        for &fps in rates {
            profiles.push(video_profile(DEPTH, PixelFormat::Z16, width, height, fps));
            profiles.push(video_profile(INFRA1, PixelFormat::Y8, width, height, fps));
            profiles.push(video_profile(INFRA2, PixelFormat::Y8, width, height, fps));
        }
    }
    profiles
}

/// Profiles of the RGB camera
pub fn rgb_camera_profiles() -> Vec<StreamProfile> {
    let modes: [(u32, u32, &[u32]); 3] = [
        (1920, 1080, &[30, 15, 6]),
        (1280, 720, &[30, 15, 6]),
        (640, 480, &[60, 30, 15, 6]),
    ];
    let mut profiles = Vec::new();
    for (width, height, rates) in modes {
        for &fps in rates {
            profiles.push(video_profile(COLOR, PixelFormat::Rgb8, width, height, fps));
        }
    }
    profiles
}

/// Profiles of the motion module
pub fn motion_module_profiles() -> Vec<StreamProfile> {
    vec![
        motion_profile(GYRO, 200),
        motion_profile(GYRO, 400),
        motion_profile(ACCEL, 63),
        motion_profile(ACCEL, 250),
    ]
}

/// Synthesize one frame for a profile
///
/// Depth is a plane sloping from 1 m (left) to 2 m (right) with a band of
/// missing data along the left edge; images are gradients that shift with
/// the frame number.
pub fn synthetic_frame(profile: &StreamProfile, frame_number: u64, timestamp_ms: f64) -> Frame {
    let (w, h) = (profile.width as usize, profile.height as usize);
    let shift = frame_number as usize;
    match profile.format {
        PixelFormat::Z16 | PixelFormat::Disparity32 => {
            let scale = SIMULATED_DEPTH_SCALE;
            let mut depth = vec![0u16; w * h];
            for y in 0..h {
                for x in 4.min(w)..w {
                    let meters = 1.0 + x as f32 / w.max(1) as f32;
                    depth[y * w + x] = (meters / scale).round() as u16;
                }
            }
            Frame::video(
                profile.key,
                PixelFormat::Z16,
                profile.width,
                profile.height,
                z16_to_bytes(&depth),
                timestamp_ms,
                frame_number,
            )
        }
        PixelFormat::Rgb8 => {
            let mut rgb = Vec::with_capacity(w * h * 3);
            for y in 0..h {
                for x in 0..w {
                    rgb.push((x * 255 / w.max(1)) as u8);
                    rgb.push((y * 255 / h.max(1)) as u8);
                    rgb.push((shift % 256) as u8);
                }
            }
            Frame::video(
                profile.key,
                profile.format,
                profile.width,
                profile.height,
                rgb,
                timestamp_ms,
                frame_number,
            )
        }
        PixelFormat::Y8 | PixelFormat::Raw8 => {
            let mut gray = Vec::with_capacity(w * h);
            for y in 0..h {
                for x in 0..w {
                    gray.push(((x + y + shift) % 256) as u8);
                }
            }
            Frame::video(
                profile.key,
                profile.format,
                profile.width,
                profile.height,
                gray,
                timestamp_ms,
                frame_number,
            )
        }
        PixelFormat::MotionXyz32f | PixelFormat::Xyz32f => {
            let phase = frame_number as f32 * 0.01;
            let axes = if profile.key == ACCEL {
                [0.0, -9.81, 0.0]
            } else {
                [0.01, -0.02, 0.005 * phase.sin()]
            };
            Frame::motion(profile.key, axes, timestamp_ms, frame_number)
        }
    }
}

struct ProfileClock {
    profile: StreamProfile,
    period: Duration,
    next_due: Duration,
    frame_number: u64,
}

struct GeneratorState {
    clocks: Vec<ProfileClock>,
    started: Instant,
    callback: FrameCallback,
}

fn generate_step(state: &mut GeneratorState) -> LoopAction {
    let Some(due) = state.clocks.iter().map(|c| c.next_due).min() else {
        return LoopAction::Stop;
    };
    let elapsed = state.started.elapsed();
    if due > elapsed {
        std::thread::sleep(due - elapsed);
    }
    let timestamp_ms = DEVICE_CLOCK_START_MS + due.as_secs_f64() * 1000.0;
    for clock in state.clocks.iter_mut().filter(|c| c.next_due == due) {
        clock.frame_number += 1;
        clock.next_due += clock.period;
        let frame = synthetic_frame(&clock.profile, clock.frame_number, timestamp_ms);
        (state.callback)(FrameEvent::Single(frame));
    }
    LoopAction::Continue
}

#[derive(Default)]
struct SensorState {
    opened: Vec<StreamProfile>,
    callback: Option<FrameCallback>,
    delivery: Option<DeliveryLoop>,
}

/// One simulated sensor module
pub struct SimulatedSensor {
    name: String,
    profiles: Vec<StreamProfile>,
    depth_scale: Option<f32>,
    generate: bool,
    state: Mutex<SensorState>,
    options: Mutex<BTreeMap<u8, f32>>,
}

impl SimulatedSensor {
    /// Sensor that generates frames once started
    pub fn new(name: &str, profiles: Vec<StreamProfile>, depth_scale: Option<f32>) -> Self {
        Self {
            name: name.to_string(),
            profiles,
            depth_scale,
            generate: true,
            state: Mutex::new(SensorState::default()),
            options: Mutex::new(BTreeMap::new()),
        }
    }

    /// Sensor that only delivers what is pushed through [`Self::deliver`]
    pub fn manual(name: &str, profiles: Vec<StreamProfile>, depth_scale: Option<f32>) -> Self {
        Self {
            generate: false,
            ..Self::new(name, profiles, depth_scale)
        }
    }

    fn lock_state(&self) -> BackendResult<MutexGuard<'_, SensorState>> {
        self.state
            .lock()
            .map_err(|_| BackendError::Other(format!("{} state lock poisoned", self.name)))
    }

    /// Hand an event to the registered callback, as the hardware would
    ///
    /// Returns false when the sensor is not streaming.
    pub fn deliver(&self, event: FrameEvent) -> bool {
        let callback = match self.lock_state() {
            Ok(state) => state.callback.clone(),
            Err(_) => None,
        };
        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }

    /// Profiles currently opened
    pub fn opened_profiles(&self) -> Vec<StreamProfile> {
        self.lock_state()
            .map(|state| state.opened.clone())
            .unwrap_or_default()
    }

    pub fn is_streaming(&self) -> bool {
        self.lock_state()
            .map(|state| state.callback.is_some())
            .unwrap_or(false)
    }

    /// Last value written to an option
    pub fn option(&self, option: SensorOption) -> Option<f32> {
        self.options
            .lock()
            .ok()
            .and_then(|options| options.get(&(option as u8)).copied())
    }
}

impl Sensor for SimulatedSensor {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn stream_profiles(&self) -> Vec<StreamProfile> {
        self.profiles.clone()
    }

    fn depth_scale(&self) -> Option<f32> {
        self.depth_scale
    }

    fn open(&self, profiles: &[StreamProfile]) -> BackendResult<()> {
        let mut state = self.lock_state()?;
        if !state.opened.is_empty() {
            return Err(BackendError::WrongState(format!("{} is already open", self.name)));
        }
        if let Some(unknown) = profiles.iter().find(|p| !self.profiles.contains(*p)) {
            return Err(BackendError::FormatNotSupported(format!(
                "{} does not offer {}",
                self.name, unknown
            )));
        }
        debug!(sensor = %self.name, count = profiles.len(), "Opening profiles");
        state.opened = profiles.to_vec();
        Ok(())
    }

    fn start(&self, callback: FrameCallback) -> BackendResult<()> {
        let mut state = self.lock_state()?;
        if state.opened.is_empty() {
            return Err(BackendError::WrongState(format!("{} is not open", self.name)));
        }
        if state.callback.is_some() {
            return Err(BackendError::WrongState(format!("{} is already streaming", self.name)));
        }

        if self.generate {
            let clocks = state
                .opened
                .iter()
                .map(|profile| {
                    let period = Duration::from_secs_f64(1.0 / f64::from(profile.fps.max(1)));
                    ProfileClock {
                        profile: profile.clone(),
                        period,
                        next_due: period,
                        frame_number: 0,
                    }
                })
                .collect();
            let generator = GeneratorState {
                clocks,
                started: Instant::now(),
                callback: Arc::clone(&callback),
            };
            state.delivery = Some(DeliveryLoop::start_with_state(
                &format!("{}-delivery", self.name),
                generator,
                generate_step,
                |_| {},
            ));
        }
        state.callback = Some(callback);
        info!(sensor = %self.name, "Sensor started");
        Ok(())
    }

    fn stop(&self) -> BackendResult<()> {
        let delivery = {
            let mut state = self.lock_state()?;
            if state.callback.take().is_none() {
                return Err(BackendError::WrongState(format!("{} is not streaming", self.name)));
            }
            state.delivery.take()
        };
        if let Some(mut delivery) = delivery {
            delivery.stop();
        }
        info!(sensor = %self.name, "Sensor stopped");
        Ok(())
    }

    fn set_option(&self, option: SensorOption, value: f32) -> BackendResult<()> {
        let mut options = self
            .options
            .lock()
            .map_err(|_| BackendError::Other("option lock poisoned".to_string()))?;
        options.insert(option as u8, value);
        Ok(())
    }
}

/// Simulated device: a list of sensors plus each stream's pose in the depth frame
pub struct SimulatedDevice {
    info: DeviceInfo,
    sensors: Vec<Arc<SimulatedSensor>>,
    /// Transform mapping points of each stream's frame into the depth frame
    to_depth: BTreeMap<StreamKey, Extrinsics>,
}

impl SimulatedDevice {
    pub fn new(
        info: DeviceInfo,
        sensors: Vec<Arc<SimulatedSensor>>,
        to_depth: BTreeMap<StreamKey, Extrinsics>,
    ) -> Self {
        Self {
            info,
            sensors,
            to_depth,
        }
    }

    /// D435i whose sensors generate frames once started
    pub fn d435i() -> Self {
        Self::d435i_with(SimulatedSensor::new)
    }

    /// D435i whose sensors are driven by hand
    pub fn d435i_manual() -> Self {
        Self::d435i_with(SimulatedSensor::manual)
    }

    fn d435i_with(make: fn(&str, Vec<StreamProfile>, Option<f32>) -> SimulatedSensor) -> Self {
        let sensors = vec![
            Arc::new(make(modules::STEREO, stereo_module_profiles(), Some(SIMULATED_DEPTH_SCALE))),
            Arc::new(make(modules::RGB, rgb_camera_profiles(), None)),
            Arc::new(make(modules::MOTION, motion_module_profiles(), None)),
        ];
        Self::new(
            DeviceInfo {
                name: "Intel RealSense D435I (simulated)".to_string(),
                serial_number: "000000000001".to_string(),
                firmware_version: "5.12.7.100".to_string(),
                product_id: "0B3A".to_string(),
            },
            sensors,
            Self::d435i_poses(),
        )
    }

    /// Stream poses of a D435i-like rig
    pub fn d435i_poses() -> BTreeMap<StreamKey, Extrinsics> {
        [
            (DEPTH, Extrinsics::IDENTITY),
            (INFRA1, Extrinsics::IDENTITY),
            (INFRA2, Extrinsics::from_translation([0.05, 0.0, 0.0])),
            (COLOR, Extrinsics::from_translation([0.015, 0.0, 0.0])),
            (GYRO, Extrinsics::from_translation([-0.0055, 0.0051, 0.0117])),
            (ACCEL, Extrinsics::from_translation([-0.0055, 0.0051, 0.0117])),
        ]
        .into_iter()
        .collect()
    }

    /// Concrete sensor handle by module name
    pub fn sensor(&self, name: &str) -> Option<Arc<SimulatedSensor>> {
        self.sensors.iter().find(|s| s.name == name).cloned()
    }
}

impl CameraDevice for SimulatedDevice {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn sensors(&self) -> Vec<Arc<dyn Sensor>> {
        self.sensors
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn Sensor>)
            .collect()
    }

    fn extrinsics(&self, from: &StreamProfile, to: &StreamProfile) -> BackendResult<Extrinsics> {
        let pose = |key: StreamKey| {
            self.to_depth.get(&key).copied().ok_or_else(|| {
                BackendError::CalibrationUnavailable(format!("no pose for stream {}", key))
            })
        };
        let from_pose = pose(from.key)?;
        let to_pose = pose(to.key)?;
        Ok(from_pose.then(&to_pose.inverse()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_open_rejects_unknown_profile() {
        let sensor = SimulatedSensor::manual("RGB Camera", rgb_camera_profiles(), None);
        let bogus = video_profile(COLOR, PixelFormat::Rgb8, 320, 240, 30);
        assert!(matches!(
            sensor.open(&[bogus]),
            Err(BackendError::FormatNotSupported(_))
        ));
    }

    #[test]
    fn test_lifecycle_errors() {
        let sensor = SimulatedSensor::manual("RGB Camera", rgb_camera_profiles(), None);
        assert!(matches!(
            sensor.start(Arc::new(|_| {})),
            Err(BackendError::WrongState(_))
        ));
        let profile = sensor.stream_profiles().remove(0);
        sensor.open(&[profile]).expect("open");
        sensor.start(Arc::new(|_| {})).expect("start");
        assert!(matches!(
            sensor.start(Arc::new(|_| {})),
            Err(BackendError::WrongState(_))
        ));
        sensor.stop().expect("stop");
        assert!(matches!(sensor.stop(), Err(BackendError::WrongState(_))));
    }

    #[test]
    fn test_manual_deliver_reaches_callback() {
        let sensor = SimulatedSensor::manual("Motion Module", motion_module_profiles(), None);
        let gyro = sensor.stream_profiles().remove(0);
        sensor.open(&[gyro.clone()]).expect("open");
        assert!(!sensor.deliver(FrameEvent::Single(synthetic_frame(&gyro, 1, 0.0))));

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        sensor
            .start(Arc::new(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("start");
        assert!(sensor.deliver(FrameEvent::Single(synthetic_frame(&gyro, 2, 1.0))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_generator_delivers_frames() {
        let sensor = SimulatedSensor::new("Motion Module", motion_module_profiles(), None);
        let accel = sensor.stream_profiles().remove(3);
        sensor.open(&[accel]).expect("open");
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        sensor
            .start(Arc::new(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("start");
        std::thread::sleep(Duration::from_millis(100));
        sensor.stop().expect("stop");
        assert!(count.load(Ordering::SeqCst) > 5);
    }

    #[test]
    fn test_extrinsics_between_streams() {
        let device = SimulatedDevice::d435i_manual();
        let depth = video_profile(DEPTH, PixelFormat::Z16, 640, 480, 30);
        let color = video_profile(COLOR, PixelFormat::Rgb8, 640, 480, 30);
        let ext = device.extrinsics(&depth, &color).expect("extrinsics");
        // Color sits 15 mm to the right of depth: depth origin is at -15 mm in color
        assert!((ext.translation[0] + 0.015).abs() < 1e-6);
        let back = device.extrinsics(&color, &depth).expect("extrinsics");
        assert!((back.translation[0] - 0.015).abs() < 1e-6);
    }

    #[test]
    fn test_synthetic_depth_has_invalid_band() {
        let profile = video_profile(DEPTH, PixelFormat::Z16, 8, 2, 30);
        let frame = synthetic_frame(&profile, 1, 0.0);
        let depth = crate::backends::camera::format_converters::z16_from_bytes(
            frame.pixels().expect("pixels"),
        );
        assert_eq!(depth[0], 0);
        assert_eq!(depth[4], 1500);
    }
}
