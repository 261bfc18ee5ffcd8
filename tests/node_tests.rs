// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests driving the node against the simulated device

use depth_bridge::backends::camera::simulated::{
    SimulatedDevice, SimulatedSensor, stereo_module_profiles, synthetic_frame,
};
use depth_bridge::backends::camera::catalog::encoding;
use depth_bridge::backends::camera::format_converters::{z16_from_bytes, z16_to_bytes};
use depth_bridge::backends::camera::types::{
    COLOR, DEPTH, DeviceInfo, FISHEYE, Frame, FrameEvent, FrameSet, GYRO, INFRA1, INFRA2,
    PixelFormat, SensorOption, StreamKey,
};
use depth_bridge::processing::{ManualClock, Stamp};
use depth_bridge::publish::{FrequencyStatus, MemoryPublisher, Message};
use depth_bridge::{ConfigError, DepthCameraNode, DriverConfig, DriverError};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Harness {
    node: DepthCameraNode,
    device: Arc<SimulatedDevice>,
    publisher: Arc<MemoryPublisher>,
}

impl Harness {
    fn new(config: DriverConfig) -> Self {
        Self::with_publisher(config, MemoryPublisher::subscribed())
    }

    fn with_publisher(config: DriverConfig, publisher: MemoryPublisher) -> Self {
        let device = Arc::new(SimulatedDevice::d435i_manual());
        let publisher = Arc::new(publisher);
        let clock = Arc::new(ManualClock::new(Stamp::from_secs_f64(1000.0)));
        let node = DepthCameraNode::new(config, device.clone(), publisher.clone(), clock);
        Self {
            node,
            device,
            publisher,
        }
    }

    fn started(config: DriverConfig) -> Self {
        let mut harness = Self::new(config);
        harness.node.setup().expect("node setup");
        harness
    }

    /// Synthetic frame for a negotiated stream
    fn frame(&self, key: StreamKey, frame_number: u64, timestamp_ms: f64) -> Frame {
        let profile = self
            .node
            .negotiated()
            .profile(key)
            .expect("stream negotiated");
        synthetic_frame(profile, frame_number, timestamp_ms)
    }

    fn deliver(&self, sensor: &str, event: FrameEvent) {
        let sensor = self.device.sensor(sensor).expect("sensor exists");
        assert!(sensor.deliver(event), "sensor is streaming");
    }

    fn process(&self, frames: Vec<Frame>) {
        self.node
            .processor()
            .expect("processor")
            .process_event(FrameEvent::Set(FrameSet::new(frames)));
    }

    fn images(&self, topic: &str) -> Vec<depth_bridge::publish::ImageMessage> {
        self.publisher
            .messages(topic)
            .into_iter()
            .filter_map(|m| match m {
                Message::Image(image) => Some(image),
                _ => None,
            })
            .collect()
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_exact_profile_is_selected() {
    let mut config = DriverConfig::default();
    config.depth.width = 848;
    config.depth.height = 480;
    let harness = Harness::started(config);

    let depth = harness.node.negotiated().depth_profile().expect("depth profile");
    assert_eq!((depth.width, depth.height, depth.fps), (848, 480, 30));
    assert_eq!(depth.format, PixelFormat::Z16);
    assert!(harness.node.catalog().is_enabled(DEPTH));
    assert!(harness.node.negotiated().rejected.is_empty());
}

#[test]
fn test_unsupported_color_mode_disables_only_color() {
    let mut config = DriverConfig::default();
    config.color.width = 1920;
    config.color.height = 1080;
    config.color.fps = 60;
    let harness = Harness::started(config);

    assert_eq!(harness.node.negotiated().rejected, vec![COLOR]);
    assert!(!harness.node.catalog().is_enabled(COLOR));
    assert!(harness.node.catalog().is_enabled(DEPTH));
    assert!(harness.node.catalog().is_enabled(INFRA1));
    assert_eq!(harness.publisher.advertised("color/image_raw"), None);
    assert_eq!(
        harness.publisher.advertised("depth/image_rect_raw"),
        Some(false)
    );
}

#[test]
fn test_missing_sensor_disables_stream() {
    let harness = Harness::started(DriverConfig::default());
    // The simulated device has no wide FOV camera
    assert!(!harness.node.catalog().is_enabled(FISHEYE));
    assert_eq!(harness.publisher.advertised("fisheye/image_raw"), None);
}

#[test]
fn test_depth_is_required() {
    let mut config = DriverConfig::default();
    config.depth.enabled = false;
    let mut harness = Harness::new(config);
    assert!(matches!(
        harness.node.setup(),
        Err(DriverError::MissingDepthProfile)
    ));

    let mut config = DriverConfig::default();
    config.depth.width = 123;
    let mut harness = Harness::new(config);
    assert!(matches!(
        harness.node.setup(),
        Err(DriverError::MissingDepthProfile)
    ));
    // Nothing was opened
    let stereo = harness.device.sensor("Stereo Module").expect("stereo");
    assert!(stereo.opened_profiles().is_empty());
}

#[test]
fn test_unknown_module_is_fatal() {
    let sensors = vec![
        Arc::new(SimulatedSensor::manual(
            "Stereo Module",
            stereo_module_profiles(),
            Some(0.001),
        )),
        Arc::new(SimulatedSensor::manual("Tracking Module", Vec::new(), None)),
    ];
    let device = Arc::new(SimulatedDevice::new(
        DeviceInfo::default(),
        sensors,
        SimulatedDevice::d435i_poses(),
    ));
    let mut node = DepthCameraNode::new(
        DriverConfig::default(),
        device,
        Arc::new(MemoryPublisher::subscribed()),
        Arc::new(ManualClock::default()),
    );
    match node.setup() {
        Err(DriverError::UnsupportedModule(name)) => assert_eq!(name, "Tracking Module"),
        other => panic!("expected UnsupportedModule, got {:?}", other.err()),
    }
}

#[test]
fn test_unknown_filter_is_fatal() {
    let config = DriverConfig {
        filters: "spatial,sharpen".to_string(),
        ..Default::default()
    };
    let mut harness = Harness::new(config);
    match harness.node.setup() {
        Err(DriverError::Config(ConfigError::UnknownFilter(token))) => assert_eq!(token, "sharpen"),
        other => panic!("expected UnknownFilter, got {:?}", other.err()),
    }
}

#[test]
fn test_filter_execution_order_is_canonical() {
    let config = DriverConfig {
        filters: "temporal,disparity,spatial".to_string(),
        ..Default::default()
    };
    let harness = Harness::started(config);
    assert_eq!(
        harness.node.filter_names(),
        vec!["disparity_start", "temporal", "spatial", "disparity_end"]
    );
    assert!(harness.node.config().enable_sync);
}

#[test]
fn test_colorized_depth_uses_color_pathway() {
    let config = DriverConfig {
        filters: "colorizer".to_string(),
        ..Default::default()
    };
    let harness = Harness::started(config);

    let depth = harness.node.catalog().get(DEPTH).expect("depth");
    let color = harness.node.catalog().get(COLOR).expect("color");
    assert_eq!(depth.format, color.format);
    assert_eq!(depth.encoding, color.encoding);

    harness.process(vec![harness.frame(DEPTH, 1, 5000.0)]);
    let images = harness.images("depth/image_rect_raw");
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].encoding, encoding::RGB8);
    assert_eq!(images[0].step, images[0].width * 3);
    assert_eq!(images[0].data.len(), (640 * 480 * 3) as usize);
}

#[test]
fn test_hardware_time_mapping() {
    let harness = Harness::started(DriverConfig::default());
    assert!(!harness.node.time_base().is_initialized());

    harness.deliver("Stereo Module", FrameEvent::Single(harness.frame(DEPTH, 1, 5000.0)));
    harness.deliver("Stereo Module", FrameEvent::Single(harness.frame(DEPTH, 2, 5033.5)));

    let images = harness.images("depth/image_rect_raw");
    assert_eq!(images.len(), 2);
    assert_eq!(images[0].header.stamp, Stamp::from_secs_f64(1000.0));
    assert_eq!(
        images[1].header.stamp,
        Stamp::from_secs_f64(1000.0).offset_ms(33.5)
    );
    assert_eq!(images[1].header.seq, 2);
    assert_eq!(images[1].header.frame_id, "camera_depth_optical_frame");

    let Some(Message::CameraInfo(info)) = harness.publisher.messages("depth/camera_info").pop()
    else {
        panic!("expected camera info");
    };
    assert_eq!(info.header, images[1].header);
    assert_eq!(info.distortion_model, "plumb_bob");
}

#[test]
fn test_subscriber_gating() {
    let mut harness = Harness::with_publisher(DriverConfig::default(), MemoryPublisher::new());
    harness.node.setup().expect("setup");

    harness.deliver("Stereo Module", FrameEvent::Single(harness.frame(DEPTH, 1, 5000.0)));
    assert_eq!(harness.publisher.count("depth/image_rect_raw"), 0);
    let processor = harness.node.processor().expect("processor");
    assert_eq!(processor.sequence(DEPTH), 1);

    harness.publisher.subscribe("depth/image_rect_raw");
    harness.deliver("Stereo Module", FrameEvent::Single(harness.frame(DEPTH, 2, 5033.0)));
    let images = harness.images("depth/image_rect_raw");
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].header.seq, 2);
    assert!(harness.node.processor().expect("processor").last_image(DEPTH).is_some());
}

#[test]
fn test_duplicate_depth_first_wins() {
    let harness = Harness::started(DriverConfig::default());
    let first = harness.frame(DEPTH, 1, 5000.0);
    let second = first.with_pixels(
        PixelFormat::Z16,
        first.width,
        first.height,
        z16_to_bytes(&vec![7u16; (first.width * first.height) as usize]),
    );
    harness.process(vec![first.clone(), second]);

    let images = harness.images("depth/image_rect_raw");
    assert_eq!(images.len(), 1);
    assert_eq!(Some(&images[0].data[..]), first.pixels());
    assert_eq!(harness.publisher.count("depth/counter"), 1);
}

#[test]
fn test_point_cloud_from_frameset() {
    let config = DriverConfig {
        enable_pointcloud: true,
        ..Default::default()
    };
    let harness = Harness::started(config);
    assert_eq!(harness.node.filter_names(), vec!["pointcloud"]);

    harness.process(vec![
        harness.frame(DEPTH, 1, 5000.0),
        harness.frame(COLOR, 1, 5000.0),
    ]);

    let clouds: Vec<_> = harness
        .publisher
        .messages("depth/color/points")
        .into_iter()
        .filter_map(|m| match m {
            Message::PointCloud(cloud) => Some(cloud),
            _ => None,
        })
        .collect();
    assert_eq!(clouds.len(), 1);
    let cloud = &clouds[0];
    assert_eq!(cloud.height(), 1);
    assert!(cloud.width() > 0);
    // The zero-depth band on the left edge is dropped
    assert!(cloud.width() < 640 * 480);
    assert_eq!(cloud.header.frame_id, "camera_depth_optical_frame");
    assert!(cloud.to_points().iter().all(|p| p.z > 0.0));

    // Raw depth still publishes in its own slot
    assert_eq!(harness.images("depth/image_rect_raw").len(), 1);
}

#[test]
fn test_point_cloud_waits_for_texture_frame() {
    let config = DriverConfig {
        enable_pointcloud: true,
        ..Default::default()
    };
    let harness = Harness::started(config);

    // Color is the configured texture but missing from this set
    harness.process(vec![harness.frame(DEPTH, 1, 5000.0)]);
    assert_eq!(harness.publisher.count("depth/color/points"), 0);
    assert_eq!(harness.images("depth/image_rect_raw").len(), 1);

    harness.process(vec![
        harness.frame(DEPTH, 2, 5033.0),
        harness.frame(COLOR, 2, 5033.0),
    ]);
    assert_eq!(harness.publisher.count("depth/color/points"), 1);
}

#[test]
fn test_aligned_depth_matches_target_grid() {
    let config = DriverConfig {
        align_depth: true,
        ..Default::default()
    };
    let harness = Harness::started(config);

    harness.process(vec![
        harness.frame(DEPTH, 1, 5000.0),
        harness.frame(COLOR, 1, 5000.0),
    ]);

    let aligned = harness.images("aligned_depth_to_color/image_raw");
    assert_eq!(aligned.len(), 1);
    assert_eq!((aligned[0].width, aligned[0].height), (640, 480));
    assert_eq!(aligned[0].encoding, encoding::MONO16);
    assert_eq!(aligned[0].header.frame_id, "camera_color_optical_frame");
    let values = z16_from_bytes(&aligned[0].data);
    assert!(values.iter().any(|&v| v > 0));

    // No infra1 frame in the set, so nothing aligned to it
    assert_eq!(harness.publisher.count("aligned_depth_to_infra1/image_raw"), 0);
}

#[test]
fn test_imu_samples_wait_for_time_base() {
    let harness = Harness::started(DriverConfig::default());

    let Some(Message::ImuInfo(info)) = harness.publisher.messages("gyro/imu_info").pop() else {
        panic!("expected imu info");
    };
    assert_eq!(info.header.frame_id, "imu_gyro");
    assert_eq!(harness.publisher.advertised("gyro/imu_info"), Some(true));

    harness.deliver(
        "Motion Module",
        FrameEvent::Single(Frame::motion(GYRO, [0.1, 0.2, 0.3], 4990.0, 1)),
    );
    assert_eq!(harness.publisher.count("gyro/sample"), 0);

    harness.deliver("Stereo Module", FrameEvent::Single(harness.frame(DEPTH, 1, 5000.0)));
    harness.deliver(
        "Motion Module",
        FrameEvent::Single(Frame::motion(GYRO, [0.1, 0.2, 0.3], 5005.0, 2)),
    );
    let Some(Message::Imu(sample)) = harness.publisher.messages("gyro/sample").pop() else {
        panic!("expected gyro sample");
    };
    assert_eq!(sample.header.stamp, Stamp::from_secs_f64(1000.0).offset_ms(5.0));
    assert_eq!(sample.header.seq, 1);
    assert_eq!(sample.orientation_covariance[0], -1.0);
    assert!((sample.angular_velocity[0] - 0.1).abs() < 1e-6);
}

#[test]
fn test_extrinsics_published_latched() {
    let harness = Harness::started(DriverConfig::default());

    assert_eq!(
        harness.publisher.advertised("extrinsics/depth_to_color"),
        Some(true)
    );
    let Some(Message::Extrinsics(ext)) = harness
        .publisher
        .messages("extrinsics/depth_to_color")
        .pop()
    else {
        panic!("expected extrinsics");
    };
    assert_eq!(ext.header.frame_id, "depth_to_color_extrinsics");
    assert!((ext.translation[0] + 0.015).abs() < 1e-6);
    assert_eq!(harness.publisher.count("extrinsics/depth_to_fisheye"), 0);
    assert!(harness.node.extrinsics(INFRA1).is_some());
}

#[test]
fn test_static_transforms() {
    let config = DriverConfig {
        align_depth: true,
        ..Default::default()
    };
    let harness = Harness::started(config);

    let messages = harness.publisher.messages("/tf_static");
    assert_eq!(messages.len(), 1);
    let Message::StaticTransforms(transforms) = &messages[0] else {
        panic!("expected static transforms");
    };
    // depth pair + (body, optical, aligned body, aligned optical) for color, infra1, infra2
    assert_eq!(transforms.len(), 2 + 3 * 4);

    let color = transforms
        .iter()
        .find(|t| t.child_frame_id == "camera_color_frame")
        .expect("color transform");
    assert_eq!(color.header.frame_id, "camera_link");
    assert!(color.translation[0].abs() < 1e-6);
    assert!((color.translation[1] + 0.015).abs() < 1e-6);
    assert!(
        transforms
            .iter()
            .any(|t| t.child_frame_id == "camera_aligned_depth_to_color_frame")
    );
}

#[test]
fn test_inter_cam_sync_mode_written() {
    let config = DriverConfig {
        inter_cam_sync_mode: "Master".to_string(),
        ..Default::default()
    };
    let harness = Harness::started(config);
    let stereo = harness.device.sensor("Stereo Module").expect("stereo");
    assert_eq!(stereo.option(SensorOption::InterCamSyncMode), Some(1.0));
}

#[test]
fn test_toggle_sensors() {
    let mut harness = Harness::new(DriverConfig::default());
    assert!(matches!(
        harness.node.toggle_sensors(false),
        Err(DriverError::NotRunning)
    ));
    harness.node.setup().expect("setup");
    let stereo = harness.device.sensor("Stereo Module").expect("stereo");
    assert!(stereo.is_streaming());

    harness.node.toggle_sensors(false).expect("stop");
    assert!(!stereo.is_streaming());
    // Already stopped: skipped, not an error
    harness.node.toggle_sensors(false).expect("stop again");
    harness.node.toggle_sensors(true).expect("start");
    assert!(stereo.is_streaming());

    harness.node.shutdown();
    assert!(!stereo.is_streaming());
    assert!(!harness.node.is_streaming());
}

#[test]
fn test_frequency_diagnostics() {
    let harness = Harness::started(DriverConfig::default());
    for i in 0..6u32 {
        let timestamp = 5000.0 + f64::from(i) * 1000.0 / 30.0;
        harness.deliver(
            "Stereo Module",
            FrameEvent::Single(harness.frame(DEPTH, u64::from(i) + 1, timestamp)),
        );
    }
    let diagnostics = harness.node.diagnostics(DEPTH).expect("depth diagnostics");
    assert_eq!(diagnostics.topic(), "depth/image_rect_raw");
    assert_eq!(diagnostics.status(), FrequencyStatus::Ok);
}

#[test]
fn test_synchronizer_merges_sensor_deliveries() {
    let config = DriverConfig {
        enable_sync: true,
        ..Default::default()
    };
    let harness = Harness::started(config);

    // Built up front so deliveries land inside one synchronizer period
    let stereo = [
        harness.frame(DEPTH, 1, 5000.0),
        harness.frame(INFRA1, 1, 5000.0),
        harness.frame(INFRA2, 1, 5000.0),
    ];
    let color = harness.frame(COLOR, 1, 5001.0);
    for frame in stereo {
        harness.deliver("Stereo Module", FrameEvent::Single(frame));
    }
    harness.deliver("RGB Camera", FrameEvent::Single(color));

    let publisher = Arc::clone(&harness.publisher);
    assert!(wait_for(|| publisher.count("depth/counter") >= 1));

    let depth = harness.images("depth/image_rect_raw");
    let color = harness.images("color/image_raw");
    assert_eq!(depth.len(), 1);
    assert_eq!(color.len(), 1);
    // One set, one stamp
    assert_eq!(depth[0].header.stamp, color[0].header.stamp);
    assert_eq!(harness.publisher.count("depth/counter"), 1);
}
