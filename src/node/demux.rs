// SPDX-License-Identifier: GPL-3.0-only

//! Frame callback processing
//!
//! One call to [`FrameProcessor::process_event`] handles one delivery from
//! the hardware (or the synchronizer): stamp it, run the filter pipeline,
//! deduplicate by stream, and publish images, the point cloud and depth
//! aligned to the other streams. Every publish is demand-gated on the
//! topic's subscribers; filtering always runs.
//!
//! ```text
//! FrameEvent ─▶ TimeBase ─▶ FilterPipeline ─▶ demultiplex ─┬─▶ images + camera info
//!                                                          ├─▶ point cloud
//!                                                          └─▶ aligned depth
//! ```

use crate::backends::camera::format_converters::{z16_from_bytes, z16_to_bytes};
use crate::backends::camera::negotiator::ImageBuffer;
use crate::backends::camera::types::{
    DEPTH, Extrinsics, Frame, FrameEvent, FrameSet, Intrinsics, PixelFormat, StreamKey, image_len,
};
use crate::errors::ProcessingError;
use crate::processing::align::align_depth_to_stream;
use crate::processing::filters::FilterPipeline;
use crate::processing::point_cloud::{Texture, build_point_cloud};
use crate::processing::time_base::{Stamp, TimeBase};
use crate::publish::diagnostics::FrequencyDiagnostics;
use crate::publish::messages::{
    CameraInfo, CounterMessage, Header, ImageMessage, Message, PointCloudMessage,
};
use crate::publish::Publisher;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error};

/// Publish slot of one image stream
#[derive(Debug, Clone)]
pub struct ImageOutput {
    pub image_topic: String,
    pub info_topic: String,
    /// Optical frame id written into both messages
    pub frame_id: String,
    pub encoding: &'static str,
    pub unit_step: u32,
    pub intrinsics: Intrinsics,
    pub camera_info: CameraInfo,
    pub diagnostics: Arc<FrequencyDiagnostics>,
}

/// Publish slot of depth aligned to one target stream
#[derive(Debug, Clone)]
pub struct AlignedOutput {
    pub image_topic: String,
    pub info_topic: String,
    /// The target's optical frame id
    pub frame_id: String,
    pub encoding: &'static str,
    pub target_intrinsics: Intrinsics,
    /// Copy of the target's camera info
    pub camera_info: CameraInfo,
    pub depth_to_target: Extrinsics,
}

#[derive(Debug, Clone)]
pub struct PointCloudOutput {
    pub topic: String,
    /// Depth optical frame id
    pub frame_id: String,
    pub texture: Option<StreamKey>,
}

/// Everything the processor publishes to, fixed at setup
#[derive(Debug, Clone, Default)]
pub struct ProcessorOutputs {
    pub images: BTreeMap<StreamKey, ImageOutput>,
    pub aligned: BTreeMap<StreamKey, AlignedOutput>,
    pub point_cloud: Option<PointCloudOutput>,
    pub counter_topic: Option<String>,
    pub depth_intrinsics: Option<Intrinsics>,
    /// Meters per depth unit
    pub depth_scale: f32,
}

/// Frames of a set that reach a sink, in set order
///
/// Image frames are unique per stream key (first one wins); at most one
/// point-cloud frame is kept and it does not occupy its key's image slot.
pub fn demultiplex(set: &FrameSet) -> Vec<&Frame> {
    let mut seen = BTreeSet::new();
    let mut has_points = false;
    let mut kept = Vec::with_capacity(set.len());
    for frame in set {
        if frame.is_points() {
            if has_points {
                debug!(stream = %frame.key, "Dropping extra point cloud frame");
                continue;
            }
            has_points = true;
            kept.push(frame);
            continue;
        }
        if !seen.insert(frame.key) {
            debug!(stream = %frame.key, format = %frame.format, "Dropping duplicate frame");
            continue;
        }
        kept.push(frame);
    }
    kept
}

struct ProcessorState {
    pipeline: FilterPipeline,
    seq: BTreeMap<StreamKey, u64>,
    aligned_seq: BTreeMap<StreamKey, u64>,
    point_cloud_seq: u64,
    images: BTreeMap<StreamKey, ImageBuffer>,
    aligned_images: BTreeMap<StreamKey, ImageBuffer>,
    send_counter: bool,
    counter: u64,
}

/// Frame callback of the image streams
pub struct FrameProcessor {
    publisher: Arc<dyn Publisher>,
    time_base: Arc<TimeBase>,
    outputs: ProcessorOutputs,
    align_depth: bool,
    state: Mutex<ProcessorState>,
}

impl FrameProcessor {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        time_base: Arc<TimeBase>,
        outputs: ProcessorOutputs,
        pipeline: FilterPipeline,
        images: BTreeMap<StreamKey, ImageBuffer>,
        aligned_images: BTreeMap<StreamKey, ImageBuffer>,
    ) -> Self {
        let align_depth = !outputs.aligned.is_empty();
        Self {
            publisher,
            time_base,
            outputs,
            align_depth,
            state: Mutex::new(ProcessorState {
                pipeline,
                seq: BTreeMap::new(),
                aligned_seq: BTreeMap::new(),
                point_cloud_seq: 0,
                images,
                aligned_images,
                send_counter: false,
                counter: 0,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ProcessorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Callback entry point
    ///
    /// Errors and panics drop the offending delivery and are logged; they
    /// never reach the caller's delivery thread.
    pub fn process_event(&self, event: FrameEvent) {
        let mut state = self.lock_state();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.handle_event(&mut state, event)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "An error has occurred during frame callback"),
            Err(_) => error!("Frame callback panicked, frame set dropped"),
        }
    }

    fn handle_event(&self, state: &mut ProcessorState, event: FrameEvent) -> Result<(), ProcessingError> {
        let Some(first) = event.first_frame() else {
            return Ok(());
        };
        let stamp = self.time_base.observe(first);

        match event {
            FrameEvent::Single(frame) => {
                debug!(
                    stream = %frame.key,
                    format = %frame.format,
                    timestamp_ms = frame.timestamp_ms,
                    "Single video frame arrived"
                );
                self.publish_frame(state, &frame, stamp)?;
            }
            FrameEvent::Set(set) => {
                debug!(frames = set.len(), "Frameset arrived");
                for frame in &set {
                    debug!(
                        stream = %frame.key,
                        format = %frame.format,
                        frame_number = frame.frame_number,
                        timestamp_ms = frame.timestamp_ms,
                        "Frameset member"
                    );
                }

                let raw_depth = if self.align_depth {
                    set.raw_depth().cloned()
                } else {
                    None
                };
                let filtered = state.pipeline.apply(set)?;

                for frame in demultiplex(&filtered) {
                    if frame.is_points() {
                        self.publish_point_cloud(state, frame, &filtered, stamp)?;
                    } else {
                        self.publish_frame(state, frame, stamp)?;
                    }
                }

                if let Some(raw_depth) = raw_depth {
                    let depth = filtered.raw_depth().unwrap_or(&raw_depth);
                    self.publish_aligned_depth(state, depth, &filtered, stamp)?;
                }
            }
        }

        if state.send_counter
            && let Some(topic) = &self.outputs.counter_topic
        {
            state.counter += 1;
            self.publisher.publish(
                topic,
                Message::Counter(CounterMessage {
                    stamp,
                    counter: state.counter,
                }),
            );
            state.send_counter = false;
        }
        Ok(())
    }

    fn publish_frame(&self, state: &mut ProcessorState, frame: &Frame, stamp: Stamp) -> Result<(), ProcessingError> {
        let output = self
            .outputs
            .images
            .get(&frame.key)
            .ok_or(ProcessingError::UnknownStream(frame.key))?;

        let seq = {
            let counter = state.seq.entry(frame.key).or_insert(0);
            *counter += 1;
            *counter
        };

        if !self.publisher.has_subscribers(&output.info_topic)
            && !self.publisher.has_subscribers(&output.image_topic)
        {
            return Ok(());
        }

        let pixels = frame.pixels().ok_or_else(|| ProcessingError::MalformedFrame {
            key: frame.key,
            reason: "image frame without pixel payload".to_string(),
        })?;
        let geometry = image_len(frame.width, frame.height, output.unit_step)
            .zip(frame.width.checked_mul(output.unit_step));
        let Some((expected, step)) = geometry else {
            return Err(ProcessingError::MalformedFrame {
                key: frame.key,
                reason: format!("{}x{} frame size overflows", frame.width, frame.height),
            });
        };
        if pixels.len() < expected {
            return Err(ProcessingError::MalformedFrame {
                key: frame.key,
                reason: format!(
                    "{} bytes for {}x{} at {} bytes per pixel",
                    pixels.len(),
                    frame.width,
                    frame.height,
                    output.unit_step
                ),
            });
        }

        if let Some(buffer) = state.images.get_mut(&frame.key) {
            buffer.fill_from(frame.width, frame.height, output.unit_step, &pixels[..expected]);
        }

        let header = Header::new(output.frame_id.clone(), stamp, seq);
        let mut camera_info =
            camera_info_for(&output.camera_info, &output.intrinsics, frame.width, frame.height);
        camera_info.header = header.clone();

        if let Some(exposure) = frame.metadata.actual_exposure {
            debug!(stream = %frame.key, exposure, "Actual Exposure");
        }

        self.publisher
            .publish(&output.info_topic, Message::CameraInfo(camera_info));
        self.publisher.publish(
            &output.image_topic,
            Message::Image(ImageMessage {
                header,
                width: frame.width,
                height: frame.height,
                encoding: output.encoding.to_string(),
                step,
                data: Arc::from(&pixels[..expected]),
            }),
        );
        output.diagnostics.tick(stamp);
        debug!(stream = %frame.key, seq, "Publish frame");

        state.send_counter = true;
        Ok(())
    }

    fn publish_point_cloud(
        &self,
        state: &mut ProcessorState,
        frame: &Frame,
        set: &FrameSet,
        stamp: Stamp,
    ) -> Result<(), ProcessingError> {
        let Some(output) = &self.outputs.point_cloud else {
            return Ok(());
        };
        if !self.publisher.has_subscribers(&output.topic) {
            return Ok(());
        }
        let points = frame.points().ok_or_else(|| ProcessingError::MalformedFrame {
            key: frame.key,
            reason: "point cloud frame without points".to_string(),
        })?;

        let texture = match output.texture {
            Some(key) => {
                let Some(texture) = set.get(key).and_then(Texture::from_frame) else {
                    debug!(texture = %key, "texture frame not found, skipping point cloud");
                    return Ok(());
                };
                Some(texture)
            }
            None => None,
        };

        let cloud = build_point_cloud(points, texture.as_ref());
        state.point_cloud_seq += 1;
        debug!(points = cloud.len(), "Publish point cloud");
        self.publisher.publish(
            &output.topic,
            Message::PointCloud(PointCloudMessage::new(
                Header::new(output.frame_id.clone(), stamp, state.point_cloud_seq),
                &cloud,
            )),
        );
        state.send_counter = true;
        Ok(())
    }

    fn publish_aligned_depth(
        &self,
        state: &mut ProcessorState,
        depth: &Frame,
        set: &FrameSet,
        stamp: Stamp,
    ) -> Result<(), ProcessingError> {
        let depth_intrinsics = self
            .outputs
            .depth_intrinsics
            .ok_or(ProcessingError::MissingCalibration(DEPTH))?
            .scaled_to(depth.width, depth.height);
        let pixels = depth.pixels().ok_or_else(|| ProcessingError::MalformedFrame {
            key: depth.key,
            reason: "depth frame without pixel payload".to_string(),
        })?;
        let depth_values = z16_from_bytes(pixels);
        let depth_len = image_len(depth.width, depth.height, 1).unwrap_or(usize::MAX);
        if depth_values.len() < depth_len {
            return Err(ProcessingError::MalformedFrame {
                key: depth.key,
                reason: "depth buffer shorter than its geometry".to_string(),
            });
        }

        for target in set.iter().filter(|f| f.key != DEPTH && !f.is_points()) {
            let Some(output) = self.outputs.aligned.get(&target.key) else {
                continue;
            };
            if !self.publisher.has_subscribers(&output.info_topic)
                && !self.publisher.has_subscribers(&output.image_topic)
            {
                continue;
            }

            let target_intrinsics = output
                .target_intrinsics
                .scaled_to(target.width, target.height);
            let aligned = align_depth_to_stream(
                &depth_values,
                &depth_intrinsics,
                self.outputs.depth_scale,
                &target_intrinsics,
                &output.depth_to_target,
            );
            let bytes = z16_to_bytes(&aligned);
            let unit_step = PixelFormat::Z16.bytes_per_pixel();
            if let Some(buffer) = state.aligned_images.get_mut(&target.key) {
                buffer.fill_from(target.width, target.height, unit_step, &bytes);
            }

            let seq = {
                let counter = state.aligned_seq.entry(target.key).or_insert(0);
                *counter += 1;
                *counter
            };
            let header = Header::new(output.frame_id.clone(), stamp, seq);
            let mut camera_info = camera_info_for(
                &output.camera_info,
                &output.target_intrinsics,
                target.width,
                target.height,
            );
            camera_info.header = header.clone();

            self.publisher
                .publish(&output.info_topic, Message::CameraInfo(camera_info));
            self.publisher.publish(
                &output.image_topic,
                Message::Image(ImageMessage {
                    header,
                    width: target.width,
                    height: target.height,
                    encoding: output.encoding.to_string(),
                    step: target.width.saturating_mul(unit_step),
                    data: Arc::from(bytes),
                }),
            );
            debug!(target = %target.key, seq, "Publish aligned depth");
        }
        Ok(())
    }

    /// Copy of the last image published for a stream
    pub fn last_image(&self, key: StreamKey) -> Option<ImageBuffer> {
        self.lock_state().images.get(&key).cloned()
    }

    /// Copy of the last depth image aligned to a stream
    pub fn last_aligned_image(&self, key: StreamKey) -> Option<ImageBuffer> {
        self.lock_state().aligned_images.get(&key).cloned()
    }

    /// Frames seen for a stream so far, published or not
    pub fn sequence(&self, key: StreamKey) -> u64 {
        self.lock_state().seq.get(&key).copied().unwrap_or(0)
    }

    /// Filter stage names in execution order
    pub fn filter_names(&self) -> Vec<&'static str> {
        self.lock_state().pipeline.names()
    }

    pub fn outputs(&self) -> &ProcessorOutputs {
        &self.outputs
    }
}

/// Camera info matching a frame's resolution
///
/// Decimated frames are smaller than the negotiated mode, so the calibration
/// is rescaled when the sizes differ.
fn camera_info_for(info: &CameraInfo, intrinsics: &Intrinsics, width: u32, height: u32) -> CameraInfo {
    if info.width == width && info.height == height {
        return info.clone();
    }
    let frame_id = info.header.frame_id.clone();
    CameraInfo::from_intrinsics(&intrinsics.scaled_to(width, height), frame_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::catalog::encoding;
    use crate::backends::camera::types::{COLOR, DistortionModel, PointSet};
    use crate::processing::time_base::ManualClock;
    use crate::publish::MemoryPublisher;

    fn intrinsics(width: u32, height: u32) -> Intrinsics {
        Intrinsics {
            width,
            height,
            ppx: width as f32 / 2.0,
            ppy: height as f32 / 2.0,
            fx: width as f32,
            fy: width as f32,
            model: DistortionModel::None,
            coeffs: [0.0; 5],
        }
    }

    fn image_output(name: &str, encoding: &'static str, unit_step: u32, w: u32, h: u32) -> ImageOutput {
        let frame_id = format!("camera_{}_optical_frame", name);
        ImageOutput {
            image_topic: format!("{}/image_raw", name),
            info_topic: format!("{}/camera_info", name),
            frame_id: frame_id.clone(),
            encoding,
            unit_step,
            intrinsics: intrinsics(w, h),
            camera_info: CameraInfo::from_intrinsics(&intrinsics(w, h), frame_id),
            diagnostics: Arc::new(FrequencyDiagnostics::new(format!("{}/image_raw", name), 30.0)),
        }
    }

    fn processor(publisher: Arc<MemoryPublisher>) -> FrameProcessor {
        let mut outputs = ProcessorOutputs {
            depth_scale: 0.001,
            counter_topic: Some("depth/counter".to_string()),
            depth_intrinsics: Some(intrinsics(2, 2)),
            ..Default::default()
        };
        outputs
            .images
            .insert(DEPTH, image_output("depth", encoding::MONO16, 2, 2, 2));
        outputs
            .images
            .insert(COLOR, image_output("color", encoding::RGB8, 3, 2, 2));
        let time_base = Arc::new(TimeBase::new(
            Arc::new(ManualClock::new(Stamp::from_secs_f64(10.0))),
            false,
            0.0,
        ));
        FrameProcessor::new(
            publisher,
            time_base,
            outputs,
            FilterPipeline::default(),
            BTreeMap::new(),
            BTreeMap::new(),
        )
    }

    fn depth_frame(value: u16) -> Frame {
        Frame::video(DEPTH, PixelFormat::Z16, 2, 2, z16_to_bytes(&[value; 4]), 100.0, 1)
    }

    #[test]
    fn test_demultiplex_keeps_first_per_key() {
        let points = Frame {
            data: crate::backends::camera::types::FrameData::Points(Arc::new(PointSet::default())),
            format: PixelFormat::Xyz32f,
            ..depth_frame(1)
        };
        let set = FrameSet::new(vec![depth_frame(1), depth_frame(2), points.clone(), points]);
        let kept = demultiplex(&set);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].pixels(), depth_frame(1).pixels());
        assert!(kept[1].is_points());
    }

    #[test]
    fn test_duplicate_depth_never_published() {
        let publisher = Arc::new(MemoryPublisher::subscribed());
        let processor = processor(publisher.clone());
        processor.process_event(FrameEvent::Set(FrameSet::new(vec![depth_frame(1), depth_frame(2)])));

        let images = publisher.messages("depth/image_raw");
        assert_eq!(images.len(), 1);
        let Message::Image(image) = &images[0] else {
            panic!("expected image");
        };
        assert_eq!(z16_from_bytes(&image.data), vec![1; 4]);
        assert_eq!(image.step, 4);
        assert_eq!(image.header.frame_id, "camera_depth_optical_frame");
        assert_eq!(processor.sequence(DEPTH), 1);
    }

    #[test]
    fn test_sequence_counts_without_subscribers() {
        let publisher = Arc::new(MemoryPublisher::new());
        let processor = processor(publisher.clone());
        processor.process_event(FrameEvent::Single(depth_frame(5)));
        processor.process_event(FrameEvent::Single(depth_frame(5)));
        assert_eq!(processor.sequence(DEPTH), 2);
        assert!(publisher.all().is_empty());

        publisher.subscribe("depth/camera_info");
        processor.process_event(FrameEvent::Single(depth_frame(5)));
        let Some(Message::Image(image)) = publisher.messages("depth/image_raw").pop() else {
            panic!("expected image");
        };
        assert_eq!(image.header.seq, 3);
        // The counter topic has no subscriber gate
        assert_eq!(publisher.count("depth/counter"), 1);
    }

    #[test]
    fn test_malformed_frame_dropped_and_next_processed() {
        let publisher = Arc::new(MemoryPublisher::subscribed());
        let processor = processor(publisher.clone());
        let short = Frame::video(DEPTH, PixelFormat::Z16, 2, 2, vec![0u8; 3], 100.0, 1);
        processor.process_event(FrameEvent::Single(short));
        assert_eq!(publisher.count("depth/image_raw"), 0);
        assert_eq!(publisher.count("depth/counter"), 0);

        processor.process_event(FrameEvent::Single(depth_frame(7)));
        assert_eq!(publisher.count("depth/image_raw"), 1);
    }

    #[test]
    fn test_oversized_geometry_is_malformed() {
        let publisher = Arc::new(MemoryPublisher::subscribed());
        let processor = processor(publisher.clone());
        let huge = Frame::video(DEPTH, PixelFormat::Z16, u32::MAX, u32::MAX, vec![0u8; 8], 100.0, 1);
        processor.process_event(FrameEvent::Single(huge));
        assert_eq!(publisher.count("depth/image_raw"), 0);

        processor.process_event(FrameEvent::Single(depth_frame(3)));
        assert_eq!(publisher.count("depth/image_raw"), 1);
    }

    #[test]
    fn test_counter_increments_per_callback() {
        let publisher = Arc::new(MemoryPublisher::subscribed());
        let processor = processor(publisher.clone());
        let color = Frame::video(COLOR, PixelFormat::Rgb8, 2, 2, vec![9u8; 12], 100.0, 1);
        processor.process_event(FrameEvent::Set(FrameSet::new(vec![depth_frame(1), color])));
        processor.process_event(FrameEvent::Single(depth_frame(1)));

        let counters: Vec<u64> = publisher
            .messages("depth/counter")
            .into_iter()
            .filter_map(|m| match m {
                Message::Counter(c) => Some(c.counter),
                _ => None,
            })
            .collect();
        assert_eq!(counters, vec![1, 2]);
    }

    #[test]
    fn test_camera_info_rescaled_for_smaller_frame() {
        let info = CameraInfo::from_intrinsics(&intrinsics(4, 4), "x");
        let scaled = camera_info_for(&info, &intrinsics(4, 4), 2, 2);
        assert_eq!(scaled.width, 2);
        assert_eq!(scaled.k[0], 2.0);
        assert_eq!(scaled.header.frame_id, "x");
        assert_eq!(camera_info_for(&info, &intrinsics(4, 4), 4, 4), info);
    }
}
