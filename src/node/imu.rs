// SPDX-License-Identifier: GPL-3.0-only

//! Inertial sample publishing
//!
//! Gyro and accel samples arrive on the motion sensor's own callback. They
//! are stamped from the shared time base (origin plus elapsed hardware time)
//! and dropped until an image frame has initialized it.

use crate::backends::camera::types::{Frame, FrameData, FrameEvent, GYRO, StreamKey};
use crate::errors::ProcessingError;
use crate::processing::time_base::TimeBase;
use crate::publish::messages::{Header, ImuMessage, Message};
use crate::publish::Publisher;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

/// Topics and frame id of one inertial stream
#[derive(Debug, Clone, PartialEq)]
pub struct ImuOutput {
    pub sample_topic: String,
    pub info_topic: String,
    pub frame_id: String,
}

pub struct ImuProcessor {
    publisher: Arc<dyn Publisher>,
    time_base: Arc<TimeBase>,
    outputs: BTreeMap<StreamKey, ImuOutput>,
    seq: Mutex<BTreeMap<StreamKey, u64>>,
}

impl ImuProcessor {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        time_base: Arc<TimeBase>,
        outputs: BTreeMap<StreamKey, ImuOutput>,
    ) -> Self {
        Self {
            publisher,
            time_base,
            outputs,
            seq: Mutex::new(BTreeMap::new()),
        }
    }

    /// Callback entry point; failures are logged, never propagated
    pub fn process_event(&self, event: FrameEvent) {
        let frames = match event {
            FrameEvent::Single(frame) => vec![frame],
            FrameEvent::Set(set) => set.into_frames(),
        };
        for frame in frames {
            match panic::catch_unwind(AssertUnwindSafe(|| self.publish_sample(&frame))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(error = %err, "An error has occurred during imu callback"),
                Err(_) => error!(stream = %frame.key, "Imu callback panicked, sample dropped"),
            }
        }
    }

    fn publish_sample(&self, frame: &Frame) -> Result<(), ProcessingError> {
        let Some(stamp) = self.time_base.elapsed_stamp(frame.timestamp_ms) else {
            return Ok(());
        };
        debug!(
            stream = %frame.key,
            domain = ?frame.domain,
            timestamp_ms = frame.timestamp_ms,
            "Frame arrived"
        );

        let output = self
            .outputs
            .get(&frame.key)
            .ok_or(ProcessingError::UnknownStream(frame.key))?;
        if !self.publisher.has_subscribers(&output.info_topic)
            && !self.publisher.has_subscribers(&output.sample_topic)
        {
            return Ok(());
        }

        let FrameData::Motion(axes) = frame.data else {
            return Err(ProcessingError::MalformedFrame {
                key: frame.key,
                reason: "inertial frame without motion payload".to_string(),
            });
        };

        let seq = {
            let mut seq = self.seq.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let counter = seq.entry(frame.key).or_insert(0);
            *counter += 1;
            *counter
        };

        let mut message = ImuMessage::new(Header::new(output.frame_id.clone(), stamp, seq));
        let axes = axes.map(f64::from);
        if frame.key == GYRO {
            message.angular_velocity = axes;
        } else {
            message.linear_acceleration = axes;
        }
        self.publisher
            .publish(&output.sample_topic, Message::Imu(message));
        debug!(stream = %frame.key, "Publish imu sample");
        Ok(())
    }
}
