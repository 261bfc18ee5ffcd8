// SPDX-License-Identifier: GPL-3.0-only

//! Software frame synchronizer
//!
//! Sensors deliver their frames independently. In synchronized mode every
//! sensor feeds this synchronizer instead of the node, and a worker thread
//! groups frames captured at the same instant into one [`FrameSet`] before
//! invoking the node callback.

use super::FrameCallback;
use super::frame_loop::{DeliveryLoop, LoopAction};
use super::types::{BackendError, BackendResult, Frame, FrameEvent, FrameSet, StreamKey};
use crate::constants::SYNC_FALLBACK_TIMEOUT;
use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Groups a stream of frames into frame sets by hardware timestamp
///
/// A pending set is emitted when a frame for a stream it already holds
/// arrives, when a frame falls outside the timestamp tolerance, when it
/// holds every expected stream, or when the caller flushes it.
#[derive(Debug)]
pub struct FrameGrouper {
    expected: BTreeSet<StreamKey>,
    tolerance_ms: f64,
    pending: Vec<Frame>,
}

impl FrameGrouper {
    pub fn new(expected: BTreeSet<StreamKey>, tolerance_ms: f64) -> Self {
        Self {
            expected,
            tolerance_ms,
            pending: Vec::new(),
        }
    }

    /// Half the period of the fastest stream
    pub fn tolerance_for(max_fps: u32) -> f64 {
        if max_fps == 0 {
            return SYNC_FALLBACK_TIMEOUT.as_secs_f64() * 1000.0 / 2.0;
        }
        1000.0 / f64::from(max_fps) / 2.0
    }

    /// Feed one frame, returning any sets completed by it
    pub fn accept(&mut self, frame: Frame) -> Vec<FrameSet> {
        let mut ready = Vec::new();

        if let Some(anchor) = self.pending.first() {
            let repeated = self.pending.iter().any(|f| f.key == frame.key);
            let drifted = (frame.timestamp_ms - anchor.timestamp_ms).abs() > self.tolerance_ms;
            if repeated || drifted {
                ready.extend(self.flush());
            }
        }

        self.pending.push(frame);

        let complete = !self.expected.is_empty()
            && self
                .expected
                .iter()
                .all(|key| self.pending.iter().any(|f| f.key == *key));
        if complete {
            ready.extend(self.flush());
        }
        ready
    }

    /// Emit whatever is pending
    pub fn flush(&mut self) -> Option<FrameSet> {
        if self.pending.is_empty() {
            return None;
        }
        Some(FrameSet::new(std::mem::take(&mut self.pending)))
    }
}

struct WorkerState {
    receiver: Receiver<Frame>,
    grouper: FrameGrouper,
    timeout: Duration,
    callback: FrameCallback,
}

/// Merges per-sensor deliveries into frame sets on a dedicated thread
pub struct Synchronizer {
    sender: Sender<Frame>,
    receiver: Mutex<Option<Receiver<Frame>>>,
    worker: Mutex<Option<DeliveryLoop>>,
    expected: BTreeSet<StreamKey>,
    tolerance_ms: f64,
    timeout: Duration,
}

impl Synchronizer {
    /// Synchronizer expecting `expected` streams, the fastest running at `max_fps`
    pub fn new(expected: BTreeSet<StreamKey>, max_fps: u32) -> Self {
        let (sender, receiver) = mpsc::channel();
        let timeout = if max_fps == 0 {
            SYNC_FALLBACK_TIMEOUT
        } else {
            Duration::from_secs_f64(1.0 / f64::from(max_fps))
        };
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
            expected,
            tolerance_ms: FrameGrouper::tolerance_for(max_fps),
            timeout,
        }
    }

    /// Callback handed to sensors in place of the node callback
    pub fn sink(&self) -> FrameCallback {
        let sender = self.sender.clone();
        Arc::new(move |event: FrameEvent| {
            let frames = match event {
                FrameEvent::Single(frame) => vec![frame],
                FrameEvent::Set(set) => set.into_frames(),
            };
            for frame in frames {
                if sender.send(frame).is_err() {
                    debug!("Synchronizer is gone, dropping frame");
                    return;
                }
            }
        })
    }

    /// Start the worker thread delivering merged sets to `callback`
    pub fn start(&self, callback: FrameCallback) -> BackendResult<()> {
        let receiver = self
            .receiver
            .lock()
            .map_err(|_| BackendError::Other("synchronizer lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| BackendError::WrongState("synchronizer already started".to_string()))?;

        let state = WorkerState {
            receiver,
            grouper: FrameGrouper::new(self.expected.clone(), self.tolerance_ms),
            timeout: self.timeout,
            callback,
        };

        let worker = DeliveryLoop::start_with_state(
            "frame-synchronizer",
            state,
            |state| match state.receiver.recv_timeout(state.timeout) {
                Ok(frame) => {
                    for set in state.grouper.accept(frame) {
                        (state.callback)(FrameEvent::Set(set));
                    }
                    LoopAction::Continue
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(set) = state.grouper.flush() {
                        (state.callback)(FrameEvent::Set(set));
                    }
                    LoopAction::Continue
                }
                Err(RecvTimeoutError::Disconnected) => LoopAction::Stop,
            },
            |state| {
                if let Some(set) = state.grouper.flush() {
                    (state.callback)(FrameEvent::Set(set));
                }
            },
        );

        match self.worker.lock() {
            Ok(mut slot) => *slot = Some(worker),
            Err(_) => warn!("Synchronizer worker lock poisoned"),
        }
        Ok(())
    }

    /// Stop the worker, delivering any pending partial set first
    pub fn stop(&self) {
        let worker = match self.worker.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(mut worker) = worker {
            worker.stop();
        }
    }
}
