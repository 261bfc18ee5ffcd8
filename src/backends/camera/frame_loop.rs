// SPDX-License-Identifier: GPL-3.0-only
//! Delivery thread lifecycle
//!
//! Sensors and the software synchronizer each run one background thread
//! that repeatedly produces or merges frames and hands them to a callback.
//! [`DeliveryLoop`] owns such a thread: it starts it, asks it to stop, and
//! joins it so that no callback is still running once `stop()` returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Returned by one iteration of a delivery loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// Handle to a running delivery thread
pub struct DeliveryLoop {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl DeliveryLoop {
    /// Spawn a thread calling `step` until it returns [`LoopAction::Stop`]
    /// or the loop is stopped
    pub fn start<F>(name: &str, mut step: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::start_with_state(name, (), move |_| step(), |_| {})
    }

    /// Spawn a thread owning `state`
    ///
    /// `step` runs once per iteration; `finish` runs exactly once on the way
    /// out (stop request, `LoopAction::Stop`), which is where a synchronizer
    /// flushes what it still holds.
    pub fn start_with_state<S, F, D>(name: &str, mut state: S, mut step: F, finish: D) -> Self
    where
        S: Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
        D: FnOnce(&mut S) + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, "Starting delivery loop");

        let spawn_result = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %thread_name, "Delivery thread started");
                while !thread_stop.load(Ordering::SeqCst) {
                    if step(&mut state) == LoopAction::Stop {
                        debug!(name = %thread_name, "Loop requested stop");
                        break;
                    }
                }
                finish(&mut state);
                info!(name = %thread_name, "Delivery thread exiting");
            });

        let thread_handle = match spawn_result {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to spawn delivery thread");
                None
            }
        };

        Self {
            thread_handle,
            stop_signal,
            name: name.to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Ask the thread to stop without waiting
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting delivery loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the thread and wait until its last callback has returned
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread without signalling it
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Stopped from inside its own callback: the loop exits on the next check
                return;
            }
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Delivery thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Delivery thread finished");
            }
        }
    }
}

impl Drop for DeliveryLoop {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "DeliveryLoop dropped, stopping thread");
            self.stop();
        }
    }
}
