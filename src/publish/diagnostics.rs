// SPDX-License-Identifier: GPL-3.0-only

//! Publish-rate diagnostics
//!
//! Each image topic tracks the stamps of its last few publishes and compares
//! the observed rate with the negotiated frame rate.

use crate::constants::{DIAGNOSTICS_TOLERANCE, DIAGNOSTICS_WINDOW};
use crate::processing::time_base::Stamp;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyStatus {
    /// Fewer than two publishes in the window
    NoData,
    Ok,
    TooSlow,
    TooFast,
}

#[derive(Debug)]
pub struct FrequencyDiagnostics {
    topic: String,
    expected_hz: f64,
    tolerance: f64,
    window: usize,
    stamps: Mutex<VecDeque<Stamp>>,
}

impl FrequencyDiagnostics {
    pub fn new(topic: impl Into<String>, expected_hz: f64) -> Self {
        Self {
            topic: topic.into(),
            expected_hz,
            tolerance: DIAGNOSTICS_TOLERANCE,
            window: DIAGNOSTICS_WINDOW,
            stamps: Mutex::new(VecDeque::with_capacity(DIAGNOSTICS_WINDOW)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn expected_hz(&self) -> f64 {
        self.expected_hz
    }

    /// Record one publish
    pub fn tick(&self, stamp: Stamp) {
        if let Ok(mut stamps) = self.stamps.lock() {
            if stamps.len() == self.window {
                stamps.pop_front();
            }
            stamps.push_back(stamp);
        }
    }

    /// Observed rate over the window
    pub fn frequency(&self) -> Option<f64> {
        let stamps = self.stamps.lock().ok()?;
        let (first, last) = (stamps.front()?, stamps.back()?);
        let span = last.as_secs_f64() - first.as_secs_f64();
        if stamps.len() < 2 || span <= 0.0 {
            return None;
        }
        Some((stamps.len() - 1) as f64 / span)
    }

    pub fn status(&self) -> FrequencyStatus {
        let Some(hz) = self.frequency() else {
            return FrequencyStatus::NoData;
        };
        if hz < self.expected_hz * (1.0 - self.tolerance) {
            FrequencyStatus::TooSlow
        } else if hz > self.expected_hz * (1.0 + self.tolerance) {
            FrequencyStatus::TooFast
        } else {
            FrequencyStatus::Ok
        }
    }
}
