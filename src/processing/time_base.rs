// SPDX-License-Identifier: GPL-3.0-only

//! Time-base reconciliation
//!
//! Hardware timestamps are device-relative milliseconds. On the first frame
//! after streaming starts the reconciler pins a (wall clock, hardware clock)
//! origin pair; afterwards every hardware timestamp maps to
//! `wall_origin + (hw - hw_origin)`. In synchronized mode frames are stamped
//! with the host clock at callback time plus a fixed offset instead.
//!
//! The origin is set at most once even when several sensor threads race on
//! their first frame.

use crate::backends::camera::types::{Frame, TimestampDomain};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{info, warn};

/// Output timestamp, nanoseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize)]
pub struct Stamp(pub i64);

impl Stamp {
    pub fn from_secs_f64(secs: f64) -> Self {
        Stamp((secs * 1e9).round() as i64)
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// Shift by a (possibly fractional) number of milliseconds
    pub fn offset_ms(&self, ms: f64) -> Self {
        Stamp(self.0 + (ms * 1e6).round() as i64)
    }
}

impl std::fmt::Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.0.div_euclid(1_000_000_000), self.0.rem_euclid(1_000_000_000))
    }
}

/// Wall-clock source
pub trait Clock: Send + Sync {
    fn now(&self) -> Stamp;
}

/// Host system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Stamp {
        let now = chrono::Utc::now();
        Stamp(now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros() * 1000))
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Stamp) -> Self {
        Self {
            nanos: AtomicI64::new(start.0),
        }
    }

    pub fn set(&self, stamp: Stamp) {
        self.nanos.store(stamp.0, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: f64) {
        self.nanos
            .fetch_add((ms * 1e6).round() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Stamp {
        Stamp(self.nanos.load(Ordering::SeqCst))
    }
}

/// Origin pair pinned on the first frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeOrigin {
    pub wall: Stamp,
    pub hardware_ms: f64,
}

/// UNINITIALIZED until the first frame, then INITIALIZED for the session
pub struct TimeBase {
    origin: OnceLock<TimeOrigin>,
    synchronized: bool,
    offset_secs: f64,
    clock: std::sync::Arc<dyn Clock>,
}

impl TimeBase {
    pub fn new(clock: std::sync::Arc<dyn Clock>, synchronized: bool, offset_secs: f64) -> Self {
        Self {
            origin: OnceLock::new(),
            synchronized,
            offset_secs,
            clock,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.origin.get().is_some()
    }

    pub fn origin(&self) -> Option<TimeOrigin> {
        self.origin.get().copied()
    }

    /// Pin the origin from `frame` unless already pinned
    ///
    /// Returns true for the caller that performed the initialization.
    pub fn initialize(&self, frame: &Frame) -> bool {
        if self.origin.get().is_some() {
            return false;
        }
        let mut initialized_here = false;
        self.origin.get_or_init(|| {
            initialized_here = true;
            TimeOrigin {
                wall: self.clock.now(),
                hardware_ms: frame.timestamp_ms,
            }
        });
        if initialized_here {
            if frame.domain == TimestampDomain::SystemTime {
                warn!(
                    stream = %frame.key,
                    "Frame metadata isn't available! (timestamp domain is system time)"
                );
            }
            info!(stream = %frame.key, hardware_ms = frame.timestamp_ms, "Time base initialized");
        }
        initialized_here
    }

    /// Initialize if needed, then stamp the frame
    pub fn observe(&self, frame: &Frame) -> Stamp {
        self.initialize(frame);
        self.stamp(frame.timestamp_ms)
            .unwrap_or_else(|| self.clock.now())
    }

    /// Output timestamp for a hardware timestamp, `None` before initialization
    pub fn stamp(&self, hardware_ms: f64) -> Option<Stamp> {
        let origin = self.origin.get()?;
        if self.synchronized {
            return Some(Stamp(
                self.clock.now().0 + (self.offset_secs * 1e9).round() as i64,
            ));
        }
        Some(origin.wall.offset_ms(hardware_ms - origin.hardware_ms))
    }

    /// Origin plus elapsed hardware time, regardless of synchronized mode
    pub fn elapsed_stamp(&self, hardware_ms: f64) -> Option<Stamp> {
        let origin = self.origin.get()?;
        Some(origin.wall.offset_ms(hardware_ms - origin.hardware_ms))
    }
}
