// SPDX-License-Identifier: GPL-3.0-only

//! Hardware collaborator layer
//!
//! Everything below the driver node: the device/sensor abstraction, the
//! shared frame types and the stream bookkeeping done before frames reach
//! the processing pipeline.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 Driver node                  │
//! └────────────────────┬────────────────────────┘
//!                      │ FrameEvent callbacks
//! ┌────────────────────┴────────────────────────┐
//! │              Camera backend                  │
//! │  ┌─────────────┐    ┌──────────────────┐    │
//! │  │  Negotiator │    │   Synchronizer   │    │
//! │  └─────────────┘    └──────────────────┘    │
//! │  ┌─────────────────────────────────────┐    │
//! │  │  CameraDevice / Sensor (simulated)  │    │
//! │  └─────────────────────────────────────┘    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod camera;
