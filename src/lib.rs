// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Scanfleet Developers. All Rights Reserved.

//! Scanfleet: client runtime for fleets of networked laser-line 3D scan
//! heads.
//!
//! A host application discovers scan heads on the local network, declares
//! which of them participate in a scan, configures per-head exposure and
//! geometry, authors a phase table describing how the heads time-slice
//! their cameras and lasers within each scan period, starts synchronized
//! scanning, and consumes fully assembled profiles from each head.
//!
//! # Architecture
//!
//! ```text
//! ┌──────┐   ┌────────────┐     ┌────────────────────────────────────┐
//! │ Host │──►│ ScanSystem │──►N │ ScanHead                           │
//! └──────┘   │ (discovery,│     │  control stream ──► head           │
//!            │  phases,   │     │  data stream ──► receiver thread   │
//!            │ keep-alive)│     │   └► reassembly ──► ProfileRing ───│──► Host
//!            └────────────┘     └────────────────────────────────────┘
//! ```
//!
//! Each head runs two TCP connections: a control stream for framed
//! request/reply commands and a data stream on which the head pushes
//! profile datagrams while scanning. A per-head receiver thread reassembles
//! datagrams into [`Profile`]s, applies the camera-to-mill alignment, and
//! publishes into a bounded ring the host drains at its own pace. Lost
//! datagrams are never retransmitted; they surface as profiles whose
//! `packets_received` is short of `packets_expected`.
//!
//! # Example
//!
//! ```ignore
//! use scanfleet::{Camera, DataFormat, ScanSystem, ScanWindow, Units};
//! use std::time::Duration;
//!
//! let mut system = ScanSystem::new(Units::Inches);
//! system.discover()?;
//! system.create_scan_head(99001, 0)?;
//!
//! let head = system.scan_head_by_serial(99001).unwrap();
//! head.set_window(&ScanWindow::rectangular(30.0, -30.0, -30.0, 30.0)?)?;
//!
//! system.phase_create();
//! system.phase_insert_camera(99001, Camera::A, None)?;
//!
//! system.connect(Duration::from_secs(3))?;
//! let period_us = system.min_scan_period_us();
//! system.start_scanning(period_us, DataFormat::XyBrightnessFull)?;
//!
//! let head = system.scan_head_by_serial(99001).unwrap();
//! head.wait_until_available_profiles(100, Duration::from_secs(1));
//! for profile in head.get_profiles(100) {
//!     // profile.data holds (x, y, brightness) in 1/1000 inch
//! }
//!
//! system.stop_scanning()?;
//! system.disconnect()?;
//! ```

pub mod datagram;
pub mod discovery;
pub mod error;
pub mod geometry;
pub mod head;
pub mod net;
pub mod phase;
pub mod profile;
pub mod spec;
pub mod system;
pub mod types;
pub mod wire;

// Re-exports for convenience
pub use discovery::DiscoveredHead;
pub use error::{Error, Result};
pub use geometry::{Alignment, Point2D, ScanWindow, WindowConstraint};
pub use head::{CameraImage, HeadStatus, ScanHead};
pub use phase::{CompiledPhaseTable, PhaseTable};
pub use profile::{Profile, ProfilePoint, ProfileRing};
pub use spec::{HeadType, HeadTypeSpec};
pub use system::ScanSystem;
pub use types::{
    CableOrientation, Camera, DataFormat, Encoder, HeadCapabilities, HeadConfiguration, Laser,
    Units,
};
