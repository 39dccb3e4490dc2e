// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Scanfleet Developers. All Rights Reserved.

//! Phase table authoring and compilation.
//!
//! A phase table time-multiplexes the scan period: each phase lists which
//! `(head, camera, laser)` triples expose together, and compilation turns
//! the authored table into per-phase durations plus the minimum total
//! duration the table can run at.
//!
//! Compilation is pure with respect to head state: it reads each head's
//! current configuration and minimum scan period at compile time, produces a
//! fresh [`CompiledPhaseTable`], and can be called repeatedly.
//!
//! The duration solver tracks, per `(head, camera)`, the time elapsed since
//! that camera last exposed. A camera cannot be used again until it has both
//! read out all columns inside its scan window (the head's minimum scan
//! period) and paid a fixed inter-frame overhead. The table is walked twice
//! so that constraints wrapping from the end of the table back to its start
//! are honored.

use crate::error::{Error, Result};
use crate::types::{Camera, HeadConfiguration, Laser};
use std::collections::HashMap;

/// Camera row readout time in nanoseconds.
const ROW_TIME_NS: f64 = 3210.0;
/// Rows of camera overhead paid on every frame.
const OVERHEAD_ROWS: f64 = 42.0;
/// Safety margin rows added on top of the overhead.
const SAFETY_MARGIN_ROWS: f64 = 3.0;

/// Cameras start exposing this long before the laser turns on. Phase end
/// offsets and the minimum scan period account for it so a scheduler tick
/// cannot land inside an exposure.
pub const CAMERA_START_EARLY_OFFSET_NS: u32 = 9500;

/// Mandatory dead time between consecutive uses of the same camera.
pub fn frame_overhead_time_us() -> u32 {
    (ROW_TIME_NS * (4.0 + OVERHEAD_ROWS + SAFETY_MARGIN_ROWS) / 1000.0).ceil() as u32
}

/// [`CAMERA_START_EARLY_OFFSET_NS`] rounded up to microseconds.
pub fn camera_start_early_offset_us() -> u32 {
    (f64::from(CAMERA_START_EARLY_OFFSET_NS) / 1000.0).ceil() as u32
}

/// Head facts the phase table needs for authoring and compilation.
///
/// Implemented by [`crate::head::ScanHead`]; the indirection keeps the
/// solver testable against fixtures with no sockets behind them.
pub trait PhaseHead {
    /// The head's current exposure configuration.
    fn configuration(&self) -> HeadConfiguration;
    /// Minimum scan period, window readout included.
    fn min_scan_period_us(&self) -> u32;
    /// Upper bound on phase table elements for this head.
    fn max_phase_elements(&self) -> u32;
    /// Laser paired with `camera`, on camera-primary heads.
    fn paired_laser(&self, camera: Camera) -> Option<Laser>;
    /// Camera paired with `laser`, on laser-primary heads.
    fn paired_camera(&self, laser: Laser) -> Option<Camera>;
    /// Whether a configuration is applicable to this head.
    fn is_configuration_valid(&self, cfg: &HeadConfiguration) -> bool;
}

/// One authored element: a head exposing one camera/laser pair, optionally
/// with a configuration overriding the head's own during this element.
#[derive(Clone, Debug)]
pub struct PhaseElement {
    pub head: usize,
    pub camera: Camera,
    pub laser: Laser,
    /// Element-specific configuration; `None` reads the head's current
    /// configuration at compile time.
    pub config: Option<HeadConfiguration>,
}

/// A compiled element with its configuration resolved.
#[derive(Clone, Debug)]
pub struct CompiledElement {
    pub head: usize,
    pub camera: Camera,
    pub laser: Laser,
    pub config: HeadConfiguration,
}

/// One compiled phase.
#[derive(Clone, Debug, Default)]
pub struct CompiledPhase {
    pub duration_us: u32,
    pub elements: Vec<CompiledElement>,
}

impl CompiledPhase {
    fn new() -> Self {
        Self::default()
    }
}

/// Result of compiling a phase table. Never mutated in place; every compile
/// produces a fresh value.
#[derive(Clone, Debug, Default)]
pub struct CompiledPhaseTable {
    pub total_duration_us: u32,
    pub phases: Vec<CompiledPhase>,
}

/// The authored phase table.
#[derive(Debug, Default)]
pub struct PhaseTable {
    phases: Vec<Vec<PhaseElement>>,
    element_counts: HashMap<usize, u32>,
}

impl PhaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of authored phases.
    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }

    /// Drops all phases and elements.
    pub fn reset(&mut self) {
        self.phases.clear();
        self.element_counts.clear();
    }

    /// Appends an empty phase.
    pub fn create_phase(&mut self) {
        self.phases.push(Vec::new());
    }

    /// Adds `(head, camera)` to the last phase, pairing the laser through
    /// the head's configuration groups.
    pub fn insert_camera<H: PhaseHead>(
        &mut self,
        head_index: usize,
        head: &H,
        camera: Camera,
        config: Option<HeadConfiguration>,
    ) -> Result<()> {
        if self.phases.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let laser = head.paired_laser(camera).ok_or(Error::InvalidArgument)?;
        self.insert(head_index, head, camera, laser, config)
    }

    /// Adds `(head, laser)` to the last phase, pairing the camera through
    /// the head's configuration groups.
    pub fn insert_laser<H: PhaseHead>(
        &mut self,
        head_index: usize,
        head: &H,
        laser: Laser,
        config: Option<HeadConfiguration>,
    ) -> Result<()> {
        if self.phases.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let camera = head.paired_camera(laser).ok_or(Error::InvalidArgument)?;
        self.insert(head_index, head, camera, laser, config)
    }

    fn insert<H: PhaseHead>(
        &mut self,
        head_index: usize,
        head: &H,
        camera: Camera,
        laser: Laser,
        config: Option<HeadConfiguration>,
    ) -> Result<()> {
        let count = self.element_counts.entry(head_index).or_insert(0);
        if *count >= head.max_phase_elements() {
            return Err(Error::NoMoreRoom);
        }

        let phase = match self.phases.last_mut() {
            Some(phase) => phase,
            None => return Err(Error::InvalidArgument),
        };
        if phase
            .iter()
            .any(|el| el.head == head_index && el.camera == camera)
        {
            return Err(Error::InvalidArgument);
        }

        if let Some(cfg) = config.as_ref() {
            if !head.is_configuration_valid(cfg) {
                return Err(Error::InvalidArgument);
            }
        }

        *count += 1;
        phase.push(PhaseElement {
            head: head_index,
            camera,
            laser,
            config,
        });

        Ok(())
    }

    /// Compiles the table against the current state of `heads`.
    pub fn compile<H: PhaseHead>(&self, heads: &[H]) -> CompiledPhaseTable {
        let mut table = CompiledPhaseTable::default();

        // Seed each phase's duration with the longest laser on time among
        // its elements, resolving element configurations as we go.
        for authored in &self.phases {
            let mut phase = CompiledPhase::new();
            for el in authored {
                let config = match el.config {
                    Some(cfg) => cfg,
                    None => heads[el.head].configuration(),
                };
                if config.laser_on_max_us > phase.duration_us {
                    phase.duration_us = config.laser_on_max_us;
                }
                phase.elements.push(CompiledElement {
                    head: el.head,
                    camera: el.camera,
                    laser: el.laser,
                    config,
                });
            }
            table.phases.push(phase);
        }

        let frame_overhead_us = i64::from(frame_overhead_time_us());

        // Elapsed microseconds since each (head, camera) was last seen. Two
        // iterations: the second applies constraints that wrap around from
        // the end of the table to its start.
        let mut accum: HashMap<(usize, Camera), u32> = HashMap::new();

        for _ in 0..2 {
            for phase in &mut table.phases {
                for elapsed in accum.values_mut() {
                    *elapsed += phase.duration_us;
                }

                for el in &phase.elements {
                    let key = (el.head, el.camera);
                    if let Some(&last_seen) = accum.get(&key) {
                        let min_scan_period = i64::from(heads[el.head].min_scan_period_us());
                        let last_seen = i64::from(last_seen);
                        let laser_on_max = i64::from(el.config.laser_on_max_us);

                        // Time to read out the columns inside the window.
                        let adj_period = min_scan_period - last_seen;
                        // Overhead between scans on the same camera.
                        let adj_fot = frame_overhead_us - (last_seen - laser_on_max);

                        let adj = adj_period.max(adj_fot);
                        if adj > 0 {
                            phase.duration_us += adj as u32;
                            // The whole table stretches with the phase.
                            for elapsed in accum.values_mut() {
                                *elapsed += adj as u32;
                            }
                        }
                    }
                    accum.insert(key, 0);
                }
            }
        }

        table.total_duration_us = table.phases.iter().map(|p| p.duration_us).sum();
        table
    }
}
