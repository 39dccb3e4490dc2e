// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Scanfleet Developers. All Rights Reserved.

//! Scan system coordinator.
//!
//! A [`ScanSystem`] owns every scan head participating in a scan: it runs
//! the discovery cycle, creates heads from discovery records, connects and
//! disconnects the fleet, owns the phase table, and drives scan start/stop
//! plus the keep-alive heartbeat.
//!
//! The system moves through three states: `Disconnected`, `Connected`, and
//! `Scanning`. Mutating operations guard on the current state before any
//! side effect, so a rejected call leaves the fleet untouched.

use crate::discovery::{self, DiscoveredHead};
use crate::error::{Error, Result};
use crate::head::{HeadShared, ScanHead};
use crate::phase::{camera_start_early_offset_us, CompiledPhaseTable, PhaseTable};
use crate::types::{Camera, DataFormat, HeadConfiguration, Laser, Units};
use crate::wire::API_VERSION_MAJOR;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Keep-alive heartbeat period while scanning.
const KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SystemState {
    Disconnected,
    Connected,
    Scanning,
}

/// State cell shared with the keep-alive thread.
struct SystemSync {
    state: Mutex<SystemState>,
    changed: Condvar,
}

/// Coordinator for a fleet of scan heads.
pub struct ScanSystem {
    units: Units,
    sync: Arc<SystemSync>,
    heads: Vec<ScanHead>,
    serial_to_index: HashMap<u32, usize>,
    id_to_index: HashMap<u32, usize>,
    discovered: HashMap<u32, DiscoveredHead>,
    phase_table: PhaseTable,
    keep_alive: Option<JoinHandle<()>>,
}

impl ScanSystem {
    /// Creates a scan system and runs an initial discovery cycle.
    ///
    /// Discovery failures at construction are not fatal; they surface again
    /// on the explicit [`ScanSystem::discover`] call or at head creation.
    pub fn new(units: Units) -> ScanSystem {
        let mut system = ScanSystem {
            units,
            sync: Arc::new(SystemSync {
                state: Mutex::new(SystemState::Disconnected),
                changed: Condvar::new(),
            }),
            heads: Vec::new(),
            serial_to_index: HashMap::new(),
            id_to_index: HashMap::new(),
            discovered: HashMap::new(),
            phase_table: PhaseTable::new(),
            keep_alive: None,
        };

        if let Err(err) = system.discover() {
            debug!(error = %err, "initial discovery failed");
        }

        system
    }

    pub fn units(&self) -> Units {
        self.units
    }

    fn state(&self) -> SystemState {
        *self.sync.state.lock().unwrap()
    }

    fn set_state(&self, state: SystemState) {
        *self.sync.state.lock().unwrap() = state;
        self.sync.changed.notify_all();
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), SystemState::Connected | SystemState::Scanning)
    }

    pub fn is_scanning(&self) -> bool {
        self.state() == SystemState::Scanning
    }

    /// Broadcasts discovery on all interfaces and returns how many heads
    /// have been seen so far.
    pub fn discover(&mut self) -> Result<usize> {
        if self.is_connected() {
            return Err(Error::Connected);
        }

        discovery::broadcast_discover(&mut self.discovered)?;
        Ok(self.discovered.len())
    }

    /// Heads seen by discovery, ordered by serial number.
    pub fn discovered_heads(&self) -> Vec<DiscoveredHead> {
        let mut heads: Vec<DiscoveredHead> = self.discovered.values().cloned().collect();
        heads.sort_by_key(|head| head.serial_number);
        heads
    }

    /// Registers a head record obtained out of band, as if discovery had
    /// returned it. Useful for fixed-address deployments where broadcast
    /// traffic is filtered, and for head emulators in tests.
    pub fn register_discovered(&mut self, head: DiscoveredHead) {
        self.discovered.insert(head.serial_number, head);
    }

    /// Creates a scan head from its discovery record.
    ///
    /// The serial must have been discovered (one retry cycle is attempted
    /// otherwise) and the head's firmware major version must match the
    /// client's.
    pub fn create_scan_head(&mut self, serial_number: u32, id: u32) -> Result<()> {
        if self.is_scanning() {
            return Err(Error::Scanning);
        }
        if id > i32::MAX as u32 {
            return Err(Error::InvalidArgument);
        }
        if self.serial_to_index.contains_key(&serial_number) {
            return Err(Error::AlreadyExists);
        }
        if self.id_to_index.contains_key(&id) {
            return Err(Error::AlreadyExists);
        }

        if !self.discovered.contains_key(&serial_number) {
            // The head may have joined the network since the last cycle.
            if let Err(err) = discovery::broadcast_discover(&mut self.discovered) {
                debug!(error = %err, "discovery retry failed");
            }
            if !self.discovered.contains_key(&serial_number) {
                return Err(Error::NotDiscovered);
            }
        }

        let record = self.discovered[&serial_number].clone();
        if record.firmware_version_major != API_VERSION_MAJOR {
            return Err(Error::VersionCompatibility);
        }

        let head = ScanHead::new(self.units, &record, id)?;
        let index = self.heads.len();
        self.heads.push(head);
        self.serial_to_index.insert(serial_number, index);
        self.id_to_index.insert(id, index);
        Ok(())
    }

    /// Removes a head. Clears the phase table, whose elements may reference
    /// the removed head.
    pub fn remove_scan_head(&mut self, serial_number: u32) -> Result<()> {
        if self.is_scanning() {
            return Err(Error::Scanning);
        }

        let index = *self
            .serial_to_index
            .get(&serial_number)
            .ok_or(Error::InvalidArgument)?;

        self.heads.remove(index);
        self.phase_table.reset();
        self.serial_to_index.clear();
        self.id_to_index.clear();
        for (i, head) in self.heads.iter().enumerate() {
            self.serial_to_index.insert(head.serial_number(), i);
            self.id_to_index.insert(head.id(), i);
        }
        Ok(())
    }

    /// Removes every head. Rejected while scanning.
    pub fn remove_all_scan_heads(&mut self) -> Result<()> {
        if self.is_scanning() {
            return Err(Error::Scanning);
        }

        self.heads.clear();
        self.serial_to_index.clear();
        self.id_to_index.clear();
        self.phase_table.reset();
        Ok(())
    }

    pub fn scan_head_count(&self) -> usize {
        self.heads.len()
    }

    pub fn scan_head_by_serial(&self, serial_number: u32) -> Option<&ScanHead> {
        self.serial_to_index
            .get(&serial_number)
            .map(|&index| &self.heads[index])
    }

    pub fn scan_head_by_id(&self, id: u32) -> Option<&ScanHead> {
        self.id_to_index.get(&id).map(|&index| &self.heads[index])
    }

    pub fn scan_heads(&self) -> impl Iterator<Item = &ScanHead> {
        self.heads.iter()
    }

    /// Appends an empty phase to the phase table.
    pub fn phase_create(&mut self) {
        self.phase_table.create_phase();
    }

    /// Drops the authored phase table.
    pub fn phase_clear(&mut self) {
        self.phase_table.reset();
    }

    pub fn phase_count(&self) -> usize {
        self.phase_table.phase_count()
    }

    /// Adds `(head, camera)` to the last phase; the laser comes from the
    /// head's configuration group pairing.
    pub fn phase_insert_camera(
        &mut self,
        serial_number: u32,
        camera: Camera,
        config: Option<&HeadConfiguration>,
    ) -> Result<()> {
        let index = *self
            .serial_to_index
            .get(&serial_number)
            .ok_or(Error::InvalidArgument)?;
        self.phase_table
            .insert_camera(index, &self.heads[index], camera, config.copied())
    }

    /// Adds `(head, laser)` to the last phase; the camera comes from the
    /// head's configuration group pairing.
    pub fn phase_insert_laser(
        &mut self,
        serial_number: u32,
        laser: Laser,
        config: Option<&HeadConfiguration>,
    ) -> Result<()> {
        let index = *self
            .serial_to_index
            .get(&serial_number)
            .ok_or(Error::InvalidArgument)?;
        self.phase_table
            .insert_laser(index, &self.heads[index], laser, config.copied())
    }

    /// Compiles the phase table against current head state.
    pub fn compile_phase_table(&self) -> CompiledPhaseTable {
        self.phase_table.compile(&self.heads)
    }

    /// Connects every created head: two streams each, a client
    /// announcement, and a status fetch. When the whole fleet comes up, the
    /// current windows are pushed and status refreshed, and the system
    /// advances to `Connected`.
    ///
    /// Returns the number of heads that connected. Partial success leaves
    /// the system `Disconnected`; per-head state can be queried with
    /// [`ScanHead::is_connected`].
    pub fn connect(&mut self, timeout: Duration) -> Result<usize> {
        if self.is_scanning() {
            return Err(Error::Scanning);
        }
        if self.is_connected() {
            return Err(Error::Connected);
        }
        if self.heads.is_empty() {
            return Ok(0);
        }

        let mut connected: Vec<usize> = Vec::new();
        for (index, head) in self.heads.iter_mut().enumerate() {
            match head.connect(timeout) {
                Ok(()) => connected.push(index),
                Err(err) => {
                    warn!(serial = head.serial_number(), error = %err, "head connect failed")
                }
            }
        }

        if connected.len() == self.heads.len() {
            for head in &self.heads {
                if let Err(err) = head.send_window(None) {
                    warn!(serial = head.serial_number(), error = %err, "window send failed");
                }
            }

            // Fresh status per head so the minimum period reflects the
            // windows just sent.
            connected.retain(|&index| self.heads[index].request_status().is_ok());

            if connected.len() == self.heads.len() {
                self.set_state(SystemState::Connected);
            }
        }

        Ok(connected.len())
    }

    /// Disconnects every head. Rejected while scanning.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.is_scanning() {
            return Err(Error::Scanning);
        }
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        for head in self.heads.iter_mut() {
            if let Err(err) = head.disconnect() {
                warn!(serial = head.serial_number(), error = %err, "head disconnect failed");
            }
        }

        self.set_state(SystemState::Disconnected);
        Ok(())
    }

    /// Compiles the phase table, distributes scan pairs, configures every
    /// head, and starts synchronized scanning at `period_us`.
    pub fn start_scanning(&mut self, period_us: u32, format: DataFormat) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        if self.is_scanning() {
            return Err(Error::Scanning);
        }

        let table = self.phase_table.compile(&self.heads);
        if table.total_duration_us > period_us {
            return Err(Error::InvalidArgument);
        }

        for head in &self.heads {
            head.reset_scan_pairs();
        }

        // Each element stops at the end of its phase, measured from the
        // early camera start.
        let mut end_offset_us = camera_start_early_offset_us();
        for phase in &table.phases {
            end_offset_us += phase.duration_us;
            for element in &phase.elements {
                self.heads[element.head].add_scan_pair(
                    element.camera,
                    element.laser,
                    element.config,
                    end_offset_us,
                )?;
            }
        }

        for head in &self.heads {
            head.set_scan_period(period_us)?;
            head.set_data_format(format)?;
            head.send_scan_configuration()?;
        }

        for head in &self.heads {
            head.start_scanning()?;
        }

        self.set_state(SystemState::Scanning);

        let sync = Arc::clone(&self.sync);
        let shares: Vec<Arc<HeadShared>> = self.heads.iter().map(|head| head.shared()).collect();
        let thread = std::thread::Builder::new()
            .name("scanfleet-keepalive".to_owned())
            .spawn(move || keep_alive_main(sync, shares))?;
        self.keep_alive = Some(thread);

        Ok(())
    }

    /// Stops scanning on every head and returns the system to `Connected`.
    pub fn stop_scanning(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        if !self.is_scanning() {
            return Err(Error::NotScanning);
        }

        for head in &self.heads {
            if let Err(err) = head.stop_scanning() {
                warn!(serial = head.serial_number(), error = %err, "head stop failed");
            }
        }

        self.set_state(SystemState::Connected);

        if let Some(thread) = self.keep_alive.take() {
            if thread.join().is_err() {
                warn!("keep-alive thread panicked");
            }
        }

        Ok(())
    }

    /// Minimum scan period the fleet can sustain with the authored phase
    /// table: the early camera start offset plus the compiled total
    /// duration. While connected, each head's status is refreshed first so
    /// window-driven readout times are accounted for.
    pub fn min_scan_period_us(&self) -> u32 {
        if self.is_connected() {
            for head in &self.heads {
                if let Err(err) = head.request_status() {
                    warn!(serial = head.serial_number(), error = %err, "status refresh failed");
                }
            }
        }

        let table = self.phase_table.compile(&self.heads);
        camera_start_early_offset_us() + table.total_duration_us
    }
}

impl Drop for ScanSystem {
    fn drop(&mut self) {
        // Heads tear their own connections down on drop; the keep-alive
        // thread exits once the state leaves Scanning.
        if self.is_scanning() {
            let _ = self.stop_scanning();
        }
    }
}

/// Keep-alive heartbeat: ticks roughly once a second while the system
/// scans, sending a keep-alive to every head, and exits on state change.
fn keep_alive_main(sync: Arc<SystemSync>, heads: Vec<Arc<HeadShared>>) {
    loop {
        let guard = sync.state.lock().unwrap();
        let (guard, _) = sync.changed.wait_timeout(guard, KEEP_ALIVE_PERIOD).unwrap();
        let state = *guard;
        drop(guard);

        if state != SystemState::Scanning {
            return;
        }

        for head in &heads {
            if let Err(err) = head.send_keep_alive() {
                warn!(error = %err, "keep-alive send failed");
            }
        }
    }
}
