// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Scanfleet Developers. All Rights Reserved.

//! Per-head protocol engine.
//!
//! Each scan head owns two TCP connections: a control stream for framed
//! request/reply traffic and a data stream on which the head pushes profile
//! datagrams while scanning. A background receiver thread reads the data
//! stream, reassembles datagrams into profiles, converts points to mill
//! coordinates, and publishes finished (or visibly incomplete) profiles into
//! the head's bounded ring.
//!
//! # Locking
//!
//! One mutex serializes the head's mutable state: the control stream,
//! configuration, alignment and window tables, scan pairs, and cached
//! status. Control transactions hold the lock across send and receive so a
//! reply cannot interleave with another caller's request. The receiver takes
//! the lock only briefly when starting a new profile (to snapshot the data
//! format and alignment transform); decoding and slot insertion run on its
//! private buffer, and the profile ring carries its own synchronization.

use crate::datagram::{DataPacket, DataType, PROFILE_MAGIC};
use crate::discovery::DiscoveredHead;
use crate::error::{Error, Result};
use crate::geometry::{Alignment, ScanWindow};
use crate::net;
use crate::phase::PhaseHead;
use crate::profile::{Profile, ProfileBuilder, ProfileRing, ProfileSeed, ENCODERS_MAX};
use crate::spec::{HeadType, HeadTypeSpec};
use crate::types::{
    CableOrientation, Camera, DataFormat, HeadCapabilities, HeadConfiguration, Laser, Units,
};
use crate::wire::{
    self, CameraOrientation, ImageReply, PairConfiguration, ProfileReply, Request, StatusReply,
    WireConstraint,
};
use std::io::Read;
use std::net::{Ipv4Addr, Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Receive buffer for one framed datagram. The largest real datagram is
/// 1456 points of XY plus header; ten times the theoretical 6 KiB bound
/// leaves room for future content types.
const RECV_BUFFER_SIZE: usize = 61_440;

/// Largest control reply the client will accept. Sized for a full camera
/// image plus framing.
const MAX_REPLY_SIZE: usize = 0x20_0000;

/// Raw XY sentinel sent by the head for empty columns.
const INVALID_XY_RAW: i16 = i16::MIN;

/// Cached status of a scan head, refreshed by [`ScanHead::request_status`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadStatus {
    pub global_time_ns: u64,
    pub num_profiles_sent: u32,
    pub camera_a_pixels_in_window: u32,
    pub camera_a_temperature: i32,
    pub camera_b_pixels_in_window: u32,
    pub camera_b_temperature: i32,
    pub encoder_values: [i64; ENCODERS_MAX],
    pub num_encoder_values: u32,
    /// Minimum scan period the head reports for its current windows.
    pub min_scan_period_us: u32,
}

/// Greyscale diagnostic image captured from one camera.
#[derive(Clone, Debug)]
pub struct CameraImage {
    pub scan_head_id: u32,
    pub camera: Camera,
    pub laser: Laser,
    pub timestamp_ns: u64,
    pub camera_exposure_us: u32,
    pub laser_on_time_us: u32,
    pub image_height: u32,
    pub image_width: u32,
    pub pixels: Vec<u8>,
    pub encoder_values: [i64; ENCODERS_MAX],
    pub num_encoder_values: u32,
}

/// One camera/laser pair armed for the next scan, with its resolved
/// configuration and the offset into the scan period when its exposure ends.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ScanPair {
    pub camera: Camera,
    pub laser: Laser,
    pub config: HeadConfiguration,
    pub end_offset_us: u32,
}

/// Mutable head state behind the per-head mutex.
struct HeadState {
    control: Option<TcpStream>,
    config: HeadConfiguration,
    format: DataFormat,
    cable: CableOrientation,
    /// Alignment per configuration group, indexed by pair index.
    alignments: Vec<Alignment>,
    /// Window per configuration group, indexed by pair index.
    windows: Vec<ScanWindow>,
    scan_pairs: Vec<ScanPair>,
    scan_period_us: u32,
    status: HeadStatus,
    is_scanning: bool,
}

/// Head state shared with the receiver and keep-alive threads.
pub(crate) struct HeadShared {
    serial_number: u32,
    id: u32,
    spec: HeadTypeSpec,
    state: Mutex<HeadState>,
    ring: ProfileRing,
    receiver_active: AtomicBool,
    /// Bumped at every scan start; the receiver drops stale partial
    /// profiles when it observes a new epoch.
    scan_epoch: AtomicU64,
    packets_received: AtomicU64,
    complete_profiles_received: AtomicU64,
}

impl HeadShared {
    fn lock(&self) -> MutexGuard<'_, HeadState> {
        self.state.lock().unwrap()
    }

    fn send_locked(&self, state: &mut HeadState, request: &Request) -> Result<()> {
        let stream = state.control.as_mut().ok_or(Error::NotConnected)?;
        wire::write_framed(stream, &request.encode())
    }

    /// Sends a request and waits for one framed reply, holding the head
    /// lock across both halves.
    fn transact(&self, request: &Request) -> Result<Vec<u8>> {
        let mut state = self.lock();
        self.send_locked(&mut state, request)?;
        let stream = state.control.as_mut().ok_or(Error::NotConnected)?;
        wire::read_framed(stream, MAX_REPLY_SIZE)
    }

    pub(crate) fn send_keep_alive(&self) -> Result<()> {
        let mut state = self.lock();
        self.send_locked(&mut state, &Request::KeepAlive)
    }

    fn camera_orientation(&self, camera_port: u32, cable: CableOrientation) -> CameraOrientation {
        let cable_side = self.spec.camera_port_cable_upstream == camera_port;
        match (cable_side, cable) {
            (true, CableOrientation::Upstream) | (false, CableOrientation::Downstream) => {
                CameraOrientation::Upstream
            }
            _ => CameraOrientation::Downstream,
        }
    }
}

/// Receiver thread handle plus the socket clone used to break its reads.
struct Receiver {
    thread: JoinHandle<()>,
    stream: TcpStream,
}

/// Client-side representation of one networked scan head.
pub struct ScanHead {
    shared: Arc<HeadShared>,
    head_type: HeadType,
    ip_address: Ipv4Addr,
    firmware_version: (u32, u32, u32),
    type_name: String,
    units: Units,
    config_default: HeadConfiguration,
    receiver: Option<Receiver>,
}

impl ScanHead {
    /// Builds a head from its discovery record. No I/O happens until
    /// [`ScanHead::connect`].
    pub(crate) fn new(units: Units, discovered: &DiscoveredHead, id: u32) -> Result<ScanHead> {
        let spec = HeadTypeSpec::load(discovered.head_type)?;
        let pair_count = spec.configuration_groups.len();

        let alignment = Alignment::with_scale(units.alignment_scale());
        let state = HeadState {
            control: None,
            config: HeadConfiguration::default(),
            format: DataFormat::XyBrightnessFull,
            cable: CableOrientation::Upstream,
            alignments: vec![alignment; pair_count],
            windows: vec![ScanWindow::unconstrained(); pair_count],
            scan_pairs: Vec::new(),
            scan_period_us: 0,
            status: HeadStatus::default(),
            is_scanning: false,
        };

        Ok(ScanHead {
            shared: Arc::new(HeadShared {
                serial_number: discovered.serial_number,
                id,
                spec,
                state: Mutex::new(state),
                ring: ProfileRing::default(),
                receiver_active: AtomicBool::new(false),
                scan_epoch: AtomicU64::new(0),
                packets_received: AtomicU64::new(0),
                complete_profiles_received: AtomicU64::new(0),
            }),
            head_type: discovered.head_type,
            ip_address: discovered.ip_address,
            firmware_version: (
                discovered.firmware_version_major,
                discovered.firmware_version_minor,
                discovered.firmware_version_patch,
            ),
            type_name: discovered.type_name.clone(),
            units,
            config_default: HeadConfiguration::default(),
            receiver: None,
        })
    }

    pub fn serial_number(&self) -> u32 {
        self.shared.serial_number
    }

    pub fn id(&self) -> u32 {
        self.shared.id
    }

    pub fn head_type(&self) -> HeadType {
        self.head_type
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn ip_address(&self) -> Ipv4Addr {
        self.ip_address
    }

    pub fn firmware_version(&self) -> (u32, u32, u32) {
        self.firmware_version
    }

    pub fn capabilities(&self) -> HeadCapabilities {
        let spec = &self.shared.spec;
        HeadCapabilities {
            camera_brightness_bit_depth: 8,
            max_camera_image_height: spec.max_camera_rows,
            max_camera_image_width: spec.max_camera_columns,
            min_scan_period_us: spec.min_scan_period_us,
            max_scan_period_us: spec.max_scan_period_us,
            num_cameras: spec.number_of_cameras,
            num_encoders: 1,
            num_lasers: spec.number_of_lasers,
        }
    }

    /// Whether the control connection is open.
    pub fn is_connected(&self) -> bool {
        self.shared.lock().control.is_some()
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.lock().is_scanning
    }

    /// Opens the control and data streams, starts the receiver, announces
    /// the client, and fetches an initial status. A head that is already
    /// connected is left untouched, so a partially connected fleet can be
    /// retried.
    pub(crate) fn connect(&mut self, timeout: Duration) -> Result<()> {
        {
            let mut state = self.shared.lock();
            if state.control.is_some() {
                return Ok(());
            }

            let control = net::tcp_connect(self.ip_address, wire::CONTROL_PORT, timeout)
                .map_err(|_| Error::Internal)?;
            let data = net::tcp_connect(self.ip_address, wire::DATA_PORT, timeout)
                .map_err(|_| Error::Internal)?;
            net::configure_data_stream(&data)?;
            let data_clone = data.try_clone()?;

            self.shared.receiver_active.store(true, Ordering::Release);
            let shared = Arc::clone(&self.shared);
            let thread = std::thread::Builder::new()
                .name(format!("scanfleet-recv-{}", self.shared.serial_number))
                .spawn(move || receiver_main(shared, data))?;
            self.receiver = Some(Receiver {
                thread,
                stream: data_clone,
            });

            state.control = Some(control);
            let connect = Request::Connect {
                serial_number: self.shared.serial_number,
                id: self.shared.id,
            };
            if let Err(err) = self.shared.send_locked(&mut state, &connect) {
                drop(state);
                self.teardown();
                return Err(err);
            }
        }

        match self.request_status() {
            Ok(_) => Ok(()),
            Err(err) => {
                self.teardown();
                Err(err)
            }
        }
    }

    /// Announces the disconnect, closes both streams, and joins the
    /// receiver.
    pub(crate) fn disconnect(&mut self) -> Result<()> {
        let result = {
            let mut state = self.shared.lock();
            if state.control.is_none() {
                return Err(Error::NotConnected);
            }
            let result = self.shared.send_locked(&mut state, &Request::Disconnect);
            state.is_scanning = false;
            result
        };

        self.teardown();
        result
    }

    /// Stops the receiver and closes both sockets. Safe to call twice.
    fn teardown(&mut self) {
        self.shared.receiver_active.store(false, Ordering::Release);

        {
            let mut state = self.shared.lock();
            if let Some(control) = state.control.take() {
                let _ = control.shutdown(Shutdown::Both);
            }
        }

        if let Some(receiver) = self.receiver.take() {
            let _ = receiver.stream.shutdown(Shutdown::Both);
            if let Err(err) = receiver.thread.join() {
                warn!(serial = self.shared.serial_number, "receiver thread panicked: {:?}", err);
            }
        }
    }

    /// Validates a configuration against this head's specification limits.
    pub fn is_configuration_valid(&self, cfg: &HeadConfiguration) -> bool {
        let spec = &self.shared.spec;
        cfg.ranges_ordered()
            && cfg.camera_exposure_min_us >= spec.min_camera_exposure_us
            && cfg.camera_exposure_max_us <= spec.max_camera_exposure_us
            && cfg.laser_on_min_us >= spec.min_laser_on_us
            && cfg.laser_on_max_us <= spec.max_laser_on_us
    }

    /// Applies a configuration. Rejected while scanning.
    pub fn set_configuration(&self, cfg: HeadConfiguration) -> Result<()> {
        let mut state = self.shared.lock();
        if state.is_scanning {
            return Err(Error::Scanning);
        }
        if !self.is_configuration_valid(&cfg) {
            return Err(Error::InvalidArgument);
        }
        state.config = cfg;
        Ok(())
    }

    pub fn configuration(&self) -> HeadConfiguration {
        self.shared.lock().config
    }

    pub fn configuration_default(&self) -> HeadConfiguration {
        self.config_default
    }

    pub fn set_data_format(&self, format: DataFormat) -> Result<()> {
        let mut state = self.shared.lock();
        if state.is_scanning {
            return Err(Error::Scanning);
        }
        state.format = format;
        Ok(())
    }

    pub fn data_format(&self) -> DataFormat {
        self.shared.lock().format
    }

    /// Sets the scan period, validated against the specification limits.
    pub(crate) fn set_scan_period(&self, period_us: u32) -> Result<()> {
        let spec = &self.shared.spec;
        if period_us < spec.min_scan_period_us || period_us > spec.max_scan_period_us {
            return Err(Error::InvalidArgument);
        }
        self.shared.lock().scan_period_us = period_us;
        Ok(())
    }

    pub fn scan_period_us(&self) -> u32 {
        self.shared.lock().scan_period_us
    }

    /// Minimum scan period the head can sustain: the larger of the
    /// specification floor and the window-driven readout time from the last
    /// status.
    pub fn min_scan_period_us(&self) -> u32 {
        let status = self.shared.lock().status;
        status.min_scan_period_us.max(self.shared.spec.min_scan_period_us)
    }

    pub fn cable_orientation(&self) -> CableOrientation {
        self.shared.lock().cable
    }

    /// Sets the cable orientation, rewriting every alignment transform.
    pub fn set_cable_orientation(&self, cable: CableOrientation) -> Result<()> {
        let mut state = self.shared.lock();
        if state.is_scanning {
            return Err(Error::Scanning);
        }
        state.cable = cable;
        for alignment in state.alignments.iter_mut() {
            alignment.set_cable_orientation(cable);
        }
        Ok(())
    }

    /// Sets the alignment for every camera/laser pair.
    pub fn set_alignment(&self, roll_degrees: f64, shift_x: f64, shift_y: f64) -> Result<()> {
        let pairs = self.shared.spec.pairs();
        if pairs.is_empty() {
            return Err(Error::Internal);
        }
        for (camera, laser) in pairs {
            self.set_pair_alignment(camera, laser, roll_degrees, shift_x, shift_y)?;
        }
        Ok(())
    }

    /// Sets the alignment for the pair addressed by `camera`.
    pub fn set_camera_alignment(
        &self,
        camera: Camera,
        roll_degrees: f64,
        shift_x: f64,
        shift_y: f64,
    ) -> Result<()> {
        let laser = self.shared.spec.paired_laser(camera).ok_or(Error::InvalidArgument)?;
        self.set_pair_alignment(camera, laser, roll_degrees, shift_x, shift_y)
    }

    /// Sets the alignment for the pair addressed by `laser`.
    pub fn set_laser_alignment(
        &self,
        laser: Laser,
        roll_degrees: f64,
        shift_x: f64,
        shift_y: f64,
    ) -> Result<()> {
        let camera = self.shared.spec.paired_camera(laser).ok_or(Error::InvalidArgument)?;
        self.set_pair_alignment(camera, laser, roll_degrees, shift_x, shift_y)
    }

    /// Sets the alignment for one explicit pair. While connected, the
    /// window for that camera is re-sent, since constraints travel in
    /// camera coordinates derived from this transform.
    pub fn set_pair_alignment(
        &self,
        camera: Camera,
        laser: Laser,
        roll_degrees: f64,
        shift_x: f64,
        shift_y: f64,
    ) -> Result<()> {
        let index = self
            .shared
            .spec
            .pair_index(camera, laser)
            .ok_or(Error::InvalidArgument)?;

        let connected = {
            let mut state = self.shared.lock();
            if state.is_scanning {
                return Err(Error::Scanning);
            }
            state.alignments[index] = Alignment::new(
                self.units.alignment_scale(),
                roll_degrees,
                shift_x,
                shift_y,
                state.cable,
            );
            state.control.is_some()
        };

        if connected {
            self.send_window(Some(camera))?;
        }
        Ok(())
    }

    /// Alignment parameters for the pair addressed by `camera`.
    pub fn camera_alignment(&self, camera: Camera) -> Result<(f64, f64, f64)> {
        let laser = self.shared.spec.paired_laser(camera).ok_or(Error::InvalidArgument)?;
        self.pair_alignment(camera, laser)
    }

    /// Alignment parameters for the pair addressed by `laser`.
    pub fn laser_alignment(&self, laser: Laser) -> Result<(f64, f64, f64)> {
        let camera = self.shared.spec.paired_camera(laser).ok_or(Error::InvalidArgument)?;
        self.pair_alignment(camera, laser)
    }

    /// Alignment parameters `(roll_degrees, shift_x, shift_y)` for a pair.
    pub fn pair_alignment(&self, camera: Camera, laser: Laser) -> Result<(f64, f64, f64)> {
        let index = self
            .shared
            .spec
            .pair_index(camera, laser)
            .ok_or(Error::InvalidArgument)?;
        let state = self.shared.lock();
        let alignment = &state.alignments[index];
        Ok((
            alignment.roll_degrees(),
            alignment.shift_x(),
            alignment.shift_y(),
        ))
    }

    /// Sets the scan window for every camera/laser pair.
    pub fn set_window(&self, window: &ScanWindow) -> Result<()> {
        let pairs = self.shared.spec.pairs();
        if pairs.is_empty() {
            return Err(Error::Internal);
        }
        for (camera, laser) in pairs {
            self.set_pair_window(camera, laser, window)?;
        }
        Ok(())
    }

    /// Sets the scan window for the pair addressed by `camera`.
    pub fn set_camera_window(&self, camera: Camera, window: &ScanWindow) -> Result<()> {
        let laser = self.shared.spec.paired_laser(camera).ok_or(Error::InvalidArgument)?;
        self.set_pair_window(camera, laser, window)
    }

    /// Sets the scan window for the pair addressed by `laser`.
    pub fn set_laser_window(&self, laser: Laser, window: &ScanWindow) -> Result<()> {
        let camera = self.shared.spec.paired_camera(laser).ok_or(Error::InvalidArgument)?;
        self.set_pair_window(camera, laser, window)
    }

    /// Sets the scan window for one explicit pair, re-sending it when
    /// connected.
    pub fn set_pair_window(&self, camera: Camera, laser: Laser, window: &ScanWindow) -> Result<()> {
        let index = self
            .shared
            .spec
            .pair_index(camera, laser)
            .ok_or(Error::InvalidArgument)?;

        let connected = {
            let mut state = self.shared.lock();
            if state.is_scanning {
                return Err(Error::Scanning);
            }
            state.windows[index] = window.clone();
            state.control.is_some()
        };

        if connected {
            self.send_window(Some(camera))?;
        }
        Ok(())
    }

    /// Transmits window constraints for every pair (or just the pairs on
    /// `camera_filter`), converting each endpoint from mill to camera
    /// coordinates. Upstream cable orientation swaps the endpoint order.
    pub(crate) fn send_window(&self, camera_filter: Option<Camera>) -> Result<()> {
        let mut state = self.shared.lock();

        for (index, (camera, laser)) in self.shared.spec.pairs().into_iter().enumerate() {
            if let Some(filter) = camera_filter {
                if camera != filter {
                    continue;
                }
            }

            let camera_port = self
                .shared
                .spec
                .camera_id_to_port(camera)
                .ok_or(Error::Internal)?;
            let laser_port = self
                .shared
                .spec
                .laser_id_to_port(laser)
                .ok_or(Error::Internal)?;

            let alignment = state.alignments[index];
            let cable = state.cable;
            let constraints = state.windows[index]
                .constraints()
                .iter()
                .map(|c| {
                    let p0 = alignment.mill_to_camera(c.p0.x, c.p0.y);
                    let p1 = alignment.mill_to_camera(c.p1.x, c.p1.y);
                    match cable {
                        CableOrientation::Downstream => WireConstraint {
                            x0: p0.x,
                            y0: p0.y,
                            x1: p1.x,
                            y1: p1.y,
                        },
                        CableOrientation::Upstream => WireConstraint {
                            x0: p1.x,
                            y0: p1.y,
                            x1: p0.x,
                            y1: p0.y,
                        },
                    }
                })
                .collect();

            let request = Request::WindowConfiguration {
                camera_port: camera_port as u16,
                laser_port: laser_port as u16,
                constraints,
            };
            self.shared.send_locked(&mut state, &request)?;
        }

        Ok(())
    }

    pub(crate) fn reset_scan_pairs(&self) {
        self.shared.lock().scan_pairs.clear();
    }

    /// Arms one camera/laser pair for the next scan.
    pub(crate) fn add_scan_pair(
        &self,
        camera: Camera,
        laser: Laser,
        config: HeadConfiguration,
        end_offset_us: u32,
    ) -> Result<()> {
        if !self.shared.spec.is_pair_valid(camera, laser) {
            return Err(Error::InvalidArgument);
        }
        if !self.is_configuration_valid(&config) {
            return Err(Error::InvalidArgument);
        }

        let mut state = self.shared.lock();
        if state.scan_pairs.len() >= self.shared.spec.max_configuration_groups as usize {
            return Err(Error::Internal);
        }

        state.scan_pairs.push(ScanPair {
            camera,
            laser,
            config,
            end_offset_us,
        });
        Ok(())
    }

    pub(crate) fn scan_pair_count(&self) -> usize {
        self.shared.lock().scan_pairs.len()
    }

    /// Sends the scan configuration built from the armed scan pairs. A head
    /// with no scan pairs is skipped silently.
    pub(crate) fn send_scan_configuration(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.scan_pairs.is_empty() {
            return Ok(());
        }

        let mut pairs = Vec::with_capacity(state.scan_pairs.len());
        for pair in &state.scan_pairs {
            let camera_port = self
                .shared
                .spec
                .camera_id_to_port(pair.camera)
                .ok_or(Error::Internal)?;
            let laser_port = self
                .shared
                .spec
                .laser_id_to_port(pair.laser)
                .ok_or(Error::Internal)?;

            pairs.push(PairConfiguration {
                camera_port: camera_port as u16,
                laser_port: laser_port as u16,
                laser_on_min_ns: pair.config.laser_on_min_us * 1000,
                laser_on_def_ns: pair.config.laser_on_def_us * 1000,
                laser_on_max_ns: pair.config.laser_on_max_us * 1000,
                scan_end_offset_ns: pair.end_offset_us * 1000,
                camera_orientation: self.shared.camera_orientation(camera_port, state.cable),
            });
        }

        let request = Request::ScanConfiguration {
            data_type_mask: state.format.data_type_mask(),
            data_stride: state.format.data_stride(),
            scan_period_ns: state.scan_period_us.saturating_mul(1000),
            laser_detection_threshold: state.config.laser_detection_threshold,
            saturation_threshold: state.config.saturation_threshold,
            saturation_percentage: state.config.saturation_percentage,
            pairs,
        };
        self.shared.send_locked(&mut state, &request)
    }

    /// Starts streaming: clears the ring, opens a new receiver epoch, and
    /// sends the start command.
    pub(crate) fn start_scanning(&self) -> Result<()> {
        let mut state = self.shared.lock();
        self.shared.ring.clear();
        self.shared.scan_epoch.fetch_add(1, Ordering::AcqRel);
        self.shared.packets_received.store(0, Ordering::Relaxed);
        self.shared
            .complete_profiles_received
            .store(0, Ordering::Relaxed);

        self.shared.send_locked(&mut state, &Request::ScanStart)?;
        state.is_scanning = true;
        Ok(())
    }

    /// Stops streaming.
    pub(crate) fn stop_scanning(&self) -> Result<()> {
        let mut state = self.shared.lock();
        self.shared.send_locked(&mut state, &Request::ScanStop)?;
        state.is_scanning = false;
        Ok(())
    }

    /// Requests a fresh status from the head and caches it.
    pub fn request_status(&self) -> Result<HeadStatus> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let reply = self.shared.transact(&Request::StatusRequest)?;
        let decoded = StatusReply::decode(&reply)?;
        let status = self.status_from_reply(&decoded);

        self.shared.lock().status = status;
        Ok(status)
    }

    fn status_from_reply(&self, reply: &StatusReply) -> HeadStatus {
        let mut status = HeadStatus {
            global_time_ns: reply.global_time_ns,
            num_profiles_sent: reply.num_profiles_sent,
            min_scan_period_us: reply.min_scan_period_ns / 1000,
            ..HeadStatus::default()
        };

        for camera in &reply.cameras {
            match self.shared.spec.camera_port_to_id(camera.port as u32) {
                Some(Camera::A) => {
                    status.camera_a_pixels_in_window = camera.pixels_in_window;
                    status.camera_a_temperature = camera.temperature;
                }
                Some(Camera::B) => {
                    status.camera_b_pixels_in_window = camera.pixels_in_window;
                    status.camera_b_temperature = camera.temperature;
                }
                None => debug!(port = camera.port, "status for unknown camera port"),
            }
        }

        let count = reply.encoders.len().min(ENCODERS_MAX);
        status.encoder_values[..count].copy_from_slice(&reply.encoders[..count]);
        status.num_encoder_values = count as u32;
        status
    }

    /// Last cached status without touching the network.
    pub fn last_status(&self) -> HeadStatus {
        self.shared.lock().status
    }

    pub fn clear_status(&self) {
        self.shared.lock().status = HeadStatus::default();
    }

    /// Number of profiles ready to be taken.
    pub fn available_profiles(&self) -> usize {
        self.shared.ring.available()
    }

    /// Blocks until `count` profiles are available or the timeout elapses;
    /// returns the available count.
    pub fn wait_until_available_profiles(&self, count: usize, timeout: Duration) -> usize {
        self.shared.ring.wait_until_available(count, timeout)
    }

    /// Takes up to `count` profiles, oldest first.
    pub fn get_profiles(&self, count: usize) -> Vec<Profile> {
        self.shared.ring.take(count)
    }

    pub fn clear_profiles(&self) {
        self.shared.ring.clear();
    }

    /// Total datagrams seen since the last scan start.
    pub fn packets_received(&self) -> u64 {
        self.shared.packets_received.load(Ordering::Relaxed)
    }

    /// Complete profiles assembled since the last scan start.
    pub fn complete_profiles_received(&self) -> u64 {
        self.shared.complete_profiles_received.load(Ordering::Relaxed)
    }

    fn diagnostic_ports(&self, camera: Camera, laser: Laser) -> Result<(u32, u32)> {
        let camera_port = self
            .shared
            .spec
            .camera_id_to_port(camera)
            .ok_or(Error::InvalidArgument)?;
        let laser_port = self
            .shared
            .spec
            .laser_id_to_port(laser)
            .ok_or(Error::InvalidArgument)?;
        Ok((camera_port, laser_port))
    }

    fn check_diagnostic_allowed(&self) -> Result<()> {
        let state = self.shared.lock();
        if state.control.is_none() {
            return Err(Error::NotConnected);
        }
        if state.is_scanning {
            return Err(Error::Scanning);
        }
        Ok(())
    }

    /// Captures a diagnostic image through the pair addressed by `camera`.
    pub fn capture_camera_image(
        &self,
        camera: Camera,
        camera_exposure_us: u32,
        laser_on_us: u32,
    ) -> Result<CameraImage> {
        let laser = self.shared.spec.paired_laser(camera).ok_or(Error::InvalidArgument)?;
        self.capture_image(camera, laser, camera_exposure_us, laser_on_us)
    }

    /// Captures a diagnostic image through the pair addressed by `laser`.
    pub fn capture_laser_image(
        &self,
        laser: Laser,
        camera_exposure_us: u32,
        laser_on_us: u32,
    ) -> Result<CameraImage> {
        let camera = self.shared.spec.paired_camera(laser).ok_or(Error::InvalidArgument)?;
        self.capture_image(camera, laser, camera_exposure_us, laser_on_us)
    }

    /// Captures a diagnostic image from an explicit pair. Only while
    /// connected and not scanning.
    pub fn capture_image(
        &self,
        camera: Camera,
        laser: Laser,
        camera_exposure_us: u32,
        laser_on_us: u32,
    ) -> Result<CameraImage> {
        self.check_diagnostic_allowed()?;
        let (camera_port, laser_port) = self.diagnostic_ports(camera, laser)?;

        let request = Request::ImageRequest {
            camera_port: camera_port as u16,
            laser_port: laser_port as u16,
            camera_exposure_ns: camera_exposure_us.saturating_mul(1000),
            laser_on_ns: laser_on_us.saturating_mul(1000),
        };
        let reply = self.shared.transact(&request)?;
        let image = ImageReply::decode(&reply)?;

        let camera = self
            .shared
            .spec
            .camera_port_to_id(image.camera_port as u32)
            .ok_or(Error::Internal)?;
        let laser = self
            .shared
            .spec
            .laser_port_to_id(image.laser_port as u32)
            .ok_or(Error::Internal)?;

        let mut encoder_values = [0i64; ENCODERS_MAX];
        let count = image.encoders.len().min(ENCODERS_MAX);
        encoder_values[..count].copy_from_slice(&image.encoders[..count]);

        Ok(CameraImage {
            scan_head_id: self.shared.id,
            camera,
            laser,
            timestamp_ns: image.timestamp_ns,
            camera_exposure_us,
            laser_on_time_us: laser_on_us,
            image_height: image.height as u32,
            image_width: image.width as u32,
            pixels: image.pixels,
            encoder_values,
            num_encoder_values: count as u32,
        })
    }

    /// Captures one diagnostic profile through the pair addressed by
    /// `camera`.
    pub fn capture_camera_profile(
        &self,
        camera: Camera,
        camera_exposure_us: u32,
        laser_on_us: u32,
    ) -> Result<Profile> {
        let laser = self.shared.spec.paired_laser(camera).ok_or(Error::InvalidArgument)?;
        self.capture_profile(camera, laser, camera_exposure_us, laser_on_us)
    }

    /// Captures one diagnostic profile through the pair addressed by
    /// `laser`.
    pub fn capture_laser_profile(
        &self,
        laser: Laser,
        camera_exposure_us: u32,
        laser_on_us: u32,
    ) -> Result<Profile> {
        let camera = self.shared.spec.paired_camera(laser).ok_or(Error::InvalidArgument)?;
        self.capture_profile(camera, laser, camera_exposure_us, laser_on_us)
    }

    /// Captures one diagnostic profile from an explicit pair. The head
    /// returns camera-space points; the client applies its own alignment.
    pub fn capture_profile(
        &self,
        camera: Camera,
        laser: Laser,
        camera_exposure_us: u32,
        laser_on_us: u32,
    ) -> Result<Profile> {
        self.check_diagnostic_allowed()?;
        let (camera_port, laser_port) = self.diagnostic_ports(camera, laser)?;

        let (detection, saturation, orientation) = {
            let state = self.shared.lock();
            (
                state.config.laser_detection_threshold,
                state.config.saturation_threshold,
                self.shared.camera_orientation(camera_port, state.cable),
            )
        };

        let request = Request::ProfileRequest {
            camera_port: camera_port as u16,
            laser_port: laser_port as u16,
            camera_exposure_ns: camera_exposure_us.saturating_mul(1000),
            laser_on_ns: laser_on_us.saturating_mul(1000),
            laser_detection_threshold: detection,
            saturation_threshold: saturation,
            camera_orientation: orientation,
        };
        let reply = self.shared.transact(&request)?;
        let decoded = ProfileReply::decode(&reply)?;

        let camera = self
            .shared
            .spec
            .camera_port_to_id(decoded.camera_port as u32)
            .ok_or(Error::Internal)?;
        let laser = self
            .shared
            .spec
            .laser_port_to_id(decoded.laser_port as u32)
            .ok_or(Error::Internal)?;

        let (alignment, format) = {
            let state = self.shared.lock();
            let index = self
                .shared
                .spec
                .pair_index(camera, laser)
                .ok_or(Error::Internal)?;
            (state.alignments[index], state.format)
        };

        let mut builder = ProfileBuilder::new();
        builder.start(
            ProfileSeed {
                scan_head_id: self.shared.id,
                camera,
                laser,
                timestamp_ns: decoded.timestamp_ns,
                flags: 0,
                sequence_number: 0,
                laser_on_time_us: decoded.laser_on_time_ns / 1000,
                format,
                packets_expected: 0,
            },
            &decoded.encoders,
        );

        for (idx, &(x_raw, y_raw, brightness)) in decoded.points.iter().enumerate() {
            if x_raw != INVALID_XY_RAW && y_raw != INVALID_XY_RAW {
                let point = alignment.camera_to_mill(x_raw as i32, y_raw as i32);
                builder.insert_point_and_brightness(idx, point.x, point.y, brightness);
            }
        }

        builder.take().ok_or(Error::Internal)
    }

    pub(crate) fn shared(&self) -> Arc<HeadShared> {
        Arc::clone(&self.shared)
    }
}

impl Drop for ScanHead {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl PhaseHead for ScanHead {
    fn configuration(&self) -> HeadConfiguration {
        self.shared.lock().config
    }

    fn min_scan_period_us(&self) -> u32 {
        ScanHead::min_scan_period_us(self)
    }

    fn max_phase_elements(&self) -> u32 {
        self.shared.spec.max_configuration_groups
    }

    fn paired_laser(&self, camera: Camera) -> Option<Laser> {
        self.shared.spec.paired_laser(camera)
    }

    fn paired_camera(&self, laser: Laser) -> Option<Camera> {
        self.shared.spec.paired_camera(laser)
    }

    fn is_configuration_valid(&self, cfg: &HeadConfiguration) -> bool {
        ScanHead::is_configuration_valid(self, cfg)
    }
}

/// Receiver thread: reads framed datagrams off the data stream until the
/// head is torn down, assembling profiles as they stream in.
fn receiver_main(shared: Arc<HeadShared>, mut stream: TcpStream) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut builder = ProfileBuilder::new();
    let mut last_source = 0u32;
    let mut last_timestamp = 0u64;
    let mut epoch = shared.scan_epoch.load(Ordering::Acquire);
    let mut transform = Alignment::with_scale(1.0);

    while shared.receiver_active.load(Ordering::Acquire) {
        let mut len_bytes = [0u8; 4];
        if !read_full(&shared, &mut stream, &mut len_bytes) {
            break;
        }
        let total = u32::from_le_bytes(len_bytes) as usize;
        if total == 0 {
            continue;
        }
        if total > buf.len() {
            warn!(total, "oversized data frame, closing receiver");
            break;
        }
        if !read_full(&shared, &mut stream, &mut buf[..total]) {
            break;
        }
        if !shared.receiver_active.load(Ordering::Acquire) {
            break;
        }

        let body = &buf[..total];
        if body.len() < 2 {
            continue;
        }
        // Non-profile datagrams are silently dropped.
        let magic = u16::from_be_bytes([body[0], body[1]]);
        if magic != PROFILE_MAGIC {
            continue;
        }

        let current_epoch = shared.scan_epoch.load(Ordering::Acquire);
        if current_epoch != epoch {
            // A new scan started; a partial profile from the previous scan
            // must not leak into the fresh ring.
            epoch = current_epoch;
            builder = ProfileBuilder::new();
            last_source = 0;
            last_timestamp = 0;
        }

        process_datagram(
            &shared,
            body,
            &mut builder,
            &mut last_source,
            &mut last_timestamp,
            &mut transform,
        );
    }
}

/// Fills `dst` from the stream, honoring shutdown and read timeouts.
/// Returns false when the connection closed or the receiver was stopped.
fn read_full(shared: &HeadShared, stream: &mut TcpStream, dst: &mut [u8]) -> bool {
    let mut filled = 0;
    while filled < dst.len() {
        if !shared.receiver_active.load(Ordering::Acquire) {
            return false;
        }
        match stream.read(&mut dst[filled..]) {
            Ok(0) => return false,
            Ok(n) => filled += n,
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut
                    || err.kind() == std::io::ErrorKind::Interrupted =>
            {
                continue;
            }
            Err(err) => {
                debug!(error = %err, "data stream read failed");
                return false;
            }
        }
    }
    true
}

/// Decodes one profile datagram and folds it into the profile being built.
fn process_datagram(
    shared: &HeadShared,
    body: &[u8],
    builder: &mut ProfileBuilder,
    last_source: &mut u32,
    last_timestamp: &mut u64,
    transform: &mut Alignment,
) {
    let packet = match DataPacket::parse(body) {
        Ok(packet) => packet,
        Err(_) => {
            warn!("malformed profile datagram dropped");
            return;
        }
    };

    shared.packets_received.fetch_add(1, Ordering::Relaxed);

    let header = packet.header;
    let source = header.source_id();
    let timestamp = header.timestamp_ns;

    if source != *last_source || timestamp != *last_timestamp {
        // A new profile began before the previous one finished; publish the
        // partial so the loss is visible downstream.
        if let Some(profile) = builder.take() {
            shared.ring.push(profile);
        }

        *last_source = source;
        *last_timestamp = timestamp;

        let camera = shared.spec.camera_port_to_id(header.camera_port as u32);
        let laser = shared.spec.laser_port_to_id(header.laser_port as u32);
        let (camera, laser) = match (camera, laser) {
            (Some(camera), Some(laser)) => (camera, laser),
            _ => {
                warn!(
                    camera_port = header.camera_port,
                    laser_port = header.laser_port,
                    "datagram for unknown ports dropped"
                );
                *last_source = 0;
                *last_timestamp = 0;
                return;
            }
        };

        // Snapshot the format and transform under the head lock; the rest
        // of the decode runs lock free.
        let (format, alignment) = {
            let state = shared.state.lock().unwrap();
            let alignment = shared
                .spec
                .pair_index(camera, laser)
                .and_then(|index| state.alignments.get(index).copied());
            (state.format, alignment)
        };
        let alignment = match alignment {
            Some(alignment) => alignment,
            None => {
                warn!("datagram for unpaired camera/laser dropped");
                *last_source = 0;
                *last_timestamp = 0;
                return;
            }
        };
        *transform = alignment;

        builder.start(
            ProfileSeed {
                scan_head_id: header.scan_head_id as u32,
                camera,
                laser,
                timestamp_ns: timestamp,
                flags: header.flags as u32,
                sequence_number: header.sequence_number,
                laser_on_time_us: header.laser_on_time_us as u32,
                format,
                packets_expected: header.number_datagrams,
            },
            packet.encoders(),
        );
    }

    let raw = packet.raw();
    let total_packets = header.number_datagrams;
    let position = header.datagram_position;
    let start_column = header.start_column as u32;

    if header.data_type_mask & DataType::Brightness.bit() != 0 {
        // Brightness implies XY data rides along in the same datagram.
        if let (Some(brightness_layout), Some(xy_layout)) = (
            packet.fragment_layout(DataType::Brightness),
            packet.fragment_layout(DataType::XyData),
        ) {
            let inc = (total_packets * xy_layout.step) as usize;
            let mut idx = (start_column + position * xy_layout.step) as usize;

            for n in 0..xy_layout.num_vals as usize {
                let at = xy_layout.offset + n * 4;
                let x_raw = i16::from_be_bytes([raw[at], raw[at + 1]]);
                let y_raw = i16::from_be_bytes([raw[at + 2], raw[at + 3]]);
                let brightness = raw[brightness_layout.offset + n];

                if x_raw != INVALID_XY_RAW && y_raw != INVALID_XY_RAW {
                    let point = transform.camera_to_mill(x_raw as i32, y_raw as i32);
                    builder.insert_point_and_brightness(idx, point.x, point.y, brightness);
                }
                idx += inc;
            }
        }
    } else if header.data_type_mask & DataType::XyData.bit() != 0 {
        if let Some(xy_layout) = packet.fragment_layout(DataType::XyData) {
            let inc = (total_packets * xy_layout.step) as usize;
            let mut idx = (start_column + position * xy_layout.step) as usize;

            for n in 0..xy_layout.num_vals as usize {
                let at = xy_layout.offset + n * 4;
                let x_raw = i16::from_be_bytes([raw[at], raw[at + 1]]);
                let y_raw = i16::from_be_bytes([raw[at + 2], raw[at + 3]]);

                if x_raw != INVALID_XY_RAW && y_raw != INVALID_XY_RAW {
                    let point = transform.camera_to_mill(x_raw as i32, y_raw as i32);
                    builder.insert_point(idx, point.x, point.y);
                }
                idx += inc;
            }
        }
    }

    let received = builder.mark_packet_received();
    if received == header.number_datagrams {
        if let Some(profile) = builder.take() {
            shared.ring.push(profile);
            shared
                .complete_profiles_received
                .fetch_add(1, Ordering::Relaxed);
        }
        *last_source = 0;
        *last_timestamp = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovered(head_type: HeadType) -> DiscoveredHead {
        DiscoveredHead {
            serial_number: 99001,
            ip_address: Ipv4Addr::new(192, 168, 1, 50),
            head_type,
            firmware_version_major: 16,
            firmware_version_minor: 1,
            firmware_version_patch: 0,
            type_name: "JS-50 WX".to_owned(),
        }
    }

    fn head() -> ScanHead {
        ScanHead::new(Units::Inches, &discovered(HeadType::Js50Wx), 0).unwrap()
    }

    #[test]
    fn test_new_head_defaults() {
        let head = head();
        assert_eq!(head.serial_number(), 99001);
        assert_eq!(head.id(), 0);
        assert!(!head.is_connected());
        assert!(!head.is_scanning());
        assert_eq!(head.configuration(), HeadConfiguration::default());
        assert_eq!(head.data_format(), DataFormat::XyBrightnessFull);
        assert_eq!(head.cable_orientation(), CableOrientation::Upstream);
        assert_eq!(head.available_profiles(), 0);
    }

    #[test]
    fn test_capabilities_follow_spec() {
        let capabilities = head().capabilities();
        assert_eq!(capabilities.num_cameras, 2);
        assert_eq!(capabilities.num_lasers, 1);
        assert_eq!(capabilities.max_camera_image_width, 1456);
        assert_eq!(capabilities.max_camera_image_height, 1088);
        assert_eq!(capabilities.min_scan_period_us, 100);
    }

    #[test]
    fn test_configuration_validated_against_spec() {
        let head = head();

        let mut cfg = HeadConfiguration::default();
        assert!(head.is_configuration_valid(&cfg));
        assert!(head.set_configuration(cfg).is_ok());

        cfg.laser_on_max_us = 10_000_000;
        assert!(!head.is_configuration_valid(&cfg));
        assert_eq!(head.set_configuration(cfg), Err(Error::InvalidArgument));

        let mut cfg = HeadConfiguration::default();
        cfg.camera_exposure_min_us = 1;
        assert!(!head.is_configuration_valid(&cfg));
    }

    #[test]
    fn test_min_scan_period_floors_at_spec() {
        let head = head();
        // No status yet: the spec floor applies.
        assert_eq!(ScanHead::min_scan_period_us(&head), 100);
        // A status-driven value above the floor wins.
        head.shared.lock().status.min_scan_period_us = 1500;
        assert_eq!(ScanHead::min_scan_period_us(&head), 1500);
    }

    #[test]
    fn test_scan_period_range() {
        let head = head();
        assert_eq!(head.set_scan_period(10), Err(Error::InvalidArgument));
        assert_eq!(head.set_scan_period(2_000_000), Err(Error::InvalidArgument));
        assert!(head.set_scan_period(1000).is_ok());
        assert_eq!(head.scan_period_us(), 1000);
    }

    #[test]
    fn test_alignment_per_pair() {
        let head = head();
        head.set_camera_alignment(Camera::A, 10.0, 1.0, 2.0).unwrap();
        assert_eq!(head.camera_alignment(Camera::A).unwrap(), (10.0, 1.0, 2.0));
        // Camera B untouched.
        assert_eq!(head.camera_alignment(Camera::B).unwrap(), (0.0, 0.0, 0.0));

        head.set_alignment(5.0, -1.0, -2.0).unwrap();
        assert_eq!(head.camera_alignment(Camera::A).unwrap(), (5.0, -1.0, -2.0));
        assert_eq!(head.camera_alignment(Camera::B).unwrap(), (5.0, -1.0, -2.0));
    }

    #[test]
    fn test_laser_addressing_on_laser_primary_head() {
        let head =
            ScanHead::new(Units::Inches, &discovered(HeadType::Js50X6B20), 1).unwrap();
        head.set_laser_alignment(Laser::L4, 1.0, 0.0, 0.0).unwrap();
        assert_eq!(head.laser_alignment(Laser::L4).unwrap(), (1.0, 0.0, 0.0));
        // Camera addressing is ambiguous on a laser-primary head.
        assert_eq!(
            head.set_camera_alignment(Camera::A, 0.0, 0.0, 0.0),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn test_window_stored_per_pair() {
        let head = head();
        let window = ScanWindow::rectangular(20.0, -20.0, -10.0, 10.0).unwrap();
        head.set_camera_window(Camera::A, &window).unwrap();

        let index_a = head.shared.spec.pair_index(Camera::A, Laser::L1).unwrap();
        let index_b = head.shared.spec.pair_index(Camera::B, Laser::L1).unwrap();
        let state = head.shared.lock();
        assert_eq!(state.windows[index_a], window);
        assert!(state.windows[index_b].is_empty());
    }

    #[test]
    fn test_scan_pair_validation() {
        let head = head();
        let cfg = HeadConfiguration::default();

        assert!(head.add_scan_pair(Camera::A, Laser::L1, cfg, 500).is_ok());
        assert_eq!(head.scan_pair_count(), 1);

        // Not a configuration group on this head.
        assert_eq!(
            head.add_scan_pair(Camera::A, Laser::L2, cfg, 500),
            Err(Error::InvalidArgument)
        );

        let mut bad = cfg;
        bad.laser_on_max_us = 10_000_000;
        assert_eq!(
            head.add_scan_pair(Camera::B, Laser::L1, bad, 500),
            Err(Error::InvalidArgument)
        );

        head.reset_scan_pairs();
        assert_eq!(head.scan_pair_count(), 0);
    }

    #[test]
    fn test_scan_pair_capacity() {
        let head = head();
        let cfg = HeadConfiguration::default();
        let max = head.shared.spec.max_configuration_groups as usize;
        for n in 0..max {
            let camera = if n % 2 == 0 { Camera::A } else { Camera::B };
            head.add_scan_pair(camera, Laser::L1, cfg, 100 * n as u32)
                .unwrap();
        }
        assert_eq!(
            head.add_scan_pair(Camera::A, Laser::L1, cfg, 9999),
            Err(Error::Internal)
        );
    }

    #[test]
    fn test_camera_orientation_mapping() {
        let head = head();
        // Port 0 is the cable-upstream camera on this head type.
        assert_eq!(
            head.shared.camera_orientation(0, CableOrientation::Upstream),
            CameraOrientation::Upstream
        );
        assert_eq!(
            head.shared.camera_orientation(1, CableOrientation::Upstream),
            CameraOrientation::Downstream
        );
        assert_eq!(
            head.shared.camera_orientation(0, CableOrientation::Downstream),
            CameraOrientation::Downstream
        );
        assert_eq!(
            head.shared.camera_orientation(1, CableOrientation::Downstream),
            CameraOrientation::Upstream
        );
    }

    #[test]
    fn test_operations_require_connection() {
        let mut head = head();
        assert_eq!(head.disconnect(), Err(Error::NotConnected));
        assert_eq!(head.request_status().unwrap_err(), Error::NotConnected);
        assert_eq!(
            head.capture_camera_image(Camera::A, 10_000, 500).unwrap_err(),
            Error::NotConnected
        );
        assert_eq!(
            head.capture_camera_profile(Camera::A, 10_000, 500).unwrap_err(),
            Error::NotConnected
        );
    }

    #[test]
    fn test_cable_orientation_rewrites_alignments() {
        let head = head();
        head.set_cable_orientation(CableOrientation::Downstream)
            .unwrap();
        let state = head.shared.lock();
        for alignment in &state.alignments {
            assert_eq!(alignment.cable_orientation(), CableOrientation::Downstream);
        }
    }

    /// Datagram with `count`-way split XY+brightness data: column c carries
    /// x = c, y = 50.
    fn datagram(timestamp_ns: u64, position: u32, count: u32) -> Vec<u8> {
        use crate::datagram::{DatagramHeader, HEADER_SIZE};
        use crate::profile::PROFILE_SLOTS;

        let num_vals = PROFILE_SLOTS / count as usize;
        let header = DatagramHeader {
            magic: PROFILE_MAGIC,
            exposure_time_us: 100,
            scan_head_id: 0,
            camera_port: 1,
            laser_port: 0,
            flags: 0,
            timestamp_ns,
            laser_on_time_us: 500,
            data_type_mask: DataType::Brightness.bit() | DataType::XyData.bit(),
            payload_length: 0,
            number_encoders: 0,
            datagram_position: position,
            number_datagrams: count,
            start_column: 0,
            end_column: (PROFILE_SLOTS - 1) as u16,
            sequence_number: 1,
        };

        let mut body = vec![0u8; HEADER_SIZE];
        header.write_to(&mut body);
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&1u16.to_be_bytes());
        for j in 0..num_vals {
            let column = position + (j as u32) * count;
            body.push((column % 200) as u8);
        }
        for j in 0..num_vals {
            let column = position + (j as u32) * count;
            body.extend_from_slice(&(column as i16).to_be_bytes());
            body.extend_from_slice(&50i16.to_be_bytes());
        }
        body
    }

    /// Drives datagram bodies through the receiver's reassembly path.
    fn feed(head: &ScanHead, bodies: &[Vec<u8>]) {
        let mut builder = ProfileBuilder::new();
        let mut last_source = 0u32;
        let mut last_timestamp = 0u64;
        let mut transform = Alignment::with_scale(1.0);

        for body in bodies {
            process_datagram(
                &head.shared,
                body,
                &mut builder,
                &mut last_source,
                &mut last_timestamp,
                &mut transform,
            );
        }
    }

    #[test]
    fn test_reassembly_four_way_split() {
        let head = head();
        let bodies: Vec<Vec<u8>> = (0..4).map(|k| datagram(1_000, k, 4)).collect();
        feed(&head, &bodies);

        assert_eq!(head.available_profiles(), 1);
        let profile = head.get_profiles(1).remove(0);
        assert_eq!(profile.packets_received, 4);
        assert_eq!(profile.packets_expected, 4);
        assert_eq!(profile.data_valid_xy, 1456);
        assert_eq!(profile.data_valid_brightness, 1456);
        assert_eq!(profile.camera, Camera::A);
        assert_eq!(profile.laser, Laser::L1);
        for (column, point) in profile.data.iter().enumerate() {
            assert_eq!(point.x, column as i32);
            assert_eq!(point.y, 50);
        }
        assert_eq!(head.complete_profiles_received(), 1);
    }

    #[test]
    fn test_partial_published_on_timestamp_change() {
        let head = head();
        let bodies = vec![
            datagram(1_000, 0, 4),
            datagram(1_000, 1, 4),
            datagram(2_000, 0, 4),
        ];
        feed(&head, &bodies);

        // The torn profile surfaces as soon as the next one begins; the new
        // profile is still being assembled.
        assert_eq!(head.available_profiles(), 1);
        let partial = head.get_profiles(1).remove(0);
        assert_eq!(partial.timestamp_ns, 1_000);
        assert_eq!(partial.packets_received, 2);
        assert_eq!(partial.packets_expected, 4);
        assert!(!partial.is_complete());
        assert_eq!(partial.data_valid_xy, 728);
        assert_eq!(partial.data[0].x, 0);
        assert_eq!(partial.data[2].x, crate::profile::INVALID_XY);
    }

    #[test]
    fn test_xy_sentinels_leave_slots_empty() {
        let head = head();
        let mut body = datagram(1_000, 0, 1);
        // Overwrite the first XY pair in the payload with the wire sentinel.
        let packet = DataPacket::parse(&body).unwrap();
        let xy = packet.fragment_layout(DataType::XyData).unwrap();
        let at = xy.offset;
        drop(packet);
        body[at..at + 2].copy_from_slice(&i16::MIN.to_be_bytes());
        body[at + 2..at + 4].copy_from_slice(&i16::MIN.to_be_bytes());

        feed(&head, &[body]);
        let profile = head.get_profiles(1).remove(0);
        assert_eq!(profile.data_valid_xy, 1455);
        assert_eq!(profile.data[0].x, crate::profile::INVALID_XY);
        assert_eq!(profile.data[1].x, 1);
    }

    #[test]
    fn test_datagram_for_unknown_ports_dropped() {
        let head = head();
        let mut body = datagram(1_000, 0, 1);
        // Camera port 7 does not exist on this head type.
        body[5] = 7;
        feed(&head, &[body]);
        assert_eq!(head.available_profiles(), 0);
    }

    #[test]
    fn test_scanning_guards() {
        let head = head();
        head.shared.lock().is_scanning = true;

        assert_eq!(
            head.set_configuration(HeadConfiguration::default()),
            Err(Error::Scanning)
        );
        assert_eq!(
            head.set_data_format(DataFormat::XyFull),
            Err(Error::Scanning)
        );
        assert_eq!(
            head.set_alignment(0.0, 0.0, 0.0),
            Err(Error::Scanning)
        );
        assert_eq!(
            head.set_window(&ScanWindow::rectangular(1.0, -1.0, -1.0, 1.0).unwrap()),
            Err(Error::Scanning)
        );
        assert_eq!(
            head.set_cable_orientation(CableOrientation::Downstream),
            Err(Error::Scanning)
        );
    }
}
