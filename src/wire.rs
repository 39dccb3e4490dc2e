// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Scanfleet Developers. All Rights Reserved.

//! Control plane wire codec.
//!
//! All control traffic between client and scan head is a stream of framed
//! records: a `u32` little-endian length followed by that many body bytes.
//! Record bodies are little-endian throughout: a `u16` message kind, then
//! kind-specific fields in declaration order; vectors are a `u16` element
//! count followed by the elements.
//!
//! The scan data stream (port 12348) uses the same length framing, but its
//! bodies are the network byte order datagrams decoded by
//! [`crate::datagram`].
//!
//! Encoders and decoders are both provided: the client only sends requests
//! and receives replies, but head emulators in tests exercise the opposite
//! direction.

use crate::error::{Error, Result};

/// TCP port for the per-head control stream.
pub const CONTROL_PORT: u16 = 12346;
/// UDP port scan heads listen on for discovery broadcasts.
pub const DISCOVERY_PORT: u16 = 12347;
/// TCP port for the per-head scan data stream.
pub const DATA_PORT: u16 = 12348;

/// Client major version; heads with a different firmware major version are
/// rejected at creation.
pub const API_VERSION_MAJOR: u32 = 16;
pub const API_VERSION_MINOR: u32 = 1;
pub const API_VERSION_PATCH: u32 = 0;

/// Message kinds sent by the client on the control stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum RequestKind {
    Connect = 1,
    Disconnect = 2,
    WindowConfiguration = 3,
    ScanConfiguration = 4,
    ScanStart = 5,
    ScanStop = 6,
    KeepAlive = 7,
    StatusRequest = 8,
    ImageRequest = 9,
    ProfileRequest = 10,
}

impl RequestKind {
    pub fn from_u16(value: u16) -> Option<RequestKind> {
        match value {
            1 => Some(RequestKind::Connect),
            2 => Some(RequestKind::Disconnect),
            3 => Some(RequestKind::WindowConfiguration),
            4 => Some(RequestKind::ScanConfiguration),
            5 => Some(RequestKind::ScanStart),
            6 => Some(RequestKind::ScanStop),
            7 => Some(RequestKind::KeepAlive),
            8 => Some(RequestKind::StatusRequest),
            9 => Some(RequestKind::ImageRequest),
            10 => Some(RequestKind::ProfileRequest),
            _ => None,
        }
    }
}

/// Message kinds sent by the head in reply on the control stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ReplyKind {
    Status = 1,
    Image = 2,
    Profile = 3,
}

impl ReplyKind {
    pub fn from_u16(value: u16) -> Option<ReplyKind> {
        match value {
            1 => Some(ReplyKind::Status),
            2 => Some(ReplyKind::Image),
            3 => Some(ReplyKind::Profile),
            _ => None,
        }
    }
}

/// Camera mounting orientation reported in scan and profile requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CameraOrientation {
    Upstream = 0,
    Downstream = 1,
}

/// Little-endian record writer over a growable buffer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn put_str(&mut self, v: &str) {
        let bytes = v.as_bytes();
        self.put_u16(bytes.len() as u16);
        self.put_bytes(bytes);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Little-endian record reader with bounds checking.
///
/// Overruns surface as [`Error::Internal`]: a short record means the peer
/// did not produce the framed byte count.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::Internal);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_le_bytes(raw))
    }

    pub fn get_str(&mut self) -> Result<String> {
        let len = self.get_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::Internal)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// A window constraint in camera coordinates, ready for the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WireConstraint {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

/// Per camera/laser pair entry in a scan configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PairConfiguration {
    pub camera_port: u16,
    pub laser_port: u16,
    pub laser_on_min_ns: u32,
    pub laser_on_def_ns: u32,
    pub laser_on_max_ns: u32,
    pub scan_end_offset_ns: u32,
    pub camera_orientation: CameraOrientation,
}

/// Requests sent by the client on the control stream.
#[derive(Clone, Debug)]
pub enum Request {
    Connect {
        serial_number: u32,
        id: u32,
    },
    Disconnect,
    WindowConfiguration {
        camera_port: u16,
        laser_port: u16,
        constraints: Vec<WireConstraint>,
    },
    ScanConfiguration {
        data_type_mask: u16,
        data_stride: u16,
        scan_period_ns: u32,
        laser_detection_threshold: u32,
        saturation_threshold: u32,
        saturation_percentage: u32,
        pairs: Vec<PairConfiguration>,
    },
    ScanStart,
    ScanStop,
    KeepAlive,
    StatusRequest,
    ImageRequest {
        camera_port: u16,
        laser_port: u16,
        camera_exposure_ns: u32,
        laser_on_ns: u32,
    },
    ProfileRequest {
        camera_port: u16,
        laser_port: u16,
        camera_exposure_ns: u32,
        laser_on_ns: u32,
        laser_detection_threshold: u32,
        saturation_threshold: u32,
        camera_orientation: CameraOrientation,
    },
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Connect { .. } => RequestKind::Connect,
            Request::Disconnect => RequestKind::Disconnect,
            Request::WindowConfiguration { .. } => RequestKind::WindowConfiguration,
            Request::ScanConfiguration { .. } => RequestKind::ScanConfiguration,
            Request::ScanStart => RequestKind::ScanStart,
            Request::ScanStop => RequestKind::ScanStop,
            Request::KeepAlive => RequestKind::KeepAlive,
            Request::StatusRequest => RequestKind::StatusRequest,
            Request::ImageRequest { .. } => RequestKind::ImageRequest,
            Request::ProfileRequest { .. } => RequestKind::ProfileRequest,
        }
    }

    /// Encodes the record body (without the length frame).
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u16(self.kind() as u16);

        match self {
            Request::Connect { serial_number, id } => {
                w.put_u32(*serial_number);
                w.put_u32(*id);
            }
            Request::Disconnect
            | Request::ScanStart
            | Request::ScanStop
            | Request::KeepAlive
            | Request::StatusRequest => {}
            Request::WindowConfiguration {
                camera_port,
                laser_port,
                constraints,
            } => {
                w.put_u16(*camera_port);
                w.put_u16(*laser_port);
                w.put_u16(constraints.len() as u16);
                for c in constraints {
                    w.put_i32(c.x0);
                    w.put_i32(c.y0);
                    w.put_i32(c.x1);
                    w.put_i32(c.y1);
                }
            }
            Request::ScanConfiguration {
                data_type_mask,
                data_stride,
                scan_period_ns,
                laser_detection_threshold,
                saturation_threshold,
                saturation_percentage,
                pairs,
            } => {
                w.put_u16(*data_type_mask);
                w.put_u16(*data_stride);
                w.put_u32(*scan_period_ns);
                w.put_u32(*laser_detection_threshold);
                w.put_u32(*saturation_threshold);
                w.put_u32(*saturation_percentage);
                w.put_u16(pairs.len() as u16);
                for p in pairs {
                    w.put_u16(p.camera_port);
                    w.put_u16(p.laser_port);
                    w.put_u32(p.laser_on_min_ns);
                    w.put_u32(p.laser_on_def_ns);
                    w.put_u32(p.laser_on_max_ns);
                    w.put_u32(p.scan_end_offset_ns);
                    w.put_u8(p.camera_orientation as u8);
                }
            }
            Request::ImageRequest {
                camera_port,
                laser_port,
                camera_exposure_ns,
                laser_on_ns,
            } => {
                w.put_u16(*camera_port);
                w.put_u16(*laser_port);
                w.put_u32(*camera_exposure_ns);
                w.put_u32(*laser_on_ns);
            }
            Request::ProfileRequest {
                camera_port,
                laser_port,
                camera_exposure_ns,
                laser_on_ns,
                laser_detection_threshold,
                saturation_threshold,
                camera_orientation,
            } => {
                w.put_u16(*camera_port);
                w.put_u16(*laser_port);
                w.put_u32(*camera_exposure_ns);
                w.put_u32(*laser_on_ns);
                w.put_u32(*laser_detection_threshold);
                w.put_u32(*saturation_threshold);
                w.put_u8(*camera_orientation as u8);
            }
        }

        w.into_vec()
    }

    /// Decodes a request body. Used by head emulators.
    pub fn decode(buf: &[u8]) -> Result<Request> {
        let mut r = Reader::new(buf);
        let kind = RequestKind::from_u16(r.get_u16()?).ok_or(Error::Internal)?;

        let req = match kind {
            RequestKind::Connect => Request::Connect {
                serial_number: r.get_u32()?,
                id: r.get_u32()?,
            },
            RequestKind::Disconnect => Request::Disconnect,
            RequestKind::WindowConfiguration => {
                let camera_port = r.get_u16()?;
                let laser_port = r.get_u16()?;
                let count = r.get_u16()? as usize;
                let mut constraints = Vec::with_capacity(count);
                for _ in 0..count {
                    constraints.push(WireConstraint {
                        x0: r.get_i32()?,
                        y0: r.get_i32()?,
                        x1: r.get_i32()?,
                        y1: r.get_i32()?,
                    });
                }
                Request::WindowConfiguration {
                    camera_port,
                    laser_port,
                    constraints,
                }
            }
            RequestKind::ScanConfiguration => {
                let data_type_mask = r.get_u16()?;
                let data_stride = r.get_u16()?;
                let scan_period_ns = r.get_u32()?;
                let laser_detection_threshold = r.get_u32()?;
                let saturation_threshold = r.get_u32()?;
                let saturation_percentage = r.get_u32()?;
                let count = r.get_u16()? as usize;
                let mut pairs = Vec::with_capacity(count);
                for _ in 0..count {
                    pairs.push(PairConfiguration {
                        camera_port: r.get_u16()?,
                        laser_port: r.get_u16()?,
                        laser_on_min_ns: r.get_u32()?,
                        laser_on_def_ns: r.get_u32()?,
                        laser_on_max_ns: r.get_u32()?,
                        scan_end_offset_ns: r.get_u32()?,
                        camera_orientation: match r.get_u8()? {
                            0 => CameraOrientation::Upstream,
                            1 => CameraOrientation::Downstream,
                            _ => return Err(Error::Internal),
                        },
                    });
                }
                Request::ScanConfiguration {
                    data_type_mask,
                    data_stride,
                    scan_period_ns,
                    laser_detection_threshold,
                    saturation_threshold,
                    saturation_percentage,
                    pairs,
                }
            }
            RequestKind::ScanStart => Request::ScanStart,
            RequestKind::ScanStop => Request::ScanStop,
            RequestKind::KeepAlive => Request::KeepAlive,
            RequestKind::StatusRequest => Request::StatusRequest,
            RequestKind::ImageRequest => Request::ImageRequest {
                camera_port: r.get_u16()?,
                laser_port: r.get_u16()?,
                camera_exposure_ns: r.get_u32()?,
                laser_on_ns: r.get_u32()?,
            },
            RequestKind::ProfileRequest => Request::ProfileRequest {
                camera_port: r.get_u16()?,
                laser_port: r.get_u16()?,
                camera_exposure_ns: r.get_u32()?,
                laser_on_ns: r.get_u32()?,
                laser_detection_threshold: r.get_u32()?,
                saturation_threshold: r.get_u32()?,
                camera_orientation: match r.get_u8()? {
                    0 => CameraOrientation::Upstream,
                    1 => CameraOrientation::Downstream,
                    _ => return Err(Error::Internal),
                },
            },
        };

        Ok(req)
    }
}

/// Per camera block in a status reply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CameraStatus {
    pub port: u16,
    pub pixels_in_window: u32,
    pub temperature: i32,
}

/// Status reply from a scan head.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusReply {
    pub global_time_ns: u64,
    pub num_profiles_sent: u32,
    pub min_scan_period_ns: u32,
    pub cameras: Vec<CameraStatus>,
    pub encoders: Vec<i64>,
}

impl StatusReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u16(ReplyKind::Status as u16);
        w.put_u64(self.global_time_ns);
        w.put_u32(self.num_profiles_sent);
        w.put_u32(self.min_scan_period_ns);
        w.put_u16(self.cameras.len() as u16);
        for c in &self.cameras {
            w.put_u16(c.port);
            w.put_u32(c.pixels_in_window);
            w.put_i32(c.temperature);
        }
        w.put_u16(self.encoders.len() as u16);
        for e in &self.encoders {
            w.put_i64(*e);
        }
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<StatusReply> {
        let mut r = Reader::new(buf);
        if ReplyKind::from_u16(r.get_u16()?) != Some(ReplyKind::Status) {
            return Err(Error::Internal);
        }

        let global_time_ns = r.get_u64()?;
        let num_profiles_sent = r.get_u32()?;
        let min_scan_period_ns = r.get_u32()?;

        let camera_count = r.get_u16()? as usize;
        let mut cameras = Vec::with_capacity(camera_count);
        for _ in 0..camera_count {
            cameras.push(CameraStatus {
                port: r.get_u16()?,
                pixels_in_window: r.get_u32()?,
                temperature: r.get_i32()?,
            });
        }

        let encoder_count = r.get_u16()? as usize;
        let mut encoders = Vec::with_capacity(encoder_count);
        for _ in 0..encoder_count {
            encoders.push(r.get_i64()?);
        }

        Ok(StatusReply {
            global_time_ns,
            num_profiles_sent,
            min_scan_period_ns,
            cameras,
            encoders,
        })
    }
}

/// Image reply from a scan head diagnostic capture.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageReply {
    pub camera_port: u16,
    pub laser_port: u16,
    pub timestamp_ns: u64,
    pub height: u16,
    pub width: u16,
    pub pixels: Vec<u8>,
    pub encoders: Vec<i64>,
}

impl ImageReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u16(ReplyKind::Image as u16);
        w.put_u16(self.camera_port);
        w.put_u16(self.laser_port);
        w.put_u64(self.timestamp_ns);
        w.put_u16(self.height);
        w.put_u16(self.width);
        w.put_u32(self.pixels.len() as u32);
        w.put_bytes(&self.pixels);
        w.put_u16(self.encoders.len() as u16);
        for e in &self.encoders {
            w.put_i64(*e);
        }
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<ImageReply> {
        let mut r = Reader::new(buf);
        if ReplyKind::from_u16(r.get_u16()?) != Some(ReplyKind::Image) {
            return Err(Error::Internal);
        }

        let camera_port = r.get_u16()?;
        let laser_port = r.get_u16()?;
        let timestamp_ns = r.get_u64()?;
        let height = r.get_u16()?;
        let width = r.get_u16()?;

        let pixel_count = r.get_u32()? as usize;
        if pixel_count != (height as usize) * (width as usize) {
            return Err(Error::Internal);
        }
        let mut pixels = vec![0u8; pixel_count];
        for px in pixels.iter_mut() {
            *px = r.get_u8()?;
        }

        let encoder_count = r.get_u16()? as usize;
        let mut encoders = Vec::with_capacity(encoder_count);
        for _ in 0..encoder_count {
            encoders.push(r.get_i64()?);
        }

        Ok(ImageReply {
            camera_port,
            laser_port,
            timestamp_ns,
            height,
            width,
            pixels,
            encoders,
        })
    }
}

/// Diagnostic profile reply; points are in camera coordinates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileReply {
    pub camera_port: u16,
    pub laser_port: u16,
    pub timestamp_ns: u64,
    pub laser_on_time_ns: u32,
    pub points: Vec<(i16, i16, u8)>,
    pub encoders: Vec<i64>,
}

impl ProfileReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u16(ReplyKind::Profile as u16);
        w.put_u16(self.camera_port);
        w.put_u16(self.laser_port);
        w.put_u64(self.timestamp_ns);
        w.put_u32(self.laser_on_time_ns);
        w.put_u16(self.points.len() as u16);
        for &(x, y, brightness) in &self.points {
            w.put_i16(x);
            w.put_i16(y);
            w.put_u8(brightness);
        }
        w.put_u16(self.encoders.len() as u16);
        for e in &self.encoders {
            w.put_i64(*e);
        }
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<ProfileReply> {
        let mut r = Reader::new(buf);
        if ReplyKind::from_u16(r.get_u16()?) != Some(ReplyKind::Profile) {
            return Err(Error::Internal);
        }

        let camera_port = r.get_u16()?;
        let laser_port = r.get_u16()?;
        let timestamp_ns = r.get_u64()?;
        let laser_on_time_ns = r.get_u32()?;

        let point_count = r.get_u16()? as usize;
        let mut points = Vec::with_capacity(point_count);
        for _ in 0..point_count {
            let x = r.get_i16()?;
            let y = r.get_i16()?;
            let brightness = r.get_u8()?;
            points.push((x, y, brightness));
        }

        let encoder_count = r.get_u16()? as usize;
        let mut encoders = Vec::with_capacity(encoder_count);
        for _ in 0..encoder_count {
            encoders.push(r.get_i64()?);
        }

        Ok(ProfileReply {
            camera_port,
            laser_port,
            timestamp_ns,
            laser_on_time_ns,
            points,
            encoders,
        })
    }
}

/// Discovery broadcast sent by the client, carrying its semantic version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientDiscovery {
    pub version_major: u32,
    pub version_minor: u32,
    pub version_patch: u32,
}

impl ClientDiscovery {
    /// Discovery request for this client build.
    pub fn current() -> Self {
        Self {
            version_major: API_VERSION_MAJOR,
            version_minor: API_VERSION_MINOR,
            version_patch: API_VERSION_PATCH,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u32(self.version_major);
        w.put_u32(self.version_minor);
        w.put_u32(self.version_patch);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<ClientDiscovery> {
        let mut r = Reader::new(buf);
        Ok(ClientDiscovery {
            version_major: r.get_u32()?,
            version_minor: r.get_u32()?,
            version_patch: r.get_u32()?,
        })
    }
}

/// Discovery reply sent by a scan head.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerDiscovery {
    pub serial_number: u32,
    pub ip_server: u32,
    pub type_tag: u32,
    pub version_major: u32,
    pub version_minor: u32,
    pub version_patch: u32,
    pub type_name: String,
}

impl ServerDiscovery {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u32(self.serial_number);
        w.put_u32(self.ip_server);
        w.put_u32(self.type_tag);
        w.put_u32(self.version_major);
        w.put_u32(self.version_minor);
        w.put_u32(self.version_patch);
        w.put_str(&self.type_name);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<ServerDiscovery> {
        let mut r = Reader::new(buf);
        Ok(ServerDiscovery {
            serial_number: r.get_u32()?,
            ip_server: r.get_u32()?,
            type_tag: r.get_u32()?,
            version_major: r.get_u32()?,
            version_minor: r.get_u32()?,
            version_patch: r.get_u32()?,
            type_name: r.get_str()?,
        })
    }
}

/// Writes one length-framed record to a stream.
pub fn write_framed<W: std::io::Write>(stream: &mut W, body: &[u8]) -> Result<()> {
    let len = body.len() as u32;
    stream.write_all(&len.to_le_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

/// Reads one length-framed record from a stream.
///
/// `max_len` bounds the body size; a larger frame means the stream is not
/// speaking this protocol.
pub fn read_framed<R: std::io::Read>(stream: &mut R, max_len: usize) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > max_len {
        return Err(Error::Internal);
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_requests_round_trip() {
        for req in [
            Request::Disconnect,
            Request::ScanStart,
            Request::ScanStop,
            Request::KeepAlive,
            Request::StatusRequest,
        ] {
            let kind = req.kind();
            let body = req.encode();
            assert_eq!(body.len(), 2);
            assert_eq!(Request::decode(&body).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_connect_round_trip() {
        let body = Request::Connect {
            serial_number: 12345,
            id: 7,
        }
        .encode();
        match Request::decode(&body).unwrap() {
            Request::Connect { serial_number, id } => {
                assert_eq!(serial_number, 12345);
                assert_eq!(id, 7);
            }
            other => panic!("wrong request: {:?}", other),
        }
    }

    #[test]
    fn test_scan_configuration_round_trip() {
        let req = Request::ScanConfiguration {
            data_type_mask: 0x3,
            data_stride: 1,
            scan_period_ns: 2_000_000,
            laser_detection_threshold: 120,
            saturation_threshold: 800,
            saturation_percentage: 30,
            pairs: vec![PairConfiguration {
                camera_port: 1,
                laser_port: 0,
                laser_on_min_ns: 100_000,
                laser_on_def_ns: 500_000,
                laser_on_max_ns: 1_000_000,
                scan_end_offset_ns: 510_000,
                camera_orientation: CameraOrientation::Downstream,
            }],
        };
        let body = req.encode();
        match Request::decode(&body).unwrap() {
            Request::ScanConfiguration {
                scan_period_ns,
                pairs,
                ..
            } => {
                assert_eq!(scan_period_ns, 2_000_000);
                assert_eq!(pairs.len(), 1);
                assert_eq!(pairs[0].scan_end_offset_ns, 510_000);
                assert_eq!(pairs[0].camera_orientation, CameraOrientation::Downstream);
            }
            other => panic!("wrong request: {:?}", other),
        }
    }

    #[test]
    fn test_window_configuration_round_trip() {
        let req = Request::WindowConfiguration {
            camera_port: 0,
            laser_port: 0,
            constraints: vec![
                WireConstraint {
                    x0: -30000,
                    y0: 30000,
                    x1: 30000,
                    y1: 30000,
                },
                WireConstraint {
                    x0: 30000,
                    y0: -30000,
                    x1: -30000,
                    y1: -30000,
                },
            ],
        };
        let body = req.encode();
        match Request::decode(&body).unwrap() {
            Request::WindowConfiguration { constraints, .. } => {
                assert_eq!(constraints.len(), 2);
                assert_eq!(constraints[0].x0, -30000);
                assert_eq!(constraints[1].y1, -30000);
            }
            other => panic!("wrong request: {:?}", other),
        }
    }

    #[test]
    fn test_status_reply_round_trip() {
        let status = StatusReply {
            global_time_ns: 123_456_789_000,
            num_profiles_sent: 42,
            min_scan_period_ns: 1_500_000,
            cameras: vec![
                CameraStatus {
                    port: 0,
                    pixels_in_window: 800,
                    temperature: 35,
                },
                CameraStatus {
                    port: 1,
                    pixels_in_window: 640,
                    temperature: -4,
                },
            ],
            encoders: vec![100, -200],
        };
        let decoded = StatusReply::decode(&status.encode()).unwrap();
        assert_eq!(decoded, status);
    }

    #[test]
    fn test_profile_reply_round_trip() {
        let reply = ProfileReply {
            camera_port: 1,
            laser_port: 0,
            timestamp_ns: 55,
            laser_on_time_ns: 500_000,
            points: vec![(10, -20, 128), (-32768, -32768, 0)],
            encoders: vec![7],
        };
        let decoded = ProfileReply::decode(&reply.encode()).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_image_reply_size_check() {
        let reply = ImageReply {
            camera_port: 0,
            laser_port: 0,
            timestamp_ns: 1,
            height: 2,
            width: 3,
            pixels: vec![1, 2, 3, 4, 5, 6],
            encoders: vec![],
        };
        let decoded = ImageReply::decode(&reply.encode()).unwrap();
        assert_eq!(decoded, reply);

        // A pixel count that disagrees with the dimensions is rejected.
        let mut bad = reply.clone();
        bad.pixels.pop();
        assert_eq!(ImageReply::decode(&bad.encode()), Err(Error::Internal));
    }

    #[test]
    fn test_discovery_round_trip() {
        let c = ClientDiscovery::current();
        assert_eq!(ClientDiscovery::decode(&c.encode()).unwrap(), c);

        let s = ServerDiscovery {
            serial_number: 99001,
            ip_server: 0xC0A80064,
            type_tag: 1,
            version_major: 16,
            version_minor: 1,
            version_patch: 0,
            type_name: "JS-50 WX".to_owned(),
        };
        assert_eq!(ServerDiscovery::decode(&s.encode()).unwrap(), s);
    }

    #[test]
    fn test_framing_round_trip() {
        let mut buf = Vec::new();
        write_framed(&mut buf, b"hello").unwrap();
        assert_eq!(&buf[..4], &5u32.to_le_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        let body = read_framed(&mut cursor, 1024).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_framing_rejects_oversized() {
        let mut buf = Vec::new();
        write_framed(&mut buf, &[0u8; 64]).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_framed(&mut cursor, 16), Err(Error::Internal));
    }

    #[test]
    fn test_truncated_record_is_internal() {
        let body = Request::Connect {
            serial_number: 1,
            id: 2,
        }
        .encode();
        assert!(Request::decode(&body[..5]).is_err());
        assert!(StatusReply::decode(&[1, 0]).is_err());
    }
}
