// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Scanfleet Developers. All Rights Reserved.

//! Common error type for scan system operations.
//!
//! Every fallible operation in this crate returns [`Error`]. The variant set
//! is closed and each variant has a stable negative integer code for hosts
//! that report errors numerically; see [`Error::code`].

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error conditions reported by scan system and scan head operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Internal failure, usually a protocol or I/O fault on an open stream.
    Internal,
    /// A required argument was missing.
    NullArgument,
    /// An argument was rejected by validation.
    InvalidArgument,
    /// The operation requires a connection that is not established.
    NotConnected,
    /// The operation is unavailable while connected.
    Connected,
    /// The operation requires active scanning.
    NotScanning,
    /// The operation is unavailable while scanning.
    Scanning,
    /// The scan head firmware major version does not match the client.
    VersionCompatibility,
    /// A scan head with the same serial number or id already exists.
    AlreadyExists,
    /// A fixed-capacity table has no room left.
    NoMoreRoom,
    /// No usable network interface, or no datagram could be sent.
    Network,
    /// The serial number was not seen during discovery.
    NotDiscovered,
    /// An unrecognized error code.
    Unknown,
}

impl Error {
    /// Stable negative integer code for this error.
    ///
    /// Zero and positive values are reserved for success and counts.
    pub fn code(&self) -> i32 {
        match self {
            Error::Internal => -1,
            Error::NullArgument => -2,
            Error::InvalidArgument => -3,
            Error::NotConnected => -4,
            Error::Connected => -5,
            Error::NotScanning => -6,
            Error::Scanning => -7,
            Error::VersionCompatibility => -8,
            Error::AlreadyExists => -9,
            Error::NoMoreRoom => -10,
            Error::Network => -11,
            Error::NotDiscovered => -12,
            Error::Unknown => -13,
        }
    }

    /// Maps a numeric code back to an error.
    ///
    /// Any value outside the known range maps to [`Error::Unknown`].
    pub fn from_code(code: i32) -> Error {
        match code {
            -1 => Error::Internal,
            -2 => Error::NullArgument,
            -3 => Error::InvalidArgument,
            -4 => Error::NotConnected,
            -5 => Error::Connected,
            -6 => Error::NotScanning,
            -7 => Error::Scanning,
            -8 => Error::VersionCompatibility,
            -9 => Error::AlreadyExists,
            -10 => Error::NoMoreRoom,
            -11 => Error::Network,
            -12 => Error::NotDiscovered,
            _ => Error::Unknown,
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Internal => write!(f, "internal error"),
            Error::NullArgument => write!(f, "null argument"),
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::NotConnected => write!(f, "not connected"),
            Error::Connected => write!(f, "connected"),
            Error::NotScanning => write!(f, "not scanning"),
            Error::Scanning => write!(f, "scanning"),
            Error::VersionCompatibility => write!(f, "version compatibility mismatch"),
            Error::AlreadyExists => write!(f, "already exists"),
            Error::NoMoreRoom => write!(f, "no more room"),
            Error::Network => write!(f, "network error"),
            Error::NotDiscovered => write!(f, "not discovered"),
            Error::Unknown => write!(f, "unknown error"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(_: std::io::Error) -> Self {
        // Socket send/recv that does not produce the framed byte count is an
        // internal fault; inability to open sockets maps to Network at the
        // call sites that know the difference.
        Error::Internal
    }
}
