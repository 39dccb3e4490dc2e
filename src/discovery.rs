// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Scanfleet Developers. All Rights Reserved.

//! UDP broadcast discovery of scan heads.
//!
//! The client broadcasts a small datagram carrying its semantic version on
//! every active non-loopback interface, waits briefly, then drains replies
//! from each socket. Heads answer with their serial number, address, product
//! type, and firmware version.
//!
//! Discovery itself does not enforce version compatibility; that check
//! happens when a head is created from its record.

use crate::error::{Error, Result};
use crate::net;
use crate::spec::HeadType;
use crate::wire::{ClientDiscovery, ServerDiscovery, DISCOVERY_PORT};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;
use tracing::{debug, warn};

/// How long to wait for heads to answer a discovery broadcast.
pub const DISCOVERY_WAIT: Duration = Duration::from_millis(200);

/// One scan head seen on the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredHead {
    pub serial_number: u32,
    pub ip_address: Ipv4Addr,
    pub head_type: HeadType,
    pub firmware_version_major: u32,
    pub firmware_version_minor: u32,
    pub firmware_version_patch: u32,
    pub type_name: String,
}

/// Broadcasts a discovery request and collects replies into `discovered`,
/// keyed by serial number.
///
/// Fails with [`Error::Network`] only when no broadcast socket could be
/// opened or no interface accepted the datagram; zero replies is success.
pub fn broadcast_discover(discovered: &mut HashMap<u32, DiscoveredHead>) -> Result<()> {
    let addrs = net::active_interface_addrs().map_err(|_| Error::Network)?;

    let mut sockets = Vec::new();
    for addr in addrs {
        match net::broadcast_socket(addr) {
            Ok(socket) => sockets.push(socket),
            // Other interfaces may still work.
            Err(err) => debug!(interface = %addr, error = %err, "broadcast socket failed"),
        }
    }

    if sockets.is_empty() {
        return Err(Error::Network);
    }

    let request = ClientDiscovery::current().encode();
    let destination = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, DISCOVERY_PORT));

    let mut sent = 0;
    for socket in &sockets {
        match socket.send_to(&request, destination) {
            Ok(_) => sent += 1,
            Err(err) => debug!(error = %err, "discovery send failed"),
        }
    }

    if sent == 0 {
        return Err(Error::Network);
    }

    std::thread::sleep(DISCOVERY_WAIT);

    for socket in &sockets {
        drain_replies(socket, discovered);
    }

    Ok(())
}

/// Reads replies off one socket until it would block.
fn drain_replies(socket: &UdpSocket, discovered: &mut HashMap<u32, DiscoveredHead>) {
    let mut buf = [0u8; 128];

    loop {
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(_) => return,
        };

        match parse_reply(&buf[..len]) {
            Some(head) => {
                discovered.insert(head.serial_number, head);
            }
            None => warn!("discarding malformed discovery reply"),
        }
    }
}

/// Decodes one discovery reply; `None` for malformed datagrams or unknown
/// product tags.
pub fn parse_reply(buf: &[u8]) -> Option<DiscoveredHead> {
    let reply = ServerDiscovery::decode(buf).ok()?;
    let head_type = HeadType::from_tag(reply.type_tag)?;

    Some(DiscoveredHead {
        serial_number: reply.serial_number,
        ip_address: Ipv4Addr::from(reply.ip_server),
        head_type,
        firmware_version_major: reply.version_major,
        firmware_version_minor: reply.version_minor,
        firmware_version_patch: reply.version_patch,
        type_name: reply.type_name,
    })
}
