// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Scanfleet Developers. All Rights Reserved.

//! Socket setup helpers.
//!
//! Plain blocking `std::net` sockets driven by OS threads; `socket2` fills
//! in the options std does not expose (broadcast flag, receive buffer
//! sizing).

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream, UdpSocket};
use std::time::Duration;
use tracing::debug;

/// Receive buffer requested on the scan data stream. The head can burst a
/// full profile set per period; the large buffer rides out host scheduling
/// stalls. Applied best effort, the OS may grant less.
pub const DATA_RECV_BUFFER_BYTES: usize = 256 * 1024 * 1024;

/// Read timeout on the scan data stream, short enough for the receiver to
/// observe shutdown.
pub const DATA_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// IPv4 addresses of all active non-loopback interfaces.
pub fn active_interface_addrs() -> std::io::Result<Vec<Ipv4Addr>> {
    let mut addrs = Vec::new();
    for iface in if_addrs::get_if_addrs()? {
        if iface.is_loopback() {
            continue;
        }
        if let if_addrs::IfAddr::V4(v4) = iface.addr {
            addrs.push(v4.ip);
        }
    }
    Ok(addrs)
}

/// Opens a nonblocking UDP broadcast socket bound to `ip` on an ephemeral
/// port.
pub fn broadcast_socket(ip: Ipv4Addr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(ip, 0)).into())?;
    Ok(socket.into())
}

/// Connects a control or data stream to a head with a bounded wait.
pub fn tcp_connect(ip: Ipv4Addr, port: u16, timeout: Duration) -> std::io::Result<TcpStream> {
    let addr = SocketAddr::V4(SocketAddrV4::new(ip, port));
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Applies scan data stream options: a large receive buffer and a short
/// read timeout.
pub fn configure_data_stream(stream: &TcpStream) -> std::io::Result<()> {
    let sock = SockRef::from(stream);
    if let Err(err) = sock.set_recv_buffer_size(DATA_RECV_BUFFER_BYTES) {
        // Not fatal; the OS clamps or refuses on its own terms.
        debug!(error = %err, "data stream receive buffer not honored");
    }
    stream.set_read_timeout(Some(DATA_READ_TIMEOUT))?;
    Ok(())
}
