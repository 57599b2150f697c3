//! Socket construction helpers

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::ops::RangeInclusive;

use crate::error::NetworkError;

/// Create a non-blocking UDP socket bound to `addr`
pub fn create_udp_socket(addr: SocketAddr, recv_buffer_size: usize) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if let Err(e) = socket.set_recv_buffer_size(recv_buffer_size) {
        tracing::debug!("Could not set UDP receive buffer to {} bytes: {}", recv_buffer_size, e);
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Bind a non-blocking TCP listener on all interfaces at `port`
pub fn bind_tcp_listener(port: u16) -> io::Result<std::net::TcpListener> {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1)?;
    Ok(socket.into())
}

/// Try `bind` on each port of `ports` in ascending order
///
/// Returns the first port that binds together with its listener.
pub fn open_listener_in_range<L>(
    ports: RangeInclusive<u16>,
    mut bind: impl FnMut(u16) -> io::Result<L>,
) -> Result<(u16, L), NetworkError> {
    let (first, last) = (*ports.start(), *ports.end());
    for port in ports {
        match bind(port) {
            Ok(listener) => return Ok((port, listener)),
            Err(e) => tracing::debug!("Failed to listen on port {}: {}", port, e),
        }
    }

    tracing::error!("Failed to open a listening socket on any port in {}..={}", first, last);
    Err(NetworkError::NoListeningPort { first, last })
}
