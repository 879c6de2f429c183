//! Loopback port allocation for the transcoder's RTP inputs.

use crate::errors::SfuError;
use std::net::{Ipv4Addr, UdpSocket};

/// Reserve `count` distinct UDP ports on 127.0.0.1.
///
/// Every socket is held until all ports are known, then released so the
/// transcoder can bind them. Another process may claim a port between release
/// and the transcoder's bind; the recording then fails and is reported like any
/// other transcoder failure.
pub fn allocate_ports(count: usize) -> Result<Vec<u16>, SfuError> {
    let mut sockets = Vec::with_capacity(count);
    let mut ports = Vec::with_capacity(count);
    for _ in 0..count {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .map_err(|e| SfuError::ResourceExhausted(format!("udp port allocation failed: {e}")))?;
        let port = socket
            .local_addr()
            .map_err(|e| SfuError::ResourceExhausted(format!("udp port allocation failed: {e}")))?
            .port();
        ports.push(port);
        sockets.push(socket);
    }
    drop(sockets);
    Ok(ports)
}
