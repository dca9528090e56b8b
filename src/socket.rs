//! Reuseport UDP socket groups
//!
//! All members bind the exact same address. When port 0 is requested the
//! first bind picks the port and the rest of the group follows it.

use crate::{ActivateError, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use tracing::debug;

/// Default `SO_RCVBUF`, 16 MiB
pub const DEFAULT_RECV_BUFFER: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Clear `IPV6_V6ONLY` so an IPv6 socket also takes IPv4 traffic
    pub dual_stack: bool,
    pub freebind: bool,
    /// 0 keeps the system default
    pub recv_buffer: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            dual_stack: false,
            freebind: false,
            recv_buffer: DEFAULT_RECV_BUFFER,
        }
    }
}

#[derive(Debug)]
pub struct SocketGroup {
    sockets: Vec<Socket>,
    local_addr: SocketAddr,
}

impl SocketGroup {
    /// Create and bind `count` sockets on `addr`.
    ///
    /// On failure the sockets created so far are dropped, and thereby closed.
    pub fn bind(addr: SocketAddr, count: usize, options: &SocketOptions) -> Result<Self> {
        if count == 0 {
            return Err(ActivateError::ConfigError(
                "socket count must be at least 1".to_string(),
            ));
        }

        let mut target = addr;
        let mut sockets = Vec::with_capacity(count);
        for i in 0..count {
            let sock = new_member(target, options)?;
            if i == 0 && target.port() == 0 {
                target = local_addr(&sock, target)?;
                debug!("Ephemeral port resolved to {}", target);
            }
            sockets.push(sock);
        }

        debug!("Bound {} UDP sockets on {}", sockets.len(), target);
        Ok(Self {
            sockets,
            local_addr: target,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    pub fn first(&self) -> &Socket {
        &self.sockets[0]
    }

    pub fn sockets(&self) -> &[Socket] {
        &self.sockets
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Socket> {
        self.sockets.iter()
    }

    pub fn raw_fds(&self) -> Vec<RawFd> {
        self.sockets.iter().map(|s| s.as_raw_fd()).collect()
    }

    pub fn into_sockets(self) -> Vec<Socket> {
        self.sockets
    }
}

fn new_member(addr: SocketAddr, options: &SocketOptions) -> Result<Socket> {
    let setup = |op: &'static str| {
        move |source: std::io::Error| ActivateError::SocketSetup { op, addr, source }
    };

    let domain = Domain::for_address(addr);
    let sock = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(setup("socket"))?;

    if addr.is_ipv6() {
        sock.set_only_v6(!options.dual_stack)
            .map_err(setup("setsockopt(IPV6_V6ONLY)"))?;
    }

    if options.freebind {
        if addr.is_ipv4() {
            sock.set_freebind(true)
                .map_err(setup("setsockopt(IP_FREEBIND)"))?;
        } else {
            sock.set_freebind_ipv6(true)
                .map_err(setup("setsockopt(IPV6_FREEBIND)"))?;
        }
    }

    sock.set_reuse_port(true)
        .map_err(setup("setsockopt(SO_REUSEPORT)"))?;

    if options.recv_buffer != 0 {
        sock.set_recv_buffer_size(options.recv_buffer)
            .map_err(setup("setsockopt(SO_RCVBUF)"))?;
    }

    sock.bind(&SockAddr::from(addr)).map_err(setup("bind"))?;
    Ok(sock)
}

fn local_addr(sock: &Socket, requested: SocketAddr) -> Result<SocketAddr> {
    let bound = sock
        .local_addr()
        .map_err(|source| ActivateError::SocketSetup {
            op: "getsockname",
            addr: requested,
            source,
        })?;
    bound.as_socket().ok_or_else(|| ActivateError::SocketSetup {
        op: "getsockname",
        addr: requested,
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, "not an inet address"),
    })
}
