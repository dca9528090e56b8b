//! Handing descriptors to the systemd file descriptor store
//!
//! Talks the `sd_notify` datagram protocol directly: the old entry is removed
//! with `FDSTOREREMOVE=1`, then the new sockets are sent with `FDSTORE=1`
//! and attached as `SCM_RIGHTS`.

use crate::{ActivateError, Result};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::ptr;
use tracing::{debug, warn};

pub const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";

/// systemd caps FDNAME at 255 characters
const MAX_FDNAME_LEN: usize = 255;

pub trait FdStore {
    /// Drop every descriptor stored under `name`
    fn remove(&self, name: &str) -> Result<()>;

    fn store(&self, name: &str, fds: &[RawFd]) -> Result<()>;
}

pub fn validate_fdname(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_FDNAME_LEN {
        return Err(ActivateError::ConfigError(format!(
            "FDNAME must be 1 to {} characters",
            MAX_FDNAME_LEN
        )));
    }
    if name.chars().any(|c| c == ':' || c.is_control() || !c.is_ascii()) {
        return Err(ActivateError::ConfigError(format!(
            "FDNAME {:?} must be printable ASCII without ':'",
            name
        )));
    }
    Ok(())
}

pub struct SystemdNotify {
    socket: Option<UnixDatagram>,
}

impl SystemdNotify {
    /// Connect to `$NOTIFY_SOCKET`. Outside of systemd every notification is
    /// skipped with a warning.
    pub fn from_env() -> Result<Self> {
        match std::env::var(NOTIFY_SOCKET_ENV) {
            Ok(addr) if !addr.is_empty() => Self::connect(&addr),
            _ => {
                warn!("{} not set, file descriptor store is unavailable", NOTIFY_SOCKET_ENV);
                Ok(Self { socket: None })
            }
        }
    }

    /// Connect to a notify socket path, or an abstract name prefixed by `@`
    pub fn connect(addr: &str) -> Result<Self> {
        let socket = UnixDatagram::unbound().map_err(ActivateError::FdStoreError)?;
        match addr.strip_prefix('@') {
            Some(name) => {
                use std::os::linux::net::SocketAddrExt;
                let abstract_addr = std::os::unix::net::SocketAddr::from_abstract_name(name)
                    .map_err(ActivateError::FdStoreError)?;
                socket
                    .connect_addr(&abstract_addr)
                    .map_err(ActivateError::FdStoreError)?;
            }
            None => socket.connect(addr).map_err(ActivateError::FdStoreError)?,
        }
        debug!("Connected to notify socket {}", addr);
        Ok(Self {
            socket: Some(socket),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn notify(&self, state: &str, fds: &[RawFd]) -> Result<()> {
        let Some(socket) = &self.socket else {
            return Ok(());
        };
        send_with_fds(socket, state.as_bytes(), fds).map_err(ActivateError::FdStoreError)
    }
}

impl FdStore for SystemdNotify {
    fn remove(&self, name: &str) -> Result<()> {
        debug!("FDNAME={} deleting old entry from fd store", name);
        self.notify(&format!("FDSTOREREMOVE=1\nFDNAME={}", name), &[])
    }

    fn store(&self, name: &str, fds: &[RawFd]) -> Result<()> {
        debug!("FDNAME={} adding {} sockets to fd store", name, fds.len());
        self.notify(&format!("FDSTORE=1\nFDNAME={}", name), fds)
    }
}

fn send_with_fds(socket: &UnixDatagram, data: &[u8], fds: &[RawFd]) -> io::Result<()> {
    let mut iov = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };
    let fds_len = mem::size_of_val(fds);

    // SAFETY: CMSG_SPACE only computes a size.
    let space = unsafe { libc::CMSG_SPACE(fds_len as u32) } as usize;
    // u64 backing keeps the control buffer aligned for cmsghdr
    let mut control = vec![0u64; space.div_ceil(mem::size_of::<u64>())];

    // SAFETY: msghdr is plain data, all-zero is a valid empty header.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if !fds.is_empty() {
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = space as _;
        // SAFETY: the control buffer holds CMSG_SPACE(fds_len) bytes, so the
        // first header and its data area for `fds.len()` descriptors fit.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(fds_len as u32) as _;
            ptr::copy_nonoverlapping(fds.as_ptr(), libc::CMSG_DATA(cmsg) as *mut RawFd, fds.len());
        }
    }

    // SAFETY: msg points at live iov and control buffers for the call.
    let ret = unsafe { libc::sendmsg(socket.as_raw_fd(), &msg, libc::MSG_NOSIGNAL) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
