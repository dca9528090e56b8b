pub mod app;
pub mod dissector;
pub mod registrar;
pub mod retry;

use socket2::Socket;
use std::io;
use std::os::fd::AsRawFd;
use udpgrm_common::sockopt;

pub use app::AppRoute;
pub use dissector::DissectorConfig;
pub use registrar::{GenerationRegistrar, Registration, SocketSlot};
pub use retry::RetryPolicy;

/// The udpgrm control options, all at the `IPPROTO_UDP` level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrmOption {
    WorkingGen,
    SocketGen,
    Dissector,
    FlowAssure,
    SocketApp,
}

impl GrmOption {
    pub const fn id(&self) -> libc::c_int {
        match self {
            GrmOption::WorkingGen => sockopt::UDP_GRM_WORKING_GEN,
            GrmOption::SocketGen => sockopt::UDP_GRM_SOCKET_GEN,
            GrmOption::Dissector => sockopt::UDP_GRM_DISSECTOR,
            GrmOption::FlowAssure => sockopt::UDP_GRM_FLOW_ASSURE,
            GrmOption::SocketApp => sockopt::UDP_GRM_SOCKET_APP,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            GrmOption::WorkingGen => "UDP_GRM_WORKING_GEN",
            GrmOption::SocketGen => "UDP_GRM_SOCKET_GEN",
            GrmOption::Dissector => "UDP_GRM_DISSECTOR",
            GrmOption::FlowAssure => "UDP_GRM_FLOW_ASSURE",
            GrmOption::SocketApp => "UDP_GRM_SOCKET_APP",
        }
    }
}

impl std::fmt::Display for GrmOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A socket that can talk the udpgrm option protocol.
///
/// Every kernel interaction in this crate goes through these two calls.
pub trait GrmSocket {
    fn set_grm_option(&self, option: GrmOption, value: &[u8]) -> io::Result<()>;

    /// Fill `buf` with the option value, returning the length written
    fn get_grm_option(&self, option: GrmOption, buf: &mut [u8]) -> io::Result<usize>;

    fn set_grm_u32(&self, option: GrmOption, value: u32) -> io::Result<()> {
        self.set_grm_option(option, &value.to_ne_bytes())
    }

    fn get_grm_u32(&self, option: GrmOption) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        let len = self.get_grm_option(option, &mut buf)?;
        if len < buf.len() {
            return Err(short_read(option, len, buf.len()));
        }
        Ok(u32::from_ne_bytes(buf))
    }
}

impl GrmSocket for Socket {
    fn set_grm_option(&self, option: GrmOption, value: &[u8]) -> io::Result<()> {
        // SAFETY: fd is owned by `self` and stays open for the call; the
        // pointer and length describe the `value` slice exactly.
        let ret = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                libc::IPPROTO_UDP,
                option.id(),
                value.as_ptr() as *const libc::c_void,
                value.len() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn get_grm_option(&self, option: GrmOption, buf: &mut [u8]) -> io::Result<usize> {
        let mut len = buf.len() as libc::socklen_t;
        // SAFETY: getsockopt writes at most `len` bytes into `buf`.
        let ret = unsafe {
            libc::getsockopt(
                self.as_raw_fd(),
                libc::IPPROTO_UDP,
                option.id(),
                buf.as_mut_ptr() as *mut libc::c_void,
                &mut len,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(len as usize)
    }
}

pub(crate) fn short_read(option: GrmOption, got: usize, want: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("getsockopt({}) returned {} bytes, expected {}", option, got, want),
    )
}
