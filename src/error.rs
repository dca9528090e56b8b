use std::io;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ActivateError {
    #[error("{op} failed for {addr}: {source}")]
    SocketSetup {
        op: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("setsockopt(UDP_GRM_DISSECTOR) failed. Dissector conflict? Try 'udpgrm delete {addr}'")]
    DissectorConflict {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("{op} failed. Is udpgrm loaded? Try 'udpgrm --self --install'. ({source})")]
    KernelUnavailable {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("setsockopt(UDP_GRM_SOCKET_APP) failed for app {app}. Perhaps conflict with apps max {apps_max}? ({source})")]
    AppRouteConflict {
        app: u32,
        apps_max: u32,
        #[source]
        source: io::Error,
    },

    #[error("Pre-registration of socket #{socket} not confirmed after {attempts} polls. Is udpgrm still running?")]
    RegistrationTimeout { socket: usize, attempts: u32 },

    #[error("Bad cBPF line {line}: {content:?}")]
    ConfigFormat { line: usize, content: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("File descriptor store notification failed: {0}")]
    FdStoreError(#[source] io::Error),

    #[error("Failed to exec {command:?}: {source}")]
    ExecFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl ActivateError {
    pub(crate) fn kernel(op: &'static str, source: io::Error) -> Self {
        ActivateError::KernelUnavailable { op, source }
    }
}

pub type Result<T> = std::result::Result<T, ActivateError>;
