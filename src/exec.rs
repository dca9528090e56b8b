//! Replacing the activator with the service process
//!
//! The group sockets are made inheritable and the command is exec'ed with
//! the current environment.

use crate::{ActivateError, Result};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::Command;
use tracing::info;

/// Clear `FD_CLOEXEC` so the descriptor survives `execve`
pub fn clear_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFD/F_SETFD only touch descriptor flags.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Exec `command` with the given sockets inherited. Only returns on failure.
pub fn exec_with<S: AsRawFd>(command: &[String], sockets: &[S]) -> ActivateError {
    let Some((program, args)) = command.split_first() else {
        return ActivateError::ConfigError("empty command".to_string());
    };

    if let Err(e) = inherit_all(sockets) {
        return e;
    }

    info!("Executing {} with {} inherited sockets", program, sockets.len());
    let source = Command::new(program).args(args).exec();
    ActivateError::ExecFailed {
        command: program.clone(),
        source,
    }
}

fn inherit_all<S: AsRawFd>(sockets: &[S]) -> Result<()> {
    for sock in sockets {
        clear_cloexec(sock.as_raw_fd())?;
    }
    Ok(())
}
