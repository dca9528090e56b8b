//! Socket pre-registration
//!
//! A new cohort of sockets is introduced as `working_gen + 1`. Setting
//! `UDP_GRM_SOCKET_GEN` makes the daemon allocate a slot asynchronously, so
//! each socket is polled until its index shows up. Traffic only moves to the
//! new cohort once the working generation is bumped, which is normally left
//! to the service itself.

use super::retry::{is_eagain, RetryPolicy};
use super::{short_read, GrmOption, GrmSocket};
use crate::{ActivateError, Result};
use serde::Serialize;
use tracing::{debug, info};
use udpgrm_common::{SocketGen, SOCKET_IDX_UNASSIGNED};

/// Generation and slot of one socket as reported by udpgrm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SocketSlot {
    pub generation: u32,
    pub index: Option<u32>,
}

impl From<SocketGen> for SocketSlot {
    fn from(raw: SocketGen) -> Self {
        SocketSlot {
            generation: raw.socket_gen,
            index: (raw.socket_idx != SOCKET_IDX_UNASSIGNED).then_some(raw.socket_idx),
        }
    }
}

/// Read the generation and slot of a socket
pub fn socket_slot<S: GrmSocket>(sock: &S) -> std::io::Result<SocketSlot> {
    let mut buf = [0u8; 8];
    let len = sock.get_grm_option(GrmOption::SocketGen, &mut buf)?;
    if len < buf.len() {
        return Err(short_read(GrmOption::SocketGen, len, buf.len()));
    }
    let raw = SocketGen {
        socket_gen: u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
        socket_idx: u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]),
    };
    Ok(raw.into())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub previous_generation: u32,
    pub generation: u32,
    pub slots: Vec<SocketSlot>,
    pub promoted: bool,
}

#[derive(Debug, Clone)]
pub struct GenerationRegistrar {
    setter: RetryPolicy,
    confirm: RetryPolicy,
    promote: bool,
}

impl GenerationRegistrar {
    pub fn new(promote: bool) -> Self {
        Self {
            setter: RetryPolicy::SETSOCKOPT,
            confirm: RetryPolicy::CONFIRM,
            promote,
        }
    }

    pub fn with_policies(promote: bool, setter: RetryPolicy, confirm: RetryPolicy) -> Self {
        Self {
            setter,
            confirm,
            promote,
        }
    }

    pub fn register<S: GrmSocket>(&self, sockets: &[S]) -> Result<Registration> {
        let first = sockets
            .first()
            .ok_or_else(|| ActivateError::ConfigError("cannot register an empty group".to_string()))?;

        let working_gen = first
            .get_grm_u32(GrmOption::WorkingGen)
            .map_err(|e| ActivateError::kernel("getsockopt(UDP_GRM_WORKING_GEN)", e))?;
        let next_gen = working_gen.wrapping_add(1);
        debug!("Working generation is {}, registering as {}", working_gen, next_gen);

        for sock in sockets {
            self.setter
                .retry(is_eagain, || sock.set_grm_u32(GrmOption::SocketGen, next_gen))
                .map_err(|e| ActivateError::kernel("setsockopt(UDP_GRM_SOCKET_GEN)", e))?;
        }

        let mut slots = Vec::with_capacity(sockets.len());
        for (i, sock) in sockets.iter().enumerate() {
            let slot = self
                .confirm
                .poll(|| {
                    let slot = socket_slot(sock)?;
                    Ok(slot.index.is_some().then_some(slot))
                })
                .map_err(|e| ActivateError::kernel("getsockopt(UDP_GRM_SOCKET_GEN)", e))?
                .ok_or(ActivateError::RegistrationTimeout {
                    socket: i,
                    attempts: self.confirm.max_attempts,
                })?;
            debug!(
                "Socket #{} registered: gen={} idx={:?}",
                i, slot.generation, slot.index
            );
            slots.push(slot);
        }

        if self.promote {
            self.setter
                .retry(is_eagain, || first.set_grm_u32(GrmOption::WorkingGen, next_gen))
                .map_err(|e| ActivateError::kernel("setsockopt(UDP_GRM_WORKING_GEN)", e))?;
            info!("Working generation advanced to {}", next_gen);
        }

        info!(
            "Registered {} sockets as generation {}",
            slots.len(),
            next_gen
        );
        Ok(Registration {
            previous_generation: working_gen,
            generation: next_gen,
            slots,
            promoted: self.promote,
        })
    }
}

impl Default for GenerationRegistrar {
    fn default() -> Self {
        Self::new(false)
    }
}
