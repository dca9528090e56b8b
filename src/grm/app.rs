use super::retry::{is_eagain, RetryPolicy};
use super::{GrmOption, GrmSocket};
use crate::{ActivateError, Result};
use tracing::debug;

/// Steers a socket to one application slot of the dissector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppRoute {
    pub app: u32,
    pub apps_max: u32,
}

impl AppRoute {
    /// Only configured when an app number or an app count was asked for
    pub fn requested(app: Option<u32>, apps_max: u32) -> Option<Self> {
        if app.is_none() && apps_max == 0 {
            return None;
        }
        Some(AppRoute {
            app: app.unwrap_or(0),
            apps_max,
        })
    }

    /// Unlike the dissector, the app number is per socket, so every member
    /// of the group gets it.
    pub fn apply<S: GrmSocket>(&self, sockets: &[S], policy: &RetryPolicy) -> Result<()> {
        for (i, sock) in sockets.iter().enumerate() {
            debug!("Setting app {} on socket #{}", self.app, i);
            policy
                .retry(is_eagain, || sock.set_grm_u32(GrmOption::SocketApp, self.app))
                .map_err(|e| {
                    if e.raw_os_error() == Some(libc::EOVERFLOW) {
                        ActivateError::AppRouteConflict {
                            app: self.app,
                            apps_max: self.apps_max,
                            source: e,
                        }
                    } else {
                        ActivateError::kernel("setsockopt(UDP_GRM_SOCKET_APP)", e)
                    }
                })?;
        }
        Ok(())
    }
}
