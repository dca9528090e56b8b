//! One activation run: bind, configure udpgrm, hand off, register

use crate::fdstore::FdStore;
use crate::grm::{AppRoute, DissectorConfig, GenerationRegistrar, GrmSocket, RetryPolicy};
use crate::report::ActivationReport;
use crate::socket::{SocketGroup, SocketOptions};
use crate::Result;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use tracing::{debug, info};

/// Fully validated request for one activation
#[derive(Debug, Clone)]
pub struct ActivationPlan {
    /// FDNAME in the descriptor store
    pub name: String,
    pub address: SocketAddr,
    pub count: usize,
    pub socket_options: SocketOptions,
    pub dissector: Option<DissectorConfig>,
    pub app_route: Option<AppRoute>,
    pub register: bool,
    pub promote: bool,
}

/// Install the dissector through the first socket and the app route on all
/// of them.
pub fn configure<S: GrmSocket>(
    sockets: &[S],
    addr: SocketAddr,
    dissector: Option<&DissectorConfig>,
    app_route: Option<&AppRoute>,
    policy: &RetryPolicy,
) -> Result<()> {
    if let (Some(dissector), Some(first)) = (dissector, sockets.first()) {
        dissector.install(first, addr, policy)?;
    }
    if let Some(route) = app_route {
        route.apply(sockets, policy)?;
    }
    Ok(())
}

pub struct Activator<F> {
    store: F,
    setter: RetryPolicy,
    confirm: RetryPolicy,
}

impl<F: FdStore> Activator<F> {
    pub fn new(store: F) -> Self {
        Self {
            store,
            setter: RetryPolicy::SETSOCKOPT,
            confirm: RetryPolicy::CONFIRM,
        }
    }

    pub fn with_policies(store: F, setter: RetryPolicy, confirm: RetryPolicy) -> Self {
        Self {
            store,
            setter,
            confirm,
        }
    }

    pub fn store(&self) -> &F {
        &self.store
    }

    /// Bind the group and run the rest of the activation on it
    pub fn run(&self, plan: &ActivationPlan) -> Result<(SocketGroup, ActivationReport)> {
        let group = SocketGroup::bind(plan.address, plan.count, &plan.socket_options)?;
        info!(
            "Created {} UDP sockets on {}",
            group.len(),
            group.local_addr()
        );
        let report = self.provision(plan, group.sockets(), group.local_addr(), &group.raw_fds())?;
        Ok((group, report))
    }

    /// Everything after binding. `fds` are the descriptors of `sockets`, in
    /// the same order.
    pub fn provision<S: GrmSocket>(
        &self,
        plan: &ActivationPlan,
        sockets: &[S],
        addr: SocketAddr,
        fds: &[RawFd],
    ) -> Result<ActivationReport> {
        configure(
            sockets,
            addr,
            plan.dissector.as_ref(),
            plan.app_route.as_ref(),
            &self.setter,
        )?;

        self.store.remove(&plan.name)?;
        self.store.store(&plan.name, fds)?;

        let registration = if plan.register {
            let registrar = GenerationRegistrar::with_policies(plan.promote, self.setter, self.confirm);
            Some(registrar.register(sockets)?)
        } else {
            debug!("Skipping socket registration");
            None
        };

        Ok(ActivationReport {
            name: plan.name.clone(),
            address: addr,
            sockets: sockets.len(),
            descriptors: fds.to_vec(),
            dissector: plan.dissector.as_ref().map(|d| d.kind().as_str()),
            registration,
        })
    }
}
