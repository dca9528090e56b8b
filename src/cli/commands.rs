use crate::activate::{ActivationPlan, Activator};
use crate::cbpf;
use crate::cli::Cli;
use crate::exec;
use crate::fdstore::{self, SystemdNotify};
use crate::grm::dissector::{DissectorSelection, HostnameRoute};
use crate::grm::AppRoute;
use crate::socket::SocketOptions;
use crate::{ActivateError, Result};
use tracing::info;

impl Cli {
    /// Validate the arguments into a plan. The cBPF file is read here, before
    /// any socket exists.
    pub fn to_plan(&self) -> Result<ActivationPlan> {
        fdstore::validate_fdname(&self.name)?;

        if self.app.is_some() && self.digest == 0 && self.bpf.is_none() && self.sni.is_empty() {
            return Err(ActivateError::ConfigError(
                "You need to select --bpf, --digest or --sni before doing --app".to_string(),
            ));
        }

        let program = match &self.bpf {
            Some(path) => cbpf::load_program(path)?,
            None => Vec::new(),
        };
        let hostnames = self
            .sni
            .iter()
            .map(|s| s.parse::<HostnameRoute>())
            .collect::<Result<Vec<_>>>()?;

        let selection = DissectorSelection {
            program,
            digest: self.digest,
            hostnames,
            noop: self.noop,
            label: self.tubular.clone(),
            flow_timeout: self.flow_timeout,
            apps_max: self.apps_max,
            verbose: self.verbose,
        };

        Ok(ActivationPlan {
            name: self.name.clone(),
            address: self.address,
            count: self.count,
            socket_options: SocketOptions {
                dual_stack: self.also_ipv4,
                freebind: self.freebind,
                recv_buffer: self.rcvbuf,
            },
            dissector: selection.build()?,
            app_route: AppRoute::requested(self.app, self.apps_max),
            register: !self.no_register,
            promote: self.advance_working_gen,
        })
    }
}

/// Run the activation described by the command line. Only returns when no
/// command was given to exec, or on error.
pub fn handle_activate(cli: &Cli) -> Result<()> {
    let plan = cli.to_plan()?;
    let activator = Activator::new(SystemdNotify::from_env()?);

    let (group, report) = activator.run(&plan)?;
    info!(
        "FDNAME={} holds {} UDP sockets on {}",
        plan.name,
        group.len(),
        group.local_addr()
    );

    if let Some(format) = cli.report {
        println!("{}", report.render(format)?);
    }

    if cli.command.is_empty() {
        return Ok(());
    }
    Err(exec::exec_with(&cli.command, group.sockets()))
}
