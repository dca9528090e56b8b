pub mod commands;

use crate::report::ReportFormat;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "udpgrm-activate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Create unconnected UDP sockets and put them in systemd file descriptor store",
    long_about = None
)]
pub struct Cli {
    #[arg(short = '4', long, help = "Clear IPV6_V6ONLY flag. Allow IPv4 traffic on IPv6 socket.")]
    pub also_ipv4: bool,

    #[arg(short, long, default_value_t = 1, help = "REUSEPORT group size - how many sockets to create")]
    pub count: usize,

    #[arg(long, help = "Set IP_FREEBIND / IPV6_FREEBIND")]
    pub freebind: bool,

    #[arg(long, default_value_t = crate::socket::DEFAULT_RECV_BUFFER, help = "Set SO_RCVBUF, 0 keeps the system default")]
    pub rcvbuf: usize,

    #[arg(help = "Systemd file descriptor name / FDNAME")]
    pub name: String,

    #[arg(help = "Address and port to bind to (like: 127.0.0.1:443 or [::1]:443)")]
    pub address: SocketAddr,

    #[arg(short, long, help = "Verbose logging, also sets the dissector verbose flag")]
    pub verbose: bool,

    #[arg(long, help = "Skip socket registration. Sockets are registered as working gen + 1 by default.")]
    pub no_register: bool,

    #[arg(long, help = "Advance working generation after registration. Usually done by the application.")]
    pub advance_working_gen: bool,

    #[arg(short = 'b', long = "bpf", value_name = "CBPFFILE", help = "Load cBPF from file, in 'bpf_asm -c' format")]
    pub bpf: Option<PathBuf>,

    #[arg(short, long, value_name = "APPNO", help = "Application number")]
    pub app: Option<u32>,

    #[arg(short = 'm', long, default_value_t = 0, help = "Max application count")]
    pub apps_max: u32,

    #[arg(short, long, default_value = "", help = "Tubular label")]
    pub tubular: String,

    #[arg(short, long, default_value_t = crate::grm::dissector::DEFAULT_FLOW_TIMEOUT, help = "Flow timeout for the FLOW dissector")]
    pub flow_timeout: u32,

    #[arg(short = 's', long = "sni", value_name = "HOSTNAME:APP", help = "QUIC hostname to app mapping, repeatable")]
    pub sni: Vec<String>,

    #[arg(short, long, default_value = "0", value_parser = parse_auto_radix, help = "Select digest")]
    pub digest: u32,

    #[arg(short, long, help = "Use built-in NOOP dissector")]
    pub noop: bool,

    #[arg(long, value_enum, help = "Print an activation report on stdout")]
    pub report: Option<ReportFormat>,

    #[arg(last = true, value_name = "CMD", help = "Command to exec with the sockets inherited")]
    pub command: Vec<String>,
}

fn parse_auto_radix(s: &str) -> Result<u32, String> {
    crate::cbpf::parse_int(s)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| format!("invalid number: {}", s))
}
