use crate::grm::Registration;
use crate::{ActivateError, Result};
use serde::Serialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Json,
    Yaml,
}

/// What one activation run produced
#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub name: String,
    pub address: SocketAddr,
    pub sockets: usize,
    pub descriptors: Vec<i32>,
    pub dissector: Option<&'static str>,
    pub registration: Option<Registration>,
}

impl ActivationReport {
    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ActivateError::ConfigError(format!("JSON report: {}", e))),
            ReportFormat::Yaml => serde_yaml::to_string(self)
                .map_err(|e| ActivateError::ConfigError(format!("YAML report: {}", e))),
        }
    }
}
