pub mod activate;
pub mod cbpf;
pub mod cli;
pub mod error;
pub mod exec;
pub mod fdstore;
pub mod grm;
pub mod report;
pub mod socket;

pub use error::{ActivateError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
