//! Mneme CLI - argument parsing and targets file handling for the `mneme`
//! binary.

pub mod config;
pub mod targets;

pub use config::{Command, Config, LedgerCommand, version_info};
pub use targets::{parse_targets, read_targets};
