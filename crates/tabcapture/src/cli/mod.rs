//! Command-line interface for tabcapture.
//!
//! This module provides the CLI structure for the `tabcap` binary, which
//! inspects and exports what a capture session persisted.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, ExportCommand, PurgeCommand, StatusCommand};

use crate::logging::Verbosity;

/// tabcap - Inspect and export redacted tab captures
///
/// Reads the event store written by a capture session: export events and
/// summary statistics, show status, or purge everything.
#[derive(Debug, Parser)]
#[command(name = "tabcap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Export captured events and summary statistics
    Export(ExportCommand),

    /// Delete all captured events and run metadata
    Purge(PurgeCommand),

    /// Show store and run status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "tabcap");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(parse(&["tabcap", "-q", "status"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["tabcap", "status"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["tabcap", "-v", "status"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["tabcap", "-vv", "status"]).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_export_default_dir() {
        let cli = parse(&["tabcap", "export"]);
        match cli.command {
            Command::Export(cmd) => assert_eq!(cmd.out, PathBuf::from(".")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_export_out() {
        let cli = parse(&["tabcap", "export", "--out", "/tmp/run"]);
        match cli.command {
            Command::Export(cmd) => assert_eq!(cmd.out, PathBuf::from("/tmp/run")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_purge_yes() {
        let cli = parse(&["tabcap", "purge", "-y"]);
        assert!(matches!(cli.command, Command::Purge(PurgeCommand { yes: true })));
    }

    #[test]
    fn test_parse_status_json() {
        let cli = parse(&["tabcap", "status", "--json"]);
        assert!(matches!(cli.command, Command::Status(StatusCommand { json: true })));
    }

    #[test]
    fn test_parse_config_validate() {
        let cli = parse(&["tabcap", "config", "validate", "--file", "/etc/tabcapture.toml"]);
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }

    #[test]
    fn test_parse_with_config() {
        let cli = parse(&["tabcap", "-c", "/custom/config.toml", "status"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["tabcap", "daemon"]).is_err());
    }
}
