//! Command-line interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Scans the container images running in a cluster and records the results in DefectDojo.
#[derive(Parser, Debug)]
#[command(name = "image-scan-controller", version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "SCAN_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Reconcile the cluster with DefectDojo and scan new images (default)
    Run {
        /// Run a single pass even when an interval is configured
        #[arg(long)]
        once: bool,
    },
    /// Delete every product type in DefectDojo
    Clean,
}

impl Cli {
    pub fn command(&self) -> Command {
        match &self.command {
            Some(Command::Run { once }) => Command::Run { once: *once },
            Some(Command::Clean) => Command::Clean,
            None => Command::Run { once: false },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::try_parse_from(["image-scan-controller"]).unwrap();
        assert_eq!(cli.command(), Command::Run { once: false });
    }

    #[test]
    fn test_parses_subcommands() {
        let cli = Cli::try_parse_from(["image-scan-controller", "--config", "/etc/scan.yaml", "run", "--once"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/scan.yaml"));
        assert_eq!(cli.command(), Command::Run { once: true });

        let cli = Cli::try_parse_from(["image-scan-controller", "clean"]).unwrap();
        assert_eq!(cli.command(), Command::Clean);
    }
}
