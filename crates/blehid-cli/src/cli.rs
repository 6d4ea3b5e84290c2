//! Command line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "blehid")]
#[command(about = "Expose local keyboard input as a Bluetooth LE HID peripheral")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file merged over blehid.toml and the user config
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Advertise the HID service and type stdin lines on connected hosts
    Run {
        /// Use the in-process simulated GATT provider
        #[arg(long)]
        simulate: bool,

        /// Bluetooth adapter to use (e.g. hci1)
        #[arg(short, long)]
        adapter: Option<String>,

        /// Advertised device name
        #[arg(short, long)]
        name: Option<String>,

        /// Advertisement strategy (power_saver, performance, balanced, adaptive)
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Probe the adapter, build the HID service once and print a health report
    Status {
        /// Use the in-process simulated GATT provider
        #[arg(long)]
        simulate: bool,

        /// Bluetooth adapter to use (e.g. hci1)
        #[arg(short, long)]
        adapter: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Write the configuration to this file instead of stdout
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "blehid", "-v", "run", "--simulate", "--name", "Desk Keyboard", "--strategy", "balanced",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                simulate,
                adapter,
                name,
                strategy,
            } => {
                assert!(simulate);
                assert!(adapter.is_none());
                assert_eq!(name.as_deref(), Some("Desk Keyboard"));
                assert_eq!(strategy.as_deref(), Some("balanced"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli = Cli::parse_from(["blehid", "status", "--config", "bridge.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("bridge.toml")));
        assert!(matches!(cli.command, Commands::Status { simulate: false, .. }));
    }
}
