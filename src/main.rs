// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sessionguard::config::{default_config_path, global_flags, load_config, GuardConfig};
use sessionguard::server::Server;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// sessionguard - session hijack detection and identifier rotation.
#[derive(Parser)]
#[command(name = "sessionguard")]
#[command(version = VERSION)]
#[command(about = "Session integrity guard: fingerprinting, rotation and grace windows.")]
#[command(long_about = "sessionguard - Session integrity guard\n\n\
    Start the demo server:   sessionguard serve\n\
    Show configuration:      sessionguard config show\n\n\
    Sessions are bound to the client's user agent and masked address.\n\
    Identifiers rotate on 5% of requests with a 10 second grace window.")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file (defaults to ~/.sessionguard/config.json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Quiet mode: warnings and errors only
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode: include debug-level session events
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session demo server
    ///
    /// Examples:
    ///   sessionguard serve
    ///   sessionguard serve --port 9000 --no-address-check
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind to
        #[arg(short, long)]
        bind: Option<String>,
        /// Disable expiry checks and identifier rotation
        #[arg(long)]
        no_rotation: bool,
        /// Leave the client address out of the fingerprint
        #[arg(long)]
        no_address_check: bool,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration (file + environment overrides)
    Show,
    /// Print the configuration file location
    Path,
}

fn init_logging(quiet: bool, verbose: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "sessionguard=debug,tower_http=debug"
    } else {
        "sessionguard=info,tower_http=info"
    };
    // RUST_LOG overrides the flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
    {
        eprintln!("[!] Failed to initialize logging: {}", e);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port, bind, no_rotation, no_address_check } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            if no_rotation {
                config.rotation_enabled = false;
            }
            if no_address_check {
                config.address_check_enabled = false;
            }

            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(serve(config))
        }
        Commands::Config { command } => handle_config(command, &config, cli.config),
    }
}

async fn serve(config: GuardConfig) -> Result<()> {
    let flags = global_flags();
    flags.set_rotation_enabled(config.rotation_enabled);
    flags.set_address_check_enabled(config.address_check_enabled);

    let server = Server::new(config).with_flags(flags);
    server.start().await
}

fn handle_config(command: ConfigCommands, config: &GuardConfig, path: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let rendered = serde_json::to_string_pretty(config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        ConfigCommands::Path => {
            let path = match path {
                Some(path) => path,
                None => default_config_path()?,
            };
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_flags() {
        let cli = Cli::parse_from(["sessionguard", "serve", "--port", "9000", "--no-rotation"]);
        match cli.command {
            Commands::Serve { port, no_rotation, no_address_check, .. } => {
                assert_eq!(port, Some(9000));
                assert!(no_rotation);
                assert!(!no_address_check);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_quiet_and_verbose_conflict() {
        assert!(Cli::try_parse_from(["sessionguard", "-q", "-v", "config", "show"]).is_err());
    }
}
