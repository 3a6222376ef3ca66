//! # Tether Host Binary
//!
//! Smoke-drives a live target's driver ports: connects a mirror registry,
//! optionally starts the callback server, and runs a shell command on the
//! target's default terminal.
//!
//! # Usage
//!
//! ```bash
//! # Run a command against a forwarded target
//! tether_host --command-port 5010 exec "id"
//!
//! # With a config file and callback server
//! tether_host --config target.toml exec "ls /system/lib64/hw"
//!
//! # Verbose logging
//! tether_host --command-port 5010 -v exec "id"
//! ```

#![deny(warnings)]

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tether_common::config::TargetConfig;
use tether_host::MirrorRegistry;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// Tether Host - drive driver processes on a remote target
#[derive(Parser, Debug)]
#[command(name = "tether_host")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Drive HAL, library, and shell driver processes on a remote target")]
#[command(long_about = None)]
struct Args {
    /// Path to a target configuration file (TOML). Flags below override it.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Target host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Command port on the target
    #[arg(long)]
    command_port: Option<u16>,

    /// Callback port announced to drivers
    #[arg(long)]
    callback_port: Option<u16>,

    /// Start the callback server before issuing commands
    #[arg(long)]
    with_callback_server: bool,

    /// Shell connection timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a command on the target's default shell terminal
    Exec {
        /// The shell command to run
        command: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("tether_host failed: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(&args);

    let config = resolve_config(&args)?;
    info!(
        "connecting to {}:{} (callback port: {:?})",
        config.host, config.command_port, config.callback_port
    );

    let mut registry = MirrorRegistry::from_config(&config)?;
    if let Some(secs) = config.conn_timeout_secs {
        registry.set_conn_timeout(Duration::from_secs(secs))?;
    }

    match args.command {
        Command::Exec { command } => {
            let results = registry.execute(&command, false)?;
            for ((stdout, stderr), exit_code) in results
                .stdouts
                .iter()
                .zip(results.stderrs.iter())
                .zip(results.exit_codes.iter())
            {
                if !stdout.is_empty() {
                    print!("{stdout}");
                }
                if !stderr.is_empty() {
                    eprint!("{stderr}");
                }
                info!("exit code: {exit_code}");
            }
            registry.clean_up();
            if !results.succeeded() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Merge a config file (if given) with command-line overrides.
fn resolve_config(args: &Args) -> Result<TargetConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => TargetConfig::load(path)?,
        None => TargetConfig {
            host: args.host.clone(),
            command_port: args
                .command_port
                .ok_or("either --config or --command-port is required")?,
            callback_port: args.callback_port,
            start_callback_server: args.with_callback_server,
            conn_timeout_secs: args.timeout,
            log_level: Default::default(),
        },
    };
    if let Some(port) = args.command_port {
        config.command_port = port;
    }
    if let Some(port) = args.callback_port {
        config.callback_port = Some(port);
    }
    if args.with_callback_server {
        config.start_callback_server = true;
    }
    if let Some(secs) = args.timeout {
        config.conn_timeout_secs = Some(secs);
    }
    config.validate()?;
    Ok(config)
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
