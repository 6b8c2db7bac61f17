use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info};

use gridops_runner::config::RunnerConfig;
use gridops_runner::logging::init_logging;
use gridops_runner::{ProcessExecutor, ServeExit, Server};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let config = RunnerConfig::load(cli.common.config.as_deref()).context("loading config")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            init_logging(&config.logging, cli.common.verbose, cli.common.json)
                .context("initializing logging")?;
            debug!("resolved config: {config:#?}");
            async_serve(config)
        }
        Command::Config { command } => handle_config(&config, command, cli.common.json),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "GridOps ops runner - privileged host operations over a local socket.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    /// Defaults to `serve`
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true, env = "GRIDOPS_RUNNER_CONFIG")]
    config: Option<PathBuf>,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Listen on the ops socket and execute commands
    Serve,
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the built-in defaults as TOML
    Default,
}

fn handle_config(config: &RunnerConfig, command: ConfigCommand, json: bool) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(config).context("serializing config to JSON")?
                );
            } else {
                print!("{}", config.to_toml().context("serializing config to TOML")?);
            }
        }
        ConfigCommand::Default => {
            print!(
                "{}",
                RunnerConfig::default()
                    .to_toml()
                    .context("serializing default config")?
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn async_serve(config: RunnerConfig) -> Result<()> {
    let config = Arc::new(config);
    let executor = Arc::new(ProcessExecutor::new(config.limits.command_timeout()));

    let server = Server::bind(config.clone(), executor).context("starting ops runner")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %server.socket_path().display(),
        "Ops runner started"
    );

    match server.run(shutdown_signal()).await {
        ServeExit::Shutdown => info!("Ops runner stopped"),
        ServeExit::Restart => info!("Ops runner exiting after self-update"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
