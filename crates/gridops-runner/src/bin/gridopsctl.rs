use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use gridops_protocol::{ControlAction, Response};
use gridops_runner::OpsClient;
use gridops_runner::config::{LoggingConfig, RunnerConfig};
use gridops_runner::logging::init_logging;
use gridops_runner::proxy::{AppRoute, DEFAULT_DASHBOARD_UPSTREAM, ProxySite, compile};

fn main() {
    match try_main() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            let _ = writeln!(io::stderr(), "{err:?}");
            std::process::exit(2);
        }
    }
}

/// Returns whether the runner reported success.
fn try_main() -> Result<bool> {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: "warn".to_string(),
        file: None,
        json: false,
    };
    init_logging(&logging, cli.common.verbose, false).context("initializing logging")?;

    let mut config = RunnerConfig::load(cli.common.config.as_deref()).context("loading config")?;
    if let Some(path) = cli.common.socket {
        config.socket.path = path;
    }
    debug!(socket = %config.socket.path.display(), "Using runner socket");
    let client = OpsClient::from_config(&config);

    let response = match cli.command {
        Command::Install { slug, compose, env } => {
            let compose = read_text(&compose)?;
            let env = match env {
                Some(path) => read_env_file(&path)?,
                None => String::new(),
            };
            client.install_app(&slug, &compose, &env)?
        }
        Command::Start { slug } => client.control_app(&slug, ControlAction::Start)?,
        Command::Stop { slug } => client.control_app(&slug, ControlAction::Stop)?,
        Command::Restart { slug } => client.control_app(&slug, ControlAction::Restart)?,
        Command::Pull { slug } => client.control_app(&slug, ControlAction::Pull)?,
        Command::Backup { slug } => client.backup_app(&slug)?,
        Command::ReloadProxy { file } => client.reload_proxy(&read_text(&file)?)?,
        Command::SelfUpdate => client.self_update()?,
        Command::RcloneConfig { file } => client.save_rclone_config(&read_text(&file)?)?,
        Command::Mount { remote } => client.mount_rclone(&remote)?,
        Command::RenderProxy(args) => {
            let caddyfile = render_proxy(&args)?;
            if !args.apply {
                print!("{caddyfile}");
                return Ok(true);
            }
            client.reload_proxy(&caddyfile)?
        }
    };

    print_response(&response, cli.common.json)?;
    Ok(response.is_success())
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Send commands to the GridOps ops runner.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Runner socket; defaults to the path in the runner config
    #[arg(long, value_name = "PATH", global = true, env = "GRIDOPS_RUNNER_SOCKET")]
    socket: Option<PathBuf>,
    /// Runner config used to find the socket
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Print the raw JSON response
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write an app's compose file (and .env) and bring it up
    Install {
        slug: String,
        /// Compose file to install
        #[arg(long, value_name = "FILE")]
        compose: PathBuf,
        /// Environment file to install alongside
        #[arg(long, value_name = "FILE")]
        env: Option<PathBuf>,
    },
    Start {
        slug: String,
    },
    Stop {
        slug: String,
    },
    Restart {
        slug: String,
    },
    /// Pull the app's images
    Pull {
        slug: String,
    },
    /// Archive the app directory
    Backup {
        slug: String,
    },
    /// Install a Caddyfile and reload the proxy
    ReloadProxy {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
    /// Back up, pull the latest release and restart
    SelfUpdate,
    /// Save the rclone configuration
    RcloneConfig {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
    /// Mount a configured rclone remote
    Mount {
        remote: String,
    },
    /// Compile a Caddyfile from app routes
    RenderProxy(RenderProxyArgs),
}

#[derive(Debug, Args)]
struct RenderProxyArgs {
    /// Base domain serving the dashboard
    #[arg(long)]
    domain: String,
    /// ACME account email
    #[arg(long)]
    email: String,
    /// Dashboard upstream host:port
    #[arg(long, default_value = DEFAULT_DASHBOARD_UPSTREAM)]
    dashboard_upstream: String,
    /// JSON array of app routes
    #[arg(long, value_name = "FILE")]
    routes: PathBuf,
    /// Send the result to the runner instead of printing it
    #[arg(long)]
    apply: bool,
}

fn render_proxy(args: &RenderProxyArgs) -> Result<String> {
    let routes: Vec<AppRoute> = serde_json::from_str(&read_text(&args.routes)?)
        .with_context(|| format!("parsing routes from {}", args.routes.display()))?;
    let site = ProxySite {
        dashboard_upstream: args.dashboard_upstream.clone(),
        ..ProxySite::new(&args.domain, &args.email)
    };
    compile(&site, &routes).context("compiling Caddyfile")
}

fn read_text(path: &Path) -> Result<String> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if text.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(text)
}

/// An empty env file is valid and installs no `.env`.
fn read_env_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn print_response(response: &Response, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(response).context("serializing response")?
        );
        return Ok(());
    }

    let mut stdout = io::stdout().lock();
    if let Some(out) = response.stdout.as_deref().filter(|s| !s.is_empty()) {
        write!(stdout, "{out}")?;
    }
    let mut stderr = io::stderr().lock();
    if let Some(err) = response.stderr.as_deref().filter(|s| !s.is_empty()) {
        write!(stderr, "{err}")?;
    }
    match (&response.message, response.is_success()) {
        (Some(message), true) => writeln!(stdout, "{message}")?,
        (Some(message), false) => writeln!(stderr, "error: {message}")?,
        (None, true) => {}
        (None, false) => writeln!(stderr, "error")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_env_file_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.env");
        fs::write(&path, "").unwrap();

        assert_eq!(read_env_file(&path).unwrap(), "");
        assert!(read_text(&path).is_err());
    }

    #[test]
    fn env_file_is_read_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.env");
        fs::write(&path, "A=1\nB=2").unwrap();
        assert_eq!(read_env_file(&path).unwrap(), "A=1\nB=2");
    }

    #[test]
    fn missing_env_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_env_file(&dir.path().join("absent.env")).is_err());
    }
}
