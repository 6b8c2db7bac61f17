//! Tracing setup for the runner and its control CLI.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Level after applying `-v` flags on top of the configured one.
pub fn effective_level(configured: &str, verbose: u8) -> &str {
    match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over both the config and `-v`. Events always go to stderr
/// (JSON when `json` is set); when a log file is configured they are also
/// appended there as plain text.
pub fn init_logging(config: &LoggingConfig, verbose: u8, json: bool) -> io::Result<()> {
    let level = effective_level(&config.level, verbose);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "gridops_runner={level},gridops_protocol={level},gridopsctl={level}"
        ))
    });

    let json = json || config.json;
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none())
    });
    let json_layer = json.then(|| fmt::layer().json().with_writer(io::stderr));

    let file_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .ok();

    Ok(())
}
