//! Runner configuration.
//!
//! Built once at startup from defaults, an optional TOML file and
//! `GRIDOPS_RUNNER__*` environment variables, then passed by reference to
//! every component. Nothing else reads paths from ambient state.
//!
//! ```toml
//! [socket]
//! path = "/srv/gridops/ops/runner.sock"
//! group = "gridops"
//!
//! [paths]
//! apps_dir = "/srv/gridops/apps"
//! caddyfile = "/etc/caddy/Caddyfile"
//!
//! [limits]
//! command_timeout_secs = 900
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::validate::AppSlug;

/// Config file read when `--config` is not given. Missing is not an error.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/gridops/runner.toml";

/// Environment prefix; `GRIDOPS_RUNNER__SOCKET__PATH` sets `socket.path`.
pub const ENV_PREFIX: &str = "GRIDOPS_RUNNER";

/// Name of the remote-storage credentials file inside `rclone_config_dir`.
pub const RCLONE_CONFIG_FILE: &str = "rclone.conf";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub socket: SocketConfig,
    pub paths: PathsConfig,
    pub binaries: BinariesConfig,
    pub limits: LimitsConfig,
    pub self_update: SelfUpdateConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Unix socket the control plane connects to.
    pub path: PathBuf,
    /// Group given ownership of the socket. Members of this group can issue
    /// privileged commands; nothing else authenticates a request.
    pub group: Option<String>,
    /// Permission bits applied after bind.
    pub mode: u32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/srv/gridops/ops/runner.sock"),
            group: Some("gridops".to_string()),
            mode: 0o660,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// One subdirectory per application slug.
    pub apps_dir: PathBuf,
    /// Reverse-proxy configuration file.
    pub caddyfile: PathBuf,
    pub rclone_config_dir: PathBuf,
    pub rclone_mount_dir: PathBuf,
    /// Where mount units are written.
    pub unit_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// Git checkout of the platform itself (self-update target).
    pub install_dir: PathBuf,
    /// Directory for per-mount log files.
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            apps_dir: PathBuf::from("/srv/gridops/apps"),
            caddyfile: PathBuf::from("/etc/caddy/Caddyfile"),
            rclone_config_dir: PathBuf::from("/srv/gridops/rclone"),
            rclone_mount_dir: PathBuf::from("/srv/gridops/rclone_mounts"),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            backup_dir: PathBuf::from("/srv/gridops/backups"),
            install_dir: PathBuf::from("/srv/gridops"),
            log_dir: PathBuf::from("/var/log/gridops"),
        }
    }
}

impl PathsConfig {
    pub fn app_dir(&self, slug: &AppSlug) -> PathBuf {
        self.apps_dir.join(slug.as_str())
    }

    pub fn rclone_config_file(&self) -> PathBuf {
        self.rclone_config_dir.join(RCLONE_CONFIG_FILE)
    }
}

/// Programs invoked by the runner. Mount units need absolute paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinariesConfig {
    pub docker: String,
    pub caddy: String,
    pub systemctl: String,
    pub git: String,
    pub tar: String,
    pub rclone: String,
    pub fusermount: String,
}

impl Default for BinariesConfig {
    fn default() -> Self {
        Self {
            docker: "docker".to_string(),
            caddy: "caddy".to_string(),
            systemctl: "systemctl".to_string(),
            git: "git".to_string(),
            tar: "tar".to_string(),
            rclone: "/usr/bin/rclone".to_string(),
            fusermount: "/bin/fusermount".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Upper bound on a single child process; it is killed afterwards.
    pub command_timeout_secs: u64,
    /// Upper bound on reading one request from a connection.
    pub request_timeout_secs: u64,
    pub max_request_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 900,
            request_timeout_secs: 30,
            max_request_bytes: 16 * 1024 * 1024,
        }
    }
}

impl LimitsConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfUpdateConfig {
    /// Units restarted after a successful update, before the runner exits.
    /// The runner's own unit is restarted by its supervisor, not listed here.
    pub restart_units: Vec<String>,
    /// Pause after the response is flushed before restarting anything.
    pub restart_delay_secs: u64,
}

impl Default for SelfUpdateConfig {
    fn default() -> Self {
        Self {
            restart_units: vec!["gridops-web.service".to_string()],
            restart_delay_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Append-only log file, in addition to stderr.
    pub file: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some(PathBuf::from("/var/log/gridops/runner.log")),
            json: false,
        }
    }
}

impl RunnerConfig {
    /// Load configuration.
    ///
    /// With `path = None` the default location is read if present. An
    /// explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        Config::builder()
            .add_source(Config::try_from(&RunnerConfig::default())?)
            .add_source(
                File::from(file.as_path())
                    .format(FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
