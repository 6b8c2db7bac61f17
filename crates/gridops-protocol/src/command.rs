//! Request types.
//!
//! [`Command`] is the closed set of operations the runner understands. On the
//! wire each lifecycle action has its own command name (`start_app`,
//! `stop_app`, ...); in memory they collapse into [`Command::ControlApp`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Every command name accepted on the wire.
pub const COMMAND_NAMES: &[&str] = &[
    "install_app",
    "start_app",
    "stop_app",
    "restart_app",
    "pull_app",
    "backup_app",
    "reload_proxy",
    "self_update",
    "config_rclone",
    "mount_rclone",
];

/// Lifecycle action applied to an installed application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
    Pull,
}

impl ControlAction {
    pub const ALL: [ControlAction; 4] = [Self::Start, Self::Stop, Self::Restart, Self::Pull];

    /// The `docker compose` subcommand for this action.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Pull => "pull",
        }
    }

    /// Wire command name, e.g. `restart_app`.
    pub fn command_name(self) -> &'static str {
        match self {
            Self::Start => "start_app",
            Self::Stop => "stop_app",
            Self::Restart => "restart_app",
            Self::Pull => "pull_app",
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("unknown action '{s}' (expected start, stop, restart or pull)"))
    }
}

/// A request to the privileged runner.
///
/// Identifiers are carried as raw strings; the runner validates them before
/// any path is built from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireCommand", into = "WireCommand")]
pub enum Command {
    /// Write the compose descriptor (and optional env file) and bring the stack up.
    InstallApp {
        app_slug: String,
        compose_content: String,
        env_content: String,
    },
    /// Run a lifecycle action against an installed application.
    ControlApp {
        app_slug: String,
        action: ControlAction,
    },
    /// Archive the application's directory locally.
    BackupApp { app_slug: String },
    /// Replace the proxy configuration and reload the proxy.
    ReloadProxy { caddyfile: String },
    /// Back up the installation, pull the latest release and restart.
    SelfUpdate,
    /// Store remote-storage configuration.
    ConfigureRemoteStorage { config_content: String },
    /// Install and start a mount unit for a configured remote.
    MountRemoteStorage { remote: String },
}

impl Command {
    /// Wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InstallApp { .. } => "install_app",
            Self::ControlApp { action, .. } => action.command_name(),
            Self::BackupApp { .. } => "backup_app",
            Self::ReloadProxy { .. } => "reload_proxy",
            Self::SelfUpdate => "self_update",
            Self::ConfigureRemoteStorage { .. } => "config_rclone",
            Self::MountRemoteStorage { .. } => "mount_rclone",
        }
    }

    /// Serialize to the JSON body sent over the socket.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Flat wire representation; one variant per command name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum WireCommand {
    InstallApp {
        app_slug: String,
        compose_content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        env_content: Option<String>,
    },
    StartApp {
        app_slug: String,
    },
    StopApp {
        app_slug: String,
    },
    RestartApp {
        app_slug: String,
    },
    PullApp {
        app_slug: String,
    },
    BackupApp {
        app_slug: String,
    },
    ReloadProxy {
        caddyfile: String,
    },
    SelfUpdate,
    ConfigRclone {
        config_content: String,
    },
    MountRclone {
        remote: String,
    },
}

impl From<WireCommand> for Command {
    fn from(wire: WireCommand) -> Self {
        let control = |app_slug, action| Command::ControlApp { app_slug, action };
        match wire {
            WireCommand::InstallApp {
                app_slug,
                compose_content,
                env_content,
            } => Command::InstallApp {
                app_slug,
                compose_content,
                env_content: env_content.unwrap_or_default(),
            },
            WireCommand::StartApp { app_slug } => control(app_slug, ControlAction::Start),
            WireCommand::StopApp { app_slug } => control(app_slug, ControlAction::Stop),
            WireCommand::RestartApp { app_slug } => control(app_slug, ControlAction::Restart),
            WireCommand::PullApp { app_slug } => control(app_slug, ControlAction::Pull),
            WireCommand::BackupApp { app_slug } => Command::BackupApp { app_slug },
            WireCommand::ReloadProxy { caddyfile } => Command::ReloadProxy { caddyfile },
            WireCommand::SelfUpdate => Command::SelfUpdate,
            WireCommand::ConfigRclone { config_content } => {
                Command::ConfigureRemoteStorage { config_content }
            }
            WireCommand::MountRclone { remote } => Command::MountRemoteStorage { remote },
        }
    }
}

impl From<Command> for WireCommand {
    fn from(command: Command) -> Self {
        match command {
            Command::InstallApp {
                app_slug,
                compose_content,
                env_content,
            } => WireCommand::InstallApp {
                app_slug,
                compose_content,
                env_content: Some(env_content),
            },
            Command::ControlApp { app_slug, action } => match action {
                ControlAction::Start => WireCommand::StartApp { app_slug },
                ControlAction::Stop => WireCommand::StopApp { app_slug },
                ControlAction::Restart => WireCommand::RestartApp { app_slug },
                ControlAction::Pull => WireCommand::PullApp { app_slug },
            },
            Command::BackupApp { app_slug } => WireCommand::BackupApp { app_slug },
            Command::ReloadProxy { caddyfile } => WireCommand::ReloadProxy { caddyfile },
            Command::SelfUpdate => WireCommand::SelfUpdate,
            Command::ConfigureRemoteStorage { config_content } => {
                WireCommand::ConfigRclone { config_content }
            }
            Command::MountRemoteStorage { remote } => WireCommand::MountRclone { remote },
        }
    }
}

/// Why a request body could not be turned into a [`Command`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("request must be a JSON object")]
    NotAnObject,

    #[error("missing 'command'")]
    MissingCommand,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid {command} request: {reason}")]
    InvalidFields { command: String, reason: String },
}

/// Parse a complete request body.
///
/// Unknown command names are rejected here, before any handler runs.
pub fn parse_request(body: &[u8]) -> Result<Command, ProtocolError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| ProtocolError::InvalidJson)?;
    let Some(object) = value.as_object() else {
        return Err(ProtocolError::NotAnObject);
    };

    let name = match object.get("command") {
        Some(Value::String(name)) => name.clone(),
        Some(other) => return Err(ProtocolError::UnknownCommand(other.to_string())),
        None => return Err(ProtocolError::MissingCommand),
    };
    if !COMMAND_NAMES.contains(&name.as_str()) {
        return Err(ProtocolError::UnknownCommand(name));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidFields {
        command: name,
        reason: e.to_string(),
    })
}
