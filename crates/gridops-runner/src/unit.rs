//! systemd unit generation for remote-storage mounts.
//!
//! Unit content is built entirely on this side from a validated
//! [`RemoteName`] and configured paths. The client never supplies
//! executable paths or unit text.

use std::path::{Path, PathBuf};

use crate::config::RunnerConfig;
use crate::validate::RemoteName;

/// Prefix of every mount unit file name.
pub const MOUNT_UNIT_PREFIX: &str = "gridops-mount-";

/// Paths and programs a mount unit refers to.
#[derive(Debug, Clone)]
pub struct MountLayout {
    /// Directory holding `rclone.conf`.
    pub config_dir: PathBuf,
    /// Parent of every mount point.
    pub mount_root: PathBuf,
    /// Directory for per-remote rclone logs.
    pub log_dir: PathBuf,
    pub rclone: String,
    pub fusermount: String,
}

impl MountLayout {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            config_dir: config.paths.rclone_config_dir.clone(),
            mount_root: config.paths.rclone_mount_dir.clone(),
            log_dir: config.paths.log_dir.clone(),
            rclone: config.binaries.rclone.clone(),
            fusermount: config.binaries.fusermount.clone(),
        }
    }
}

/// A rendered mount unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountUnit {
    /// File name, e.g. `gridops-mount-gdrive.service`.
    pub name: String,
    pub content: String,
    pub mount_point: PathBuf,
}

impl MountUnit {
    /// Where the unit file goes inside `unit_dir`.
    pub fn path_in(&self, unit_dir: &Path) -> PathBuf {
        unit_dir.join(&self.name)
    }
}

pub fn unit_name(remote: &RemoteName) -> String {
    format!("{MOUNT_UNIT_PREFIX}{remote}.service")
}

/// Render the mount unit for `remote`.
///
/// Deterministic in its inputs: the same remote always yields the same file
/// name and content, so mounting twice overwrites instead of duplicating.
pub fn generate_mount_unit(remote: &RemoteName, layout: &MountLayout) -> MountUnit {
    let mount_point = layout.mount_root.join(remote.as_str());
    let config_file = layout.config_dir.join(crate::config::RCLONE_CONFIG_FILE);
    let log_file = layout.log_dir.join(format!("rclone-{remote}.log"));

    let mount = mount_point.display();
    let content = format!(
        r#"[Unit]
Description=RClone Mount for {remote}
After=network-online.target
Wants=network-online.target

[Service]
Type=notify
ExecStart={rclone} mount {remote}: {mount} \
   --config {config} \
   --allow-other \
   --vfs-cache-mode writes \
   --dir-cache-time 5m \
   --log-level INFO \
   --log-file {log}
ExecStop={fusermount} -u {mount}
Restart=always
RestartSec=10

[Install]
WantedBy=multi-user.target
"#,
        rclone = layout.rclone,
        config = config_file.display(),
        log = log_file.display(),
        fusermount = layout.fusermount,
    );

    MountUnit {
        name: unit_name(remote),
        content,
        mount_point,
    }
}
