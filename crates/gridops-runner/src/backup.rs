//! Local archives of application directories and of the installation tree.
//!
//! Archives stay on this host. Nothing here synchronizes to remote storage,
//! even when a remote is configured.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::RunnerConfig;
use crate::dispatch::is_dir;
use crate::error::{RunnerError, RunnerResult};
use crate::executor::{ExecutionResult, Executor, Invocation};
use crate::validate::AppSlug;

/// Archive written before a self-update.
pub const SYSTEM_BACKUP_NAME: &str = "system_pre_update.tar.gz";

/// Deterministic archive path for an application.
pub fn app_backup_path(backup_dir: &Path, slug: &AppSlug) -> PathBuf {
    backup_dir.join(format!("{slug}_backup.tar.gz"))
}

/// `tar -czf {archive} -C {parent} {entry}`, with optional excludes.
fn tar_invocation(
    tar: &str,
    archive: &Path,
    parent: &Path,
    entry: &str,
    excludes: &[PathBuf],
) -> Invocation {
    let mut argv = vec![
        tar.to_string(),
        "-czf".to_string(),
        archive.display().to_string(),
    ];
    argv.extend(
        excludes
            .iter()
            .map(|e| format!("--exclude={}", e.display())),
    );
    argv.extend([
        "-C".to_string(),
        parent.display().to_string(),
        entry.to_string(),
    ]);
    Invocation::new(argv)
}

/// Archive `{apps_dir}/{slug}` into `{backup_dir}/{slug}_backup.tar.gz`.
pub async fn backup_app(
    config: &RunnerConfig,
    executor: &dyn Executor,
    slug: &AppSlug,
) -> RunnerResult<(PathBuf, ExecutionResult)> {
    let paths = &config.paths;
    let app_dir = paths.app_dir(slug);
    if !is_dir(&app_dir).await {
        return Err(RunnerError::AppNotFound(slug.to_string()));
    }

    tokio::fs::create_dir_all(&paths.backup_dir)
        .await
        .map_err(|e| RunnerError::io("creating", &paths.backup_dir, e))?;

    let archive = app_backup_path(&paths.backup_dir, slug);
    info!(app = %slug, archive = %archive.display(), "Backing up app");
    let invocation = tar_invocation(
        &config.binaries.tar,
        &archive,
        &paths.apps_dir,
        slug.as_str(),
        &[],
    );
    Ok((archive, executor.run(&invocation).await))
}

/// Invocation archiving the whole installation tree before an update.
///
/// The backup directory is excluded when it lives inside the tree, so the
/// archive never tries to contain itself.
pub fn system_backup_invocation(config: &RunnerConfig) -> Invocation {
    let paths = &config.paths;
    let archive = paths.backup_dir.join(SYSTEM_BACKUP_NAME);

    let (parent, entry) = match (paths.install_dir.parent(), paths.install_dir.file_name()) {
        (Some(parent), Some(name)) => (parent.to_path_buf(), name.to_string_lossy().into_owned()),
        _ => (paths.install_dir.clone(), ".".to_string()),
    };

    let excludes: Vec<PathBuf> = paths
        .backup_dir
        .strip_prefix(&paths.install_dir)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .map(|rel| Path::new(&entry).join(rel))
        .into_iter()
        .collect();

    tar_invocation(&config.binaries.tar, &archive, &parent, &entry, &excludes)
}
