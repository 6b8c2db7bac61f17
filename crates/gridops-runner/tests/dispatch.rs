//! Command handling against a temp tree and a recording executor.

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use common::{RecordingExecutor, TestEnv};
use gridops_protocol::{Command, ControlAction, Status};

fn mode(path: &Path) -> u32 {
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}

fn install(slug: &str, compose: &str, env: &str) -> Command {
    Command::InstallApp {
        app_slug: slug.to_string(),
        compose_content: compose.to_string(),
        env_content: env.to_string(),
    }
}

#[tokio::test]
async fn install_writes_compose_verbatim_and_brings_app_up() {
    let env = TestEnv::new();
    let compose = "services:\n  web:\n    image: \"nginx:1.27\"\n    ports: ['8080:80']\n";

    let reply = env.dispatcher().handle(install("wiki", compose, "")).await;
    assert_eq!(reply.response.status, Status::Success);
    assert_eq!(reply.response.stdout.as_deref(), Some("ok"));
    assert!(reply.restart.is_none());

    let app_dir = env.root().join("apps").join("wiki");
    assert_eq!(
        std::fs::read_to_string(app_dir.join("docker-compose.yml")).unwrap(),
        compose
    );
    assert!(!app_dir.join(".env").exists());

    let calls = env.executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].argv, vec!["docker", "compose", "up", "-d"]);
    assert_eq!(calls[0].cwd.as_deref(), Some(app_dir.as_path()));
}

#[tokio::test]
async fn install_writes_private_env_file() {
    let env = TestEnv::new();
    env.dispatcher()
        .handle(install("wiki", "services: {}\n", "A=1\nB=2"))
        .await;

    let env_file = env.root().join("apps").join("wiki").join(".env");
    assert_eq!(std::fs::read_to_string(&env_file).unwrap(), "A=1\nB=2");
    assert_eq!(mode(&env_file), 0o600);
}

#[tokio::test]
async fn install_rejects_traversal_without_side_effects() {
    let env = TestEnv::new();
    let reply = env
        .dispatcher()
        .handle(install("../etc", "services: {}\n", ""))
        .await;

    assert_eq!(reply.response.status, Status::Error);
    assert!(reply.response.message.unwrap().contains("app_slug"));
    assert!(!env.root().join("apps").exists());
    assert!(!env.root().join("etc").exists());
    assert!(env.executor.calls().is_empty());
}

#[tokio::test]
async fn install_requires_compose_content() {
    let env = TestEnv::new();
    let reply = env.dispatcher().handle(install("wiki", "", "")).await;

    assert_eq!(reply.response.status, Status::Error);
    assert_eq!(reply.response.message.as_deref(), Some("Missing compose_content"));
    assert!(env.executor.calls().is_empty());
}

#[tokio::test]
async fn install_reports_compose_failure_with_output() {
    let env = TestEnv::with_executor(RecordingExecutor::failing_on("up"));
    let reply = env
        .dispatcher()
        .handle(install("wiki", "services: {}\n", ""))
        .await;

    assert_eq!(reply.response.status, Status::Error);
    assert_eq!(reply.response.stderr.as_deref(), Some("up failed"));
    assert!(reply.response.message.unwrap().contains("exit 1"));
}

#[tokio::test]
async fn control_runs_compose_action_in_app_dir() {
    let env = TestEnv::new();
    let app_dir = env.root().join("apps").join("wiki");
    std::fs::create_dir_all(&app_dir).unwrap();

    for action in ControlAction::ALL {
        let reply = env
            .dispatcher()
            .handle(Command::ControlApp {
                app_slug: "wiki".to_string(),
                action,
            })
            .await;
        assert_eq!(reply.response.status, Status::Success, "{action}");
    }

    let calls = env.executor.calls();
    let actions: Vec<&str> = calls.iter().map(|c| c.argv[2].as_str()).collect();
    assert_eq!(actions, vec!["start", "stop", "restart", "pull"]);
    assert!(calls.iter().all(|c| c.cwd.as_deref() == Some(app_dir.as_path())));
}

#[tokio::test]
async fn control_missing_app_is_not_found() {
    let env = TestEnv::new();
    let reply = env
        .dispatcher()
        .handle_request(br#"{"command":"stop_app","app_slug":"ghost"}"#)
        .await;

    assert_eq!(reply.response.status, Status::Error);
    assert_eq!(reply.response.message.as_deref(), Some("App not found: ghost"));
    assert!(env.executor.calls().is_empty());
}

#[tokio::test]
async fn unknown_command_is_rejected_before_execution() {
    let env = TestEnv::new();
    let reply = env
        .dispatcher()
        .handle_request(br#"{"command":"rm_rf","path":"/"}"#)
        .await;

    assert_eq!(reply.response.status, Status::Error);
    assert_eq!(reply.response.message.as_deref(), Some("Unknown command: rm_rf"));
    assert!(env.executor.calls().is_empty());
}

#[tokio::test]
async fn malformed_body_is_invalid_json() {
    let env = TestEnv::new();
    let reply = env.dispatcher().handle_request(b"{not json").await;

    assert_eq!(reply.response.status, Status::Error);
    assert_eq!(reply.response.message.as_deref(), Some("Invalid JSON"));
}

#[tokio::test]
async fn backup_archives_app_dir() {
    let env = TestEnv::new();
    std::fs::create_dir_all(env.root().join("apps").join("wiki")).unwrap();

    let reply = env
        .dispatcher()
        .handle(Command::BackupApp {
            app_slug: "wiki".to_string(),
        })
        .await;
    assert_eq!(reply.response.status, Status::Success);

    let archive = env.root().join("backups").join("wiki_backup.tar.gz");
    assert!(
        reply
            .response
            .message
            .unwrap()
            .contains(&archive.display().to_string())
    );
    assert_eq!(
        env.executor.argvs(),
        vec![vec![
            "tar".to_string(),
            "-czf".to_string(),
            archive.display().to_string(),
            "-C".to_string(),
            env.root().join("apps").display().to_string(),
            "wiki".to_string(),
        ]]
    );
}

#[tokio::test]
async fn backup_of_missing_app_is_not_found() {
    let env = TestEnv::new();
    let reply = env
        .dispatcher()
        .handle(Command::BackupApp {
            app_slug: "ghost".to_string(),
        })
        .await;

    assert_eq!(reply.response.message.as_deref(), Some("App not found: ghost"));
    assert!(env.executor.calls().is_empty());
}

#[tokio::test]
async fn reload_proxy_writes_config_then_reloads() {
    let env = TestEnv::new();
    let caddyfile = "{\n\temail ops@example.com\n}\n";

    let reply = env
        .dispatcher()
        .handle(Command::ReloadProxy {
            caddyfile: caddyfile.to_string(),
        })
        .await;
    assert_eq!(reply.response.status, Status::Success);

    let path = env.root().join("caddy").join("Caddyfile");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), caddyfile);
    assert_eq!(
        env.executor.argvs(),
        vec![vec![
            "caddy".to_string(),
            "reload".to_string(),
            "--config".to_string(),
            path.display().to_string(),
            "--adapter".to_string(),
            "caddyfile".to_string(),
        ]]
    );
}

#[tokio::test]
async fn reload_proxy_requires_content() {
    let env = TestEnv::new();
    let reply = env
        .dispatcher()
        .handle(Command::ReloadProxy {
            caddyfile: String::new(),
        })
        .await;

    assert_eq!(reply.response.message.as_deref(), Some("Missing caddyfile"));
    assert!(env.executor.calls().is_empty());
}

#[tokio::test]
async fn rclone_config_is_saved_privately() {
    let env = TestEnv::new();
    let content = "[gdrive]\ntype = drive\ntoken = {\"access_token\":\"x\"}\n";

    let reply = env
        .dispatcher()
        .handle(Command::ConfigureRemoteStorage {
            config_content: content.to_string(),
        })
        .await;
    assert_eq!(reply.response.status, Status::Success);
    assert_eq!(reply.response.message.as_deref(), Some("Rclone config saved"));

    let path = env.root().join("rclone").join("rclone.conf");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
    assert_eq!(mode(&path), 0o600);
    assert!(env.executor.calls().is_empty());
}

#[tokio::test]
async fn mount_installs_and_enables_unit() {
    let env = TestEnv::new();
    let reply = env
        .dispatcher()
        .handle(Command::MountRemoteStorage {
            remote: "gdrive".to_string(),
        })
        .await;
    assert_eq!(reply.response.status, Status::Success);

    let mount_point = env.root().join("rclone_mounts").join("gdrive");
    assert!(mount_point.is_dir());

    let unit = env.root().join("systemd").join("gridops-mount-gdrive.service");
    let content = std::fs::read_to_string(&unit).unwrap();
    assert!(content.contains(&format!("mount gdrive: {}", mount_point.display())));
    assert!(content.contains("Restart=always"));

    assert_eq!(
        env.executor.argvs(),
        vec![
            vec!["systemctl".to_string(), "daemon-reload".to_string()],
            vec![
                "systemctl".to_string(),
                "enable".to_string(),
                "--now".to_string(),
                "gridops-mount-gdrive.service".to_string(),
            ],
        ]
    );
}

#[tokio::test]
async fn mount_rejects_unsafe_remote() {
    let env = TestEnv::new();
    for remote in ["", "../x", "a b", "x%n", "-x"] {
        let reply = env
            .dispatcher()
            .handle(Command::MountRemoteStorage {
                remote: remote.to_string(),
            })
            .await;
        assert_eq!(reply.response.status, Status::Error, "{remote:?}");
    }
    assert!(!env.root().join("systemd").exists());
    assert!(env.executor.calls().is_empty());
}

#[tokio::test]
async fn mount_stops_when_daemon_reload_fails() {
    let env = TestEnv::with_executor(RecordingExecutor::failing_on("daemon-reload"));
    let reply = env
        .dispatcher()
        .handle(Command::MountRemoteStorage {
            remote: "gdrive".to_string(),
        })
        .await;

    assert_eq!(reply.response.status, Status::Error);
    assert_eq!(env.executor.calls().len(), 1);
}

#[tokio::test]
async fn self_update_schedules_restart_after_pull() {
    let env = TestEnv::new();
    let reply = env.dispatcher().handle(Command::SelfUpdate).await;

    assert_eq!(reply.response.status, Status::Success);
    assert_eq!(
        reply.response.message.as_deref(),
        Some("Update started. System restarting...")
    );
    let plan = reply.restart.expect("restart plan");
    assert_eq!(plan.units, vec!["gridops-web.service"]);

    let argvs = env.executor.argvs();
    assert_eq!(argvs.len(), 2);
    assert_eq!(argvs[0][0], "tar");
    assert_eq!(argvs[1], vec!["git", "pull"]);
    // restarts happen after the response, not inside the handler
    assert!(!argvs.iter().any(|a| a.iter().any(|s| s == "restart")));
}

#[tokio::test]
async fn self_update_without_pull_has_no_restart() {
    let env = TestEnv::with_executor(RecordingExecutor::failing_on("pull"));
    let reply = env.dispatcher().handle(Command::SelfUpdate).await;

    assert_eq!(reply.response.status, Status::Error);
    assert!(reply.restart.is_none());
}

#[tokio::test]
async fn self_update_continues_when_backup_fails() {
    let env = TestEnv::with_executor(RecordingExecutor::failing_on("-czf"));
    let reply = env.dispatcher().handle(Command::SelfUpdate).await;

    assert_eq!(reply.response.status, Status::Success);
    assert!(reply.restart.is_some());
    assert_eq!(env.executor.calls().len(), 2);
}

#[tokio::test]
async fn handler_panic_becomes_error_response() {
    let env = TestEnv::with_executor(RecordingExecutor::with(|_| panic!("boom")));
    let reply = env
        .dispatcher()
        .handle(install("wiki", "services: {}\n", ""))
        .await;

    assert_eq!(reply.response.status, Status::Error);
    assert_eq!(reply.response.message.as_deref(), Some("internal error: boom"));
    assert!(reply.restart.is_none());
}

#[tokio::test]
async fn rewrite_tightens_existing_secret_files() {
    let env = TestEnv::new();
    let app_dir = env.root().join("apps").join("wiki");
    std::fs::create_dir_all(&app_dir).unwrap();
    let env_file = app_dir.join(".env");
    std::fs::write(&env_file, "OLD=1").unwrap();
    std::fs::set_permissions(&env_file, std::fs::Permissions::from_mode(0o644)).unwrap();

    let rclone_dir = env.root().join("rclone");
    std::fs::create_dir_all(&rclone_dir).unwrap();
    let rclone_conf = rclone_dir.join("rclone.conf");
    std::fs::write(&rclone_conf, "[old]\n").unwrap();
    std::fs::set_permissions(&rclone_conf, std::fs::Permissions::from_mode(0o664)).unwrap();

    env.dispatcher()
        .handle(install("wiki", "services: {}\n", "NEW=2"))
        .await;
    env.dispatcher()
        .handle(Command::ConfigureRemoteStorage {
            config_content: "[gdrive]\ntype = drive\n".to_string(),
        })
        .await;

    assert_eq!(std::fs::read_to_string(&env_file).unwrap(), "NEW=2");
    assert_eq!(mode(&env_file), 0o600);
    assert_eq!(std::fs::read_to_string(&rclone_conf).unwrap(), "[gdrive]\ntype = drive\n");
    assert_eq!(mode(&rclone_conf), 0o600);
}

#[tokio::test]
async fn backup_treats_plain_file_as_missing_app() {
    let env = TestEnv::new();
    std::fs::create_dir_all(env.root().join("apps")).unwrap();
    std::fs::write(env.root().join("apps").join("wiki"), "not a dir").unwrap();

    let reply = env
        .dispatcher()
        .handle(Command::BackupApp {
            app_slug: "wiki".to_string(),
        })
        .await;

    assert_eq!(reply.response.message.as_deref(), Some("App not found: wiki"));
    assert!(env.executor.calls().is_empty());
}
