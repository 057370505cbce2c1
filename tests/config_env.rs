//! Configuration read from the real process environment.

use serial_test::serial;
use turtle_core::DeployErrorKind;
use turtle_devtools::{tasks, Settings, Task};

const VARS: [&str; 4] = ["SERVER_HOST", "SERVER_USER", "SERVER_PASSWORD", "SERVER_KEY"];

fn clear() {
    for v in VARS {
        std::env::remove_var(v);
    }
}

#[test]
#[serial]
fn missing_server_host_is_reported() {
    clear();
    std::env::set_var("SERVER_USER", "deploy");
    std::env::set_var("SERVER_PASSWORD", "pw");
    let err = Settings::from_env().unwrap_err();
    clear();
    assert_eq!(err.kind, DeployErrorKind::Config);
    assert_eq!(err.message, "Missing required environment variables: SERVER_HOST");
}

#[tokio::test]
#[serial]
async fn deploy_task_fails_on_config_before_building() {
    clear();
    // no package.json lookup happens: config is validated first
    let err = tasks::run(Task::Deploy).await.unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::Config);
}
