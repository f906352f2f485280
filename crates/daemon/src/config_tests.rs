// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serial_test::serial;

use super::*;

fn clear_env() {
    for key in [
        "VEAD_CONFIG",
        "VEAD_CONTROL_PORT",
        "VEAD_HEALTH_PORT",
        "VEAD_DATA_DIR",
        "VEAD_LOG_LEVEL",
        "VEAD_SANDBOX_SOCKET",
        "VEAD_BROKER_ENDPOINT",
        "VEAD_BROKER_ENABLED",
        "VEAD_MAX_LIVE_APPS",
        "VEAD_APP_ID_PREFIX",
        "VEAD_RECONCILE_INTERVAL_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn defaults_are_the_documented_ones() {
    clear_env();
    let config = Config::load().unwrap();
    assert_eq!(config.control_port, 3002);
    assert_eq!(config.health_port, 3003);
    assert_eq!(config.max_live_apps, 5);
    assert_eq!(config.app_id_prefix, "VEA-");
    assert_eq!(config.reconcile_interval_ms, 30_000);
    assert_eq!(config.default_request_deadline_ms, 30_000);
    assert_eq!(config.default_stop_grace_ms, 10_000);
    assert!(config.broker_enabled);
}

#[test]
#[serial]
fn env_overrides_defaults() {
    clear_env();
    std::env::set_var("VEAD_CONTROL_PORT", "4100");
    std::env::set_var("VEAD_MAX_LIVE_APPS", "2");
    std::env::set_var("VEAD_BROKER_ENABLED", "false");
    let config = Config::load().unwrap();
    assert_eq!(config.control_port, 4100);
    assert_eq!(config.max_live_apps, 2);
    assert!(!config.broker_enabled);
    clear_env();
}

#[test]
#[serial]
fn file_sits_between_defaults_and_env() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vead.toml");
    std::fs::write(&path, "control_port = 5000\nmax_live_apps = 9\n").unwrap();
    std::env::set_var("VEAD_CONFIG", &path);
    std::env::set_var("VEAD_MAX_LIVE_APPS", "3");

    let config = Config::load().unwrap();
    // File beats default, env beats file.
    assert_eq!(config.control_port, 5000);
    assert_eq!(config.max_live_apps, 3);
    clear_env();
}

#[test]
#[serial]
fn unparseable_env_value_is_an_error() {
    clear_env();
    std::env::set_var("VEAD_CONTROL_PORT", "not-a-port");
    assert!(matches!(Config::load(), Err(ConfigError::Invalid { key: "VEAD_CONTROL_PORT", .. })));
    clear_env();
}

#[test]
#[serial]
fn unknown_file_key_is_an_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vead.toml");
    std::fs::write(&path, "no_such_option = 1\n").unwrap();
    std::env::set_var("VEAD_CONFIG", &path);
    assert!(matches!(Config::load(), Err(ConfigError::Parse(..))));
    clear_env();
}

#[test]
fn app_data_path_is_under_data_dir() {
    let config = Config { data_dir: PathBuf::from("/data/vead"), ..Config::default() };
    assert_eq!(config.app_data_path("VEA-cam"), PathBuf::from("/data/vead/apps/VEA-cam"));
}
