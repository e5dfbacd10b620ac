// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ShellConfig::load(dir.path()).unwrap();
    assert_eq!(config.architect, "claude");
    assert_eq!(config.builder, "claude");
    assert!(!config.shell.is_empty());
}

#[test]
fn full_config_parses() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE),
        r#"{ "shell": { "architect": "arch-cmd", "builder": "build-cmd", "shell": "zsh" } }"#,
    )
    .unwrap();

    let config = ShellConfig::load(dir.path()).unwrap();
    assert_eq!(config.architect, "arch-cmd");
    assert_eq!(config.builder, "build-cmd");
    assert_eq!(config.shell, "zsh");
}

#[test]
fn partial_config_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE),
        r#"{ "shell": { "shell": "fish" } }"#,
    )
    .unwrap();

    let config = ShellConfig::load(dir.path()).unwrap();
    assert_eq!(config.architect, "claude");
    assert_eq!(config.shell, "fish");
}

#[test]
fn malformed_json_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE), "{ nope").unwrap();

    let err = ShellConfig::load(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_, _)));
}

#[test]
fn command_for_maps_kinds() {
    let config = ShellConfig {
        architect: "a".into(),
        builder: "b".into(),
        shell: "s".into(),
    };
    assert_eq!(config.command_for(TerminalKind::Architect), "a");
    assert_eq!(config.command_for(TerminalKind::Builder), "b");
    assert_eq!(config.command_for(TerminalKind::Shell), "s");
}
