// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn session_id_display_and_as_str() {
    let id = SessionId::new("abc-123");
    assert_eq!(id.to_string(), "abc-123");
    assert_eq!(id.as_str(), "abc-123");
}

#[test]
fn session_id_generate_is_unique() {
    let a = SessionId::generate();
    let b = SessionId::generate();
    assert_ne!(a, b);
    assert_eq!(a.as_str().len(), 36);
}

#[test]
fn session_id_serde() {
    let id = SessionId::new("my-session");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"my-session\"");

    let parsed: SessionId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn role_id_factories() {
    assert_eq!(RoleId::shell(3).as_str(), "shell-3");
    assert_eq!(
        RoleId::builder("spir-126-retry-loop").as_str(),
        "builder-spir-126-retry-loop"
    );
}

#[yare::parameterized(
    shell_zero = { "shell-0", Some(0) },
    shell_three = { "shell-3", Some(3) },
    shell_large = { "shell-9999", Some(9999) },
    builder = { "builder-spir-126", None },
    bare = { "shell", None },
    non_numeric = { "shell-abc", None },
    negative = { "shell--1", None },
)]
fn shell_index_parses_only_numbered_shells(raw: &str, expected: Option<u32>) {
    assert_eq!(RoleId::new(raw).shell_index(), expected);
}

#[test]
fn role_id_hashmap_lookup_by_str() {
    use std::collections::HashMap;
    let mut map: HashMap<RoleId, u32> = HashMap::new();
    map.insert(RoleId::shell(1), 1);
    assert_eq!(map.get("shell-1"), Some(&1));
}

#[test]
fn tab_id_display() {
    assert_eq!(TabId::new("tab-7").to_string(), "tab-7");
}
