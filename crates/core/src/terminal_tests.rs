// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    architect = { TerminalKind::Architect, "architect" },
    builder = { TerminalKind::Builder, "builder" },
    shell = { TerminalKind::Shell, "shell" },
)]
fn as_str_round_trips_through_parse(kind: TerminalKind, s: &str) {
    assert_eq!(kind.as_str(), s);
    assert_eq!(TerminalKind::parse(s), Some(kind));
    assert_eq!(kind.to_string(), s);
}

#[test]
fn parse_rejects_unknown_kind() {
    assert_eq!(TerminalKind::parse("worker"), None);
    assert_eq!(TerminalKind::parse(""), None);
}

#[test]
fn only_architect_lacks_role() {
    assert!(!TerminalKind::Architect.has_role());
    assert!(TerminalKind::Builder.has_role());
    assert!(TerminalKind::Shell.has_role());
}

#[test]
fn serde_uses_lowercase() {
    let json = serde_json::to_string(&TerminalKind::Architect).unwrap();
    assert_eq!(json, "\"architect\"");
    let parsed: TerminalKind = serde_json::from_str("\"shell\"").unwrap();
    assert_eq!(parsed, TerminalKind::Shell);
}
