// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn taken(labels: &[&str]) -> HashSet<String> {
    labels.iter().map(|l| l.to_string()).collect()
}

#[test]
fn dedup_label_returns_free_names_unchanged() {
    assert_eq!(dedup_label("testing", &taken(&[])), "testing");
    assert_eq!(dedup_label("testing", &taken(&["other"])), "testing");
}

#[test]
fn dedup_label_appends_the_next_suffix() {
    assert_eq!(dedup_label("testing", &taken(&["testing"])), "testing-1");
    assert_eq!(
        dedup_label(
            "testing",
            &taken(&["testing", "testing-1", "testing-2", "testing-3"])
        ),
        "testing-4"
    );
}

#[test]
fn dedup_label_ignores_gaps_and_foreign_suffixes() {
    // Gap at -2: max suffix still wins.
    assert_eq!(
        dedup_label("testing", &taken(&["testing", "testing-5"])),
        "testing-6"
    );
    // Non-numeric and unrelated labels do not count.
    assert_eq!(
        dedup_label("testing", &taken(&["testing", "testing-x", "tests-3"])),
        "testing-1"
    );
}

#[test]
fn memory_usage_reports_something_on_linux() {
    // Smoke: VmRSS of this test process parses to a positive number.
    assert!(memory_usage_bytes() > 0);
}
