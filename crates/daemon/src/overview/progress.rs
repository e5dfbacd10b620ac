// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol-dependent progress scoring.

use super::status::{PlanPhase, StatusFile};

/// Protocols with the hand-tuned phase curve. `spider` is the legacy alias
/// for `spir`.
fn is_legacy_protocol(protocol: &str) -> bool {
    matches!(protocol, "spir" | "aspir" | "spider")
}

/// Progress (0..=100) for a builder's current phase.
///
/// Legacy protocols use fixed anchors, with `implement` interpolated by the
/// fraction of plan phases already complete. Any other protocol distributes
/// evenly over its phase list.
pub fn progress(status: &StatusFile) -> u8 {
    let protocol = status.protocol.as_deref().unwrap_or_default();
    let phase = status.phase.as_deref().unwrap_or_default();
    let gate_requested = status.has_requested_gate();

    if phase == "complete" {
        return 100;
    }

    if is_legacy_protocol(protocol) {
        return match phase {
            "specify" => {
                if gate_requested {
                    20
                } else {
                    10
                }
            }
            "plan" => {
                if gate_requested {
                    45
                } else {
                    35
                }
            }
            "implement" => implement_progress(&status.plan_phases),
            "review" => {
                if gate_requested {
                    95
                } else {
                    92
                }
            }
            _ => 0,
        };
    }

    even_progress(phase, &status.plan_phases)
}

/// 50..=90 interpolated by completed plan phases.
fn implement_progress(phases: &[PlanPhase]) -> u8 {
    if phases.is_empty() {
        return 50;
    }
    let complete = phases.iter().filter(|p| p.is_complete()).count();
    let fraction = complete as f64 / phases.len() as f64;
    (50.0 + fraction * 40.0).round() as u8
}

/// Even distribution for protocols with a loadable phase list: phase index
/// i (0-based) scores `100 * (i + 1) / (N + 1)`.
fn even_progress(phase: &str, phases: &[PlanPhase]) -> u8 {
    if phases.is_empty() {
        return 0;
    }
    let n = phases.len();
    match phases.iter().position(|p| p.id == phase) {
        Some(index) => ((100 * (index + 1)) / (n + 1)) as u8,
        None => 0,
    }
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
