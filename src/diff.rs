// src/diff.rs

//! Bounded-cost diff between current and desired file content
//!
//! Diff computation runs on a worker thread with a warning threshold and
//! a hard cutoff. Past the cutoff the run gets a placeholder instead of
//! a diff; a pathological input must never stall reconciliation.

use diffy::create_patch;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{error, info};

/// Warn and give-up thresholds for one diff computation
#[derive(Debug, Clone, Copy)]
pub struct DiffLimits {
    pub warn: Duration,
    pub cutoff: Duration,
}

impl Default for DiffLimits {
    fn default() -> Self {
        Self {
            warn: Duration::from_secs(5),
            cutoff: Duration::from_secs(30),
        }
    }
}

/// Result of a bounded diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Unified diff text
    Patch(String),
    /// The cutoff elapsed; no diff is available
    TooLong,
}

impl DiffOutcome {
    /// Text suitable for prompts and reports
    pub fn display_text(&self) -> &str {
        match self {
            DiffOutcome::Patch(text) => text,
            DiffOutcome::TooLong => "diff took too long to compute, no printable diff",
        }
    }
}

/// Diff `current` against `desired` within the given limits.
///
/// The worker thread is abandoned past the cutoff; it finishes in the
/// background and its result is discarded.
pub fn compute_diff(current: &str, desired: &str, limits: DiffLimits) -> DiffOutcome {
    let (sender, receiver) = mpsc::channel();
    let current = current.to_string();
    let desired = desired.to_string();

    std::thread::spawn(move || {
        let patch = create_patch(&current, &desired).to_string();
        let _ = sender.send(patch);
    });

    match receiver.recv_timeout(limits.warn) {
        Ok(patch) => return DiffOutcome::Patch(patch),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            info!("diff taking a long time");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => return DiffOutcome::TooLong,
    }

    let remaining = limits.cutoff.saturating_sub(limits.warn);
    match receiver.recv_timeout(remaining) {
        Ok(patch) => DiffOutcome::Patch(patch),
        Err(_) => {
            error!("diff took too long; giving up");
            DiffOutcome::TooLong
        }
    }
}
