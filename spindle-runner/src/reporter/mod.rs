// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The reporting surface.
//!
//! Reporters are read-side collaborators: they receive each progress event
//! strictly after the state manager has applied the corresponding mutation,
//! and may query the state manager at any time, including mid-run.

mod events;

pub use events::*;

use tracing::debug;

/// Receives run progress, post-state-update.
pub trait Reporter: Send + Sync {
    /// Delivers one event. Must not block: this is called from channel
    /// serving tasks.
    fn report(&self, event: RunnerEvent);
}

/// Reporter that forwards a one-line summary of each event to `tracing`.
#[derive(Debug, Default)]
pub struct TraceReporter;

impl Reporter for TraceReporter {
    fn report(&self, event: RunnerEvent) {
        match &event {
            RunnerEvent::Collected {
                run_id,
                worker_id,
                files,
            } => debug!(%run_id, worker_id, files = files.len(), "collected"),
            RunnerEvent::TaskUpdate {
                run_id,
                worker_id,
                packs,
            } => debug!(%run_id, worker_id, packs = packs.len(), "task update"),
            RunnerEvent::UserConsoleLog {
                run_id,
                worker_id,
                log,
            } => debug!(%run_id, worker_id, bytes = log.content.len(), "console output"),
            RunnerEvent::Finished {
                run_id,
                worker_id,
                files,
            } => debug!(%run_id, worker_id, files = files.len(), "finished"),
        }
    }
}

/// Reporter that drops every event.
#[derive(Debug, Default)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn report(&self, _event: RunnerEvent) {}
}
