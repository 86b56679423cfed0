// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::pool::RunId;
use spindle_wire::{TaskResultPack, TestFile, UserConsoleLog};

/// A reporting event.
///
/// Each carries the id of the run batch and of the dispatch unit that
/// produced it. Events from one dispatch unit arrive in the order the
/// worker emitted them; events from different units interleave arbitrarily.
#[derive(Clone, Debug)]
pub enum RunnerEvent {
    /// Files finished collection; the payload is the full task trees.
    Collected {
        /// The owning run batch.
        run_id: RunId,
        /// The dispatch unit that collected.
        worker_id: u32,
        /// The collected trees.
        files: Vec<TestFile>,
    },
    /// Incremental result patches were applied to the state manager.
    TaskUpdate {
        /// The owning run batch.
        run_id: RunId,
        /// The dispatch unit that reported.
        worker_id: u32,
        /// The applied patches.
        packs: Vec<TaskResultPack>,
    },
    /// Console output was captured during execution.
    UserConsoleLog {
        /// The owning run batch.
        run_id: RunId,
        /// The dispatch unit that captured the output.
        worker_id: u32,
        /// The captured record.
        log: UserConsoleLog,
    },
    /// A dispatch unit ran its files to completion.
    Finished {
        /// The owning run batch.
        run_id: RunId,
        /// The dispatch unit that finished.
        worker_id: u32,
        /// Final task trees for the unit's files.
        files: Vec<TestFile>,
    },
}

impl RunnerEvent {
    /// Event name, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Collected { .. } => "collected",
            Self::TaskUpdate { .. } => "task-update",
            Self::UserConsoleLog { .. } => "user-console-log",
            Self::Finished { .. } => "finished",
        }
    }

    /// The dispatch unit that produced this event.
    pub fn worker_id(&self) -> u32 {
        match self {
            Self::Collected { worker_id, .. }
            | Self::TaskUpdate { worker_id, .. }
            | Self::UserConsoleLog { worker_id, .. }
            | Self::Finished { worker_id, .. } => *worker_id,
        }
    }
}
