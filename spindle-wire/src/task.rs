// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The task tree shipped from workers to the orchestrator.
//!
//! A collected test file is a tree: the file itself is the root-level task,
//! suites are interior nodes and tests are leaves. Workers ship whole trees
//! once per collection; after that, only [`TaskResultPack`] patches and
//! [`UserConsoleLog`] records flow for the tree's ids.

use camino::Utf8PathBuf;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{fmt, time::Duration};

/// Identifier for a task.
///
/// Unique within the lifetime of one worker channel; the orchestrator never
/// compares ids across runs.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(SmolStr);

impl TaskId {
    /// Creates a new task id.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// A collected test file: the root-level task for one file on disk.
///
/// `filepath` uniquely keys the file in the orchestrator's registry;
/// re-collecting a path replaces the stored file wholesale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TestFile {
    /// Id of the file's root task.
    pub id: TaskId,
    /// Path that keys this file.
    pub filepath: Utf8PathBuf,
    /// Result for the file as a whole, once recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Ordered children.
    pub tasks: Vec<Task>,
}

impl TestFile {
    /// Creates a file with no result and the given children.
    pub fn new(id: impl Into<TaskId>, filepath: impl Into<Utf8PathBuf>, tasks: Vec<Task>) -> Self {
        Self {
            id: id.into(),
            filepath: filepath.into(),
            result: None,
            tasks,
        }
    }
}

/// One node in a file's task tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Task {
    /// An interior node owning an ordered sequence of children.
    Suite {
        /// Id, unique within the run.
        id: TaskId,
        /// Human-readable suite name.
        name: String,
        /// Result, once recorded.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<TaskResult>,
        /// Ordered children.
        tasks: Vec<Task>,
    },
    /// A leaf test.
    Test {
        /// Id, unique within the run.
        id: TaskId,
        /// Human-readable test name.
        name: String,
        /// Result, once recorded.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<TaskResult>,
    },
}

impl Task {
    /// Returns this task's id.
    pub fn id(&self) -> &TaskId {
        match self {
            Self::Suite { id, .. } | Self::Test { id, .. } => id,
        }
    }

    /// Returns this task's name.
    pub fn name(&self) -> &str {
        match self {
            Self::Suite { name, .. } | Self::Test { name, .. } => name,
        }
    }

    /// Returns this task's result, if one has been recorded.
    pub fn result(&self) -> Option<&TaskResult> {
        match self {
            Self::Suite { result, .. } | Self::Test { result, .. } => result.as_ref(),
        }
    }
}

/// Execution state of a task.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Not started.
    Idle,
    /// Currently running.
    Run,
    /// Finished successfully.
    Pass,
    /// Finished with a failure.
    Fail,
    /// Skipped.
    Skip,
    /// Declared but not implemented.
    Todo,
}

/// Result recorded for a task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TaskResult {
    /// Final (or current) state.
    pub state: TaskState,
    /// Wall-clock duration, when known.
    #[serde(
        default,
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,
    /// Failure details, for [`TaskState::Fail`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
}

impl TaskResult {
    /// Creates a result carrying just a state.
    pub fn from_state(state: TaskState) -> Self {
        Self {
            state,
            duration: None,
            error: None,
        }
    }

    /// Returns true if the state is exactly [`TaskState::Fail`].
    pub fn is_fail(&self) -> bool {
        self.state == TaskState::Fail
    }
}

/// Failure details as reported by the execution engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TaskFailure {
    /// Failure message.
    pub message: String,
    /// Source location, when the engine could map one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// The wire-level unit for incremental result updates.
///
/// Patches the `result` field of an already-indexed task; never creates
/// tasks. A pack for an id the orchestrator has not yet indexed is dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskResultPack {
    /// Task being patched.
    pub id: TaskId,
    /// Replacement result.
    pub result: Option<TaskResult>,
}

impl TaskResultPack {
    /// Creates a pack.
    pub fn new(id: impl Into<TaskId>, result: Option<TaskResult>) -> Self {
        Self {
            id: id.into(),
            result,
        }
    }
}

/// Console output captured while a task ran.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct UserConsoleLog {
    /// Task the output is attributed to, when known; otherwise the log is
    /// orphaned and kept only for pass-through reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Captured text.
    pub content: String,
    /// Stream the text was written to.
    pub stream: ConsoleStream,
    /// Capture time.
    pub time: DateTime<FixedOffset>,
}

/// Output stream of a console log.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsoleStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}
