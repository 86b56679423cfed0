// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The process-wide store of collected files, tasks, results and logs.
//!
//! Every worker channel's events funnel into one [`StateManager`]. Updates
//! from different channels interleave arbitrarily; a single internal mutex
//! over both registries serializes them. Within one channel the transport
//! preserves order, so a file's collection is always applied before any
//! result patch referencing its tasks.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use spindle_wire::{Task, TaskId, TaskResult, TaskResultPack, TaskState, TestFile, UserConsoleLog};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::debug;

/// Kind of an indexed task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskKind {
    /// The root-level task for a whole file.
    File,
    /// An interior suite.
    Suite,
    /// A leaf test.
    Test,
}

/// One indexed task: a shared node of a collected file's tree.
///
/// Cells are structurally immutable after collection — children never change
/// — but `result` and `logs` are patched in place as updates arrive, so
/// handles held by reporting collaborators stay live mid-run.
#[derive(Debug)]
pub struct TaskCell {
    id: TaskId,
    kind: TaskKind,
    name: String,
    filepath: Utf8PathBuf,
    children: Vec<Arc<TaskCell>>,
    result: Mutex<Option<TaskResult>>,
    logs: Mutex<Vec<UserConsoleLog>>,
}

impl TaskCell {
    fn from_file(file: &TestFile) -> Arc<Self> {
        Arc::new(Self {
            id: file.id.clone(),
            kind: TaskKind::File,
            name: file.filepath.as_str().to_owned(),
            filepath: file.filepath.clone(),
            children: file
                .tasks
                .iter()
                .map(|task| Self::from_task(task, &file.filepath))
                .collect(),
            result: Mutex::new(file.result.clone()),
            logs: Mutex::new(Vec::new()),
        })
    }

    fn from_task(task: &Task, filepath: &Utf8Path) -> Arc<Self> {
        let (kind, children) = match task {
            Task::Suite { tasks, .. } => (
                TaskKind::Suite,
                tasks
                    .iter()
                    .map(|child| Self::from_task(child, filepath))
                    .collect(),
            ),
            Task::Test { .. } => (TaskKind::Test, Vec::new()),
        };
        Arc::new(Self {
            id: task.id().clone(),
            kind,
            name: task.name().to_owned(),
            filepath: filepath.to_owned(),
            children,
            result: Mutex::new(task.result().cloned()),
            logs: Mutex::new(Vec::new()),
        })
    }

    /// This task's id.
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// This task's kind.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// This task's name; for file roots, the filepath.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the file that owns this task.
    pub fn filepath(&self) -> &Utf8Path {
        &self.filepath
    }

    /// Ordered children; empty for tests.
    pub fn children(&self) -> &[Arc<TaskCell>] {
        &self.children
    }

    /// Snapshot of the current result.
    pub fn result(&self) -> Option<TaskResult> {
        self.lock_result().clone()
    }

    /// Snapshot of the captured console logs, in append order.
    pub fn logs(&self) -> Vec<UserConsoleLog> {
        self.lock_logs().clone()
    }

    fn lock_result(&self) -> MutexGuard<'_, Option<TaskResult>> {
        self.result.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn lock_logs(&self) -> MutexGuard<'_, Vec<UserConsoleLog>> {
        self.logs.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn set_result(&self, result: Option<TaskResult>) {
        *self.lock_result() = result;
    }

    /// Forces the state to `Fail`, creating a bare result if none exists.
    /// Any duration or error already recorded is kept.
    fn mark_failed(&self) {
        let mut guard = self.lock_result();
        match guard.as_mut() {
            Some(result) => result.state = TaskState::Fail,
            None => *guard = Some(TaskResult::from_state(TaskState::Fail)),
        }
    }

    fn push_log(&self, log: UserConsoleLog) {
        self.lock_logs().push(log);
    }
}

#[derive(Debug, Default)]
struct Registries {
    files_by_path: IndexMap<Utf8PathBuf, Arc<TaskCell>>,
    task_by_id: HashMap<TaskId, Arc<TaskCell>>,
}

impl Registries {
    /// Indexes `cell` and its subtree.
    ///
    /// If the registry already holds this exact allocation the call is a
    /// no-op and does not recurse: children cannot change after collection,
    /// so an identical pointer implies an identical subtree. This is a
    /// reference-identity check, not value equality — a distinct allocation
    /// with the same id always replaces the stored cell.
    fn index_task(&mut self, cell: &Arc<TaskCell>) {
        if let Some(existing) = self.task_by_id.get(cell.id()) {
            if Arc::ptr_eq(existing, cell) {
                return;
            }
        }
        self.task_by_id.insert(cell.id().clone(), Arc::clone(cell));
        for child in cell.children() {
            self.index_task(child);
        }
    }
}

/// Process-wide, mutation-serialized store of collected files and tasks.
///
/// Lifetime is one test run. Queries are available to reporting
/// collaborators at any point, including mid-run, and keep working after a
/// failure in some other file's dispatch — failures are isolated per
/// fan-out branch.
#[derive(Debug, Default)]
pub struct StateManager {
    inner: Mutex<Registries>,
}

impl StateManager {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registries> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// All collected files, in first-collection order.
    pub fn files(&self) -> Vec<Arc<TaskCell>> {
        self.lock().files_by_path.values().cloned().collect()
    }

    /// The files for exactly the given keys, in the given order.
    ///
    /// Strict index semantics: a key that was never collected yields a
    /// `None` slot rather than being filtered out. Callers are expected to
    /// pass keys they know exist.
    pub fn files_for<I>(&self, keys: I) -> Vec<Option<Arc<TaskCell>>>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let inner = self.lock();
        keys.into_iter()
            .map(|key| inner.files_by_path.get(Utf8Path::new(key.as_ref())).cloned())
            .collect()
    }

    /// All known filepaths, in first-collection order.
    pub fn filepaths(&self) -> Vec<Utf8PathBuf> {
        self.lock().files_by_path.keys().cloned().collect()
    }

    /// Filepaths whose root result state is exactly `Fail`.
    pub fn failed_filepaths(&self) -> Vec<Utf8PathBuf> {
        self.lock()
            .files_by_path
            .iter()
            .filter(|(_, cell)| cell.result().as_ref().is_some_and(TaskResult::is_fail))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Upserts each file by filepath (full replace) and indexes its task
    /// subtree.
    ///
    /// Re-collecting a path — a watch-mode re-run — replaces the stored
    /// file wholesale. Ids indexed for the replaced tree become stale; they
    /// are never handed out again but are only evicted as the new tree's
    /// ids overwrite them.
    pub fn collect_files(&self, files: &[TestFile]) {
        let mut inner = self.lock();
        for file in files {
            let cell = TaskCell::from_file(file);
            inner.files_by_path.insert(file.filepath.clone(), Arc::clone(&cell));
            inner.index_task(&cell);
        }
    }

    /// Indexes a single cell (and, for suites, its subtree).
    ///
    /// Idempotent on reference identity: see [`Registries::index_task`].
    pub fn index_task(&self, cell: &Arc<TaskCell>) {
        self.lock().index_task(cell);
    }

    /// Applies incremental result patches.
    ///
    /// Packs referencing ids that are not indexed are silently dropped —
    /// a result for an unseen task is lost, not buffered. A `Fail` patch
    /// on a task additionally marks the owning file's root result failed,
    /// so failed-file queries work from per-test packs alone.
    pub fn update_tasks(&self, packs: &[TaskResultPack]) {
        let inner = self.lock();
        for pack in packs {
            let Some(cell) = inner.task_by_id.get(&pack.id) else {
                debug!(id = %pack.id, "dropping result pack for unindexed task");
                continue;
            };
            cell.set_result(pack.result.clone());

            let failed = pack.result.as_ref().is_some_and(TaskResult::is_fail);
            if failed && cell.kind() != TaskKind::File {
                if let Some(root) = inner.files_by_path.get(cell.filepath()) {
                    root.mark_failed();
                }
            }
        }
    }

    /// Attributes captured console output to its task.
    ///
    /// A log without a `task_id`, or with one that is not indexed, is
    /// accepted but not attributed anywhere queryable.
    pub fn update_user_log(&self, log: UserConsoleLog) {
        let target = {
            let inner = self.lock();
            log.task_id
                .as_ref()
                .and_then(|id| inner.task_by_id.get(id))
                .cloned()
        };
        match target {
            Some(cell) => cell.push_log(log),
            None => debug!("accepted console log with no indexed task; not attributed"),
        }
    }

    /// Number of indexed tasks, files included.
    pub fn indexed_task_count(&self) -> usize {
        self.lock().task_by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use pretty_assertions::assert_eq;
    use spindle_wire::ConsoleStream;

    fn test_task(id: &str, name: &str) -> Task {
        Task::Test {
            id: TaskId::new(id),
            name: name.to_owned(),
            result: None,
        }
    }

    /// Two files: `a.test` holds suite S ("1") containing test T ("2");
    /// `b.test` holds test U ("3").
    fn sample_files() -> Vec<TestFile> {
        vec![
            TestFile::new(
                "file:a",
                "a.test",
                vec![Task::Suite {
                    id: TaskId::new("1"),
                    name: "S".to_owned(),
                    result: None,
                    tasks: vec![test_task("2", "T")],
                }],
            ),
            TestFile::new("file:b", "b.test", vec![test_task("3", "U")]),
        ]
    }

    fn log_for(task_id: Option<&str>, content: &str) -> UserConsoleLog {
        UserConsoleLog {
            task_id: task_id.map(TaskId::new),
            content: content.to_owned(),
            stream: ConsoleStream::Stdout,
            time: Local::now().fixed_offset(),
        }
    }

    #[test]
    fn collect_registers_filepaths_in_order() {
        let state = StateManager::new();
        state.collect_files(&sample_files());
        assert_eq!(state.filepaths(), vec!["a.test", "b.test"]);

        // Re-collection replaces wholesale, keeping first-collection order.
        state.collect_files(&[TestFile::new("file:a2", "a.test", vec![])]);
        assert_eq!(state.filepaths(), vec!["a.test", "b.test"]);
        let replaced = state.files_for(["a.test"]).remove(0).unwrap();
        assert_eq!(replaced.id().as_str(), "file:a2");
        assert!(replaced.children().is_empty());
    }

    #[test]
    fn files_for_preserves_absent_slots() {
        let state = StateManager::new();
        state.collect_files(&sample_files());
        let files = state.files_for(["b.test", "missing.test", "a.test"]);
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].as_ref().unwrap().filepath(), "b.test");
        assert!(files[1].is_none());
        assert_eq!(files[2].as_ref().unwrap().filepath(), "a.test");
    }

    #[test]
    fn reindexing_the_same_allocation_is_a_no_op() {
        let state = StateManager::new();
        state.collect_files(&sample_files());
        let before = state.indexed_task_count();
        assert_eq!(before, 5);

        let root = state.files_for(["a.test"]).remove(0).unwrap();
        state.index_task(&root);
        assert_eq!(state.indexed_task_count(), before);

        // A distinct allocation with the same ids replaces the stored cells.
        let rebuilt = TaskCell::from_file(&sample_files()[0]);
        state.index_task(&rebuilt);
        assert_eq!(state.indexed_task_count(), before);
        let stored = state.files()[0].clone();
        // collect_files was not called, so the file registry still points at
        // the original allocation even though the id index moved on. The
        // identity check guards recursion, nothing else.
        assert!(!Arc::ptr_eq(&stored, &rebuilt));
    }

    #[test]
    fn update_tasks_patches_indexed_ids_and_drops_unknown_ones() {
        let state = StateManager::new();
        state.collect_files(&sample_files());

        state.update_tasks(&[
            TaskResultPack::new("2", Some(TaskResult::from_state(TaskState::Pass))),
            TaskResultPack::new("no-such-task", Some(TaskResult::from_state(TaskState::Fail))),
        ]);

        let a = state.files_for(["a.test"]).remove(0).unwrap();
        let t = &a.children()[0].children()[0];
        assert_eq!(t.result().unwrap().state, TaskState::Pass);
        // The unknown id changed nothing.
        assert_eq!(state.indexed_task_count(), 5);
        assert!(state.failed_filepaths().is_empty());
    }

    #[test]
    fn fail_packs_mark_the_owning_file_failed() {
        let state = StateManager::new();
        state.collect_files(&sample_files());

        state.update_tasks(&[
            TaskResultPack::new("2", Some(TaskResult::from_state(TaskState::Pass))),
            TaskResultPack::new("3", Some(TaskResult::from_state(TaskState::Fail))),
        ]);

        assert_eq!(state.failed_filepaths(), vec!["b.test"]);
        let a = state.files_for(["a.test"]).remove(0).unwrap();
        assert_eq!(
            a.children()[0].children()[0].result().unwrap().state,
            TaskState::Pass
        );
    }

    #[test]
    fn console_logs_append_to_their_task() {
        let state = StateManager::new();
        state.collect_files(&sample_files());

        state.update_user_log(log_for(Some("3"), "first"));
        state.update_user_log(log_for(Some("3"), "second"));
        // Orphans are accepted without attribution.
        state.update_user_log(log_for(None, "orphan"));
        state.update_user_log(log_for(Some("no-such-task"), "orphan"));

        let b = state.files_for(["b.test"]).remove(0).unwrap();
        let logs = b.children()[0].logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].content, "first");
        assert_eq!(logs[1].content, "second");
    }

    #[test]
    fn failed_filepaths_is_empty_without_fail_results() {
        let state = StateManager::new();
        state.collect_files(&sample_files());
        state.update_tasks(&[TaskResultPack::new(
            "2",
            Some(TaskResult::from_state(TaskState::Pass)),
        )]);
        assert!(state.failed_filepaths().is_empty());
    }
}
