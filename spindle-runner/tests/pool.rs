// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the worker pool: fan-out, isolation, the
//! single-worker batch mode, fault propagation, and the state the pool
//! leaves behind.

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::{Utf8TempDir, tempdir};
use chrono::Local;
use futures::future::BoxFuture;
use pretty_assertions::assert_eq;
use spindle_runner::{
    errors::{DispatchError, EngineError, ProviderError, WorkerRunError},
    pool::{PoolContext, WorkerPool},
    providers::{ModuleProvider, NoopSnapshotSink, NoopSourceMapProvider},
    reporter::{Reporter, RunnerEvent},
    state::StateManager,
    worker::{TestEngine, WorkerSession},
};
use spindle_wire::{
    ConsoleStream, ModuleRecord, ResolvedConfig, ResolvedModuleId, Task, TaskFailure, TaskId,
    TaskResult, TaskResultPack, TaskState, TestFile, UserConsoleLog,
};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Serves a record for any module id and counts fetches, so worker-side
/// cache behavior is observable from the outside.
#[derive(Debug, Default)]
struct CountingModuleProvider {
    fetches: AtomicUsize,
}

impl CountingModuleProvider {
    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ModuleProvider for CountingModuleProvider {
    fn fetch_module<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<ModuleRecord, ProviderError>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(ModuleRecord {
                code: format!("module {id}"),
                map: None,
            })
        })
    }

    fn resolve_id<'a>(
        &'a self,
        id: &'a str,
        _importer: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<ResolvedModuleId>, ProviderError>> {
        Box::pin(async move {
            Ok(Some(ResolvedModuleId {
                id: id.to_owned(),
                external: false,
            }))
        })
    }
}

/// Records every event it is handed.
#[derive(Debug, Default)]
struct RecordingReporter {
    events: Mutex<Vec<RunnerEvent>>,
}

impl RecordingReporter {
    fn events(&self) -> Vec<RunnerEvent> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, name: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, event: RunnerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Engine scripted by file name: `*fails*` produces a failing test,
/// `*crashes*` errors during the run, `*aborts*` aborts the whole worker
/// with exit code 7. Every collection pulls `helpers/common` through the
/// worker's module cache.
#[derive(Debug, Default)]
struct ScriptedEngine;

impl TestEngine for ScriptedEngine {
    fn environments(&self) -> &[&str] {
        &["native", "sandbox"]
    }

    fn collect<'a>(
        &'a self,
        filepath: &'a Utf8Path,
        _environment: &'a str,
        session: &'a WorkerSession,
    ) -> BoxFuture<'a, Result<TestFile, EngineError>> {
        Box::pin(async move {
            session
                .fetch_module("helpers/common")
                .await
                .map_err(EngineError::from)?;
            let stem = filepath.file_stem().unwrap_or("file");
            Ok(TestFile::new(
                format!("file:{stem}"),
                filepath.to_owned(),
                vec![Task::Test {
                    id: TaskId::new(format!("{stem}::works")),
                    name: "works".to_owned(),
                    result: None,
                }],
            ))
        })
    }

    fn run<'a>(
        &'a self,
        mut file: TestFile,
        _environment: &'a str,
        session: &'a WorkerSession,
    ) -> BoxFuture<'a, Result<TestFile, EngineError>> {
        Box::pin(async move {
            let name = file.filepath.as_str();
            if name.contains("aborts") {
                return Err(EngineError::Aborted { code: 7 });
            }
            if name.contains("crashes") {
                return Err(EngineError::Failed {
                    filepath: file.filepath.clone(),
                    message: "irrecoverable".to_owned(),
                });
            }

            let failing = name.contains("fails");
            let state = if failing {
                TaskState::Fail
            } else {
                TaskState::Pass
            };
            let Task::Test { id, result, .. } = &mut file.tasks[0] else {
                unreachable!("scripted trees hold a single test");
            };
            let task_result = TaskResult {
                state,
                duration: Some(Duration::from_millis(1)),
                error: failing.then(|| TaskFailure {
                    message: "assertion failed".to_owned(),
                    location: None,
                }),
            };
            *result = Some(task_result.clone());

            session
                .emit_console_log(UserConsoleLog {
                    task_id: Some(id.clone()),
                    content: "hello from the test\n".to_owned(),
                    stream: ConsoleStream::Stdout,
                    time: Local::now().fixed_offset(),
                })
                .map_err(EngineError::from)?;
            session
                .emit_task_update(vec![TaskResultPack::new(id.clone(), Some(task_result))])
                .map_err(EngineError::from)?;

            file.result = Some(TaskResult::from_state(state));
            Ok(file)
        })
    }
}

struct Harness {
    _dir: Utf8TempDir,
    root: Utf8PathBuf,
    state: Arc<StateManager>,
    modules: Arc<CountingModuleProvider>,
    reporter: Arc<RecordingReporter>,
    pool: WorkerPool,
}

fn harness(files: &[&str], configure: impl FnOnce(&mut ResolvedConfig)) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let dir = tempdir().expect("tempdir is creatable");
    for name in files {
        std::fs::write(dir.path().join(name), "// spindle test fixture\n")
            .expect("fixture is writable");
    }

    let mut config = ResolvedConfig::new(dir.path().to_owned());
    configure(&mut config);

    let state = Arc::new(StateManager::new());
    let modules = Arc::new(CountingModuleProvider::default());
    let reporter = Arc::new(RecordingReporter::default());
    let pool = WorkerPool::new(
        config,
        Arc::new(ScriptedEngine),
        PoolContext {
            state: Arc::clone(&state),
            modules: Arc::clone(&modules) as Arc<dyn ModuleProvider>,
            source_maps: Arc::new(NoopSourceMapProvider),
            snapshots: Arc::new(NoopSnapshotSink),
            reporter: Arc::clone(&reporter) as Arc<dyn Reporter>,
        },
    )
    .expect("pool bounds are valid");

    Harness {
        root: dir.path().to_owned(),
        _dir: dir,
        state,
        modules,
        reporter,
        pool,
    }
}

fn paths(names: &[&str]) -> Vec<Utf8PathBuf> {
    names.iter().map(|name| Utf8PathBuf::from(*name)).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn fan_out_runs_every_file_once() {
    let h = harness(&["alpha.rs", "beta.rs", "gamma.rs"], |config| {
        config.max_workers = Some(2);
    });
    h.pool
        .run_tests(paths(&["alpha.rs", "beta.rs", "gamma.rs"]), vec![])
        .await
        .unwrap();

    assert_eq!(h.state.filepaths().len(), 3);
    assert!(h.state.failed_filepaths().is_empty());
    assert_eq!(h.reporter.count("collected"), 3);
    assert_eq!(h.reporter.count("finished"), 3);

    // Within each dispatch unit, collection precedes updates precedes
    // completion; the transport does not reorder.
    for worker_id in 1..=3 {
        let names: Vec<&str> = h
            .reporter
            .events()
            .iter()
            .filter(|event| event.worker_id() == worker_id)
            .map(RunnerEvent::name)
            .collect();
        assert_eq!(names.first(), Some(&"collected"), "worker {worker_id}");
        assert_eq!(names.last(), Some(&"finished"), "worker {worker_id}");
    }

    // Incremental packs were patched into the collected trees, and console
    // output was attributed to its task.
    let alpha = h.state.files_for(["alpha.rs"]).remove(0).unwrap();
    let test = &alpha.children()[0];
    assert_eq!(test.result().unwrap().state, TaskState::Pass);
    assert_eq!(test.logs().len(), 1);
    assert_eq!(test.logs()[0].content, "hello from the test\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_tests_mark_files_failed_without_failing_the_batch() {
    let h = harness(&["alpha.rs", "fails.rs"], |_| {});
    h.pool
        .run_tests(paths(&["alpha.rs", "fails.rs"]), vec![])
        .await
        .unwrap();

    assert_eq!(h.state.failed_filepaths(), vec!["fails.rs"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn a_crashing_file_fails_the_batch_but_state_survives() {
    let h = harness(&["alpha.rs", "crashes.rs"], |config| {
        config.max_workers = Some(1);
    });
    let err = h
        .pool
        .run_tests(paths(&["alpha.rs", "crashes.rs"]), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Worker { .. }), "{err:?}");

    // The crashing file was collected before its run failed: its tree is
    // queryable, carries no result, and nothing in the state layer raised.
    let crashed = h.state.files_for(["crashes.rs"]).remove(0).unwrap();
    assert!(crashed.result().is_none());
    assert!(crashed.children()[0].result().is_none());
    // The healthy sibling's aggregated state also survived the failure.
    assert!(h.state.files_for(["alpha.rs"]).remove(0).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_abort_surfaces_a_typed_fault() {
    let h = harness(&["aborts.rs"], |_| {});
    let err = h
        .pool
        .run_tests(paths(&["aborts.rs"]), vec![])
        .await
        .unwrap_err();

    // The abort reaches the caller either as the typed fault (the exit
    // event won the race) or as the failed invocation itself.
    match err {
        DispatchError::Fault(fault) => {
            assert_eq!(fault.worker_id, 1);
            assert_eq!(fault.code, 7);
        }
        DispatchError::Worker {
            source: WorkerRunError::Engine(EngineError::Aborted { code }),
            ..
        } => assert_eq!(code, 7),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn disabling_parallelism_batches_every_file_into_one_worker() {
    let h = harness(&["alpha.rs", "beta.rs", "gamma.rs"], |config| {
        config.parallel = false;
    });
    h.pool
        .run_tests(paths(&["alpha.rs", "beta.rs", "gamma.rs"]), vec![])
        .await
        .unwrap();

    let events = h.reporter.events();
    let collected: Vec<&RunnerEvent> = events
        .iter()
        .filter(|event| event.name() == "collected")
        .collect();
    assert_eq!(collected.len(), 1);
    let RunnerEvent::Collected {
        files, worker_id, ..
    } = collected[0]
    else {
        unreachable!();
    };
    assert_eq!(*worker_id, 1);
    assert_eq!(files.len(), 3);
    assert_eq!(h.reporter.count("finished"), 1);
    assert_eq!(h.state.filepaths().len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn shared_workers_keep_their_module_cache_across_batches() {
    let h = harness(&["alpha.rs"], |config| {
        config.isolate = false;
        config.max_workers = Some(1);
    });
    h.pool.run_tests(paths(&["alpha.rs"]), vec![]).await.unwrap();
    h.pool.run_tests(paths(&["alpha.rs"]), vec![]).await.unwrap();

    // `helpers/common` was fetched once, then served from the slot's cache.
    assert_eq!(h.modules.fetch_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn isolated_workers_start_with_a_cold_cache() {
    let h = harness(&["alpha.rs"], |_| {});
    h.pool.run_tests(paths(&["alpha.rs"]), vec![]).await.unwrap();
    h.pool.run_tests(paths(&["alpha.rs"]), vec![]).await.unwrap();

    assert_eq!(h.modules.fetch_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalidation_evicts_shared_cache_entries() {
    let h = harness(&["alpha.rs"], |config| {
        config.isolate = false;
        config.max_workers = Some(1);
    });
    h.pool.run_tests(paths(&["alpha.rs"]), vec![]).await.unwrap();
    h.pool
        .run_tests(paths(&["alpha.rs"]), vec!["helpers/common".to_owned()])
        .await
        .unwrap();

    assert_eq!(h.modules.fetch_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn collect_tests_reports_trees_without_results() {
    let h = harness(&["alpha.rs", "fails.rs"], |_| {});
    h.pool
        .collect_tests(paths(&["alpha.rs", "fails.rs"]), vec![])
        .await
        .unwrap();

    assert_eq!(h.reporter.count("task-update"), 0);
    assert_eq!(h.reporter.count("finished"), 2);
    assert_eq!(h.state.filepaths().len(), 2);
    assert!(h.state.failed_filepaths().is_empty());
    for file in h.state.files() {
        assert!(file.result().is_none());
        assert!(file.children()[0].result().is_none());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn close_rejects_new_batches() {
    let h = harness(&["alpha.rs"], |_| {});
    h.pool.close().await;
    let err = h
        .pool
        .run_tests(paths(&["alpha.rs"]), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::PoolClosed), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn environment_directives_override_the_configured_default() {
    let h = harness(&[], |_| {});
    std::fs::write(
        h.root.join("sandboxed.rs"),
        "// @test-environment sandbox\n",
    )
    .unwrap();

    h.pool
        .run_tests(paths(&["sandboxed.rs"]), vec![])
        .await
        .unwrap();
    assert_eq!(h.state.filepaths().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn unsupported_environments_fail_the_dispatch() {
    let h = harness(&[], |_| {});
    std::fs::write(h.root.join("exotic.rs"), "// @test-environment chrome\n").unwrap();

    let err = h
        .pool
        .run_tests(paths(&["exotic.rs"]), vec![])
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            DispatchError::Worker {
                source: WorkerRunError::Environment(_),
                ..
            }
        ),
        "{err:?}"
    );
    // Nothing was collected for the rejected file.
    assert!(h.state.files_for(["exotic.rs"]).remove(0).is_none());
}
