// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{DispatchError, PoolBuildError, WorkerFault},
    pool::{PoolSize, channel::ChannelService},
    providers::{ModuleProvider, SnapshotSink, SourceMapProvider},
    reporter::Reporter,
    rpc::{Endpoint, bridge},
    state::StateManager,
    worker::{self, ModuleCache, TestEngine, WorkerContext},
};
use camino::Utf8PathBuf;
use debug_ignore::DebugIgnore;
use future_queue::StreamExt as _;
use futures::{StreamExt as _, stream};
use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use spindle_wire::ResolvedConfig;
use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Marker for run-batch ids.
pub enum RunIdKind {}

impl TypedUuidKind for RunIdKind {
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("spindle_run");
        TAG
    }
}

/// Unique id for one dispatch batch.
pub type RunId = TypedUuid<RunIdKind>;

/// What a dispatch unit asks its worker to do.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerMode {
    /// Collect and run the files.
    Run,
    /// Collect the files without running them.
    Collect,
}

impl WorkerMode {
    fn name(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Collect => "collect",
        }
    }
}

/// The orchestrator-side collaborators every dispatch channel serves from.
///
/// One instance backs all of a pool's channels concurrently.
pub struct PoolContext {
    /// The state manager progress events apply to.
    pub state: Arc<StateManager>,
    /// Source of module records for worker fetches.
    pub modules: Arc<dyn ModuleProvider>,
    /// Source of source maps for worker lookups.
    pub source_maps: Arc<dyn SourceMapProvider>,
    /// Sink for snapshot-write notifications.
    pub snapshots: Arc<dyn SnapshotSink>,
    /// Reporting sink, invoked after each state mutation.
    pub reporter: Arc<dyn Reporter>,
}

/// A pool of parallel workers executing test files.
///
/// Each batch fans out one dispatch unit per file (or, with parallelism
/// disabled, a single unit carrying the whole batch). Every unit gets a
/// dedicated channel pair, torn down on both ends once the unit settles.
#[derive(Debug)]
pub struct WorkerPool {
    config: Arc<ResolvedConfig>,
    size: PoolSize,
    engine: DebugIgnore<Arc<dyn TestEngine>>,
    ctx: DebugIgnore<Arc<PoolContext>>,
    slots: Option<SlotPool>,
    fault_tx: UnboundedSender<WorkerFault>,
    fault_rx: tokio::sync::Mutex<UnboundedReceiver<WorkerFault>>,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool over `engine` and the given collaborators.
    pub fn new(
        config: ResolvedConfig,
        engine: Arc<dyn TestEngine>,
        ctx: PoolContext,
    ) -> Result<Self, PoolBuildError> {
        let size = PoolSize::resolve(&config)?;
        // Worker state persists across dispatch units unless each unit is
        // isolated in a worker of its own. With parallelism disabled there
        // is exactly one worker, and it always keeps its state.
        let slots = if !config.parallel {
            Some(SlotPool::new(1, 1))
        } else if !config.isolate {
            Some(SlotPool::new(size.min(), size.max()))
        } else {
            None
        };
        let (fault_tx, fault_rx) = unbounded_channel();
        debug!(
            max = size.max(),
            min = size.min(),
            parallel = config.parallel,
            isolate = config.isolate,
            "built worker pool"
        );
        Ok(Self {
            config: Arc::new(config),
            size,
            engine: DebugIgnore(engine),
            ctx: DebugIgnore(Arc::new(ctx)),
            slots,
            fault_tx,
            fault_rx: tokio::sync::Mutex::new(fault_rx),
            closed: AtomicBool::new(false),
        })
    }

    /// The resolved worker bounds this pool runs with.
    pub fn size(&self) -> PoolSize {
        self.size
    }

    /// Runs `files`, one dispatch unit per file, bounded by the pool's
    /// worker count.
    ///
    /// `invalidates` names modules every worker must evict from its cache
    /// before running. The batch is fail-fast: the first failing unit fails
    /// the fan-out and in-flight siblings may be dropped. State already
    /// aggregated from other units stays queryable either way.
    pub async fn run_tests(
        &self,
        files: Vec<Utf8PathBuf>,
        invalidates: Vec<String>,
    ) -> Result<(), DispatchError> {
        self.run_with_files(WorkerMode::Run, files, invalidates)
            .await
    }

    /// Collects `files` into task trees without running them.
    pub async fn collect_tests(
        &self,
        files: Vec<Utf8PathBuf>,
        invalidates: Vec<String>,
    ) -> Result<(), DispatchError> {
        self.run_with_files(WorkerMode::Collect, files, invalidates)
            .await
    }

    /// Closes the pool.
    ///
    /// Best-effort: no new batches are accepted and idle worker state is
    /// dropped. In-flight dispatches settle on their own; close does not
    /// interrupt worker computation.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(slots) = &self.slots {
            slots.drain();
        }
    }

    async fn run_with_files(
        &self,
        mode: WorkerMode,
        files: Vec<Utf8PathBuf>,
        invalidates: Vec<String>,
    ) -> Result<(), DispatchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::PoolClosed);
        }
        let run_id = RunId::new_v4();
        debug!(%run_id, mode = mode.name(), files = files.len(), "dispatching batch");

        let mut faults = self.fault_rx.lock().await;
        // A fault that raced a previous batch's teardown has already failed
        // that batch or lost the race to its dispatch error; don't let it
        // fail this one.
        while let Ok(stale) = faults.try_recv() {
            warn!(%stale, "discarding stale worker fault");
        }

        // Ids are monotonic from 1 within the batch; uniqueness is only
        // required within a single channel's lifetime.
        let units: Vec<(u32, Vec<Utf8PathBuf>)> = if self.config.parallel {
            files
                .into_iter()
                .enumerate()
                .map(|(index, file)| (index as u32 + 1, vec![file]))
                .collect()
        } else {
            // Single-worker batch mode: every file in one invocation, still
            // through the full channel path.
            vec![(1, files)]
        };

        let queue = stream::iter(units.into_iter().map(|(worker_id, unit_files)| {
            let invalidates = invalidates.clone();
            (
                1,
                move |_| self.dispatch(run_id, mode, worker_id, unit_files, invalidates),
            )
        }))
        .future_queue(self.size.max());
        tokio::pin!(queue);

        loop {
            tokio::select! {
                fault = faults.recv() => {
                    // The pool always holds a sender, so this is `Some`.
                    if let Some(fault) = fault {
                        return Err(fault.into());
                    }
                }
                unit = queue.next() => match unit {
                    Some(result) => result?,
                    None => break,
                },
            }
        }
        Ok(())
    }

    /// Runs one dispatch unit to settlement.
    async fn dispatch(
        &self,
        run_id: RunId,
        mode: WorkerMode,
        worker_id: u32,
        files: Vec<Utf8PathBuf>,
        invalidates: Vec<String>,
    ) -> Result<(), DispatchError> {
        let (orch_end, worker_end) = Endpoint::pair();
        let service = ChannelService::new(
            run_id,
            worker_id,
            Arc::clone(&self.ctx),
            self.fault_tx.clone(),
        );
        let (_, serve) = bridge(orch_end, service);

        let cache = match &self.slots {
            Some(slots) => slots.checkout(),
            None => ModuleCache::new(),
        };
        let ctx = WorkerContext {
            endpoint: worker_end,
            config: (*self.config).clone(),
            files,
            invalidates,
            id: worker_id,
        };
        let engine = Arc::clone(&self.engine);
        let worker_cache = cache.clone();
        let mut handle = AbortOnDrop(tokio::spawn(async move {
            match mode {
                WorkerMode::Run => worker::run(ctx, worker_cache, engine).await,
                WorkerMode::Collect => worker::collect(ctx, worker_cache, engine).await,
            }
        }));

        // Serving the channel to completion is what guarantees every event
        // the worker emitted has been applied before the dispatch settles.
        // Both ends are torn down here whether the invocation succeeded or
        // not.
        let (serve_result, join_result) = tokio::join!(serve, &mut handle.0);

        if let Some(slots) = &self.slots {
            slots.restore(cache);
        }
        if let Err(err) = serve_result {
            warn!(worker_id, "dispatch channel closed uncleanly: {err}");
        }
        match join_result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(DispatchError::Worker { worker_id, source }),
            Err(source) => Err(DispatchError::Panicked { worker_id, source }),
        }
    }
}

/// Free list of reusable worker module caches.
///
/// Checking a cache out gives one dispatch unit exclusive use of that
/// worker state until it is restored; the fan-out bound keeps concurrent
/// checkouts at or below `cap`.
#[derive(Debug)]
struct SlotPool {
    free: Mutex<Vec<ModuleCache>>,
    created: AtomicUsize,
    cap: usize,
}

impl SlotPool {
    fn new(warm: usize, cap: usize) -> Self {
        Self {
            free: Mutex::new((0..warm).map(|_| ModuleCache::new()).collect()),
            created: AtomicUsize::new(warm),
            cap,
        }
    }

    fn checkout(&self) -> ModuleCache {
        if let Some(cache) = self.lock_free().pop() {
            return cache;
        }
        let created = self.created.fetch_add(1, Ordering::Relaxed);
        if created >= self.cap {
            // Only reachable when a cancelled dispatch lost its slot; a
            // replacement keeps the pool serviceable.
            debug!(created, cap = self.cap, "slot pool grew past its cap");
        }
        ModuleCache::new()
    }

    fn restore(&self, cache: ModuleCache) {
        self.lock_free().push(cache);
    }

    fn drain(&self) {
        self.lock_free().clear();
    }

    fn lock_free(&self) -> MutexGuard<'_, Vec<ModuleCache>> {
        self.free.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// Aborts the spawned worker if the dispatch future is dropped mid-flight,
/// which happens when a sibling unit fails the batch first.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
