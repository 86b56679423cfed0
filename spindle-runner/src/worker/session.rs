// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-invocation worker context.
//!
//! Everything a worker call site needs — the bridge to the orchestrator,
//! the module cache, the dispatch configuration — travels in one value
//! threaded explicitly through the runtime. There is no ambient worker
//! global to mutate.

use crate::{errors::RpcError, rpc::BridgeHandle};
use spindle_wire::{
    ModuleRecord, OrchestratorReply, ResolvedConfig, ResolvedModuleId, SnapshotRecord, SourceMap,
    TaskResultPack, TestFile, UserConsoleLog, WorkerEvent, WorkerRequest,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

/// Module records cached inside a worker.
///
/// Cloning shares the underlying cache: a worker slot keeps its cache
/// across dispatch units when isolation is off, and an isolated worker gets
/// a cache of its own.
#[derive(Clone, Debug, Default)]
pub struct ModuleCache {
    inner: Arc<Mutex<HashMap<String, ModuleRecord>>>,
}

impl ModuleCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the record for `id`, if present.
    pub fn evict(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Snapshot of the record for `id`.
    pub fn get(&self, id: &str) -> Option<ModuleRecord> {
        self.lock().get(id).cloned()
    }

    /// Stores a record.
    pub fn insert(&self, id: impl Into<String>, record: ModuleRecord) {
        self.lock().insert(id.into(), record);
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ModuleRecord>> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// The context one worker invocation runs with.
#[derive(Debug)]
pub struct WorkerSession {
    id: u32,
    config: ResolvedConfig,
    cache: ModuleCache,
    bridge: BridgeHandle,
}

impl WorkerSession {
    pub(crate) fn new(
        id: u32,
        config: ResolvedConfig,
        cache: ModuleCache,
        bridge: BridgeHandle,
    ) -> Self {
        Self {
            id,
            config,
            cache,
            bridge,
        }
    }

    /// Numeric id of this dispatch unit, unique within its batch.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The configuration this invocation runs under.
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// The worker's module cache.
    pub fn modules(&self) -> &ModuleCache {
        &self.cache
    }

    /// Fetches a module, consulting the worker-local cache first.
    pub async fn fetch_module(&self, id: &str) -> Result<ModuleRecord, RpcError> {
        if let Some(record) = self.cache.get(id) {
            return Ok(record);
        }
        match self
            .bridge
            .request(WorkerRequest::FetchModule { id: id.to_owned() })
            .await?
        {
            OrchestratorReply::Module { record } => {
                self.cache.insert(id, record.clone());
                Ok(record)
            }
            other => Err(mismatch("module", &other)),
        }
    }

    /// Resolves a module specifier relative to `importer`.
    pub async fn resolve_id(
        &self,
        id: &str,
        importer: Option<&str>,
    ) -> Result<Option<ResolvedModuleId>, RpcError> {
        match self
            .bridge
            .request(WorkerRequest::ResolveId {
                id: id.to_owned(),
                importer: importer.map(str::to_owned),
            })
            .await?
        {
            OrchestratorReply::Resolved { resolution } => Ok(resolution),
            other => Err(mismatch("resolved", &other)),
        }
    }

    /// Looks up the source map for a transformed module. `force` instructs
    /// the provider to drop any cached transform for the id first.
    pub async fn source_map(&self, id: &str, force: bool) -> Result<Option<SourceMap>, RpcError> {
        match self
            .bridge
            .request(WorkerRequest::SourceMap {
                id: id.to_owned(),
                force,
            })
            .await?
        {
            OrchestratorReply::SourceMap { map } => Ok(map),
            other => Err(mismatch("source-map", &other)),
        }
    }

    /// Reports incremental result patches.
    pub fn emit_task_update(&self, packs: Vec<TaskResultPack>) -> Result<(), RpcError> {
        self.bridge.emit(WorkerEvent::TaskUpdate { packs })
    }

    /// Reports captured console output.
    pub fn emit_console_log(&self, log: UserConsoleLog) -> Result<(), RpcError> {
        self.bridge.emit(WorkerEvent::ConsoleLog { log })
    }

    /// Notifies the snapshot sink that a snapshot file was written.
    pub fn emit_snapshot_saved(&self, snapshot: SnapshotRecord) -> Result<(), RpcError> {
        self.bridge.emit(WorkerEvent::SnapshotSaved { snapshot })
    }

    pub(crate) fn emit_collected(&self, files: Vec<TestFile>) -> Result<(), RpcError> {
        self.bridge.emit(WorkerEvent::Collected { files })
    }

    pub(crate) fn emit_finished(&self, files: Vec<TestFile>) -> Result<(), RpcError> {
        self.bridge.emit(WorkerEvent::Finished { files })
    }

    pub(crate) fn emit_worker_exit(&self, code: i32) -> Result<(), RpcError> {
        self.bridge.emit(WorkerEvent::WorkerExit { code })
    }
}

fn mismatch(expected: &str, got: &OrchestratorReply) -> RpcError {
    RpcError::protocol(format!(
        "expected `{expected}` reply, got `{}`",
        got.name()
    ))
}
