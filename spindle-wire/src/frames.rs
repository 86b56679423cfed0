// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The closed frame schema spoken on a worker channel.
//!
//! Exactly three frame kinds exist. Requests carry a correlation `seq` that
//! the peer echoes on the matching response; multiple requests may be in
//! flight at once and their responses may arrive in any order. Events carry
//! no acknowledgement at all. The operation sets are closed enums, so an
//! unknown operation name cannot be represented on a conforming channel.

use crate::{
    ModuleRecord, ResolvedModuleId, SnapshotRecord, SourceMap, TaskResultPack, TestFile,
    UserConsoleLog,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Revision of the frame schema.
///
/// In-process channels move typed [`Frame`] values and send no per-frame
/// version; transports that serialize frames are expected to exchange this
/// value once at channel setup and refuse mismatches.
pub const SCHEMA_VERSION: u32 = 1;

/// A single message on a worker channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Frame {
    /// An operation expecting a reply matched by `seq`.
    Request {
        /// Correlation id, unique among the sender's in-flight requests.
        seq: u64,
        /// The operation.
        req: WorkerRequest,
    },
    /// Reply to the request that carried the same `seq`.
    Response {
        /// Correlation id echoed from the request.
        seq: u64,
        /// The outcome; service-side failures cross as [`WireError`].
        reply: Result<OrchestratorReply, WireError>,
    },
    /// Fire-and-forget notification.
    Event {
        /// The notification.
        event: WorkerEvent,
    },
}

/// Operations a worker invokes on the orchestrator, awaiting a reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum WorkerRequest {
    /// Fetch an executable module record by id.
    FetchModule {
        /// Module id.
        id: String,
    },
    /// Resolve a module specifier relative to an importer.
    ResolveId {
        /// Specifier to resolve.
        id: String,
        /// Importing module, when resolution is relative.
        importer: Option<String>,
    },
    /// Look up the source map for a transformed module.
    SourceMap {
        /// Module id.
        id: String,
        /// Drop any cached transform for `id` before recomputing.
        force: bool,
    },
}

impl WorkerRequest {
    /// Operation name, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchModule { .. } => "fetch-module",
            Self::ResolveId { .. } => "resolve-id",
            Self::SourceMap { .. } => "source-map",
        }
    }
}

/// Successful replies, one variant per [`WorkerRequest`] variant.
///
/// A reply whose variant does not match its request's variant is a protocol
/// violation and fails the call deterministically on the requesting side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum OrchestratorReply {
    /// Reply to [`WorkerRequest::FetchModule`].
    Module {
        /// The fetched module.
        record: ModuleRecord,
    },
    /// Reply to [`WorkerRequest::ResolveId`].
    Resolved {
        /// The resolution, or `None` when the specifier is unknown.
        resolution: Option<ResolvedModuleId>,
    },
    /// Reply to [`WorkerRequest::SourceMap`].
    SourceMap {
        /// The map, or `None` when the module has no transform.
        map: Option<SourceMap>,
    },
}

impl OrchestratorReply {
    /// Reply name, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Module { .. } => "module",
            Self::Resolved { .. } => "resolved",
            Self::SourceMap { .. } => "source-map",
        }
    }
}

/// Notifications a worker emits toward the orchestrator.
///
/// Within one channel these are observed in emission order; the transport
/// never reorders. `Collected` for a file therefore always precedes any
/// `TaskUpdate` referencing ids from that file's subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum WorkerEvent {
    /// A batch of files finished collection; ships whole task trees.
    Collected {
        /// The collected trees.
        files: Vec<TestFile>,
    },
    /// Incremental result patches for already-collected tasks.
    TaskUpdate {
        /// The patches.
        packs: Vec<TaskResultPack>,
    },
    /// Console output captured during execution.
    ConsoleLog {
        /// The captured record.
        log: UserConsoleLog,
    },
    /// The dispatch unit ran to completion; final trees for the batch.
    Finished {
        /// The final trees.
        files: Vec<TestFile>,
    },
    /// A snapshot file was written.
    SnapshotSaved {
        /// Summary of the write.
        snapshot: SnapshotRecord,
    },
    /// The worker is terminating with the given exit code.
    WorkerExit {
        /// Exit code the worker would have terminated its process with.
        code: i32,
    },
}

impl WorkerEvent {
    /// Event name, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Collected { .. } => "collected",
            Self::TaskUpdate { .. } => "task-update",
            Self::ConsoleLog { .. } => "console-log",
            Self::Finished { .. } => "finished",
            Self::SnapshotSaved { .. } => "snapshot-saved",
            Self::WorkerExit { .. } => "worker-exit",
        }
    }
}

/// Serializable image of a service-side failure, carried on response frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
#[serde(deny_unknown_fields)]
pub struct WireError {
    /// Human-readable description of the failure.
    pub message: String,
}

impl WireError {
    /// Creates a wire error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
