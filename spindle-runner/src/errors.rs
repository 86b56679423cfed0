// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by spindle.

use camino::Utf8PathBuf;
use spindle_wire::WireError;
use thiserror::Error;
use tokio::task::JoinError;

/// An error that occurred while parsing a configuration document.
#[derive(Debug, Error)]
#[error("failed to parse spindle config")]
#[non_exhaustive]
pub struct ConfigParseError {
    #[source]
    err: toml::de::Error,
}

impl ConfigParseError {
    pub(crate) fn new(err: toml::de::Error) -> Self {
        Self { err }
    }
}

/// Error returned while parsing a worker-count value from a string.
#[derive(Clone, Debug, Error)]
#[error("unrecognized worker count: {input}\n(expected a non-zero integer or \"num-cpus\")")]
pub struct WorkerCountParseError {
    input: String,
}

impl WorkerCountParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error produced by the channel bridge.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcError {
    /// The transport closed with the call still outstanding. The bridge
    /// does not retry.
    #[error("channel closed with the call still outstanding")]
    ChannelClosed,

    /// The peer violated the frame protocol.
    #[error("protocol violation: {reason}")]
    Protocol {
        /// What the peer did wrong.
        reason: String,
    },

    /// The peer's service reported a failure for this call.
    #[error("remote service failed")]
    Remote {
        /// The failure as it crossed the channel.
        #[source]
        source: WireError,
    },
}

impl RpcError {
    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }
}

/// An error returned by a module or source-map provider.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// No module with the requested id exists.
    #[error("module not found: `{id}`")]
    NotFound {
        /// The id that failed to resolve.
        id: String,
    },

    /// The provider failed internally.
    #[error("provider failed: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

/// An error reported by the execution engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The engine aborted the whole worker invocation with an exit code.
    /// The worker runtime signals the orchestrator before failing.
    #[error("engine aborted with exit code {code}")]
    Aborted {
        /// Exit code the engine terminated with.
        code: i32,
    },

    /// A file failed in a way the engine cannot express as a test result.
    #[error("engine failed on `{filepath}`: {message}")]
    Failed {
        /// File being executed.
        filepath: Utf8PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The engine lost its channel to the orchestrator.
    #[error("engine lost its channel")]
    Rpc {
        /// The underlying channel error.
        #[from]
        source: RpcError,
    },
}

/// A requested execution environment is not in the engine's supported set.
///
/// Raised at the point the first file requiring the environment is about to
/// run. This is a fatal configuration error, not a per-test failure.
#[derive(Clone, Debug, Error)]
#[error("unsupported environment `{name}` (supported: {})", .supported.join(", "))]
pub struct UnsupportedEnvironmentError {
    name: String,
    supported: Vec<String>,
}

impl UnsupportedEnvironmentError {
    pub(crate) fn new(
        name: impl Into<String>,
        supported: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            supported: supported.into_iter().map(|s| s.into()).collect(),
        }
    }

    /// The environment name that was requested.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An error that failed one worker invocation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerRunError {
    /// Reading a test file from disk failed.
    #[error("failed to read `{filepath}`")]
    ReadFile {
        /// File that could not be read.
        filepath: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A file requested an environment the engine does not support.
    #[error(transparent)]
    Environment(#[from] UnsupportedEnvironmentError),

    /// The execution engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The channel to the orchestrator failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// A worker-originated terminal fault.
///
/// Where the worker would have torn its process down, the orchestrator
/// instead receives this typed signal and applies one top-level fault
/// policy: fail the batch that owns the worker.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("worker {worker_id} signalled exit with code {code}")]
pub struct WorkerFault {
    /// Numeric id of the dispatch unit that faulted.
    pub worker_id: u32,
    /// Exit code the worker signalled.
    pub code: i32,
}

/// An error that failed a `run_tests`/`collect_tests` batch.
///
/// Batches are fail-fast: the first failing dispatch unit fails the whole
/// fan-out, and sibling units still in flight may be dropped. State already
/// aggregated from other units remains queryable.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// A worker invocation failed.
    #[error("worker {worker_id} failed")]
    Worker {
        /// Numeric id of the failing dispatch unit.
        worker_id: u32,
        /// What failed inside the worker.
        #[source]
        source: WorkerRunError,
    },

    /// A worker invocation panicked or was aborted.
    #[error("worker {worker_id} did not run to completion")]
    Panicked {
        /// Numeric id of the failing dispatch unit.
        worker_id: u32,
        /// The join failure.
        #[source]
        source: JoinError,
    },

    /// A worker signalled a terminal fault.
    #[error(transparent)]
    Fault(#[from] WorkerFault),

    /// The pool was closed before the batch started.
    #[error("pool is closed")]
    PoolClosed,
}

/// An error building a worker pool.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum PoolBuildError {
    /// The configured bounds are contradictory.
    #[error("min-workers ({min}) exceeds max-workers ({max})")]
    InvalidBounds {
        /// Configured lower bound.
        min: usize,
        /// Configured upper bound.
        max: usize,
    },
}
