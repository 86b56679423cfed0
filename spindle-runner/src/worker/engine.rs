// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::EngineError, worker::WorkerSession};
use camino::Utf8Path;
use futures::future::BoxFuture;
use spindle_wire::TestFile;

/// The execution engine a worker runs files against.
///
/// Everything spindle treats as external lives behind this trait: turning a
/// file into a task tree, executing the tree under an emulated environment,
/// and producing results. Engines reach the orchestrator — module records,
/// source maps, incremental progress — only through the [`WorkerSession`]
/// they are handed; they never touch a channel directly.
pub trait TestEngine: Send + Sync {
    /// Environment names this engine can execute under.
    fn environments(&self) -> &[&str];

    /// Collects `filepath` into a task tree without running anything.
    fn collect<'a>(
        &'a self,
        filepath: &'a Utf8Path,
        environment: &'a str,
        session: &'a WorkerSession,
    ) -> BoxFuture<'a, Result<TestFile, EngineError>>;

    /// Runs a previously-collected tree, reporting incremental results and
    /// console output through the session, and returns the finished tree.
    fn run<'a>(
        &'a self,
        file: TestFile,
        environment: &'a str,
        session: &'a WorkerSession,
    ) -> BoxFuture<'a, Result<TestFile, EngineError>>;
}
