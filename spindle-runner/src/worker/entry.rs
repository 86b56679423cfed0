// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote entry points for one dispatch unit.
//!
//! The pool invokes exactly one of these per dispatch. They are the only
//! code that runs on the worker side of a channel: collect the unit's
//! files, emit the trees in one batch, execute them (in run mode), and
//! report completion.

use crate::{
    errors::{EngineError, RpcError, UnsupportedEnvironmentError, WorkerRunError},
    rpc::{Endpoint, NoopService, bridge},
    worker::{ModuleCache, TestEngine, WorkerSession},
};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use spindle_wire::{ResolvedConfig, TestFile};
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// Context for one worker invocation.
///
/// Created once per dispatch unit by the pool and owned exclusively by the
/// worker for the duration of one run. Immutable after send; `invalidates`
/// is consumed once, before the first file runs.
#[derive(Debug)]
pub struct WorkerContext {
    /// The worker end of the dispatch channel.
    pub endpoint: Endpoint,
    /// Resolved configuration for the run.
    pub config: ResolvedConfig,
    /// Files in this dispatch unit.
    pub files: Vec<Utf8PathBuf>,
    /// Module ids to evict from the worker's cache before running.
    pub invalidates: Vec<String>,
    /// Numeric id, unique within the batch.
    pub id: u32,
}

/// Directive naming a file's environment, e.g. `// @test-environment sandbox`.
static ENVIRONMENT_DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@test-environment\s+?([\w-]+)\b").expect("regex is valid"));

/// Runs the dispatch unit's files: collect, execute, report completion.
pub async fn run(
    ctx: WorkerContext,
    cache: ModuleCache,
    engine: Arc<dyn TestEngine>,
) -> Result<(), WorkerRunError> {
    execute(ctx, cache, engine, Mode::Run).await
}

/// Collects the dispatch unit's files without running them.
pub async fn collect(
    ctx: WorkerContext,
    cache: ModuleCache,
    engine: Arc<dyn TestEngine>,
) -> Result<(), WorkerRunError> {
    execute(ctx, cache, engine, Mode::Collect).await
}

#[derive(Clone, Copy)]
enum Mode {
    Run,
    Collect,
}

async fn execute(
    ctx: WorkerContext,
    cache: ModuleCache,
    engine: Arc<dyn TestEngine>,
    mode: Mode,
) -> Result<(), WorkerRunError> {
    let WorkerContext {
        endpoint,
        config,
        files,
        invalidates,
        id,
    } = ctx;
    let (handle, pump) = bridge(endpoint, NoopService);
    let session = WorkerSession::new(id, config, cache, handle);

    // Invalidated modules and the unit's own files must be fetched fresh;
    // the eviction list is consumed once, before any file runs.
    for module in &invalidates {
        session.modules().evict(module);
    }
    for file in &files {
        session.modules().evict(file.as_str());
    }

    let work = async {
        let result = run_files(&session, engine.as_ref(), &files, mode).await;
        if let Err(WorkerRunError::Engine(EngineError::Aborted { code })) = &result {
            // Terminal fault: signal the orchestrator before the invocation
            // fails.
            let _ = session.emit_worker_exit(*code);
        }
        result
    };

    tokio::pin!(work);
    tokio::pin!(pump);
    tokio::select! {
        result = &mut work => result,
        pumped = &mut pump => {
            // The orchestrator side went away while we were still running.
            Err(match pumped {
                Ok(()) => RpcError::ChannelClosed.into(),
                Err(err) => err.into(),
            })
        }
    }
}

async fn run_files(
    session: &WorkerSession,
    engine: &dyn TestEngine,
    files: &[Utf8PathBuf],
    mode: Mode,
) -> Result<(), WorkerRunError> {
    let mut collected = Vec::with_capacity(files.len());
    for filepath in files {
        let environment = file_environment(session.config(), engine, filepath).await?;
        debug!(%filepath, environment = %environment, "collecting file");
        let file = engine.collect(filepath, &environment, session).await?;
        collected.push((file, environment));
    }
    // The whole batch's trees ship once, before any result flows, so the
    // orchestrator has indexed every id a later update can reference.
    session.emit_collected(collected.iter().map(|(file, _)| file.clone()).collect())?;

    let finished: Vec<TestFile> = match mode {
        Mode::Collect => collected.into_iter().map(|(file, _)| file).collect(),
        Mode::Run => {
            let mut finished = Vec::with_capacity(collected.len());
            for (file, environment) in collected {
                debug!(filepath = %file.filepath, "running file");
                let file = engine.run(file, &environment, session).await?;
                finished.push(file);
            }
            finished
        }
    };
    session.emit_finished(finished)?;
    Ok(())
}

/// Determines the environment `filepath` runs under: an explicit
/// `@test-environment` directive in the source wins, then the configured
/// default. An environment outside the engine's supported set is fatal
/// here — the file is about to run.
async fn file_environment(
    config: &ResolvedConfig,
    engine: &dyn TestEngine,
    filepath: &Utf8Path,
) -> Result<String, WorkerRunError> {
    let path = if filepath.is_absolute() {
        filepath.to_owned()
    } else {
        config.root.join(filepath)
    };
    let source =
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| WorkerRunError::ReadFile {
                filepath: filepath.to_owned(),
                source,
            })?;

    let environment = ENVIRONMENT_DIRECTIVE
        .captures(&source)
        .map(|captures| captures[1].to_owned())
        .unwrap_or_else(|| config.environment.clone());
    if !engine.environments().contains(&environment.as_str()) {
        return Err(
            UnsupportedEnvironmentError::new(environment, engine.environments().iter().copied())
                .into(),
        );
    }
    Ok(environment)
}
