// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The orchestrator side of one dispatch channel.
//!
//! Every worker callback has its mirror here: requests forward to the
//! module and source-map providers, progress events apply to the state
//! manager first and the reporter second, and a worker exit signal becomes
//! a typed fault on the pool's fault channel instead of a process exit.

use crate::{
    errors::{ProviderError, WorkerFault},
    pool::{PoolContext, RunId},
    reporter::RunnerEvent,
    rpc::RpcService,
};
use spindle_wire::{OrchestratorReply, WireError, WorkerEvent, WorkerRequest};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

pub(super) struct ChannelService {
    run_id: RunId,
    worker_id: u32,
    ctx: Arc<PoolContext>,
    faults: UnboundedSender<WorkerFault>,
}

impl ChannelService {
    pub(super) fn new(
        run_id: RunId,
        worker_id: u32,
        ctx: Arc<PoolContext>,
        faults: UnboundedSender<WorkerFault>,
    ) -> Self {
        Self {
            run_id,
            worker_id,
            ctx,
            faults,
        }
    }

    fn report(&self, event: RunnerEvent) {
        self.ctx.reporter.report(event);
    }
}

fn wire(err: ProviderError) -> WireError {
    WireError::new(err.to_string())
}

impl RpcService for ChannelService {
    async fn handle_request(&mut self, req: WorkerRequest) -> Result<OrchestratorReply, WireError> {
        match req {
            WorkerRequest::FetchModule { id } => self
                .ctx
                .modules
                .fetch_module(&id)
                .await
                .map(|record| OrchestratorReply::Module { record })
                .map_err(wire),
            WorkerRequest::ResolveId { id, importer } => self
                .ctx
                .modules
                .resolve_id(&id, importer.as_deref())
                .await
                .map(|resolution| OrchestratorReply::Resolved { resolution })
                .map_err(wire),
            WorkerRequest::SourceMap { id, force } => self
                .ctx
                .source_maps
                .source_map(&id, force)
                .await
                .map(|map| OrchestratorReply::SourceMap { map })
                .map_err(wire),
        }
    }

    async fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Collected { files } => {
                self.ctx.state.collect_files(&files);
                self.report(RunnerEvent::Collected {
                    run_id: self.run_id,
                    worker_id: self.worker_id,
                    files,
                });
            }
            WorkerEvent::TaskUpdate { packs } => {
                self.ctx.state.update_tasks(&packs);
                self.report(RunnerEvent::TaskUpdate {
                    run_id: self.run_id,
                    worker_id: self.worker_id,
                    packs,
                });
            }
            WorkerEvent::ConsoleLog { log } => {
                self.ctx.state.update_user_log(log.clone());
                self.report(RunnerEvent::UserConsoleLog {
                    run_id: self.run_id,
                    worker_id: self.worker_id,
                    log,
                });
            }
            WorkerEvent::Finished { files } => {
                self.report(RunnerEvent::Finished {
                    run_id: self.run_id,
                    worker_id: self.worker_id,
                    files,
                });
            }
            WorkerEvent::SnapshotSaved { snapshot } => {
                self.ctx.snapshots.snapshot_saved(snapshot);
            }
            WorkerEvent::WorkerExit { code } => {
                debug!(worker_id = self.worker_id, code, "worker signalled exit");
                // The receiver going away mid-teardown is fine; the fault
                // has nowhere left to propagate to.
                let _ = self.faults.send(WorkerFault {
                    worker_id: self.worker_id,
                    code,
                });
            }
        }
    }
}
