// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contracts for the collaborators the orchestrator serves worker requests
//! from.
//!
//! One instance of each provider backs every worker channel at once, so
//! implementations must tolerate concurrent calls.

use crate::errors::ProviderError;
use futures::future::BoxFuture;
use spindle_wire::{ModuleRecord, ResolvedModuleId, SnapshotRecord, SourceMap};

/// Source of executable module records.
pub trait ModuleProvider: Send + Sync {
    /// Fetches the module for `id`.
    fn fetch_module<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<ModuleRecord, ProviderError>>;

    /// Resolves `id` relative to `importer`.
    ///
    /// `Ok(None)` means the specifier is unknown to the pipeline, which is
    /// not an error.
    fn resolve_id<'a>(
        &'a self,
        id: &'a str,
        importer: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<ResolvedModuleId>, ProviderError>>;
}

/// Source of source maps for transformed modules.
pub trait SourceMapProvider: Send + Sync {
    /// Returns the map for `id`, or `None` when the module has no
    /// transform. `force_invalidate` instructs the provider to drop any
    /// cached transform for `id` before recomputing.
    fn source_map<'a>(
        &'a self,
        id: &'a str,
        force_invalidate: bool,
    ) -> BoxFuture<'a, Result<Option<SourceMap>, ProviderError>>;
}

/// Sink for snapshot-write notifications. Fire-and-forget: there is no
/// response and no failure channel.
pub trait SnapshotSink: Send + Sync {
    /// Records that a snapshot file was written.
    fn snapshot_saved(&self, record: SnapshotRecord);
}

/// Provider with no modules: every fetch fails, every resolution is `None`.
#[derive(Debug, Default)]
pub struct NoopModuleProvider;

impl ModuleProvider for NoopModuleProvider {
    fn fetch_module<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<ModuleRecord, ProviderError>> {
        Box::pin(async move {
            Err(ProviderError::NotFound {
                id: id.to_owned(),
            })
        })
    }

    fn resolve_id<'a>(
        &'a self,
        _id: &'a str,
        _importer: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<ResolvedModuleId>, ProviderError>> {
        Box::pin(async { Ok(None) })
    }
}

/// Provider with no source maps.
#[derive(Debug, Default)]
pub struct NoopSourceMapProvider;

impl SourceMapProvider for NoopSourceMapProvider {
    fn source_map<'a>(
        &'a self,
        _id: &'a str,
        _force_invalidate: bool,
    ) -> BoxFuture<'a, Result<Option<SourceMap>, ProviderError>> {
        Box::pin(async { Ok(None) })
    }
}

/// Sink that drops every snapshot notification.
#[derive(Debug, Default)]
pub struct NoopSnapshotSink;

impl SnapshotSink for NoopSnapshotSink {
    fn snapshot_saved(&self, _record: SnapshotRecord) {}
}
