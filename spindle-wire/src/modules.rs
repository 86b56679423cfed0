// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Payloads for the module-resolution surface workers call back into.
//!
//! Workers hold no transform pipeline of their own. Source fetch, specifier
//! resolution and source-map lookup all round-trip to providers on the
//! orchestrator side; these are the records that cross the channel.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// A fetched module, ready for execution in a worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ModuleRecord {
    /// Executable source of the module.
    pub code: String,
    /// Source map produced by the transform, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<SourceMap>,
}

/// Outcome of resolving a module specifier against an importer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ResolvedModuleId {
    /// Resolved id the provider will accept in a subsequent fetch.
    pub id: String,
    /// True if the module is external to the transform pipeline.
    #[serde(default)]
    pub external: bool,
}

/// A standard source map, carried as structured data.
///
/// Field spellings follow the source-map format itself (camelCase), not the
/// kebab-case used elsewhere on the channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourceMap {
    /// Source-map format revision; 3 in practice.
    pub version: u32,
    /// Generated file name, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Original sources.
    pub sources: Vec<String>,
    /// Inline contents of `sources`, when embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,
    /// Symbol names referenced by `mappings`.
    #[serde(default)]
    pub names: Vec<String>,
    /// VLQ-encoded mappings.
    pub mappings: String,
}

/// Snapshot-run summary forwarded to the persistence sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SnapshotRecord {
    /// Test file the snapshots belong to.
    pub filepath: Utf8PathBuf,
    /// Snapshots written for the first time.
    pub added: u32,
    /// Snapshots that matched their stored value.
    pub matched: u32,
    /// Snapshots rewritten under an update run.
    pub updated: u32,
    /// Stored snapshots no test asserted against.
    pub unchecked: u32,
}
