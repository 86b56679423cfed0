// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fully-resolved run configuration.
///
/// Built once on the orchestrator side, shipped to each worker inside its
/// dispatch context, and immutable from then on. Workers never consult
/// ambient configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ResolvedConfig {
    /// Project root that test file paths are resolved against.
    pub root: Utf8PathBuf,
    /// Execution environment used when a file declares none.
    pub environment: String,
    /// Opaque options handed through to the environment implementation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_options: BTreeMap<String, serde_json::Value>,
    /// Whether files fan out to parallel workers at all. When false, every
    /// file in a batch runs through a single worker invocation.
    pub parallel: bool,
    /// Whether each dispatch unit gets a dedicated worker of its own.
    pub isolate: bool,
    /// Whether the run is hosted by a continuous watcher; affects worker
    /// sizing defaults.
    pub watch: bool,
    /// Explicit upper bound on concurrent workers; overrides the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    /// Explicit number of workers to keep warm; overrides the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_workers: Option<usize>,
}

impl ResolvedConfig {
    /// A configuration with defaults suitable for tests and embedding:
    /// parallel, isolated, not watching, sized automatically.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            environment: "native".to_owned(),
            environment_options: BTreeMap::new(),
            parallel: true,
            isolate: true,
            watch: false,
            max_workers: None,
            min_workers: None,
        }
    }
}
