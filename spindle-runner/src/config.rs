// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run configuration: the user-facing overlay and its resolution.
//!
//! Discovery and merging of configuration files belong to the host; spindle
//! only parses documents it is explicitly handed and resolves the overlay
//! against defaults. The result is a [`ResolvedConfig`] that travels to
//! every worker inside its dispatch context.

use crate::{
    errors::{ConfigParseError, WorkerCountParseError},
    helpers::get_num_cpus,
};
use camino::Utf8PathBuf;
use serde::Deserialize;
use spindle_wire::ResolvedConfig;
use std::{cmp::Ordering, collections::BTreeMap, fmt, str::FromStr};

/// Type for the max-workers and min-workers config keys.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerCount {
    /// A fixed number of workers.
    Count(usize),

    /// A number of workers equal to the logical CPU count.
    NumCpus,
}

impl WorkerCount {
    /// Gets the actual number of workers computed at runtime.
    pub fn compute(self) -> usize {
        match self {
            Self::Count(workers) => workers,
            Self::NumCpus => get_num_cpus(),
        }
    }
}

impl FromStr for WorkerCount {
    type Err = WorkerCountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "num-cpus" {
            return Ok(Self::NumCpus);
        }

        match s.parse::<isize>() {
            Err(_) => Err(WorkerCountParseError::new(s)),
            Ok(0) => Err(WorkerCountParseError::new(s)),
            Ok(n) if n < 0 => Ok(WorkerCount::Count(
                (get_num_cpus() as isize + n).max(1) as usize,
            )),
            Ok(n) => Ok(WorkerCount::Count(n as usize)),
        }
    }
}

impl fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(workers) => write!(f, "{workers}"),
            Self::NumCpus => write!(f, "num-cpus"),
        }
    }
}

impl<'de> Deserialize<'de> for WorkerCount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = WorkerCount;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "an integer or the string \"num-cpus\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v == "num-cpus" {
                    Ok(WorkerCount::NumCpus)
                } else {
                    Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &self,
                    ))
                }
            }

            // Note that TOML uses i64, not u64.
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v.cmp(&0) {
                    Ordering::Greater => Ok(WorkerCount::Count(v as usize)),
                    Ordering::Less => Ok(WorkerCount::Count(
                        (get_num_cpus() as i64 + v).max(1) as usize,
                    )),
                    Ordering::Equal => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Signed(v),
                        &self,
                    )),
                }
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// User-facing configuration overlay.
///
/// Every field is optional; [`UserConfig::resolve`] applies defaults.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct UserConfig {
    /// Execution environment for files that declare none.
    pub environment: Option<String>,
    /// Opaque options handed to the environment implementation.
    pub environment_options: Option<BTreeMap<String, serde_json::Value>>,
    /// Fan files out to parallel workers. Disabling runs every file in a
    /// batch through one worker invocation.
    pub parallel: Option<bool>,
    /// Give each dispatch unit a dedicated worker.
    pub isolate: Option<bool>,
    /// The run is hosted by a continuous watcher.
    pub watch: Option<bool>,
    /// Upper bound on concurrent workers.
    pub max_workers: Option<WorkerCount>,
    /// Number of workers to keep warm.
    pub min_workers: Option<WorkerCount>,
}

impl UserConfig {
    /// Parses an explicitly-provided TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigParseError> {
        toml::from_str(input).map_err(ConfigParseError::new)
    }

    /// Resolves the overlay against defaults into the configuration shipped
    /// to workers.
    pub fn resolve(self, root: impl Into<Utf8PathBuf>) -> ResolvedConfig {
        ResolvedConfig {
            root: root.into(),
            environment: self.environment.unwrap_or_else(|| "native".to_owned()),
            environment_options: self.environment_options.unwrap_or_default(),
            parallel: self.parallel.unwrap_or(true),
            isolate: self.isolate.unwrap_or(true),
            watch: self.watch.unwrap_or(false),
            max_workers: self.max_workers.map(WorkerCount::compute),
            min_workers: self.min_workers.map(WorkerCount::compute),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("-1", Some(get_num_cpus() - 1); "negative")]
    #[test_case("2", Some(2); "positive")]
    #[test_case("0", None; "zero")]
    #[test_case("num-cpus", Some(get_num_cpus()); "num-cpus")]
    #[test_case("lots", None; "garbage")]
    fn parse_worker_count(input: &str, expected: Option<usize>) {
        match expected {
            Some(n) => assert_eq!(input.parse::<WorkerCount>().unwrap().compute(), n),
            None => assert!(input.parse::<WorkerCount>().is_err()),
        }
    }

    #[test]
    fn resolve_applies_defaults() {
        let config = UserConfig::default().resolve("/work");
        assert_eq!(config.root, "/work");
        assert_eq!(config.environment, "native");
        assert!(config.parallel);
        assert!(config.isolate);
        assert!(!config.watch);
        assert_eq!(config.max_workers, None);
        assert_eq!(config.min_workers, None);
    }

    #[test]
    fn parse_toml_overlay() {
        let config = UserConfig::from_toml_str(indoc! {r#"
            environment = "sandbox"
            isolate = false
            watch = true
            max-workers = 4
            min-workers = -1
        "#})
        .unwrap()
        .resolve("/work");

        assert_eq!(config.environment, "sandbox");
        assert!(!config.isolate);
        assert!(config.watch);
        assert_eq!(config.max_workers, Some(4));
        assert_eq!(config.min_workers, Some(get_num_cpus() - 1));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = UserConfig::from_toml_str("max-threads = 4").unwrap_err();
        assert!(err.to_string().contains("failed to parse"), "{err}");
    }
}
