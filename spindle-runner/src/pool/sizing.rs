// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::PoolBuildError, helpers::get_num_cpus};
use spindle_wire::ResolvedConfig;

/// Resolved worker bounds for one pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolSize {
    max: usize,
    min: usize,
}

impl PoolSize {
    /// Computes bounds from configuration.
    ///
    /// Watch runs keep half the logical CPUs free for re-runs; batch runs
    /// leave one CPU for the orchestrator. Explicit bounds override the
    /// defaults, and the result never drops below one worker.
    pub fn resolve(config: &ResolvedConfig) -> Result<Self, PoolBuildError> {
        let default = if config.watch {
            (get_num_cpus() / 2).max(1)
        } else {
            get_num_cpus().saturating_sub(1).max(1)
        };

        let max = config.max_workers.unwrap_or(default).max(1);
        let min = match config.min_workers {
            Some(min) if min > max => {
                return Err(PoolBuildError::InvalidBounds { min, max });
            }
            Some(min) => min.max(1),
            None => default.min(max),
        };
        Ok(Self { max, min })
    }

    /// Upper bound on concurrently-running workers; the fan-out width.
    pub fn max(self) -> usize {
        self.max
    }

    /// Number of workers kept warm between dispatches.
    pub fn min(self) -> usize {
        self.min
    }
}
