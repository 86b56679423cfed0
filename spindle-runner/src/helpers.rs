// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::LazyLock;
use tracing::warn;

/// Returns the number of logical CPUs, computed once per process.
pub(crate) fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}
