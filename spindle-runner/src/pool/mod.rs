// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker pool: sizing, isolation and dispatch fan-out.
//!
//! The main structure in this module is [`WorkerPool`].

mod channel;
mod imp;
mod sizing;

pub use imp::*;
pub use sizing::*;
