// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker runtime: the remote entry points a dispatch unit invokes, the
//! session context threaded through every call, and the execution-engine
//! boundary.

mod engine;
mod entry;
mod session;

pub use engine::*;
pub use entry::*;
pub use session::*;
