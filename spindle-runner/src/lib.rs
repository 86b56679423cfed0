// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core orchestration for spindle: fan test files out across a pool of
//! parallel workers, bridge each worker's callbacks over a dedicated duplex
//! channel, and merge every worker's incremental progress into one queryable
//! view of run state.
//!
//! The crate deliberately stops at its seams. Source transformation,
//! environment emulation, snapshot persistence and report rendering are
//! collaborators behind the traits in [`providers`], [`reporter`] and
//! [`worker`]; this crate owns scheduling, transport and state.

pub mod config;
pub mod errors;
mod helpers;
pub mod pool;
pub mod providers;
pub mod reporter;
pub mod rpc;
pub mod state;
pub mod worker;
