// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The duplex request/event bridge layered over an in-process channel.
//!
//! One [`Endpoint`] pair is created per dispatch unit. Each side splits its
//! endpoint into a [`BridgeHandle`] for outgoing traffic and a serving
//! future that feeds incoming frames to an [`RpcService`].

mod bridge;
mod endpoint;

pub use bridge::*;
pub use endpoint::*;
