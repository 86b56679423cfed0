// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use spindle_wire::Frame;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// One end of an in-process duplex channel.
///
/// Frames posted on one end arrive on the other in order, without loss or
/// duplication, until either end is dropped. An endpoint is exclusively
/// owned by the (dispatch unit, worker) pair that created it and is never
/// reused across dispatches.
#[derive(Debug)]
pub struct Endpoint {
    tx: UnboundedSender<Frame>,
    rx: UnboundedReceiver<Frame>,
}

impl Endpoint {
    /// Creates a connected pair of endpoints.
    pub fn pair() -> (Endpoint, Endpoint) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();
        (
            Endpoint {
                tx: left_tx,
                rx: left_rx,
            },
            Endpoint {
                tx: right_tx,
                rx: right_rx,
            },
        )
    }

    pub(crate) fn split(self) -> (UnboundedSender<Frame>, UnboundedReceiver<Frame>) {
        (self.tx, self.rx)
    }
}
