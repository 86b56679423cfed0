// Copyright (c) The spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::RpcError, rpc::Endpoint};
use spindle_wire::{Frame, OrchestratorReply, WireError, WorkerEvent, WorkerRequest};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::{mpsc::UnboundedSender, oneshot};
use tracing::{debug, warn};

/// What a bridge does with the frames its peer sends.
///
/// Requests may be answered asynchronously, but implementations must not
/// park the serving task on long-running work: every frame queued behind the
/// one being handled waits for the handler to return. Events are handled
/// strictly in arrival order, which is what preserves the collected-before-
/// updated ordering within one channel.
pub trait RpcService {
    /// Handles one request and produces its reply.
    async fn handle_request(
        &mut self,
        req: WorkerRequest,
    ) -> Result<OrchestratorReply, WireError>;

    /// Handles one event. Events have no reply.
    async fn handle_event(&mut self, event: WorkerEvent);
}

/// Service for a side that expects no incoming requests or events.
///
/// Requests are answered with a wire error; events are logged and dropped.
#[derive(Debug, Default)]
pub struct NoopService;

impl RpcService for NoopService {
    async fn handle_request(&mut self, req: WorkerRequest) -> Result<OrchestratorReply, WireError> {
        warn!(op = req.name(), "request arrived at a side with no service");
        Err(WireError::new(format!(
            "operation `{}` is not served on this side of the channel",
            req.name()
        )))
    }

    async fn handle_event(&mut self, event: WorkerEvent) {
        debug!(op = event.name(), "event dropped by noop service");
    }
}

type ReplySender = oneshot::Sender<Result<OrchestratorReply, RpcError>>;

#[derive(Debug)]
struct Shared {
    next_seq: AtomicU64,
    pending: Mutex<HashMap<u64, ReplySender>>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, ReplySender>> {
        self.pending.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn take(&self, seq: u64) -> Option<ReplySender> {
        self.pending().remove(&seq)
    }
}

/// Handle for invoking the peer: typed requests and fire-and-forget events.
///
/// Cheap to clone; all clones share one correlation-id space.
#[derive(Clone, Debug)]
pub struct BridgeHandle {
    tx: UnboundedSender<Frame>,
    shared: Arc<Shared>,
}

impl BridgeHandle {
    /// Invokes `req` on the peer and awaits the reply.
    ///
    /// Any number of calls may be in flight at once; replies are matched by
    /// correlation id and may resolve in any order. If the transport closes
    /// first, the call fails with [`RpcError::ChannelClosed`].
    pub async fn request(&self, req: WorkerRequest) -> Result<OrchestratorReply, RpcError> {
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();

        // Register before posting so a fast peer cannot reply into a void.
        self.shared.pending().insert(seq, reply_tx);
        if self.tx.send(Frame::Request { seq, req }).is_err() {
            self.shared.take(seq);
            return Err(RpcError::ChannelClosed);
        }

        match reply_rx.await {
            Ok(reply) => reply,
            // The serving future was dropped without rejecting us.
            Err(_) => Err(RpcError::ChannelClosed),
        }
    }

    /// Emits a fire-and-forget event toward the peer.
    ///
    /// Success means the transport accepted the frame, nothing more; there
    /// is no delivery acknowledgement to await.
    pub fn emit(&self, event: WorkerEvent) -> Result<(), RpcError> {
        self.tx
            .send(Frame::Event { event })
            .map_err(|_| RpcError::ChannelClosed)
    }
}

/// Splits `endpoint` into a handle for outgoing traffic and a future that
/// serves incoming traffic against `service`.
///
/// The serving future must be polled for the handle's calls to resolve. It
/// completes when the peer's end closes; at that point every outstanding
/// request has been rejected with [`RpcError::ChannelClosed`]. Dropping the
/// future mid-flight rejects outstanding requests the same way.
pub fn bridge<S: RpcService>(
    endpoint: Endpoint,
    service: S,
) -> (BridgeHandle, impl Future<Output = Result<(), RpcError>>) {
    let (tx, rx) = endpoint.split();
    let shared = Arc::new(Shared {
        next_seq: AtomicU64::new(1),
        pending: Mutex::new(HashMap::new()),
    });
    let handle = BridgeHandle {
        tx: tx.clone(),
        shared: Arc::clone(&shared),
    };

    let serve = async move {
        let _reject = RejectOutstanding(Arc::clone(&shared));
        let mut rx = rx;
        let mut service = service;

        while let Some(frame) = rx.recv().await {
            match frame {
                Frame::Request { seq, req } => {
                    debug!(op = req.name(), seq, "serving request");
                    let reply = service.handle_request(req).await;
                    // The peer vanishing mid-reply is not an error here; its
                    // own outstanding calls reject when its end closes.
                    let _ = tx.send(Frame::Response { seq, reply });
                }
                Frame::Response { seq, reply } => {
                    let Some(waiter) = shared.take(seq) else {
                        return Err(RpcError::protocol(format!(
                            "response for unknown correlation id {seq}"
                        )));
                    };
                    let _ = waiter.send(reply.map_err(|source| RpcError::Remote { source }));
                }
                Frame::Event { event } => {
                    service.handle_event(event).await;
                }
            }
        }
        Ok(())
    };

    (handle, serve)
}

/// Rejects every outstanding request however the serving future ends:
/// normal close, protocol error, or cancellation.
struct RejectOutstanding(Arc<Shared>);

impl Drop for RejectOutstanding {
    fn drop(&mut self) {
        for (_, waiter) in self.0.pending().drain() {
            let _ = waiter.send(Err(RpcError::ChannelClosed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_wire::ModuleRecord;

    /// Answers fetches with the requested id echoed back as code; fails
    /// resolution requests.
    struct EchoService;

    impl RpcService for EchoService {
        async fn handle_request(
            &mut self,
            req: WorkerRequest,
        ) -> Result<OrchestratorReply, WireError> {
            match req {
                WorkerRequest::FetchModule { id } => Ok(OrchestratorReply::Module {
                    record: ModuleRecord {
                        code: id,
                        map: None,
                    },
                }),
                other => Err(WireError::new(format!("no handler for {}", other.name()))),
            }
        }

        async fn handle_event(&mut self, _event: WorkerEvent) {}
    }

    fn fetch(id: &str) -> WorkerRequest {
        WorkerRequest::FetchModule { id: id.to_owned() }
    }

    #[tokio::test]
    async fn requests_resolve_against_a_serving_peer() {
        let (left, right) = Endpoint::pair();
        let (handle, client_serve) = bridge(left, NoopService);
        let (_server_handle, server_serve) = bridge(right, EchoService);
        tokio::spawn(client_serve);
        tokio::spawn(server_serve);

        let reply = handle.request(fetch("src/lib.rs")).await.unwrap();
        match reply {
            OrchestratorReply::Module { record } => assert_eq!(record.code, "src/lib.rs"),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn replies_match_calls_by_correlation_id_in_any_order() {
        let (left, right) = Endpoint::pair();
        let (handle, client_serve) = bridge(left, NoopService);
        tokio::spawn(client_serve);
        let (server_tx, mut server_rx) = right.split();

        let first = tokio::spawn({
            let handle = handle.clone();
            async move { handle.request(fetch("first")).await }
        });
        let second = tokio::spawn({
            let handle = handle.clone();
            async move { handle.request(fetch("second")).await }
        });

        // Collect both request frames, then answer them in reverse order.
        let mut seqs = Vec::new();
        for _ in 0..2 {
            match server_rx.recv().await.unwrap() {
                Frame::Request { seq, req } => seqs.push((seq, req)),
                other => panic!("unexpected frame: {other:?}"),
            }
        }
        for (seq, req) in seqs.into_iter().rev() {
            let WorkerRequest::FetchModule { id } = req else {
                panic!("unexpected request");
            };
            server_tx
                .send(Frame::Response {
                    seq,
                    reply: Ok(OrchestratorReply::Module {
                        record: ModuleRecord {
                            code: id,
                            map: None,
                        },
                    }),
                })
                .unwrap();
        }

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert!(
            matches!(first, OrchestratorReply::Module { ref record } if record.code == "first")
        );
        assert!(
            matches!(second, OrchestratorReply::Module { ref record } if record.code == "second")
        );
    }

    #[tokio::test]
    async fn channel_close_rejects_outstanding_calls() {
        let (left, right) = Endpoint::pair();
        let (handle, client_serve) = bridge(left, NoopService);
        tokio::spawn(client_serve);
        let (server_tx, mut server_rx) = right.split();

        let call = tokio::spawn({
            let handle = handle.clone();
            async move { handle.request(fetch("never-answered")).await }
        });
        // Wait for the request to be in flight, then close the transport.
        let _ = server_rx.recv().await.unwrap();
        drop(server_tx);
        drop(server_rx);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::ChannelClosed), "{err:?}");
    }

    #[tokio::test]
    async fn unknown_correlation_ids_poison_the_channel() {
        let (left, right) = Endpoint::pair();
        let (handle, client_serve) = bridge(left, NoopService);
        let serve = tokio::spawn(client_serve);
        let (server_tx, mut server_rx) = right.split();

        let call = tokio::spawn({
            let handle = handle.clone();
            async move { handle.request(fetch("orphaned")).await }
        });
        let _ = server_rx.recv().await.unwrap();
        server_tx
            .send(Frame::Response {
                seq: 9999,
                reply: Err(WireError::new("nobody asked")),
            })
            .unwrap();

        let err = serve.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Protocol { .. }), "{err:?}");
        // The outstanding call is rejected as the serving future winds down.
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::ChannelClosed), "{err:?}");
    }

    #[tokio::test]
    async fn service_failures_cross_as_remote_errors() {
        let (left, right) = Endpoint::pair();
        let (handle, client_serve) = bridge(left, NoopService);
        let (_server_handle, server_serve) = bridge(right, EchoService);
        tokio::spawn(client_serve);
        tokio::spawn(server_serve);

        let err = handle
            .request(WorkerRequest::ResolveId {
                id: "x".to_owned(),
                importer: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Remote { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn events_are_accepted_without_acknowledgement() {
        let (left, right) = Endpoint::pair();
        let (handle, _client_serve) = bridge(left, NoopService);
        let (_server_tx, mut server_rx) = right.split();

        handle
            .emit(WorkerEvent::WorkerExit { code: 3 })
            .expect("transport is open");
        match server_rx.recv().await.unwrap() {
            Frame::Event {
                event: WorkerEvent::WorkerExit { code },
            } => assert_eq!(code, 3),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
