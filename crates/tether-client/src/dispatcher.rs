//! Request dispatcher: correlation ids, the pending-call table, and the
//! receive loop that routes peer frames.
//!
//! The pending table is the only shared mutable state between senders and
//! the receive loop; every mutation happens under its mutex, and the lock is
//! never held across an await.

use crate::error::ClientError;
use crate::transport::{FrameReader, Transport};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tether_proto::{Message, Notification, Request, RpcError, decode, encode};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// What the receive loop hands back for one request: the peer's result or
/// its reported error.
type Outcome = Result<Value, RpcError>;

/// Table of in-flight requests. `None` once the connection has failed or
/// closed; later sends then fail fast instead of registering entries that
/// could never resolve.
struct PendingTable {
    slots: Mutex<Option<HashMap<u64, oneshot::Sender<Outcome>>>>,
}

impl PendingTable {
    fn new() -> Self {
        Self {
            slots: Mutex::new(Some(HashMap::new())),
        }
    }

    fn register(&self, id: u64, tx: oneshot::Sender<Outcome>) -> Result<(), ClientError> {
        match self.slots.lock().unwrap().as_mut() {
            Some(slots) => {
                slots.insert(id, tx);
                Ok(())
            }
            None => Err(ClientError::ConnectionClosed),
        }
    }

    fn resolve(&self, id: u64) -> Option<oneshot::Sender<Outcome>> {
        self.slots.lock().unwrap().as_mut()?.remove(&id)
    }

    /// Deregister a call that was cancelled before its response arrived.
    fn remove(&self, id: u64) {
        if let Some(slots) = self.slots.lock().unwrap().as_mut() {
            slots.remove(&id);
        }
    }

    /// Drop every completion slot (their receivers observe closure) and
    /// refuse all future registrations. Returns how many were outstanding.
    fn fail_all(&self) -> usize {
        match self.slots.lock().unwrap().take() {
            Some(slots) => slots.len(),
            None => 0,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap().as_ref().map_or(0, HashMap::len)
    }
}

/// An in-flight request awaiting its correlated response.
///
/// Dropping the handle before [`PendingCall::wait`] resolves cancels the
/// call: its table entry is removed so a late response is discarded with a
/// warning instead of leaking into a dead slot. The request itself is not
/// un-sent.
pub struct PendingCall {
    id: u64,
    method: String,
    sent_at: Instant,
    rx: oneshot::Receiver<Outcome>,
    pending: Arc<PendingTable>,
}

impl PendingCall {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Suspend until the receive loop resolves this call.
    pub async fn wait(mut self) -> Result<Outcome, ClientError> {
        match (&mut self.rx).await {
            Ok(outcome) => {
                tracing::trace!(
                    id = self.id,
                    method = %self.method,
                    elapsed_ms = self.sent_at.elapsed().as_millis() as u64,
                    "request resolved"
                );
                Ok(outcome)
            }
            // Sender dropped: the table was torn down underneath us.
            Err(_) => Err(ClientError::ConnectionClosed),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        // No-op if the call already resolved; the entry is gone by then.
        self.pending.remove(self.id);
    }
}

/// Owns the transport's write half and the background receive loop.
pub struct Dispatcher {
    transport: Transport,
    next_id: AtomicU64,
    pending: Arc<PendingTable>,
    reader_handle: JoinHandle<()>,
}

impl Dispatcher {
    /// Start the receive loop over `reader`. Peer notifications are
    /// forwarded to `notifications` when given, dropped otherwise.
    pub fn new(
        transport: Transport,
        reader: FrameReader,
        notifications: Option<mpsc::UnboundedSender<Notification>>,
    ) -> Self {
        let pending = Arc::new(PendingTable::new());
        let reader_handle = tokio::spawn(receive_loop(
            reader,
            Arc::clone(&pending),
            notifications,
        ));
        Self {
            transport,
            next_id: AtomicU64::new(1),
            pending,
            reader_handle,
        }
    }

    /// Send a request and return the handle its response will resolve.
    ///
    /// Ids come from a monotonic counter, so an id is never reused while the
    /// connection is open. The pending entry is registered before the frame
    /// is written; a response can never race past its own registration.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<PendingCall, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.register(id, tx)?;

        let frame = encode(&Message::Request(Request::new(id, method, params)));
        if let Err(e) = self.transport.send(frame).await {
            self.pending.remove(id);
            return Err(e);
        }

        Ok(PendingCall {
            id,
            method: method.to_string(),
            sent_at: Instant::now(),
            rx,
            pending: Arc::clone(&self.pending),
        })
    }

    /// Send a one-way notification. Nothing to correlate.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        let frame = encode(&Message::Notification(Notification::new(method, params)));
        self.transport.send(frame).await
    }

    /// Fail everything outstanding and tear the connection down. Idempotent.
    pub async fn close(&self) {
        let failed = self.pending.fail_all();
        if failed > 0 {
            tracing::debug!(count = failed, "pending calls failed on close");
        }
        self.transport.close().await;
        self.reader_handle.abort();
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// The single receive loop: decodes frames and routes them until the stream
/// ends or a frame fails to decode (after which the framing cannot be
/// trusted, so the connection is failed as a whole).
async fn receive_loop(
    mut reader: FrameReader,
    pending: Arc<PendingTable>,
    notifications: Option<mpsc::UnboundedSender<Notification>>,
) {
    loop {
        let frame = match reader.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!("peer stdout closed");
                break;
            }
            Err(e) => {
                tracing::debug!("read error from peer: {e}");
                break;
            }
        };

        match decode(&frame) {
            Ok(Message::Response(response)) => match pending.resolve(response.id) {
                Some(tx) => {
                    let _ = tx.send(response.result);
                }
                None => {
                    tracing::warn!(id = response.id, "response for unknown or cancelled request");
                }
            },
            Ok(Message::Notification(note)) => {
                if let Some(tx) = &notifications {
                    let _ = tx.send(note);
                }
            }
            Ok(Message::Request(request)) => {
                tracing::warn!(method = %request.method, "ignoring request from peer");
            }
            Err(e) => {
                tracing::error!("malformed frame from peer: {e}");
                break;
            }
        }
    }

    let failed = pending.fail_all();
    if failed > 0 {
        tracing::debug!(count = failed, "pending calls failed, connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // A peer that answers every request with {"ok":true}, echoing the id.
    const ECHO_PEER: &str = r#"
import json, sys
for line in sys.stdin:
    msg = json.loads(line)
    if "id" in msg:
        print(json.dumps({"jsonrpc": "2.0", "id": msg["id"], "result": {"ok": True}}), flush=True)
"#;

    fn spawn_peer(script: &str) -> Option<(Transport, FrameReader)> {
        // Skip the test when python3 is unavailable.
        Transport::spawn("python3", &["-c".to_string(), script.to_string()], &HashMap::new()).ok()
    }

    #[tokio::test]
    async fn request_resolves_with_peer_result() {
        let Some((transport, reader)) = spawn_peer(ECHO_PEER) else {
            return;
        };
        let dispatcher = Dispatcher::new(transport, reader, None);

        let call = dispatcher.send("test/method", None).await.unwrap();
        let outcome = call.wait().await.unwrap();
        assert_eq!(outcome.unwrap()["ok"], true);
        assert_eq!(dispatcher.pending_len(), 0);

        dispatcher.close().await;
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let Some((transport, reader)) = spawn_peer(ECHO_PEER) else {
            return;
        };
        let dispatcher = Dispatcher::new(transport, reader, None);

        let first = dispatcher.send("a", None).await.unwrap();
        let second = dispatcher.send("b", None).await.unwrap();
        assert!(second.id() > first.id());

        dispatcher.close().await;
    }

    #[tokio::test]
    async fn dropping_a_pending_call_deregisters_it() {
        // `sleep` never answers, so the entry stays until the drop.
        let (transport, reader) =
            Transport::spawn("sleep", &["10".to_string()], &HashMap::new()).unwrap();
        let dispatcher = Dispatcher::new(transport, reader, None);

        let call = dispatcher.send("test/method", None).await.unwrap();
        assert_eq!(dispatcher.pending_len(), 1);
        drop(call);
        assert_eq!(dispatcher.pending_len(), 0);

        dispatcher.close().await;
    }

    #[tokio::test]
    async fn close_fails_outstanding_calls() {
        let (transport, reader) =
            Transport::spawn("sleep", &["10".to_string()], &HashMap::new()).unwrap();
        let dispatcher = Dispatcher::new(transport, reader, None);

        let call = dispatcher.send("test/method", None).await.unwrap();
        dispatcher.close().await;

        assert!(matches!(call.wait().await, Err(ClientError::ConnectionClosed)));
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[tokio::test]
    async fn send_after_close_fails_fast() {
        let (transport, reader) =
            Transport::spawn("sleep", &["10".to_string()], &HashMap::new()).unwrap();
        let dispatcher = Dispatcher::new(transport, reader, None);
        dispatcher.close().await;

        let result = dispatcher.send("test/method", None).await;
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn peer_exit_fails_pending_calls() {
        // Peer that exits without answering anything.
        let Some((transport, reader)) = spawn_peer("import sys; sys.exit(0)") else {
            return;
        };
        let dispatcher = Dispatcher::new(transport, reader, None);

        // The peer may already be gone by the time we send; both the send
        // path and the wait path must surface the closed connection.
        match dispatcher.send("test/method", None).await {
            Ok(call) => {
                assert!(matches!(call.wait().await, Err(ClientError::ConnectionClosed)));
            }
            Err(e) => assert!(matches!(e, ClientError::ConnectionClosed)),
        }

        dispatcher.close().await;
    }

    #[tokio::test]
    async fn malformed_frame_fails_the_connection() {
        let Some((transport, reader)) = spawn_peer(r#"print("not json", flush=True); import sys; sys.stdin.read()"#) else {
            return;
        };
        let dispatcher = Dispatcher::new(transport, reader, None);

        match dispatcher.send("test/method", None).await {
            Ok(call) => {
                assert!(matches!(call.wait().await, Err(ClientError::ConnectionClosed)));
            }
            Err(e) => assert!(matches!(e, ClientError::ConnectionClosed)),
        }

        dispatcher.close().await;
    }

    #[tokio::test]
    async fn notifications_are_forwarded() {
        let script = r#"
import json, sys
print(json.dumps({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"pct": 50}}), flush=True)
sys.stdin.read()
"#;
        let Some((transport, reader)) = spawn_peer(script) else {
            return;
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(transport, reader, Some(tx));

        let note = rx.recv().await.unwrap();
        assert_eq!(note.method, "notifications/progress");
        assert_eq!(note.params.unwrap()["pct"], 50);

        dispatcher.close().await;
    }

    #[tokio::test]
    async fn unmatched_response_is_ignored() {
        // Answers a request nobody sent, then echoes real requests.
        let script = r#"
import json, sys
print(json.dumps({"jsonrpc": "2.0", "id": 999, "result": {}}), flush=True)
for line in sys.stdin:
    msg = json.loads(line)
    if "id" in msg:
        print(json.dumps({"jsonrpc": "2.0", "id": msg["id"], "result": {"ok": True}}), flush=True)
"#;
        let Some((transport, reader)) = spawn_peer(script) else {
            return;
        };
        let dispatcher = Dispatcher::new(transport, reader, None);

        let call = dispatcher.send("test/method", None).await.unwrap();
        let outcome = call.wait().await.unwrap();
        assert_eq!(outcome.unwrap()["ok"], true);

        dispatcher.close().await;
    }
}
