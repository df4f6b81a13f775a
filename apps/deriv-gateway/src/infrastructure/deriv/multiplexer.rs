//! Request Multiplexer
//!
//! Correlates outgoing requests with incoming responses over one shared
//! connection. Many callers may `send` concurrently: each request gets
//! a fresh correlation id and a pending-table entry, frame writes are
//! serialized by an async mutex, and a single reader task resolves
//! pending entries as responses arrive. Responses may arrive out of
//! order relative to requests; matching is strictly by correlation id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FrameSink, FrameSource, TransportError};

use super::codec::JsonCodec;
use super::messages::{ApiError, ApiRequest, InboundFrame, Response};
use super::subscriptions::SubscriptionRegistry;

/// Failure of a single request/response exchange.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// No response arrived within the caller's deadline. Retryable;
    /// the pending-table entry has been removed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection closed before a response arrived.
    #[error("connection closed before response arrived")]
    ConnectionClosed,

    /// The frame write failed. The connection is marked dead.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The server answered with an error object.
    #[error("api error: {0}")]
    Api(ApiError),

    /// The request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// The response arrived but lacked an expected field.
    #[error("response missing field: {0}")]
    MissingField(&'static str),
}

/// Correlates requests and responses over one connection.
///
/// Owned by a [`super::connection::ConnectionLifecycle`] session. The
/// session cancellation token doubles as the connection-dead signal:
/// write failures and reader exit cancel it, and the lifecycle's
/// supervisor reacts by reconnecting.
pub struct RequestMultiplexer {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Response>>>,
    sink: tokio::sync::Mutex<Box<dyn FrameSink>>,
    session: CancellationToken,
}

impl RequestMultiplexer {
    /// Create a multiplexer over the outbound half of a connection.
    #[must_use]
    pub fn new(sink: Box<dyn FrameSink>, session: CancellationToken) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            sink: tokio::sync::Mutex::new(sink),
            session,
        }
    }

    /// The session token this multiplexer cancels when the connection
    /// dies.
    #[must_use]
    pub const fn session_token(&self) -> &CancellationToken {
        &self.session
    }

    /// Number of requests currently awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send a request and await its correlated response.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Timeout`] if no response arrives in time; the
    ///   pending entry is removed, only the local wait is cancelled.
    /// - [`RequestError::Api`] if the server answered with an error.
    /// - [`RequestError::Transport`] if the write failed; the session
    ///   token is cancelled so the lifecycle reconnects.
    /// - [`RequestError::ConnectionClosed`] if the reader exited before
    ///   resolving this request.
    pub async fn send<R: ApiRequest>(
        &self,
        mut request: R,
        timeout: Duration,
    ) -> Result<Response, RequestError> {
        if self.session.is_cancelled() {
            return Err(RequestError::ConnectionClosed);
        }

        let req_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        request.set_req_id(req_id);
        let frame = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(req_id, tx);

        // Hold the write lock only for the frame write, never across
        // the response wait.
        {
            let mut sink = self.sink.lock().await;
            if let Err(e) = sink.send_text(frame).await {
                self.pending.lock().remove(&req_id);
                tracing::warn!(req_id, error = %e, "frame write failed, marking connection dead");
                self.session.cancel();
                return Err(RequestError::Transport(e));
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response
                .api_error()
                .map_or(Ok(response), |err| Err(RequestError::Api(err))),
            Ok(Err(_closed)) => Err(RequestError::ConnectionClosed),
            Err(_elapsed) => {
                self.pending.lock().remove(&req_id);
                Err(RequestError::Timeout(timeout))
            }
        }
    }

    /// Spawn the single reader task for this connection.
    ///
    /// The reader decodes every inbound frame once: responses resolve
    /// pending requests, pushes go to `registry`, malformed frames are
    /// logged and dropped. When the stream ends the session token is
    /// cancelled and every pending waiter fails with
    /// [`RequestError::ConnectionClosed`].
    pub fn spawn_reader(
        self: &Arc<Self>,
        source: Box<dyn FrameSource>,
        registry: Arc<SubscriptionRegistry>,
    ) -> tokio::task::JoinHandle<()> {
        let mux = Arc::clone(self);
        tokio::spawn(mux.read_loop(source, registry))
    }

    async fn read_loop(
        self: Arc<Self>,
        mut source: Box<dyn FrameSource>,
        registry: Arc<SubscriptionRegistry>,
    ) {
        let codec = JsonCodec::new();

        loop {
            tokio::select! {
                () = self.session.cancelled() => {
                    tracing::debug!("reader loop cancelled");
                    break;
                }
                frame = source.next_frame() => {
                    match frame {
                        Some(Ok(text)) => self.dispatch(&codec, &text, &registry),
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "transport error in reader loop");
                            self.session.cancel();
                            break;
                        }
                        None => {
                            tracing::info!("connection stream ended");
                            self.session.cancel();
                            break;
                        }
                    }
                }
            }
        }

        self.fail_all_pending();
    }

    fn dispatch(&self, codec: &JsonCodec, text: &str, registry: &SubscriptionRegistry) {
        match codec.decode(text) {
            Ok(InboundFrame::Response(response)) => {
                let waiter = self.pending.lock().remove(&response.req_id);
                if let Some(tx) = waiter {
                    // The caller may have timed out already; dropping
                    // the response here is fine.
                    let _ = tx.send(response);
                } else {
                    tracing::debug!(req_id = response.req_id, "response for unknown correlation id");
                }
            }
            Ok(InboundFrame::PushTick(push)) => registry.on_tick(&push),
            Ok(InboundFrame::PushBalance(push)) => registry.on_balance(push),
            Ok(InboundFrame::Error(frame)) => {
                tracing::warn!(code = %frame.error.code, message = %frame.error.message,
                    "server error frame without correlation id");
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
            }
        }
    }

    /// Drop every pending waiter so blocked callers fail fast with
    /// `ConnectionClosed` instead of waiting out their timeouts.
    fn fail_all_pending(&self) {
        let dropped = {
            let mut pending = self.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            tracing::debug!(dropped, "failed pending requests on reader exit");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_test::assert_ok;

    use super::*;
    use crate::infrastructure::deriv::messages::{PingRequest, TickRequest};

    struct ChannelSink(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl FrameSink for ChannelSink {
        async fn send_text(&mut self, frame: String) -> Result<(), TransportError> {
            self.0.send(frame).map_err(|_| TransportError::Closed)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct ChannelSource(mpsc::UnboundedReceiver<String>);

    #[async_trait]
    impl FrameSource for ChannelSource {
        async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
            self.0.recv().await.map(Ok)
        }
    }

    struct FailingSink;

    #[async_trait]
    impl FrameSink for FailingSink {
        async fn send_text(&mut self, _frame: String) -> Result<(), TransportError> {
            Err(TransportError::WebSocket("broken pipe".to_string()))
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn wired_multiplexer() -> (
        Arc<RequestMultiplexer>,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let mux = Arc::new(RequestMultiplexer::new(
            Box::new(ChannelSink(out_tx)),
            CancellationToken::new(),
        ));
        mux.spawn_reader(
            Box::new(ChannelSource(in_rx)),
            Arc::new(SubscriptionRegistry::new(16)),
        );
        (mux, out_rx, in_tx)
    }

    #[tokio::test]
    async fn response_resolves_matching_request() {
        let (mux, mut out_rx, in_tx) = wired_multiplexer();

        let send = tokio::spawn({
            let mux = Arc::clone(&mux);
            async move { mux.send(PingRequest::new(), Duration::from_secs(1)).await }
        });

        let frame = out_rx.recv().await.unwrap();
        let sent: serde_json::Value = serde_json::from_str(&frame).unwrap();
        let req_id = sent["req_id"].as_u64().unwrap();
        in_tx
            .send(format!(r#"{{"req_id": {req_id}, "msg_type": "ping", "ping": "pong"}}"#))
            .unwrap();

        let response = send.await.unwrap().unwrap();
        assert_eq!(response.req_id, req_id);
        assert_eq!(response.msg_type(), Some("ping"));
        assert_eq!(mux.pending_requests(), 0);
    }

    #[tokio::test]
    async fn timeout_removes_pending_entry() {
        let (mux, _out_rx, _in_tx) = wired_multiplexer();

        for _ in 0..3 {
            let err = mux
                .send(PingRequest::new(), Duration::from_millis(20))
                .await
                .unwrap_err();
            assert!(matches!(err, RequestError::Timeout(_)));
            assert_eq!(mux.pending_requests(), 0);
        }
    }

    #[tokio::test]
    async fn api_error_response_is_surfaced() {
        let (mux, mut out_rx, in_tx) = wired_multiplexer();

        let send = tokio::spawn({
            let mux = Arc::clone(&mux);
            async move {
                mux.send(TickRequest::snapshot("NOPE"), Duration::from_secs(1))
                    .await
            }
        });

        let frame = out_rx.recv().await.unwrap();
        let sent: serde_json::Value = serde_json::from_str(&frame).unwrap();
        let req_id = sent["req_id"].as_u64().unwrap();
        in_tx
            .send(format!(
                r#"{{"req_id": {req_id}, "error": {{"code": "InvalidSymbol", "message": "no such symbol"}}}}"#
            ))
            .unwrap();

        let err = send.await.unwrap().unwrap_err();
        match err {
            RequestError::Api(api) => assert_eq!(api.code, "InvalidSymbol"),
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_failure_marks_connection_dead() {
        let mux = Arc::new(RequestMultiplexer::new(
            Box::new(FailingSink),
            CancellationToken::new(),
        ));

        let err = mux
            .send(PingRequest::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Transport(_)));
        assert!(mux.session_token().is_cancelled());
        assert_eq!(mux.pending_requests(), 0);
    }

    #[tokio::test]
    async fn stream_end_fails_blocked_callers() {
        let (mux, mut out_rx, in_tx) = wired_multiplexer();

        let send = tokio::spawn({
            let mux = Arc::clone(&mux);
            async move { mux.send(PingRequest::new(), Duration::from_secs(5)).await }
        });

        // Wait until the frame is on the wire, then close the inbound
        // stream without answering.
        out_rx.recv().await.unwrap();
        drop(in_tx);

        let err = send.await.unwrap().unwrap_err();
        assert!(matches!(err, RequestError::ConnectionClosed));
        assert!(mux.session_token().is_cancelled());
    }

    #[tokio::test]
    async fn correlation_ids_are_unique_and_increasing() {
        let (mux, mut out_rx, in_tx) = wired_multiplexer();

        for _ in 0..4 {
            let send = tokio::spawn({
                let mux = Arc::clone(&mux);
                async move { mux.send(PingRequest::new(), Duration::from_secs(1)).await }
            });
            let frame = out_rx.recv().await.unwrap();
            let sent: serde_json::Value = serde_json::from_str(&frame).unwrap();
            let req_id = sent["req_id"].as_u64().unwrap();
            in_tx
                .send(format!(r#"{{"req_id": {req_id}, "msg_type": "ping"}}"#))
                .unwrap();
            send.await.unwrap().unwrap();
        }

        // Four requests consumed ids 1 through 4.
        let send = tokio::spawn({
            let mux = Arc::clone(&mux);
            async move { mux.send(PingRequest::new(), Duration::from_millis(50)).await }
        });
        let frame = out_rx.recv().await.unwrap();
        let sent: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(sent["req_id"].as_u64(), Some(5));
        let _ = send.await;
    }

    #[tokio::test]
    async fn malformed_frames_do_not_disturb_pending_requests() {
        let (mux, mut out_rx, in_tx) = wired_multiplexer();

        let send = tokio::spawn({
            let mux = Arc::clone(&mux);
            async move { mux.send(PingRequest::new(), Duration::from_secs(1)).await }
        });

        let frame = out_rx.recv().await.unwrap();
        let sent: serde_json::Value = serde_json::from_str(&frame).unwrap();
        let req_id = sent["req_id"].as_u64().unwrap();

        in_tx.send("{garbage".to_string()).unwrap();
        in_tx.send(r#"{"unknown": true}"#.to_string()).unwrap();
        in_tx
            .send(format!(r#"{{"req_id": {req_id}, "msg_type": "ping"}}"#))
            .unwrap();

        tokio_test::assert_ok!(send.await.unwrap());
    }
}
