//! Shared test fixtures: an in-memory fake trading endpoint speaking
//! the JSON protocol over channel transports, plus the connector that
//! plugs it into a connection lifecycle.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use deriv_gateway::{Connector, FrameSink, FrameSource, TransportError};

pub struct ChannelSink(mpsc::UnboundedSender<String>);

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_text(&mut self, frame: String) -> Result<(), TransportError> {
        self.0.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct ChannelSource(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        self.0.recv().await.map(Ok)
    }
}

struct ServerConn {
    push_tx: mpsc::UnboundedSender<String>,
    kill: CancellationToken,
}

/// In-memory endpoint. Each accepted connection gets its own handler
/// task that answers requests; pushes fan out to every live connection.
pub struct FakeServer {
    auth_ok: AtomicBool,
    /// When set, the server accepts connections but never replies.
    silent: AtomicBool,
    connects: AtomicUsize,
    next_sub: AtomicU64,
    subscribe_counts: Mutex<HashMap<String, usize>>,
    conns: Mutex<Vec<ServerConn>>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            auth_ok: AtomicBool::new(true),
            silent: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            next_sub: AtomicU64::new(0),
            subscribe_counts: Mutex::new(HashMap::new()),
            conns: Mutex::new(Vec::new()),
        })
    }

    pub fn reject_auth(&self) {
        self.auth_ok.store(false, Ordering::SeqCst);
    }

    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Number of connections ever accepted.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of subscribe requests ever seen for `symbol`.
    pub fn subscribe_count(&self, symbol: &str) -> usize {
        self.subscribe_counts.lock().get(symbol).copied().unwrap_or(0)
    }

    /// Push a live tick to every open connection.
    pub fn push_tick(&self, symbol: &str, quote: f64, epoch: i64) {
        let frame = format!(
            r#"{{"msg_type": "tick", "subscription": {{"id": "push"}}, "tick": {{"symbol": "{symbol}", "quote": {quote}, "epoch": {epoch}}}}}"#
        );
        self.conns
            .lock()
            .retain(|c| c.push_tx.send(frame.clone()).is_ok());
    }

    /// Push a balance update to every open connection.
    pub fn push_balance(&self, balance: f64, currency: &str) {
        let frame = format!(
            r#"{{"msg_type": "balance", "subscription": {{"id": "push"}}, "balance": {{"balance": {balance}, "currency": "{currency}"}}}}"#
        );
        self.conns
            .lock()
            .retain(|c| c.push_tx.send(frame.clone()).is_ok());
    }

    /// Sever every open connection, as a network drop would.
    pub fn drop_connections(&self) {
        for conn in self.conns.lock().drain(..) {
            conn.kill.cancel();
        }
    }

    fn reply_for(&self, req: &serde_json::Value) -> Option<String> {
        let req_id = req["req_id"].as_u64()?;

        if req.get("authorize").is_some() {
            return Some(if self.auth_ok.load(Ordering::SeqCst) {
                format!(
                    r#"{{"req_id": {req_id}, "msg_type": "authorize", "authorize": {{"loginid": "CR1"}}}}"#
                )
            } else {
                format!(
                    r#"{{"req_id": {req_id}, "msg_type": "authorize", "error": {{"code": "InvalidToken", "message": "the token is invalid"}}}}"#
                )
            });
        }

        if req.get("ping").is_some() {
            return Some(format!(
                r#"{{"req_id": {req_id}, "msg_type": "ping", "ping": "pong"}}"#
            ));
        }

        if req.get("balance").is_some() {
            return Some(format!(
                r#"{{"req_id": {req_id}, "msg_type": "balance", "balance": {{"balance": 1000.0, "currency": "USD"}}}}"#
            ));
        }

        if req.get("forget").is_some() {
            return Some(format!(
                r#"{{"req_id": {req_id}, "msg_type": "forget", "forget": 1}}"#
            ));
        }

        if req.get("active_symbols").is_some() {
            return Some(format!(
                r#"{{"req_id": {req_id}, "msg_type": "active_symbols", "active_symbols": [
                    {{"symbol": "R_100", "display_name": "Volatility 100 Index", "market": "synthetic_index"}},
                    {{"symbol": "frxEURUSD", "display_name": "EUR/USD", "market": "forex"}}
                ]}}"#
            ));
        }

        if let Some(symbol) = req.get("ticks").and_then(serde_json::Value::as_str) {
            if req.get("subscribe").is_some() {
                *self
                    .subscribe_counts
                    .lock()
                    .entry(symbol.to_string())
                    .or_insert(0) += 1;
                let sub = self.next_sub.fetch_add(1, Ordering::SeqCst) + 1;
                return Some(format!(
                    r#"{{"req_id": {req_id}, "msg_type": "tick", "subscription": {{"id": "sub-{sub}"}}, "tick": {{"symbol": "{symbol}", "quote": 100.0, "epoch": 1700000000}}}}"#
                ));
            }
            return Some(format!(
                r#"{{"req_id": {req_id}, "msg_type": "tick", "tick": {{"symbol": "{symbol}", "quote": 100.0, "epoch": 1700000000}}}}"#
            ));
        }

        None
    }
}

/// Poll `check` until it holds or the deadline passes.
pub async fn wait_until<F>(deadline: Duration, mut check: F)
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while !check() {
        assert!(
            start.elapsed() < deadline,
            "condition not met within {deadline:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Connector that accepts connections into a [`FakeServer`].
pub struct ChannelConnector {
    server: Arc<FakeServer>,
}

impl ChannelConnector {
    pub fn new(server: Arc<FakeServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(
        &self,
        _url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), TransportError> {
        let server = Arc::clone(&self.server);
        server.connects.fetch_add(1, Ordering::SeqCst);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let kill = CancellationToken::new();

        server.conns.lock().push(ServerConn {
            push_tx: in_tx.clone(),
            kill: kill.clone(),
        });

        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    () = kill.cancelled() => break,
                    frame = out_rx.recv() => match frame {
                        Some(f) => f,
                        None => break,
                    },
                };

                if server.silent.load(Ordering::SeqCst) {
                    continue;
                }
                let Ok(req) = serde_json::from_str::<serde_json::Value>(&frame) else {
                    continue;
                };
                let Some(reply) = server.reply_for(&req) else {
                    continue;
                };

                // Stagger replies so responses interleave out of order.
                let delay = Duration::from_millis(req["req_id"].as_u64().unwrap_or(0) % 7);
                let reply_tx = in_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = reply_tx.send(reply);
                });
            }
            // Dropping in_tx here ends the client's inbound stream.
        });

        Ok((Box::new(ChannelSink(out_tx)), Box::new(ChannelSource(in_rx))))
    }
}
