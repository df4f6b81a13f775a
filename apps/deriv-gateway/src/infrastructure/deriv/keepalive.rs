//! Keepalive Monitor
//!
//! Sends a protocol-level ping through the multiplexer at a fixed
//! interval while the connection is healthy. A successful pong resets
//! the failure counter; consecutive failures past the threshold mark
//! the connection dead by cancelling its session token, which wakes
//! the lifecycle's reconnect supervisor.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::messages::PingRequest;
use super::multiplexer::RequestMultiplexer;

/// Keepalive tuning.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// Interval between pings.
    pub interval: Duration,
    /// Per-ping response deadline.
    pub ping_timeout: Duration,
    /// Consecutive failures tolerated before the connection is
    /// declared dead.
    pub max_failures: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            max_failures: 3,
        }
    }
}

/// Periodic liveness probe for one connection session.
pub struct KeepaliveMonitor {
    config: KeepaliveConfig,
    mux: Arc<RequestMultiplexer>,
    session: CancellationToken,
}

impl KeepaliveMonitor {
    /// Create a monitor bound to one connection session.
    #[must_use]
    pub fn new(
        config: KeepaliveConfig,
        mux: Arc<RequestMultiplexer>,
        session: CancellationToken,
    ) -> Self {
        Self {
            config,
            mux,
            session,
        }
    }

    /// Spawn the monitor as a background task. It exits when the
    /// session token is cancelled, by it or anyone else.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        // First tick fires after one full interval, not immediately;
        // the connection was just proven alive by the handshake.
        let start = tokio::time::Instant::now() + self.config.interval;
        let mut ticker = tokio::time::interval_at(start, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                () = self.session.cancelled() => {
                    tracing::debug!("keepalive monitor stopping, session ended");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.mux.send(PingRequest::new(), self.config.ping_timeout).await {
                Ok(_) => {
                    if failures > 0 {
                        tracing::info!(failures, "keepalive recovered");
                    }
                    failures = 0;
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(failures, max = self.config.max_failures, error = %e,
                        "keepalive ping failed");
                    if failures >= self.config.max_failures {
                        tracing::error!("keepalive threshold exceeded, marking connection dead");
                        self.session.cancel();
                        return;
                    }
                }
            }
        }
    }
}
