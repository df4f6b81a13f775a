//! Subscription Registry
//!
//! Tracks the standing tick subscriptions of one connection: the
//! server-assigned subscription id, the caller's callback, and a
//! bounded ring buffer of recent samples per symbol. On reconnect the
//! lifecycle asks the registry to re-arm every active symbol before
//! the connection is declared usable again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::domain::sample::{RingBuffer, Sample, Symbol};

use super::messages::{BalancePush, BalanceState, ForgetRequest, TickPush, TickRequest};
use super::multiplexer::{RequestError, RequestMultiplexer};

/// Callback invoked for every pushed sample of a subscribed symbol.
///
/// Errors are logged and never propagated to the reader loop.
pub type TickCallback = Arc<dyn Fn(&Sample) -> anyhow::Result<()> + Send + Sync>;

/// Failure of a subscribe request. Local registry state is left
/// unchanged when this is returned.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// The subscribe request itself failed (timeout, closed connection).
    #[error("subscribe request failed: {0}")]
    Request(RequestError),

    /// The server rejected the subscription.
    #[error("subscription rejected: {0}")]
    Rejected(super::messages::ApiError),

    /// The acknowledgement carried no subscription id.
    #[error("subscribe acknowledgement missing subscription id")]
    MissingAck,
}

impl From<RequestError> for SubscriptionError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Api(api) => Self::Rejected(api),
            other => Self::Request(other),
        }
    }
}

/// Caller-facing handle for one standing subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    symbol: Symbol,
    id: String,
}

impl SubscriptionHandle {
    /// The subscribed symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The server-assigned subscription id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

struct SubscriptionEntry {
    id: String,
    callback: TickCallback,
    history: RingBuffer<Sample>,
}

/// Per-connection registry of standing subscriptions.
///
/// Reads (`get_latest`, `get_history`) are pure local state lookups
/// with no network call. A symbol has at most one active subscription;
/// subscribing an already-subscribed symbol returns the existing
/// handle.
pub struct SubscriptionRegistry {
    history_capacity: usize,
    entries: RwLock<HashMap<Symbol, SubscriptionEntry>>,
    latest_balance: RwLock<Option<BalanceState>>,
    // Serializes subscribe/unsubscribe/resubscribe so two callers never
    // race a subscribe for the same symbol.
    gate: tokio::sync::Mutex<()>,
}

impl SubscriptionRegistry {
    /// Create a registry whose per-symbol history holds up to
    /// `history_capacity` samples.
    #[must_use]
    pub fn new(history_capacity: usize) -> Self {
        Self {
            history_capacity,
            entries: RwLock::new(HashMap::new()),
            latest_balance: RwLock::new(None),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Subscribe to live ticks for `symbol`, invoking `callback` for
    /// every push. Idempotent: an already-subscribed symbol returns its
    /// existing handle without touching the server.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError`] if the subscribe request fails or
    /// is rejected; local state is left unchanged.
    pub async fn subscribe(
        &self,
        mux: &RequestMultiplexer,
        symbol: &str,
        callback: TickCallback,
        timeout: Duration,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        if let Some(handle) = self.handle_for(symbol) {
            return Ok(handle);
        }

        let _gate = self.gate.lock().await;
        // A concurrent caller may have won the race while we waited.
        if let Some(handle) = self.handle_for(symbol) {
            return Ok(handle);
        }

        let response = mux.send(TickRequest::stream(symbol), timeout).await?;
        let id = response
            .subscription_id()
            .ok_or(SubscriptionError::MissingAck)?
            .to_string();

        self.entries.write().insert(
            symbol.to_string(),
            SubscriptionEntry {
                id: id.clone(),
                callback,
                history: RingBuffer::new(self.history_capacity),
            },
        );

        tracing::info!(symbol, subscription_id = %id, "subscribed to tick stream");
        Ok(SubscriptionHandle {
            symbol: symbol.to_string(),
            id,
        })
    }

    /// Cancel a subscription. Best-effort: the forget request failing
    /// or the connection being down does not prevent local removal.
    pub async fn unsubscribe(&self, mux: &RequestMultiplexer, handle: &SubscriptionHandle, timeout: Duration) {
        let _gate = self.gate.lock().await;

        if let Err(e) = mux
            .send(ForgetRequest::new(handle.id()), timeout)
            .await
        {
            tracing::warn!(symbol = handle.symbol(), error = %e, "forget request failed, removing locally");
        }

        self.entries.write().remove(handle.symbol());
        tracing::info!(symbol = handle.symbol(), "unsubscribed from tick stream");
    }

    /// Remove a subscription locally without talking to the server.
    /// Used when no connection is available.
    pub async fn remove_local(&self, symbol: &str) {
        let _gate = self.gate.lock().await;
        self.entries.write().remove(symbol);
    }

    /// Re-arm every active subscription on a fresh connection, keeping
    /// each symbol's callback and history and replacing its server
    /// subscription id. Called exactly once per reconnect, before the
    /// connection is declared usable.
    ///
    /// Returns the number of symbols successfully re-armed.
    pub async fn resubscribe_all(&self, mux: &RequestMultiplexer, timeout: Duration) -> usize {
        let _gate = self.gate.lock().await;

        let symbols: Vec<Symbol> = self.entries.read().keys().cloned().collect();
        let mut rearmed = 0;

        for symbol in symbols {
            match mux.send(TickRequest::stream(&symbol), timeout).await {
                Ok(response) => {
                    if let Some(id) = response.subscription_id() {
                        if let Some(entry) = self.entries.write().get_mut(&symbol) {
                            entry.id = id.to_string();
                            rearmed += 1;
                        }
                        tracing::info!(symbol = %symbol, subscription_id = id, "resubscribed after reconnect");
                    } else {
                        tracing::warn!(symbol = %symbol, "resubscribe acknowledgement missing subscription id");
                    }
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "resubscribe failed");
                }
            }
        }

        rearmed
    }

    /// Handle a pushed tick: append a sample to the symbol's history
    /// and invoke its callback. Callback errors are logged, never
    /// propagated to the reader loop.
    pub fn on_tick(&self, push: &TickPush) {
        let sample = Sample::new(push.tick.symbol.clone(), push.tick.quote, push.tick.epoch);

        let callback = {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(&push.tick.symbol) else {
                tracing::debug!(symbol = %push.tick.symbol, "tick push for unknown symbol, dropping");
                return;
            };
            entry.history.push(sample.clone());
            Arc::clone(&entry.callback)
        };

        // Invoke outside the lock so callbacks may read back history.
        if let Err(e) = callback(&sample) {
            tracing::warn!(symbol = %sample.symbol, error = %e, "tick callback failed");
        }
    }

    /// Record a pushed balance update.
    pub fn on_balance(&self, push: BalancePush) {
        tracing::debug!(currency = %push.balance.currency, "balance push");
        *self.latest_balance.write() = Some(push.balance);
    }

    /// The most recent sample for `symbol`, if subscribed.
    #[must_use]
    pub fn get_latest(&self, symbol: &str) -> Option<Sample> {
        self.entries
            .read()
            .get(symbol)
            .and_then(|e| e.history.latest().cloned())
    }

    /// Up to the `limit` most recent samples for `symbol`, ordered
    /// oldest to newest. Empty when the symbol is not subscribed.
    #[must_use]
    pub fn get_history(&self, symbol: &str, limit: usize) -> Vec<Sample> {
        self.entries
            .read()
            .get(symbol)
            .map(|e| e.history.snapshot(limit))
            .unwrap_or_default()
    }

    /// The most recent pushed balance, if any.
    #[must_use]
    pub fn latest_balance(&self) -> Option<BalanceState> {
        self.latest_balance.read().clone()
    }

    /// Symbols with an active subscription.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.entries.read().keys().cloned().collect()
    }

    /// Whether `symbol` has an active subscription.
    #[must_use]
    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.entries.read().contains_key(symbol)
    }

    fn handle_for(&self, symbol: &str) -> Option<SubscriptionHandle> {
        self.entries.read().get(symbol).map(|e| SubscriptionHandle {
            symbol: symbol.to_string(),
            id: e.id.clone(),
        })
    }

    #[cfg(test)]
    fn install(&self, symbol: &str, id: &str, callback: TickCallback) {
        self.entries.write().insert(
            symbol.to_string(),
            SubscriptionEntry {
                id: id.to_string(),
                callback,
                history: RingBuffer::new(self.history_capacity),
            },
        );
    }
}
