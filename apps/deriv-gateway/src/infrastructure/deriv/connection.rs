//! Connection Lifecycle
//!
//! Owns one logical connection to the trading endpoint: establishes
//! the socket, authorizes, wires the multiplexer and keepalive
//! monitor, and supervises reconnection with bounded backoff. After a
//! reconnect the registry re-arms every standing subscription before
//! the connection is declared usable, so pending callers never observe
//! a half-restored session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Connector, TransportError};
use crate::domain::sample::Sample;
use crate::domain::tenant::TenantKey;

use super::keepalive::{KeepaliveConfig, KeepaliveMonitor};
use super::messages::{
    ActiveSymbolsRequest, ApiError, ApiRequest, AuthorizeRequest, BalanceRequest, BalanceState,
    BuyRequest, ContractParameters, PortfolioRequest, ProposalRequest, Response, SymbolInfo, Tick,
    TickRequest,
};
use super::multiplexer::{RequestError, RequestMultiplexer};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::subscriptions::{SubscriptionError, SubscriptionHandle, SubscriptionRegistry, TickCallback};

/// Observable lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket. Initial state, and the state between reconnect
    /// attempts.
    Disconnected,
    /// Socket handshake in progress.
    Connecting,
    /// Socket open, not yet authorized.
    Connected,
    /// Authorize request in flight.
    Authorizing,
    /// Ready for requests and subscriptions.
    Authorized,
    /// Terminal. A stopped connection never reconnects.
    Closed,
}

/// Tuning for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Websocket endpoint URL, app id included.
    pub url: String,
    /// Deadline for each request/response exchange.
    pub request_timeout: Duration,
    /// Reconnect backoff tuning.
    pub reconnect: ReconnectConfig,
    /// Keepalive tuning.
    pub keepalive: KeepaliveConfig,
    /// Per-symbol tick history capacity.
    pub history_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            request_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            keepalive: KeepaliveConfig::default(),
            history_capacity: 1000,
        }
    }
}

/// Failure to bring a connection up.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The server rejected the credential. Fatal; never retried.
    #[error("authorization rejected: {0}")]
    Authorization(ApiError),

    /// The socket could not be opened.
    #[error("transport failure: {0}")]
    Transport(TransportError),

    /// The handshake failed for a non-authorization reason.
    #[error("handshake failed: {0}")]
    Handshake(RequestError),

    /// Every attempt in the backoff budget failed.
    #[error("gave up after {0} connection attempts")]
    AttemptsExhausted(u32),

    /// The lifecycle has been stopped.
    #[error("connection is closed")]
    Closed,
}

/// One live connection: its multiplexer plus the token that ends it.
#[derive(Clone)]
struct Session {
    mux: Arc<RequestMultiplexer>,
    token: CancellationToken,
}

/// Lifecycle of one logical connection for one tenant.
///
/// Shared behind an `Arc`; all methods take `&self`. The reconnect
/// supervisor runs as a background task and is started on the first
/// successful connect.
pub struct ConnectionLifecycle {
    tenant: TenantKey,
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    registry: Arc<SubscriptionRegistry>,
    state: RwLock<ConnectionState>,
    session: RwLock<Option<Session>>,
    stop: CancellationToken,
    supervisor_running: AtomicBool,
    // Serializes connect attempts between callers and the supervisor.
    connect_gate: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ConnectionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLifecycle")
            .field("tenant", &self.tenant)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl ConnectionLifecycle {
    /// Create a lifecycle in the `Disconnected` state. No socket is
    /// opened until [`connect`](Self::connect).
    #[must_use]
    pub fn new(tenant: TenantKey, settings: ConnectionSettings, connector: Arc<dyn Connector>) -> Arc<Self> {
        let registry = Arc::new(SubscriptionRegistry::new(settings.history_capacity));
        Arc::new(Self {
            tenant,
            settings,
            connector,
            registry,
            state: RwLock::new(ConnectionState::Disconnected),
            session: RwLock::new(None),
            stop: CancellationToken::new(),
            supervisor_running: AtomicBool::new(false),
            connect_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// The tenant this connection belongs to.
    #[must_use]
    pub const fn tenant(&self) -> &TenantKey {
        &self.tenant
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the connection is ready for requests.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.state() == ConnectionState::Authorized && self.live_session().is_some()
    }

    /// Number of requests currently awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.live_session().map_or(0, |s| s.mux.pending_requests())
    }

    /// Bring the connection up: open the socket, authorize when the
    /// tenant carries a credential, and start the keepalive monitor
    /// and reconnect supervisor. Idempotent; a live connection is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::Authorization`] when the credential is
    ///   rejected. Fatal: no retry is attempted.
    /// - [`ConnectError::AttemptsExhausted`] when every attempt in the
    ///   backoff budget failed on transport errors.
    /// - [`ConnectError::Closed`] after [`stop`](Self::stop).
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectError> {
        if self.stop.is_cancelled() {
            return Err(ConnectError::Closed);
        }

        let _gate = self.connect_gate.lock().await;
        if self.live_session().is_some() {
            return Ok(());
        }

        self.try_until_connected().await?;
        self.ensure_supervisor();
        Ok(())
    }

    /// Tear the connection down permanently. Pending requests fail
    /// fast, background tasks exit, and the state becomes `Closed`.
    pub fn stop(&self) {
        tracing::info!(tenant = %self.tenant, "stopping connection");
        self.stop.cancel();
        *self.session.write() = None;
        *self.state.write() = ConnectionState::Closed;
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Send one request over the live connection.
    ///
    /// # Errors
    ///
    /// [`RequestError::ConnectionClosed`] when no live connection
    /// exists; otherwise whatever the exchange produced.
    pub async fn send_request<R: ApiRequest>(&self, request: R) -> Result<Response, RequestError> {
        let session = self.live_session().ok_or(RequestError::ConnectionClosed)?;
        session.mux.send(request, self.settings.request_timeout).await
    }

    /// Fetch the account balance.
    ///
    /// # Errors
    ///
    /// Propagates the exchange failure; `MissingField` when the
    /// response has no balance payload.
    pub async fn balance(&self) -> Result<BalanceState, RequestError> {
        let response = self.send_request(BalanceRequest::new()).await?;
        parse_field(&response, "balance")
    }

    /// Fetch the list of tradeable symbols.
    ///
    /// # Errors
    ///
    /// Propagates the exchange failure; `MissingField` when the
    /// response has no symbol list.
    pub async fn active_symbols(&self) -> Result<Vec<SymbolInfo>, RequestError> {
        let response = self.send_request(ActiveSymbolsRequest::brief()).await?;
        parse_field(&response, "active_symbols")
    }

    /// Fetch one tick snapshot without subscribing.
    ///
    /// # Errors
    ///
    /// Propagates the exchange failure; `MissingField` when the
    /// response has no tick payload.
    pub async fn tick_snapshot(&self, symbol: &str) -> Result<Sample, RequestError> {
        let response = self.send_request(TickRequest::snapshot(symbol)).await?;
        let tick: Tick = parse_field(&response, "tick")?;
        Ok(Sample::new(tick.symbol, tick.quote, tick.epoch))
    }

    /// Request a contract price proposal.
    ///
    /// # Errors
    ///
    /// Propagates the exchange failure.
    pub async fn proposal(&self, params: ContractParameters) -> Result<Response, RequestError> {
        self.send_request(ProposalRequest::new(params)).await
    }

    /// Buy a contract at up to `price`.
    ///
    /// # Errors
    ///
    /// Propagates the exchange failure.
    pub async fn buy(&self, price: f64, params: ContractParameters) -> Result<Response, RequestError> {
        self.send_request(BuyRequest::new(price, params)).await
    }

    /// Fetch the open-contract portfolio.
    ///
    /// # Errors
    ///
    /// Propagates the exchange failure.
    pub async fn portfolio(&self) -> Result<Response, RequestError> {
        self.send_request(PortfolioRequest::new()).await
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to live ticks for `symbol`. Idempotent per symbol.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError`] when no live connection exists or the
    /// server rejects the subscription.
    pub async fn subscribe(
        &self,
        symbol: &str,
        callback: TickCallback,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        let session = self
            .live_session()
            .ok_or(SubscriptionError::Request(RequestError::ConnectionClosed))?;
        self.registry
            .subscribe(&session.mux, symbol, callback, self.settings.request_timeout)
            .await
    }

    /// Cancel a subscription. Best-effort on the server side; the
    /// local registration is always removed.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        match self.live_session() {
            Some(session) => {
                self.registry
                    .unsubscribe(&session.mux, handle, self.settings.request_timeout)
                    .await;
            }
            None => self.registry.remove_local(handle.symbol()).await,
        }
    }

    /// The most recent sample for `symbol`, from local history.
    #[must_use]
    pub fn get_latest(&self, symbol: &str) -> Option<Sample> {
        self.registry.get_latest(symbol)
    }

    /// Up to the `limit` most recent samples for `symbol`, oldest to
    /// newest, from local history.
    #[must_use]
    pub fn get_history(&self, symbol: &str, limit: usize) -> Vec<Sample> {
        self.registry.get_history(symbol, limit)
    }

    /// The most recent pushed balance, if any.
    #[must_use]
    pub fn latest_balance(&self) -> Option<BalanceState> {
        self.registry.latest_balance()
    }

    /// Symbols with an active subscription.
    #[must_use]
    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.registry.active_symbols()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn live_session(&self) -> Option<Session> {
        self.session
            .read()
            .clone()
            .filter(|s| !s.token.is_cancelled())
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write();
        if *state != next {
            tracing::debug!(tenant = %self.tenant, from = ?*state, to = ?next, "connection state change");
            *state = next;
        }
    }

    /// Run the bounded backoff loop until a session is installed or
    /// the budget is spent. Authorization rejection aborts immediately.
    async fn try_until_connected(&self) -> Result<(), ConnectError> {
        let mut policy = ReconnectPolicy::new(self.settings.reconnect.clone());

        loop {
            match self.establish().await {
                Ok(session) => {
                    let rearmed = self
                        .registry
                        .resubscribe_all(&session.mux, self.settings.request_timeout)
                        .await;
                    if rearmed > 0 {
                        tracing::info!(tenant = %self.tenant, rearmed, "subscriptions re-armed");
                    }
                    self.install(session);
                    return Ok(());
                }
                Err(e @ ConnectError::Authorization(_)) => {
                    self.set_state(ConnectionState::Disconnected);
                    tracing::error!(tenant = %self.tenant, error = %e, "authorization rejected, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    let Some(delay) = policy.next_delay() else {
                        tracing::error!(tenant = %self.tenant, attempts = policy.attempt_count(),
                            "connection attempts exhausted");
                        return Err(ConnectError::AttemptsExhausted(policy.attempt_count()));
                    };
                    tracing::warn!(tenant = %self.tenant, attempt = policy.attempt_count(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e, "connection attempt failed, retrying");
                    tokio::select! {
                        () = self.stop.cancelled() => return Err(ConnectError::Closed),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Open a socket, wire the reader, and authorize. The returned
    /// session is not installed yet; the caller re-arms subscriptions
    /// first.
    async fn establish(&self) -> Result<Session, ConnectError> {
        self.set_state(ConnectionState::Connecting);

        let (sink, source) = self
            .connector
            .connect(&self.settings.url)
            .await
            .map_err(ConnectError::Transport)?;

        let token = self.stop.child_token();
        let mux = Arc::new(RequestMultiplexer::new(sink, token.clone()));
        mux.spawn_reader(source, Arc::clone(&self.registry));
        self.set_state(ConnectionState::Connected);

        if let Some(credential) = self.tenant.credential() {
            self.set_state(ConnectionState::Authorizing);
            let result = mux
                .send(AuthorizeRequest::new(credential), self.settings.request_timeout)
                .await;
            if let Err(e) = result {
                token.cancel();
                return Err(match e {
                    RequestError::Api(api) => ConnectError::Authorization(api),
                    other => ConnectError::Handshake(other),
                });
            }
            tracing::info!(tenant = %self.tenant, "authorized");
        } else {
            tracing::debug!("anonymous tenant, skipping authorization");
        }

        self.set_state(ConnectionState::Authorized);
        Ok(Session { mux, token })
    }

    fn install(&self, session: Session) {
        KeepaliveMonitor::new(
            self.settings.keepalive.clone(),
            Arc::clone(&session.mux),
            session.token.clone(),
        )
        .spawn();
        *self.session.write() = Some(session);
    }

    fn ensure_supervisor(self: &Arc<Self>) {
        if self.supervisor_running.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(this.run_supervisor());
    }

    /// Watches the live session token and reconnects when it cancels.
    /// Exits on stop, on a fatal authorization error, or when the
    /// backoff budget is spent.
    async fn run_supervisor(self: Arc<Self>) {
        loop {
            let Some(session) = self.live_session() else { break };

            tokio::select! {
                () = self.stop.cancelled() => break,
                () = session.token.cancelled() => {}
            }
            if self.stop.is_cancelled() {
                break;
            }

            tracing::warn!(tenant = %self.tenant, "connection lost, reconnecting");
            self.set_state(ConnectionState::Disconnected);
            *self.session.write() = None;

            let _gate = self.connect_gate.lock().await;
            if self.stop.is_cancelled() {
                break;
            }
            if let Err(e) = self.try_until_connected().await {
                tracing::error!(tenant = %self.tenant, error = %e, "reconnect abandoned");
                break;
            }
        }

        self.supervisor_running.store(false, Ordering::Release);
        tracing::debug!(tenant = %self.tenant, "reconnect supervisor exited");
    }
}

fn parse_field<T: serde::de::DeserializeOwned>(
    response: &Response,
    key: &'static str,
) -> Result<T, RequestError> {
    response
        .field(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .ok_or(RequestError::MissingField(key))
}
