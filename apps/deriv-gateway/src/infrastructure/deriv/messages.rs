//! Deriv Wire Messages
//!
//! Typed request and inbound frame shapes for the Deriv websocket API
//! (v3). Every request carries an integer `req_id` correlation field;
//! the server echoes it on the matching response. Push frames carry a
//! `subscription.id` instead of a correlation field.

use serde::{Deserialize, Serialize};

// =============================================================================
// Requests
// =============================================================================

/// A request that can be sent through the multiplexer.
///
/// The multiplexer assigns the correlation id just before the frame is
/// written; callers never set it themselves.
pub trait ApiRequest: Serialize + Send {
    /// Attach the correlation id chosen by the multiplexer.
    fn set_req_id(&mut self, id: u64);
}

/// Authorize the connection with an API token.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeRequest {
    authorize: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    req_id: Option<u64>,
}

impl AuthorizeRequest {
    /// Create an authorize request for `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            authorize: token.into(),
            req_id: None,
        }
    }
}

impl ApiRequest for AuthorizeRequest {
    fn set_req_id(&mut self, id: u64) {
        self.req_id = Some(id);
    }
}

/// Application-level liveness probe.
#[derive(Debug, Clone, Serialize)]
pub struct PingRequest {
    ping: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    req_id: Option<u64>,
}

impl PingRequest {
    /// Create a ping request.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ping: 1,
            req_id: None,
        }
    }
}

impl Default for PingRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiRequest for PingRequest {
    fn set_req_id(&mut self, id: u64) {
        self.req_id = Some(id);
    }
}

/// Account balance query.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceRequest {
    balance: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    req_id: Option<u64>,
}

impl BalanceRequest {
    /// Create a balance request.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            balance: 1,
            req_id: None,
        }
    }
}

impl Default for BalanceRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiRequest for BalanceRequest {
    fn set_req_id(&mut self, id: u64) {
        self.req_id = Some(id);
    }
}

/// Query the list of tradeable symbols.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSymbolsRequest {
    active_symbols: String,
    product_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    req_id: Option<u64>,
}

impl ActiveSymbolsRequest {
    /// Create a brief active-symbols request.
    #[must_use]
    pub fn brief() -> Self {
        Self {
            active_symbols: "brief".to_string(),
            product_type: "basic".to_string(),
            req_id: None,
        }
    }
}

impl ApiRequest for ActiveSymbolsRequest {
    fn set_req_id(&mut self, id: u64) {
        self.req_id = Some(id);
    }
}

/// Tick request: a one-shot quote, or a standing subscription when
/// `subscribe` is set.
#[derive(Debug, Clone, Serialize)]
pub struct TickRequest {
    ticks: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscribe: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    req_id: Option<u64>,
}

impl TickRequest {
    /// One-shot tick for `symbol`.
    #[must_use]
    pub fn snapshot(symbol: impl Into<String>) -> Self {
        Self {
            ticks: symbol.into(),
            subscribe: None,
            req_id: None,
        }
    }

    /// Standing tick subscription for `symbol`.
    #[must_use]
    pub fn stream(symbol: impl Into<String>) -> Self {
        Self {
            ticks: symbol.into(),
            subscribe: Some(1),
            req_id: None,
        }
    }
}

impl ApiRequest for TickRequest {
    fn set_req_id(&mut self, id: u64) {
        self.req_id = Some(id);
    }
}

/// Cancel a standing subscription by its server-assigned id.
#[derive(Debug, Clone, Serialize)]
pub struct ForgetRequest {
    forget: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    req_id: Option<u64>,
}

impl ForgetRequest {
    /// Create a forget request for `subscription_id`.
    #[must_use]
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            forget: subscription_id.into(),
            req_id: None,
        }
    }
}

impl ApiRequest for ForgetRequest {
    fn set_req_id(&mut self, id: u64) {
        self.req_id = Some(id);
    }
}

/// Contract parameters shared by proposal and buy requests.
#[derive(Debug, Clone, Serialize)]
pub struct ContractParameters {
    /// Contract type, e.g. `CALL` or `PUT`.
    pub contract_type: String,
    /// Underlying symbol.
    pub symbol: String,
    /// Contract duration in `duration_unit` units.
    pub duration: u32,
    /// Duration unit, e.g. `t` for ticks.
    pub duration_unit: String,
    /// Stake amount.
    pub amount: f64,
}

/// Price a contract before buying it.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalRequest {
    proposal: u8,
    contract_type: String,
    symbol: String,
    amount: f64,
    duration: u32,
    duration_unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    req_id: Option<u64>,
}

impl ProposalRequest {
    /// Create a proposal request from contract parameters.
    #[must_use]
    pub fn new(params: ContractParameters) -> Self {
        Self {
            proposal: 1,
            contract_type: params.contract_type,
            symbol: params.symbol,
            amount: params.amount,
            duration: params.duration,
            duration_unit: params.duration_unit,
            req_id: None,
        }
    }
}

impl ApiRequest for ProposalRequest {
    fn set_req_id(&mut self, id: u64) {
        self.req_id = Some(id);
    }
}

/// Buy a contract at up to the given price.
#[derive(Debug, Clone, Serialize)]
pub struct BuyRequest {
    buy: u8,
    price: f64,
    parameters: ContractParameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    req_id: Option<u64>,
}

impl BuyRequest {
    /// Create a buy request for the given contract.
    #[must_use]
    pub const fn new(price: f64, parameters: ContractParameters) -> Self {
        Self {
            buy: 1,
            price,
            parameters,
            req_id: None,
        }
    }
}

impl ApiRequest for BuyRequest {
    fn set_req_id(&mut self, id: u64) {
        self.req_id = Some(id);
    }
}

/// Open-positions query.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioRequest {
    portfolio: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    req_id: Option<u64>,
}

impl PortfolioRequest {
    /// Create a portfolio request.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            portfolio: 1,
            req_id: None,
        }
    }
}

impl Default for PortfolioRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiRequest for PortfolioRequest {
    fn set_req_id(&mut self, id: u64) {
        self.req_id = Some(id);
    }
}

// =============================================================================
// Inbound frames
// =============================================================================

/// A server error object, either echoed on a response or standalone.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    /// Machine-readable error code, e.g. `InvalidToken`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// A response frame, matched to its request by correlation id.
#[derive(Debug, Clone)]
pub struct Response {
    /// Correlation id echoed from the request.
    pub req_id: u64,
    /// The full decoded response object.
    pub body: serde_json::Value,
}

impl Response {
    /// The server's `msg_type` discriminator, when present.
    #[must_use]
    pub fn msg_type(&self) -> Option<&str> {
        self.body.get("msg_type").and_then(serde_json::Value::as_str)
    }

    /// The error object, if the server rejected the request.
    #[must_use]
    pub fn api_error(&self) -> Option<ApiError> {
        self.body
            .get("error")
            .and_then(|e| serde_json::from_value(e.clone()).ok())
    }

    /// The server-assigned subscription id, on subscribe acknowledgements.
    #[must_use]
    pub fn subscription_id(&self) -> Option<&str> {
        self.body
            .get("subscription")
            .and_then(|s| s.get("id"))
            .and_then(serde_json::Value::as_str)
    }

    /// A top-level field of the response body.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.body.get(key)
    }
}

/// One entry of the tradeable-symbol listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SymbolInfo {
    /// Symbol code, e.g. `R_100`.
    pub symbol: String,
    /// Human-readable name.
    #[serde(default)]
    pub display_name: String,
    /// Market the symbol trades in.
    #[serde(default)]
    pub market: String,
}

/// Payload of a live tick push.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tick {
    /// Symbol the tick belongs to.
    pub symbol: String,
    /// Quoted price.
    pub quote: f64,
    /// Server timestamp as Unix seconds.
    pub epoch: i64,
}

/// A tick pushed for a standing subscription.
#[derive(Debug, Clone)]
pub struct TickPush {
    /// Server-assigned subscription id.
    pub subscription_id: String,
    /// The tick payload.
    pub tick: Tick,
}

/// Account balance payload, on balance responses and pushes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalanceState {
    /// Current balance.
    pub balance: f64,
    /// Balance currency, e.g. `USD`.
    pub currency: String,
}

/// A balance update pushed for a standing subscription.
#[derive(Debug, Clone)]
pub struct BalancePush {
    /// Server-assigned subscription id.
    pub subscription_id: String,
    /// The balance payload.
    pub balance: BalanceState,
}

/// A standalone error frame carrying no correlation id.
#[derive(Debug, Clone)]
pub struct ErrorFrame {
    /// The server error.
    pub error: ApiError,
}

/// Every inbound frame, decoded exactly once into an exhaustive
/// variant. Downstream code matches on this instead of probing the
/// raw object for keys.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// A response carrying a correlation id.
    Response(Response),
    /// A live tick for a standing subscription.
    PushTick(TickPush),
    /// A balance update for a standing subscription.
    PushBalance(BalancePush),
    /// A standalone error frame.
    Error(ErrorFrame),
}
