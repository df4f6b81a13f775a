#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Deriv Gateway - Trading Connection Multiplexer
//!
//! Maintains pooled, credential-scoped websocket connections to the
//! Deriv trading API and multiplexes concurrent request/response
//! exchanges and streaming subscriptions over each one.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no external integrations
//!   - `sample`: Tick samples and bounded history
//!   - `tenant`: Credential-scoped tenant identity
//!
//! - **Application**: Port definitions
//!   - `ports`: Transport interfaces the protocol stack is built against
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `deriv`: Wire messages, codec, multiplexer, subscriptions,
//!     keepalive, reconnect, connection lifecycle, websocket transport
//!   - `pool`: LRU-bounded per-tenant connection pool
//!   - `config`: Environment-driven configuration
//!
//! # Data Flow
//!
//! ```text
//! Caller 1 ──┐
//!            │   ┌──────────────┐    ┌─────────────┐
//! Caller 2 ──┼──►│ Multiplexer  │───►│  WebSocket  │──► Deriv API
//!            │   │ (req_id map) │◄───│  (1 socket) │◄── responses + pushes
//! Caller N ──┘   └──────────────┘    └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::sample::{RingBuffer, Sample, Symbol};
pub use domain::tenant::TenantKey;

// Transport ports (for integration tests)
pub use application::ports::{Connector, FrameSink, FrameSource, TransportError};

// Connection stack
pub use infrastructure::deriv::connection::{
    ConnectError, ConnectionLifecycle, ConnectionSettings, ConnectionState,
};
pub use infrastructure::deriv::keepalive::KeepaliveConfig;
pub use infrastructure::deriv::multiplexer::{RequestError, RequestMultiplexer};
pub use infrastructure::deriv::reconnect::ReconnectConfig;
pub use infrastructure::deriv::subscriptions::{
    SubscriptionError, SubscriptionHandle, TickCallback,
};
pub use infrastructure::deriv::ws::WsConnector;

// Wire messages (for integration tests)
pub use infrastructure::deriv::messages::{
    ApiError, BalanceState, ContractParameters, Response, SymbolInfo, Tick,
};

// Pool
pub use infrastructure::pool::{PoolService, PoolSettings};

// Config
pub use infrastructure::config::{ConfigError, GatewayConfig};
