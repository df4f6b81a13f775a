//! Deriv Protocol Stack
//!
//! Everything connection-shaped: the wire messages and codec, the
//! request/response multiplexer, subscription bookkeeping, keepalive,
//! reconnect backoff, the lifecycle that ties them together, and the
//! tokio-tungstenite transport adapter.

pub mod codec;
pub mod connection;
pub mod keepalive;
pub mod messages;
pub mod multiplexer;
pub mod reconnect;
pub mod subscriptions;
pub mod ws;
