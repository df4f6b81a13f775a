//! Application layer - Port definitions.

/// Transport ports decoupling the multiplexer from the socket library.
pub mod ports;
