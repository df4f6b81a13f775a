//! Infrastructure Layer
//!
//! Concrete adapters: the Deriv protocol stack, the tenant connection
//! pool, and environment-driven configuration.

pub mod config;
pub mod deriv;
pub mod pool;
