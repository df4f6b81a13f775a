//! Domain layer - Core types with no external-service dependencies.

/// Tick samples and bounded history buffers.
pub mod sample;

/// Tenant identity (credential contexts).
pub mod tenant;
