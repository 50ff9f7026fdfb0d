//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for the price feed and the publish entry point.
pub mod ports;

/// Ticker registry and the outward price service.
pub mod services;
