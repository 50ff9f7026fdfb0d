//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Broadcast hub, stream sessions, and the publish gate.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Synthetic random-walk price feed.
pub mod feed;

/// Health check HTTP endpoint.
pub mod health;

/// JSON and SSE API over the price service.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing and OpenTelemetry integration.
pub mod telemetry;
