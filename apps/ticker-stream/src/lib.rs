#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Ticker Stream - Live Price Fan-out
//!
//! Tracks a dynamic set of tickers, receives price updates from a feed for
//! each of them, and fans every update out to any number of independent,
//! possibly slow, possibly disconnecting client streams.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Value types with no I/O
//!   - `ticker`: Canonical symbols and price updates
//!   - `registry`: The active ticker set
//!   - `session`: Session identity and lifecycle states
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Price feed and publish sink interfaces
//!   - `services`: Ticker registry and the outward price service
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `broadcast`: Hub, per-session mailboxes, stream sessions, publish gate
//!   - `feed`: Synthetic random-walk feed
//!   - `http`: JSON/SSE API
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                 start/stop            publish
//! TickerRegistry ───────────► PriceFeed ───────► TrackedTickerSink
//!       │                                              │ (active set only)
//!       └──────── TickerSet ◄──── membership ──────────┤
//!                                                      ▼
//!                                               BroadcastHub ──► mailbox ──► StreamSession 1
//!                                                            ──► mailbox ──► StreamSession N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core value types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::registry::TickerSet;
pub use domain::session::{CloseReason, SessionId, SessionState};
pub use domain::ticker::{PriceUpdate, Ticker, TickerError};

// Ports and services
pub use application::ports::{FeedError, PriceFeed, PriceSink};
pub use application::services::{
    GetTickersResponse, PriceService, RegistryError, ServiceError, TickerRegistry, TickerResponse,
};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, FeedSettings, ServerSettings, StreamConfig,
};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, DeliveryFailure, PublishReport, SessionError,
    SessionHandle, SharedBroadcastHub, StreamSession, TrackedTickerSink,
};

// Feed
pub use infrastructure::feed::SyntheticFeed;

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::http::{ApiServer, ApiServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
