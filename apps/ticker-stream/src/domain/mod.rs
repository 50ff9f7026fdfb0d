//! Domain Layer - Core types with no infrastructure dependencies.
//!
//! This layer contains the canonical ticker and price types, the active
//! ticker set, and session identity/lifecycle types.

/// Ticker symbols and price updates.
pub mod ticker;

/// The active ticker set.
pub mod registry;

/// Stream session identity and lifecycle.
pub mod session;
