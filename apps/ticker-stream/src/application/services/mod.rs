//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - [`TickerRegistry`]: Add/remove transitions driving the price feed
//! - [`PriceService`]: Outward operations with structured responses

mod price_service;
mod registry;

pub use price_service::{GetTickersResponse, PriceService, ServiceError, TickerResponse};
pub use registry::{RegistryError, TickerRegistry};
