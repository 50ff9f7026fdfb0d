//! HTTP API
//!
//! JSON and Server-Sent Events surface over [`PriceService`].
//!
//! # Endpoints
//!
//! - `POST /tickers` - Track a ticker (`{"ticker": "BTCUSD"}`)
//! - `DELETE /tickers/{ticker}` - Stop tracking a ticker
//! - `GET /tickers` - List tracked tickers
//! - `GET /prices/stream` - Live price updates as SSE `price` events
//!
//! A client that disconnects from the stream drops its session, which
//! releases the hub registration.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::application::services::{PriceService, ServiceError};
use crate::infrastructure::broadcast::SessionError;

// =============================================================================
// Request / Response Types
// =============================================================================

/// Body of `POST /tickers`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddTickerRequest {
    /// Raw symbol as typed by the user.
    pub ticker: String,
}

/// Error body for rejected requests.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// What went wrong.
    pub error: String,
}

/// Error returned by API handlers.
#[derive(Debug)]
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            ServiceError::InvalidSymbol(_) => StatusCode::BAD_REQUEST,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Router
// =============================================================================

/// Build the API router.
///
/// An unparseable `cors_origin` falls back to allowing any origin.
#[must_use]
pub fn router(service: PriceService, cors_origin: &str) -> Router {
    Router::new()
        .route("/tickers", get(list_tickers).post(add_ticker))
        .route("/tickers/{ticker}", delete(remove_ticker))
        .route("/prices/stream", get(stream_prices))
        .layer(build_cors_layer(cors_origin))
        .with_state(service)
}

fn build_cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    match HeaderValue::from_str(origin) {
        Ok(value) => cors.allow_origin(value),
        Err(e) => {
            tracing::warn!(origin, error = %e, "Invalid CORS origin, allowing any");
            cors.allow_origin(Any)
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn add_ticker(
    State(service): State<PriceService>,
    Json(request): Json<AddTickerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = service.add_ticker(&request.ticker).await?;
    Ok(Json(response))
}

async fn remove_ticker(
    State(service): State<PriceService>,
    Path(ticker): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let response = service.remove_ticker(&ticker).await?;
    Ok(Json(response))
}

async fn list_tickers(State(service): State<PriceService>) -> impl IntoResponse {
    Json(service.get_tickers())
}

async fn stream_prices(
    State(service): State<PriceService>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = service.stream_prices().into_stream().map(|item| Ok(to_event(item)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_event(item: Result<crate::domain::ticker::PriceUpdate, SessionError>) -> Event {
    match item {
        Ok(update) => match Event::default().event("price").json_data(&update) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(ticker = %update.ticker(), error = %e, "Failed to encode update");
                Event::default().event("error").data("encoding failed")
            }
        },
        Err(e) => {
            tracing::info!(error = %e, "Price stream ended with error");
            Event::default().event("error").data(e.to_string())
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// API HTTP server.
pub struct ApiServer {
    port: u16,
    router: Router,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a new API server.
    #[must_use]
    pub fn new(
        port: u16,
        service: PriceService,
        cors_origin: &str,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            router: router(service, cors_origin),
            cancel,
        }
    }

    /// Run the API server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ApiServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ApiServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ApiServerError::ServerFailed(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

/// API server errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
