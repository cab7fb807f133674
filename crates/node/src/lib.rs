//! Process host for the order saga.
//!
//! Runs the order, inventory and payment services against one in-memory
//! broker and serves the health, metrics and payment webhook endpoints,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod runtime;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{PaymentWebhookProcessor, ProductServiceAdapter};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::{ApiError, NodeError, Result};
pub use runtime::Runtime;

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub products: Arc<ProductServiceAdapter>,
    pub webhooks: Arc<PaymentWebhookProcessor>,
}

impl From<&Runtime> for AppState {
    fn from(runtime: &Runtime) -> Self {
        Self {
            products: runtime.products.clone(),
            webhooks: runtime.webhooks.clone(),
        }
    }
}

/// Creates the router with every route and layer.
pub fn create_app(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/webhooks/payments", post(routes::webhooks::payments))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
