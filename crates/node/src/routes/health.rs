//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use saga::product::ProductHealth;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub product_service: ProductHealth,
}

/// GET /health. Reports `degraded` instead of failing when the product
/// service is unreachable.
pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    let product_service = state.products.health_check().await;
    let status = if product_service.healthy { "ok" } else { "degraded" };
    Json(HealthResponse { status, product_service })
}
