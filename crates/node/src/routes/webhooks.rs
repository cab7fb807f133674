//! Payment processor callbacks.

use std::collections::HashMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use common::CorrelationContext;
use saga::webhook::SIGNATURE_HEADER;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub received: bool,
    pub payment_status: String,
}

/// POST /webhooks/payments
#[tracing::instrument(skip_all)]
pub async fn payments(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let ctx = correlation_from(&headers);

    let status = state.webhooks.handle(signature, &body, &ctx).await.map_err(|e| {
        tracing::warn!(error = %e, correlation_id = %ctx.correlation_id, "payment webhook refused");
        ApiError::from(e)
    })?;

    Ok(Json(WebhookResponse {
        received: true,
        payment_status: status.to_string(),
    }))
}

fn correlation_from(headers: &HeaderMap) -> CorrelationContext {
    let map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();
    CorrelationContext::from_headers(&map)
}
