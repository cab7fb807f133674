//! Client side of the product service, wrapped in a circuit breaker and a
//! retry policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::ProductId;
use futures_util::future::join_all;
use resilience::{CircuitBreaker, CircuitBreakerError, Classify, ErrorKind, RetryPolicy, guarded_call};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Breaker and registry name of the product service dependency.
pub const PRODUCT_SERVICE: &str = "product-service";

pub const UNAVAILABLE_MESSAGE: &str = "Product service is temporarily unavailable";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemToValidate {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedItem {
    pub product_id: ProductId,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_price: Option<f64>,
    #[serde(default, alias = "availableQuantity")]
    pub stock: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artisan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductValidation {
    pub valid: bool,
    #[serde(default)]
    pub items: Vec<ValidatedItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl ProductValidation {
    /// Answer used when the product service cannot be consulted.
    pub fn unavailable() -> Self {
        Self {
            valid: false,
            items: Vec::new(),
            errors: Some(vec![UNAVAILABLE_MESSAGE.to_string()]),
        }
    }

    /// Human-readable reason for a rejected validation.
    pub fn rejection_reason(&self) -> String {
        let mut reasons: Vec<String> = self.errors.clone().unwrap_or_default();
        reasons.extend(self.items.iter().filter(|i| !i.available).map(|i| match &i.error {
            Some(error) => format!("{}: {}", i.product_id, error),
            None => format!("{}: unavailable", i.product_id),
        }));
        if reasons.is_empty() {
            "Product validation failed".to_string()
        } else {
            reasons.join("; ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductAvailability {
    pub product_id: ProductId,
    pub available: bool,
    #[serde(default, alias = "quantity")]
    pub stock: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artisan_id: Option<String>,
}

impl ProductAvailability {
    pub fn unknown(product_id: &ProductId) -> Self {
        Self {
            product_id: product_id.clone(),
            available: false,
            stock: 0,
            price: None,
            artisan_id: None,
        }
    }
}

/// Result of a product service health probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductHealth {
    pub healthy: bool,
    pub circuit: &'static str,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProductServiceError {
    #[error("product service answered HTTP {status}")]
    Status { status: u16 },

    #[error("product service request failed: {message}")]
    Transport { kind: ErrorKind, message: String },

    #[error("unreadable product service response: {0}")]
    Decode(String),
}

impl Classify for ProductServiceError {
    fn kind(&self) -> ErrorKind {
        match self {
            ProductServiceError::Status { status: 429 } => ErrorKind::RateLimited,
            ProductServiceError::Status { status } if *status >= 500 => ErrorKind::Unavailable,
            ProductServiceError::Status { .. } | ProductServiceError::Decode(_) => ErrorKind::Validation,
            ProductServiceError::Transport { kind, .. } => *kind,
        }
    }
}

impl From<reqwest::Error> for ProductServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ProductServiceError::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return ProductServiceError::Status {
                status: status.as_u16(),
            };
        }
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() || err.is_request() {
            ErrorKind::Network
        } else {
            ErrorKind::from_message(&err.to_string())
        };
        ProductServiceError::Transport {
            kind,
            message: err.to_string(),
        }
    }
}

/// Raw access to the product service.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn validate_items(&self, items: &[ItemToValidate]) -> Result<ProductValidation, ProductServiceError>;

    async fn availability(&self, product_id: &ProductId) -> Result<ProductAvailability, ProductServiceError>;

    async fn ping(&self) -> Result<(), ProductServiceError>;
}

/// Product service over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpProductCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProductCatalog {
    /// Builds a client whose every request carries `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProductServiceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    items: &'a [ItemToValidate],
}

#[async_trait]
impl ProductCatalog for HttpProductCatalog {
    async fn validate_items(&self, items: &[ItemToValidate]) -> Result<ProductValidation, ProductServiceError> {
        let response = self
            .client
            .post(format!("{}/products/validate-items", self.base_url))
            .json(&ValidateRequest { items })
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn availability(&self, product_id: &ProductId) -> Result<ProductAvailability, ProductServiceError> {
        let response = self
            .client
            .get(format!("{}/products/{}/availability", self.base_url, product_id))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn ping(&self) -> Result<(), ProductServiceError> {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Product lookups that degrade instead of failing.
///
/// Every call goes through the shared `product-service` breaker with the
/// retry policy inside it. When the breaker is open or retries run out,
/// callers get a conservative answer: validation fails with
/// [`UNAVAILABLE_MESSAGE`] and products read as unavailable.
pub struct ProductServiceAdapter {
    catalog: Arc<dyn ProductCatalog>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    batch_size: usize,
    health_timeout: Duration,
}

impl ProductServiceAdapter {
    pub fn new(catalog: Arc<dyn ProductCatalog>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            catalog,
            breaker,
            retry: RetryPolicy::default(),
            batch_size: 10,
            health_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Requests per availability batch; batches run one after another.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn validate_products(&self, items: &[ItemToValidate]) -> ProductValidation {
        let catalog = &self.catalog;
        match guarded_call(&self.breaker, &self.retry, |_| catalog.validate_items(items)).await {
            Ok(validation) => validation,
            Err(CircuitBreakerError::Inner(error)) if !error.inner().kind().trips_breaker() => {
                tracing::warn!(error = %error, "product service rejected the validation request");
                ProductValidation {
                    valid: false,
                    items: Vec::new(),
                    errors: Some(vec![error.into_inner().to_string()]),
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "product validation degraded to fallback");
                ProductValidation::unavailable()
            }
        }
    }

    pub async fn get_product_availability(&self, product_id: &ProductId) -> ProductAvailability {
        let catalog = &self.catalog;
        match guarded_call(&self.breaker, &self.retry, |_| catalog.availability(product_id)).await {
            Ok(availability) => availability,
            Err(error) => {
                tracing::warn!(%product_id, error = %error, "availability lookup degraded to unavailable");
                ProductAvailability::unknown(product_id)
            }
        }
    }

    /// Looks up many products, `batch_size` at a time. The result keeps the
    /// order of `product_ids`.
    pub async fn get_products_availability(&self, product_ids: &[ProductId]) -> Vec<ProductAvailability> {
        let mut results = Vec::with_capacity(product_ids.len());
        for batch in product_ids.chunks(self.batch_size) {
            let lookups = batch.iter().map(|id| self.get_product_availability(id));
            results.extend(join_all(lookups).await);
        }
        results
    }

    /// Probes the service directly with a short timeout. Never fails.
    pub async fn health_check(&self) -> ProductHealth {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.health_timeout, self.catalog.ping()).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("health check timed out after {:?}", self.health_timeout)),
        };
        ProductHealth {
            healthy: error.is_none(),
            circuit: self.breaker.state().as_str(),
            latency_ms,
            error,
        }
    }
}
