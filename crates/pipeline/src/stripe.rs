//! Stripe list-endpoint client
//!
//! Implements [`BillingProvider`] against the plain REST list endpoints.
//! The mirror only ever reads three collections, so the full Stripe object
//! model is not pulled in; pages are deserialized straight into the typed
//! boundary records.

use serde::de::DeserializeOwned;
use std::time::Duration;

use billmirror_shared::{SyncError, SyncResult};

use crate::fetch::PAGE_SIZE;
use crate::provider::{ApiCustomer, ApiInvoice, ApiPage, ApiSubscription, BillingProvider};

const DEFAULT_BASE_URL: &str = "https://api.stripe.com/v1";

/// Stripe billing provider
#[derive(Clone)]
pub struct StripeProvider {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeProvider {
    pub fn new(secret_key: impl Into<String>) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            secret_key: secret_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Override the API base URL (used against a stub server in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn page<T: DeserializeOwned>(
        &self,
        resource: &str,
        starting_after: Option<&str>,
    ) -> SyncResult<ApiPage<T>> {
        let mut request = self
            .http
            .get(format!("{}/{}", self.base_url, resource))
            .basic_auth(&self.secret_key, None::<&str>)
            .query(&[("limit", PAGE_SIZE.to_string())]);

        if let Some(cursor) = starting_after {
            request = request.query(&[("starting_after", cursor)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Provider(format!("{} request failed: {}", resource, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Provider(format!(
                "{} returned HTTP {}",
                resource, status
            )));
        }

        response
            .json::<ApiPage<T>>()
            .await
            .map_err(|e| SyncError::Provider(format!("{} returned malformed page: {}", resource, e)))
    }
}

impl BillingProvider for StripeProvider {
    async fn customers_page(
        &self,
        starting_after: Option<&str>,
    ) -> SyncResult<ApiPage<ApiCustomer>> {
        self.page("customers", starting_after).await
    }

    async fn subscriptions_page(
        &self,
        starting_after: Option<&str>,
    ) -> SyncResult<ApiPage<ApiSubscription>> {
        self.page("subscriptions", starting_after).await
    }

    async fn invoices_page(&self, starting_after: Option<&str>) -> SyncResult<ApiPage<ApiInvoice>> {
        self.page("invoices", starting_after).await
    }
}
