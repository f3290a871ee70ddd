//! Billing provider boundary
//!
//! Typed views of the provider's list payloads. Fields the pipeline does not
//! consume are dropped at deserialization; everything consumed downstream is
//! an explicit optional with a defined default, so aggregation code never
//! touches untyped maps.

use serde::Deserialize;

use billmirror_shared::SyncResult;

/// One page of a paginated list response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPage<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

impl<T> Default for ApiPage<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            has_more: false,
        }
    }
}

/// Nested list container (`{"data": [...]}`), e.g. subscription items.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Default for ApiList<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

/// Records addressable by the provider's external id. Pagination cursors on
/// the last record's id.
pub trait ExternalId {
    fn external_id(&self) -> &str;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiCustomer {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub balance: i64,
    pub currency: Option<String>,
    pub invoice_prefix: Option<String>,
    pub address: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created: i64,
}

impl ExternalId for ApiCustomer {
    fn external_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApiPlan {
    pub id: Option<String>,
    pub product: Option<String>,
    pub nickname: Option<String>,
    pub interval: Option<String>,
    pub interval_count: Option<i64>,
    pub amount: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiPrice {
    pub id: String,
    pub product: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiCoupon {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSubscriptionItem {
    pub price: Option<ApiPrice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSubscriptionDiscount {
    pub coupon: Option<ApiCoupon>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    pub currency: Option<String>,
    pub plan: Option<ApiPlan>,
    #[serde(default)]
    pub items: ApiList<ApiSubscriptionItem>,
    pub discount: Option<ApiSubscriptionDiscount>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub created: i64,
}

impl ExternalId for ApiSubscription {
    fn external_id(&self) -> &str {
        &self.id
    }
}

/// Invoice discounts arrive either as bare ids or as expanded objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiDiscount {
    Id(String),
    Object {
        id: Option<String>,
        name: Option<String>,
        coupon: Option<ApiCoupon>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiDiscountAmount {
    #[serde(default)]
    pub amount: i64,
    pub discount: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApiInvoiceLine {
    pub description: Option<String>,
    pub plan: Option<ApiPlan>,
    pub price: Option<ApiPrice>,
    #[serde(default)]
    pub discount_amounts: Vec<ApiDiscountAmount>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApiStatusTransitions {
    pub paid_at: Option<i64>,
    pub voided_at: Option<i64>,
    pub marked_uncollectible_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiInvoice {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub billing_reason: Option<String>,
    pub collection_method: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub subtotal: i64,
    pub subtotal_excluding_tax: Option<i64>,
    #[serde(default)]
    pub discounts: Vec<ApiDiscount>,
    #[serde(default)]
    pub lines: ApiList<ApiInvoiceLine>,
    #[serde(default)]
    pub status_transitions: ApiStatusTransitions,
    pub created: i64,
}

impl ExternalId for ApiInvoice {
    fn external_id(&self) -> &str {
        &self.id
    }
}

/// Paginated read access to the billing provider.
///
/// All methods take a "resume after" cursor equal to the external id of the
/// last record of the previous page and return one page of at most
/// [`crate::fetch::PAGE_SIZE`] records. Read-only; any page failure aborts
/// the whole fetch for that resource type.
#[allow(async_fn_in_trait)]
pub trait BillingProvider: Send + Sync {
    async fn customers_page(&self, starting_after: Option<&str>)
        -> SyncResult<ApiPage<ApiCustomer>>;

    async fn subscriptions_page(
        &self,
        starting_after: Option<&str>,
    ) -> SyncResult<ApiPage<ApiSubscription>>;

    async fn invoices_page(&self, starting_after: Option<&str>)
        -> SyncResult<ApiPage<ApiInvoice>>;
}
