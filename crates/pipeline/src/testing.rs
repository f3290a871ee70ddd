//! Shared test doubles: an in-memory provider, an in-memory store, and
//! fixture constructors.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use billmirror_shared::{
    AffiliateRow, CustomerRow, InvoiceRow, PackageRow, PaymentInterval, SubscriptionRow,
    SyncError, SyncResult,
};

use crate::provider::{
    ApiCustomer, ApiInvoice, ApiInvoiceLine, ApiList, ApiPage, ApiPlan, ApiSubscription,
    BillingProvider, ExternalId,
};
use crate::store::MirrorStore;

// =============================================================================
// Fixture constructors
// =============================================================================

pub fn customer(id: &str) -> ApiCustomer {
    ApiCustomer {
        id: id.to_string(),
        name: Some("Test Customer".to_string()),
        email: Some("customer@example.com".to_string()),
        description: None,
        balance: 0,
        currency: Some("eur".to_string()),
        invoice_prefix: None,
        address: None,
        metadata: serde_json::Value::Null,
        created: 1_750_000_000,
    }
}

pub fn subscription(id: &str, customer: &str) -> ApiSubscription {
    ApiSubscription {
        id: id.to_string(),
        customer: customer.to_string(),
        status: "active".to_string(),
        currency: Some("eur".to_string()),
        plan: Some(ApiPlan {
            id: Some("price_default".to_string()),
            product: Some("prod_default".to_string()),
            nickname: None,
            interval: Some("month".to_string()),
            interval_count: Some(1),
            amount: Some(2900),
        }),
        items: ApiList::default(),
        discount: None,
        current_period_start: Some(1_750_000_000),
        current_period_end: Some(1_752_600_000),
        created: 1_750_000_000,
    }
}

pub fn invoice_with_plan(
    id: &str,
    product: &str,
    price: &str,
    interval: &str,
    interval_count: i64,
) -> ApiInvoice {
    ApiInvoice {
        id: id.to_string(),
        customer: Some("cus_1".to_string()),
        subscription: Some("sub_1".to_string()),
        billing_reason: Some("subscription_cycle".to_string()),
        collection_method: Some("charge_automatically".to_string()),
        currency: "eur".to_string(),
        subtotal: 2900,
        subtotal_excluding_tax: None,
        discounts: Vec::new(),
        lines: ApiList {
            data: vec![ApiInvoiceLine {
                description: Some("Team plan".to_string()),
                plan: Some(ApiPlan {
                    id: Some(price.to_string()),
                    product: Some(product.to_string()),
                    nickname: Some("Team".to_string()),
                    interval: Some(interval.to_string()),
                    interval_count: Some(interval_count),
                    amount: Some(2900),
                }),
                price: None,
                discount_amounts: Vec::new(),
            }],
        },
        status_transitions: Default::default(),
        created: 1_750_000_000,
    }
}

pub fn paid_invoice_at(id: &str, subtotal: i64, created: DateTime<Utc>) -> InvoiceRow {
    InvoiceRow {
        external_id: id.to_string(),
        customer_id: Some("cus_1".to_string()),
        subscription_id: Some("sub_1".to_string()),
        billing_reason: Some("subscription_cycle".to_string()),
        collection_method: None,
        currency: "eur".to_string(),
        subtotal,
        subtotal_excluding_tax: None,
        coupon_code: None,
        discounts: Vec::new(),
        lines: Vec::new(),
        paid_at: Some(created),
        voided_at: None,
        marked_uncollectible_at: None,
        payment_interval: PaymentInterval::Month,
        created,
    }
}

pub fn stored_customer(id: &str, name: Option<&str>) -> CustomerRow {
    CustomerRow {
        external_id: id.to_string(),
        name: name.map(str::to_string),
        email: Some("customer@example.com".to_string()),
        description: None,
        balance: 0,
        currency: Some("eur".to_string()),
        invoice_prefix: None,
        address: None,
        metadata: serde_json::Value::Null,
        created: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
    }
}

pub fn subscription_row_at(id: &str, customer: &str, created: DateTime<Utc>) -> SubscriptionRow {
    SubscriptionRow {
        external_id: id.to_string(),
        customer_id: customer.to_string(),
        status: "active".to_string(),
        currency: None,
        price_id: None,
        product_id: None,
        plan_amount: None,
        plan_interval: Some("month".to_string()),
        coupon_code: None,
        current_period_start: None,
        current_period_end: None,
        created,
    }
}

pub fn package(id: i64, name: &str, stripe_price_id: Option<&str>) -> PackageRow {
    PackageRow {
        id,
        name: name.to_string(),
        price: 29.0,
        stripe_price_id: stripe_price_id.map(str::to_string),
        max_teams: Some(3),
        max_members: Some(10),
        is_tracked: true,
    }
}

pub fn affiliate(id: i64, name: &str, promocode: &str, commission_rate: f64) -> AffiliateRow {
    AffiliateRow {
        id,
        name: name.to_string(),
        email: "partner@example.com".to_string(),
        promocode: promocode.to_string(),
        commission_rate,
        min_payout_amount: 50.0,
        status: "active".to_string(),
        bank_account: None,
        iban: None,
    }
}

// =============================================================================
// Fake provider
// =============================================================================

#[derive(Default)]
struct FakeState {
    customer_cursors: Vec<Option<String>>,
    customer_calls: usize,
    subscription_calls: usize,
    invoice_calls: usize,
}

/// Serves canned records page by page, with switches to inject failures.
#[derive(Default)]
pub struct FakeProvider {
    customers: Vec<ApiCustomer>,
    subscriptions: Vec<ApiSubscription>,
    invoices: Vec<ApiInvoice>,
    page_size: usize,
    fail_customers_page: Option<usize>,
    fail_invoices_page: Option<usize>,
    empty_page_with_has_more: bool,
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            page_size: 100,
            ..Default::default()
        }
    }

    pub fn with_customers(mut self, customers: Vec<ApiCustomer>) -> Self {
        self.customers = customers;
        self
    }

    pub fn with_subscriptions(mut self, subscriptions: Vec<ApiSubscription>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    pub fn with_invoices(mut self, invoices: Vec<ApiInvoice>) -> Self {
        self.invoices = invoices;
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Fail the Nth customers page (1-based).
    pub fn fail_customers_on_page(mut self, page: usize) -> Self {
        self.fail_customers_page = Some(page);
        self
    }

    /// Fail the Nth invoices page (1-based).
    pub fn fail_invoices_on_page(mut self, page: usize) -> Self {
        self.fail_invoices_page = Some(page);
        self
    }

    /// Misbehave: report an empty page that still claims more data.
    pub fn force_empty_page_with_has_more(mut self) -> Self {
        self.empty_page_with_has_more = true;
        self
    }

    /// Cursors received on each customers call, in order.
    pub fn customer_cursors(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().customer_cursors.clone()
    }

    fn slice<T: Clone + ExternalId>(&self, data: &[T], cursor: Option<&str>) -> ApiPage<T> {
        let start = match cursor {
            None => 0,
            Some(c) => data
                .iter()
                .position(|r| r.external_id() == c)
                .map(|i| i + 1)
                .unwrap_or(data.len()),
        };
        let end = (start + self.page_size).min(data.len());
        ApiPage {
            data: data[start..end].to_vec(),
            has_more: end < data.len(),
        }
    }
}

impl BillingProvider for FakeProvider {
    async fn customers_page(
        &self,
        starting_after: Option<&str>,
    ) -> SyncResult<ApiPage<ApiCustomer>> {
        let call = {
            let mut state = self.state.lock().unwrap();
            state.customer_cursors.push(starting_after.map(str::to_string));
            state.customer_calls += 1;
            state.customer_calls
        };
        if self.fail_customers_page == Some(call) {
            return Err(SyncError::Provider("injected customers failure".to_string()));
        }
        if self.empty_page_with_has_more {
            return Ok(ApiPage {
                data: Vec::new(),
                has_more: true,
            });
        }
        Ok(self.slice(&self.customers, starting_after))
    }

    async fn subscriptions_page(
        &self,
        starting_after: Option<&str>,
    ) -> SyncResult<ApiPage<ApiSubscription>> {
        self.state.lock().unwrap().subscription_calls += 1;
        Ok(self.slice(&self.subscriptions, starting_after))
    }

    async fn invoices_page(&self, starting_after: Option<&str>) -> SyncResult<ApiPage<ApiInvoice>> {
        let call = {
            let mut state = self.state.lock().unwrap();
            state.invoice_calls += 1;
            state.invoice_calls
        };
        if self.fail_invoices_page == Some(call) {
            return Err(SyncError::Provider("injected invoices failure".to_string()));
        }
        Ok(self.slice(&self.invoices, starting_after))
    }
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Default)]
struct StoreState {
    customers: HashMap<String, CustomerRow>,
    subscriptions: HashMap<String, SubscriptionRow>,
    invoices: HashMap<String, InvoiceRow>,
    packages: Vec<PackageRow>,
    affiliates: Vec<AffiliateRow>,
    writes: usize,
}

/// HashMap-backed [`MirrorStore`].
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn seed_customer(&self, row: CustomerRow) {
        let mut state = self.state.lock().unwrap();
        state.customers.insert(row.external_id.clone(), row);
    }

    pub fn seed_subscription(&self, row: SubscriptionRow) {
        let mut state = self.state.lock().unwrap();
        state.subscriptions.insert(row.external_id.clone(), row);
    }

    pub fn seed_invoice(&self, row: InvoiceRow) {
        let mut state = self.state.lock().unwrap();
        state.invoices.insert(row.external_id.clone(), row);
    }

    pub fn seed_package(&self, row: PackageRow) {
        self.state.lock().unwrap().packages.push(row);
    }

    pub fn seed_affiliate(&self, row: AffiliateRow) {
        self.state.lock().unwrap().affiliates.push(row);
    }

    /// Number of mutating store calls since construction. Seeding does not
    /// count.
    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes
    }
}

impl MirrorStore for InMemoryStore {
    async fn find_customer(&self, external_id: &str) -> SyncResult<Option<CustomerRow>> {
        Ok(self.state.lock().unwrap().customers.get(external_id).cloned())
    }

    async fn insert_customer(&self, row: &CustomerRow) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.customers.insert(row.external_id.clone(), row.clone());
        Ok(())
    }

    async fn update_customer(&self, row: &CustomerRow) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.customers.insert(row.external_id.clone(), row.clone());
        Ok(())
    }

    async fn find_subscription(&self, external_id: &str) -> SyncResult<Option<SubscriptionRow>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .get(external_id)
            .cloned())
    }

    async fn insert_subscription(&self, row: &SubscriptionRow) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.subscriptions.insert(row.external_id.clone(), row.clone());
        Ok(())
    }

    async fn update_subscription(&self, row: &SubscriptionRow) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.subscriptions.insert(row.external_id.clone(), row.clone());
        Ok(())
    }

    async fn delete_subscription(&self, external_id: &str) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.subscriptions.remove(external_id);
        Ok(())
    }

    async fn truncate_subscriptions(&self) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.subscriptions.clear();
        Ok(())
    }

    async fn all_subscriptions(&self) -> SyncResult<Vec<SubscriptionRow>> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(rows)
    }

    async fn find_invoice(&self, external_id: &str) -> SyncResult<Option<InvoiceRow>> {
        Ok(self.state.lock().unwrap().invoices.get(external_id).cloned())
    }

    async fn insert_invoice(&self, row: &InvoiceRow) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.invoices.insert(row.external_id.clone(), row.clone());
        Ok(())
    }

    async fn update_invoice(&self, row: &InvoiceRow) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.invoices.insert(row.external_id.clone(), row.clone());
        Ok(())
    }

    async fn delete_invoice(&self, external_id: &str) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.invoices.remove(external_id);
        Ok(())
    }

    async fn invoices_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SyncResult<Vec<InvoiceRow>> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .invoices
            .values()
            .filter(|inv| inv.created >= start && inv.created <= end)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(rows)
    }

    async fn all_invoices(&self) -> SyncResult<Vec<InvoiceRow>> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .invoices
            .values()
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(rows)
    }

    async fn tracked_packages(&self) -> SyncResult<Vec<PackageRow>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .packages
            .iter()
            .filter(|p| p.is_tracked)
            .cloned()
            .collect())
    }

    async fn affiliates(&self) -> SyncResult<Vec<AffiliateRow>> {
        Ok(self.state.lock().unwrap().affiliates.clone())
    }
}
