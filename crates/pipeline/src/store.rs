//! Persistent mirror store
//!
//! Keyed upsert access to the local mirror, injected into the reconciler and
//! aggregator. All lookups and writes key on the provider's external id,
//! never on a surrogate id.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use billmirror_shared::{
    AffiliateRow, CustomerRow, InvoiceDiscount, InvoiceLine, InvoiceRow, PackageRow,
    PaymentInterval, SubscriptionRow, SyncResult,
};

#[allow(async_fn_in_trait)]
pub trait MirrorStore: Send + Sync {
    async fn find_customer(&self, external_id: &str) -> SyncResult<Option<CustomerRow>>;
    async fn insert_customer(&self, row: &CustomerRow) -> SyncResult<()>;
    async fn update_customer(&self, row: &CustomerRow) -> SyncResult<()>;

    async fn find_subscription(&self, external_id: &str) -> SyncResult<Option<SubscriptionRow>>;
    async fn insert_subscription(&self, row: &SubscriptionRow) -> SyncResult<()>;
    async fn update_subscription(&self, row: &SubscriptionRow) -> SyncResult<()>;
    async fn delete_subscription(&self, external_id: &str) -> SyncResult<()>;
    /// Backfill-only operation; steady-state reconciliation upserts.
    async fn truncate_subscriptions(&self) -> SyncResult<()>;
    async fn all_subscriptions(&self) -> SyncResult<Vec<SubscriptionRow>>;

    async fn find_invoice(&self, external_id: &str) -> SyncResult<Option<InvoiceRow>>;
    async fn insert_invoice(&self, row: &InvoiceRow) -> SyncResult<()>;
    async fn update_invoice(&self, row: &InvoiceRow) -> SyncResult<()>;
    async fn delete_invoice(&self, external_id: &str) -> SyncResult<()>;
    async fn invoices_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SyncResult<Vec<InvoiceRow>>;
    async fn all_invoices(&self) -> SyncResult<Vec<InvoiceRow>>;

    async fn tracked_packages(&self) -> SyncResult<Vec<PackageRow>>;
    async fn affiliates(&self) -> SyncResult<Vec<AffiliateRow>>;
}

/// Postgres-backed mirror store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Invoice rows carry typed JSONB columns, so they go through a private
// database row type instead of deriving FromRow on the domain type.
#[derive(sqlx::FromRow)]
struct DbInvoice {
    external_id: String,
    customer_id: Option<String>,
    subscription_id: Option<String>,
    billing_reason: Option<String>,
    collection_method: Option<String>,
    currency: String,
    subtotal: i64,
    subtotal_excluding_tax: Option<i64>,
    coupon_code: Option<String>,
    discounts: Json<Vec<InvoiceDiscount>>,
    lines: Json<Vec<InvoiceLine>>,
    paid_at: Option<DateTime<Utc>>,
    voided_at: Option<DateTime<Utc>>,
    marked_uncollectible_at: Option<DateTime<Utc>>,
    payment_interval: String,
    created: DateTime<Utc>,
}

impl From<DbInvoice> for InvoiceRow {
    fn from(db: DbInvoice) -> Self {
        InvoiceRow {
            external_id: db.external_id,
            customer_id: db.customer_id,
            subscription_id: db.subscription_id,
            billing_reason: db.billing_reason,
            collection_method: db.collection_method,
            currency: db.currency,
            subtotal: db.subtotal,
            subtotal_excluding_tax: db.subtotal_excluding_tax,
            coupon_code: db.coupon_code,
            discounts: db.discounts.0,
            lines: db.lines.0,
            paid_at: db.paid_at,
            voided_at: db.voided_at,
            marked_uncollectible_at: db.marked_uncollectible_at,
            payment_interval: PaymentInterval::from_str_lossy(&db.payment_interval),
            created: db.created,
        }
    }
}

const INVOICE_COLUMNS: &str = "external_id, customer_id, subscription_id, billing_reason, \
     collection_method, currency, subtotal, subtotal_excluding_tax, coupon_code, discounts, \
     lines, paid_at, voided_at, marked_uncollectible_at, payment_interval, created";

impl MirrorStore for PgStore {
    async fn find_customer(&self, external_id: &str) -> SyncResult<Option<CustomerRow>> {
        let row = sqlx::query_as::<_, CustomerRow>(
            "SELECT external_id, name, email, description, balance, currency, invoice_prefix, \
             address, metadata, created FROM customers WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_customer(&self, row: &CustomerRow) -> SyncResult<()> {
        sqlx::query(
            "INSERT INTO customers (external_id, name, email, description, balance, currency, \
             invoice_prefix, address, metadata, created) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&row.external_id)
        .bind(&row.name)
        .bind(&row.email)
        .bind(&row.description)
        .bind(row.balance)
        .bind(&row.currency)
        .bind(&row.invoice_prefix)
        .bind(&row.address)
        .bind(&row.metadata)
        .bind(row.created)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_customer(&self, row: &CustomerRow) -> SyncResult<()> {
        sqlx::query(
            "UPDATE customers SET name = $2, email = $3, description = $4, balance = $5, \
             currency = $6, invoice_prefix = $7, address = $8, metadata = $9, created = $10 \
             WHERE external_id = $1",
        )
        .bind(&row.external_id)
        .bind(&row.name)
        .bind(&row.email)
        .bind(&row.description)
        .bind(row.balance)
        .bind(&row.currency)
        .bind(&row.invoice_prefix)
        .bind(&row.address)
        .bind(&row.metadata)
        .bind(row.created)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_subscription(&self, external_id: &str) -> SyncResult<Option<SubscriptionRow>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT external_id, customer_id, status, currency, price_id, product_id, \
             plan_amount, plan_interval, coupon_code, current_period_start, current_period_end, \
             created FROM subscriptions WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_subscription(&self, row: &SubscriptionRow) -> SyncResult<()> {
        sqlx::query(
            "INSERT INTO subscriptions (external_id, customer_id, status, currency, price_id, \
             product_id, plan_amount, plan_interval, coupon_code, current_period_start, \
             current_period_end, created) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&row.external_id)
        .bind(&row.customer_id)
        .bind(&row.status)
        .bind(&row.currency)
        .bind(&row.price_id)
        .bind(&row.product_id)
        .bind(row.plan_amount)
        .bind(&row.plan_interval)
        .bind(&row.coupon_code)
        .bind(row.current_period_start)
        .bind(row.current_period_end)
        .bind(row.created)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_subscription(&self, row: &SubscriptionRow) -> SyncResult<()> {
        sqlx::query(
            "UPDATE subscriptions SET customer_id = $2, status = $3, currency = $4, \
             price_id = $5, product_id = $6, plan_amount = $7, plan_interval = $8, \
             coupon_code = $9, current_period_start = $10, current_period_end = $11, \
             created = $12 WHERE external_id = $1",
        )
        .bind(&row.external_id)
        .bind(&row.customer_id)
        .bind(&row.status)
        .bind(&row.currency)
        .bind(&row.price_id)
        .bind(&row.product_id)
        .bind(row.plan_amount)
        .bind(&row.plan_interval)
        .bind(&row.coupon_code)
        .bind(row.current_period_start)
        .bind(row.current_period_end)
        .bind(row.created)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_subscription(&self, external_id: &str) -> SyncResult<()> {
        sqlx::query("DELETE FROM subscriptions WHERE external_id = $1")
            .bind(external_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn truncate_subscriptions(&self) -> SyncResult<()> {
        sqlx::query("TRUNCATE subscriptions").execute(&self.pool).await?;
        Ok(())
    }

    async fn all_subscriptions(&self) -> SyncResult<Vec<SubscriptionRow>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT external_id, customer_id, status, currency, price_id, product_id, \
             plan_amount, plan_interval, coupon_code, current_period_start, current_period_end, \
             created FROM subscriptions ORDER BY created",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_invoice(&self, external_id: &str) -> SyncResult<Option<InvoiceRow>> {
        let row = sqlx::query_as::<_, DbInvoice>(&format!(
            "SELECT {} FROM invoices WHERE external_id = $1",
            INVOICE_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(InvoiceRow::from))
    }

    async fn insert_invoice(&self, row: &InvoiceRow) -> SyncResult<()> {
        sqlx::query(
            "INSERT INTO invoices (external_id, customer_id, subscription_id, billing_reason, \
             collection_method, currency, subtotal, subtotal_excluding_tax, coupon_code, \
             discounts, lines, paid_at, voided_at, marked_uncollectible_at, payment_interval, \
             created) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(&row.external_id)
        .bind(&row.customer_id)
        .bind(&row.subscription_id)
        .bind(&row.billing_reason)
        .bind(&row.collection_method)
        .bind(&row.currency)
        .bind(row.subtotal)
        .bind(row.subtotal_excluding_tax)
        .bind(&row.coupon_code)
        .bind(Json(&row.discounts))
        .bind(Json(&row.lines))
        .bind(row.paid_at)
        .bind(row.voided_at)
        .bind(row.marked_uncollectible_at)
        .bind(row.payment_interval.to_string())
        .bind(row.created)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_invoice(&self, row: &InvoiceRow) -> SyncResult<()> {
        sqlx::query(
            "UPDATE invoices SET customer_id = $2, subscription_id = $3, billing_reason = $4, \
             collection_method = $5, currency = $6, subtotal = $7, subtotal_excluding_tax = $8, \
             coupon_code = $9, discounts = $10, lines = $11, paid_at = $12, voided_at = $13, \
             marked_uncollectible_at = $14, payment_interval = $15, created = $16 \
             WHERE external_id = $1",
        )
        .bind(&row.external_id)
        .bind(&row.customer_id)
        .bind(&row.subscription_id)
        .bind(&row.billing_reason)
        .bind(&row.collection_method)
        .bind(&row.currency)
        .bind(row.subtotal)
        .bind(row.subtotal_excluding_tax)
        .bind(&row.coupon_code)
        .bind(Json(&row.discounts))
        .bind(Json(&row.lines))
        .bind(row.paid_at)
        .bind(row.voided_at)
        .bind(row.marked_uncollectible_at)
        .bind(row.payment_interval.to_string())
        .bind(row.created)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_invoice(&self, external_id: &str) -> SyncResult<()> {
        sqlx::query("DELETE FROM invoices WHERE external_id = $1")
            .bind(external_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn invoices_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SyncResult<Vec<InvoiceRow>> {
        let rows = sqlx::query_as::<_, DbInvoice>(&format!(
            "SELECT {} FROM invoices WHERE created >= $1 AND created <= $2 ORDER BY created",
            INVOICE_COLUMNS
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(InvoiceRow::from).collect())
    }

    async fn all_invoices(&self) -> SyncResult<Vec<InvoiceRow>> {
        let rows = sqlx::query_as::<_, DbInvoice>(&format!(
            "SELECT {} FROM invoices ORDER BY created",
            INVOICE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(InvoiceRow::from).collect())
    }

    async fn tracked_packages(&self) -> SyncResult<Vec<PackageRow>> {
        let rows = sqlx::query_as::<_, PackageRow>(
            "SELECT id, name, price, stripe_price_id, max_teams, max_members, is_tracked \
             FROM packages WHERE is_tracked = TRUE ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn affiliates(&self) -> SyncResult<Vec<AffiliateRow>> {
        let rows = sqlx::query_as::<_, AffiliateRow>(
            "SELECT id, name, email, promocode, commission_rate, min_payout_amount, status, \
             bank_account, iban FROM affiliates ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
