//! Mirrored row types and derived metric types
//!
//! The billing provider is the source of truth; these rows are the local
//! mirror, keyed by the provider's external id. Provider payloads are
//! projected into these types at the sync boundary so downstream code never
//! touches untyped maps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// =============================================================================
// Enums
// =============================================================================

/// Recurrence classification of an invoice's billing, derived from the first
/// line item's plan. An interval count of exactly 6 is classified as
/// semi-annual regardless of the plan's unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentInterval {
    Day,
    Week,
    Month,
    SemiAnnually,
    Year,
}

impl PaymentInterval {
    /// Derive the interval from a plan's recurrence fields.
    /// Returns `None` when the plan carries no interval; such invoices are
    /// excluded from the mirror.
    pub fn from_plan(interval: Option<&str>, interval_count: Option<i64>) -> Option<Self> {
        if interval_count == Some(6) {
            return interval.map(|_| Self::SemiAnnually);
        }
        interval.and_then(|unit| unit.parse().ok())
    }

    /// Parse a stored interval, falling back to semi-annual for rows mirrored
    /// before interval classification existed.
    pub fn from_str_lossy(s: &str) -> Self {
        s.parse().unwrap_or(Self::SemiAnnually)
    }
}

impl std::fmt::Display for PaymentInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
            Self::SemiAnnually => write!(f, "semi-annually"),
            Self::Year => write!(f, "year"),
        }
    }
}

impl std::str::FromStr for PaymentInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "semi-annually" => Ok(Self::SemiAnnually),
            "year" => Ok(Self::Year),
            _ => Err(format!("Invalid payment interval: {}", s)),
        }
    }
}

/// Settlement status of a mirrored invoice, derived from the provider's
/// status-transition timestamps. `Upcoming` is only produced by the payment
/// calendar projector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Failed,
    Unpaid,
    Upcoming,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paid => write!(f, "paid"),
            Self::Failed => write!(f, "failed"),
            Self::Unpaid => write!(f, "unpaid"),
            Self::Upcoming => write!(f, "upcoming"),
        }
    }
}

// =============================================================================
// Mirrored rows
// =============================================================================

/// Mirrored customer. Never auto-deleted; created or updated on each pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CustomerRow {
    pub external_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub description: Option<String>,
    pub balance: i64,
    pub currency: Option<String>,
    pub invoice_prefix: Option<String>,
    pub address: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
    pub created: DateTime<Utc>,
}

/// Mirrored subscription, upserted by external id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SubscriptionRow {
    pub external_id: String,
    pub customer_id: String,
    pub status: String,
    pub currency: Option<String>,
    pub price_id: Option<String>,
    pub product_id: Option<String>,
    pub plan_amount: Option<i64>,
    pub plan_interval: Option<String>,
    pub coupon_code: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

/// A discount applied to an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InvoiceDiscount {
    pub id: Option<String>,
    pub name: Option<String>,
    pub coupon_code: Option<String>,
}

/// Discount breakdown on a single invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountAmount {
    pub amount: i64,
    pub discount: Option<String>,
}

/// Plan/price reference carried by an invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlanRef {
    pub id: Option<String>,
    pub product: Option<String>,
    pub nickname: Option<String>,
    pub interval: Option<String>,
    pub interval_count: Option<i64>,
    pub amount: Option<i64>,
}

/// A single invoice line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InvoiceLine {
    pub description: Option<String>,
    pub plan: Option<PlanRef>,
    #[serde(default)]
    pub discount_amounts: Vec<DiscountAmount>,
}

/// Mirrored invoice. Upserted by external id; deleted locally when it belongs
/// to an excluded product or price, or carries no resolvable interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRow {
    pub external_id: String,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub billing_reason: Option<String>,
    pub collection_method: Option<String>,
    pub currency: String,
    /// Minor units, pre-discount.
    pub subtotal: i64,
    pub subtotal_excluding_tax: Option<i64>,
    pub coupon_code: Option<String>,
    pub discounts: Vec<InvoiceDiscount>,
    pub lines: Vec<InvoiceLine>,
    pub paid_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub marked_uncollectible_at: Option<DateTime<Utc>>,
    pub payment_interval: PaymentInterval,
    pub created: DateTime<Utc>,
}

impl InvoiceRow {
    /// Discount amount on the first line, if any.
    pub fn first_discount_amount(&self) -> Option<i64> {
        self.lines
            .first()
            .and_then(|line| line.discount_amounts.first())
            .map(|da| da.amount)
    }

    /// Subtotal with the first-line discount subtracted, in minor units.
    pub fn effective_subtotal(&self) -> i64 {
        if self.discounts.is_empty() {
            return self.subtotal;
        }
        self.subtotal - self.first_discount_amount().unwrap_or(0)
    }

    /// Settlement status derived from the status-transition timestamps.
    /// Voided or uncollectible wins over a paid timestamp.
    pub fn payment_status(&self) -> PaymentStatus {
        if self.voided_at.is_some() || self.marked_uncollectible_at.is_some() {
            PaymentStatus::Failed
        } else if self.paid_at.is_some() {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Unpaid
        }
    }

    /// Human-readable plan name: plan nickname, else line description.
    pub fn plan_name(&self) -> String {
        self.lines
            .first()
            .and_then(|line| {
                line.plan
                    .as_ref()
                    .and_then(|p| p.nickname.clone())
                    .or_else(|| line.description.clone())
            })
            .unwrap_or_else(|| "Plan".to_string())
    }
}

/// Local package definition mapped to a provider price.
/// Only tracked packages appear in the dashboard subscriber breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PackageRow {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub stripe_price_id: Option<String>,
    pub max_teams: Option<i32>,
    pub max_members: Option<i32>,
    pub is_tracked: bool,
}

/// Affiliate with a promocode; invoices carrying the code attribute revenue
/// to the affiliate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AffiliateRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub promocode: String,
    pub commission_rate: f64,
    pub min_payout_amount: f64,
    pub status: String,
    pub bank_account: Option<String>,
    pub iban: Option<String>,
}

// =============================================================================
// Metrics snapshot
// =============================================================================

/// One bucket of the 12-point monthly revenue series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthRevenue {
    pub month: String,
    pub revenue: f64,
    pub currency: String,
}

/// One of the ten most recent paid invoices this month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSale {
    pub id: String,
    /// Major units.
    pub amount: f64,
    pub created_at: DateTime<Utc>,
    pub customer: String,
    pub currency: String,
    pub description: String,
    pub status: String,
}

/// Subscriber count for a tracked package. Packages with zero subscribers
/// are omitted from the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSubscribers {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub subscribers: i64,
    pub currency: Option<String>,
    pub max_teams: Option<i32>,
    pub max_members: Option<i32>,
}

/// The cached dashboard aggregate, fully recomputed and replaced on each
/// sync run. Read-only to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub revenue_this_month: f64,
    pub revenue_last_month: f64,
    pub subscriptions_this_month: i64,
    pub subscriptions_last_month: i64,
    pub sales_this_month: i64,
    pub sales_last_month: i64,
    pub monthly_revenue: Vec<MonthRevenue>,
    pub recent_sales: Vec<RecentSale>,
    pub packages: Vec<PackageSubscribers>,
    pub last_updated: DateTime<Utc>,
}
