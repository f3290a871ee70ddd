//! Dashboard metrics aggregation
//!
//! Recomputes the full dashboard snapshot from the mirror after every sync
//! run. All revenue figures are discount-adjusted, converted to the target
//! currency and reported in major units; only settled (paid) invoices count
//! toward revenue.

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, Utc};

use billmirror_shared::{
    InvoiceRow, MetricsSnapshot, MonthRevenue, PackageSubscribers, PaymentStatus, RecentSale,
    SubscriptionRow, SyncResult,
};

use crate::rates::RateTable;
use crate::store::MirrorStore;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const RECENT_SALES_LIMIT: usize = 10;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Relative change in percent, rounded to two decimals. A zero baseline
/// yields 0 when nothing changed and 100 otherwise.
pub fn percent_change(old: f64, new: f64) -> f64 {
    if old == 0.0 {
        return if new == 0.0 { 0.0 } else { 100.0 };
    }
    round2((new - old) / old * 100.0)
}

/// Midnight UTC on the first day of the given month.
pub fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap_or(NaiveDate::MIN)
        .and_time(NaiveTime::MIN)
        .and_utc()
}

fn months_back(anchor: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    anchor
        .date_naive()
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
        .and_time(NaiveTime::MIN)
        .and_utc()
}

pub struct MetricsAggregator<'a, S: MirrorStore> {
    store: &'a S,
    rates: &'a RateTable,
    target_currency: String,
}

impl<'a, S: MirrorStore> MetricsAggregator<'a, S> {
    pub fn new(store: &'a S, rates: &'a RateTable, target_currency: impl Into<String>) -> Self {
        Self {
            store,
            rates,
            target_currency: target_currency.into().to_uppercase(),
        }
    }

    /// Discount-adjusted invoice amount in major units of the target currency.
    fn invoice_amount(&self, invoice: &InvoiceRow) -> f64 {
        let major = invoice.effective_subtotal() as f64 / 100.0;
        self.rates
            .convert(major, &invoice.currency, &self.target_currency)
    }

    pub async fn compute_snapshot(&self, now: DateTime<Utc>) -> SyncResult<MetricsSnapshot> {
        let this_month_start = month_start(now.year(), now.month());
        let last_month_start = months_back(this_month_start, 1);
        let year_start = month_start(now.year(), 1);
        // In January last month belongs to the previous year
        let fetch_start = year_start.min(last_month_start);

        let invoices = self
            .store
            .invoices_created_between(fetch_start, now)
            .await?;
        let subscriptions = self.store.all_subscriptions().await?;

        let paid: Vec<&InvoiceRow> = invoices
            .iter()
            .filter(|inv| inv.payment_status() == PaymentStatus::Paid)
            .collect();

        let in_window = |inv: &InvoiceRow, start: DateTime<Utc>, end: DateTime<Utc>| {
            inv.created >= start && inv.created < end
        };

        let revenue_this_month: f64 = paid
            .iter()
            .filter(|inv| in_window(inv, this_month_start, now))
            .map(|inv| self.invoice_amount(inv))
            .sum();
        let revenue_last_month: f64 = paid
            .iter()
            .filter(|inv| in_window(inv, last_month_start, this_month_start))
            .map(|inv| self.invoice_amount(inv))
            .sum();

        let sales_this_month = paid
            .iter()
            .filter(|inv| in_window(inv, this_month_start, now))
            .count() as i64;
        let sales_last_month = paid
            .iter()
            .filter(|inv| in_window(inv, last_month_start, this_month_start))
            .count() as i64;

        let subscriptions_this_month = subscriptions
            .iter()
            .filter(|sub| sub.created >= this_month_start && sub.created < now)
            .count() as i64;
        let subscriptions_last_month = subscriptions
            .iter()
            .filter(|sub| sub.created >= last_month_start && sub.created < this_month_start)
            .count() as i64;

        let monthly_revenue = self.monthly_series(&paid, now.year());
        let recent_sales = self.recent_sales(&paid, this_month_start, now).await?;
        let packages = self.package_subscribers(&subscriptions).await?;

        Ok(MetricsSnapshot {
            revenue_this_month: round2(revenue_this_month),
            revenue_last_month: round2(revenue_last_month),
            subscriptions_this_month,
            subscriptions_last_month,
            sales_this_month,
            sales_last_month,
            monthly_revenue,
            recent_sales,
            packages,
            last_updated: now,
        })
    }

    /// The twelve calendar months of `year`, January first. Months with no
    /// settled invoices (including months still ahead) report zero revenue
    /// rather than being dropped.
    fn monthly_series(&self, paid: &[&InvoiceRow], year: i32) -> Vec<MonthRevenue> {
        (1..=12)
            .map(|month| {
                let bucket_start = month_start(year, month);
                let bucket_end = bucket_start
                    .date_naive()
                    .checked_add_months(Months::new(1))
                    .unwrap_or(NaiveDate::MAX)
                    .and_time(NaiveTime::MIN)
                    .and_utc();

                let revenue: f64 = paid
                    .iter()
                    .filter(|inv| inv.created >= bucket_start && inv.created < bucket_end)
                    .map(|inv| self.invoice_amount(inv))
                    .sum();

                MonthRevenue {
                    month: MONTH_NAMES[(month - 1) as usize].to_string(),
                    revenue: round2(revenue),
                    currency: self.target_currency.clone(),
                }
            })
            .collect()
    }

    async fn recent_sales(
        &self,
        paid: &[&InvoiceRow],
        this_month_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SyncResult<Vec<RecentSale>> {
        let mut this_month: Vec<&&InvoiceRow> = paid
            .iter()
            .filter(|inv| inv.created >= this_month_start && inv.created < now)
            .collect();
        this_month.sort_by(|a, b| b.created.cmp(&a.created));

        let mut sales = Vec::with_capacity(RECENT_SALES_LIMIT);
        for invoice in this_month.into_iter().take(RECENT_SALES_LIMIT) {
            let customer = match invoice.customer_id.as_deref() {
                Some(id) => self
                    .store
                    .find_customer(id)
                    .await?
                    .and_then(|c| c.name.or(c.email)),
                None => None,
            };

            // Recent sales render in the invoice's own currency, unconverted
            sales.push(RecentSale {
                id: invoice.external_id.clone(),
                amount: round2(invoice.effective_subtotal() as f64 / 100.0),
                created_at: invoice.created,
                customer: customer.unwrap_or_else(|| "External Sale".to_string()),
                currency: invoice.currency.clone(),
                description: invoice
                    .billing_reason
                    .clone()
                    .unwrap_or_else(|| "No description".to_string()),
                status: invoice.payment_status().to_string(),
            });
        }
        Ok(sales)
    }

    /// Active subscriber counts per tracked package, matched on the
    /// provider price id. Packages nobody subscribes to are omitted.
    async fn package_subscribers(
        &self,
        subscriptions: &[SubscriptionRow],
    ) -> SyncResult<Vec<PackageSubscribers>> {
        let packages = self.store.tracked_packages().await?;
        let mut out = Vec::new();

        for package in packages {
            let price_id = match package.stripe_price_id.as_deref() {
                Some(id) => id,
                None => continue,
            };
            let subscribers: Vec<&SubscriptionRow> = subscriptions
                .iter()
                .filter(|sub| sub.status == "active" && sub.price_id.as_deref() == Some(price_id))
                .collect();
            if subscribers.is_empty() {
                continue;
            }

            out.push(PackageSubscribers {
                id: package.id,
                name: package.name,
                price: package.price,
                subscribers: subscribers.len() as i64,
                currency: subscribers
                    .first()
                    .and_then(|sub| sub.currency.clone())
                    .map(|c| c.to_uppercase()),
                max_teams: package.max_teams,
                max_members: package.max_members,
            });
        }
        Ok(out)
    }
}
