//! Record reconciliation
//!
//! Projects fetched provider records into mirror rows and upserts them by
//! external id. Rows are only written when a projected field actually
//! changed. Invoices pass a three-stage exclusion filter first; an excluded
//! invoice is deleted from the mirror even if an earlier run inserted it.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use billmirror_shared::{
    CustomerRow, DiscountAmount, InvoiceDiscount, InvoiceLine, InvoiceRow, PaymentInterval,
    PlanRef, SubscriptionRow, SyncResult,
};

use crate::provider::{
    ApiCustomer, ApiDiscount, ApiDiscountAmount, ApiInvoice, ApiInvoiceLine, ApiPlan,
    ApiSubscription,
};
use crate::store::MirrorStore;

/// Invoices belonging to these products or prices are purged from the mirror.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    pub product_ids: HashSet<String>,
    pub price_ids: HashSet<String>,
}

/// Per-resource counts for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

/// Why an invoice was kept out of the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    ExcludedProduct,
    ExcludedPrice,
    NoInterval,
}

/// Outcome of projecting a fetched invoice.
#[derive(Debug, Clone)]
pub enum InvoiceProjection {
    Keep(InvoiceRow),
    Excluded(ExclusionReason),
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

fn opt_timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.map(timestamp)
}

pub fn project_customer(api: &ApiCustomer) -> CustomerRow {
    CustomerRow {
        external_id: api.id.clone(),
        name: api.name.clone(),
        email: api.email.clone(),
        description: api.description.clone(),
        balance: api.balance,
        currency: api.currency.clone(),
        invoice_prefix: api.invoice_prefix.clone(),
        address: api.address.clone(),
        metadata: api.metadata.clone(),
        created: timestamp(api.created),
    }
}

pub fn project_subscription(api: &ApiSubscription) -> SubscriptionRow {
    let item_price = api.items.data.first().and_then(|item| item.price.as_ref());
    let plan = api.plan.as_ref();

    SubscriptionRow {
        external_id: api.id.clone(),
        customer_id: api.customer.clone(),
        status: api.status.clone(),
        currency: api.currency.clone(),
        price_id: item_price
            .map(|p| p.id.clone())
            .or_else(|| plan.and_then(|p| p.id.clone())),
        product_id: plan
            .and_then(|p| p.product.clone())
            .or_else(|| item_price.and_then(|p| p.product.clone())),
        plan_amount: plan.and_then(|p| p.amount),
        plan_interval: plan.and_then(|p| p.interval.clone()),
        coupon_code: api
            .discount
            .as_ref()
            .and_then(|d| d.coupon.as_ref())
            .and_then(|c| c.name.clone().or_else(|| c.id.clone())),
        current_period_start: opt_timestamp(api.current_period_start),
        current_period_end: opt_timestamp(api.current_period_end),
        created: timestamp(api.created),
    }
}

fn project_plan(plan: &ApiPlan) -> PlanRef {
    PlanRef {
        id: plan.id.clone(),
        product: plan.product.clone(),
        nickname: plan.nickname.clone(),
        interval: plan.interval.clone(),
        interval_count: plan.interval_count,
        amount: plan.amount,
    }
}

fn project_line(line: &ApiInvoiceLine) -> InvoiceLine {
    InvoiceLine {
        description: line.description.clone(),
        plan: line.plan.as_ref().map(project_plan),
        discount_amounts: line
            .discount_amounts
            .iter()
            .map(|da: &ApiDiscountAmount| DiscountAmount {
                amount: da.amount,
                discount: da.discount.clone(),
            })
            .collect(),
    }
}

fn project_discount(discount: &ApiDiscount) -> InvoiceDiscount {
    match discount {
        ApiDiscount::Id(id) => InvoiceDiscount {
            id: Some(id.clone()),
            name: None,
            coupon_code: None,
        },
        ApiDiscount::Object { id, name, coupon } => InvoiceDiscount {
            id: id.clone(),
            name: name.clone(),
            coupon_code: coupon
                .as_ref()
                .and_then(|c| c.name.clone().or_else(|| c.id.clone())),
        },
    }
}

/// Project an invoice, applying the exclusion filter:
/// 1. first line's product on the exclusion list,
/// 2. first line's price on the exclusion list,
/// 3. no billing interval derivable from the first line.
pub fn project_invoice(api: &ApiInvoice, rules: &ExclusionRules) -> InvoiceProjection {
    let first_line = api.lines.data.first();
    let plan = first_line.and_then(|l| l.plan.as_ref());
    let line_price = first_line.and_then(|l| l.price.as_ref());

    let product_id = plan
        .and_then(|p| p.product.as_deref())
        .or_else(|| line_price.and_then(|p| p.product.as_deref()));
    if let Some(product) = product_id {
        if rules.product_ids.contains(product) {
            return InvoiceProjection::Excluded(ExclusionReason::ExcludedProduct);
        }
    }

    let price_id = plan
        .and_then(|p| p.id.as_deref())
        .or(line_price.map(|p| p.id.as_str()));
    if let Some(price) = price_id {
        if rules.price_ids.contains(price) {
            return InvoiceProjection::Excluded(ExclusionReason::ExcludedPrice);
        }
    }

    let interval = match PaymentInterval::from_plan(
        plan.and_then(|p| p.interval.as_deref()),
        plan.and_then(|p| p.interval_count),
    ) {
        Some(interval) => interval,
        None => return InvoiceProjection::Excluded(ExclusionReason::NoInterval),
    };

    let discounts: Vec<InvoiceDiscount> = api.discounts.iter().map(project_discount).collect();
    let coupon_code = discounts.iter().find_map(|d| d.coupon_code.clone());

    InvoiceProjection::Keep(InvoiceRow {
        external_id: api.id.clone(),
        customer_id: api.customer.clone(),
        subscription_id: api.subscription.clone(),
        billing_reason: api.billing_reason.clone(),
        collection_method: api.collection_method.clone(),
        currency: api.currency.clone(),
        subtotal: api.subtotal,
        subtotal_excluding_tax: api.subtotal_excluding_tax,
        coupon_code,
        discounts,
        lines: api.lines.data.iter().map(project_line).collect(),
        paid_at: opt_timestamp(api.status_transitions.paid_at),
        voided_at: opt_timestamp(api.status_transitions.voided_at),
        marked_uncollectible_at: opt_timestamp(api.status_transitions.marked_uncollectible_at),
        payment_interval: interval,
        created: timestamp(api.created),
    })
}

pub async fn reconcile_customers<S: MirrorStore>(
    store: &S,
    records: &[ApiCustomer],
) -> SyncResult<ReconcileStats> {
    let mut stats = ReconcileStats {
        fetched: records.len(),
        ..Default::default()
    };

    for record in records {
        let projected = project_customer(record);
        match store.find_customer(&projected.external_id).await? {
            None => {
                store.insert_customer(&projected).await?;
                stats.inserted += 1;
            }
            Some(existing) if existing == projected => stats.unchanged += 1,
            Some(_) => {
                store.update_customer(&projected).await?;
                stats.updated += 1;
            }
        }
    }

    tracing::info!(
        fetched = stats.fetched,
        inserted = stats.inserted,
        updated = stats.updated,
        "Reconciled customers"
    );
    Ok(stats)
}

/// Upsert subscriptions by external id and prune local rows the provider no
/// longer lists. Uniform upsert replaces the legacy truncate-and-reinsert
/// pass; [`MirrorStore::truncate_subscriptions`] stays available for
/// backfills only.
pub async fn reconcile_subscriptions<S: MirrorStore>(
    store: &S,
    records: &[ApiSubscription],
) -> SyncResult<ReconcileStats> {
    let mut stats = ReconcileStats {
        fetched: records.len(),
        ..Default::default()
    };

    let fetched_ids: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
    let stale: Vec<String> = store
        .all_subscriptions()
        .await?
        .into_iter()
        .map(|row| row.external_id)
        .filter(|id| !fetched_ids.contains(id.as_str()))
        .collect();

    for record in records {
        let projected = project_subscription(record);
        match store.find_subscription(&projected.external_id).await? {
            None => {
                store.insert_subscription(&projected).await?;
                stats.inserted += 1;
            }
            Some(existing) if existing == projected => stats.unchanged += 1,
            Some(_) => {
                store.update_subscription(&projected).await?;
                stats.updated += 1;
            }
        }
    }

    for external_id in &stale {
        store.delete_subscription(external_id).await?;
        stats.deleted += 1;
    }

    tracing::info!(
        fetched = stats.fetched,
        inserted = stats.inserted,
        updated = stats.updated,
        pruned = stats.deleted,
        "Reconciled subscriptions"
    );
    Ok(stats)
}

pub async fn reconcile_invoices<S: MirrorStore>(
    store: &S,
    records: &[ApiInvoice],
    rules: &ExclusionRules,
) -> SyncResult<ReconcileStats> {
    let mut stats = ReconcileStats {
        fetched: records.len(),
        ..Default::default()
    };
    let mut exclusions: HashMap<&'static str, usize> = HashMap::new();

    for record in records {
        match project_invoice(record, rules) {
            InvoiceProjection::Excluded(reason) => {
                if store.find_invoice(&record.id).await?.is_some() {
                    store.delete_invoice(&record.id).await?;
                    stats.deleted += 1;
                }
                let label = match reason {
                    ExclusionReason::ExcludedProduct => "excluded_product",
                    ExclusionReason::ExcludedPrice => "excluded_price",
                    ExclusionReason::NoInterval => "no_interval",
                };
                *exclusions.entry(label).or_insert(0) += 1;
            }
            InvoiceProjection::Keep(projected) => {
                match store.find_invoice(&projected.external_id).await? {
                    None => {
                        store.insert_invoice(&projected).await?;
                        stats.inserted += 1;
                    }
                    Some(existing) if existing == projected => stats.unchanged += 1,
                    Some(_) => {
                        store.update_invoice(&projected).await?;
                        stats.updated += 1;
                    }
                }
            }
        }
    }

    tracing::info!(
        fetched = stats.fetched,
        inserted = stats.inserted,
        updated = stats.updated,
        deleted = stats.deleted,
        excluded = ?exclusions,
        "Reconciled invoices"
    );
    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{customer, invoice_with_plan, subscription, InMemoryStore};
    use billmirror_shared::PaymentInterval;

    fn rules() -> ExclusionRules {
        ExclusionRules {
            product_ids: ["prod_internal".to_string()].into_iter().collect(),
            price_ids: ["price_legacy".to_string()].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn test_reconcile_customer_insert_then_noop() {
        let store = InMemoryStore::default();
        let records = vec![customer("cus_1")];

        let first = reconcile_customers(&store, &records).await.unwrap();
        assert_eq!(first.inserted, 1);

        let second = reconcile_customers(&store, &records).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 1);
        // No second write happened
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_customer_updates_changed_fields() {
        let store = InMemoryStore::default();
        let mut record = customer("cus_1");
        reconcile_customers(&store, &[record.clone()]).await.unwrap();

        record.email = Some("new@example.com".to_string());
        let stats = reconcile_customers(&store, &[record]).await.unwrap();
        assert_eq!(stats.updated, 1);

        let row = store.find_customer("cus_1").await.unwrap().unwrap();
        assert_eq!(row.email.as_deref(), Some("new@example.com"));
    }

    #[tokio::test]
    async fn test_excluded_product_invoice_is_purged() {
        let store = InMemoryStore::default();

        // First run: invoice belongs to a normal product and is mirrored
        let mut record = invoice_with_plan("in_1", "prod_ok", "price_ok", "month", 1);
        let stats = reconcile_invoices(&store, &[record.clone()], &rules()).await.unwrap();
        assert_eq!(stats.inserted, 1);

        // The product later lands on the exclusion list
        if let Some(line) = record.lines.data.first_mut() {
            if let Some(plan) = line.plan.as_mut() {
                plan.product = Some("prod_internal".to_string());
            }
        }
        let stats = reconcile_invoices(&store, &[record], &rules()).await.unwrap();
        assert_eq!(stats.deleted, 1);
        assert!(store.find_invoice("in_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_excluded_price_and_missing_interval_are_skipped() {
        let store = InMemoryStore::default();

        let legacy = invoice_with_plan("in_legacy", "prod_ok", "price_legacy", "month", 1);
        let mut no_interval = invoice_with_plan("in_bare", "prod_ok", "price_ok", "month", 1);
        no_interval.lines.data.clear();

        let stats = reconcile_invoices(&store, &[legacy, no_interval], &rules())
            .await
            .unwrap();
        assert_eq!(stats.inserted, 0);
        assert!(store.find_invoice("in_legacy").await.unwrap().is_none());
        assert!(store.find_invoice("in_bare").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interval_count_six_classified_semi_annual() {
        let store = InMemoryStore::default();
        let record = invoice_with_plan("in_6", "prod_ok", "price_ok", "month", 6);

        reconcile_invoices(&store, &[record], &rules()).await.unwrap();

        let row = store.find_invoice("in_6").await.unwrap().unwrap();
        assert_eq!(row.payment_interval, PaymentInterval::SemiAnnually);
    }

    #[tokio::test]
    async fn test_subscription_upsert_prunes_stale_rows() {
        let store = InMemoryStore::default();
        let first_pass = vec![subscription("sub_1", "cus_1"), subscription("sub_2", "cus_2")];
        reconcile_subscriptions(&store, &first_pass).await.unwrap();

        // sub_2 disappears from the provider
        let second_pass = vec![subscription("sub_1", "cus_1")];
        let stats = reconcile_subscriptions(&store, &second_pass).await.unwrap();
        assert_eq!(stats.deleted, 1);
        assert!(store.find_subscription("sub_2").await.unwrap().is_none());
        assert!(store.find_subscription("sub_1").await.unwrap().is_some());
    }
}
