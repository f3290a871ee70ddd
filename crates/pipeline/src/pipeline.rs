//! Sync run orchestration
//!
//! One run flushes the metrics cache, drains and reconciles each resource
//! type, then rebuilds and caches the dashboard snapshot. A failure while
//! fetching one resource skips that resource's reconciliation and moves on;
//! the mirror keeps whatever the last successful pass wrote.

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use billmirror_shared::{MetricsSnapshot, SyncError, SyncResult};

use crate::cache::{put_json, MetricsCache, DASHBOARD_KEY};
use crate::config::SyncConfig;
use crate::fetch::{fetch_all_customers, fetch_all_invoices, fetch_all_subscriptions};
use crate::metrics::MetricsAggregator;
use crate::provider::BillingProvider;
use crate::rates::RateTable;
use crate::reconcile::{
    reconcile_customers, reconcile_invoices, reconcile_subscriptions, ReconcileStats,
};
use crate::store::MirrorStore;

/// What a sync run accomplished. A `None` resource means its fetch failed
/// and the mirror was left untouched for that resource.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub customers: Option<ReconcileStats>,
    pub subscriptions: Option<ReconcileStats>,
    pub invoices: Option<ReconcileStats>,
    pub snapshot: Option<MetricsSnapshot>,
}

pub struct SyncPipeline<P, S, C> {
    provider: P,
    store: S,
    cache: C,
    config: SyncConfig,
    run_lock: Mutex<()>,
}

impl<P, S, C> SyncPipeline<P, S, C>
where
    P: BillingProvider,
    S: MirrorStore,
    C: MetricsCache,
{
    pub fn new(provider: P, store: S, cache: C, config: SyncConfig) -> Self {
        Self {
            provider,
            store,
            cache,
            config,
            run_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run a full sync. Refuses to overlap with an already-running pass.
    pub async fn run(&self, now: DateTime<Utc>) -> SyncResult<SyncReport> {
        let _guard = self.run_lock.try_lock().map_err(|_| SyncError::SyncInProgress)?;

        tracing::info!("Starting sync run");
        self.cache.flush().await?;

        let mut report = SyncReport::default();

        match fetch_all_customers(&self.provider).await {
            Ok(records) => {
                report.customers = Some(reconcile_customers(&self.store, &records).await?);
            }
            Err(e) => tracing::error!(error = %e, "Customer fetch failed, mirror left untouched"),
        }

        match fetch_all_subscriptions(&self.provider).await {
            Ok(records) => {
                report.subscriptions =
                    Some(reconcile_subscriptions(&self.store, &records).await?);
            }
            Err(e) => {
                tracing::error!(error = %e, "Subscription fetch failed, mirror left untouched")
            }
        }

        let rules = self.config.exclusion_rules();
        match fetch_all_invoices(&self.provider).await {
            Ok(records) => {
                report.invoices = Some(reconcile_invoices(&self.store, &records, &rules).await?);
            }
            Err(e) => tracing::error!(error = %e, "Invoice fetch failed, mirror left untouched"),
        }

        report.snapshot = Some(self.refresh_metrics(now).await?);

        tracing::info!("Sync run complete");
        Ok(report)
    }

    /// Rebuild and cache the dashboard snapshot from the mirror as it
    /// stands, without talking to the provider.
    pub async fn refresh_metrics(&self, now: DateTime<Utc>) -> SyncResult<MetricsSnapshot> {
        let rates = RateTable::load(&self.config.rates_path);
        if rates.is_empty() {
            tracing::warn!(
                path = %self.config.rates_path.display(),
                "No rate snapshot, amounts reported unconverted"
            );
        }

        let aggregator =
            MetricsAggregator::new(&self.store, &rates, self.config.target_currency.clone());
        let snapshot = aggregator.compute_snapshot(now).await?;

        put_json(&self.cache, DASHBOARD_KEY, &snapshot, self.config.cache_ttl).await?;
        tracing::info!(
            revenue_this_month = snapshot.revenue_this_month,
            sales_this_month = snapshot.sales_this_month,
            "Dashboard snapshot cached"
        );
        Ok(snapshot)
    }
}
