//! Billing data synchronization and derived-metrics pipeline.
//!
//! A scheduled run pulls customers, subscriptions, and invoices from the
//! billing provider page by page, reconciles them into the local Postgres
//! mirror, and rebuilds the cached dashboard metrics snapshot. The payment
//! calendar and affiliate statements read the mirror directly.
//!
//! Boundaries are injected: [`provider::BillingProvider`] for the paginated
//! read API, [`store::MirrorStore`] for the keyed upsert target, and
//! [`cache::MetricsCache`] for the snapshot cache.

pub mod affiliate;
pub mod cache;
pub mod calendar;
pub mod config;
pub mod fetch;
pub mod metrics;
pub mod pipeline;
pub mod provider;
pub mod rates;
pub mod reconcile;
pub mod store;
pub mod stripe;

#[cfg(test)]
pub(crate) mod testing;

pub use config::SyncConfig;
pub use pipeline::{SyncPipeline, SyncReport};
