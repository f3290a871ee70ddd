//! Pipeline configuration

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use billmirror_shared::{SyncError, SyncResult};

use crate::reconcile::ExclusionRules;

/// Configuration for the sync pipeline
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Billing provider secret API key
    pub stripe_secret_key: String,
    /// Currency invoices are assumed to be billed in
    pub primary_currency: String,
    /// Currency all dashboard amounts are reported in
    pub target_currency: String,
    /// Source currencies refreshed into the rate snapshot
    pub rate_source_currencies: Vec<String>,
    /// Path of the flat exchange-rate snapshot file
    pub rates_path: PathBuf,
    /// Product ids whose invoices are purged from the mirror
    pub excluded_product_ids: HashSet<String>,
    /// Price ids whose invoices are purged from the mirror
    pub excluded_price_ids: HashSet<String>,
    /// First month of the fiscal year for the payment calendar (1-12)
    pub fiscal_year_start_month: u32,
    /// Snapshot TTL; `None` keeps the snapshot until the next run replaces it
    pub cache_ttl: Option<Duration>,
}

impl SyncConfig {
    /// Create config from environment variables
    pub fn from_env() -> SyncResult<Self> {
        let cache_ttl = match std::env::var("CACHE_TTL_SECS").ok() {
            None => Some(Duration::from_secs(3600)),
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .map_err(|_| SyncError::Config(format!("Invalid CACHE_TTL_SECS: {}", raw)))?;
                // 0 means cache forever
                (secs > 0).then(|| Duration::from_secs(secs))
            }
        };

        let fiscal_year_start_month = match std::env::var("FISCAL_YEAR_START_MONTH").ok() {
            None => 5,
            Some(raw) => {
                let month: u32 = raw.parse().map_err(|_| {
                    SyncError::Config(format!("Invalid FISCAL_YEAR_START_MONTH: {}", raw))
                })?;
                if !(1..=12).contains(&month) {
                    return Err(SyncError::Config(format!(
                        "FISCAL_YEAR_START_MONTH out of range: {}",
                        month
                    )));
                }
                month
            }
        };

        Ok(Self {
            stripe_secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| SyncError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            primary_currency: std::env::var("PRIMARY_CURRENCY")
                .unwrap_or_else(|_| "EUR".to_string()),
            target_currency: std::env::var("TARGET_CURRENCY")
                .unwrap_or_else(|_| "DKK".to_string()),
            rate_source_currencies: id_list(
                &std::env::var("RATE_SOURCE_CURRENCIES").unwrap_or_else(|_| "USD,EUR".to_string()),
            )
            .into_iter()
            .collect(),
            rates_path: std::env::var("RATES_PATH")
                .unwrap_or_else(|_| "storage/currency_rates.json".to_string())
                .into(),
            excluded_product_ids: id_list(
                &std::env::var("EXCLUDED_PRODUCT_IDS").unwrap_or_default(),
            ),
            excluded_price_ids: id_list(&std::env::var("EXCLUDED_PRICE_IDS").unwrap_or_default()),
            fiscal_year_start_month,
            cache_ttl,
        })
    }

    /// Invoice exclusion rules for the reconciler
    pub fn exclusion_rules(&self) -> ExclusionRules {
        ExclusionRules {
            product_ids: self.excluded_product_ids.clone(),
            price_ids: self.excluded_price_ids.clone(),
        }
    }
}

fn id_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_id_list_parsing() {
        let ids = id_list("prod_a, prod_b,,prod_c ");
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("prod_a"));
        assert!(ids.contains("prod_b"));
        assert!(ids.contains("prod_c"));

        assert!(id_list("").is_empty());
    }
}
