//! Currency rate snapshot
//!
//! Revenue is reported in a single target currency. Conversion rates live in
//! a small JSON snapshot on disk (`{"EUR": 7.45, "USD": 6.83}`, each value
//! the target-currency price of one unit of the keyed currency). A daily
//! refresher rewrites the snapshot from a public rate API; sync runs only
//! ever read it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use billmirror_shared::{SyncError, SyncResult};

/// In-memory view of the rate snapshot.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    rates: HashMap<String, f64>,
}

impl RateTable {
    pub fn new(rates: HashMap<String, f64>) -> Self {
        Self { rates }
    }

    /// Load the snapshot from disk. A missing or unreadable file yields an
    /// empty table (all conversions fall back to 1.0) so a fresh deployment
    /// can sync before the first rate refresh has run.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, f64>>(&raw) {
                Ok(rates) => Self { rates },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Rate snapshot is malformed, using identity rates");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Rate snapshot missing, using identity rates");
                Self::default()
            }
        }
    }

    /// Target-currency units per one unit of `from`. Unknown currencies and
    /// same-currency conversions yield 1.0.
    pub fn rate(&self, from: &str, to: &str) -> f64 {
        if from.eq_ignore_ascii_case(to) {
            return 1.0;
        }
        self.rates
            .get(&from.to_uppercase())
            .copied()
            .unwrap_or(1.0)
    }

    pub fn convert(&self, amount: f64, from: &str, to: &str) -> f64 {
        amount * self.rate(from, to)
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RateApiResponse {
    rates: HashMap<String, f64>,
}

const RATE_API_BASE: &str = "https://open.er-api.com/v6/latest";

/// Fetches fresh rates and rewrites the snapshot file atomically.
pub struct RateRefresher {
    http: reqwest::Client,
    base_url: String,
    target_currency: String,
    source_currencies: Vec<String>,
    snapshot_path: PathBuf,
}

impl RateRefresher {
    pub fn new(
        target_currency: impl Into<String>,
        source_currencies: Vec<String>,
        snapshot_path: impl Into<PathBuf>,
    ) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: RATE_API_BASE.to_string(),
            target_currency: target_currency.into(),
            source_currencies,
            snapshot_path: snapshot_path.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch a rate for each source currency and rewrite the snapshot. A
    /// currency whose lookup fails is skipped; if every lookup fails the
    /// existing snapshot is left untouched and an error is returned.
    pub async fn refresh(&self) -> SyncResult<RateTable> {
        let mut rates: HashMap<String, f64> = HashMap::new();

        for currency in &self.source_currencies {
            match self.fetch_rate(currency).await {
                Ok(rate) => {
                    rates.insert(currency.to_uppercase(), rate);
                }
                Err(e) => {
                    tracing::error!(currency = %currency, error = %e, "Rate lookup failed, keeping previous value");
                }
            }
        }

        if rates.is_empty() {
            return Err(SyncError::RateRefresh(
                "No rates could be fetched, snapshot left unchanged".to_string(),
            ));
        }

        self.write_snapshot(&rates)?;
        tracing::info!(
            count = rates.len(),
            path = %self.snapshot_path.display(),
            "Refreshed currency rates"
        );
        Ok(RateTable::new(rates))
    }

    async fn fetch_rate(&self, currency: &str) -> SyncResult<f64> {
        let url = format!("{}/{}", self.base_url, currency.to_uppercase());
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::RateRefresh(format!("{}: {}", currency, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::RateRefresh(format!(
                "{}: HTTP {}",
                currency, status
            )));
        }

        let body: RateApiResponse = response
            .json()
            .await
            .map_err(|e| SyncError::RateRefresh(format!("{}: malformed response: {}", currency, e)))?;

        body.rates
            .get(&self.target_currency.to_uppercase())
            .copied()
            .ok_or_else(|| {
                SyncError::RateRefresh(format!(
                    "{} response carried no {} rate",
                    currency, self.target_currency
                ))
            })
    }

    // Write-then-rename so a sync run never reads a half-written snapshot.
    fn write_snapshot(&self, rates: &HashMap<String, f64>) -> SyncResult<()> {
        if let Some(parent) = self.snapshot_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::RateRefresh(format!("create {}: {}", parent.display(), e)))?;
        }

        let tmp = self.snapshot_path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(rates)?;
        std::fs::write(&tmp, body)
            .map_err(|e| SyncError::RateRefresh(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.snapshot_path).map_err(|e| {
            SyncError::RateRefresh(format!("rename to {}: {}", self.snapshot_path.display(), e))
        })?;
        Ok(())
    }
}
