//! Paginated fetch loop
//!
//! Follows the provider's cursor until it reports no further pages. A failure
//! on any page aborts the whole fetch so the reconciler never sees a partial
//! page set.

use std::future::Future;

use billmirror_shared::SyncResult;

use crate::provider::{ApiCustomer, ApiInvoice, ApiPage, ApiSubscription, BillingProvider, ExternalId};

/// Records requested per page.
pub const PAGE_SIZE: u32 = 100;

/// Drain every page of a resource. `next_page` receives the external id of
/// the last record seen so far, or `None` for the first page.
pub async fn fetch_all<T, F, Fut>(mut next_page: F) -> SyncResult<Vec<T>>
where
    T: ExternalId,
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = SyncResult<ApiPage<T>>>,
{
    let mut all: Vec<T> = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = next_page(cursor.take()).await?;
        let has_more = page.has_more;
        all.extend(page.data);

        if !has_more {
            break;
        }
        match all.last() {
            Some(last) => cursor = Some(last.external_id().to_string()),
            // Provider claims more pages but returned an empty one; stop
            // rather than loop on a stuck cursor.
            None => break,
        }
    }

    Ok(all)
}

pub async fn fetch_all_customers<P: BillingProvider>(provider: &P) -> SyncResult<Vec<ApiCustomer>> {
    fetch_all(|cursor| async move { provider.customers_page(cursor.as_deref()).await }).await
}

pub async fn fetch_all_subscriptions<P: BillingProvider>(
    provider: &P,
) -> SyncResult<Vec<ApiSubscription>> {
    fetch_all(|cursor| async move { provider.subscriptions_page(cursor.as_deref()).await }).await
}

pub async fn fetch_all_invoices<P: BillingProvider>(provider: &P) -> SyncResult<Vec<ApiInvoice>> {
    fetch_all(|cursor| async move { provider.invoices_page(cursor.as_deref()).await }).await
}
