//! Affiliate revenue attribution
//!
//! Builds a payout statement per affiliate. An invoice is attributed when it
//! carries the affiliate's promocode; every later settled invoice of a
//! customer acquired that way is attributed as well.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use billmirror_shared::{AffiliateRow, InvoiceRow, PaymentStatus, SyncResult};

use crate::metrics::round2;
use crate::rates::RateTable;
use crate::store::MirrorStore;

const VAT_SHARE: f64 = 0.2;
const PROCESSOR_PERCENT_FEE: f64 = 0.04;
/// Flat processor fee in target-currency units per charge.
const PROCESSOR_FLAT_FEE: f64 = 1.8;

/// One attributed invoice on a statement. Amounts are major units of the
/// target currency.
#[derive(Debug, Clone, PartialEq)]
pub struct AffiliateInvoice {
    pub invoice_id: String,
    pub customer_id: Option<String>,
    pub created: DateTime<Utc>,
    pub gross: f64,
    pub net_after_fees: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AffiliateStatement {
    pub affiliate_id: i64,
    pub name: String,
    pub promocode: String,
    pub currency: String,
    pub invoices: Vec<AffiliateInvoice>,
    /// Sum of attributed net revenue.
    pub total_net: f64,
    /// The affiliate's cut of the net revenue.
    pub commission: f64,
}

/// Net payout for one charge: VAT and processor fees come off the subtotal,
/// the remainder is converted at `rate`. Fully discounted charges pay out
/// nothing.
pub fn payout_after_fees(subtotal_major: f64, rate: f64) -> f64 {
    if subtotal_major <= 0.0 || rate <= 0.0 {
        return 0.0;
    }
    let after_vat = subtotal_major * (1.0 - VAT_SHARE);
    let fees = subtotal_major * PROCESSOR_PERCENT_FEE + PROCESSOR_FLAT_FEE / rate;
    round2((after_vat - fees) * rate)
}

pub struct AffiliateReporter<'a, S: MirrorStore> {
    store: &'a S,
    rates: &'a RateTable,
    target_currency: String,
}

impl<'a, S: MirrorStore> AffiliateReporter<'a, S> {
    pub fn new(store: &'a S, rates: &'a RateTable, target_currency: impl Into<String>) -> Self {
        Self {
            store,
            rates,
            target_currency: target_currency.into().to_uppercase(),
        }
    }

    pub async fn statements(&self) -> SyncResult<Vec<AffiliateStatement>> {
        let affiliates = self.store.affiliates().await?;
        let invoices = self.store.all_invoices().await?;

        let mut statements = Vec::with_capacity(affiliates.len());
        for affiliate in affiliates {
            statements.push(self.statement_for(&affiliate, &invoices));
        }
        Ok(statements)
    }

    fn statement_for(
        &self,
        affiliate: &AffiliateRow,
        invoices: &[InvoiceRow],
    ) -> AffiliateStatement {
        let coded: Vec<&InvoiceRow> = invoices
            .iter()
            .filter(|inv| {
                inv.coupon_code
                    .as_deref()
                    .is_some_and(|code| code.eq_ignore_ascii_case(&affiliate.promocode))
            })
            .collect();

        // Customers acquired through the code keep attributing their later
        // invoices even after the coupon expires
        let acquired: HashSet<&str> = coded
            .iter()
            .filter_map(|inv| inv.customer_id.as_deref())
            .collect();

        let mut attributed: Vec<&InvoiceRow> = invoices
            .iter()
            .filter(|inv| {
                inv.payment_status() == PaymentStatus::Paid
                    && (inv
                        .coupon_code
                        .as_deref()
                        .is_some_and(|code| code.eq_ignore_ascii_case(&affiliate.promocode))
                        || inv
                            .customer_id
                            .as_deref()
                            .is_some_and(|id| acquired.contains(id)))
            })
            .collect();
        attributed.sort_by(|a, b| a.created.cmp(&b.created));

        let mut lines = Vec::with_capacity(attributed.len());
        let mut total_net = 0.0;
        for invoice in attributed {
            let rate = self.rates.rate(&invoice.currency, &self.target_currency);
            let subtotal_major = invoice
                .subtotal_excluding_tax
                .unwrap_or_else(|| invoice.effective_subtotal()) as f64
                / 100.0;
            let net = payout_after_fees(subtotal_major, rate);
            total_net += net;

            lines.push(AffiliateInvoice {
                invoice_id: invoice.external_id.clone(),
                customer_id: invoice.customer_id.clone(),
                created: invoice.created,
                gross: round2(self.rates.convert(
                    invoice.effective_subtotal() as f64 / 100.0,
                    &invoice.currency,
                    &self.target_currency,
                )),
                net_after_fees: net,
            });
        }

        AffiliateStatement {
            affiliate_id: affiliate.id,
            name: affiliate.name.clone(),
            promocode: affiliate.promocode.clone(),
            currency: self.target_currency.clone(),
            commission: round2(total_net * affiliate.commission_rate),
            total_net: round2(total_net),
            invoices: lines,
        }
    }
}
