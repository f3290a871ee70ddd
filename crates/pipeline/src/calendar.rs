//! Payment calendar projection
//!
//! Projects settled invoices forward over the remainder of the fiscal year
//! so the back office can see expected cash-in per day. Projection is pure:
//! it reads mirrored invoices and today's date, and never writes anything.

use chrono::{Datelike, Months, NaiveDate};

use billmirror_shared::{InvoiceRow, PaymentInterval, PaymentStatus, SyncResult};

use crate::store::MirrorStore;

/// Fiscal-year anchor for projections.
#[derive(Debug, Clone, Copy)]
pub struct CalendarConfig {
    /// 1-12; the fiscal year runs from the first of this month.
    pub fiscal_year_start_month: u32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            fiscal_year_start_month: 5,
        }
    }
}

/// One settled or expected payment on the calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEntry {
    pub date: NaiveDate,
    /// Discount-adjusted amount in minor units of the invoice currency.
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub interval: PaymentInterval,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
}

/// A single invoice shown in the per-day breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct DayPayment {
    pub invoice_id: String,
    pub customer_id: Option<String>,
    /// Mirror customer name, falling back to email, then the external id.
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub plan: String,
    /// Minor units, discount-adjusted.
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub coupon_code: Option<String>,
}

/// Fiscal window containing `today`: `[start, end)` where both bounds fall
/// on the first of the anchor month.
pub fn fiscal_window(today: NaiveDate, config: &CalendarConfig) -> (NaiveDate, NaiveDate) {
    let anchor = config.fiscal_year_start_month.clamp(1, 12);
    let start_year = if today.month() >= anchor {
        today.year()
    } else {
        today.year() - 1
    };
    let start = NaiveDate::from_ymd_opt(start_year, anchor, 1).unwrap_or(NaiveDate::MIN);
    let end = start
        .checked_add_months(Months::new(12))
        .unwrap_or(NaiveDate::MAX);
    (start, end)
}

// Same day-of-month in (year, month), clamped to the month's last day.
fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_else(|| {
        let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN);
        first
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(first)
    })
}

fn entry(invoice: &InvoiceRow, date: NaiveDate, status: PaymentStatus) -> CalendarEntry {
    CalendarEntry {
        date,
        amount: invoice.effective_subtotal(),
        currency: invoice.currency.clone(),
        status,
        interval: invoice.payment_interval,
        customer_id: invoice.customer_id.clone(),
        subscription_id: invoice.subscription_id.clone(),
    }
}

/// Build the calendar for the fiscal year containing `today`.
///
/// Every settled invoice stays on the calendar as a `Paid` entry. On top of
/// that, monthly invoices recur on their day-of-month through the end of the
/// fiscal window (an invoice from last month whose day has not yet come
/// around again is also expected in the current month), semi-annual invoices
/// recur six months after settlement, and yearly invoices settled before the
/// current month recur one year later.
pub fn project_entries(
    invoices: &[InvoiceRow],
    today: NaiveDate,
    config: &CalendarConfig,
) -> Vec<CalendarEntry> {
    let (_, fiscal_end) = fiscal_window(today, config);
    let current_month_start = clamped_date(today.year(), today.month(), 1);
    let prev_month_start = current_month_start
        .checked_sub_months(Months::new(1))
        .unwrap_or(NaiveDate::MIN);

    let mut entries: Vec<CalendarEntry> = Vec::new();

    for invoice in invoices {
        if invoice.payment_status() != PaymentStatus::Paid {
            continue;
        }
        let settled = invoice.created.date_naive();
        entries.push(entry(invoice, settled, PaymentStatus::Paid));

        match invoice.payment_interval {
            PaymentInterval::Month => {
                let this_month = settled >= current_month_start && settled < fiscal_end;
                let pending_from_prev = settled >= prev_month_start
                    && settled < current_month_start
                    && settled.day() > today.day();

                if pending_from_prev {
                    entries.push(entry(
                        invoice,
                        clamped_date(today.year(), today.month(), settled.day()),
                        PaymentStatus::Upcoming,
                    ));
                }
                if !this_month && !pending_from_prev {
                    continue;
                }

                // Recur on the same day of each remaining month
                let mut next = current_month_start;
                loop {
                    next = match next.checked_add_months(Months::new(1)) {
                        Some(date) => date,
                        None => break,
                    };
                    if next >= fiscal_end {
                        break;
                    }
                    entries.push(entry(
                        invoice,
                        clamped_date(next.year(), next.month(), settled.day()),
                        PaymentStatus::Upcoming,
                    ));
                }
            }
            PaymentInterval::SemiAnnually => {
                if let Some(next) = settled.checked_add_months(Months::new(6)) {
                    if next >= today && next < fiscal_end {
                        entries.push(entry(invoice, next, PaymentStatus::Upcoming));
                    }
                }
            }
            PaymentInterval::Year => {
                if settled < current_month_start {
                    if let Some(next) = settled.checked_add_months(Months::new(12)) {
                        if next >= today && next < fiscal_end {
                            entries.push(entry(invoice, next, PaymentStatus::Upcoming));
                        }
                    }
                }
            }
            // Day and week cycles are too granular to project
            PaymentInterval::Day | PaymentInterval::Week => {}
        }
    }

    entries.sort_by(|a, b| a.date.cmp(&b.date));
    entries
}

/// Invoices settled or issued on one calendar day, for the drill-down view.
/// Customer identity is resolved against the mirror.
pub async fn day_breakdown<S: MirrorStore>(
    store: &S,
    invoices: &[InvoiceRow],
    date: NaiveDate,
) -> SyncResult<Vec<DayPayment>> {
    let mut payments = Vec::new();
    for inv in invoices.iter().filter(|inv| inv.created.date_naive() == date) {
        let customer = match inv.customer_id.as_deref() {
            Some(id) => store.find_customer(id).await?,
            None => None,
        };
        let customer_email = customer.as_ref().and_then(|c| c.email.clone());
        let customer_name = customer
            .and_then(|c| c.name.or(c.email))
            .or_else(|| inv.customer_id.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        payments.push(DayPayment {
            invoice_id: inv.external_id.clone(),
            customer_id: inv.customer_id.clone(),
            customer_name,
            customer_email,
            plan: inv.plan_name(),
            amount: inv.effective_subtotal(),
            currency: inv.currency.clone(),
            status: inv.payment_status(),
            coupon_code: inv.coupon_code.clone(),
        });
    }
    Ok(payments)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{paid_invoice_at, stored_customer, InMemoryStore};
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn monthly_paid(id: &str, amount: i64, y: i32, m: u32, d: u32) -> billmirror_shared::InvoiceRow {
        paid_invoice_at(id, amount, Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap())
    }

    #[test]
    fn test_fiscal_window_straddles_anchor() {
        let config = CalendarConfig::default();
        assert_eq!(
            fiscal_window(date(2026, 8, 20), &config),
            (date(2026, 5, 1), date(2027, 5, 1))
        );
        // Before May the window opened the previous year
        assert_eq!(
            fiscal_window(date(2026, 2, 10), &config),
            (date(2025, 5, 1), date(2026, 5, 1))
        );
    }

    #[test]
    fn test_monthly_invoice_recurs_until_fiscal_end() {
        let invoice = monthly_paid("in_1", 10_000, 2026, 8, 15);
        let entries = project_entries(&[invoice], date(2026, 8, 20), &CalendarConfig::default());

        // Paid in August plus projections September through April
        assert_eq!(entries.len(), 9);
        assert_eq!(entries[0].date, date(2026, 8, 15));
        assert_eq!(entries[0].status, PaymentStatus::Paid);
        assert_eq!(entries[1].date, date(2026, 9, 15));
        assert_eq!(entries[1].status, PaymentStatus::Upcoming);
        assert_eq!(entries[8].date, date(2027, 4, 15));
    }

    #[test]
    fn test_prev_month_invoice_projects_with_day_clamping() {
        // Settled January 31st; on February 10th the charge is still ahead,
        // expected on February's last day
        let invoice = monthly_paid("in_1", 10_000, 2026, 1, 31);
        let entries = project_entries(&[invoice], date(2026, 2, 10), &CalendarConfig::default());

        assert_eq!(entries[0].date, date(2026, 1, 31));
        assert_eq!(entries[0].status, PaymentStatus::Paid);
        assert_eq!(entries[1].date, date(2026, 2, 28));
        assert_eq!(entries[1].status, PaymentStatus::Upcoming);
        // March has 31 days again
        assert_eq!(entries[2].date, date(2026, 3, 31));
    }

    #[test]
    fn test_already_charged_invoice_keeps_paid_entry_without_projection() {
        // Settled on the 5th; by the 20th this month's charge already ran,
        // but the settled payment stays on the calendar
        let invoice = monthly_paid("in_1", 10_000, 2026, 7, 5);
        let entries = project_entries(&[invoice], date(2026, 8, 20), &CalendarConfig::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].date, date(2026, 7, 5));
        assert_eq!(entries[0].status, PaymentStatus::Paid);
    }

    #[test]
    fn test_historical_paid_entry_survives_projection() {
        // Settled two months back, well before the current month
        let invoice = monthly_paid("in_1", 10_000, 2026, 6, 5);
        let entries = project_entries(&[invoice], date(2026, 8, 20), &CalendarConfig::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].date, date(2026, 6, 5));
        assert_eq!(entries[0].status, PaymentStatus::Paid);
    }

    #[test]
    fn test_semi_annual_projects_six_months_out() {
        let mut invoice = monthly_paid("in_1", 60_000, 2026, 6, 10);
        invoice.payment_interval = PaymentInterval::SemiAnnually;

        let entries = project_entries(&[invoice], date(2026, 8, 20), &CalendarConfig::default());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].date, date(2026, 6, 10));
        assert_eq!(entries[0].status, PaymentStatus::Paid);
        assert_eq!(entries[1].date, date(2026, 12, 10));
        assert_eq!(entries[1].status, PaymentStatus::Upcoming);
    }

    #[test]
    fn test_yearly_outside_window_projects_renewal() {
        let mut invoice = monthly_paid("in_1", 120_000, 2025, 10, 3);
        invoice.payment_interval = PaymentInterval::Year;

        let entries = project_entries(&[invoice], date(2026, 8, 20), &CalendarConfig::default());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].date, date(2025, 10, 3));
        assert_eq!(entries[0].status, PaymentStatus::Paid);
        assert_eq!(entries[1].date, date(2026, 10, 3));
        assert_eq!(entries[1].status, PaymentStatus::Upcoming);
    }

    #[test]
    fn test_unpaid_invoices_are_ignored() {
        let mut invoice = monthly_paid("in_1", 10_000, 2026, 8, 15);
        invoice.paid_at = None;
        let entries = project_entries(&[invoice], date(2026, 8, 20), &CalendarConfig::default());
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_day_breakdown_lists_invoices_of_that_day() {
        let store = InMemoryStore::default();
        store.seed_customer(stored_customer("cus_1", Some("Ada")));

        let a = monthly_paid("in_a", 10_000, 2026, 8, 15);
        let b = monthly_paid("in_b", 2_500, 2026, 8, 15);
        let other = monthly_paid("in_c", 9_900, 2026, 8, 16);

        let payments = day_breakdown(&store, &[a, b, other], date(2026, 8, 15))
            .await
            .unwrap();
        assert_eq!(payments.len(), 2);
        assert_eq!(payments[0].invoice_id, "in_a");
        assert_eq!(payments[0].amount, 10_000);
        assert_eq!(payments[0].status, PaymentStatus::Paid);
        assert_eq!(payments[0].customer_name, "Ada");
        assert_eq!(
            payments[0].customer_email.as_deref(),
            Some("customer@example.com")
        );
    }

    #[tokio::test]
    async fn test_day_breakdown_falls_back_to_customer_id() {
        let store = InMemoryStore::default();
        let invoice = monthly_paid("in_a", 10_000, 2026, 8, 15);

        let payments = day_breakdown(&store, &[invoice], date(2026, 8, 15))
            .await
            .unwrap();
        assert_eq!(payments[0].customer_name, "cus_1");
        assert!(payments[0].customer_email.is_none());
    }
}
