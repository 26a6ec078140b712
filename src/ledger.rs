use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ClinicError, ClinicResult};
use crate::invoice::{Invoice, PaymentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenderMode {
    Cash,
    Upi,
    Card,
}

/// One payment instrument/amount pair submitted by the billing operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tender {
    pub mode: TenderMode,
    pub amount: f64,
}

/// A recorded payment. Rows are append-only; the ledger is the sum of all
/// rows for an invoice, never a single overwritten field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub mode: TenderMode,
    pub amount: f64,
    #[serde(default)]
    pub remarks: String,
    pub at: DateTime<Utc>,
}

/// Apply a multi-tender payment against an invoice. Non-positive entries in
/// a mixed list are skipped; a list with no usable entry is rejected with no
/// rows written.
pub fn record_payment(
    invoice: &mut Invoice,
    tenders: &[Tender],
    remarks: &str,
    now: DateTime<Utc>,
) -> ClinicResult<()> {
    let accepted: Vec<&Tender> = tenders.iter().filter(|t| t.amount > 0.0).collect();
    if accepted.is_empty() {
        return Err(ClinicError::EmptyPayment);
    }

    for tender in accepted {
        invoice.payments.push(Payment {
            mode: tender.mode,
            amount: tender.amount,
            remarks: remarks.to_string(),
            at: now,
        });
    }
    reconcile(invoice, now);
    info!(
        invoice = %invoice.id,
        paid = invoice.amount_paid,
        balance = invoice.balance_due,
        status = ?invoice.payment_status,
        "payment recorded"
    );
    Ok(())
}

/// Track a refund as a separate signed adjustment. Refunds never remove
/// payment rows retroactively.
pub fn record_refund(invoice: &mut Invoice, amount: f64, now: DateTime<Utc>) -> ClinicResult<()> {
    if amount <= 0.0 {
        return Err(ClinicError::InvalidRefund);
    }
    invoice.refund_amount = Some(invoice.refund_amount.unwrap_or(0.0) + amount);
    invoice.updated_at = now;
    Ok(())
}

/// Derive amount-paid, balance-due and status from the payment rows.
fn reconcile(invoice: &mut Invoice, now: DateTime<Utc>) {
    invoice.amount_paid = invoice.payments.iter().map(|p| p.amount).sum();
    invoice.balance_due = (invoice.total_amount - invoice.amount_paid).max(0.0);
    invoice.payment_status = if invoice.amount_paid >= invoice.total_amount {
        PaymentStatus::Paid
    } else if invoice.amount_paid > 0.0 {
        PaymentStatus::Partial
    } else {
        PaymentStatus::Pending
    };
    invoice.updated_at = now;
}
