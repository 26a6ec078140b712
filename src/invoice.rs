use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::Payment;

/// Originating department of an invoice line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Dept {
    Pharmacy,
    Lab,
    Consultation,
    Casualty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
}

/// Canonical invoice line. Department-sourced lines inherit their fields
/// verbatim from the charge record; manually entered lines start zeroed.
/// `amount` tracks `qty * unit_price` on qty/price edits, but a direct
/// amount edit is authoritative and back-derives the unit price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    /// Source charge record, when the line was derived from one.
    #[serde(default)]
    pub item_id: Option<Uuid>,
    pub dept: Dept,
    pub description: String,
    pub qty: u32,
    pub unit_price: f64,
    pub amount: f64,
    #[serde(default)]
    pub hsn: String,
    #[serde(default)]
    pub batch: String,
    #[serde(default)]
    pub expiry: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub gst_percent: f64,
    /// True once inventory has been decremented for this line, either at
    /// dispense time or by the validation gate. Never deducted twice.
    #[serde(default)]
    pub stock_deducted: bool,
    #[serde(default)]
    pub deducted_qty: u32,
}

impl InvoiceLineItem {
    pub fn new(dept: Dept, description: impl Into<String>, qty: u32, unit_price: f64) -> Self {
        Self {
            item_id: None,
            dept,
            description: description.into(),
            qty,
            unit_price,
            amount: qty as f64 * unit_price,
            hsn: String::new(),
            batch: String::new(),
            expiry: String::new(),
            dosage: String::new(),
            duration: String::new(),
            gst_percent: 0.0,
            stock_deducted: false,
            deducted_qty: 0,
        }
    }

    pub fn set_qty(&mut self, qty: u32) {
        self.qty = qty;
        self.amount = qty as f64 * self.unit_price;
    }

    pub fn set_unit_price(&mut self, unit_price: f64) {
        self.unit_price = unit_price;
        self.amount = self.qty as f64 * unit_price;
    }

    /// Direct amount override. Unit price is back-derived; qty 0 leaves it
    /// at 0 rather than dividing.
    pub fn set_amount(&mut self, amount: f64) {
        self.amount = amount;
        self.unit_price = if self.qty == 0 {
            0.0
        } else {
            amount / self.qty as f64
        };
    }

    pub fn set_gst(&mut self, gst_percent: f64) {
        self.gst_percent = gst_percent;
    }

    /// Merge identity: lower-cased description and batch. Lines without a
    /// batch key on the description alone.
    pub fn dedup_key(&self) -> (String, String) {
        (
            self.description.trim().to_lowercase(),
            self.batch.trim().to_lowercase(),
        )
    }
}

/// The reconciled, billable summary of all charge records for a visit plus
/// manual adjustments. Payments are append-only; paid/balance figures are
/// always recomputed from the payment list, never overwritten directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub visit: Option<Uuid>,
    pub patient_name: String,
    pub items: Vec<InvoiceLineItem>,
    pub payment_status: PaymentStatus,
    pub total_amount: f64,
    pub amount_paid: f64,
    pub balance_due: f64,
    #[serde(default)]
    pub refund_amount: Option<f64>,
    #[serde(default)]
    pub payments: Vec<Payment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn draft(
        visit: Option<Uuid>,
        patient_name: impl Into<String>,
        items: Vec<InvoiceLineItem>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut invoice = Self {
            id: Uuid::new_v4(),
            visit,
            patient_name: patient_name.into(),
            items,
            payment_status: PaymentStatus::Pending,
            total_amount: 0.0,
            amount_paid: 0.0,
            balance_due: 0.0,
            refund_amount: None,
            payments: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        invoice.refresh_totals();
        invoice
    }

    /// Unrounded sum of line amounts.
    pub fn subtotal(&self) -> f64 {
        self.items.iter().map(|i| i.amount).sum()
    }

    /// Fractional paise are rounded up once at the invoice level, never per
    /// line. This rule is load-bearing for financial reproducibility.
    pub fn total(&self) -> f64 {
        self.subtotal().ceil()
    }

    pub fn add_item(&mut self, item: InvoiceLineItem) {
        self.items.push(item);
        self.refresh_totals();
    }

    pub fn remove_item(&mut self, index: usize) -> Option<InvoiceLineItem> {
        if index >= self.items.len() {
            return None;
        }
        let removed = self.items.remove(index);
        self.refresh_totals();
        Some(removed)
    }

    /// Recompute total and balance after any line mutation. Payment status
    /// stays owned by the ledger; only the balance moves here.
    pub fn refresh_totals(&mut self) {
        self.total_amount = self.total();
        self.balance_due = (self.total_amount - self.amount_paid).max(0.0);
    }
}

/// Invoice fixture: two lines totalling 525.5, so the invoice-level ceiling
/// is observable.
pub fn mock_invoice() -> Invoice {
    let items = vec![
        InvoiceLineItem::new(Dept::Consultation, "General Consultation Fee", 1, 500.0),
        InvoiceLineItem::new(Dept::Pharmacy, "Paracetamol 500mg", 10, 2.55),
    ];
    Invoice::draft(Some(Uuid::new_v4()), "Jane Doe", items, Utc::now())
}
