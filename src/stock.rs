use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ClinicError, ClinicResult};
use crate::invoice::{Dept, InvoiceLineItem};

/// One pharmacy stock record (a batch of a medicine). `mrp` is the pack
/// price; the dispensable unit price is `mrp / tablets_per_strip`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockItem {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub batch_no: String,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    pub qty_available: u32,
    pub mrp: f64,
    #[serde(default)]
    pub gst_percent: f64,
    #[serde(default)]
    pub hsn: String,
    #[serde(default = "default_tablets_per_strip")]
    pub tablets_per_strip: u32,
}

fn default_tablets_per_strip() -> u32 {
    1
}

impl StockItem {
    /// Price per dispensable unit, derived from the pack price.
    pub fn unit_price(&self) -> f64 {
        self.mrp / self.tablets_per_strip.max(1) as f64
    }
}

/// Stock fixture: 100 tablets of Paracetamol, batch B101, 10 per strip.
pub fn mock_stock() -> StockItem {
    StockItem {
        id: Uuid::new_v4(),
        name: "Paracetamol 500mg".to_string(),
        batch_no: "B101".to_string(),
        expiry_date: NaiveDate::from_ymd_opt(2027, 6, 30),
        qty_available: 100,
        mrp: 25.0,
        gst_percent: 12.0,
        hsn: "3004".to_string(),
        tablets_per_strip: 10,
    }
}

/// Live inventory shared across stations. Last-writer-wins like every other
/// store here; the delta-based deduction below keeps concurrent commits from
/// double-charging a batch.
#[derive(Clone, Default)]
pub struct StockStore {
    inner: Arc<Mutex<Vec<StockItem>>>,
}

impl StockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, item: StockItem) {
        self.inner.lock().await.push(item);
    }

    pub async fn all(&self) -> Vec<StockItem> {
        self.inner.lock().await.clone()
    }

    /// Case-insensitive lookup. With a batch, the match is strict on name
    /// and batch. Without one, earliest-expiring batch of that name wins.
    pub async fn find(&self, name: &str, batch: &str) -> Option<StockItem> {
        let guard = self.inner.lock().await;
        find_in(&guard, name, batch).map(|idx| guard[idx].clone())
    }

    /// Run the validation gate over an invoice's lines and apply the
    /// deductions, holding the stock lock across both phases so a commit is
    /// all-or-nothing: if any line fails, no stock moves and no line marker
    /// changes.
    ///
    /// Only PHARMACY lines with an undeducted delta are considered; a line
    /// already marked `stock_deducted` with an unchanged qty has delta 0 and
    /// is never re-checked. Editing a committed line's qty re-deducts just
    /// the difference.
    pub async fn validate_and_deduct(&self, items: &mut [InvoiceLineItem]) -> ClinicResult<()> {
        let mut guard = self.inner.lock().await;

        let mut planned: Vec<(usize, usize, u32)> = Vec::new();
        for (line_idx, item) in items.iter().enumerate() {
            if item.dept != Dept::Pharmacy {
                continue;
            }
            let name = item.description.trim();
            if name.is_empty() {
                continue;
            }
            let delta = item.qty.saturating_sub(item.deducted_qty);
            if delta == 0 {
                continue;
            }

            let batch = item.batch.trim();
            let Some(stock_idx) = find_in(&guard, name, batch) else {
                return Err(ClinicError::MissingStock {
                    name: name.to_string(),
                    batch: if batch.is_empty() {
                        "N/A".to_string()
                    } else {
                        batch.to_string()
                    },
                });
            };
            let available = guard[stock_idx].qty_available;
            if available < delta {
                return Err(ClinicError::InsufficientStock {
                    name: name.to_string(),
                    batch: if batch.is_empty() {
                        "Any".to_string()
                    } else {
                        batch.to_string()
                    },
                    available,
                    requested: delta,
                });
            }
            planned.push((line_idx, stock_idx, delta));
        }

        for (line_idx, stock_idx, delta) in planned {
            guard[stock_idx].qty_available -= delta;
            items[line_idx].deducted_qty = items[line_idx].qty;
            items[line_idx].stock_deducted = true;
            debug!(
                name = %items[line_idx].description,
                batch = %items[line_idx].batch,
                delta,
                remaining = guard[stock_idx].qty_available,
                "stock deducted"
            );
        }
        Ok(())
    }
}

fn find_in(stock: &[StockItem], name: &str, batch: &str) -> Option<usize> {
    let name_lc = name.trim().to_lowercase();
    let batch_lc = batch.trim().to_lowercase();

    if !batch_lc.is_empty() {
        return stock.iter().position(|s| {
            s.name.trim().to_lowercase() == name_lc && s.batch_no.trim().to_lowercase() == batch_lc
        });
    }

    // No batch on the line: take the earliest-expiring batch of that name.
    stock
        .iter()
        .enumerate()
        .filter(|(_, s)| s.name.trim().to_lowercase() == name_lc)
        .min_by_key(|(_, s)| s.expiry_date.unwrap_or(NaiveDate::MAX))
        .map(|(idx, _)| idx)
}
