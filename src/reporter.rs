use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use colored::Colorize;
use prettytable::{Table, row};
use tokio::sync::mpsc::Receiver;
use tokio::time::{Duration, interval};

use crate::invoice::PaymentStatus;
use crate::ledger::TenderMode;
use crate::store::InvoiceStore;

/// Snapshot of the billing desk's money position.
#[derive(Debug, Default, PartialEq)]
pub struct BillingStats {
    pub collection_today: f64,
    pub pending_amount: f64,
    pub invoices_today: usize,
    pub breakdown: HashMap<TenderMode, f64>,
}

/// Compute stats for one calendar day from the invoice store. Collection
/// counts payment rows, not invoice totals, so partial tenders show up the
/// day they were taken.
pub async fn billing_stats(invoices: &InvoiceStore, day: NaiveDate) -> BillingStats {
    let mut stats = BillingStats::default();
    for invoice in invoices.all().await {
        if invoice.created_at.date_naive() == day {
            stats.invoices_today += 1;
        }
        if invoice.payment_status != PaymentStatus::Paid {
            stats.pending_amount += invoice.balance_due;
        }
        for payment in &invoice.payments {
            if payment.at.date_naive() == day {
                stats.collection_today += payment.amount;
                *stats.breakdown.entry(payment.mode).or_insert(0.0) += payment.amount;
            }
        }
    }
    stats
}

/// Reporter task: renders the billing snapshot on a fixed interval.
pub async fn run_reporter(
    invoices: InvoiceStore,
    report_secs: u64,
    mut shutdown_rx: Receiver<()>,
) {
    // TODO: index payments by day so this stops rescanning every invoice per tick
    let mut ticker = interval(Duration::from_secs(report_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = billing_stats(&invoices, Utc::now().date_naive()).await;
                print_stats(&stats);
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

pub fn print_stats(stats: &BillingStats) {
    println!("\n{}", "--- Billing Desk ---".bold());
    let mut table = Table::new();
    table.add_row(row!["Collection today", format!("{:.2}", stats.collection_today)]);
    table.add_row(row!["Pending amount", format!("{:.2}", stats.pending_amount)]);
    table.add_row(row!["Invoices today", stats.invoices_today]);
    table.printstd();

    if !stats.breakdown.is_empty() {
        let mut table = Table::new();
        table.add_row(row![
            "CASH".green(),
            "UPI".blue(),
            "CARD".yellow()
        ]);
        table.add_row(row![
            format!("{:.2}", stats.breakdown.get(&TenderMode::Cash).unwrap_or(&0.0)),
            format!("{:.2}", stats.breakdown.get(&TenderMode::Upi).unwrap_or(&0.0)),
            format!("{:.2}", stats.breakdown.get(&TenderMode::Card).unwrap_or(&0.0))
        ]);
        table.printstd();
    }
}
