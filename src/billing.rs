use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::{Duration, interval};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::{EventBus, Topic};
use crate::config::Config;
use crate::error::ClinicResult;
use crate::invoice::{Dept, Invoice};
use crate::normalize::{self, ImportContext};
use crate::routing;
use crate::schema::Visit;
use crate::store::Stores;

/// Build the invoice draft for a billing-ready visit. Re-entry edits the
/// visit's open invoice in place, merging freshly normalized charges into
/// its lines, rather than creating a second invoice for the same visit.
pub async fn build_draft(stores: &Stores, visit: &Visit, now: DateTime<Utc>) -> Invoice {
    let rate = stores.catalog.observation_hourly_rate().await;
    let incoming = normalize::normalize_visit(visit, rate, now);

    match stores.invoices.find_open_by_visit(visit.id).await {
        Some(mut existing) => {
            existing.items = normalize::merge_items(existing.items, incoming);
            resync_consultation_fee(&mut existing, visit);
            existing.refresh_totals();
            existing.updated_at = now;
            existing
        }
        None => Invoice::draft(Some(visit.id), visit.patient_name.clone(), incoming, now),
    }
}

/// When the visit's doctor or fee changed after the draft was created, the
/// consultation line tracks the new figure.
fn resync_consultation_fee(invoice: &mut Invoice, visit: &Visit) {
    let Some(fresh) = normalize::consultation_line(visit) else {
        return;
    };
    if let Some(line) = invoice
        .items
        .iter_mut()
        .find(|i| i.dept == Dept::Consultation)
    {
        if line.amount != fresh.amount {
            line.qty = 1;
            line.unit_price = fresh.unit_price;
            line.amount = fresh.amount;
        }
    }
}

/// Merge the doctor's prescription and freshly refetched pharmacy sales
/// into a draft. The visit record is re-read here on purpose: the dispense
/// list may have changed since the draft was opened, and importing from a
/// stale copy would bill catalog prices for already-sold items.
pub async fn import_prescription(stores: &Stores, invoice: &mut Invoice) -> ClinicResult<()> {
    let Some(visit_id) = invoice.visit else {
        return Ok(());
    };
    let Some(fresh_visit) = stores.visits.get(visit_id).await else {
        return Err(crate::error::ClinicError::NotFound {
            entity: "visit",
            id: visit_id.to_string(),
        });
    };
    let stock = stores.stock.all().await;
    normalize::import_prescription(
        &mut invoice.items,
        &ImportContext {
            prescription: &fresh_visit.prescription,
            fresh_pharmacy: &fresh_visit.pharmacy_items,
            stock: &stock,
        },
    );
    invoice.refresh_totals();
    Ok(())
}

/// Commit an invoice: run the stock validation gate, persist the invoice
/// (upsert by id), close the visit so it leaves the billing queue, and
/// notify the other stations. If the gate fails, nothing is written.
pub async fn commit_invoice(
    stores: &Stores,
    bus: &EventBus,
    mut invoice: Invoice,
    now: DateTime<Utc>,
) -> ClinicResult<Invoice> {
    stores.stock.validate_and_deduct(&mut invoice.items).await?;
    invoice.refresh_totals();
    invoice.updated_at = now;
    stores.invoices.upsert(invoice.clone()).await;

    if let Some(visit_id) = invoice.visit {
        // the visit may have been deleted by an admin; the invoice stands
        let _ = stores
            .visits
            .update_with(visit_id, |visit| {
                routing::close_visit(visit, now);
                Ok(())
            })
            .await;
        bus.publish(Topic::VisitUpdated, visit_id);
    }
    bus.publish(Topic::BillingUpdate, invoice.id);

    info!(invoice = %invoice.id, total = invoice.total_amount, "invoice committed");
    Ok(invoice)
}

/// Billing station task. Drafts and commits invoices for every visit that
/// reaches the billing queue, driven by a fixed poll interval plus
/// event-driven refetches from the notification bus.
///
/// A visit whose commit failed validation is parked, not retried on the
/// next tick, since automatic retry risks double-charging if the operator fixes
/// the invoice concurrently. A later update to that visit (the operator
/// resubmitting) unparks it.
pub async fn run_billing(
    config: Config,
    stores: Stores,
    bus: EventBus,
    test_notify: Option<Sender<Uuid>>,
    mut shutdown_rx: Receiver<()>,
) -> anyhow::Result<()> {
    if config.poll_secs == 0 {
        return Err(anyhow::anyhow!("Config poll_secs must be non-zero"));
    }
    let mut ticker = interval(Duration::from_secs(config.poll_secs));
    let mut events = bus.subscribe();
    let mut parked: HashSet<Uuid> = HashSet::new();
    if config.verbose {
        info!("Starting billing station task");
    }

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_queue(&stores, &bus, &test_notify, &mut parked).await;
            }
            event = events.recv() => {
                match event {
                    Ok(notice) => match notice.topic {
                        Topic::VisitUpdated | Topic::PharmacySaleRecorded => {
                            parked.remove(&notice.subject);
                            sweep_queue(&stores, &bus, &test_notify, &mut parked).await;
                        }
                        Topic::BillingUpdate | Topic::StockChanged => {}
                    },
                    Err(RecvError::Lagged(missed)) => {
                        // dropped events are advisory; the poll heals this
                        warn!(missed, "billing listener lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
    Ok(())
}

async fn sweep_queue(
    stores: &Stores,
    bus: &EventBus,
    test_notify: &Option<Sender<Uuid>>,
    parked: &mut HashSet<Uuid>,
) {
    let queue = stores.billing_queue().await;
    for stale in queue.iter() {
        if parked.contains(&stale.id) {
            continue;
        }
        // refetch before commit-critical decisions; the queue row may be stale
        let Some(visit) = stores.visits.get(stale.id).await else {
            continue;
        };
        let now = Utc::now();
        let draft = build_draft(stores, &visit, now).await;
        match commit_invoice(stores, bus, draft, now).await {
            Ok(invoice) => {
                if let Some(tx) = test_notify {
                    let _ = tx.send(invoice.id).await;
                }
            }
            Err(err) => {
                warn!(visit = %visit.id, error = %err, "invoice commit failed; awaiting resubmission");
                parked.insert(visit.id);
            }
        }
    }
}
