use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ClinicError, ClinicResult};
use crate::invoice::{Invoice, PaymentStatus};
use crate::ledger::{self, Tender};
use crate::normalize::{DEFAULT_OBSERVATION_RATE, OBSERVATION_SERVICE};
use crate::schema::{Role, Visit, VisitStatus};
use crate::stock::StockStore;

/// In-memory visit store. Mutations are last-writer-wins at the record
/// level; there is no version check, so callers lean on idempotent
/// operations rather than transactional isolation.
#[derive(Clone, Default)]
pub struct VisitStore {
    inner: Arc<Mutex<HashMap<Uuid, Visit>>>,
}

impl VisitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, visit: Visit) {
        self.inner.lock().await.insert(visit.id, visit);
    }

    pub async fn get(&self, id: Uuid) -> Option<Visit> {
        self.inner.lock().await.get(&id).cloned()
    }

    pub async fn filter(&self, role: Option<Role>, status: Option<VisitStatus>) -> Vec<Visit> {
        self.inner
            .lock()
            .await
            .values()
            .filter(|v| role.is_none_or(|r| v.assigned_role == r))
            .filter(|v| status.is_none_or(|s| v.status == s))
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<Visit> {
        self.inner.lock().await.values().cloned().collect()
    }

    /// All encounters for one patient, across departments.
    pub async fn by_patient(&self, patient: Uuid) -> Vec<Visit> {
        self.inner
            .lock()
            .await
            .values()
            .filter(|v| v.patient == patient)
            .cloned()
            .collect()
    }

    /// Patch a visit under the store lock. The closure sees the live record,
    /// so a transition function composes with the fetch-mutate-write cycle
    /// without a read-modify-write race inside this process.
    pub async fn update_with<T>(
        &self,
        id: Uuid,
        patch: impl FnOnce(&mut Visit) -> ClinicResult<T>,
    ) -> ClinicResult<T> {
        let mut guard = self.inner.lock().await;
        let visit = guard.get_mut(&id).ok_or(ClinicError::NotFound {
            entity: "visit",
            id: id.to_string(),
        })?;
        patch(visit)
    }
}

/// In-memory invoice store. `upsert` is keyed by invoice id so committing
/// an invoice twice updates in place rather than duplicating it.
#[derive(Clone, Default)]
pub struct InvoiceStore {
    inner: Arc<Mutex<HashMap<Uuid, Invoice>>>,
}

impl InvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<Invoice> {
        self.inner.lock().await.get(&id).cloned()
    }

    pub async fn all(&self) -> Vec<Invoice> {
        self.inner.lock().await.values().cloned().collect()
    }

    pub async fn upsert(&self, invoice: Invoice) {
        self.inner.lock().await.insert(invoice.id, invoice);
    }

    pub async fn find_by_visit(&self, visit_id: Uuid) -> Vec<Invoice> {
        self.inner
            .lock()
            .await
            .values()
            .filter(|i| i.visit == Some(visit_id))
            .cloned()
            .collect()
    }

    /// The invoice a re-entering billing flow must edit instead of creating
    /// a duplicate.
    pub async fn find_open_by_visit(&self, visit_id: Uuid) -> Option<Invoice> {
        self.inner
            .lock()
            .await
            .values()
            .find(|i| i.visit == Some(visit_id) && i.payment_status != PaymentStatus::Paid)
            .cloned()
    }

    pub async fn count_for_visit(&self, visit_id: Uuid) -> usize {
        self.inner
            .lock()
            .await
            .values()
            .filter(|i| i.visit == Some(visit_id))
            .count()
    }

    /// Append tenders to an invoice's ledger under the store lock and
    /// return the updated record.
    pub async fn add_payment(
        &self,
        id: Uuid,
        tenders: &[Tender],
        remarks: &str,
        now: DateTime<Utc>,
    ) -> ClinicResult<Invoice> {
        let mut guard = self.inner.lock().await;
        let invoice = guard.get_mut(&id).ok_or(ClinicError::NotFound {
            entity: "invoice",
            id: id.to_string(),
        })?;
        ledger::record_payment(invoice, tenders, remarks, now)?;
        Ok(invoice.clone())
    }

    pub async fn add_refund(&self, id: Uuid, amount: f64, now: DateTime<Utc>) -> ClinicResult<Invoice> {
        let mut guard = self.inner.lock().await;
        let invoice = guard.get_mut(&id).ok_or(ClinicError::NotFound {
            entity: "invoice",
            id: id.to_string(),
        })?;
        ledger::record_refund(invoice, amount, now)?;
        Ok(invoice.clone())
    }
}

/// Service price catalog: name -> base charge, with the distinguished
/// "Observation Charge" entry feeding hourly observation billing.
#[derive(Clone, Default)]
pub struct ServiceCatalog {
    inner: Arc<Mutex<HashMap<String, f64>>>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, name: &str, charge: f64) {
        self.inner.lock().await.insert(name.trim().to_lowercase(), charge);
    }

    pub async fn base_charge(&self, name: &str) -> Option<f64> {
        self.inner
            .lock()
            .await
            .get(&name.trim().to_lowercase())
            .copied()
    }

    pub async fn observation_hourly_rate(&self) -> f64 {
        self.base_charge(OBSERVATION_SERVICE)
            .await
            .unwrap_or(DEFAULT_OBSERVATION_RATE)
    }
}

/// Handle bundle passed to every station task.
#[derive(Clone, Default)]
pub struct Stores {
    pub visits: VisitStore,
    pub invoices: InvoiceStore,
    pub stock: StockStore,
    pub catalog: ServiceCatalog,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visits sitting in the billing queue: assigned to billing, not yet
    /// closed.
    pub async fn billing_queue(&self) -> Vec<Visit> {
        let mut queue = self.visits.filter(Some(Role::Billing), None).await;
        queue.retain(|v| v.status != VisitStatus::Closed);
        queue
    }

    /// Visits with department charges attached but no invoice yet:
    /// the "pending billing" review list.
    pub async fn unbilled_visits(&self) -> Vec<Visit> {
        let visits = self.visits.all().await;
        let counts = join_all(
            visits
                .iter()
                .map(|visit| self.invoices.count_for_visit(visit.id)),
        )
        .await;
        visits
            .into_iter()
            .zip(counts)
            .filter(|(visit, count)| {
                let has_charges = !visit.pharmacy_items.is_empty()
                    || !visit.casualty_medicines.is_empty()
                    || !visit.casualty_services.is_empty();
                has_charges && *count == 0
            })
            .map(|(visit, _)| visit)
            .collect()
    }
}
