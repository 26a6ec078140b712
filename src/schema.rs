use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Department currently responsible for acting on a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Reception,
    Doctor,
    Pharmacy,
    Lab,
    Casualty,
    Billing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitStatus {
    Open,
    InProgress,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub full_name: String,
    pub age: u32,
    pub gender: String,
    pub phone: String,
    pub address: Option<String>,
}

/// Vitals snapshot taken at reception. The `note` field doubles as a marker
/// for visits auto-created by a pharmacy counter sale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vitals {
    pub bp: Option<String>,
    pub pulse: Option<u32>,
    pub temperature: Option<f64>,
    pub spo2: Option<u32>,
    pub note: Option<String>,
}

/// Vitals note that marks a visit created from a pharmacy counter sale.
/// Such visits never carry a consultation fee.
pub const PHARMACY_SALE_NOTE: &str = "Auto-created from Pharmacy Manual Sale";

/// A medicine dispensed by the pharmacy against this visit. Unit price is per
/// dispensable unit (tablet), already derived from the pack price at sale
/// time. Stock was deducted when the sale was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PharmacyItem {
    pub name: String,
    pub qty: u32,
    pub unit_price: f64,
    pub amount: f64,
    #[serde(default)]
    pub hsn: String,
    #[serde(default)]
    pub batch: String,
    #[serde(default)]
    pub gst: f64,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub duration: String,
}

/// A medicine administered at the casualty station. Stock was deducted when
/// the administration was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasualtyMedicine {
    pub name: String,
    #[serde(default)]
    pub batch: String,
    pub qty: u32,
    pub unit_price: f64,
    pub amount: f64,
}

/// A fixed-charge casualty service (dressing, suturing, nebulization, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasualtyService {
    pub name: String,
    pub qty: u32,
    pub unit_charge: f64,
    pub amount: f64,
}

/// A timed casualty-ward monitoring period. The billable value is derived
/// from elapsed time at invoice time, never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub planned_duration_minutes: i64,
    pub is_active: bool,
    #[serde(default)]
    pub notes: String,
}

impl Observation {
    /// An observation becomes billable once it is inactive or has an end
    /// time; one still actively running is not.
    pub fn is_billable(&self) -> bool {
        !self.is_active || self.end_time.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabCharge {
    pub test_name: String,
    pub amount: f64,
    #[serde(default)]
    pub cancelled: bool,
}

/// One line of the doctor's free-text prescription, e.g.
/// `{ "name": "Paracetamol 500mg", "details": "1-0-1 Qty: 10" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionEntry {
    pub name: String,
    #[serde(default)]
    pub details: String,
}

/// One patient encounter, routed between department stations. Any charge
/// array may be absent in a partially populated record; absence is empty,
/// never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub id: Uuid,
    pub patient: Uuid,
    pub patient_name: String,
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub consultation_fee: Option<f64>,
    pub assigned_role: Role,
    pub status: VisitStatus,
    #[serde(default)]
    pub vitals: Vitals,
    #[serde(default)]
    pub pharmacy_items: Vec<PharmacyItem>,
    #[serde(default)]
    pub casualty_medicines: Vec<CasualtyMedicine>,
    #[serde(default)]
    pub casualty_services: Vec<CasualtyService>,
    #[serde(default)]
    pub casualty_observations: Vec<Observation>,
    #[serde(default)]
    pub lab_charges: Vec<LabCharge>,
    #[serde(default)]
    pub prescription: Vec<PrescriptionEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Visit {
    pub fn has_active_observation(&self) -> bool {
        self.casualty_observations.iter().any(|o| o.is_active)
    }

    pub fn is_pharmacy_sale_visit(&self) -> bool {
        self.vitals.note.as_deref() == Some(PHARMACY_SALE_NOTE)
    }
}

/// Visit fixture used by unit and integration tests: an open encounter with
/// a doctor assigned and one dispensed pharmacy item.
pub fn mock_visit() -> Visit {
    let now = Utc::now();
    Visit {
        id: Uuid::new_v4(),
        patient: Uuid::new_v4(),
        patient_name: "Jane Doe".to_string(),
        doctor_name: Some("Dr. Alice Smith".to_string()),
        consultation_fee: Some(400.0),
        assigned_role: Role::Doctor,
        status: VisitStatus::Open,
        vitals: Vitals {
            bp: Some("120/80".to_string()),
            pulse: Some(72),
            temperature: Some(98.6),
            spo2: Some(98),
            note: None,
        },
        pharmacy_items: vec![PharmacyItem {
            name: "Paracetamol 500mg".to_string(),
            qty: 10,
            unit_price: 2.5,
            amount: 25.0,
            hsn: "3004".to_string(),
            batch: "B101".to_string(),
            gst: 12.0,
            dosage: "1-0-1".to_string(),
            duration: "5 Days".to_string(),
        }],
        casualty_medicines: vec![],
        casualty_services: vec![],
        casualty_observations: vec![],
        lab_charges: vec![],
        prescription: vec![],
        created_at: now - Duration::minutes(30),
        updated_at: now,
    }
}

/// Observation fixture: started `minutes_ago` minutes before now, planned
/// for one hour, still running.
pub fn mock_observation(minutes_ago: i64) -> Observation {
    Observation {
        id: Uuid::new_v4(),
        start_time: Utc::now() - Duration::minutes(minutes_ago),
        end_time: None,
        planned_duration_minutes: 60,
        is_active: true,
        notes: String::new(),
    }
}
