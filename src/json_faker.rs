use std::fs::File;
use std::io::{BufWriter, Write};

use chrono::{Duration, Utc};
use fake::faker::name::en::*;
use fake::faker::number::en::*;
use fake::Fake;
use rand::Rng;
use rand::seq::IndexedRandom;
use uuid::Uuid;

use crate::reader::SeedRecord;
use crate::schema::{
    CasualtyService, LabCharge, Observation, Patient, PharmacyItem, PrescriptionEntry, Role,
    Visit, VisitStatus, Vitals, PHARMACY_SALE_NOTE,
};
use crate::stock::StockItem;

const MEDICINES: [&str; 8] = [
    "Paracetamol 500mg",
    "Amoxicillin 250mg",
    "Cetirizine 10mg",
    "Ibuprofen 400mg",
    "Pantoprazole 40mg",
    "Metformin 500mg",
    "Azithromycin 500mg",
    "ORS Sachet",
];

const SERVICES: [(&str, f64); 4] = [
    ("Observation Charge", 500.0),
    ("Wound Dressing", 150.0),
    ("Suturing", 350.0),
    ("Nebulization", 200.0),
];

const LAB_TESTS: [(&str, f64); 4] = [
    ("CBC", 250.0),
    ("LFT", 400.0),
    ("Blood Sugar Fasting", 120.0),
    ("Urine Routine", 150.0),
];

/// Generate a stock batch for every known medicine.
pub fn fake_stock() -> Vec<StockItem> {
    let mut rng = rand::rng();
    MEDICINES
        .iter()
        .map(|name| StockItem {
            id: Uuid::new_v4(),
            name: name.to_string(),
            batch_no: NumberWithFormat("B###").fake(),
            expiry_date: Some(
                (Utc::now() + Duration::days(rng.random_range(120..720))).date_naive(),
            ),
            qty_available: rng.random_range(50..500),
            mrp: rng.random_range(20..120) as f64,
            gst_percent: *[0.0, 5.0, 12.0].choose(&mut rng).unwrap_or(&12.0),
            hsn: NumberWithFormat("30##").fake(),
            tablets_per_strip: *[1, 10, 15].choose(&mut rng).unwrap_or(&10),
        })
        .collect()
}

/// Generate a realistic fake visit seeded with charges drawn from stock.
///
/// Mix: doctor consultations with dispensed prescriptions, casualty cases
/// with services and ended observations, lab referrals, and the occasional
/// pharmacy counter sale.
pub fn fake_visit(stock: &[StockItem]) -> Visit {
    let mut rng = rand::rng();
    let now = Utc::now();
    let patient = fake_patient();
    let kind = rng.random_range(0..5);

    let mut visit = Visit {
        id: Uuid::new_v4(),
        patient: patient.id,
        patient_name: patient.full_name,
        doctor_name: None,
        consultation_fee: None,
        assigned_role: Role::Reception,
        status: VisitStatus::Open,
        vitals: Vitals {
            bp: Some(format!(
                "{}/{}",
                rng.random_range(100..150),
                rng.random_range(60..95)
            )),
            pulse: Some(rng.random_range(60..110)),
            temperature: Some(97.0 + rng.random_range(0..40) as f64 / 10.0),
            spo2: Some(rng.random_range(93..100)),
            note: None,
        },
        pharmacy_items: vec![],
        casualty_medicines: vec![],
        casualty_services: vec![],
        casualty_observations: vec![],
        lab_charges: vec![],
        prescription: vec![],
        created_at: now - Duration::minutes(rng.random_range(5..180)),
        updated_at: now,
    };

    match kind {
        // doctor consult with a dispensed prescription
        0 | 1 => {
            let first: String = FirstName().fake();
            let last: String = LastName().fake();
            visit.doctor_name = Some(format!("Dr. {first} {last}"));
            visit.consultation_fee = Some(*[300.0, 400.0, 500.0].choose(&mut rng).unwrap_or(&500.0));
            for item in pick_dispensed(stock, rng.random_range(1..4)) {
                visit.prescription.push(PrescriptionEntry {
                    name: item.name.clone(),
                    details: format!("1-0-1 Qty: {}", item.qty),
                });
                visit.pharmacy_items.push(item);
            }
        }
        // casualty case: services, sometimes an ended observation
        2 => {
            let (name, charge) = SERVICES[rng.random_range(1..SERVICES.len())];
            let qty = rng.random_range(1..3);
            visit.casualty_services.push(CasualtyService {
                name: name.to_string(),
                qty,
                unit_charge: charge,
                amount: qty as f64 * charge,
            });
            if rng.random_bool(0.5) {
                let start = now - Duration::minutes(rng.random_range(70..200));
                visit.casualty_observations.push(Observation {
                    id: Uuid::new_v4(),
                    start_time: start,
                    end_time: Some(now - Duration::minutes(5)),
                    planned_duration_minutes: 60,
                    is_active: false,
                    notes: String::new(),
                });
            }
        }
        // lab referral
        3 => {
            let (test, amount) = LAB_TESTS[rng.random_range(0..LAB_TESTS.len())];
            visit.lab_charges.push(LabCharge {
                test_name: test.to_string(),
                amount,
                cancelled: rng.random_bool(0.1),
            });
        }
        // pharmacy counter sale, no consult
        _ => {
            visit.vitals.note = Some(PHARMACY_SALE_NOTE.to_string());
            for item in pick_dispensed(stock, rng.random_range(1..3)) {
                visit.pharmacy_items.push(item);
            }
        }
    }
    visit
}

fn fake_patient() -> Patient {
    let mut rng = rand::rng();
    Patient {
        id: Uuid::new_v4(),
        full_name: Name().fake(),
        age: rng.random_range(1..90),
        gender: ["M", "F", "O"].choose(&mut rng).unwrap_or(&"O").to_string(),
        phone: NumberWithFormat("98########").fake(),
        address: Some(fake::faker::address::en::CityName().fake()),
    }
}

fn pick_dispensed(stock: &[StockItem], count: usize) -> Vec<PharmacyItem> {
    let mut rng = rand::rng();
    let mut out = Vec::new();
    for _ in 0..count {
        let Some(batch) = stock.choose(&mut rng) else {
            continue;
        };
        if out
            .iter()
            .any(|i: &PharmacyItem| i.name.eq_ignore_ascii_case(&batch.name))
        {
            continue;
        }
        let qty = rng.random_range(1..15u32);
        let unit_price = batch.unit_price();
        out.push(PharmacyItem {
            name: batch.name.clone(),
            qty,
            unit_price,
            amount: qty as f64 * unit_price,
            hsn: batch.hsn.clone(),
            batch: batch.batch_no.clone(),
            gst: batch.gst_percent,
            dosage: "1-0-1".to_string(),
            duration: format!("{} Days", rng.random_range(3..8)),
        });
    }
    out
}

/// Write a complete JSONL feed: stock first, then service definitions,
/// then `visit_count` visits referencing that stock.
pub fn write_fake_feed(path: &str, visit_count: usize) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let stock = fake_stock();
    for item in &stock {
        let line = serde_json::to_string(&SeedRecord::Stock(item.clone()))?;
        writeln!(writer, "{line}")?;
    }
    for (name, charge) in SERVICES {
        let line = serde_json::to_string(&SeedRecord::Service {
            name: name.to_string(),
            charge,
        })?;
        writeln!(writer, "{line}")?;
    }
    for _ in 0..visit_count {
        let line = serde_json::to_string(&SeedRecord::Visit(Box::new(fake_visit(&stock))))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}
