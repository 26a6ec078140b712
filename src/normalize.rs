use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::invoice::{Dept, InvoiceLineItem};
use crate::schema::{
    CasualtyMedicine, CasualtyService, LabCharge, Observation, PharmacyItem, PrescriptionEntry,
    Visit,
};
use crate::stock::StockItem;

/// Fee used when a doctor has no configured consultation fee.
pub const DEFAULT_CONSULTATION_FEE: f64 = 500.0;

/// Service-catalog entry holding the hourly observation rate.
pub const OBSERVATION_SERVICE: &str = "Observation Charge";

/// Hourly rate used when the catalog has no "Observation Charge" entry.
pub const DEFAULT_OBSERVATION_RATE: f64 = 500.0;

pub const CONSULTATION_DESCRIPTION: &str = "General Consultation Fee";

/// Read-only view of the charge records attached to a visit, grouped by
/// origin. Purely borrows; building it has no side effects.
pub struct ChargeSources<'a> {
    pub pharmacy: &'a [PharmacyItem],
    pub casualty_medicines: &'a [CasualtyMedicine],
    pub casualty_services: &'a [CasualtyService],
    pub observations: &'a [Observation],
    pub lab: &'a [LabCharge],
}

pub fn charge_sources(visit: &Visit) -> ChargeSources<'_> {
    ChargeSources {
        pharmacy: &visit.pharmacy_items,
        casualty_medicines: &visit.casualty_medicines,
        casualty_services: &visit.casualty_services,
        observations: &visit.casualty_observations,
        lab: &visit.lab_charges,
    }
}

/// Billable duration in minutes: elapsed wall-clock time (ceiling of
/// milliseconds to whole minutes), floored by the planned duration and by
/// one hour. Open observations count up to `now`; this is why the value has
/// to be recomputed at invoice-edit time rather than frozen.
pub fn observation_minutes(obs: &Observation, now: DateTime<Utc>) -> i64 {
    let end = obs.end_time.unwrap_or(now);
    let elapsed_ms = (end - obs.start_time).num_milliseconds().max(0);
    let elapsed_minutes = (elapsed_ms as u64).div_ceil(60_000) as i64;
    elapsed_minutes.max(obs.planned_duration_minutes).max(60)
}

/// Canonical observation charge: ceiling of duration-hours times the hourly
/// rate. Used for both preview and final billing.
pub fn observation_charge(obs: &Observation, hourly_rate: f64, now: DateTime<Utc>) -> f64 {
    (observation_minutes(obs, now) as f64 / 60.0 * hourly_rate).ceil()
}

/// Synthesize the consultation fee line. None when no doctor saw the
/// patient, which covers pharmacy counter-sale visits and casualty-to-lab
/// referrals that never involved a consult.
pub fn consultation_line(visit: &Visit) -> Option<InvoiceLineItem> {
    let doctor = visit.doctor_name.as_deref()?;
    if doctor.is_empty() || doctor == "Not Assigned" || visit.is_pharmacy_sale_visit() {
        return None;
    }
    let fee = visit.consultation_fee.unwrap_or(DEFAULT_CONSULTATION_FEE);
    Some(InvoiceLineItem::new(
        Dept::Consultation,
        CONSULTATION_DESCRIPTION,
        1,
        fee,
    ))
}

/// Map every charge record attached to a visit into canonical invoice
/// lines. Dispensed pharmacy and casualty medicines arrive already
/// deducted; observation lines are derived fresh against `now`.
pub fn normalize_visit(visit: &Visit, observation_rate: f64, now: DateTime<Utc>) -> Vec<InvoiceLineItem> {
    let sources = charge_sources(visit);
    let mut items = Vec::new();

    if let Some(line) = consultation_line(visit) {
        items.push(line);
    }

    for med in sources.pharmacy {
        let mut line = InvoiceLineItem::new(Dept::Pharmacy, med.name.clone(), med.qty, med.unit_price);
        line.amount = med.amount;
        line.hsn = med.hsn.clone();
        line.batch = med.batch.clone();
        line.gst_percent = med.gst;
        line.dosage = med.dosage.clone();
        line.duration = med.duration.clone();
        // deducted at dispense time; the gate must never touch it again
        line.stock_deducted = true;
        line.deducted_qty = med.qty;
        items.push(line);
    }

    for med in sources.casualty_medicines {
        let mut line =
            InvoiceLineItem::new(Dept::Casualty, med.name.clone(), med.qty, med.unit_price);
        line.amount = med.amount;
        line.batch = med.batch.clone();
        line.stock_deducted = true;
        line.deducted_qty = med.qty;
        items.push(line);
    }

    for service in sources.casualty_services {
        let mut line = InvoiceLineItem::new(
            Dept::Casualty,
            service.name.clone(),
            service.qty,
            service.unit_charge,
        );
        line.amount = service.amount;
        items.push(line);
    }

    for obs in sources.observations.iter().filter(|o| o.is_billable()) {
        let charge = observation_charge(obs, observation_rate, now);
        let mut line = InvoiceLineItem::new(Dept::Casualty, OBSERVATION_SERVICE, 1, charge);
        line.item_id = Some(obs.id);
        items.push(line);
    }

    for lab in sources.lab.iter().filter(|l| !l.cancelled && l.amount > 0.0) {
        items.push(InvoiceLineItem::new(
            Dept::Lab,
            lab.test_name.clone(),
            1,
            lab.amount,
        ));
    }

    debug!(visit = %visit.id, lines = items.len(), "visit normalized");
    items
}

/// Merge freshly normalized lines into the lines of an invoice being
/// edited, without creating duplicates. Lines from the same source record
/// (matching `item_id`) have their derived figures refreshed in place;
/// open-observation charges grow between edits. Everything else matches on
/// the `(description, batch)` key and the existing line wins.
pub fn merge_items(
    existing: Vec<InvoiceLineItem>,
    incoming: Vec<InvoiceLineItem>,
) -> Vec<InvoiceLineItem> {
    let mut out = existing;
    for inc in incoming {
        let matched = out.iter_mut().find(|cur| match (cur.item_id, inc.item_id) {
            (Some(a), Some(b)) => a == b,
            _ => cur.dedup_key() == inc.dedup_key(),
        });
        match matched {
            Some(cur) => {
                if cur.item_id.is_some() && cur.item_id == inc.item_id {
                    cur.qty = inc.qty;
                    cur.unit_price = inc.unit_price;
                    cur.amount = inc.amount;
                }
            }
            None => out.push(inc),
        }
    }
    out
}

/// Pull the quantity out of a prescription's free-text details
/// ("1-0-1 Qty: 10" -> 10). Defaults to 1.
pub fn parse_prescribed_qty(details: &str) -> u32 {
    let lower = details.to_lowercase();
    let Some(pos) = lower.find("qty:") else {
        return 1;
    };
    let digits: String = lower[pos + 4..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(1)
}

/// Inputs for a prescription import. `fresh_pharmacy` must be refetched
/// from the store immediately before the merge; a stale in-memory copy can
/// miss a sale recorded seconds ago.
pub struct ImportContext<'a> {
    pub prescription: &'a [PrescriptionEntry],
    pub fresh_pharmacy: &'a [PharmacyItem],
    pub stock: &'a [StockItem],
}

/// Merge the doctor's prescription and the visit's dispensed items into a
/// draft's line list. A medicine already present (case-insensitive name) is
/// skipped; a dispense record's price beats the stock catalog's.
pub fn import_prescription(items: &mut Vec<InvoiceLineItem>, ctx: &ImportContext<'_>) {
    let mut present: HashSet<String> = items
        .iter()
        .map(|i| i.description.trim().to_lowercase())
        .collect();

    for entry in ctx.prescription {
        let med_name = entry.name.trim();
        if med_name.is_empty() || present.contains(&med_name.to_lowercase()) {
            continue;
        }
        let mut qty = parse_prescribed_qty(&entry.details);

        let dispensed = ctx
            .fresh_pharmacy
            .iter()
            .find(|p| p.name.trim().eq_ignore_ascii_case(med_name));
        let catalog = ctx
            .stock
            .iter()
            .find(|s| s.name.trim().eq_ignore_ascii_case(med_name));

        let mut line = InvoiceLineItem::new(Dept::Pharmacy, med_name, qty, 0.0);
        line.dosage = entry.details.clone();

        if let Some(sale) = dispensed {
            // actual billed qty and price win over the prescription text
            qty = sale.qty;
            line.qty = qty;
            line.unit_price = sale.unit_price;
            line.amount = sale.amount;
            line.gst_percent = sale.gst;
            line.hsn = sale.hsn.clone();
            line.batch = sale.batch.clone();
            line.stock_deducted = true;
            line.deducted_qty = qty;
        } else if let Some(stock) = catalog {
            line.set_unit_price(stock.unit_price());
            line.gst_percent = stock.gst_percent;
            line.hsn = stock.hsn.clone();
            line.batch = stock.batch_no.clone();
            line.expiry = stock
                .expiry_date
                .map(|d| d.to_string())
                .unwrap_or_default();
        }

        present.insert(med_name.to_lowercase());
        items.push(line);
    }

    // Dispensed items the prescription never named (counter sales, substitutions).
    for sale in ctx.fresh_pharmacy {
        let key = sale.name.trim().to_lowercase();
        if present.contains(&key) {
            continue;
        }
        let mut line = InvoiceLineItem::new(Dept::Pharmacy, sale.name.clone(), sale.qty, sale.unit_price);
        line.amount = sale.amount;
        line.gst_percent = sale.gst;
        line.hsn = sale.hsn.clone();
        line.batch = sale.batch.clone();
        line.dosage = sale.dosage.clone();
        line.duration = sale.duration.clone();
        line.stock_deducted = true;
        line.deducted_qty = sale.qty;
        present.insert(key);
        items.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{mock_observation, mock_visit, PHARMACY_SALE_NOTE};
    use crate::stock::mock_stock;
    use chrono::Duration;
    use uuid::Uuid;

    #[test]
    fn test_charge_sources_tolerates_empty_visit() {
        let mut visit = mock_visit();
        visit.pharmacy_items.clear();
        let sources = charge_sources(&visit);
        assert!(sources.pharmacy.is_empty());
        assert!(sources.observations.is_empty());
    }

    /// Open observation at T+90min with a 60-minute plan bills 1.5h; at
    /// T+10min the one-hour floor applies.
    #[test]
    fn test_observation_charge_floors_and_elapsed() {
        let mut obs = mock_observation(0);
        obs.planned_duration_minutes = 60;
        let start = obs.start_time;

        assert_eq!(observation_charge(&obs, 500.0, start + Duration::minutes(90)), 750.0);
        assert_eq!(observation_charge(&obs, 500.0, start + Duration::minutes(10)), 500.0);
    }

    /// Sub-minute elapsed time rounds up to whole minutes before the max.
    #[test]
    fn test_observation_minutes_ceils_milliseconds() {
        let mut obs = mock_observation(0);
        obs.planned_duration_minutes = 120;
        let at = obs.start_time + Duration::minutes(120) + Duration::seconds(1);
        assert_eq!(observation_minutes(&obs, at), 121);
    }

    /// An ended observation bills to its end time, not to now.
    #[test]
    fn test_ended_observation_ignores_now() {
        let mut obs = mock_observation(0);
        obs.planned_duration_minutes = 60;
        obs.end_time = Some(obs.start_time + Duration::minutes(90));
        obs.is_active = false;
        let much_later = obs.start_time + Duration::hours(8);
        assert_eq!(observation_charge(&obs, 500.0, much_later), 750.0);
    }

    #[test]
    fn test_consultation_fee_rules() {
        let visit = mock_visit();
        let line = consultation_line(&visit).expect("doctor assigned");
        assert_eq!(line.amount, 400.0);

        let mut unset_fee = mock_visit();
        unset_fee.consultation_fee = None;
        let line = consultation_line(&unset_fee).expect("default fee");
        assert_eq!(line.amount, DEFAULT_CONSULTATION_FEE);

        let mut no_doctor = mock_visit();
        no_doctor.doctor_name = None;
        assert!(consultation_line(&no_doctor).is_none());

        let mut counter_sale = mock_visit();
        counter_sale.vitals.note = Some(PHARMACY_SALE_NOTE.to_string());
        assert!(consultation_line(&counter_sale).is_none());
    }

    /// A lab referral that originated purely from casualty entries, with no
    /// doctor consult, must not be charged a consultation fee.
    #[test]
    fn test_casualty_to_lab_referral_has_no_fee() {
        let mut visit = mock_visit();
        visit.doctor_name = None;
        visit.pharmacy_items.clear();
        visit.casualty_services = vec![crate::schema::CasualtyService {
            name: "Wound Dressing".to_string(),
            qty: 1,
            unit_charge: 150.0,
            amount: 150.0,
        }];
        visit.lab_charges = vec![crate::schema::LabCharge {
            test_name: "CBC".to_string(),
            amount: 250.0,
            cancelled: false,
        }];

        let items = normalize_visit(&visit, DEFAULT_OBSERVATION_RATE, Utc::now());
        assert!(items.iter().all(|i| i.dept != Dept::Consultation));
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_normalize_marks_dispensed_lines_deducted() {
        let visit = mock_visit();
        let items = normalize_visit(&visit, DEFAULT_OBSERVATION_RATE, Utc::now());

        let pharmacy: Vec<_> = items.iter().filter(|i| i.dept == Dept::Pharmacy).collect();
        assert_eq!(pharmacy.len(), 1);
        assert!(pharmacy[0].stock_deducted);
        assert_eq!(pharmacy[0].deducted_qty, 10);
        assert_eq!(pharmacy[0].batch, "B101");
    }

    #[test]
    fn test_normalize_skips_running_observations_and_cancelled_labs() {
        let mut visit = mock_visit();
        visit.casualty_observations = vec![mock_observation(30)]; // still running
        visit.lab_charges = vec![
            crate::schema::LabCharge {
                test_name: "CBC".to_string(),
                amount: 250.0,
                cancelled: true,
            },
            crate::schema::LabCharge {
                test_name: "LFT".to_string(),
                amount: 0.0,
                cancelled: false,
            },
        ];

        let items = normalize_visit(&visit, DEFAULT_OBSERVATION_RATE, Utc::now());
        assert!(items.iter().all(|i| i.dept != Dept::Lab));
        assert!(items.iter().all(|i| i.description != OBSERVATION_SERVICE));
    }

    /// Re-merging the same sources into an edited invoice must not create
    /// duplicates, and must refresh a still-growing observation charge.
    #[test]
    fn test_merge_dedups_and_refreshes_observation() {
        let mut visit = mock_visit();
        let mut obs = mock_observation(0);
        obs.is_active = false;
        obs.end_time = Some(obs.start_time + Duration::minutes(60));
        visit.casualty_observations = vec![obs.clone()];

        let now = obs.start_time + Duration::minutes(60);
        let first = normalize_visit(&visit, 500.0, now);

        // observation keeps running in a corrected record
        visit.casualty_observations[0].end_time = Some(obs.start_time + Duration::minutes(90));
        let second = normalize_visit(&visit, 500.0, now);

        let merged = merge_items(first.clone(), second);
        assert_eq!(merged.len(), first.len());
        let obs_line = merged
            .iter()
            .find(|i| i.description == OBSERVATION_SERVICE)
            .expect("observation line");
        assert_eq!(obs_line.amount, 750.0);
    }

    #[test]
    fn test_parse_prescribed_qty() {
        assert_eq!(parse_prescribed_qty("1-0-1 Qty: 10"), 10);
        assert_eq!(parse_prescribed_qty("QTY:3"), 3);
        assert_eq!(parse_prescribed_qty("twice daily"), 1);
        assert_eq!(parse_prescribed_qty("Qty: many"), 1);
    }

    /// The same medicine arriving via prescription import and dispense
    /// import yields exactly one line, at the dispense-record price.
    #[test]
    fn test_import_prefers_dispense_price_and_dedups() {
        let visit = mock_visit();
        let prescription = vec![PrescriptionEntry {
            name: "Paracetamol 500mg".to_string(),
            details: "1-0-1 Qty: 6".to_string(),
        }];
        let mut stock = mock_stock();
        stock.mrp = 40.0; // catalog price differs from the sale price

        let mut items = Vec::new();
        import_prescription(
            &mut items,
            &ImportContext {
                prescription: &prescription,
                fresh_pharmacy: &visit.pharmacy_items,
                stock: &[stock],
            },
        );

        assert_eq!(items.len(), 1);
        let line = &items[0];
        assert_eq!(line.unit_price, 2.5); // dispense price, not 4.0
        assert_eq!(line.qty, 10); // actual billed qty, not the prescribed 6
        assert!(line.stock_deducted);
    }

    /// A prescribed medicine with no dispense record prices from the stock
    /// catalog at pack-price / units-per-pack, and stays undeducted for the
    /// gate to validate.
    #[test]
    fn test_import_falls_back_to_catalog_price() {
        let prescription = vec![PrescriptionEntry {
            name: "Cetirizine 10mg".to_string(),
            details: "0-0-1 Qty: 5".to_string(),
        }];
        let mut stock = mock_stock();
        stock.name = "Cetirizine 10mg".to_string();
        stock.mrp = 30.0;
        stock.tablets_per_strip = 10;
        stock.batch_no = "C33".to_string();

        let mut items = Vec::new();
        import_prescription(
            &mut items,
            &ImportContext {
                prescription: &prescription,
                fresh_pharmacy: &[],
                stock: &[stock],
            },
        );

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].qty, 5);
        assert_eq!(items[0].unit_price, 3.0);
        assert_eq!(items[0].batch, "C33");
        assert!(!items[0].stock_deducted);
    }

    /// Dispensed items the prescription never named are appended once.
    #[test]
    fn test_import_appends_unprescribed_sales() {
        let visit = mock_visit();
        let mut items = vec![];
        let ctx = ImportContext {
            prescription: &[],
            fresh_pharmacy: &visit.pharmacy_items,
            stock: &[],
        };
        import_prescription(&mut items, &ctx);
        import_prescription(&mut items, &ctx); // second import is a no-op
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "Paracetamol 500mg");
    }

    #[test]
    fn test_merge_keeps_manual_lines_distinct_by_batch() {
        let mut a = InvoiceLineItem::new(Dept::Pharmacy, "Amoxicillin 250mg", 5, 4.0);
        a.batch = "A1".to_string();
        let mut b = InvoiceLineItem::new(Dept::Pharmacy, "Amoxicillin 250mg", 5, 4.0);
        b.batch = "A2".to_string();

        let merged = merge_items(vec![a], vec![b]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_distinct_observations_both_kept() {
        let mk = |amount: f64| {
            let mut line = InvoiceLineItem::new(Dept::Casualty, OBSERVATION_SERVICE, 1, amount);
            line.item_id = Some(Uuid::new_v4());
            line
        };
        let existing = vec![mk(500.0)];
        let incoming = vec![existing[0].clone(), mk(750.0)];
        let merged = merge_items(existing, incoming);
        assert_eq!(merged.len(), 2);
    }
}
