use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc::Receiver;
use tokio::time::{Duration, interval};
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Topic};
use crate::config::Config;
use crate::error::ClinicError;
use crate::routing;
use crate::schema::{Role, Visit, VisitStatus};
use crate::store::Stores;

/// Department driver task for the simulation: walks every open visit each
/// poll cycle and advances it one hop toward billing, the way the ward
/// stations do by hand. Observation-pinned visits are left alone until
/// their planned window elapses, then closed and discharged.
pub async fn run_triage(
    config: Config,
    stores: Stores,
    bus: EventBus,
    mut shutdown_rx: Receiver<()>,
) -> anyhow::Result<()> {
    if config.poll_secs == 0 {
        return Err(anyhow::anyhow!("Config poll_secs must be non-zero"));
    }
    let mut ticker = interval(Duration::from_secs(config.poll_secs));
    if config.verbose {
        info!("Starting triage station task");
    }

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                advance_open_visits(&stores, &bus).await;
            }
            _ = shutdown_rx.recv() => break,
        }
    }
    Ok(())
}

async fn advance_open_visits(stores: &Stores, bus: &EventBus) {
    for visit in stores.visits.all().await {
        if visit.status == VisitStatus::Closed || visit.assigned_role == Role::Billing {
            continue;
        }
        let now = Utc::now();
        let result = stores
            .visits
            .update_with(visit.id, |v| advance(v, now))
            .await;
        match result {
            Ok(true) => bus.publish(Topic::VisitUpdated, visit.id),
            Ok(false) => {}
            Err(ClinicError::ObservationActive) => {
                debug!(visit = %visit.id, "transfer deferred; observation still running");
            }
            Err(err) => warn!(visit = %visit.id, error = %err, "triage skipped visit"),
        }
    }
}

/// One routing hop. Returns true when the visit moved.
fn advance(visit: &mut Visit, now: chrono::DateTime<Utc>) -> Result<bool, ClinicError> {
    // close observations whose planned window has elapsed, then discharge
    let elapsed_obs = visit
        .casualty_observations
        .iter()
        .find(|o| {
            o.is_active && now >= o.start_time + ChronoDuration::minutes(o.planned_duration_minutes)
        })
        .map(|o| o.id);
    if let Some(obs_id) = elapsed_obs {
        routing::end_observation(visit, obs_id, now)?;
        routing::discharge_to_billing(visit, now)?;
        return Ok(true);
    }

    match visit.assigned_role {
        Role::Reception => {
            let to = if visit.doctor_name.is_some() {
                Role::Doctor
            } else if !visit.casualty_services.is_empty() || !visit.casualty_medicines.is_empty() {
                Role::Casualty
            } else if !visit.lab_charges.is_empty() {
                Role::Lab
            } else {
                Role::Pharmacy
            };
            routing::transfer(visit, to, now)?;
            Ok(true)
        }
        Role::Doctor | Role::Pharmacy | Role::Lab | Role::Casualty => {
            routing::discharge_to_billing(visit, now)?;
            Ok(true)
        }
        Role::Billing => Ok(false),
    }
}
