use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{ClinicError, ClinicResult};
use crate::schema::{Observation, Role, Visit, VisitStatus};

/// Transfer a visit to another station. Reception hands off to any
/// department; departments hand off among themselves and to billing;
/// billing only closes. A visit pinned by an active observation rejects
/// every transfer with a deferral error; the request is not queued.
pub fn transfer(visit: &mut Visit, to: Role, now: DateTime<Utc>) -> ClinicResult<()> {
    if visit.status == VisitStatus::Closed {
        return Err(ClinicError::VisitClosed);
    }
    if visit.has_active_observation() {
        // pinned to casualty until every observation is closed
        visit.assigned_role = Role::Casualty;
        visit.status = VisitStatus::InProgress;
        return Err(ClinicError::ObservationActive);
    }
    if !is_legal(visit.assigned_role, to) {
        return Err(ClinicError::IllegalTransfer {
            from: visit.assigned_role,
            to,
        });
    }
    info!(visit = %visit.id, from = ?visit.assigned_role, to = ?to, "visit transferred");
    visit.assigned_role = to;
    visit.updated_at = now;
    Ok(())
}

fn is_legal(from: Role, to: Role) -> bool {
    // reception is an origin, never a destination; billing is terminal
    if to == Role::Reception {
        return from == Role::Reception;
    }
    if from == Role::Billing {
        return to == Role::Billing;
    }
    true
}

/// Start a timed observation. The visit is pinned to the casualty station
/// for its duration.
pub fn start_observation(
    visit: &mut Visit,
    planned_duration_minutes: i64,
    now: DateTime<Utc>,
) -> ClinicResult<Uuid> {
    if visit.status == VisitStatus::Closed {
        return Err(ClinicError::VisitClosed);
    }
    let obs = Observation {
        id: Uuid::new_v4(),
        start_time: now,
        end_time: None,
        planned_duration_minutes,
        is_active: true,
        notes: String::new(),
    };
    let id = obs.id;
    visit.casualty_observations.push(obs);
    visit.assigned_role = Role::Casualty;
    visit.status = VisitStatus::InProgress;
    info!(visit = %visit.id, observation = %id, planned_duration_minutes, "observation started");
    Ok(id)
}

/// End an observation. Every active observation on the visit is closed,
/// not only the one named: concurrent writes from multiple stations can
/// leave duplicate active rows, and the sweep self-heals them. Returns how
/// many rows were closed.
pub fn end_observation(visit: &mut Visit, obs_id: Uuid, now: DateTime<Utc>) -> ClinicResult<usize> {
    if !visit.casualty_observations.iter().any(|o| o.id == obs_id) {
        return Err(ClinicError::NotFound {
            entity: "observation",
            id: obs_id.to_string(),
        });
    }
    let mut closed = 0;
    for obs in &mut visit.casualty_observations {
        if obs.is_active {
            obs.is_active = false;
            if obs.end_time.is_none() {
                obs.end_time = Some(now);
            }
            closed += 1;
        }
    }
    visit.updated_at = now;
    info!(visit = %visit.id, closed, "observation(s) closed");
    Ok(closed)
}

/// Route a treated visit to the billing queue. Same deferral rule as any
/// other transfer.
pub fn discharge_to_billing(visit: &mut Visit, now: DateTime<Utc>) -> ClinicResult<()> {
    transfer(visit, Role::Billing, now)
}

/// Terminal close, applied when the invoice is committed.
pub fn close_visit(visit: &mut Visit, now: DateTime<Utc>) {
    visit.status = VisitStatus::Closed;
    visit.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{mock_observation, mock_visit};

    #[test]
    fn test_reception_routes_to_departments() {
        let mut visit = mock_visit();
        visit.assigned_role = Role::Reception;
        transfer(&mut visit, Role::Casualty, Utc::now()).expect("legal");
        assert_eq!(visit.assigned_role, Role::Casualty);
        transfer(&mut visit, Role::Lab, Utc::now()).expect("legal");
        transfer(&mut visit, Role::Billing, Utc::now()).expect("legal");
    }

    #[test]
    fn test_billing_is_terminal_and_closed_rejects_all() {
        let mut visit = mock_visit();
        visit.assigned_role = Role::Billing;
        let err = transfer(&mut visit, Role::Doctor, Utc::now()).expect_err("terminal");
        assert!(matches!(err, ClinicError::IllegalTransfer { .. }));

        close_visit(&mut visit, Utc::now());
        let err = transfer(&mut visit, Role::Billing, Utc::now()).expect_err("closed");
        assert!(matches!(err, ClinicError::VisitClosed));
    }

    #[test]
    fn test_no_transfer_back_to_reception() {
        let mut visit = mock_visit();
        visit.assigned_role = Role::Doctor;
        let err = transfer(&mut visit, Role::Reception, Utc::now()).expect_err("one-way");
        assert!(matches!(err, ClinicError::IllegalTransfer { .. }));
    }

    /// A visit under an active observation stays CASUALTY / IN_PROGRESS no
    /// matter what transfer is requested; the request is deferred, not
    /// queued.
    #[test]
    fn test_active_observation_defers_discharge() {
        let mut visit = mock_visit();
        visit.assigned_role = Role::Casualty;
        visit.casualty_observations = vec![mock_observation(30)];

        let err = discharge_to_billing(&mut visit, Utc::now()).expect_err("deferred");
        assert!(matches!(err, ClinicError::ObservationActive));
        assert_eq!(visit.assigned_role, Role::Casualty);
        assert_eq!(visit.status, VisitStatus::InProgress);

        // the deferral is not a queue: ending the observation does not move
        // the visit anywhere on its own
        let obs_id = visit.casualty_observations[0].id;
        end_observation(&mut visit, obs_id, Utc::now()).expect("close");
        assert_eq!(visit.assigned_role, Role::Casualty);

        discharge_to_billing(&mut visit, Utc::now()).expect("now allowed");
        assert_eq!(visit.assigned_role, Role::Billing);
    }

    /// Closing the only known-active observation on a visit with two stale
    /// active rows closes both.
    #[test]
    fn test_end_observation_sweeps_duplicates() {
        let mut visit = mock_visit();
        visit.casualty_observations = vec![mock_observation(90), mock_observation(45)];
        let target = visit.casualty_observations[0].id;

        let closed = end_observation(&mut visit, target, Utc::now()).expect("sweep");
        assert_eq!(closed, 2);
        assert!(visit.casualty_observations.iter().all(|o| !o.is_active));
        assert!(visit.casualty_observations.iter().all(|o| o.end_time.is_some()));
        assert!(!visit.has_active_observation());
    }

    #[test]
    fn test_end_observation_unknown_id() {
        let mut visit = mock_visit();
        visit.casualty_observations = vec![mock_observation(10)];
        let err = end_observation(&mut visit, Uuid::new_v4(), Utc::now()).expect_err("unknown");
        assert!(matches!(err, ClinicError::NotFound { .. }));
        assert!(visit.has_active_observation());
    }

    /// An ended observation keeps its original end time through the sweep.
    #[test]
    fn test_sweep_preserves_existing_end_times() {
        let mut visit = mock_visit();
        let mut stale = mock_observation(120);
        let original_end = stale.start_time + chrono::Duration::minutes(60);
        stale.end_time = Some(original_end); // ended but still flagged active
        visit.casualty_observations = vec![stale, mock_observation(30)];
        let target = visit.casualty_observations[1].id;

        end_observation(&mut visit, target, Utc::now()).expect("sweep");
        assert_eq!(visit.casualty_observations[0].end_time, Some(original_end));
    }

    #[test]
    fn test_start_observation_pins_visit() {
        let mut visit = mock_visit();
        visit.assigned_role = Role::Doctor;
        start_observation(&mut visit, 60, Utc::now()).expect("start");
        assert_eq!(visit.assigned_role, Role::Casualty);
        assert_eq!(visit.status, VisitStatus::InProgress);
        assert!(visit.has_active_observation());
    }
}
