use thiserror::Error;

use crate::schema::Role;

/// Error taxonomy for the reconciliation engine. Validation variants carry
/// the specific failing item so the station can show an actionable message;
/// transient variants are left to the next poll cycle to self-correct.
#[derive(Error, Debug)]
pub enum ClinicError {
    #[error("No stock record found for {name} (Batch: {batch})")]
    MissingStock { name: String, batch: String },

    #[error(
        "Insufficient stock for {name} (Batch: {batch}). Available: {available}, Requested: {requested}"
    )]
    InsufficientStock {
        name: String,
        batch: String,
        available: u32,
        requested: u32,
    },

    #[error("No payment details provided")]
    EmptyPayment,

    #[error("Refund amount must be positive")]
    InvalidRefund,

    #[error("Visit is under active observation; transfer deferred")]
    ObservationActive,

    #[error("Illegal transfer from {from:?} to {to:?}")]
    IllegalTransfer { from: Role, to: Role },

    #[error("Visit is closed")]
    VisitClosed,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

pub type ClinicResult<T> = Result<T, ClinicError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Validation messages must name the failing item and the shortfall so
    /// the billing operator can act on them.
    #[test]
    fn test_stock_error_messages_are_actionable() {
        let missing = ClinicError::MissingStock {
            name: "Paracetamol 500mg".to_string(),
            batch: "B101".to_string(),
        };
        assert!(missing.to_string().contains("Paracetamol 500mg"));
        assert!(missing.to_string().contains("B101"));

        let short = ClinicError::InsufficientStock {
            name: "Amoxicillin 250mg".to_string(),
            batch: "A7".to_string(),
            available: 4,
            requested: 10,
        };
        let msg = short.to_string();
        assert!(msg.contains("Available: 4"));
        assert!(msg.contains("Requested: 10"));
    }
}
