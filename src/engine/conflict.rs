use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Whether `schedule` already holds a blocking claim on `at`.
///
/// Cancelled claims never block. Completed claims block only when
/// `completed_blocks_slot` is set. `ignore` skips the appointment being moved.
pub fn slot_taken(
    schedule: &BarberSchedule,
    at: NaiveDateTime,
    ignore: Option<Ulid>,
    completed_blocks_slot: bool,
) -> bool {
    schedule.claims_at(at).iter().any(|claim| {
        if Some(claim.appointment_id) == ignore {
            return false;
        }
        match claim.status {
            AppointmentStatus::Pending | AppointmentStatus::Assigned => true,
            AppointmentStatus::Completed => completed_blocks_slot,
            AppointmentStatus::Cancelled => false,
        }
    })
}

/// Conflict check run while holding the barber's schedule write lock.
pub(super) fn check_no_conflict(
    schedule: &BarberSchedule,
    at: NaiveDateTime,
    ignore: Option<Ulid>,
    completed_blocks_slot: bool,
) -> Result<(), EngineError> {
    if slot_taken(schedule, at, ignore, completed_blocks_slot) {
        metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::SlotConflict {
            barber_id: schedule.barber_id,
            at,
        });
    }
    Ok(())
}

impl Engine {
    /// Read-only probe: does `barber_id` already hold `at`? An unassigned
    /// booking or a missing slot can never conflict.
    pub async fn has_conflict(&self, barber_id: Option<UserId>, at: Option<NaiveDateTime>) -> bool {
        let (Some(barber_id), Some(at)) = (barber_id, at) else {
            return false;
        };
        let Some(schedule) = self.get_schedule(barber_id) else {
            return false;
        };
        let guard = schedule.read().await;
        slot_taken(&guard, at, None, self.config.completed_blocks_slot)
    }
}
