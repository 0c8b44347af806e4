//! Appointment state machine.
//!
//! ```text
//!            assign                 sweep (time passed)
//! Pending ───────────▶ Assigned ─────────────────────▶ Completed
//!    ▲                    │
//!    └──── unassign ──────┘
//!
//! Pending | Assigned ── customer cancel ──▶ Cancelled
//! Pending ── sweep (time passed) ─────────▶ Cancelled
//! ```
//!
//! `guard` decides whether a transition may start; `apply_event` is the only
//! place status, barber and slot fields change, both live and during replay.

use crate::model::*;

use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Assign,
    Unassign,
    CustomerCancel,
    Reschedule,
    Complete,
    Lapse,
}

impl Transition {
    pub fn name(self) -> &'static str {
        match self {
            Transition::Assign => "assign",
            Transition::Unassign => "unassign",
            Transition::CustomerCancel => "cancel",
            Transition::Reschedule => "reschedule",
            Transition::Complete => "complete",
            Transition::Lapse => "expire",
        }
    }
}

pub fn guard(appt: &Appointment, transition: Transition) -> Result<(), EngineError> {
    if appt.status.is_terminal() {
        return Err(EngineError::InvalidState {
            id: appt.id,
            status: appt.status,
            action: transition.name(),
        });
    }
    let ok = match transition {
        Transition::Assign => {
            if appt.status != AppointmentStatus::Pending || appt.barber_id.is_some() {
                return Err(EngineError::AlreadyAssigned(appt.id));
            }
            true
        }
        Transition::Unassign => {
            if appt.status != AppointmentStatus::Assigned || appt.barber_id.is_none() {
                return Err(EngineError::NotAssigned(appt.id));
            }
            true
        }
        Transition::CustomerCancel | Transition::Reschedule => true,
        Transition::Complete => appt.status == AppointmentStatus::Assigned,
        Transition::Lapse => appt.status == AppointmentStatus::Pending,
    };
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidState {
            id: appt.id,
            status: appt.status,
            action: transition.name(),
        })
    }
}

/// Build an appointment from its booking event.
pub fn from_booking(event: &Event) -> Option<Appointment> {
    match event {
        Event::AppointmentBooked {
            id,
            scheduled_at,
            service,
            price_cents,
            customer_id,
            customer_name,
            branch_id,
            booked_at,
        } => Some(Appointment {
            id: *id,
            scheduled_at: *scheduled_at,
            status: AppointmentStatus::Pending,
            service: service.clone(),
            price_cents: *price_cents,
            customer_id: *customer_id,
            customer_name: customer_name.clone(),
            barber_id: None,
            branch_id: *branch_id,
            booked_at: *booked_at,
        }),
        _ => None,
    }
}

/// Apply an event to an appointment and the schedule of the barber it touches
/// (the new barber for `BarberAssigned`, the current one otherwise).
/// No locking: the caller holds both locks.
pub fn apply_event(appt: &mut Appointment, schedule: Option<&mut BarberSchedule>, event: &Event) {
    match event {
        Event::BarberAssigned { barber_id, .. } => {
            appt.barber_id = Some(*barber_id);
            appt.status = AppointmentStatus::Assigned;
            if let Some(s) = schedule {
                s.insert_claim(appt.scheduled_at, appt.id, appt.status);
            }
        }
        Event::BarberUnassigned { .. } => {
            if let Some(s) = schedule {
                s.remove_claim(appt.scheduled_at, appt.id);
            }
            appt.barber_id = None;
            appt.status = AppointmentStatus::Pending;
        }
        Event::AppointmentRescheduled {
            scheduled_at,
            service,
            price_cents,
            ..
        } => {
            if let Some(s) = schedule
                && s.remove_claim(appt.scheduled_at, appt.id).is_some()
            {
                s.insert_claim(*scheduled_at, appt.id, appt.status);
            }
            appt.scheduled_at = *scheduled_at;
            appt.service = service.clone();
            appt.price_cents = *price_cents;
        }
        Event::AppointmentCancelled { .. } => {
            if let Some(s) = schedule {
                s.remove_claim(appt.scheduled_at, appt.id);
            }
            appt.barber_id = None;
            appt.status = AppointmentStatus::Cancelled;
        }
        Event::AppointmentCompleted { .. } => {
            appt.status = AppointmentStatus::Completed;
            if let Some(s) = schedule {
                s.set_status(appt.scheduled_at, appt.id, appt.status);
            }
        }
        Event::AppointmentLapsed { .. } => {
            appt.status = AppointmentStatus::Cancelled;
        }
        Event::AppointmentDeleted { .. } => {
            if let Some(s) = schedule {
                s.remove_claim(appt.scheduled_at, appt.id);
            }
        }
        // Creation is handled at the map level, not here
        Event::AppointmentBooked { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;
    use ulid::Ulid;

    use super::*;

    fn slot() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2025-06-10 14:00", "%Y-%m-%d %H:%M").unwrap()
    }

    fn pending() -> Appointment {
        let booked = Event::AppointmentBooked {
            id: Ulid::new(),
            scheduled_at: slot(),
            service: "Corte".into(),
            price_cents: Some(1200),
            customer_id: 1,
            customer_name: Some("Ana".into()),
            branch_id: None,
            booked_at: slot() - chrono::TimeDelta::days(1),
        };
        from_booking(&booked).unwrap()
    }

    fn with_status(status: AppointmentStatus, barber_id: Option<UserId>) -> Appointment {
        Appointment {
            status,
            barber_id,
            ..pending()
        }
    }

    const ALL: [Transition; 6] = [
        Transition::Assign,
        Transition::Unassign,
        Transition::CustomerCancel,
        Transition::Reschedule,
        Transition::Complete,
        Transition::Lapse,
    ];

    #[test]
    fn booking_starts_pending_and_unassigned() {
        let appt = pending();
        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.barber_id, None);
        assert!(from_booking(&Event::AppointmentCancelled { id: appt.id }).is_none());
    }

    #[test]
    fn assign_requires_unassigned_pending() {
        assert!(guard(&pending(), Transition::Assign).is_ok());
        let assigned = with_status(AppointmentStatus::Assigned, Some(4));
        assert!(matches!(
            guard(&assigned, Transition::Assign),
            Err(EngineError::AlreadyAssigned(_))
        ));
    }

    #[test]
    fn unassign_requires_assigned() {
        assert!(matches!(
            guard(&pending(), Transition::Unassign),
            Err(EngineError::NotAssigned(_))
        ));
        assert!(guard(&with_status(AppointmentStatus::Assigned, Some(4)), Transition::Unassign).is_ok());
    }

    #[test]
    fn sweep_transitions_follow_assignment() {
        let assigned = with_status(AppointmentStatus::Assigned, Some(4));
        assert!(guard(&assigned, Transition::Complete).is_ok());
        assert!(guard(&assigned, Transition::Lapse).is_err());
        assert!(guard(&pending(), Transition::Lapse).is_ok());
        assert!(guard(&pending(), Transition::Complete).is_err());
    }

    #[test]
    fn terminal_states_reject_everything() {
        for status in [AppointmentStatus::Completed, AppointmentStatus::Cancelled] {
            let appt = with_status(status, None);
            for t in ALL {
                let err = guard(&appt, t).unwrap_err();
                assert!(
                    matches!(err, EngineError::InvalidState { status: s, .. } if s == status),
                    "{t:?} on {status} gave {err}"
                );
            }
        }
    }

    #[test]
    fn assign_then_unassign_round_trips_claim() {
        let mut appt = pending();
        let id = appt.id;
        let mut schedule = BarberSchedule::new(4);
        apply_event(&mut appt, Some(&mut schedule), &Event::BarberAssigned { id, barber_id: 4 });
        assert_eq!(appt.status, AppointmentStatus::Assigned);
        assert_eq!(appt.barber_id, Some(4));
        assert_eq!(schedule.claims_at(slot()).len(), 1);

        apply_event(&mut appt, Some(&mut schedule), &Event::BarberUnassigned { id, barber_id: 4 });
        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.barber_id, None);
        assert!(schedule.is_empty());
    }

    #[test]
    fn cancel_clears_barber_and_claim() {
        let mut appt = pending();
        let id = appt.id;
        let mut schedule = BarberSchedule::new(4);
        apply_event(&mut appt, Some(&mut schedule), &Event::BarberAssigned { id, barber_id: 4 });
        apply_event(&mut appt, Some(&mut schedule), &Event::AppointmentCancelled { id });
        assert_eq!(appt.status, AppointmentStatus::Cancelled);
        assert_eq!(appt.barber_id, None);
        assert!(schedule.is_empty());
    }

    #[test]
    fn completion_keeps_barber_and_marks_claim() {
        let mut appt = pending();
        let id = appt.id;
        let mut schedule = BarberSchedule::new(4);
        apply_event(&mut appt, Some(&mut schedule), &Event::BarberAssigned { id, barber_id: 4 });
        apply_event(&mut appt, Some(&mut schedule), &Event::AppointmentCompleted { id });
        assert_eq!(appt.status, AppointmentStatus::Completed);
        assert_eq!(appt.barber_id, Some(4));
        assert_eq!(schedule.claims_at(slot())[0].status, AppointmentStatus::Completed);
    }

    #[test]
    fn reschedule_moves_claim() {
        let mut appt = pending();
        let id = appt.id;
        let mut schedule = BarberSchedule::new(4);
        apply_event(&mut appt, Some(&mut schedule), &Event::BarberAssigned { id, barber_id: 4 });

        let later = slot() + chrono::TimeDelta::hours(2);
        apply_event(
            &mut appt,
            Some(&mut schedule),
            &Event::AppointmentRescheduled {
                id,
                scheduled_at: later,
                service: "Barba".into(),
                price_cents: Some(800),
            },
        );
        assert_eq!(appt.scheduled_at, later);
        assert_eq!(appt.service, "Barba");
        assert!(schedule.claims_at(slot()).is_empty());
        assert_eq!(schedule.claims_at(later).len(), 1);
    }
}
