use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::slot::{validate_slot, SlotError};

use super::conflict::check_no_conflict;
use super::lifecycle::{self, Transition};
use super::{Engine, EngineError};

/// The booking event that recreates `appt` as it was first stored.
pub(super) fn booking_event(appt: &Appointment) -> Event {
    Event::AppointmentBooked {
        id: appt.id,
        scheduled_at: appt.scheduled_at,
        service: appt.service.clone(),
        price_cents: appt.price_cents,
        customer_id: appt.customer_id,
        customer_name: appt.customer_name.clone(),
        branch_id: appt.branch_id,
        booked_at: appt.booked_at,
    }
}

fn check_service(service: &str) -> Result<(), EngineError> {
    if service.trim().is_empty() {
        return Err(EngineError::MissingField("service"));
    }
    if service.len() > MAX_SERVICE_LEN {
        return Err(EngineError::LimitExceeded("service name too long"));
    }
    Ok(())
}

impl Engine {
    /// Slot rules plus the same-day check: a slot earlier today is past too.
    fn check_bookable(&self, date: NaiveDate, time: NaiveTime) -> Result<NaiveDateTime, EngineError> {
        validate_slot(date, time, &self.config, self.today())?;
        let at = date.and_time(time);
        if at <= self.now() {
            return Err(SlotError::PastDate(at).into());
        }
        Ok(at)
    }

    /// Create a `Pending` appointment. With `barber_id` set, the booking is
    /// assigned in the same critical section, so it fails if the barber is taken.
    pub async fn book(&self, new: NewAppointment) -> Result<Appointment, EngineError> {
        check_service(&new.service)?;
        if new
            .customer_name
            .as_ref()
            .is_some_and(|n| n.len() > MAX_CUSTOMER_NAME_LEN)
        {
            return Err(EngineError::LimitExceeded("customer name too long"));
        }
        let scheduled_at = self.check_bookable(new.date, new.time)?;
        if self.open_count() >= MAX_APPOINTMENTS {
            return Err(EngineError::LimitExceeded("too many open appointments"));
        }

        let _gate = self.enter_mutation().await;
        let mut schedule = match new.barber_id {
            Some(b) => Some(self.schedule(b).write_owned().await),
            None => None,
        };
        if let Some(s) = schedule.as_deref() {
            check_no_conflict(s, scheduled_at, None, self.config.completed_blocks_slot)?;
        }

        let mut appt = Appointment {
            id: Ulid::new(),
            scheduled_at,
            status: AppointmentStatus::Pending,
            service: new.service,
            price_cents: new.price_cents,
            customer_id: new.customer_id,
            customer_name: new.customer_name,
            barber_id: None,
            branch_id: new.branch_id,
            booked_at: self.now(),
        };
        // Booking and assignment share one commit: either both are stored or neither.
        let assignment = new
            .barber_id
            .map(|barber_id| Event::BarberAssigned { id: appt.id, barber_id });
        let mut events = vec![booking_event(&appt)];
        events.extend(assignment.clone());
        self.wal_append_all(events).await?;

        if let Some(event) = &assignment {
            lifecycle::apply_event(&mut appt, schedule.as_deref_mut(), event);
        }
        self.appointments
            .insert(appt.id, Arc::new(RwLock::new(appt.clone())));
        self.open_added();
        metrics::counter!(crate::observability::APPOINTMENTS_BOOKED_TOTAL).increment(1);

        if let Some(barber_id) = appt.barber_id {
            metrics::counter!(crate::observability::ASSIGNMENTS_TOTAL).increment(1);
            tracing::info!(id = %appt.id, barber_id, at = %appt.scheduled_at, "appointment booked and assigned");
        } else {
            tracing::info!(id = %appt.id, at = %appt.scheduled_at, "appointment booked");
        }
        Ok(appt)
    }

    /// Claim a pending appointment for `barber_id`. The conflict check and
    /// the write happen under the barber's schedule lock.
    pub async fn assign(&self, id: Ulid, barber_id: UserId) -> Result<Appointment, EngineError> {
        let _gate = self.enter_mutation().await;
        let shared = self.get_appointment(id).ok_or(EngineError::NotFound(id))?;
        let mut schedule = self.schedule(barber_id).write_owned().await;
        let mut appt = shared.write_owned().await;
        if !self.appointments.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        // The locked schedule is the appointment's own only if it is unassigned
        // or already held by `barber_id`.
        if appt.barber_id.is_none_or(|b| b == barber_id) {
            self.settle_if_overdue(&mut appt, Some(&mut schedule), Transition::Assign)
                .await?;
        }

        lifecycle::guard(&appt, Transition::Assign)?;
        check_no_conflict(&schedule, appt.scheduled_at, Some(id), self.config.completed_blocks_slot)?;

        let event = Event::BarberAssigned { id, barber_id };
        self.persist_and_apply(&mut appt, Some(&mut schedule), &event).await?;
        metrics::counter!(crate::observability::ASSIGNMENTS_TOTAL).increment(1);
        tracing::info!(%id, barber_id, "barber assigned");
        Ok(appt.clone())
    }

    /// Staff cancel: release the barber and return the appointment to the pool.
    pub async fn unassign(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let mut locked = self.lock_appointment(id).await?;
        self.settle_if_overdue(&mut locked.appointment, locked.schedule.as_deref_mut(), Transition::Unassign)
            .await?;
        lifecycle::guard(&locked.appointment, Transition::Unassign)?;
        let Some(barber_id) = locked.appointment.barber_id else {
            return Err(EngineError::NotAssigned(id));
        };

        let event = Event::BarberUnassigned { id, barber_id };
        self.persist_and_apply(&mut locked.appointment, locked.schedule.as_deref_mut(), &event)
            .await?;
        tracing::info!(%id, barber_id, "barber unassigned");
        Ok(locked.appointment.clone())
    }

    /// Customer cancel: terminal, frees the barber's slot.
    pub async fn customer_cancel(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let mut locked = self.lock_appointment(id).await?;
        self.settle_if_overdue(
            &mut locked.appointment,
            locked.schedule.as_deref_mut(),
            Transition::CustomerCancel,
        )
        .await?;
        lifecycle::guard(&locked.appointment, Transition::CustomerCancel)?;

        let event = Event::AppointmentCancelled { id };
        self.persist_and_apply(&mut locked.appointment, locked.schedule.as_deref_mut(), &event)
            .await?;
        tracing::info!(%id, "appointment cancelled by customer");
        Ok(locked.appointment.clone())
    }

    /// Move an appointment and/or change its service. A moved slot is
    /// validated like a new booking and must be free for the assigned barber.
    pub async fn reschedule(&self, id: Ulid, changes: AppointmentChanges) -> Result<Appointment, EngineError> {
        if let Some(service) = &changes.service {
            check_service(service)?;
        }
        let mut locked = self.lock_appointment(id).await?;
        if changes.is_empty() {
            return Ok(locked.appointment.clone());
        }
        self.settle_if_overdue(&mut locked.appointment, locked.schedule.as_deref_mut(), Transition::Reschedule)
            .await?;
        lifecycle::guard(&locked.appointment, Transition::Reschedule)?;

        let current = locked.appointment.scheduled_at;
        let date = changes.date.unwrap_or(current.date());
        let time = changes.time.unwrap_or(current.time());
        let mut scheduled_at = current;
        if date.and_time(time) != current {
            scheduled_at = self.check_bookable(date, time)?;
            if let Some(s) = locked.schedule.as_deref() {
                check_no_conflict(s, scheduled_at, Some(id), self.config.completed_blocks_slot)?;
            }
        }

        let event = Event::AppointmentRescheduled {
            id,
            scheduled_at,
            service: changes.service.unwrap_or_else(|| locked.appointment.service.clone()),
            price_cents: changes.price_cents.or(locked.appointment.price_cents),
        };
        self.persist_and_apply(&mut locked.appointment, locked.schedule.as_deref_mut(), &event)
            .await?;
        tracing::info!(%id, from = %current, to = %scheduled_at, "appointment rescheduled");
        Ok(locked.appointment.clone())
    }

    /// Hard delete, whatever the status.
    pub async fn delete(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let mut locked = self.lock_appointment(id).await?;
        let event = Event::AppointmentDeleted { id };
        self.persist_and_apply(&mut locked.appointment, locked.schedule.as_deref_mut(), &event)
            .await?;
        self.appointments.remove(&id);
        if !locked.appointment.status.is_terminal() {
            self.open_closed();
        }
        tracing::info!(%id, "appointment deleted");
        Ok(locked.appointment.clone())
    }

    /// Ids of non-terminal appointments whose slot is strictly before `now`.
    pub async fn collect_expired(&self, now: NaiveDateTime) -> Vec<Ulid> {
        let candidates: Vec<(Ulid, super::SharedAppointment)> = self
            .appointments
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let mut expired = Vec::new();
        for (id, shared) in candidates {
            let appt = shared.read().await;
            if !appt.status.is_terminal() && appt.scheduled_at < now {
                expired.push(id);
            }
        }
        expired
    }

    /// Move one overdue appointment to its terminal state: `Assigned` completes,
    /// `Pending` is cancelled. `Ok(None)` if it is not overdue (any more).
    pub async fn expire(&self, id: Ulid, now: NaiveDateTime) -> Result<Option<AppointmentStatus>, EngineError> {
        let mut locked = self.lock_appointment(id).await?;
        if locked.appointment.status.is_terminal() || locked.appointment.scheduled_at >= now {
            return Ok(None);
        }
        let status = self
            .settle(&mut locked.appointment, locked.schedule.as_deref_mut())
            .await?;
        Ok(Some(status))
    }

    /// Apply the terminal event for an overdue appointment: `Assigned`
    /// completes, `Pending` is cancelled. The caller holds both locks.
    async fn settle(
        &self,
        appt: &mut Appointment,
        schedule: Option<&mut BarberSchedule>,
    ) -> Result<AppointmentStatus, EngineError> {
        let id = appt.id;
        let event = match appt.status {
            AppointmentStatus::Assigned => {
                lifecycle::guard(appt, Transition::Complete)?;
                Event::AppointmentCompleted { id }
            }
            _ => {
                lifecycle::guard(appt, Transition::Lapse)?;
                Event::AppointmentLapsed { id }
            }
        };
        self.persist_and_apply(appt, schedule, &event).await?;
        let status = appt.status;
        metrics::counter!(crate::observability::SWEEP_TRANSITIONS_TOTAL, "to" => status.as_str()).increment(1);
        Ok(status)
    }

    /// An appointment whose slot has passed is settled the way the sweep
    /// would settle it, and `transition` is refused against the result.
    async fn settle_if_overdue(
        &self,
        appt: &mut Appointment,
        schedule: Option<&mut BarberSchedule>,
        transition: Transition,
    ) -> Result<(), EngineError> {
        if appt.status.is_terminal() || appt.scheduled_at >= self.now() {
            return Ok(());
        }
        let status = self.settle(appt, schedule).await?;
        tracing::info!(id = %appt.id, %status, action = transition.name(), "overdue appointment settled before change");
        Err(EngineError::InvalidState {
            id: appt.id,
            status,
            action: transition.name(),
        })
    }

    /// Expire every overdue appointment. Running it twice with the same `now`
    /// changes nothing the second time.
    pub async fn sweep_expired(&self, now: NaiveDateTime) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();
        for id in self.collect_expired(now).await {
            match self.expire(id, now).await {
                Ok(Some(AppointmentStatus::Completed)) => report.completed += 1,
                Ok(Some(_)) => report.cancelled += 1,
                Ok(None) | Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if report.total() > 0 {
            tracing::info!(
                completed = report.completed,
                cancelled = report.cancelled,
                "swept overdue appointments"
            );
        }
        Ok(report)
    }

    /// Sweep against the engine clock.
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        self.sweep_expired(self.now()).await
    }

    /// Rewrite the WAL as the minimal event sequence that rebuilds current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.wal_gate.write().await;

        let mut shared: Vec<(Ulid, super::SharedAppointment)> = self
            .appointments
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        shared.sort_by_key(|(id, _)| *id);

        let mut events = Vec::with_capacity(shared.len());
        for (id, appt) in shared {
            let appt = appt.read().await;
            events.push(booking_event(&appt));
            if let Some(barber_id) = appt.barber_id {
                events.push(Event::BarberAssigned { id, barber_id });
            }
            match appt.status {
                AppointmentStatus::Completed => events.push(Event::AppointmentCompleted { id }),
                AppointmentStatus::Cancelled => events.push(Event::AppointmentCancelled { id }),
                AppointmentStatus::Pending | AppointmentStatus::Assigned => {}
            }
        }

        let count = events.len();
        self.wal
            .compact(events)
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}
