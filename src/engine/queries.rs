use chrono::{Datelike, NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;
use crate::slot::{self, SlotError};

use super::conflict::slot_taken;
use super::{Engine, EngineError};

impl Engine {
    pub async fn find(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let shared = self.get_appointment(id).ok_or(EngineError::NotFound(id))?;
        let appt = shared.read().await;
        Ok(appt.clone())
    }

    /// Matching appointments ordered by slot, then id.
    pub async fn list(&self, filter: AppointmentFilter) -> Vec<Appointment> {
        let shared: Vec<super::SharedAppointment> =
            self.appointments.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for appt in shared {
            let appt = appt.read().await;
            if filter.matches(&appt) {
                out.push(appt.clone());
            }
        }
        out.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Bookable times on `date`: the slot grid minus times already gone and,
    /// with a barber, minus the slots that barber has taken. A date the
    /// validator rejects outright is an error.
    pub async fn available_slots(
        &self,
        date: NaiveDate,
        barber_id: Option<UserId>,
    ) -> Result<Vec<NaiveTime>, EngineError> {
        let today = self.today();
        if slot::is_past_date(date, today) {
            return Err(SlotError::PastDate(date.and_time(self.config.open)).into());
        }
        if slot::is_closed_day(date, &self.config) {
            return Err(SlotError::ClosedDay {
                date,
                weekday: date.weekday(),
            }
            .into());
        }
        if !slot::is_within_booking_horizon(date, today, self.config.horizon) {
            return Err(SlotError::BeyondHorizon {
                date,
                last_bookable: self.config.horizon.last_bookable_day(today),
            }
            .into());
        }

        let now = self.now();
        let mut times: Vec<NaiveTime> = slot::slot_times(&self.config)
            .into_iter()
            .filter(|t| date.and_time(*t) > now)
            .collect();

        if let Some(schedule) = barber_id.and_then(|b| self.get_schedule(b)) {
            let schedule = schedule.read().await;
            let blocks = self.config.completed_blocks_slot;
            times.retain(|t| !slot_taken(&schedule, date.and_time(*t), None, blocks));
        }
        Ok(times)
    }

    pub fn appointment_count(&self) -> usize {
        self.appointments.len()
    }
}
