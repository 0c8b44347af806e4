use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Opaque reference to a customer or barber. Identity lives outside the engine.
pub type UserId = u64;

/// Opaque reference to a physical salon location.
pub type BranchId = u64;

/// Closed set of appointment statuses. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Assigned,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Assigned => "Assigned",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single booking. `scheduled_at` is local wall-clock time of the salon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub scheduled_at: NaiveDateTime,
    pub status: AppointmentStatus,
    pub service: String,
    /// Price captured at booking time, never re-derived from the catalog.
    pub price_cents: Option<u64>,
    pub customer_id: UserId,
    pub customer_name: Option<String>,
    pub barber_id: Option<UserId>,
    pub branch_id: Option<BranchId>,
    pub booked_at: NaiveDateTime,
}

impl Appointment {
    pub fn date(&self) -> NaiveDate {
        self.scheduled_at.date()
    }

    pub fn time(&self) -> NaiveTime {
        self.scheduled_at.time()
    }
}

/// A barber's hold on a slot, tagged with the owning appointment's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub appointment_id: Ulid,
    pub status: AppointmentStatus,
}

/// Per-barber index of claimed slots. Guarded by its own lock so that the
/// conflict check and the assignment write happen under one critical section.
#[derive(Debug, Clone)]
pub struct BarberSchedule {
    pub barber_id: UserId,
    claims: BTreeMap<NaiveDateTime, Vec<Claim>>,
}

impl BarberSchedule {
    pub fn new(barber_id: UserId) -> Self {
        Self {
            barber_id,
            claims: BTreeMap::new(),
        }
    }

    pub fn insert_claim(&mut self, at: NaiveDateTime, appointment_id: Ulid, status: AppointmentStatus) {
        let slot = self.claims.entry(at).or_default();
        slot.retain(|c| c.appointment_id != appointment_id);
        slot.push(Claim { appointment_id, status });
    }

    pub fn remove_claim(&mut self, at: NaiveDateTime, appointment_id: Ulid) -> Option<Claim> {
        let slot = self.claims.get_mut(&at)?;
        let pos = slot.iter().position(|c| c.appointment_id == appointment_id)?;
        let claim = slot.remove(pos);
        if slot.is_empty() {
            self.claims.remove(&at);
        }
        Some(claim)
    }

    pub fn set_status(&mut self, at: NaiveDateTime, appointment_id: Ulid, status: AppointmentStatus) {
        if let Some(claim) = self
            .claims
            .get_mut(&at)
            .and_then(|slot| slot.iter_mut().find(|c| c.appointment_id == appointment_id))
        {
            claim.status = status;
        }
    }

    pub fn claims_at(&self, at: NaiveDateTime) -> &[Claim] {
        self.claims.get(&at).map_or(&[], Vec::as_slice)
    }

    /// Claims whose slot falls on `date`, in slot order.
    pub fn claims_on(&self, date: NaiveDate) -> impl Iterator<Item = (NaiveDateTime, &Claim)> {
        let start = date.and_time(NaiveTime::MIN);
        let end = date
            .succ_opt()
            .map_or(NaiveDateTime::MAX, |next| next.and_time(NaiveTime::MIN));
        self.claims
            .range(start..end)
            .flat_map(|(at, slot)| slot.iter().map(move |c| (*at, c)))
    }

    pub fn len(&self) -> usize {
        self.claims.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Input for a new booking, already parsed by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub service: String,
    pub price_cents: Option<u64>,
    pub customer_id: UserId,
    pub customer_name: Option<String>,
    /// Book straight onto this barber's schedule.
    pub barber_id: Option<UserId>,
    pub branch_id: Option<BranchId>,
}

/// Partial update for a reschedule. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentChanges {
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub service: Option<String>,
    pub price_cents: Option<u64>,
}

impl AppointmentChanges {
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.time.is_none() && self.service.is_none() && self.price_cents.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentFilter {
    All,
    Unassigned,
    Customer(UserId),
    Barber(UserId),
}

impl AppointmentFilter {
    pub fn matches(&self, appt: &Appointment) -> bool {
        match self {
            Self::All => true,
            Self::Unassigned => appt.barber_id.is_none() && appt.status == AppointmentStatus::Pending,
            Self::Customer(id) => appt.customer_id == *id,
            Self::Barber(id) => appt.barber_id == Some(*id),
        }
    }
}

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub completed: usize,
    pub cancelled: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.completed + self.cancelled
    }
}

/// The event types: flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AppointmentBooked {
        id: Ulid,
        scheduled_at: NaiveDateTime,
        service: String,
        price_cents: Option<u64>,
        customer_id: UserId,
        customer_name: Option<String>,
        branch_id: Option<BranchId>,
        booked_at: NaiveDateTime,
    },
    BarberAssigned {
        id: Ulid,
        barber_id: UserId,
    },
    BarberUnassigned {
        id: Ulid,
        barber_id: UserId,
    },
    AppointmentRescheduled {
        id: Ulid,
        scheduled_at: NaiveDateTime,
        service: String,
        price_cents: Option<u64>,
    },
    /// Cancelled on request, from `Pending` or `Assigned`.
    AppointmentCancelled {
        id: Ulid,
    },
    /// Swept: an assigned appointment whose time has passed.
    AppointmentCompleted {
        id: Ulid,
    },
    /// Swept: a pending appointment nobody claimed before its time passed.
    AppointmentLapsed {
        id: Ulid,
    },
    AppointmentDeleted {
        id: Ulid,
    },
}

impl Event {
    pub fn appointment_id(&self) -> Ulid {
        match self {
            Event::AppointmentBooked { id, .. }
            | Event::BarberAssigned { id, .. }
            | Event::BarberUnassigned { id, .. }
            | Event::AppointmentRescheduled { id, .. }
            | Event::AppointmentCancelled { id }
            | Event::AppointmentCompleted { id }
            | Event::AppointmentLapsed { id }
            | Event::AppointmentDeleted { id } => *id,
        }
    }
}
