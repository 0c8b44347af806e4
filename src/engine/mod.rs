mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;

pub use conflict::slot_taken;
pub use error::{EngineError, ErrorKind};
pub use lifecycle::Transition;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::SchedulingConfig;
use crate::model::*;
use crate::wal::{Wal, WalWriter};

pub type SharedAppointment = Arc<RwLock<Appointment>>;
pub type SharedSchedule = Arc<RwLock<BarberSchedule>>;

pub struct Engine {
    appointments: DashMap<Ulid, SharedAppointment>,
    schedules: DashMap<UserId, SharedSchedule>,
    /// Appointments not yet `Completed` or `Cancelled`; what `MAX_APPOINTMENTS` caps.
    open: AtomicUsize,
    wal: WalWriter,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss an in-flight event.
    wal_gate: RwLock<()>,
    config: SchedulingConfig,
    clock: Arc<dyn Clock>,
}

/// An appointment write-locked together with the schedule of its current
/// barber (if any). Fields drop in order: schedule, appointment, gate.
pub(super) struct LockedAppointment<'a> {
    pub schedule: Option<OwnedRwLockWriteGuard<BarberSchedule>>,
    pub appointment: OwnedRwLockWriteGuard<Appointment>,
    _gate: RwLockReadGuard<'a, ()>,
}

impl Engine {
    /// Replay the WAL at `wal_path`, then start its group-commit writer.
    /// Must be called inside a Tokio runtime.
    pub fn new(wal_path: PathBuf, config: SchedulingConfig, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let (events, wal) = Wal::recover(&wal_path)?;
        let wal = WalWriter::spawn(wal);

        let engine = Self {
            appointments: DashMap::new(),
            schedules: DashMap::new(),
            open: AtomicUsize::new(0),
            wal,
            wal_gate: RwLock::new(()),
            config,
            clock,
        };

        for event in &events {
            engine.replay_event(event);
        }
        let open = engine
            .appointments
            .iter()
            .filter(|e| e.value().try_read().is_ok_and(|a| !a.status.is_terminal()))
            .count();
        engine.open.store(open, Ordering::Relaxed);
        engine.record_open();
        tracing::info!(
            events = events.len(),
            appointments = engine.appointments.len(),
            open,
            "engine state restored from WAL"
        );
        Ok(engine)
    }

    /// Nothing else holds these Arcs during replay, so `try_write` never fails.
    fn replay_event(&self, event: &Event) {
        if let Some(appt) = lifecycle::from_booking(event) {
            self.appointments.insert(appt.id, Arc::new(RwLock::new(appt)));
            return;
        }
        let id = event.appointment_id();
        let Some(shared) = self.get_appointment(id) else {
            tracing::warn!(%id, "WAL event for unknown appointment skipped");
            return;
        };
        let Ok(mut appt) = shared.try_write() else {
            return;
        };
        let barber_id = match event {
            Event::BarberAssigned { barber_id, .. } => Some(*barber_id),
            _ => appt.barber_id,
        };
        let schedule = barber_id.map(|b| self.schedule(b));
        let mut schedule_guard = schedule.as_ref().and_then(|s| s.try_write().ok());
        lifecycle::apply_event(&mut appt, schedule_guard.as_deref_mut(), event);
        if matches!(event, Event::AppointmentDeleted { .. }) {
            self.appointments.remove(&id);
        }
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append_all(vec![event.clone()]).await
    }

    /// Append events as one commit: all of them reach the same fsync.
    pub(super) async fn wal_append_all(&self, events: Vec<Event>) -> Result<(), EngineError> {
        self.wal
            .append_all(events)
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn open_count(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }

    pub(super) fn open_added(&self) {
        self.open.fetch_add(1, Ordering::Relaxed);
        self.record_open();
    }

    /// Callers only report appointments that were open, so this never underflows.
    pub(super) fn open_closed(&self) {
        self.open.fetch_sub(1, Ordering::Relaxed);
        self.record_open();
    }

    fn record_open(&self) {
        metrics::gauge!(crate::observability::APPOINTMENTS_ACTIVE).set(self.open_count() as f64);
    }

    pub fn get_appointment(&self, id: Ulid) -> Option<SharedAppointment> {
        self.appointments.get(&id).map(|e| e.value().clone())
    }

    pub fn get_schedule(&self, barber_id: UserId) -> Option<SharedSchedule> {
        self.schedules.get(&barber_id).map(|e| e.value().clone())
    }

    /// The barber's schedule, created empty on first use.
    pub(super) fn schedule(&self, barber_id: UserId) -> SharedSchedule {
        self.schedules
            .entry(barber_id)
            .or_insert_with(|| Arc::new(RwLock::new(BarberSchedule::new(barber_id))))
            .value()
            .clone()
    }

    /// WAL-append then apply. Nothing changes in memory if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        appt: &mut Appointment,
        schedule: Option<&mut BarberSchedule>,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        let was_open = !appt.status.is_terminal();
        lifecycle::apply_event(appt, schedule, event);
        if was_open && appt.status.is_terminal() {
            self.open_closed();
        }
        Ok(())
    }

    pub(super) async fn enter_mutation(&self) -> RwLockReadGuard<'_, ()> {
        self.wal_gate.read().await
    }

    /// Write-lock an appointment and its current barber's schedule, in
    /// schedule-then-appointment order. Retries if the barber changed between
    /// reading it and taking the locks.
    pub(super) async fn lock_appointment(&self, id: Ulid) -> Result<LockedAppointment<'_>, EngineError> {
        let gate = self.enter_mutation().await;
        loop {
            let shared = self.get_appointment(id).ok_or(EngineError::NotFound(id))?;
            let barber_id = shared.read().await.barber_id;

            let schedule = match barber_id {
                Some(b) => Some(self.schedule(b).write_owned().await),
                None => None,
            };
            let appointment = shared.write_owned().await;

            // Deleted while we waited for the lock.
            if !self.appointments.contains_key(&id) {
                return Err(EngineError::NotFound(id));
            }
            if appointment.barber_id == barber_id {
                return Ok(LockedAppointment {
                    schedule,
                    appointment,
                    _gate: gate,
                });
            }
        }
    }
}
