use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::{AppointmentStatus, UserId};
use crate::slot::SlotError;

/// Broad class of an engine failure, used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    State,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    MissingField(&'static str),
    InvalidSlot(SlotError),
    AlreadyAssigned(Ulid),
    SlotConflict {
        barber_id: UserId,
        at: NaiveDateTime,
    },
    NotAssigned(Ulid),
    InvalidState {
        id: Ulid,
        status: AppointmentStatus,
        action: &'static str,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MissingField(_) | EngineError::InvalidSlot(_) | EngineError::LimitExceeded(_) => {
                ErrorKind::Validation
            }
            EngineError::SlotConflict { .. } => ErrorKind::Conflict,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyAssigned(_) | EngineError::NotAssigned(_) | EngineError::InvalidState { .. } => {
                ErrorKind::State
            }
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl From<SlotError> for EngineError {
    fn from(e: SlotError) -> Self {
        EngineError::InvalidSlot(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "appointment not found: {id}"),
            EngineError::MissingField(field) => write!(f, "missing required field: {field}"),
            EngineError::InvalidSlot(e) => write!(f, "{e}"),
            EngineError::AlreadyAssigned(id) => {
                write!(f, "appointment {id} is already assigned or no longer available")
            }
            EngineError::SlotConflict { barber_id, at } => write!(
                f,
                "barber {barber_id} already has an appointment on {} at {}",
                at.date(),
                at.format("%H:%M")
            ),
            EngineError::NotAssigned(id) => write!(f, "appointment {id} is not assigned"),
            EngineError::InvalidState { id, status, action } => {
                write!(f, "cannot {action} appointment {id}: it is already {status}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::InvalidSlot(e) => Some(e),
            _ => None,
        }
    }
}
