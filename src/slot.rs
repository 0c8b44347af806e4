//! Slot validation: is a (date, time) pair bookable at all, regardless of
//! which barber takes it. Every function here is pure; "today" is passed in.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};

use crate::config::{Horizon, SchedulingConfig};

/// First violated booking rule, in checking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    PastDate(NaiveDateTime),
    ClosedDay {
        date: NaiveDate,
        weekday: Weekday,
    },
    OutsideHours {
        time: NaiveTime,
        open: NaiveTime,
        close: NaiveTime,
        slot_minutes: u32,
    },
    BeyondHorizon {
        date: NaiveDate,
        last_bookable: NaiveDate,
    },
}

impl fmt::Display for SlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotError::PastDate(at) => write!(
                f,
                "cannot book {} at {}: that slot is in the past",
                at.date(),
                at.format("%H:%M")
            ),
            SlotError::ClosedDay { date, weekday } => {
                write!(f, "cannot book {date}: the salon is closed on {}", weekday_name(*weekday))
            }
            SlotError::OutsideHours {
                time,
                open,
                close,
                slot_minutes,
            } => write!(
                f,
                "cannot book at {}: appointments run from {} to {} every {slot_minutes} minutes",
                time.format("%H:%M"),
                open.format("%H:%M"),
                close.format("%H:%M"),
            ),
            SlotError::BeyondHorizon { date, last_bookable } => write!(
                f,
                "cannot book {date}: bookings are only open until {last_bookable}"
            ),
        }
    }
}

impl std::error::Error for SlotError {}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mondays",
        Weekday::Tue => "Tuesdays",
        Weekday::Wed => "Wednesdays",
        Weekday::Thu => "Thursdays",
        Weekday::Fri => "Fridays",
        Weekday::Sat => "Saturdays",
        Weekday::Sun => "Sundays",
    }
}

/// Day granularity: any time today is not "past" here.
pub fn is_past_date(date: NaiveDate, today: NaiveDate) -> bool {
    date < today
}

pub fn is_closed_day(date: NaiveDate, config: &SchedulingConfig) -> bool {
    config.closed_weekdays.contains(&date.weekday())
}

/// Inside `[open, close]` and on the slot grid that starts at `open`.
pub fn is_valid_hour(time: NaiveTime, config: &SchedulingConfig) -> bool {
    if time < config.open || time > config.close {
        return false;
    }
    if time.second() != 0 || time.nanosecond() != 0 {
        return false;
    }
    let offset = (time - config.open).num_minutes();
    offset % i64::from(config.slot_minutes.max(1)) == 0
}

pub fn is_within_booking_horizon(date: NaiveDate, today: NaiveDate, horizon: Horizon) -> bool {
    date <= horizon.last_bookable_day(today)
}

/// Checks past date, closed day, opening hours, then horizon; the first
/// failing rule is reported.
pub fn validate_slot(
    date: NaiveDate,
    time: NaiveTime,
    config: &SchedulingConfig,
    today: NaiveDate,
) -> Result<(), SlotError> {
    if is_past_date(date, today) {
        return Err(SlotError::PastDate(date.and_time(time)));
    }
    if is_closed_day(date, config) {
        return Err(SlotError::ClosedDay {
            date,
            weekday: date.weekday(),
        });
    }
    if !is_valid_hour(time, config) {
        return Err(SlotError::OutsideHours {
            time,
            open: config.open,
            close: config.close,
            slot_minutes: config.slot_minutes,
        });
    }
    if !is_within_booking_horizon(date, today, config.horizon) {
        return Err(SlotError::BeyondHorizon {
            date,
            last_bookable: config.horizon.last_bookable_day(today),
        });
    }
    Ok(())
}

/// Every time of day on the booking grid, opening to closing inclusive.
pub fn slot_times(config: &SchedulingConfig) -> Vec<NaiveTime> {
    let step = config.slot_minutes.max(1);
    let first = config.open.num_seconds_from_midnight() / 60;
    let last = config.close.num_seconds_from_midnight() / 60;
    (first..=last)
        .step_by(step as usize)
        .filter_map(|m| NaiveTime::from_hms_opt(m / 60, m % 60, 0))
        .collect()
}
