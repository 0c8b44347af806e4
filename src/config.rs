use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Timelike, Weekday};

/// How far ahead a booking may be made, counted from today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    Days(u32),
    Months(u32),
}

impl Horizon {
    /// Last calendar day that is still bookable.
    pub fn last_bookable_day(self, today: NaiveDate) -> NaiveDate {
        let last = match self {
            Horizon::Days(n) => today.checked_add_days(chrono::Days::new(u64::from(n))),
            Horizon::Months(n) => today.checked_add_months(chrono::Months::new(n)),
        };
        last.unwrap_or(NaiveDate::MAX)
    }
}

impl FromStr for Horizon {
    type Err = &'static str;

    /// `30d`, `30` (days) or `1m` (calendar months).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let (digits, unit) = match s.strip_suffix('m') {
            Some(d) => (d, 'm'),
            None => (s.strip_suffix('d').unwrap_or(s.as_str()), 'd'),
        };
        let n: u32 = digits.parse().map_err(|_| "expected <n>d or <n>m")?;
        Ok(if unit == 'm' { Horizon::Months(n) } else { Horizon::Days(n) })
    }
}

/// Business rules the slot validator and conflict checker run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingConfig {
    /// First bookable slot of the day.
    pub open: NaiveTime,
    /// Last bookable slot of the day (inclusive).
    pub close: NaiveTime,
    pub slot_minutes: u32,
    pub closed_weekdays: HashSet<Weekday>,
    pub horizon: Horizon,
    /// Whether a `Completed` appointment keeps its slot blocked for the barber.
    pub completed_blocks_slot: bool,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(19, 0, 0).unwrap_or(NaiveTime::MIN),
            slot_minutes: 30,
            closed_weekdays: HashSet::from([Weekday::Sun]),
            horizon: Horizon::Months(1),
            completed_blocks_slot: true,
        }
    }
}

impl SchedulingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env_var)
    }

    /// Build from `SALONBOOK_*` settings looked up through `var`.
    pub fn from_vars(var: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            open: setting(var, "SALONBOOK_OPEN", defaults.open, parse_clock_time)?,
            close: setting(var, "SALONBOOK_CLOSE", defaults.close, parse_clock_time)?,
            slot_minutes: setting(var, "SALONBOOK_SLOT_MINUTES", defaults.slot_minutes, |s| {
                s.trim().parse().map_err(|_| "expected a whole number of minutes")
            })?,
            closed_weekdays: setting(var, "SALONBOOK_CLOSED_DAYS", defaults.closed_weekdays, parse_weekdays)?,
            horizon: setting(var, "SALONBOOK_HORIZON", defaults.horizon, |s| s.parse())?,
            completed_blocks_slot: setting(
                var,
                "SALONBOOK_COMPLETED_BLOCKS_SLOT",
                defaults.completed_blocks_slot,
                parse_bool,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_minutes == 0 || self.slot_minutes > 24 * 60 {
            return Err(ConfigError::new(
                "SALONBOOK_SLOT_MINUTES",
                self.slot_minutes.to_string(),
                "must be between 1 and 1440",
            ));
        }
        if self.open >= self.close {
            return Err(ConfigError::new(
                "SALONBOOK_CLOSE",
                self.close.format("%H:%M").to_string(),
                "closing time must be after opening time",
            ));
        }
        for (key, time) in [("SALONBOOK_OPEN", self.open), ("SALONBOOK_CLOSE", self.close)] {
            if time.second() != 0 {
                return Err(ConfigError::new(key, time.to_string(), "opening hours must be whole minutes"));
            }
        }
        if self.closed_weekdays.len() == 7 {
            return Err(ConfigError::new("SALONBOOK_CLOSED_DAYS", "all".into(), "salon would never open"));
        }
        Ok(())
    }
}

/// Process-level settings: listeners, storage, background tasks.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    /// Run the expiry sweep before serving list/find reads.
    pub sweep_on_read: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env_var)
    }

    /// Unset keys take their defaults; a set but malformed key is an error.
    pub fn from_vars(var: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let sweep_secs = setting(var, "SALONBOOK_SWEEP_INTERVAL_SECS", 60, |s| match s.trim().parse::<u64>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err("expected a positive number of seconds"),
        })?;
        Ok(Self {
            bind: var("SALONBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: setting(var, "SALONBOOK_PORT", 3000, parse_port)?,
            data_dir: PathBuf::from(var("SALONBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            metrics_port: setting(var, "SALONBOOK_METRICS_PORT", None, |s| parse_port(s).map(Some))?,
            compact_threshold: setting(var, "SALONBOOK_COMPACT_THRESHOLD", 1000, |s| {
                s.trim().parse().map_err(|_| "expected a whole number of appends")
            })?,
            sweep_interval: Duration::from_secs(sweep_secs),
            sweep_on_read: setting(var, "SALONBOOK_SWEEP_ON_READ", true, parse_bool)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl ConfigError {
    fn new(key: &'static str, value: String, reason: &'static str) -> Self {
        Self { key, value, reason }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}={:?}: {}", self.key, self.value, self.reason)
    }
}

impl std::error::Error for ConfigError {}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn setting<T>(
    var: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
    parse: impl FnOnce(&str) -> Result<T, &'static str>,
) -> Result<T, ConfigError> {
    match var(key) {
        Some(raw) => parse(&raw).map_err(|reason| ConfigError::new(key, raw, reason)),
        None => Ok(default),
    }
}

fn parse_port(s: &str) -> Result<u16, &'static str> {
    s.trim().parse().map_err(|_| "expected a port number")
}

/// `HH:MM` or `HH:MM:SS`.
pub fn parse_clock_time(s: &str) -> Result<NaiveTime, &'static str> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| "expected HH:MM")
}

/// Comma-separated weekdays: names (`sun`, `Saturday`) or numbers with 0 = Sunday.
/// An empty string means open every day.
pub fn parse_weekdays(s: &str) -> Result<HashSet<Weekday>, &'static str> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.parse::<u8>() {
            Ok(n) => weekday_from_sunday_index(n).ok_or("weekday numbers run 0 (Sunday) to 6 (Saturday)"),
            Err(_) => part.parse::<Weekday>().map_err(|_| "unknown weekday name"),
        })
        .collect()
}

fn weekday_from_sunday_index(n: u8) -> Option<Weekday> {
    match n {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

fn parse_bool(s: &str) -> Result<bool, &'static str> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err("expected true or false"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn horizon_parsing() {
        assert_eq!("30d".parse::<Horizon>(), Ok(Horizon::Days(30)));
        assert_eq!("14".parse::<Horizon>(), Ok(Horizon::Days(14)));
        assert_eq!("1m".parse::<Horizon>(), Ok(Horizon::Months(1)));
        assert_eq!(" 2M ".parse::<Horizon>(), Ok(Horizon::Months(2)));
        assert!("soon".parse::<Horizon>().is_err());
        assert!("m".parse::<Horizon>().is_err());
    }

    #[test]
    fn month_horizon_clamps_to_month_end() {
        assert_eq!(Horizon::Months(1).last_bookable_day(day(2025, 1, 31)), day(2025, 2, 28));
        assert_eq!(Horizon::Months(1).last_bookable_day(day(2025, 6, 9)), day(2025, 7, 9));
        assert_eq!(Horizon::Days(7).last_bookable_day(day(2025, 6, 9)), day(2025, 6, 16));
    }

    #[test]
    fn weekday_lists() {
        assert_eq!(parse_weekdays("sun"), Ok(HashSet::from([Weekday::Sun])));
        assert_eq!(parse_weekdays("0, 6"), Ok(HashSet::from([Weekday::Sun, Weekday::Sat])));
        assert_eq!(parse_weekdays("Saturday,monday"), Ok(HashSet::from([Weekday::Sat, Weekday::Mon])));
        assert_eq!(parse_weekdays(""), Ok(HashSet::new()));
        assert!(parse_weekdays("7").is_err());
        assert!(parse_weekdays("funday").is_err());
    }

    #[test]
    fn clock_times() {
        assert_eq!(parse_clock_time("08:00"), Ok(NaiveTime::from_hms_opt(8, 0, 0).unwrap()));
        assert_eq!(parse_clock_time("19:30:00"), Ok(NaiveTime::from_hms_opt(19, 30, 0).unwrap()));
        assert!(parse_clock_time("7pm").is_err());
    }

    #[test]
    fn defaults_are_valid() {
        let config = SchedulingConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.closed_weekdays.contains(&Weekday::Sun));
        assert_eq!(config.horizon, Horizon::Months(1));
    }

    #[test]
    fn validate_rejects_inverted_hours() {
        let config = SchedulingConfig {
            open: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            close: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            ..SchedulingConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.key, "SALONBOOK_CLOSE");
    }

    #[test]
    fn validate_rejects_zero_slot() {
        let config = SchedulingConfig {
            slot_minutes: 0,
            ..SchedulingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_always_closed() {
        let config = SchedulingConfig {
            closed_weekdays: parse_weekdays("0,1,2,3,4,5,6").unwrap(),
            ..SchedulingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_names_the_time_with_seconds() {
        let config = SchedulingConfig {
            close: NaiveTime::from_hms_opt(19, 0, 30).unwrap(),
            ..SchedulingConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.key, "SALONBOOK_CLOSE");
        assert_eq!(err.value, "19:00:30");

        let config = SchedulingConfig {
            open: NaiveTime::from_hms_opt(10, 0, 15).unwrap(),
            ..SchedulingConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().key, "SALONBOOK_OPEN");
    }

    fn vars<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key: &str| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    }

    #[test]
    fn scheduling_settings_from_vars() {
        let config = SchedulingConfig::from_vars(&vars(&[
            ("SALONBOOK_OPEN", "09:00"),
            ("SALONBOOK_CLOSED_DAYS", "sun,mon"),
            ("SALONBOOK_HORIZON", "14d"),
        ]))
        .unwrap();
        assert_eq!(config.open, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(config.closed_weekdays, HashSet::from([Weekday::Sun, Weekday::Mon]));
        assert_eq!(config.horizon, Horizon::Days(14));
        assert!(config.completed_blocks_slot);

        let err = SchedulingConfig::from_vars(&vars(&[("SALONBOOK_SLOT_MINUTES", "half")])).unwrap_err();
        assert_eq!(err.key, "SALONBOOK_SLOT_MINUTES");
    }

    #[test]
    fn server_defaults_when_unset() {
        let config = ServerConfig::from_vars(&vars(&[])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert!(config.sweep_on_read);
    }

    #[test]
    fn server_rejects_malformed_values() {
        for (key, raw) in [
            ("SALONBOOK_SWEEP_ON_READ", "maybe"),
            ("SALONBOOK_PORT", "http"),
            ("SALONBOOK_METRICS_PORT", "70000"),
            ("SALONBOOK_SWEEP_INTERVAL_SECS", "0"),
            ("SALONBOOK_COMPACT_THRESHOLD", "-1"),
        ] {
            let err = ServerConfig::from_vars(&vars(&[(key, raw)])).unwrap_err();
            assert_eq!(err.key, key);
            assert_eq!(err.value, raw);
        }

        let config = ServerConfig::from_vars(&vars(&[
            ("SALONBOOK_SWEEP_ON_READ", "off"),
            ("SALONBOOK_METRICS_PORT", "9100"),
        ]))
        .unwrap();
        assert!(!config.sweep_on_read);
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn bools() {
        assert_eq!(parse_bool("TRUE"), Ok(true));
        assert_eq!(parse_bool("off"), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }
}
