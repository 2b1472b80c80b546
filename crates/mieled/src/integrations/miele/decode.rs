//! Conversions from raw facet values to entity values.
//!
//! Most decoders are pure. Consumption and running-time sensors are
//! stateful: the API briefly reports empty or zero values while a program is
//! running (connection loss, program end), and the trackers here mask those
//! with the last good reading so history graphs stay monotonic.

use chrono::Duration;
use chrono::NaiveDateTime;

use super::model::EcoFeedback;
use super::model::Quantity;
use super::model::ScalarStatus;
use crate::engine::EntityValue;

/// Appliance status codes (`state.status.value_raw`).
pub mod status {
    pub const OFF: i64 = 1;
    pub const ON: i64 = 2;
    pub const PROGRAMMED: i64 = 3;
    pub const PROGRAMMED_WAITING_TO_START: i64 = 4;
    pub const RUNNING: i64 = 5;
    pub const PAUSE: i64 = 6;
    pub const END_PROGRAMMED: i64 = 7;
    pub const FAILURE: i64 = 8;
    pub const PROGRAMME_INTERRUPTED: i64 = 9;
    pub const IDLE: i64 = 10;
    pub const RINSE_HOLD: i64 = 11;
    pub const SERVICE: i64 = 12;
    pub const SUPERFREEZING: i64 = 13;
    pub const SUPERCOOLING: i64 = 14;
    pub const SUPERHEATING: i64 = 15;
    pub const SUPERCOOLING_SUPERFREEZING: i64 = 146;
    pub const NOT_CONNECTED: i64 = 255;

    /// A program is loaded and has not been cleared.
    pub const RUNNING_LIKE: &[i64] = &[
        RUNNING,
        PAUSE,
        END_PROGRAMMED,
        PROGRAMME_INTERRUPTED,
        RINSE_HOLD,
    ];

    pub const TERMINATED: &[i64] = &[END_PROGRAMMED, PROGRAMME_INTERRUPTED];

    pub fn is_running(code: Option<i64>) -> bool {
        code.is_some_and(|c| RUNNING_LIKE.contains(&c))
    }

    pub fn is_terminated(code: Option<i64>) -> bool {
        code.is_some_and(|c| TERMINATED.contains(&c))
    }

    pub fn is_not_connected(code: Option<i64>) -> bool {
        code == Some(NOT_CONNECTED)
    }
}

/// Raw temperature value meaning "no reading".
pub const TEMPERATURE_UNAVAILABLE: i64 = -32768;

/// Duration of a `[h, m]` or `[h, m, s]` array in seconds. `None` when the
/// shape is wrong or the total overflows.
pub fn to_seconds(time: &[i64]) -> Option<i64> {
    let (h, m, s) = match *time {
        [h, m] => (h, m, 0),
        [h, m, s] => (h, m, s),
        _ => return None,
    };
    h.checked_mul(3600)?
        .checked_add(m.checked_mul(60)?)?
        .checked_add(s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFields {
    HoursMinutes,
    HoursMinutesSeconds,
}

/// Inverse of [`to_seconds`]. The two-field encoding drops leftover seconds.
pub fn seconds_to_array(seconds: i64, fields: TimeFields) -> Vec<i64> {
    let (h, m, s) = (seconds / 3600, seconds % 3600 / 60, seconds % 60);
    match fields {
        TimeFields::HoursMinutes => vec![h, m],
        TimeFields::HoursMinutesSeconds => vec![h, m, s],
    }
}

/// `"HH:MM"` for a two- or three-element time array.
pub fn format_time(time: &[i64]) -> Option<String> {
    match time {
        [h, m] | [h, m, _] => Some(format!("{:02}:{:02}", h, m)),
        _ => None,
    }
}

/// Degrees from hundredths of a degree, rounded to whole degrees or to one
/// decimal place.
pub fn temperature(raw: i64, whole_degrees: bool) -> Option<f64> {
    if raw == TEMPERATURE_UNAVAILABLE {
        return None;
    }
    let degrees = raw as f64 / 100.0;
    Some(if whole_degrees {
        degrees.round()
    } else {
        (degrees * 10.0).round() / 10.0
    })
}

pub fn temperature_unit(unit: Option<&str>) -> Option<&'static str> {
    match unit? {
        "Celsius" => Some("°C"),
        "Fahrenheit" => Some("°F"),
        _ => None,
    }
}

/// Localized label, falling back to the raw code.
pub fn status_value(status: &ScalarStatus) -> Option<EntityValue> {
    match (&status.value_localized, status.value_raw) {
        (Some(label), _) => Some(EntityValue::Text(label.clone())),
        (None, Some(raw)) => Some(EntityValue::Integer(raw)),
        (None, None) => None,
    }
}

/// Localized label, with the empty string treated as unknown.
pub fn text_value(status: &ScalarStatus) -> Option<String> {
    status.value_localized.clone().filter(|s| !s.is_empty())
}

/// Energy reading normalized to kWh. Unknown units are treated as missing.
pub fn energy_kwh(quantity: &Quantity) -> Option<f64> {
    let value = quantity.value?;
    match quantity.unit.as_deref() {
        Some("kWh") => Some(value),
        Some("Wh") => Some(value / 1000.0),
        _ => None,
    }
}

pub fn water_litres(quantity: &Quantity) -> Option<f64> {
    quantity.value
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumption {
    Energy,
    Water,
}

impl Consumption {
    pub fn unit(self) -> &'static str {
        match self {
            Consumption::Energy => "kWh",
            Consumption::Water => "L",
        }
    }

    /// Current program's consumption in this resource's unit.
    pub fn reading(self, eco: &EcoFeedback) -> Option<f64> {
        match self {
            Consumption::Energy => eco.current_energy_consumption.as_ref().and_then(energy_kwh),
            Consumption::Water => eco.current_water_consumption.as_ref().and_then(water_litres),
        }
    }

    /// Forecast as a percentage of typical program use.
    pub fn forecast(self, eco: &EcoFeedback) -> Option<f64> {
        let fraction = match self {
            Consumption::Energy => eco.energy_forecast,
            Consumption::Water => eco.water_forecast,
        }?;
        Some((fraction * 1000.0).round() / 10.0)
    }
}

/// Per-entity cache for energy and water consumption.
#[derive(Debug, Clone)]
pub struct ConsumptionTracker {
    kind: Consumption,
    cached: Option<f64>,
}

impl ConsumptionTracker {
    pub fn new(kind: Consumption) -> Self {
        Self { kind, cached: None }
    }

    pub fn cached(&self) -> Option<f64> {
        self.cached
    }

    /// Next value of the sensor for a device in `status` reporting `eco`.
    pub fn update(&mut self, status: Option<i64>, eco: Option<&EcoFeedback>) -> Option<f64> {
        if !status::is_running(status) && !status::is_not_connected(status) {
            self.cached = None;
            return Some(0.0);
        }

        if let Some(cached) = self.cached {
            if eco.is_none() || status::is_not_connected(status) {
                return Some(cached);
            }
        }

        match eco.and_then(|eco| self.kind.reading(eco)) {
            Some(value) if value >= 0.0 => {
                self.cached = Some(value);
                Some(value)
            }
            _ => self.cached,
        }
    }
}

/// Per-entity cache for remaining/start/elapsed time sensors.
#[derive(Debug, Clone)]
pub struct TimeTracker {
    /// Counts down to zero (remaining time)
    decreasing: bool,
    cached: Option<String>,
}

impl TimeTracker {
    pub fn new(decreasing: bool) -> Self {
        Self {
            decreasing,
            cached: None,
        }
    }

    pub fn update(&mut self, status: Option<i64>, time: Option<&[i64]>) -> Option<String> {
        let formatted = time.and_then(format_time);

        if !status::is_running(status) && !status::is_not_connected(status) {
            self.cached = None;
            return formatted;
        }

        if let Some(cached) = &self.cached {
            let terminated = status::is_terminated(status);
            if self.decreasing && terminated {
                return formatted;
            }
            if formatted.is_none() || status::is_not_connected(status) || terminated {
                return Some(cached.clone());
            }
        }

        self.cached = formatted.clone();
        formatted
    }
}

/// Derived timing attributes for the status sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramTiming {
    /// Percent complete, one decimal
    pub progress: Option<f64>,
    pub finish_time: Option<NaiveDateTime>,
    pub kickoff_time: NaiveDateTime,
}

/// Progress and wall-clock times from program durations in seconds.
///
/// Times that fall outside the representable date range degrade to no
/// finish time and a kickoff of `now`.
pub fn program_timing(
    elapsed: i64,
    remaining: i64,
    start: i64,
    now: NaiveDateTime,
) -> ProgramTiming {
    let total = elapsed as f64 + remaining as f64;
    let progress = (total != 0.0).then(|| {
        let percent = elapsed as f64 / total * 100.0;
        (percent * 10.0).round() / 10.0
    });
    let offset = |time: NaiveDateTime, seconds: i64| {
        time.checked_add_signed(Duration::try_seconds(seconds)?)
    };
    let finish_time = if remaining != 0 {
        offset(now, start).and_then(|t| offset(t, remaining))
    } else {
        None
    };
    let kickoff_time = if start == 0 {
        Duration::try_seconds(elapsed).and_then(|d| now.checked_sub_signed(d))
    } else {
        offset(now, start)
    }
    .unwrap_or(now);

    ProgramTiming {
        progress,
        finish_time,
        kickoff_time,
    }
}

pub fn format_clock(time: NaiveDateTime) -> String {
    time.format("%H:%M").to_string()
}
