use std::fmt;

use serde::{Deserialize, Serialize};

/// Temperature stored as Celsius internally.
/// X265 reports whole tenths of a degree; values are kept at 0.1 precision.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Temperature(f64);

impl Temperature {
    pub fn from_celsius(c: f64) -> Self {
        Self(c)
    }

    pub fn from_fahrenheit(f: f64) -> Self {
        Self((f - 32.0) * (5.0 / 9.0))
    }

    /// Absolute temperature from raw controller tenths.
    pub fn from_tenths(raw: i64, scale: TemperatureScale) -> Self {
        let degrees = raw as f64 / 10.0;
        match scale {
            TemperatureScale::TenthsCelsius => Self::from_celsius(degrees),
            TemperatureScale::TenthsFahrenheit => Self::from_fahrenheit(degrees),
        }
        .rounded()
    }

    /// Temperature difference from raw controller tenths (no 32° shift).
    pub fn delta_from_tenths(raw: i64, scale: TemperatureScale) -> Self {
        let degrees = raw as f64 / 10.0;
        match scale {
            TemperatureScale::TenthsCelsius => Self(degrees),
            TemperatureScale::TenthsFahrenheit => Self(degrees * (5.0 / 9.0)),
        }
        .rounded()
    }

    pub fn celsius(&self) -> f64 {
        self.0
    }

    /// Round to 0.1 °C.
    pub fn rounded(self) -> Self {
        Self((self.0 * 10.0).round() / 10.0)
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}\u{00b0}C", self.0)
    }
}

/// Unit of the raw integer temperatures the controller reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureScale {
    #[default]
    TenthsCelsius,
    TenthsFahrenheit,
}

/// The entity a reading belongs to. Ordered System < Controller < Thermostat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadingScope {
    System,
    Controller(u8),
    Thermostat(u8, u8),
}

impl ReadingScope {
    pub fn id_prefix(&self) -> String {
        match self {
            ReadingScope::System => "system".to_string(),
            ReadingScope::Controller(c) => format!("c{c}"),
            ReadingScope::Thermostat(c, t) => format!("c{c}_t{t}"),
        }
    }

    pub fn sensor_id(&self, name: &str) -> String {
        format!("{}.{name}", self.id_prefix())
    }
}

impl fmt::Display for ReadingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingScope::System => write!(f, "System"),
            ReadingScope::Controller(c) => write!(f, "C{c}"),
            ReadingScope::Thermostat(c, t) => write!(f, "C{c} T{t}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Celsius,
    /// Temperature difference, e.g. the ECO setback offset.
    CelsiusDelta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Numeric(Unit),
    Percentage,
    Boolean,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    Temperature(Temperature),
    Percentage(u8),
    Boolean(bool),
    Text(String),
}

impl SensorValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Temperature(t) => Some(t.celsius()),
            SensorValue::Percentage(p) => Some(f64::from(*p)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SensorValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Temperature(t) => write!(f, "{t}"),
            SensorValue::Percentage(p) => write!(f, "{p}%"),
            SensorValue::Boolean(b) => write!(f, "{}", if *b { "on" } else { "off" }),
            SensorValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One derived, typed sensor value.
///
/// `value` is `None` exactly when `available` is false.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub id: String,
    pub scope: ReadingScope,
    pub name: &'static str,
    pub kind: SensorKind,
    pub value: Option<SensorValue>,
    pub available: bool,
}

impl SensorReading {
    pub fn new(
        scope: ReadingScope,
        name: &'static str,
        kind: SensorKind,
        value: Option<SensorValue>,
    ) -> Self {
        Self {
            id: scope.sensor_id(name),
            scope,
            name,
            kind,
            available: value.is_some(),
            value,
        }
    }

    /// Sort key shared by derivation and diffing.
    pub fn order_key(&self) -> (ReadingScope, &'static str) {
        (self.scope, self.name)
    }

    pub fn mark_unavailable(&mut self) {
        self.available = false;
        self.value = None;
    }
}
