use std::time::Duration;

use tokio::time::Instant;

use crate::config::{DEFAULT_POLL_INTERVAL, PollerConfig};
use crate::state::{ScalarValue, Snapshot};
use crate::types::*;

/// INT16_MAX, reported by the controller for "no sensor fitted".
pub const NO_SENSOR: i64 = 32767;

type Convert = fn(&ScalarValue, TemperatureScale) -> Option<SensorValue>;

struct SensorDef {
    name: &'static str,
    variable: &'static str,
    kind: SensorKind,
    convert: Convert,
}

const fn temperature(name: &'static str, variable: &'static str) -> SensorDef {
    SensorDef { name, variable, kind: SensorKind::Numeric(Unit::Celsius), convert: to_temperature }
}

const fn offset(name: &'static str, variable: &'static str) -> SensorDef {
    SensorDef { name, variable, kind: SensorKind::Numeric(Unit::CelsiusDelta), convert: to_offset }
}

const fn percentage(name: &'static str, variable: &'static str) -> SensorDef {
    SensorDef { name, variable, kind: SensorKind::Percentage, convert: to_percentage }
}

const fn flag(name: &'static str, variable: &'static str) -> SensorDef {
    SensorDef { name, variable, kind: SensorKind::Boolean, convert: to_boolean }
}

const fn text(name: &'static str, variable: &'static str) -> SensorDef {
    SensorDef { name, variable, kind: SensorKind::Text, convert: to_text }
}

const ROOM_TEMPERATURE: SensorDef = temperature("room_temperature", "room_temperature");
const DEMAND: SensorDef = flag("demand", "stat_demand_led");

const THERMOSTAT_SENSORS: &[SensorDef] = &[
    ROOM_TEMPERATURE,
    percentage("humidity", "rh"),
    percentage("humidity_setpoint", "rh_setpoint"),
    percentage("valve_position_1", "head1_valve_pos_percent"),
    percentage("valve_position_2", "head2_valve_pos_percent"),
    temperature("floor_temp_max", "maximum_floor_setpoint"),
    temperature("floor_temp_min", "minimum_floor_setpoint"),
    temperature("external_temperature", "external_temperature"),
    offset("eco_offset", "eco_offset"),
    text("sw_version", "sw_version"),
    text("thermostat_type", "thermostat_type"),
    text("hw_type", "hw_type"),
    flag("humidity_control", "rh_control"),
    flag("humidity_cool_shutdown", "stat_cb_rh_cool_shutdown"),
    flag("actuator_status", "stat_cb_actuator"),
    flag("battery_error", "stat_battery_error"),
    DEMAND,
    flag("floor_limit_reached", "stat_cb_floor_limit_reach"),
    flag("rf_error", "stat_rf_error"),
    flag("rf_low_signal", "stat_rf_low_sig_warning"),
    flag("air_sensor_error", "stat_air_sensor_error"),
    flag("rh_sensor_error", "stat_rh_sensor_error"),
    flag("valve_position_error", "stat_valve_position_err"),
    flag("tamper_alarm", "stat_tamper_alarm"),
    flag("eco_program", "stat_eco_program"),
    flag("eco_forced", "stat_cb_eco_forced"),
    flag("mode_comfort_eco", "mode_comfort_eco"),
];

const CONTROLLER_SENSORS: &[SensorDef] = &[
    temperature("average_room_temperature", "average_room_temperature"),
    temperature("supply_temperature", "supply_temperature"),
    temperature("outdoor_temperature", "outdoor_temperature"),
    flag("general_system_alarm", "stat_general_system_alarm"),
];

const SYSTEM_SENSORS: &[SensorDef] = &[
    flag("controller_presence", "sys_controller_1_presence"),
    flag("controller_lost", "sys_controller_1_lost"),
    flag("output_module_lost", "stat_out_module_com_lost"),
    flag("pump_management", "sys_pump_management"),
    flag("valve_exercise", "sys_valve_exercise"),
    flag("heat_cool_mode", "sys_heat_cool_mode"),
];

const CONTROLLER_DEMAND: &str = "controller_demand";
const STAT_DEMAND: SensorDef = flag(CONTROLLER_DEMAND, "stat_demand");
const AVERAGE_ROOM_TEMPERATURE: &str = "average_room_temperature";

fn to_temperature(v: &ScalarValue, scale: TemperatureScale) -> Option<SensorValue> {
    let tenths = v.as_f64()?.round() as i64;
    Some(SensorValue::Temperature(Temperature::from_tenths(tenths, scale)))
}

fn to_offset(v: &ScalarValue, scale: TemperatureScale) -> Option<SensorValue> {
    let tenths = v.as_f64()?.round() as i64;
    Some(SensorValue::Temperature(Temperature::delta_from_tenths(tenths, scale)))
}

fn to_percentage(v: &ScalarValue, _: TemperatureScale) -> Option<SensorValue> {
    let pct = v.as_f64()?.round().clamp(0.0, 100.0);
    Some(SensorValue::Percentage(pct as u8))
}

fn to_boolean(v: &ScalarValue, _: TemperatureScale) -> Option<SensorValue> {
    v.as_bool().map(SensorValue::Boolean)
}

fn to_text(v: &ScalarValue, _: TemperatureScale) -> Option<SensorValue> {
    let s = v.as_text();
    let s = s.trim();
    (!s.is_empty()).then(|| SensorValue::Text(s.to_string()))
}

/// Maps a raw [`Snapshot`] onto the fixed catalogue of typed sensor readings.
///
/// Derivation is pure: the same snapshot always yields the same readings in
/// the same order (scope, then sensor name). Thermostats and controllers are
/// enumerated from the snapshot itself, so rooms appear and disappear with
/// the hardware the controller reports.
#[derive(Debug, Clone, Copy)]
pub struct DerivationEngine {
    scale: TemperatureScale,
    stale_after: Duration,
}

impl Default for DerivationEngine {
    fn default() -> Self {
        Self {
            scale: TemperatureScale::default(),
            stale_after: DEFAULT_POLL_INTERVAL * 3,
        }
    }
}

impl DerivationEngine {
    pub fn new(scale: TemperatureScale, stale_after: Duration) -> Self {
        Self { scale, stale_after }
    }

    pub fn from_config(config: &PollerConfig) -> Self {
        Self::new(config.temperature_scale, config.staleness_threshold())
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Every reading the snapshot supports, ordered by scope then name.
    pub fn derive(&self, snapshot: &Snapshot) -> Vec<SensorReading> {
        let thermostats = snapshot.thermostats();
        let mut readings = Vec::new();

        for def in SYSTEM_SENSORS {
            readings.push(self.read(snapshot, ReadingScope::System, def));
        }
        readings.push(self.average_room_temperature(snapshot));

        for controller in snapshot.controllers() {
            let scope = ReadingScope::Controller(controller);
            for def in CONTROLLER_SENSORS {
                readings.push(self.read(snapshot, scope, def));
            }
            // the controller's own demand flag wins over the thermostat composite
            let demand = self.value(snapshot, scope, &STAT_DEMAND).or_else(|| {
                let demands = thermostats
                    .iter()
                    .filter(|(c, _)| *c == controller)
                    .filter_map(|&(c, t)| {
                        self.value(snapshot, ReadingScope::Thermostat(c, t), &DEMAND)
                    })
                    .filter_map(|v| v.as_bool());
                any_of(demands).map(SensorValue::Boolean)
            });
            readings.push(SensorReading::new(
                scope,
                CONTROLLER_DEMAND,
                SensorKind::Boolean,
                demand,
            ));
        }

        for &(c, t) in &thermostats {
            let scope = ReadingScope::Thermostat(c, t);
            for def in THERMOSTAT_SENSORS {
                readings.push(self.read(snapshot, scope, def));
            }
        }

        readings.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        readings
    }

    /// As [`derive`](Self::derive), with every reading unavailable once the
    /// snapshot is older than the staleness threshold at `now`.
    pub fn derive_at(&self, snapshot: &Snapshot, now: Instant) -> Vec<SensorReading> {
        let mut readings = self.derive(snapshot);
        if snapshot.is_stale_at(now, self.stale_after) {
            readings.iter_mut().for_each(SensorReading::mark_unavailable);
        }
        readings
    }

    fn read(&self, snapshot: &Snapshot, scope: ReadingScope, def: &SensorDef) -> SensorReading {
        SensorReading::new(scope, def.name, def.kind, self.value(snapshot, scope, def))
    }

    fn value(&self, snapshot: &Snapshot, scope: ReadingScope, def: &SensorDef) -> Option<SensorValue> {
        let raw = snapshot.get(scope, def.variable)?;
        if raw.as_i64() == Some(NO_SENSOR) {
            return None;
        }
        (def.convert)(raw, self.scale)
    }

    fn average_room_temperature(&self, snapshot: &Snapshot) -> SensorReading {
        let temps: Vec<f64> = snapshot
            .thermostats()
            .into_iter()
            .filter_map(|(c, t)| {
                self.value(snapshot, ReadingScope::Thermostat(c, t), &ROOM_TEMPERATURE)
            })
            .filter_map(|v| v.as_f64())
            .collect();

        let value = (!temps.is_empty()).then(|| {
            let mean = temps.iter().sum::<f64>() / temps.len() as f64;
            SensorValue::Temperature(Temperature::from_celsius(mean).rounded())
        });
        SensorReading::new(
            ReadingScope::System,
            AVERAGE_ROOM_TEMPERATURE,
            SensorKind::Numeric(Unit::Celsius),
            value,
        )
    }
}

/// `None` when nothing reported, otherwise whether any input is set.
fn any_of(values: impl Iterator<Item = bool>) -> Option<bool> {
    values.fold(None, |acc, v| Some(acc.unwrap_or(false) || v))
}

/// Derive with default settings (tenths of a degree Celsius).
pub fn derive(snapshot: &Snapshot) -> Vec<SensorReading> {
    DerivationEngine::default().derive(snapshot)
}
