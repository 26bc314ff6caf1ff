use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::error::ParseError;
use crate::protocol::parse_attributes;
use crate::types::ReadingScope;

/// Closed set of scalar kinds a raw variable may hold.
///
/// The controller sends most values as strings; they stay `Text` here and
/// the accessors coerce on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ScalarValue {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(ScalarValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(ScalarValue::Integer)
                .or_else(|| n.as_f64().map(ScalarValue::Float)),
            Value::String(s) => Some(ScalarValue::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Integer(i) => Some(*i),
            ScalarValue::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            ScalarValue::Float(_) => None,
            ScalarValue::Bool(b) => Some(i64::from(*b)),
            ScalarValue::Text(s) => {
                let s = s.trim();
                s.parse().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && f.fract() == 0.0)
                        .map(|f| f as i64)
                })
            }
        }
    }

    /// Finite numeric value; `"NaN"` and `"inf"` text yield `None`.
    pub fn as_f64(&self) -> Option<f64> {
        let f = match self {
            ScalarValue::Integer(i) => Some(*i as f64),
            ScalarValue::Float(f) => Some(*f),
            ScalarValue::Bool(_) => None,
            ScalarValue::Text(s) => s.trim().parse().ok(),
        };
        f.filter(|f: &f64| f.is_finite())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Bool(b) => Some(*b),
            ScalarValue::Text(s) if s.eq_ignore_ascii_case("true") => Some(true),
            ScalarValue::Text(s) if s.eq_ignore_ascii_case("false") => Some(false),
            other => other.as_i64().map(|i| i != 0),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            ScalarValue::Integer(i) => i.to_string(),
            ScalarValue::Float(f) => f.to_string(),
            ScalarValue::Bool(b) => b.to_string(),
            ScalarValue::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

/// Unique key of a raw variable within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableKey {
    pub scope: ReadingScope,
    pub name: String,
}

impl VariableKey {
    pub fn new(scope: ReadingScope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }

    /// Split a controller variable name into scope and local name.
    ///
    /// `C1_T3_rh` → thermostat (1, 3) `rh`; `C2_supply_temperature` →
    /// controller 2; anything else is system-wide and keeps its full name.
    pub fn parse(raw: &str) -> Self {
        if let Some((controller, rest)) = split_indexed(raw, 'C') {
            if let Some((thermostat, name)) = split_indexed(rest, 'T') {
                return Self::new(ReadingScope::Thermostat(controller, thermostat), name);
            }
            return Self::new(ReadingScope::Controller(controller), rest);
        }
        Self::new(ReadingScope::System, raw)
    }

    /// The name the controller uses on the wire.
    pub fn wire_name(&self) -> String {
        match self.scope {
            ReadingScope::System => self.name.clone(),
            ReadingScope::Controller(c) => format!("C{c}_{}", self.name),
            ReadingScope::Thermostat(c, t) => format!("C{c}_T{t}_{}", self.name),
        }
    }
}

/// `<tag><digits>_<rest>` with a non-empty rest.
fn split_indexed(s: &str, tag: char) -> Option<(u8, &str)> {
    let body = s.strip_prefix(tag)?;
    let (digits, rest) = body.split_once('_')?;
    if digits.is_empty() || rest.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((digits.parse().ok()?, rest))
}

/// One immutable capture of every raw variable from a successful poll.
#[derive(Debug, Clone)]
pub struct Snapshot {
    sequence: u64,
    taken_at: DateTime<Utc>,
    received: Instant,
    variables: BTreeMap<VariableKey, ScalarValue>,
}

impl Snapshot {
    pub fn new(
        sequence: u64,
        taken_at: DateTime<Utc>,
        variables: BTreeMap<VariableKey, ScalarValue>,
    ) -> Self {
        Self {
            sequence,
            taken_at,
            received: Instant::now(),
            variables,
        }
    }

    /// Build from `(wire name, value)` pairs. Later duplicates win.
    pub fn from_pairs<I, S>(sequence: u64, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, ScalarValue)>,
        S: AsRef<str>,
    {
        let variables = pairs
            .into_iter()
            .map(|(name, value)| (VariableKey::parse(name.as_ref()), value))
            .collect();
        Self::new(sequence, Utc::now(), variables)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn received_at(&self) -> Instant {
        self.received
    }

    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.received)
    }

    pub fn is_stale_at(&self, now: Instant, threshold: Duration) -> bool {
        self.age_at(now) > threshold
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn get(&self, scope: ReadingScope, name: &str) -> Option<&ScalarValue> {
        self.variables.get(&VariableKey::new(scope, name))
    }

    pub fn variables(&self) -> impl Iterator<Item = (&VariableKey, &ScalarValue)> {
        self.variables.iter()
    }

    /// Distinct controllers, from controller- or thermostat-scoped variables.
    pub fn controllers(&self) -> BTreeSet<u8> {
        self.variables
            .keys()
            .filter_map(|k| match k.scope {
                ReadingScope::Controller(c) | ReadingScope::Thermostat(c, _) => Some(c),
                ReadingScope::System => None,
            })
            .collect()
    }

    pub fn thermostats(&self) -> BTreeSet<(u8, u8)> {
        self.variables
            .keys()
            .filter_map(|k| match k.scope {
                ReadingScope::Thermostat(c, t) => Some((c, t)),
                _ => None,
            })
            .collect()
    }

    /// User-assigned name from the `cust_*` variables, if any.
    pub fn custom_name(&self, scope: ReadingScope) -> Option<String> {
        let key = match scope {
            ReadingScope::Thermostat(c, t) => format!("cust_C{c}_T{t}_name"),
            ReadingScope::Controller(c) => format!("cust_Controller{c}_Name"),
            ReadingScope::System => return None,
        };
        self.get(ReadingScope::System, &key)
            .map(ScalarValue::as_text)
            .filter(|name| !name.trim().is_empty())
    }

    pub fn display_name(&self, scope: ReadingScope) -> String {
        self.custom_name(scope).unwrap_or_else(|| scope.to_string())
    }
}

/// Parse a `GetAttributes` body into a snapshot.
///
/// `taken_at` is bumped past `previous` when the wall clock has not moved,
/// so published capture times strictly increase.
pub fn ingest(
    body: &Value,
    sequence: u64,
    previous: Option<DateTime<Utc>>,
) -> Result<Snapshot, ParseError> {
    let mut variables = BTreeMap::new();
    for (name, raw) in parse_attributes(body)? {
        match ScalarValue::from_json(&raw) {
            Some(value) => {
                variables.insert(VariableKey::parse(&name), value);
            }
            None if raw.is_null() => trace!(var = %name, "skipping null variable"),
            None => warn!(var = %name, "skipping non-scalar variable"),
        }
    }

    let mut taken_at = Utc::now();
    if let Some(prev) = previous
        && taken_at <= prev
    {
        taken_at = prev + chrono::Duration::microseconds(1);
    }

    Ok(Snapshot::new(sequence, taken_at, variables))
}
