use std::cmp::Ordering;
use std::iter::Peekable;

use crate::state::{ScalarValue, Snapshot, VariableKey};
use crate::types::SensorReading;

/// One raw variable that differs between consecutive snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableChange {
    pub key: VariableKey,
    pub old: Option<ScalarValue>,
    pub new: Option<ScalarValue>,
}

/// Difference between two ordered reading sequences.
///
/// This is what a sensor registry reconciles from: `added` readings need a
/// new entity, `removed` ids lost their hardware, `changed` carry a new value
/// or availability.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingsDiff {
    pub added: Vec<SensorReading>,
    pub removed: Vec<String>,
    pub changed: Vec<SensorReading>,
}

impl ReadingsDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Walk two sorted sequences in lockstep, calling `f` with each side of
/// every key present in either.
fn merge_join<'a, T: 'a, K: Ord>(
    prev: impl Iterator<Item = &'a T>,
    curr: impl Iterator<Item = &'a T>,
    key: impl Fn(&'a T) -> K,
    mut f: impl FnMut(Option<&'a T>, Option<&'a T>),
) {
    let mut prev: Peekable<_> = prev.peekable();
    let mut curr: Peekable<_> = curr.peekable();
    loop {
        let order = match (prev.peek(), curr.peek()) {
            (None, None) => return,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(p), Some(c)) => key(*p).cmp(&key(*c)),
        };
        match order {
            Ordering::Less => f(prev.next(), None),
            Ordering::Greater => f(None, curr.next()),
            Ordering::Equal => f(prev.next(), curr.next()),
        }
    }
}

pub fn diff_variables(previous: &Snapshot, current: &Snapshot) -> Vec<VariableChange> {
    let prev: Vec<_> = previous.variables().collect();
    let curr: Vec<_> = current.variables().collect();
    let mut changes = Vec::new();
    merge_join(prev.iter(), curr.iter(), |(k, _)| *k, |p, c| {
        let old = p.map(|(_, v)| (*v).clone());
        let new = c.map(|(_, v)| (*v).clone());
        if old != new {
            let key = p.or(c).map(|(k, _)| (*k).clone());
            if let Some(key) = key {
                changes.push(VariableChange { key, old, new });
            }
        }
    });
    changes
}

/// Linear diff of two reading sequences as produced by derivation
/// (both ordered by scope, then name).
pub fn diff_readings(previous: &[SensorReading], current: &[SensorReading]) -> ReadingsDiff {
    let mut diff = ReadingsDiff::default();
    merge_join(previous.iter(), current.iter(), SensorReading::order_key, |p, c| match (p, c) {
        (Some(old), None) => diff.removed.push(old.id.clone()),
        (None, Some(new)) => diff.added.push(new.clone()),
        (Some(old), Some(new)) if old != new => diff.changed.push(new.clone()),
        _ => {}
    });
    diff
}
