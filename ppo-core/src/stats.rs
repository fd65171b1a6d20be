//! Accumulation of per-step episode reports.
//!
//! Environments emit heterogeneous, possibly nested report structures ([`InfoValue`])
//! whenever episodes end. [`RolloutStats`] flattens them into dotted keys and folds
//! them into a running summary whose values are [`StatValue`]s.
//!
//! Merging follows [`StatValue::merge`]: numbers are summed, sequences are
//! concatenated, and a scalar meeting a scalar of a different kind is bundled with it
//! into a two-element sequence instead of failing.
use crate::record::{Record, RecordValue};
use log::warn;
use std::collections::{btree_map, BTreeMap, HashSet};

/// A node of a report emitted by an environment.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    /// Absent value; dropped when flattening.
    Null,

    /// Boolean flag, counted as `0` or `1`.
    Bool(bool),

    /// Plain number.
    Number(f64),

    /// Text value.
    Text(String),

    /// Array-like value such as a tensor copied to the host.
    ///
    /// Single-element arrays are treated as scalars.
    Array(Vec<f64>),

    /// Nested mapping.
    Map(BTreeMap<String, InfoValue>),
}

impl InfoValue {
    /// Builds a map node from key-value pairs.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, InfoValue)>) -> Self {
        InfoValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<f64> for InfoValue {
    fn from(v: f64) -> Self {
        InfoValue::Number(v)
    }
}

impl From<&str> for InfoValue {
    fn from(v: &str) -> Self {
        InfoValue::Text(v.to_string())
    }
}

impl From<Vec<f64>> for InfoValue {
    fn from(v: Vec<f64>) -> Self {
        InfoValue::Array(v)
    }
}

impl From<serde_json::Value> for InfoValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => InfoValue::Null,
            Value::Bool(b) => InfoValue::Bool(b),
            Value::Number(n) => InfoValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => InfoValue::Text(s),
            Value::Array(vs) => {
                let numbers: Option<Vec<f64>> = vs.iter().map(|v| v.as_f64()).collect();
                match numbers {
                    Some(numbers) => InfoValue::Array(numbers),
                    // Mixed arrays are kept element by element under indexed keys
                    None => InfoValue::Map(
                        vs.into_iter()
                            .enumerate()
                            .map(|(i, v)| (i.to_string(), InfoValue::from(v)))
                            .collect(),
                    ),
                }
            }
            Value::Object(m) => {
                InfoValue::Map(m.into_iter().map(|(k, v)| (k, InfoValue::from(v))).collect())
            }
        }
    }
}

/// A scalar entry of the summary.
#[derive(Debug, Clone, PartialEq)]
pub enum StatScalar {
    /// Numeric value.
    Number(f64),

    /// Text value.
    Text(String),
}

impl From<f64> for StatScalar {
    fn from(v: f64) -> Self {
        StatScalar::Number(v)
    }
}

impl From<&str> for StatScalar {
    fn from(v: &str) -> Self {
        StatScalar::Text(v.to_string())
    }
}

/// A value of the summary: a single scalar or a sequence of scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum StatValue {
    /// A single value, summed with later numeric values.
    Scalar(StatScalar),

    /// Values concatenated across merges.
    Sequence(Vec<StatScalar>),
}

impl StatValue {
    /// Merges `other` into `self`.
    ///
    /// * sequence ⊕ anything: appended
    /// * number ⊕ number: summed
    /// * scalar ⊕ scalar of another kind (or two texts): bundled as `[self, other]`
    /// * scalar ⊕ sequence: `[self, other...]`
    ///
    /// Returns `true` when the merge bundled two scalars because they could not be added.
    pub fn merge(&mut self, other: StatValue) -> bool {
        let current = std::mem::replace(self, StatValue::Sequence(vec![]));
        let (merged, conflict) = match (current, other) {
            (StatValue::Sequence(mut xs), StatValue::Sequence(ys)) => {
                xs.extend(ys);
                (StatValue::Sequence(xs), false)
            }
            (StatValue::Sequence(mut xs), StatValue::Scalar(y)) => {
                xs.push(y);
                (StatValue::Sequence(xs), false)
            }
            (StatValue::Scalar(StatScalar::Number(a)), StatValue::Scalar(StatScalar::Number(b))) => {
                (StatValue::Scalar(StatScalar::Number(a + b)), false)
            }
            (StatValue::Scalar(x), StatValue::Scalar(y)) => (StatValue::Sequence(vec![x, y]), true),
            (StatValue::Scalar(x), StatValue::Sequence(ys)) => {
                let mut xs = Vec::with_capacity(ys.len() + 1);
                xs.push(x);
                xs.extend(ys);
                (StatValue::Sequence(xs), false)
            }
        };
        *self = merged;
        conflict
    }

    /// Numeric entries of the value; text entries are skipped.
    pub fn numbers(&self) -> Vec<f64> {
        let scalars = match self {
            StatValue::Scalar(s) => std::slice::from_ref(s),
            StatValue::Sequence(xs) => xs.as_slice(),
        };
        scalars
            .iter()
            .filter_map(|s| match s {
                StatScalar::Number(v) => Some(*v),
                StatScalar::Text(_) => None,
            })
            .collect()
    }
}

/// Flattens a report into dotted keys.
///
/// Maps are descended into with `.` separated keys. Single-element arrays become
/// scalars and longer arrays become sequences. Booleans count as `0`/`1`,
/// `Null` entries and empty arrays are dropped.
pub fn unroll_nested(info: &InfoValue) -> Vec<(String, StatValue)> {
    let mut out = vec![];
    unroll_into("", info, &mut out);
    out
}

fn unroll_into(prefix: &str, info: &InfoValue, out: &mut Vec<(String, StatValue)>) {
    let value = match info {
        InfoValue::Null => return,
        InfoValue::Map(m) => {
            for (k, v) in m.iter() {
                let key = match prefix.is_empty() {
                    true => k.clone(),
                    false => format!("{}.{}", prefix, k),
                };
                unroll_into(&key, v, out);
            }
            return;
        }
        InfoValue::Bool(b) => StatValue::Scalar(StatScalar::Number(*b as u8 as f64)),
        InfoValue::Number(v) => StatValue::Scalar(StatScalar::Number(*v)),
        InfoValue::Text(s) => StatValue::Scalar(StatScalar::Text(s.clone())),
        InfoValue::Array(vs) => match vs.len() {
            0 => return,
            1 => StatValue::Scalar(StatScalar::Number(vs[0])),
            _ => StatValue::Sequence(vs.iter().map(|v| StatScalar::Number(*v)).collect()),
        },
    };
    out.push((prefix.to_string(), value));
}

/// Running summary of rollout reports.
#[derive(Debug, Clone, Default)]
pub struct RolloutStats {
    stats: BTreeMap<String, StatValue>,
    conflicted: HashSet<String>,
}

impl RolloutStats {
    /// Constructs an empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flattens every report and merges it into the summary.
    pub fn accumulate(&mut self, infos: &[InfoValue]) {
        for info in infos.iter() {
            for (k, v) in unroll_nested(info) {
                match self.stats.entry(k) {
                    btree_map::Entry::Vacant(e) => {
                        e.insert(v);
                    }
                    btree_map::Entry::Occupied(mut e) => {
                        if e.get_mut().merge(v) && self.conflicted.insert(e.key().clone()) {
                            warn!(
                                "Stat '{}' received values of different types, bundling them",
                                e.key()
                            );
                        }
                    }
                }
            }
        }
    }

    /// Value accumulated under `key`.
    pub fn get(&self, key: &str) -> Option<&StatValue> {
        self.stats.get(key)
    }

    /// Iterates over the summary in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, StatValue> {
        self.stats.iter()
    }

    /// Number of keys in the summary.
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    /// Returns `true` if nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Clears the summary, typically once per epoch.
    pub fn clear(&mut self) {
        self.stats.clear();
        self.conflicted.clear();
    }

    /// Converts the summary into a [`Record`].
    ///
    /// Numeric scalars become [`RecordValue::Scalar`], text scalars
    /// [`RecordValue::String`], and sequences the [`RecordValue::Array1`] of their
    /// numeric entries.
    pub fn to_record(&self) -> Record {
        let mut record = Record::empty();
        for (k, v) in self.stats.iter() {
            let value = match v {
                StatValue::Scalar(StatScalar::Number(x)) => RecordValue::Scalar(*x as f32),
                StatValue::Scalar(StatScalar::Text(s)) => RecordValue::String(s.clone()),
                StatValue::Sequence(_) => {
                    RecordValue::Array1(v.numbers().into_iter().map(|x| x as f32).collect())
                }
            };
            record.insert(k.clone(), value);
        }
        record
    }
}
