//! Rows: ordered, fixed-arity sequences of typed values.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// The unit of data flowing between steps.
///
/// A row carries no schema itself; the [`crate::RowSchema`] travels
/// alongside on the queue. Every row on one queue conforms to that
/// queue's schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Replace the value at `index`. Out-of-range writes are ignored;
    /// arity is fixed by the schema, not grown on demand.
    pub fn set(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    /// Append a value, growing the row's arity. Used only when a step
    /// extends the schema (e.g. error-code tagging on redirection).
    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_respects_arity() {
        let mut row = Row::new(vec![Value::from(1i64), Value::from("a")]);
        row.set(1, Value::from("b"));
        assert_eq!(row.get(1), Some(&Value::from("b")));
        // out-of-range set does not grow the row
        row.set(5, Value::Null);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn push_extends_arity() {
        let mut row = Row::default();
        row.push(Value::from("x"));
        row.push(Value::Null);
        assert_eq!(row.len(), 2);
        assert!(row.get(1).unwrap().is_null());
    }
}
