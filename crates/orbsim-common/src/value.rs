//! The dynamic operation surface.
//!
//! Models expose named operations invoked with a keyword-argument bag and
//! returning a variant result. The permitted value shapes are a closed sum,
//! so sibling calls stay typed without every model knowing every other
//! model's concrete types.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::data::{DataUnit, MacFrame};
use crate::kernel::NodeKind;
use crate::time::SimTime;
use crate::NodeId;

/// Errors surfaced by [`Model::invoke`](crate::Model::invoke).
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("model {model} has no operation {op:?}")]
    UnknownOperation { model: &'static str, op: String },

    #[error("operation {op:?} requires argument {key:?}")]
    MissingArgument { op: &'static str, key: &'static str },

    #[error("operation {op:?} argument {key:?}: expected {expected}")]
    InvalidArgument {
        op: &'static str,
        key: &'static str,
        expected: &'static str,
    },

    #[error("precondition failed: {reason}")]
    PreconditionFailed { reason: String },
}

impl InvocationError {
    pub fn precondition(reason: impl Into<String>) -> InvocationError {
        InvocationError::PreconditionFailed {
            reason: reason.into(),
        }
    }
}

/// A value flowing through the operation surface.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Time(SimTime),
    NodeIds(Vec<NodeId>),
    Kinds(Vec<NodeKind>),
    Ids(Vec<u64>),
    Position([f64; 3]),
    Floats(Vec<f64>),
    Data(DataUnit),
    DataList(Vec<DataUnit>),
    Frame(MacFrame),
    Windows(Vec<(SimTime, SimTime)>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<SimTime> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// Truthiness of a result for callers that only care about success:
    /// `Null`, `Bool(false)`, and zero sizes are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            _ => true,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int(v)
    }
}
impl From<u32> for Value {
    fn from(v: u32) -> Value {
        Value::Int(v as i64)
    }
}
impl From<usize> for Value {
    fn from(v: usize) -> Value {
        Value::Int(v as i64)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Str(v)
    }
}
impl From<SimTime> for Value {
    fn from(v: SimTime) -> Value {
        Value::Time(v)
    }
}
impl From<DataUnit> for Value {
    fn from(v: DataUnit) -> Value {
        Value::Data(v)
    }
}
impl From<MacFrame> for Value {
    fn from(v: MacFrame) -> Value {
        Value::Frame(v)
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Value {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Keyword arguments for a model operation.
#[derive(Debug, Clone, Default)]
pub struct Kwargs(BTreeMap<String, Value>);

impl Kwargs {
    pub fn new() -> Kwargs {
        Kwargs::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Kwargs {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Remove and return an argument, transferring ownership to the callee.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    // Typed accessors used by operation handlers. `require_*` map absence to
    // MissingArgument and shape mismatch to InvalidArgument.

    pub fn require_f64(&self, op: &'static str, key: &'static str) -> Result<f64, InvocationError> {
        match self.get(key) {
            None => Err(InvocationError::MissingArgument { op, key }),
            Some(v) => v.as_f64().ok_or(InvocationError::InvalidArgument {
                op,
                key,
                expected: "number",
            }),
        }
    }

    pub fn require_i64(&self, op: &'static str, key: &'static str) -> Result<i64, InvocationError> {
        match self.get(key) {
            None => Err(InvocationError::MissingArgument { op, key }),
            Some(v) => v.as_i64().ok_or(InvocationError::InvalidArgument {
                op,
                key,
                expected: "integer",
            }),
        }
    }

    pub fn require_str(
        &self,
        op: &'static str,
        key: &'static str,
    ) -> Result<&str, InvocationError> {
        match self.get(key) {
            None => Err(InvocationError::MissingArgument { op, key }),
            Some(v) => v.as_str().ok_or(InvocationError::InvalidArgument {
                op,
                key,
                expected: "string",
            }),
        }
    }

    pub fn take_data(
        &mut self,
        op: &'static str,
        key: &'static str,
    ) -> Result<DataUnit, InvocationError> {
        match self.take(key) {
            None => Err(InvocationError::MissingArgument { op, key }),
            Some(Value::Data(d)) => Ok(d),
            Some(_) => Err(InvocationError::InvalidArgument {
                op,
                key,
                expected: "data unit",
            }),
        }
    }

    pub fn take_frame(
        &mut self,
        op: &'static str,
        key: &'static str,
    ) -> Result<MacFrame, InvocationError> {
        match self.take(key) {
            None => Err(InvocationError::MissingArgument { op, key }),
            Some(Value::Frame(f)) => Ok(f),
            Some(_) => Err(InvocationError::InvalidArgument {
                op,
                key,
                expected: "mac frame",
            }),
        }
    }

    pub fn take_ids(
        &mut self,
        op: &'static str,
        key: &'static str,
    ) -> Result<Vec<u64>, InvocationError> {
        match self.take(key) {
            None => Err(InvocationError::MissingArgument { op, key }),
            Some(Value::Ids(ids)) => Ok(ids),
            Some(_) => Err(InvocationError::InvalidArgument {
                op,
                key,
                expected: "id list",
            }),
        }
    }

    pub fn opt_f64(
        &self,
        op: &'static str,
        key: &'static str,
    ) -> Result<Option<f64>, InvocationError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or(InvocationError::InvalidArgument {
                    op,
                    key,
                    expected: "number",
                }),
        }
    }

    pub fn opt_time(
        &self,
        op: &'static str,
        key: &'static str,
    ) -> Result<Option<SimTime>, InvocationError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_time()
                .map(Some)
                .ok_or(InvocationError::InvalidArgument {
                    op,
                    key,
                    expected: "sim time",
                }),
        }
    }

    pub fn opt_kinds(
        &self,
        op: &'static str,
        key: &'static str,
    ) -> Result<Option<Vec<NodeKind>>, InvocationError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Kinds(kinds)) => Ok(Some(kinds.clone())),
            Some(_) => Err(InvocationError::InvalidArgument {
                op,
                key,
                expected: "node kind list",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_report_missing_and_invalid() {
        let mut kwargs = Kwargs::new().with("power", 10.0).with("tag", "TXRADIO");
        assert_eq!(kwargs.require_f64("op", "power").unwrap(), 10.0);
        assert!(matches!(
            kwargs.require_f64("op", "duration"),
            Err(InvocationError::MissingArgument { key: "duration", .. })
        ));
        assert!(matches!(
            kwargs.require_f64("op", "tag"),
            Err(InvocationError::InvalidArgument { key: "tag", .. })
        ));
        assert!(matches!(
            kwargs.take_data("op", "tag"),
            Err(InvocationError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn take_transfers_ownership() {
        let unit = DataUnit {
            id: 7,
            kind: DataKind::Sensor,
            size_bytes: 24,
            created_at: SimTime::ZERO,
            source_node: NodeId(3),
        };
        let mut kwargs = Kwargs::new().with("data", unit.clone());
        assert_eq!(kwargs.take_data("op", "data").unwrap(), unit);
        assert!(kwargs.take("data").is_none());
    }

    use crate::data::DataKind;

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(3).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
    }
}
