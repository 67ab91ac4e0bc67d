use crate::runtime::InstanceId;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Shared handle to array storage. Cloning the handle shares the elements.
pub type ArrayRef = Rc<RefCell<ArrayValue>>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArrayValue {
    pub elements: Vec<Value>,
}

/// A writable storage location addressed by a `Value::Ref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRef {
    /// Input or local-variable slot of a live flow instance.
    Instance { instance: InstanceId, slot: usize },
    /// Global variable of the loaded flow definition.
    Global(usize),
}

/// Runtime value flowing through the evaluator and along connections.
///
/// Strings and arrays are reference-counted handles, everything else is copied.
/// The last four variants are write targets produced by assignable evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Int32(i32),
    Float(f32),
    Double(f64),
    Boolean(bool),
    String(Rc<str>),
    Array(ArrayRef),
    Ref(SlotRef),
    FlowOutput(u16),
    NativeVariable(u32),
    ArrayElement { array: ArrayRef, index: usize },
}

impl Value {
    pub fn string(text: impl AsRef<str>) -> Self {
        Value::String(Rc::from(text.as_ref()))
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(ArrayValue { elements })))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int32(_) | Value::Float(_) | Value::Double(_))
    }

    /// True for the four write-target kinds accepted by assignable evaluation.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Value::Ref(_) | Value::FlowOutput(_) | Value::NativeVariable(_) | Value::ArrayElement { .. }
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Int32(_) => "integer",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Ref(_) => "reference",
            Value::FlowOutput(_) => "flow output",
            Value::NativeVariable(_) => "native variable",
            Value::ArrayElement { .. } => "array element",
        }
    }

    pub fn to_double(&self) -> f64 {
        match self {
            Value::Int32(i) => *i as f64,
            Value::Float(f) => *f as f64,
            Value::Double(d) => *d,
            Value::Boolean(b) => f64::from(u8::from(*b)),
            Value::String(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn to_float(&self) -> f32 {
        match self {
            Value::Float(f) => *f,
            other => other.to_double() as f32,
        }
    }

    pub fn to_int32(&self) -> i32 {
        match self {
            Value::Int32(i) => *i,
            Value::Float(f) => *f as i32,
            Value::Double(d) => *d as i32,
            Value::Boolean(b) => i32::from(*b),
            Value::String(s) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Integer view used for array indexing; fractional or non-numeric values yield `None`.
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Value::Int32(i) => Some(*i as i64),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Double(d) if d.fract() == 0.0 => Some(*d as i64),
            _ => None,
        }
    }

    pub fn to_bool(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Int32(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Double(d) => *d != 0.0,
            Value::Boolean(b) => *b,
            Value::String(s) => !s.is_empty(),
            Value::Array(array) => !array.borrow().elements.is_empty(),
            _ => true,
        }
    }

    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => Ok(()),
            Value::Null => write!(f, "null"),
            Value::Int32(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::Double(n) => write!(f, "{}", n),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(array) => write!(f, "[{}]", array.borrow().elements.iter().join(", ")),
            Value::Ref(SlotRef::Instance { slot, .. }) => write!(f, "&slot{}", slot),
            Value::Ref(SlotRef::Global(index)) => write!(f, "&global{}", index),
            Value::FlowOutput(index) => write!(f, "&output{}", index),
            Value::NativeVariable(id) => write!(f, "&native{}", id),
            Value::ArrayElement { index, .. } => write!(f, "&element{}", index),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}

/// Serializable constant as stored in a flow asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Undefined,
    Null,
    Int32(i32),
    Float(f32),
    Double(f64),
    Boolean(bool),
    String(String),
    Array(Vec<Literal>),
}

impl Literal {
    /// Materializes a fresh runtime value; arrays get their own storage.
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Undefined => Value::Undefined,
            Literal::Null => Value::Null,
            Literal::Int32(i) => Value::Int32(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::Double(d) => Value::Double(*d),
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::String(s) => Value::string(s),
            Literal::Array(items) => Value::array(items.iter().map(Literal::to_value).collect()),
        }
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Literal::Int32(value)
    }
}

impl From<f32> for Literal {
    fn from(value: f32) -> Self {
        Literal::Float(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Double(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Boolean(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::String(value.to_string())
    }
}
