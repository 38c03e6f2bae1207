use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::name::element as names;
use crate::utils::DecodeError;

/// Payload value of an [`Element`], one variant per wire datatype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// No value set
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    Int32(i32),
    /// 64-bit integer
    Int64(i64),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    Float64(f64),
    /// UTF-8 string
    String(String),
    /// Point in time, always UTC
    Datetime(DateTime<Utc>),
    /// Ordered sequence; every entry carries the name of the array element
    Array(Vec<Element>),
    /// Nested named fields
    Complex(Vec<Element>),
}

impl Value {
    /// Datatype name used in decode errors.
    pub fn datatype(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Datetime(_) => "datetime",
            Value::Array(_) => "array",
            Value::Complex(_) => "complex",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Datetime(value)
    }
}

/// A named node of a message payload.
///
/// Scalars are read with the typed `as_*` accessors, which fail with
/// [`DecodeError::TypeMismatch`] instead of coercing between datatypes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    name: String,
    value: Value,
}

macro_rules! typed_accessors {
    ($(($as_fn:ident, $get_fn:ident, $variant:ident, $ty:ty, $label:literal)),* $(,)?) => {
        $(
            #[doc = concat!("Reads the value as ", $label, ".")]
            pub fn $as_fn(&self) -> Result<$ty, DecodeError> {
                match &self.value {
                    Value::$variant(v) => Ok(v.clone()),
                    other => Err(self.mismatch($label, other)),
                }
            }

            #[doc = concat!("Reads the child `name` as ", $label, ".")]
            pub fn $get_fn(&self, name: &str) -> Result<$ty, DecodeError> {
                self.get_element(name)?.$as_fn()
            }
        )*
    };
}

impl Element {
    /// Creates a scalar or pre-built element.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Creates an empty complex element.
    pub fn complex(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::Complex(Vec::new()),
        }
    }

    /// Creates an empty array element.
    pub fn array(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::Array(Vec::new()),
        }
    }

    /// Element name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Builder form of [`Element::set`] for complex elements.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push_child(Element::new(name, value));
        self
    }

    /// Builder form adding a nested element.
    #[must_use]
    pub fn with_element(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    /// Builder form of [`Element::append`] for array elements.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        let item = Element::new(self.name.clone(), value);
        if let Value::Array(items) = &mut self.value {
            items.push(item);
        }
        self
    }

    /// Builder form adding a pre-built entry (typically complex) to an array element.
    #[must_use]
    pub fn with_entry(mut self, entry: Element) -> Self {
        if matches!(self.value, Value::Null) {
            self.value = Value::Array(Vec::new());
        }
        if let Value::Array(items) = &mut self.value {
            items.push(entry);
        }
        self
    }

    /// Sets child `name`, replacing an existing child of the same name.
    ///
    /// A `Null` element becomes complex on first use.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), DecodeError> {
        if matches!(self.value, Value::Null) {
            self.value = Value::Complex(Vec::new());
        }
        let datatype = self.value.datatype();
        match &mut self.value {
            Value::Complex(children) => {
                let value = value.into();
                match children.iter_mut().find(|c| c.name == name) {
                    Some(child) => child.value = value,
                    None => children.push(Element::new(name, value)),
                }
                Ok(())
            }
            _ => Err(DecodeError::TypeMismatch {
                name: self.name.clone(),
                expected: "complex",
                actual: datatype,
            }),
        }
    }

    /// Appends a value to an array element. A `Null` element becomes an array.
    pub fn append(&mut self, value: impl Into<Value>) -> Result<(), DecodeError> {
        if matches!(self.value, Value::Null) {
            self.value = Value::Array(Vec::new());
        }
        let item = Element::new(self.name.clone(), value);
        let datatype = self.value.datatype();
        match &mut self.value {
            Value::Array(items) => {
                items.push(item);
                Ok(())
            }
            _ => Err(DecodeError::TypeMismatch {
                name: self.name.clone(),
                expected: "array",
                actual: datatype,
            }),
        }
    }

    /// Appends `value` to the array child `name`, creating the child if missing.
    pub fn append_to(&mut self, name: &str, value: impl Into<Value>) -> Result<(), DecodeError> {
        if !self.has_element(name) {
            self.set(name, Value::Array(Vec::new()))?;
        }
        self.get_element_mut(name)?.append(value)
    }

    /// Whether a direct child named `name` exists.
    pub fn has_element(&self, name: &str) -> bool {
        self.children().iter().any(|c| c.name == name)
    }

    /// Returns the direct child named `name`.
    pub fn get_element(&self, name: &str) -> Result<&Element, DecodeError> {
        self.children()
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| DecodeError::NotFound {
                name: name.to_string(),
            })
    }

    /// Mutable variant of [`Element::get_element`].
    pub fn get_element_mut(&mut self, name: &str) -> Result<&mut Element, DecodeError> {
        let missing = DecodeError::NotFound {
            name: name.to_string(),
        };
        match &mut self.value {
            Value::Complex(children) => children.iter_mut().find(|c| c.name == name).ok_or(missing),
            _ => Err(missing),
        }
    }

    /// Walks a `/` separated path of child names.
    pub fn get_path(&self, path: &str) -> Result<&Element, DecodeError> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |element, segment| element.get_element(segment))
    }

    /// Direct children of a complex element; empty for anything else.
    pub fn children(&self) -> &[Element] {
        match &self.value {
            Value::Complex(children) => children,
            _ => &[],
        }
    }

    /// Entries of an array element; empty for anything else.
    pub fn values(&self) -> &[Element] {
        match &self.value {
            Value::Array(items) => items,
            _ => &[],
        }
    }

    /// Number of array entries.
    pub fn num_values(&self) -> usize {
        self.values().len()
    }

    /// Array entry at `index`.
    pub fn get_value_at(&self, index: usize) -> Result<&Element, DecodeError> {
        let items = match &self.value {
            Value::Array(items) => items,
            other => return Err(self.mismatch("array", other)),
        };
        items.get(index).ok_or(DecodeError::IndexOutOfRange {
            name: self.name.clone(),
            index,
            len: items.len(),
        })
    }

    /// Whether the value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self.value, Value::Null)
    }

    typed_accessors!(
        (as_bool, get_as_bool, Bool, bool, "bool"),
        (as_i32, get_as_i32, Int32, i32, "int32"),
        (as_i64, get_as_i64, Int64, i64, "int64"),
        (as_f32, get_as_f32, Float32, f32, "float32"),
        (as_f64, get_as_f64, Float64, f64, "float64"),
        (as_datetime, get_as_datetime, Datetime, DateTime<Utc>, "datetime"),
    );

    /// Reads the value as a string slice.
    pub fn as_str(&self) -> Result<&str, DecodeError> {
        match &self.value {
            Value::String(v) => Ok(v),
            other => Err(self.mismatch("string", other)),
        }
    }

    /// Reads the child `name` as a string slice.
    pub fn get_as_str(&self, name: &str) -> Result<&str, DecodeError> {
        self.get_element(name)?.as_str()
    }

    fn push_child(&mut self, child: Element) {
        if matches!(self.value, Value::Null) {
            self.value = Value::Complex(Vec::new());
        }
        if let Value::Complex(children) = &mut self.value {
            children.push(child);
        }
    }

    fn mismatch(&self, expected: &'static str, actual: &Value) -> DecodeError {
        DecodeError::TypeMismatch {
            name: self.name.clone(),
            expected,
            actual: actual.datatype(),
        }
    }
}

/// Category and description extracted from an error block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error category, e.g. `BAD_SEC`
    pub category: String,
    /// Optional finer grained category
    pub subcategory: Option<String>,
    /// Human readable description
    pub description: String,
    /// Optional numeric code
    pub code: Option<i32>,
}

impl ErrorInfo {
    /// Reads an error block. Returns `None` when no category is present.
    ///
    /// The description is taken from `message`, falling back to `description`.
    pub fn from_element(element: &Element) -> Option<Self> {
        let category = element.get_as_str(names::CATEGORY).ok()?.to_string();
        let description = element
            .get_as_str(names::MESSAGE)
            .or_else(|_| element.get_as_str(names::DESCRIPTION))
            .unwrap_or_default()
            .to_string();
        Some(Self {
            category,
            subcategory: element
                .get_as_str(names::SUBCATEGORY)
                .ok()
                .map(str::to_string),
            description,
            code: element.get_as_i32(names::CODE).ok(),
        })
    }
}
