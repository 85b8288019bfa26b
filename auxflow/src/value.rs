//! Auxiliary and primary value representations.
//!
//! Auxiliary data travels as [`AuxValue`], a closed tagged union: one key
//! always carries one concrete payload kind, declared by the producer and
//! checked when the value is generated. The primary value flowing stage to
//! stage is type-erased into [`Payload`] and tagged with a [`ValueType`]
//! so the chain's input/output types can be verified at assembly time.

use crate::errors::TypeMismatchError;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::fmt;

/// Type tag for the concrete payload carried under an auxiliary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxKind {
    /// Boolean flag.
    Bool,
    /// Signed integer.
    Int,
    /// Floating-point number.
    Float,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Bytes,
    /// Structured JSON document.
    Json,
}

impl fmt::Display for AuxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::Text => f.write_str("text"),
            Self::Bytes => f.write_str("bytes"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// An auxiliary datum payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AuxValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Structured JSON document.
    Json(serde_json::Value),
}

impl AuxValue {
    /// Returns the kind tag of this value.
    #[must_use]
    pub fn kind(&self) -> AuxKind {
        match self {
            Self::Bool(_) => AuxKind::Bool,
            Self::Int(_) => AuxKind::Int,
            Self::Float(_) => AuxKind::Float,
            Self::Text(_) => AuxKind::Text,
            Self::Bytes(_) => AuxKind::Bytes,
            Self::Json(_) => AuxKind::Json,
        }
    }

    /// Returns the boolean payload, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the float payload, if this is a `Float`.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text payload, if this is a `Text`.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the byte payload, if this is a `Bytes`.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the JSON payload, if this is a `Json`.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for AuxValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AuxValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AuxValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for AuxValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for AuxValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<u8>> for AuxValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<serde_json::Value> for AuxValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

/// Runtime tag for a primary value type.
#[derive(Debug, Clone, Copy, Eq)]
pub struct ValueType {
    id: TypeId,
    name: &'static str,
}

impl ValueType {
    /// Returns the tag for a concrete type.
    #[must_use]
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns the type name for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The type-erased primary value passed between stages.
///
/// A multi-input chain head simply takes a tuple payload; the tuple is one
/// type as far as adjacency checking is concerned.
pub struct Payload {
    value: Box<dyn Any + Send>,
    ty: ValueType,
}

impl Payload {
    /// Wraps a concrete value.
    #[must_use]
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            value: Box::new(value),
            ty: ValueType::of::<T>(),
        }
    }

    /// Returns the runtime type tag of the wrapped value.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    /// Returns true if the wrapped value is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.ty == ValueType::of::<T>()
    }

    /// Borrows the wrapped value as a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Unwraps the payload into a `T`.
    ///
    /// # Errors
    ///
    /// Returns a [`TypeMismatchError`] naming both types when the payload
    /// holds something else.
    pub fn take<T: Any>(self) -> Result<T, TypeMismatchError> {
        let found = self.ty.name();
        self.value.downcast::<T>().map(|b| *b).map_err(|_| {
            TypeMismatchError {
                expected: std::any::type_name::<T>(),
                found,
            }
        })
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").field("type", &self.ty.name()).finish()
    }
}
