//! Numbered-field binary layout for persisted records.
//!
//! A record is one type-id byte followed by its field map in bincode's
//! standard encoding:
//!
//! ```text
//! [type id: u8] [bincode: BTreeMap<field number: u8, Value>]
//! ```
//!
//! Field numbers are stable per record type. Decoders look fields up by number,
//! so a field added later simply reads as its type default on older data, and a
//! field unknown to the decoder is skipped.

use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use thiserror::Error;

/// Upper bound on one encoded record, checked while decoding.
const MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("empty record")]
    Empty,
    #[error("type id mismatch: expected {expected}, found {found}")]
    WrongTypeId { expected: u8, found: u8 },
    #[error("field {field} is not a {expected}")]
    TypeMismatch { field: u8, expected: &'static str },
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    List(Vec<Value>),
    Object(Fields),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        v.map_or(Value::Null, Value::Str)
    }
}

impl From<Fields> for Value {
    fn from(v: Fields) -> Self {
        Value::Object(v)
    }
}

impl From<Vec<Fields>> for Value {
    fn from(v: Vec<Fields>) -> Self {
        Value::List(v.into_iter().map(Value::Object).collect())
    }
}

/// Field map of one record (or nested object), keyed by field number.
#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct Fields(BTreeMap<u8, Value>);

impl Fields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, field: u8, value: impl Into<Value>) -> Self {
        self.0.insert(field, value.into());
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn contains(&self, field: u8) -> bool {
        self.0.contains_key(&field)
    }

    fn present(&self, field: u8) -> Option<&Value> {
        match self.0.get(&field) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v),
        }
    }

    pub fn int(&self, field: u8) -> Result<i64, CodecError> {
        match self.present(field) {
            None => Ok(0),
            Some(Value::Int(v)) => Ok(*v),
            Some(_) => Err(CodecError::TypeMismatch {
                field,
                expected: "int",
            }),
        }
    }

    /// Doubles also accept stored ints, so a field can widen from int to
    /// double without a migration.
    #[allow(clippy::cast_precision_loss)]
    pub fn double(&self, field: u8) -> Result<f64, CodecError> {
        match self.present(field) {
            None => Ok(0.0),
            Some(Value::Double(v)) => Ok(*v),
            Some(Value::Int(v)) => Ok(*v as f64),
            Some(_) => Err(CodecError::TypeMismatch {
                field,
                expected: "double",
            }),
        }
    }

    pub fn bool(&self, field: u8) -> Result<bool, CodecError> {
        match self.present(field) {
            None => Ok(false),
            Some(Value::Bool(v)) => Ok(*v),
            Some(_) => Err(CodecError::TypeMismatch {
                field,
                expected: "bool",
            }),
        }
    }

    pub fn string(&self, field: u8) -> Result<String, CodecError> {
        Ok(self.opt_string(field)?.unwrap_or_default())
    }

    pub fn opt_string(&self, field: u8) -> Result<Option<String>, CodecError> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::Str(v)) => Ok(Some(v.clone())),
            Some(_) => Err(CodecError::TypeMismatch {
                field,
                expected: "string",
            }),
        }
    }

    pub fn opt_int(&self, field: u8) -> Result<Option<i64>, CodecError> {
        match self.present(field) {
            None => Ok(None),
            Some(_) => self.int(field).map(Some),
        }
    }

    pub fn object(&self, field: u8) -> Result<Fields, CodecError> {
        match self.present(field) {
            None => Ok(Fields::new()),
            Some(Value::Object(v)) => Ok(v.clone()),
            Some(_) => Err(CodecError::TypeMismatch {
                field,
                expected: "object",
            }),
        }
    }

    /// A list of nested objects; a missing field is an empty list.
    pub fn objects(&self, field: u8) -> Result<Vec<Fields>, CodecError> {
        match self.present(field) {
            None => Ok(Vec::new()),
            Some(Value::List(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Object(f) => Ok(f.clone()),
                    _ => Err(CodecError::TypeMismatch {
                        field,
                        expected: "list of objects",
                    }),
                })
                .collect(),
            Some(_) => Err(CodecError::TypeMismatch {
                field,
                expected: "list",
            }),
        }
    }
}

// --- Encoding ---

fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<MAX_RECORD_BYTES>()
}

pub fn encode_record(type_id: u8, fields: &Fields) -> Result<Vec<u8>, CodecError> {
    let body = bincode::encode_to_vec(fields, config())
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    let mut buf = Vec::with_capacity(body.len() + 1);
    buf.push(type_id);
    buf.extend_from_slice(&body);
    Ok(buf)
}

// --- Decoding ---

pub fn decode_record(type_id: u8, bytes: &[u8]) -> Result<Fields, CodecError> {
    let (&found, body) = bytes.split_first().ok_or(CodecError::Empty)?;
    if found != type_id {
        return Err(CodecError::WrongTypeId {
            expected: type_id,
            found,
        });
    }
    let (fields, read) = bincode::decode_from_slice::<Fields, _>(body, config())
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    if read < body.len() {
        return Err(CodecError::TrailingBytes(body.len() - read));
    }
    Ok(fields)
}
