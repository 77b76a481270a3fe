//! Inspection results and their JSON encoding.
//!
//! Payloads are plain JSON values, except that [`Scope`] nodes are written as
//! objects tagged with `"__type__": "Scope"`:
//!
//! ```json
//! { "__type__": "Scope", "name": "root", "hidden": false, "entries": [42] }
//! ```
//!
//! `result.json` holds either `{"success": <payload>}` or
//! `{"error": {"message": "..."}}`.

use crate::error::CodecError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const TYPE_KEY: &str = "__type__";
const SCOPE_TAG: &str = "Scope";

/// A named, optionally hidden group of result entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub name: String,
    pub hidden: bool,
    pub entries: Vec<Payload>,
}

impl Scope {
    pub fn new(name: impl Into<String>, hidden: bool, entries: Vec<Payload>) -> Self {
        Self {
            name: name.into(),
            hidden,
            entries,
        }
    }
}

/// A decoded inspection payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Payload>),
    Object(BTreeMap<String, Payload>),
    Scope(Scope),
}

impl Payload {
    /// Encode as a JSON value, tagging scopes.
    pub fn to_value(&self) -> Value {
        match self {
            Payload::Null => Value::Null,
            Payload::Bool(b) => Value::Bool(*b),
            Payload::Number(n) => Value::Number(n.clone()),
            Payload::String(s) => Value::String(s.clone()),
            Payload::Array(items) => Value::Array(items.iter().map(Payload::to_value).collect()),
            Payload::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
            Payload::Scope(scope) => {
                let mut object = Map::new();
                object.insert(TYPE_KEY.to_string(), Value::from(SCOPE_TAG));
                object.insert("name".to_string(), Value::from(scope.name.clone()));
                object.insert("hidden".to_string(), Value::Bool(scope.hidden));
                object.insert(
                    "entries".to_string(),
                    Value::Array(scope.entries.iter().map(Payload::to_value).collect()),
                );
                Value::Object(object)
            }
        }
    }

    /// Decode a JSON value, rebuilding tagged scopes.
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        Ok(match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => Payload::Number(n),
            Value::String(s) => Payload::String(s),
            Value::Array(items) => Payload::Array(
                items
                    .into_iter()
                    .map(Payload::from_value)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(object) if is_scope(&object) => Payload::Scope(scope_from_object(object)?),
            Value::Object(object) => Payload::Object(
                object
                    .into_iter()
                    .map(|(k, v)| Ok((k, Payload::from_value(v)?)))
                    .collect::<Result<_, CodecError>>()?,
            ),
        })
    }
}

fn is_scope(object: &Map<String, Value>) -> bool {
    object.get(TYPE_KEY).and_then(Value::as_str) == Some(SCOPE_TAG)
}

fn scope_from_object(mut object: Map<String, Value>) -> Result<Scope, CodecError> {
    let name = match object.remove("name") {
        Some(Value::String(name)) => name,
        _ => return Err(CodecError::Malformed("scope without a string name".into())),
    };
    let hidden = match object.remove("hidden") {
        None => false,
        Some(Value::Bool(hidden)) => hidden,
        Some(_) => {
            return Err(CodecError::Malformed(format!(
                "scope '{name}' has a non-boolean hidden flag"
            )))
        }
    };
    let entries = match object.remove("entries") {
        None => Vec::new(),
        Some(Value::Array(entries)) => entries
            .into_iter()
            .map(Payload::from_value)
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(CodecError::Malformed(format!(
                "scope '{name}' entries are not a list"
            )))
        }
    };
    Ok(Scope {
        name,
        hidden,
        entries,
    })
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Payload::from_value(value).map_err(D::Error::custom)
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Number(n.into())
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::String(s.to_string())
    }
}

impl From<Scope> for Payload {
    fn from(scope: Scope) -> Self {
        Payload::Scope(scope)
    }
}

pub fn serialize(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(&payload.to_value())?)
}

pub fn deserialize(bytes: &[u8]) -> Result<Payload, CodecError> {
    Payload::from_value(parse_value(bytes)?)
}

/// Parse JSON of any nesting depth; deep input grows the stack on the heap.
fn parse_value(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut json = serde_json::Deserializer::from_slice(bytes);
    json.disable_recursion_limit();
    let value = Value::deserialize(serde_stacker::Deserializer::new(&mut json))?;
    json.end()?;
    Ok(value)
}

/// Top-level content of `result.json`.
#[derive(Debug, Clone, PartialEq)]
pub enum InspectionReport {
    Success(Payload),
    Error { message: String },
}

impl InspectionReport {
    /// Decode `result.json`. An `error` key wins over `success`.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let Value::Object(mut object) = parse_value(bytes)? else {
            return Err(CodecError::Malformed("result is not an object".into()));
        };

        if let Some(error) = object.remove("error") {
            let message = match error {
                Value::Object(mut fields) => match fields.remove("message") {
                    Some(Value::String(message)) => message,
                    Some(other) => other.to_string(),
                    None => "inspection reported an error".to_string(),
                },
                Value::String(message) => message,
                other => other.to_string(),
            };
            return Ok(Self::Error { message });
        }

        match object.remove("success") {
            Some(payload) => Ok(Self::Success(Payload::from_value(payload)?)),
            None => Err(CodecError::Malformed(
                "result has neither 'success' nor 'error'".into(),
            )),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let value = match self {
            Self::Success(payload) => serde_json::json!({ "success": payload.to_value() }),
            Self::Error { message } => serde_json::json!({ "error": { "message": message } }),
        };
        Ok(serde_json::to_vec_pretty(&value)?)
    }
}
