//! Wire → runtime decoding of run arguments.
//!
//! The host only ever sends a small subset of the format: native scalars,
//! boxed `int`/`float`, `tuple`/`list`/`dict` containers, and references
//! back into the table. Anything else is a contract violation.

use serde_json::{Map, Number, Value};

use crate::format::node::parse_float;
use crate::refs::RefTable;
use crate::value::{Construct, HostError, Integer};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown reference '{0}'")]
    UnknownReference(String),

    #[error("cannot decode {0}")]
    Unsupported(String),

    #[error(transparent)]
    Host(#[from] HostError),
}

pub struct Decoder<'a, V> {
    refs: &'a RefTable<V>,
}

impl<'a, V: Construct> Decoder<'a, V> {
    pub fn new(refs: &'a RefTable<V>) -> Self {
        Self { refs }
    }

    /// Decode a locals object into `(name, value)` pairs.
    pub fn decode_locals(&self, locals: &Map<String, Value>) -> Result<Vec<(String, V)>, DecodeError> {
        locals
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.decode(value)?)))
            .collect()
    }

    pub fn decode(&self, value: &Value) -> Result<V, DecodeError> {
        match value {
            Value::Null => Ok(V::none()?),
            Value::Bool(b) => Ok(V::from_bool(*b)?),
            Value::String(s) => Ok(V::from_str(s)?),
            Value::Number(n) => Ok(V::from_int(integer(n)?)?),
            Value::Object(map) => self.decode_boxed(map),
            Value::Array(_) => Err(DecodeError::Unsupported("a bare array".to_string())),
        }
    }

    fn decode_boxed(&self, map: &Map<String, Value>) -> Result<V, DecodeError> {
        let (Some(Value::String(tag)), Some(payload)) = (map.get("t"), map.get("v")) else {
            return Err(DecodeError::Unsupported(
                "an object without 't' and 'v'".to_string(),
            ));
        };
        let unsupported = || DecodeError::Unsupported(format!("a malformed '{tag}' value"));

        match tag.as_str() {
            "ref" => {
                let handle = payload.as_str().ok_or_else(unsupported)?;
                self.refs
                    .get(handle)
                    .ok_or_else(|| DecodeError::UnknownReference(handle.to_string()))
            }
            "tuple" => Ok(V::tuple(self.decode_items(payload).ok_or_else(unsupported)??)?),
            "list" => Ok(V::list(self.decode_items(payload).ok_or_else(unsupported)??)?),
            "int" => {
                let value = match payload {
                    Value::String(s) => Integer::parse(s).ok_or_else(unsupported)?,
                    Value::Number(n) => integer(n)?,
                    _ => return Err(unsupported()),
                };
                Ok(V::from_int(value)?)
            }
            "float" => {
                let value = match payload {
                    Value::String(s) => parse_float(s).ok_or_else(unsupported)?,
                    Value::Number(n) => n.as_f64().ok_or_else(unsupported)?,
                    _ => return Err(unsupported()),
                };
                Ok(V::from_float(value)?)
            }
            "dict" => {
                let pairs = payload.as_array().ok_or_else(unsupported)?;
                let entries = pairs
                    .iter()
                    .map(|pair| match pair.as_array().map(Vec::as_slice) {
                        Some([k, v]) => Ok((self.decode(k)?, self.decode(v)?)),
                        _ => Err(unsupported()),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(V::dict(entries)?)
            }
            other => Err(DecodeError::Unsupported(format!("tag '{other}'"))),
        }
    }

    fn decode_items(&self, payload: &Value) -> Option<Result<Vec<V>, DecodeError>> {
        let items = payload.as_array()?;
        Some(items.iter().map(|item| self.decode(item)).collect())
    }
}

fn integer(n: &Number) -> Result<Integer, DecodeError> {
    if let Some(i) = n.as_i64() {
        Ok(Integer::Small(i))
    } else if let Some(u) = n.as_u64() {
        Ok(Integer::Big(u.to_string()))
    } else if let Some(big) = Integer::parse(&n.to_string()) {
        // Numbers keep their literal text, so wide integers arrive intact.
        Ok(big)
    } else {
        Err(DecodeError::Unsupported(format!("the non-integer number {n}")))
    }
}
