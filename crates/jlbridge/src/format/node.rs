//! Format Node: the tagged wire value produced by encoding.
//!
//! Scalars that JSON represents exactly (null, booleans, strings, small
//! integers) are written natively. Everything else is boxed as
//! `{"t": <tag>, "v": <payload>}` so that every node is self-describing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::value::{BufferView, INLINE_INT_LIMIT};

#[derive(Debug, Clone, PartialEq)]
pub struct BufferNode {
    pub format: String,
    pub itemsize: usize,
    pub shape: Vec<usize>,
    /// Column-major payload.
    pub data: Vec<u8>,
}

impl BufferNode {
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn nbytes(&self) -> usize {
        self.data.len()
    }
}

impl From<BufferView> for BufferNode {
    fn from(view: BufferView) -> Self {
        Self {
            format: view.format,
            itemsize: view.itemsize,
            shape: view.shape,
            data: view.data,
        }
    }
}

impl Serialize for BufferNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("BufferNode", 6)?;
        s.serialize_field("format", &self.format)?;
        s.serialize_field("itemsize", &self.itemsize)?;
        s.serialize_field("nbytes", &self.nbytes())?;
        s.serialize_field("ndim", &self.ndim())?;
        s.serialize_field("shape", &self.shape)?;
        s.serialize_field("data", &STANDARD.encode(&self.data))?;
        s.end()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormatNode {
    Null,
    Bool(bool),
    Str(String),
    /// Inlined integer, |n| < 2^20.
    Int(i64),
    /// Decimal string.
    BigInt(String),
    Rational {
        numerator: String,
        denominator: String,
    },
    /// Decimal string; `inf`, `-inf` and `nan` for non-finite values.
    Float(String),
    Bytes(Vec<u8>),
    Buffer(BufferNode),
    Dict(Vec<(FormatNode, FormatNode)>),
    List(Vec<FormatNode>),
    Set(Vec<FormatNode>),
    Tuple(Vec<FormatNode>),
    Media {
        mime: String,
        data: Vec<u8>,
    },
    Ref(String),
}

impl FormatNode {
    /// Wire tag of boxed variants; `None` for natively written scalars.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            Self::Null | Self::Bool(_) | Self::Str(_) | Self::Int(_) => None,
            Self::BigInt(_) => Some("int"),
            Self::Rational { .. } => Some("rational"),
            Self::Float(_) => Some("float"),
            Self::Bytes(_) => Some("bytes"),
            Self::Buffer(_) => Some("buffer"),
            Self::Dict(_) => Some("dict"),
            Self::List(_) => Some("list"),
            Self::Set(_) => Some("set"),
            Self::Tuple(_) => Some("tuple"),
            Self::Media { .. } => Some("media"),
            Self::Ref(_) => Some("ref"),
        }
    }

    pub fn to_json(&self) -> Value {
        // Serializing into a Value cannot fail: every key is a string.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for FormatNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        fn boxed<S: Serializer, T: Serialize + ?Sized>(
            serializer: S,
            tag: &str,
            value: &T,
        ) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(2))?;
            map.serialize_entry("t", tag)?;
            map.serialize_entry("v", value)?;
            map.end()
        }

        #[derive(Serialize)]
        struct MediaPayload<'a> {
            mime: &'a str,
            data: String,
        }

        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Str(s) => serializer.serialize_str(s),
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::BigInt(s) => boxed(serializer, "int", s),
            Self::Rational {
                numerator,
                denominator,
            } => boxed(serializer, "rational", &[numerator, denominator]),
            Self::Float(s) => boxed(serializer, "float", s),
            Self::Bytes(b) => boxed(serializer, "bytes", &STANDARD.encode(b)),
            Self::Buffer(buf) => boxed(serializer, "buffer", buf),
            Self::Dict(entries) => boxed(serializer, "dict", entries),
            Self::List(items) => boxed(serializer, "list", items),
            Self::Set(items) => boxed(serializer, "set", items),
            Self::Tuple(items) => boxed(serializer, "tuple", items),
            Self::Media { mime, data } => boxed(
                serializer,
                "media",
                &MediaPayload {
                    mime,
                    data: STANDARD.encode(data),
                },
            ),
            Self::Ref(handle) => boxed(serializer, "ref", handle),
        }
    }
}

/// Errors from re-parsing a wire value into a [`FormatNode`].
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("expected a format node, got {0}")]
    Shape(String),
    #[error("unknown format tag '{0}'")]
    UnknownTag(String),
    #[error("malformed '{tag}' payload: {reason}")]
    Payload { tag: String, reason: String },
}

impl NodeError {
    fn payload(tag: &str, reason: impl Into<String>) -> Self {
        Self::Payload {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }
}

impl<'de> Deserialize<'de> for FormatNode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        FormatNode::try_from(&value).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<&Value> for FormatNode {
    type Error = NodeError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::String(s) => Ok(Self::Str(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) if i.unsigned_abs() < INLINE_INT_LIMIT => Ok(Self::Int(i)),
                _ => Err(NodeError::Shape(format!("non-inline number {n}"))),
            },
            Value::Object(map) => {
                let tag = map
                    .get("t")
                    .and_then(Value::as_str)
                    .ok_or_else(|| NodeError::Shape("object without 't'".to_string()))?;
                let payload = map
                    .get("v")
                    .ok_or_else(|| NodeError::payload(tag, "missing 'v'"))?;
                parse_boxed(tag, payload)
            }
            Value::Array(_) => Err(NodeError::Shape("bare array".to_string())),
        }
    }
}

fn parse_boxed(tag: &str, v: &Value) -> Result<FormatNode, NodeError> {
    let string = |v: &Value| -> Result<String, NodeError> {
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| NodeError::payload(tag, "expected a string"))
    };
    let base64 = |v: &Value| -> Result<Vec<u8>, NodeError> {
        let text = v
            .as_str()
            .ok_or_else(|| NodeError::payload(tag, "expected base64 text"))?;
        STANDARD
            .decode(text)
            .map_err(|e| NodeError::payload(tag, e.to_string()))
    };
    let items = |v: &Value| -> Result<Vec<FormatNode>, NodeError> {
        v.as_array()
            .ok_or_else(|| NodeError::payload(tag, "expected an array"))?
            .iter()
            .map(FormatNode::try_from)
            .collect()
    };

    match tag {
        "int" => Ok(FormatNode::BigInt(string(v)?)),
        "float" => Ok(FormatNode::Float(string(v)?)),
        "rational" => match v.as_array().map(Vec::as_slice) {
            Some([num, den]) => Ok(FormatNode::Rational {
                numerator: string(num)?,
                denominator: string(den)?,
            }),
            _ => Err(NodeError::payload(tag, "expected [numerator, denominator]")),
        },
        "bytes" => Ok(FormatNode::Bytes(base64(v)?)),
        "buffer" => {
            let field = |name: &str| {
                v.get(name)
                    .ok_or_else(|| NodeError::payload(tag, format!("missing '{name}'")))
            };
            let usize_of = |value: &Value| {
                value
                    .as_u64()
                    .map(|n| n as usize)
                    .ok_or_else(|| NodeError::payload(tag, "expected an unsigned integer"))
            };
            let shape = field("shape")?
                .as_array()
                .ok_or_else(|| NodeError::payload(tag, "expected a shape array"))?
                .iter()
                .map(usize_of)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FormatNode::Buffer(BufferNode {
                format: string(field("format")?)?,
                itemsize: usize_of(field("itemsize")?)?,
                shape,
                data: base64(field("data")?)?,
            }))
        }
        "dict" => {
            let entries = v
                .as_array()
                .ok_or_else(|| NodeError::payload(tag, "expected an array of pairs"))?
                .iter()
                .map(|pair| match pair.as_array().map(Vec::as_slice) {
                    Some([k, v]) => Ok((FormatNode::try_from(k)?, FormatNode::try_from(v)?)),
                    _ => Err(NodeError::payload(tag, "expected a [key, value] pair")),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FormatNode::Dict(entries))
        }
        "list" => Ok(FormatNode::List(items(v)?)),
        "set" => Ok(FormatNode::Set(items(v)?)),
        "tuple" => Ok(FormatNode::Tuple(items(v)?)),
        "media" => {
            let mime = v
                .get("mime")
                .ok_or_else(|| NodeError::payload(tag, "missing 'mime'"))?;
            let data = v
                .get("data")
                .ok_or_else(|| NodeError::payload(tag, "missing 'data'"))?;
            Ok(FormatNode::Media {
                mime: string(mime)?,
                data: base64(data)?,
            })
        }
        "ref" => Ok(FormatNode::Ref(string(v)?)),
        other => Err(NodeError::UnknownTag(other.to_string())),
    }
}

/// Decimal text of a float, preserving non-finite values.
pub fn float_to_string(x: f64) -> String {
    if x.is_nan() {
        "nan".to_string()
    } else if x.is_infinite() {
        let text = if x > 0.0 { "inf" } else { "-inf" };
        text.to_string()
    } else {
        // Debug prints the shortest representation that round-trips.
        format!("{x:?}")
    }
}

/// Inverse of [`float_to_string`]; also accepts `infinity` spellings.
pub fn parse_float(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}
