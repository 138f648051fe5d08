//! Test fixtures: plain Rust values standing in for a dynamic runtime, and a
//! line-oriented scripting engine to drive the worker without an interpreter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::decode::Decoder;
use crate::format::node::{float_to_string, parse_float};
use crate::format::{Encoder, FormatSpec, RefFormat, Registry, SharedFormat};
use crate::refs::RefTable;
use crate::scope::ScopePath;
use crate::value::{
    ArrayCapabilities, BufferView, Class, Construct, HostError, HostValue, Integer, MimePayload,
};
use crate::worker::{Engine, ExecError, Execution};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Native {
    None,
    Bool(bool),
    Int(Integer),
    Float(f64),
    Rational(Integer, Integer),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Native>),
    Tuple(Vec<Native>),
    Set(Vec<Native>),
    Dict(Vec<(Native, Native)>),
    /// Numeric array exporting a column-major buffer.
    Array(BufferView),
    /// Renders itself as `image/png`.
    Picture(Vec<u8>),
    /// Anything without a structural encoding.
    Opaque(String),
}

pub(crate) fn native_encoder() -> Encoder<Native> {
    Encoder::new(
        Arc::new(RefTable::new()),
        Arc::new(Registry::new().with_extensions()),
    )
}

fn small(n: &Integer) -> Option<i64> {
    match n {
        Integer::Small(n) => Some(*n),
        Integer::Big(_) => None,
    }
}

fn join(items: &[Native], open: &str, close: &str) -> Result<String, HostError> {
    let parts = items
        .iter()
        .map(Native::to_str)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("{open}{}{close}", parts.join(", ")))
}

impl HostValue for Native {
    fn share(&self) -> Self {
        self.clone()
    }

    fn type_name(&self) -> String {
        let name = match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Rational(..) => "Fraction",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Set(_) => "set",
            Self::Dict(_) => "dict",
            Self::Array(_) => "ndarray",
            Self::Picture(_) => "Picture",
            Self::Opaque(name) => name.as_str(),
        };
        name.to_string()
    }

    fn is_instance(&self, class: Class) -> Result<bool, HostError> {
        Ok(match class {
            Class::None => matches!(self, Self::None),
            Class::Bool => matches!(self, Self::Bool(_)),
            Class::Str => matches!(self, Self::Str(_)),
            Class::Integral => matches!(self, Self::Bool(_) | Self::Int(_)),
            Class::Float => matches!(self, Self::Float(_)),
            Class::Rational => matches!(self, Self::Bool(_) | Self::Int(_) | Self::Rational(..)),
            Class::Bytes => matches!(self, Self::Bytes(_)),
            Class::Mapping => matches!(self, Self::Dict(_)),
            Class::Sequence => matches!(
                self,
                Self::Str(_) | Self::Bytes(_) | Self::List(_) | Self::Tuple(_)
            ),
            Class::Set => matches!(self, Self::Set(_)),
            Class::Tuple => matches!(self, Self::Tuple(_)),
        })
    }

    fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    fn to_bool(&self) -> Result<bool, HostError> {
        Ok(match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(n) => !n.is_zero(),
            Self::Float(x) => *x != 0.0,
            Self::Rational(n, _) => !n.is_zero(),
            Self::Str(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::List(items) | Self::Tuple(items) | Self::Set(items) => !items.is_empty(),
            Self::Dict(entries) => !entries.is_empty(),
            Self::Array(_) | Self::Picture(_) | Self::Opaque(_) => true,
        })
    }

    fn to_str(&self) -> Result<String, HostError> {
        Ok(match self {
            Self::None => "None".to_string(),
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(x) => float_to_string(*x),
            Self::Rational(n, d) => format!("{n}/{d}"),
            Self::Str(s) => s.clone(),
            Self::Bytes(b) => format!("b'{}'", String::from_utf8_lossy(b)),
            Self::List(items) => join(items, "[", "]")?,
            Self::Tuple(items) => join(items, "(", ")")?,
            Self::Set(items) => join(items, "{", "}")?,
            Self::Dict(entries) => {
                let parts = entries
                    .iter()
                    .map(|(k, v)| Ok(format!("{}: {}", k.to_str()?, v.to_str()?)))
                    .collect::<Result<Vec<_>, HostError>>()?;
                format!("{{{}}}", parts.join(", "))
            }
            Self::Array(_) | Self::Picture(_) | Self::Opaque(_) => format!("<{}>", self.type_name()),
        })
    }

    fn to_int(&self) -> Result<Integer, HostError> {
        match self {
            Self::Bool(b) => Ok(Integer::Small(i64::from(*b))),
            Self::Int(n) => Ok(n.clone()),
            Self::Float(x) if x.is_nan() => Err(HostError::other(
                "ValueError",
                "cannot convert float NaN to integer",
            )),
            Self::Float(x) if x.is_infinite() => Err(HostError::other(
                "OverflowError",
                "cannot convert float infinity to integer",
            )),
            Self::Float(x) => {
                let t = x.trunc();
                if t.abs() < 9.0e18 {
                    Ok(Integer::Small(t as i64))
                } else {
                    Ok(Integer::Big(format!("{t:.0}")))
                }
            }
            Self::Rational(n, d) => match (small(n), small(d)) {
                (_, Some(0)) => Err(HostError::domain("ZeroDivisionError", "division by zero")),
                (Some(n), Some(d)) => Ok(Integer::Small(n / d)),
                _ => Err(HostError::other("OverflowError", "rational too large")),
            },
            Self::Str(s) => Integer::parse(s).ok_or_else(|| {
                HostError::other(
                    "ValueError",
                    format!("invalid literal for int() with base 10: '{s}'"),
                )
            }),
            other => Err(HostError::type_error(format!(
                "int() argument must be a string or a number, not '{}'",
                other.type_name()
            ))),
        }
    }

    fn to_float(&self) -> Result<f64, HostError> {
        match self {
            Self::Bool(b) => Ok(f64::from(u8::from(*b))),
            Self::Int(Integer::Small(n)) => Ok(*n as f64),
            Self::Int(Integer::Big(s)) => parse_float(s)
                .ok_or_else(|| HostError::other("OverflowError", "int too large to convert")),
            Self::Float(x) => Ok(*x),
            Self::Rational(n, d) => match (small(n), small(d)) {
                (_, Some(0)) => Err(HostError::domain("ZeroDivisionError", "division by zero")),
                (Some(n), Some(d)) => Ok(n as f64 / d as f64),
                _ => Err(HostError::other("OverflowError", "rational too large")),
            },
            Self::Str(s) => parse_float(s).ok_or_else(|| {
                HostError::other("ValueError", format!("could not convert string to float: '{s}'"))
            }),
            other => Err(HostError::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))),
        }
    }

    fn to_rational(&self) -> Result<(Integer, Integer), HostError> {
        match self {
            Self::Bool(_) | Self::Int(_) => Ok((self.to_int()?, Integer::Small(1))),
            Self::Rational(n, d) => Ok((n.clone(), d.clone())),
            other => Err(HostError::type_error(format!(
                "'{}' is not a rational number",
                other.type_name()
            ))),
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>, HostError> {
        match self {
            Self::Bytes(b) => Ok(b.clone()),
            Self::List(items) | Self::Tuple(items) => items
                .iter()
                .map(|item| match item {
                    Self::Int(Integer::Small(n)) => u8::try_from(*n).map_err(|_| {
                        HostError::other("ValueError", "bytes must be in range(0, 256)")
                    }),
                    other => Err(HostError::type_error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        other.type_name()
                    ))),
                })
                .collect(),
            other => Err(HostError::type_error(format!(
                "cannot convert '{}' object to bytes",
                other.type_name()
            ))),
        }
    }

    fn items(&self) -> Result<Vec<(Self, Self)>, HostError> {
        match self {
            Self::Dict(entries) => Ok(entries.clone()),
            other => Err(HostError::type_error(format!(
                "'{}' object is not a mapping",
                other.type_name()
            ))),
        }
    }

    fn elements(&self) -> Result<Vec<Self>, HostError> {
        match self {
            Self::List(items) | Self::Tuple(items) | Self::Set(items) => Ok(items.clone()),
            Self::Str(s) => Ok(s.chars().map(|c| Self::Str(c.to_string())).collect()),
            Self::Bytes(b) => Ok(b.iter().map(|&n| Self::Int(i64::from(n).into())).collect()),
            Self::Dict(entries) => Ok(entries.iter().map(|(k, _)| k.clone()).collect()),
            other => Err(HostError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    fn buffer(&self) -> Result<Option<BufferView>, HostError> {
        Ok(match self {
            Self::Bytes(b) => Some(BufferView::bytes(b.clone())),
            Self::Array(view) => Some(view.clone()),
            _ => None,
        })
    }

    fn array_capabilities(&self) -> Result<ArrayCapabilities, HostError> {
        Ok(ArrayCapabilities {
            array: matches!(self, Self::Array(_)),
            interface: matches!(self, Self::Array(_)),
            structure: false,
        })
    }

    fn export_array(&self) -> Result<Option<BufferView>, HostError> {
        Ok(match self {
            Self::Array(view) => Some(view.clone()),
            _ => None,
        })
    }

    fn render(&self, mime: &str) -> Result<Option<MimePayload>, HostError> {
        Ok(match self {
            Self::Picture(data) if mime == "image/png" => Some(MimePayload::Binary(data.clone())),
            _ => None,
        })
    }
}

impl Construct for Native {
    fn none() -> Result<Self, HostError> {
        Ok(Self::None)
    }

    fn from_bool(value: bool) -> Result<Self, HostError> {
        Ok(Self::Bool(value))
    }

    fn from_int(value: Integer) -> Result<Self, HostError> {
        Ok(Self::Int(value))
    }

    fn from_float(value: f64) -> Result<Self, HostError> {
        Ok(Self::Float(value))
    }

    fn from_str(value: &str) -> Result<Self, HostError> {
        Ok(Self::Str(value.to_string()))
    }

    fn tuple(items: Vec<Self>) -> Result<Self, HostError> {
        Ok(Self::Tuple(items))
    }

    fn list(items: Vec<Self>) -> Result<Self, HostError> {
        Ok(Self::List(items))
    }

    fn dict(entries: Vec<(Self, Self)>) -> Result<Self, HostError> {
        Ok(Self::Dict(entries))
    }
}

/// Engine interpreting a tiny line language over [`Native`] values:
///
/// ```text
/// let NAME = <wire json>
/// ret NAME [as <format spec json>]
/// ret_ref NAME
/// raise KIND MESSAGE
/// ```
pub(crate) struct ScriptEngine;

impl Engine for ScriptEngine {
    type Value = Native;
    type Namespace = Mutex<HashMap<String, Native>>;

    fn create_namespace(&self, path: &ScopePath) -> Result<Self::Namespace, ExecError> {
        if path.path().is_empty() {
            return Err(ExecError::new("ValueError", "Empty module name"));
        }
        Ok(Mutex::new(HashMap::new()))
    }

    fn execute(&self, execution: Execution<'_, Self>) -> Result<(), ExecError> {
        let Execution {
            namespace,
            code,
            locals,
            encoder,
            slot,
        } = execution;
        let mut guard = namespace.lock().unwrap();
        let globals: &mut HashMap<String, Native> = &mut guard;
        let mut locals: Option<HashMap<String, Native>> = locals.map(|l| l.into_iter().collect());

        let lookup = |name: &str, locals: &Option<HashMap<String, Native>>, globals: &HashMap<String, Native>| {
            locals
                .as_ref()
                .and_then(|l| l.get(name))
                .or_else(|| globals.get(name))
                .cloned()
                .ok_or_else(|| ExecError::new("NameError", format!("name '{name}' is not defined")))
        };

        for line in code.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (op, rest) = line.split_once(' ').unwrap_or((line, ""));
            match op {
                "let" => {
                    let (name, wire) = rest
                        .split_once('=')
                        .ok_or_else(|| ExecError::new("SyntaxError", line))?;
                    let wire: serde_json::Value = serde_json::from_str(wire.trim())
                        .map_err(|e| ExecError::new("SyntaxError", e.to_string()))?;
                    let value = Decoder::new(encoder.refs()).decode(&wire)?;
                    let target = match locals.as_mut() {
                        Some(locals) => locals,
                        None => &mut *globals,
                    };
                    target.insert(name.trim().to_string(), value);
                }
                "ret" => {
                    let (name, spec) = match rest.split_once(" as ") {
                        Some((name, spec)) => (name, Some(spec)),
                        None => (rest, None),
                    };
                    let value = lookup(name.trim(), &locals, &*globals)?;
                    let format: Option<SharedFormat<Native>> = match spec {
                        Some(spec) => {
                            let spec: serde_json::Value = serde_json::from_str(spec)
                                .map_err(|e| ExecError::new("SyntaxError", e.to_string()))?;
                            Some(encoder.registry().build(&FormatSpec::parse(&spec)?)?)
                        }
                        None => None,
                    };
                    slot.fill(encoder.encode(&value, format.as_ref())?);
                    return Ok(());
                }
                "ret_ref" => {
                    let value = lookup(rest.trim(), &locals, &*globals)?;
                    let format: SharedFormat<Native> = Arc::new(RefFormat);
                    slot.fill(encoder.encode(&value, Some(&format))?);
                    return Ok(());
                }
                "raise" => {
                    let (kind, message) = rest.split_once(' ').unwrap_or((rest, ""));
                    return Err(ExecError::new(kind, message));
                }
                _ => return Err(ExecError::new("SyntaxError", format!("invalid syntax: {line}"))),
            }
        }
        Ok(())
    }
}
