//! Capability surface of runtime values.
//!
//! The encoder never sees a concrete interpreter. It talks to runtime values
//! through [`HostValue`] (inspection, used by formatters) and [`Construct`]
//! (construction, used by the decoder). An engine implements both for its
//! own object handle type.
//!
//! Checks for optional domain libraries (array exports, rich display, figure
//! rendering) have default implementations that report "not supported", so a
//! value type only implements the capabilities it actually has.

use std::any::Any;
use std::fmt;

/// Integers below this magnitude are inlined as native wire integers.
pub const INLINE_INT_LIMIT: u64 = 1 << 20;

/// Arbitrary-precision integer as seen on the wire.
///
/// `Small` holds every value that fits an `i64`; `Big` holds the canonical
/// decimal form of anything larger (optional leading `-`, no leading zeros).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Integer {
    Small(i64),
    Big(String),
}

impl Integer {
    /// Parse a decimal integer literal.
    ///
    /// Accepts an optional sign and ASCII digits. Values that fit an `i64`
    /// always come back as `Small`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<i64>() {
            return Some(Self::Small(n));
        }

        let (negative, digits) = match s.as_bytes().first()? {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let digits = digits.trim_start_matches('0');
        if digits.is_empty() {
            return Some(Self::Small(0));
        }
        let canonical = if negative {
            format!("-{digits}")
        } else {
            digits.to_string()
        };
        // Leading zeros may have hidden an i64-sized value.
        match canonical.parse::<i64>() {
            Ok(n) => Some(Self::Small(n)),
            Err(_) => Some(Self::Big(canonical)),
        }
    }

    /// The value as a native wire integer, if it is below the inline limit.
    pub fn inline(&self) -> Option<i64> {
        match self {
            Self::Small(n) if n.unsigned_abs() < INLINE_INT_LIMIT => Some(*n),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Self::Small(0))
    }
}

impl From<i64> for Integer {
    fn from(n: i64) -> Self {
        Self::Small(n)
    }
}

impl fmt::Display for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Small(n) => write!(f, "{n}"),
            Self::Big(s) => f.write_str(s),
        }
    }
}

/// Runtime type families used by formatter guards.
///
/// These mirror the abstract families a dynamic runtime exposes; a value can
/// belong to several (a boolean is also integral, a string is a sequence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    None,
    Bool,
    Str,
    Integral,
    Float,
    Rational,
    Bytes,
    Mapping,
    Sequence,
    Set,
    Tuple,
}

impl Class {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool => "bool",
            Self::Str => "str",
            Self::Integral => "integral",
            Self::Float => "float",
            Self::Rational => "rational",
            Self::Bytes => "bytes",
            Self::Mapping => "mapping",
            Self::Sequence => "sequence",
            Self::Set => "set",
            Self::Tuple => "tuple",
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contiguous export of a (possibly multi-dimensional) buffer.
///
/// `data` is laid out in column-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferView {
    /// Element format code (struct-module style, e.g. `B`, `<f8`, `d`).
    pub format: String,
    pub itemsize: usize,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl BufferView {
    /// One-dimensional unsigned byte view.
    pub fn bytes(data: Vec<u8>) -> Self {
        Self {
            format: "B".to_string(),
            itemsize: 1,
            shape: vec![data.len()],
            data,
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload length agrees with shape and item size.
    pub fn is_consistent(&self) -> bool {
        let elements: usize = self.shape.iter().product();
        elements.checked_mul(self.itemsize) == Some(self.data.len())
    }

    /// Whether elements are opaque object pointers rather than plain data.
    pub fn has_objects(&self) -> bool {
        self.format.contains('O')
    }
}

/// Which of the recognised array-export protocols a value offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrayCapabilities {
    /// Conversion method (`__array__`).
    pub array: bool,
    /// Interface description (`__array_interface__`).
    pub interface: bool,
    /// Raw struct export (`__array_struct__`).
    pub structure: bool,
}

impl ArrayCapabilities {
    pub fn any(&self) -> bool {
        self.array || self.interface || self.structure
    }
}

/// Payload produced by a rich-display check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimePayload {
    Text(String),
    Binary(Vec<u8>),
}

/// How a host failure participates in formatter fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostErrorClass {
    /// The value has the wrong type for the operation; non-fatal.
    Type,
    /// The value is outside the operation's domain (e.g. division by zero); non-fatal.
    Domain,
    /// Anything else; aborts formatting.
    Other,
}

/// Failure raised by the runtime while inspecting or constructing a value.
///
/// `payload` lets an engine carry its native error object through the
/// encoder so it can be re-raised unchanged on the other side.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HostError {
    pub class: HostErrorClass,
    /// Runtime error type name, e.g. `TypeError`.
    pub kind: String,
    pub message: String,
    payload: Option<Box<dyn Any + Send + Sync>>,
}

impl HostError {
    pub fn new(class: HostErrorClass, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class,
            kind: kind.into(),
            message: message.into(),
            payload: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(HostErrorClass::Type, "TypeError", message)
    }

    pub fn domain(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(HostErrorClass::Domain, kind, message)
    }

    pub fn other(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(HostErrorClass::Other, kind, message)
    }

    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    /// Recover the engine-native error, if one of type `T` was attached.
    pub fn into_payload<T: Any>(self) -> Result<T, Self> {
        match self.payload {
            Some(payload) => match payload.downcast::<T>() {
                Ok(native) => Ok(*native),
                Err(payload) => Err(Self {
                    payload: Some(payload),
                    ..self
                }),
            },
            None => Err(self),
        }
    }
}

/// Inspection side of a runtime value.
///
/// The coercions (`to_*`) follow the runtime's own conversion rules, so an
/// unguarded formatter behaves like the runtime's constructor for that type
/// (a string formatter stringifies anything, an integer formatter truncates
/// floats, and so on). A coercion that does not apply fails with a
/// [`HostErrorClass::Type`] error.
pub trait HostValue: Sized + Send + Sync + 'static {
    /// Another strong handle to the same runtime object.
    fn share(&self) -> Self;

    /// Runtime type name, for diagnostics.
    fn type_name(&self) -> String;

    fn is_instance(&self, class: Class) -> Result<bool, HostError>;

    fn is_none(&self) -> bool;

    fn to_bool(&self) -> Result<bool, HostError>;

    fn to_str(&self) -> Result<String, HostError>;

    fn to_int(&self) -> Result<Integer, HostError>;

    fn to_float(&self) -> Result<f64, HostError>;

    /// Numerator and denominator.
    fn to_rational(&self) -> Result<(Integer, Integer), HostError>;

    fn to_bytes(&self) -> Result<Vec<u8>, HostError>;

    /// Key/value pairs of a mapping, in iteration order.
    fn items(&self) -> Result<Vec<(Self, Self)>, HostError>;

    /// Elements of an iterable, in iteration order.
    fn elements(&self) -> Result<Vec<Self>, HostError>;

    /// Contiguous byte export, or `None` if the value has no buffer.
    fn buffer(&self) -> Result<Option<BufferView>, HostError>;

    fn array_capabilities(&self) -> Result<ArrayCapabilities, HostError> {
        Ok(ArrayCapabilities::default())
    }

    /// Convert through the array protocols and export the result.
    fn export_array(&self) -> Result<Option<BufferView>, HostError> {
        Ok(None)
    }

    /// Multi-format export: every `(mime, payload)` the value offers.
    fn mime_bundle(&self) -> Result<Option<Vec<(String, MimePayload)>>, HostError> {
        Ok(None)
    }

    /// Format-specific render hook for one MIME type.
    fn render(&self, _mime: &str) -> Result<Option<MimePayload>, HostError> {
        Ok(None)
    }

    /// Figure-style save routine into an in-memory buffer.
    ///
    /// A value rendered this way may be consumed (closed) by the call.
    fn render_figure(&self, _format: &str) -> Result<Option<Vec<u8>>, HostError> {
        Ok(None)
    }
}

/// Construction side of a runtime value, used by the decoder.
pub trait Construct: HostValue {
    fn none() -> Result<Self, HostError>;

    fn from_bool(value: bool) -> Result<Self, HostError>;

    fn from_int(value: Integer) -> Result<Self, HostError>;

    fn from_float(value: f64) -> Result<Self, HostError>;

    fn from_str(value: &str) -> Result<Self, HostError>;

    fn tuple(items: Vec<Self>) -> Result<Self, HostError>;

    fn list(items: Vec<Self>) -> Result<Self, HostError>;

    fn dict(entries: Vec<(Self, Self)>) -> Result<Self, HostError>;
}
