//! Formatter registry: the process-wide Any union and named formatters.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;
use serde_json::Value;

use super::{
    ArrayFormat, BoolFormat, BufferFormat, BytesFormat, DictFormat, Encoder, FloatFormat, Format,
    FormatError, FormatNode, Guarded, IntFormat, ListFormat, NoneFormat, RationalFormat,
    RefFormat, SetFormat, SharedFormat, StrFormat, TupleFormat, Union, first_match, media,
};
use crate::value::{Class, HostValue};

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("unknown format '{0}'")]
    UnknownName(String),

    #[error("invalid format spec: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Extensible union tried when no formatter is given.
///
/// Members are tried in order, then [`RefFormat`] as the terminal fallback,
/// so formatting through Any only fails on a fatal host error.
pub struct AnyFormat<V> {
    members: RwLock<Vec<SharedFormat<V>>>,
}

impl<V: HostValue> AnyFormat<V> {
    pub fn new(members: Vec<SharedFormat<V>>) -> Self {
        Self {
            members: RwLock::new(members),
        }
    }

    /// Append formatters ahead of the reference fallback.
    pub fn extend(&self, formats: impl IntoIterator<Item = SharedFormat<V>>) {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(formats);
    }

    /// Number of members, counting the reference fallback.
    pub fn len(&self) -> usize {
        self.snapshot().len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    fn snapshot(&self) -> Vec<SharedFormat<V>> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<V: HostValue> Format<V> for AnyFormat<V> {
    fn format(&self, value: &V, encoder: &Encoder<V>) -> Result<FormatNode, FormatError> {
        // Members may recurse into Any, so never hold the lock while formatting.
        let members = self.snapshot();
        match first_match(&members, value, encoder) {
            Err(e) if e.is_fallthrough() => RefFormat.format(value, encoder),
            result => result,
        }
    }
}

/// Declarative formatter description, as accepted from guest code.
///
/// ```json
/// "int"
/// {"list": "str"}
/// {"dict": ["str", {"optional": "float"}]}
/// {"tuple": ["int", "any"]}
/// {"union": ["media", "ref"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FormatSpec {
    Named(String),
    Composite(CompositeSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeSpec {
    List(Box<FormatSpec>),
    Set(Box<FormatSpec>),
    Dict(Box<FormatSpec>, Box<FormatSpec>),
    Tuple(Vec<FormatSpec>),
    Union(Vec<FormatSpec>),
    Optional(Box<FormatSpec>),
}

impl FormatSpec {
    pub fn parse(value: &Value) -> Result<Self, SpecError> {
        Ok(Self::deserialize(value)?)
    }
}

pub struct Registry<V> {
    any: Arc<AnyFormat<V>>,
}

impl<V: HostValue> Default for Registry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: HostValue> Registry<V> {
    /// Registry with the built-in Any chain and no extensions.
    pub fn new() -> Self {
        let builtin: Vec<SharedFormat<V>> = vec![
            Arc::new(NoneFormat),
            Arc::new(Guarded::class(Class::Bool, BoolFormat)),
            Arc::new(Guarded::class(Class::Str, StrFormat)),
            Arc::new(Guarded::class(Class::Integral, IntFormat)),
            Arc::new(Guarded::class(Class::Float, FloatFormat)),
            Arc::new(Guarded::class(Class::Rational, RationalFormat)),
            Arc::new(Guarded::class(Class::Bytes, BytesFormat)),
            Arc::new(Guarded::class(Class::Mapping, DictFormat::default())),
            Arc::new(Guarded::class(Class::Tuple, TupleFormat::default())),
            Arc::new(Guarded::class(Class::Sequence, ListFormat::default())),
            Arc::new(Guarded::class(Class::Set, SetFormat::default())),
            Arc::new(BufferFormat),
        ];
        Self {
            any: Arc::new(AnyFormat::new(builtin)),
        }
    }

    pub fn any(&self) -> &Arc<AnyFormat<V>> {
        &self.any
    }

    /// Late-bound extensions; they run after the built-ins and before Ref.
    pub fn extend_any(&self, formats: impl IntoIterator<Item = SharedFormat<V>>) {
        self.any.extend(formats);
    }

    /// The optional domain extensions: array exports and rich media.
    pub fn with_extensions(self) -> Self {
        let extensions: Vec<SharedFormat<V>> = vec![Arc::new(ArrayFormat), Arc::new(media::<V>())];
        self.extend_any(extensions);
        self
    }

    pub fn named(&self, name: &str) -> Result<SharedFormat<V>, SpecError> {
        let format: SharedFormat<V> = match name {
            "none" => Arc::new(NoneFormat),
            "bool" => Arc::new(BoolFormat),
            "str" => Arc::new(StrFormat),
            "int" => Arc::new(IntFormat),
            "float" => Arc::new(FloatFormat),
            "rational" => Arc::new(RationalFormat),
            "bytes" => Arc::new(BytesFormat),
            "buffer" => Arc::new(BufferFormat),
            "array" => Arc::new(ArrayFormat),
            "media" => Arc::new(media::<V>()),
            "ref" => Arc::new(RefFormat),
            "any" => self.any.clone(),
            "list" => Arc::new(ListFormat::default()),
            "set" => Arc::new(SetFormat::default()),
            "dict" => Arc::new(DictFormat::default()),
            "tuple" => Arc::new(TupleFormat::default()),
            other => return Err(SpecError::UnknownName(other.to_string())),
        };
        Ok(format)
    }

    pub fn build(&self, spec: &FormatSpec) -> Result<SharedFormat<V>, SpecError> {
        let composite = match spec {
            FormatSpec::Named(name) => return self.named(name),
            FormatSpec::Composite(composite) => composite,
        };
        let format: SharedFormat<V> = match composite {
            CompositeSpec::List(element) => Arc::new(ListFormat::new(Some(self.build(element)?))),
            CompositeSpec::Set(element) => Arc::new(SetFormat::new(Some(self.build(element)?))),
            CompositeSpec::Dict(key, val) => Arc::new(DictFormat::new(
                Some(self.build(key)?),
                Some(self.build(val)?),
            )),
            CompositeSpec::Tuple(slots) => Arc::new(TupleFormat::Slots(self.build_all(slots)?)),
            CompositeSpec::Union(members) => Arc::new(Union::new(self.build_all(members)?)),
            CompositeSpec::Optional(inner) => Arc::new(Union::optional(vec![self.build(inner)?])),
        };
        Ok(format)
    }

    fn build_all(&self, specs: &[FormatSpec]) -> Result<Vec<SharedFormat<V>>, SpecError> {
        specs.iter().map(|spec| self.build(spec)).collect()
    }
}
