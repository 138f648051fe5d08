//! Formatter chain: polymorphic encoding of runtime values into [`FormatNode`]s.
//!
//! A formatter is a rule `value -> FormatNode` that may decline with
//! [`FormatError::Mismatch`]. Formatters compose:
//!
//! - [`Guarded`] runs its inner rule only when a type predicate admits the value
//! - [`Union`] tries an ordered list of members and returns the first success
//! - [`registry::AnyFormat`] is the process-wide extensible union, terminated
//!   by the reference fallback so that it never fails on well-behaved values
//!
//! Mismatches and value-domain errors are contained in the chain; any other
//! host failure aborts the scan and propagates to the caller.

mod buffer;
mod container;
mod media;
pub mod node;
pub mod registry;
mod scalar;

use std::sync::Arc;

use crate::refs::RefTable;
use crate::value::{Class, HostError, HostErrorClass, HostValue};

pub use buffer::{ArrayFormat, BufferFormat};
pub use container::{DictFormat, ListFormat, SetFormat, TupleFormat};
pub use media::{FigureFormat, MEDIA_PREFERENCE, MimeBundleFormat, RenderFormat, media};
pub use node::{BufferNode, FormatNode, NodeError};
pub use registry::{AnyFormat, CompositeSpec, FormatSpec, Registry, SpecError};
pub use scalar::{
    BoolFormat, BytesFormat, FloatFormat, IntFormat, NoneFormat, RationalFormat, StrFormat,
};

/// Message of the aggregate mismatch raised when no union member applies.
pub const NO_MATCH: &str = "cannot format this";

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The formatter does not apply to this value.
    #[error("{0}")]
    Mismatch(String),

    /// The value is outside the formatter's domain (e.g. zero denominator).
    #[error("{0}")]
    Domain(String),

    /// Any other failure raised by the runtime.
    #[error(transparent)]
    Host(HostError),
}

impl FormatError {
    pub fn mismatch(message: impl Into<String>) -> Self {
        Self::Mismatch(message.into())
    }

    /// Whether a union should move on to its next member.
    pub fn is_fallthrough(&self) -> bool {
        matches!(self, Self::Mismatch(_) | Self::Domain(_))
    }
}

impl From<HostError> for FormatError {
    fn from(err: HostError) -> Self {
        match err.class {
            HostErrorClass::Type => Self::Mismatch(err.message),
            HostErrorClass::Domain => Self::Domain(err.message),
            HostErrorClass::Other => Self::Host(err),
        }
    }
}

/// A rule turning a runtime value into a [`FormatNode`].
pub trait Format<V>: Send + Sync {
    fn format(&self, value: &V, encoder: &Encoder<V>) -> Result<FormatNode, FormatError>;
}

pub type SharedFormat<V> = Arc<dyn Format<V>>;

/// Shared state formatters need while encoding: the reference table for
/// handle allocation and the registry for the default (Any) chain.
pub struct Encoder<V> {
    refs: Arc<RefTable<V>>,
    registry: Arc<Registry<V>>,
}

impl<V> Clone for Encoder<V> {
    fn clone(&self) -> Self {
        Self {
            refs: Arc::clone(&self.refs),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<V: HostValue> Encoder<V> {
    pub fn new(refs: Arc<RefTable<V>>, registry: Arc<Registry<V>>) -> Self {
        Self { refs, registry }
    }

    pub fn refs(&self) -> &Arc<RefTable<V>> {
        &self.refs
    }

    pub fn registry(&self) -> &Arc<Registry<V>> {
        &self.registry
    }

    /// Encode `value` with `format`, or with the Any chain when `None`.
    pub fn encode(
        &self,
        value: &V,
        format: Option<&SharedFormat<V>>,
    ) -> Result<FormatNode, FormatError> {
        match format {
            Some(format) => format.format(value, self),
            None => self.registry.any().format(value, self),
        }
    }
}

/// Type/capability predicate guarding a formatter.
pub trait Guard<V>: Send + Sync {
    fn admits(&self, value: &V) -> Result<bool, HostError>;

    /// Human-readable description used in mismatch messages.
    fn describe(&self) -> String;
}

impl<V: HostValue> Guard<V> for Class {
    fn admits(&self, value: &V) -> Result<bool, HostError> {
        value.is_instance(*self)
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

pub struct Guarded<V> {
    guard: Arc<dyn Guard<V>>,
    inner: SharedFormat<V>,
}

impl<V: HostValue> Guarded<V> {
    pub fn new(guard: Arc<dyn Guard<V>>, inner: SharedFormat<V>) -> Self {
        Self { guard, inner }
    }

    /// Guard `inner` with a runtime type family.
    pub fn class(class: Class, inner: impl Format<V> + 'static) -> Self {
        Self::new(Arc::new(class), Arc::new(inner))
    }
}

impl<V: HostValue> Format<V> for Guarded<V> {
    fn format(&self, value: &V, encoder: &Encoder<V>) -> Result<FormatNode, FormatError> {
        if !self.guard.admits(value)? {
            return Err(FormatError::mismatch(format!(
                "expecting a {}",
                self.guard.describe()
            )));
        }
        self.inner.format(value, encoder)
    }
}

/// Ordered fallback over member formatters.
pub struct Union<V> {
    members: Vec<SharedFormat<V>>,
}

impl<V: HostValue> Union<V> {
    pub fn new(members: Vec<SharedFormat<V>>) -> Self {
        Self { members }
    }

    /// Union that also accepts the runtime's null value first.
    pub fn optional(members: Vec<SharedFormat<V>>) -> Self {
        let mut all: Vec<SharedFormat<V>> = Vec::with_capacity(members.len() + 1);
        all.push(Arc::new(NoneFormat));
        all.extend(members);
        Self::new(all)
    }

    pub fn members(&self) -> &[SharedFormat<V>] {
        &self.members
    }
}

impl<V: HostValue> Format<V> for Union<V> {
    fn format(&self, value: &V, encoder: &Encoder<V>) -> Result<FormatNode, FormatError> {
        first_match(&self.members, value, encoder)
    }
}

/// Try `members` in order; fall through on mismatch, abort on anything else.
pub(crate) fn first_match<V: HostValue>(
    members: &[SharedFormat<V>],
    value: &V,
    encoder: &Encoder<V>,
) -> Result<FormatNode, FormatError> {
    for member in members {
        match member.format(value, encoder) {
            Ok(node) => return Ok(node),
            Err(e) if e.is_fallthrough() => {
                tracing::trace!(error = %e, "Formatter declined, trying next");
            }
            Err(e) => return Err(e),
        }
    }
    Err(FormatError::mismatch(NO_MATCH))
}

/// Terminal fallback: stores the value in the reference table.
///
/// Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefFormat;

impl<V: HostValue> Format<V> for RefFormat {
    fn format(&self, value: &V, encoder: &Encoder<V>) -> Result<FormatNode, FormatError> {
        let handle = encoder.refs().allocate(value.share());
        tracing::trace!(%handle, type_name = %value.type_name(), "Allocated reference");
        Ok(FormatNode::Ref(handle))
    }
}
