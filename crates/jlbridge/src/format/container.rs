//! Container formatters.
//!
//! Element formatters are optional: `None` means "the encoder's Any chain".
//! Holding the chain by reference through the encoder (rather than as an
//! `Arc` member) keeps the built-in Any union free of reference cycles.

use super::{Encoder, Format, FormatError, FormatNode, SharedFormat};
use crate::value::HostValue;

fn encode_all<V: HostValue>(
    items: Vec<V>,
    format: Option<&SharedFormat<V>>,
    encoder: &Encoder<V>,
) -> Result<Vec<FormatNode>, FormatError> {
    items
        .iter()
        .map(|item| encoder.encode(item, format))
        .collect()
}

pub struct DictFormat<V> {
    key: Option<SharedFormat<V>>,
    val: Option<SharedFormat<V>>,
}

impl<V: HostValue> DictFormat<V> {
    pub fn new(key: Option<SharedFormat<V>>, val: Option<SharedFormat<V>>) -> Self {
        Self { key, val }
    }
}

impl<V: HostValue> Default for DictFormat<V> {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl<V: HostValue> Format<V> for DictFormat<V> {
    fn format(&self, value: &V, encoder: &Encoder<V>) -> Result<FormatNode, FormatError> {
        let entries = value
            .items()?
            .iter()
            .map(|(k, v)| {
                Ok((
                    encoder.encode(k, self.key.as_ref())?,
                    encoder.encode(v, self.val.as_ref())?,
                ))
            })
            .collect::<Result<Vec<_>, FormatError>>()?;
        Ok(FormatNode::Dict(entries))
    }
}

pub struct ListFormat<V> {
    element: Option<SharedFormat<V>>,
}

impl<V: HostValue> ListFormat<V> {
    pub fn new(element: Option<SharedFormat<V>>) -> Self {
        Self { element }
    }
}

impl<V: HostValue> Default for ListFormat<V> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<V: HostValue> Format<V> for ListFormat<V> {
    fn format(&self, value: &V, encoder: &Encoder<V>) -> Result<FormatNode, FormatError> {
        let items = encode_all(value.elements()?, self.element.as_ref(), encoder)?;
        Ok(FormatNode::List(items))
    }
}

pub struct SetFormat<V> {
    element: Option<SharedFormat<V>>,
}

impl<V: HostValue> SetFormat<V> {
    pub fn new(element: Option<SharedFormat<V>>) -> Self {
        Self { element }
    }
}

impl<V: HostValue> Default for SetFormat<V> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<V: HostValue> Format<V> for SetFormat<V> {
    fn format(&self, value: &V, encoder: &Encoder<V>) -> Result<FormatNode, FormatError> {
        let items = encode_all(value.elements()?, self.element.as_ref(), encoder)?;
        Ok(FormatNode::Set(items))
    }
}

/// Either one formatter for every element, or one per slot.
pub enum TupleFormat<V> {
    Uniform(Option<SharedFormat<V>>),
    Slots(Vec<SharedFormat<V>>),
}

impl<V: HostValue> Default for TupleFormat<V> {
    fn default() -> Self {
        Self::Uniform(None)
    }
}

impl<V: HostValue> Format<V> for TupleFormat<V> {
    fn format(&self, value: &V, encoder: &Encoder<V>) -> Result<FormatNode, FormatError> {
        let items = value.elements()?;
        let nodes = match self {
            Self::Uniform(element) => encode_all(items, element.as_ref(), encoder)?,
            Self::Slots(slots) => {
                if slots.len() != items.len() {
                    return Err(FormatError::mismatch(format!(
                        "expecting a tuple of length {}",
                        slots.len()
                    )));
                }
                items
                    .iter()
                    .zip(slots)
                    .map(|(item, slot)| slot.format(item, encoder))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(FormatNode::Tuple(nodes))
    }
}
