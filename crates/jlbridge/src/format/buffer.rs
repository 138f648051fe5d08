//! Raw buffer and array exports.

use super::{Encoder, Format, FormatError, FormatNode};
use crate::value::{BufferView, HostValue};

/// Object pointers never go on the wire; such buffers fall through to Ref.
fn buffer_node(view: BufferView) -> Result<FormatNode, FormatError> {
    if view.has_objects() {
        return Err(FormatError::mismatch("cannot export a buffer of objects"));
    }
    if !view.is_consistent() {
        return Err(FormatError::mismatch(format!(
            "buffer of {} bytes does not match shape {:?} x {}",
            view.nbytes(),
            view.shape,
            view.itemsize
        )));
    }
    Ok(FormatNode::Buffer(view.into()))
}

/// Values exposing a contiguous byte view.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferFormat;

impl<V: HostValue> Format<V> for BufferFormat {
    fn format(&self, value: &V, _: &Encoder<V>) -> Result<FormatNode, FormatError> {
        match value.buffer()? {
            Some(view) => buffer_node(view),
            None => Err(FormatError::mismatch("expecting a buffer")),
        }
    }
}

/// Values offering one of the array-export protocols.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayFormat;

impl<V: HostValue> Format<V> for ArrayFormat {
    fn format(&self, value: &V, _: &Encoder<V>) -> Result<FormatNode, FormatError> {
        if !value.array_capabilities()?.any() {
            return Err(FormatError::mismatch("expecting an array"));
        }
        match value.export_array()? {
            Some(view) => buffer_node(view),
            None => Err(FormatError::mismatch("array has no exportable buffer")),
        }
    }
}
