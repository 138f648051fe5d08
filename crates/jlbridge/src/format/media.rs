//! Rich-display formatters.
//!
//! Three checks, tried in order by [`media`]: an explicit multi-format
//! export, per-MIME render hooks, and figure-style save routines.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::{Encoder, Format, FormatError, FormatNode, SharedFormat, Union};
use crate::value::{HostValue, MimePayload};

/// MIME types worth shipping, most preferred first.
pub const MEDIA_PREFERENCE: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/svg+xml",
    "text/html",
    "text/markdown",
    "text/latex",
    "application/json",
];

fn is_binary(mime: &str) -> bool {
    matches!(mime, "image/png" | "image/jpeg")
}

/// Bytes of a payload for `mime`.
///
/// Display hooks usually hand binary images over as base64 text; anything
/// that does not decode is taken as raw text.
fn payload_bytes(mime: &str, payload: MimePayload) -> Vec<u8> {
    match payload {
        MimePayload::Binary(data) => data,
        MimePayload::Text(text) if is_binary(mime) => match STANDARD.decode(text.trim()) {
            Ok(data) => data,
            Err(_) => text.into_bytes(),
        },
        MimePayload::Text(text) => text.into_bytes(),
    }
}

fn media_node(mime: &str, payload: MimePayload) -> FormatNode {
    FormatNode::Media {
        mime: mime.to_string(),
        data: payload_bytes(mime, payload),
    }
}

/// Picks the most preferred entry of a value's multi-format export.
#[derive(Debug, Clone, Copy, Default)]
pub struct MimeBundleFormat;

impl<V: HostValue> Format<V> for MimeBundleFormat {
    fn format(&self, value: &V, _: &Encoder<V>) -> Result<FormatNode, FormatError> {
        let Some(mut bundle) = value.mime_bundle()? else {
            return Err(FormatError::mismatch("expecting a mime bundle"));
        };
        for mime in MEDIA_PREFERENCE {
            if let Some(pos) = bundle.iter().position(|(m, _)| m == mime) {
                let (_, payload) = bundle.swap_remove(pos);
                return Ok(media_node(mime, payload));
            }
        }
        Err(FormatError::mismatch("mime bundle has no supported type"))
    }
}

/// Asks the value to render itself as each MIME type in turn.
#[derive(Debug, Clone)]
pub struct RenderFormat {
    mimes: Vec<String>,
}

impl RenderFormat {
    pub fn new(mimes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            mimes: mimes.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for RenderFormat {
    fn default() -> Self {
        Self::new(MEDIA_PREFERENCE.iter().copied())
    }
}

impl<V: HostValue> Format<V> for RenderFormat {
    fn format(&self, value: &V, _: &Encoder<V>) -> Result<FormatNode, FormatError> {
        for mime in &self.mimes {
            if let Some(payload) = value.render(mime)? {
                return Ok(media_node(mime, payload));
            }
        }
        Err(FormatError::mismatch("value has no render method"))
    }
}

/// Saves a figure-like value into an in-memory image.
#[derive(Debug, Clone)]
pub struct FigureFormat {
    format: String,
    mime: String,
}

impl FigureFormat {
    pub fn new(format: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            mime: mime.into(),
        }
    }
}

impl Default for FigureFormat {
    fn default() -> Self {
        Self::new("png", "image/png")
    }
}

impl<V: HostValue> Format<V> for FigureFormat {
    fn format(&self, value: &V, _: &Encoder<V>) -> Result<FormatNode, FormatError> {
        match value.render_figure(&self.format)? {
            Some(data) => Ok(FormatNode::Media {
                mime: self.mime.clone(),
                data,
            }),
            None => Err(FormatError::mismatch("expecting a figure")),
        }
    }
}

/// The composite media formatter.
pub fn media<V: HostValue>() -> Union<V> {
    let members: Vec<SharedFormat<V>> = vec![
        Arc::new(MimeBundleFormat),
        Arc::new(RenderFormat::default()),
        Arc::new(FigureFormat::default()),
    ];
    Union::new(members)
}
