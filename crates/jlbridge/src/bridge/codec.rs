//! Line-framed JSON codec.
//!
//! One JSON document per `\n`-terminated UTF-8 line. Works over any
//! AsyncRead/AsyncWrite (sockets, pipes).

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Default cap on a single frame, in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024 * 1024;

/// Codec that frames messages by newline and serializes with JSON.
///
/// Wraps LinesCodec and adds serde_json serialization. Blank lines are
/// skipped.
pub struct JsonLinesCodec<T> {
    inner: LinesCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonLinesCodec<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl<T> JsonLinesCodec<T> {
    pub fn new(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            _phantom: PhantomData,
        }
    }

    pub fn max_length(&self) -> usize {
        self.inner.max_length()
    }
}

fn lines_error(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "frame exceeds maximum line length")
        }
    }
}

fn parse<T: DeserializeOwned>(line: &str) -> Result<T, io::Error> {
    tracing::trace!(frame_size_bytes = line.len(), "Decoding frame");
    serde_json::from_str(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

impl<T: DeserializeOwned> Decoder for JsonLinesCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.inner.decode(src).map_err(lines_error)? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return parse(&line).map(Some),
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.inner.decode_eof(src).map_err(lines_error)? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return parse(&line).map(Some),
                None => return Ok(None),
            }
        }
    }
}

impl<T, U: Serialize> Encoder<U> for JsonLinesCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: U, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let json_len = json.len();
        tracing::trace!(frame_size_bytes = json_len, "Encoding frame");
        if json_len > 1_000_000 {
            tracing::info!(
                frame_size_bytes = json_len,
                frame_size_kb = json_len / 1024,
                "Large frame being encoded"
            );
        }
        dst.reserve(json_len + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::bridge::protocol::Response;
    use crate::format::FormatNode;

    #[test]
    fn frames_are_newline_terminated() {
        let mut codec = JsonLinesCodec::<Value>::default();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Response::Result {
                    id: json!(7),
                    result: FormatNode::BigInt("1073741824".into()),
                },
                &mut buf,
            )
            .unwrap();
        assert_eq!(
            std::str::from_utf8(&buf).unwrap(),
            "{\"tag\":\"result\",\"id\":7,\"result\":{\"t\":\"int\",\"v\":\"1073741824\"}}\n"
        );
    }

    #[test]
    fn decodes_multiple_frames_and_partial_input() {
        let mut codec = JsonLinesCodec::<Value>::default();
        let mut buf = BytesMut::from(&b"{\"tag\":\"echo\",\"id\":1}\n\n{\"tag\":\"st"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(json!({"tag": "echo", "id": 1}))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"op\"}\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(json!({"tag": "stop"})));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn final_line_without_newline_is_decoded_at_eof() {
        let mut codec = JsonLinesCodec::<Value>::default();
        let mut buf = BytesMut::from(&b"{\"tag\":\"stop\"}"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(json!({"tag": "stop"})));
    }

    #[test]
    fn invalid_json_is_invalid_data() {
        let mut codec = JsonLinesCodec::<Value>::default();
        let mut buf = BytesMut::from(&b"{not json}\n"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = JsonLinesCodec::<Value>::new(8);
        let mut buf = BytesMut::from(&b"\"0123456789\"\n"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
