//! Wire layer between the host and the worker.
//!
//! # Architecture
//!
//! - **protocol**: request, response and handshake messages
//! - **codec**: newline-delimited JSON framing for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
