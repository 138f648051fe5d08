//! jlbridge: a local bridge worker driven over a line-framed JSON protocol.
//!
//! A host connects over TCP and asks the worker to execute code in
//! persistent named scopes. Results come back as self-describing
//! [`format::FormatNode`]s produced by an extensible formatter chain; values
//! with no structural encoding are kept in a reference table and shipped as
//! opaque handles.
//!
//! This crate is interpreter-agnostic. An embedding provides an
//! [`worker::Engine`] whose value type implements [`value::HostValue`] and
//! [`value::Construct`].
//!
//! # Architecture
//!
//! - **value**: capability surface of runtime values
//! - **format**: Format Nodes, formatters and the registry (Any chain)
//! - **refs**: opaque reference table
//! - **scope**: persistent scopes
//! - **decode**: wire → runtime decoding of run arguments
//! - **worker**: the engine seam and run execution
//! - **bridge**: wire protocol and codec
//! - **transport**: TCP server and per-connection request loop

pub mod bridge;
pub mod decode;
pub mod format;
pub mod refs;
pub mod scope;
pub mod tasks;
pub mod transport;
pub mod value;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::protocol::{Handshake, Request, Response, RunRequest};
pub use format::{Encoder, Format, FormatError, FormatNode, Registry, SharedFormat};
pub use refs::RefTable;
pub use scope::{ScopePath, ScopeStore};
pub use transport::{ServerConfig, serve};
pub use value::{Construct, HostError, HostValue};
pub use worker::{Engine, ExecError, Execution, ReturnSlot, Worker};
