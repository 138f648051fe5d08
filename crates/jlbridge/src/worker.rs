//! Run execution: scope resolution, argument decoding and result capture.
//!
//! The interpreter itself sits behind [`Engine`]. The worker owns the state
//! every run shares (reference table, registry, scopes) and turns an engine
//! outcome into a [`Response`].

use std::sync::{Arc, Mutex, PoisonError};

use crate::bridge::protocol::{Response, RunRequest};
use crate::decode::{DecodeError, Decoder};
use crate::format::{Encoder, FormatError, FormatNode, Registry, SpecError};
use crate::refs::RefTable;
use crate::scope::{ScopePath, ScopeStore};
use crate::value::{Construct, HostError};

/// Failure of a run, reported to the host as `{type, str}`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExecError {
    /// Runtime error type name, e.g. `ValueError`.
    pub kind: String,
    pub message: String,
}

impl ExecError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<HostError> for ExecError {
    fn from(err: HostError) -> Self {
        Self::new(err.kind, err.message)
    }
}

impl From<DecodeError> for ExecError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnknownReference(handle) => {
                Self::new("UnknownReference", format!("unknown reference '{handle}'"))
            }
            DecodeError::Unsupported(what) => {
                Self::new("DecodeError", format!("cannot decode {what}"))
            }
            DecodeError::Host(e) => e.into(),
        }
    }
}

impl From<FormatError> for ExecError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::Mismatch(message) => Self::new("TypeError", message),
            FormatError::Domain(message) => Self::new("ValueError", message),
            FormatError::Host(e) => e.into(),
        }
    }
}

impl From<SpecError> for ExecError {
    fn from(err: SpecError) -> Self {
        Self::new("ValueError", err.to_string())
    }
}

/// Where a run's explicit return value lands.
///
/// The engine's return helper fills the slot and then unwinds the guest
/// code; the worker takes the node once execution has stopped.
#[derive(Debug, Clone, Default)]
pub struct ReturnSlot(Arc<Mutex<Option<FormatNode>>>);

impl ReturnSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the result. A later fill replaces an earlier one.
    pub fn fill(&self, node: FormatNode) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(node);
    }

    pub fn take(&self) -> Option<FormatNode> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Everything an engine needs to execute one run.
pub struct Execution<'a, E: Engine + ?Sized> {
    pub namespace: &'a E::Namespace,
    pub code: &'a str,
    /// `None`: the scope is both globals and locals.
    pub locals: Option<Vec<(String, E::Value)>>,
    pub encoder: Encoder<E::Value>,
    pub slot: ReturnSlot,
}

/// An interpreter the worker can drive.
pub trait Engine: Send + Sync + 'static {
    type Value: Construct;
    type Namespace: Send + Sync + 'static;

    /// Create (or look up in the runtime) the namespace for a scope.
    fn create_namespace(&self, path: &ScopePath) -> Result<Self::Namespace, ExecError>;

    /// Execute code to completion.
    ///
    /// Returns `Ok` both when the code finishes and when it unwinds through
    /// the return helper; anything else raised is an [`ExecError`].
    fn execute(&self, execution: Execution<'_, Self>) -> Result<(), ExecError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Returned(FormatNode),
    Completed,
    Failed(ExecError),
}

impl Outcome {
    pub fn into_response(self, id: serde_json::Value) -> Response {
        match self {
            Self::Returned(result) => Response::Result { id, result },
            Self::Completed => Response::Result {
                id,
                result: FormatNode::Null,
            },
            Self::Failed(ExecError { kind, message }) => Response::Error { id, kind, message },
        }
    }
}

pub struct Worker<E: Engine> {
    engine: E,
    encoder: Encoder<E::Value>,
    scopes: ScopeStore<E::Namespace>,
}

impl<E: Engine> Worker<E> {
    pub fn new(engine: E, registry: Registry<E::Value>) -> Self {
        Self {
            engine,
            encoder: Encoder::new(Arc::new(RefTable::new()), Arc::new(registry)),
            scopes: ScopeStore::new(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn encoder(&self) -> &Encoder<E::Value> {
        &self.encoder
    }

    pub fn refs(&self) -> &RefTable<E::Value> {
        self.encoder.refs()
    }

    pub fn scopes(&self) -> &ScopeStore<E::Namespace> {
        &self.scopes
    }

    /// Execute a run request to completion.
    pub fn run(&self, request: &RunRequest) -> Response {
        let outcome = self.execute(request);
        match &outcome {
            Outcome::Failed(e) => {
                tracing::debug!(id = %request.id, scope = %request.scope, error = %e, "Run failed");
            }
            _ => tracing::trace!(id = %request.id, scope = %request.scope, "Run finished"),
        }
        outcome.into_response(request.id.clone())
    }

    fn execute(&self, request: &RunRequest) -> Outcome {
        match self.try_execute(request) {
            Ok(Some(node)) => Outcome::Returned(node),
            Ok(None) => Outcome::Completed,
            Err(e) => Outcome::Failed(e),
        }
    }

    fn try_execute(&self, request: &RunRequest) -> Result<Option<FormatNode>, ExecError> {
        let namespace = self
            .scopes
            .get_or_create(&request.scope, |path| self.engine.create_namespace(path))?;

        let locals = request
            .locals
            .as_ref()
            .map(|locals| Decoder::new(self.refs()).decode_locals(locals))
            .transpose()?;

        let slot = ReturnSlot::new();
        self.engine.execute(Execution {
            namespace: &namespace,
            code: &request.code,
            locals,
            encoder: self.encoder.clone(),
            slot: slot.clone(),
        })?;
        Ok(slot.take())
    }

    /// Release a reference handle; unknown handles are ignored.
    pub fn release(&self, handle: &str) {
        if self.refs().release(handle) {
            tracing::trace!(%handle, "Released reference");
        } else {
            tracing::debug!(%handle, "Release of unknown reference ignored");
        }
    }
}
