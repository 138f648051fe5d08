//! CPython engine for the jlbridge worker.
//!
//! Embeds the interpreter and exposes the `jl` helper to guest code. The
//! `jlbridge-worker` binary wires this engine into the TCP server.

pub mod engine;
pub mod helper;
pub mod value;

use jlbridge::{Registry, Worker};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use engine::PythonEngine;
pub use helper::{Helper, PyFormat, Return};
pub use value::PyValue;

/// Initialize tracing on stderr.
///
/// `RUST_LOG` takes precedence; otherwise `JLBRIDGE_LOG` sets the level for
/// both crates. `LOG_FORMAT=json` switches to JSON lines. Stdout is left
/// alone: it carries the handshake and guest output.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("JLBRIDGE_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "jlbridge={level},jlbridge_python={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

/// Formatter registry with array and rich-media support enabled.
pub fn registry() -> Registry<PyValue> {
    Registry::new().with_extensions()
}

pub fn worker() -> Worker<PythonEngine> {
    Worker::new(PythonEngine, registry())
}
